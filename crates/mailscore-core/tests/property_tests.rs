//! # Property-Based Tests
//!
//! Accumulation, finality and determinism invariants of the scoring core.

use mailscore_core::{
    Composite, CompositeResolver, Consolidator, Insertion, Metric, MetricResult, ResultSet,
    ScoreError, Targets,
};
use proptest::collection::vec;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

const SYMBOLS: [&str; 4] = ["A", "B", "C", "D"];

fn metric(grow: f64, cap: Option<f64>) -> Arc<Metric> {
    Arc::new(
        Metric::new("default")
            .with_symbol("A", 1.0)
            .with_symbol("B", 2.5)
            .with_symbol("C", -1.0)
            .with_grow_factor(grow, cap)
            .with_thresholds(5.0, 10.0),
    )
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// The running score equals the sum of the deltas every insert applied.
    #[test]
    fn running_score_is_sum_of_deltas(
        inserts in vec((0usize..4, 0.1f64..3.0), 0..60),
        grow in 1.0f64..2.0,
    ) {
        let mut result = MetricResult::new(metric(grow, Some(16.0)));
        let mut applied = 0.0;

        for (index, weight) in &inserts {
            match result.insert(SYMBOLS[*index], *weight, &[]) {
                Insertion::Inserted { delta } | Insertion::Accumulated { delta } => applied += delta,
                Insertion::Unrecognized => prop_assert_eq!(SYMBOLS[*index], "D"),
                Insertion::Finalized => prop_assert!(false, "metric is not consolidated"),
            }
        }

        prop_assert!(close(result.score(), applied));
        let entries: f64 = result.symbols().values().map(|e| e.weight).sum();
        prop_assert!(close(result.score(), entries));
    }

    /// The growth factor never exceeds its cap.
    #[test]
    fn growth_factor_stays_capped(repeats in 1usize..200, grow in 1.0f64..4.0, cap in 1.0f64..50.0) {
        let mut result = MetricResult::new(metric(grow, Some(cap)));
        for _ in 0..repeats {
            result.insert("A", 1.0, &[]);
        }
        prop_assert!(result.grow_factor() <= cap);
        prop_assert!(result.score().is_finite());
    }

    /// After consolidation nothing changes the score or the verdict.
    #[test]
    fn consolidated_metric_is_frozen(
        before in vec(0usize..4, 0..20),
        after in vec(0usize..4, 1..20),
    ) {
        let mut result = MetricResult::new(metric(2.0, Some(8.0)));
        for index in &before {
            result.insert(SYMBOLS[*index], 1.0, &[]);
        }
        let verdict = Consolidator::consolidate(&mut result).expect("consolidate");
        let score = result.score();

        for index in &after {
            let outcome = result.insert(SYMBOLS[*index], 1.0, &[]);
            prop_assert!(matches!(outcome, Insertion::Finalized | Insertion::Unrecognized));
        }
        prop_assert_eq!(result.score(), score);

        match Consolidator::consolidate(&mut result) {
            Err(ScoreError::AlreadyConsolidated { previous, .. }) => prop_assert_eq!(*previous, verdict),
            other => prop_assert!(false, "expected AlreadyConsolidated, got {:?}", other),
        }
    }

    /// Composite evaluation of one snapshot always yields the same symbols.
    #[test]
    fn composite_evaluation_is_deterministic(present in vec(any::<bool>(), 4)) {
        let base = Metric::new("default")
            .with_symbol("A", 1.0)
            .with_symbol("B", 2.0)
            .with_symbol("C", 3.0)
            .with_symbol("D", 4.0)
            .with_symbol("X_ANY", 1.0)
            .with_symbol("X_HEAVY", 1.0)
            .with_symbol("X_CHAIN", 1.0);
        let mut metrics = BTreeMap::new();
        metrics.insert("default".to_string(), Arc::new(base));
        let mut set = ResultSet::new(&metrics);
        for (symbol, on) in SYMBOLS.iter().zip(&present) {
            if *on {
                set.insert(&Targets::All, symbol, 1.0, &[]);
            }
        }

        let resolver = CompositeResolver::new(vec![
            Composite::parse("X_CHAIN", "X_ANY & !X_HEAVY", Vec::new()).expect("parse"),
            Composite::parse("X_ANY", "A | B | C | D", Vec::new()).expect("parse"),
            Composite::parse("X_HEAVY", "C + D >= 5", Vec::new()).expect("parse"),
        ]);

        let snapshot = set.metric("default").expect("metric").clone();
        let first = resolver.evaluate(&snapshot);
        let second = resolver.evaluate(&snapshot);
        prop_assert_eq!(&first, &second);

        let mut copy = set.clone();
        resolver.resolve(&mut set);
        resolver.resolve(&mut copy);
        let names = |s: &ResultSet| s.metric("default").map(|m| m.symbols().keys().cloned().collect::<Vec<_>>());
        prop_assert_eq!(names(&set), names(&copy));
    }

    /// Cyclic composites never trigger and resolution always terminates.
    #[test]
    fn cyclic_composites_never_trigger(present in vec(any::<bool>(), 2)) {
        let base = Metric::new("default")
            .with_symbol("A", 1.0)
            .with_symbol("B", 1.0)
            .with_symbol("C1", 1.0)
            .with_symbol("C2", 1.0);
        let mut metrics = BTreeMap::new();
        metrics.insert("default".to_string(), Arc::new(base));
        let mut set = ResultSet::new(&metrics);
        for (symbol, on) in ["A", "B"].iter().zip(&present) {
            if *on {
                set.insert(&Targets::All, symbol, 1.0, &[]);
            }
        }

        let resolver = CompositeResolver::new(vec![
            Composite::parse("C1", "C2 | A", Vec::new()).expect("parse"),
            Composite::parse("C2", "C1 | B", Vec::new()).expect("parse"),
        ]);
        prop_assert_eq!(resolver.resolve(&mut set), 0);
        let result = set.metric("default").expect("metric");
        prop_assert!(!result.contains("C1"));
        prop_assert!(!result.contains("C2"));
    }

    /// Composites that reach a cycle only through another member are still
    /// part of it and never trigger.
    #[test]
    fn tangled_cycles_never_trigger(
        present in vec(any::<bool>(), 3),
        extra in vec(any::<bool>(), 3),
    ) {
        let base = Metric::new("default")
            .with_symbol("C1", 1.0)
            .with_symbol("C2", 1.0)
            .with_symbol("C3", 1.0);
        let mut metrics = BTreeMap::new();
        metrics.insert("default".to_string(), Arc::new(base));
        let mut set = ResultSet::new(&metrics);
        for (symbol, on) in ["A", "B", "C"].iter().zip(&present) {
            if *on {
                set.insert(&Targets::All, symbol, 1.0, &[]);
            }
        }

        // Ring C1 -> C2 -> C3 -> C1 plus randomly chosen chords.
        let chords = ["C3", "C1", "C2"];
        let sources = ["C2 | A", "C3 | B", "C1 | C"];
        let composites: Vec<Composite> = sources
            .iter()
            .zip(chords.iter().zip(&extra))
            .enumerate()
            .map(|(i, (source, (chord, on)))| {
                let expression = if *on {
                    format!("({}) | !{}", source, chord)
                } else {
                    (*source).to_string()
                };
                Composite::parse(format!("C{}", i + 1), &expression, Vec::new()).expect("parse")
            })
            .collect();

        let resolver = CompositeResolver::new(composites);
        prop_assert_eq!(resolver.cycles().len(), 1);
        prop_assert!(resolver.order().is_empty());
        prop_assert_eq!(resolver.resolve(&mut set), 0);
        let result = set.metric("default").expect("metric");
        for name in ["C1", "C2", "C3"] {
            prop_assert!(resolver.is_skipped(name));
            prop_assert!(!result.contains(name));
        }
    }
}
