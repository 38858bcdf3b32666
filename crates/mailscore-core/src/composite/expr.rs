//! # Composite Expressions
//!
//! Boolean/arithmetic combinations of symbol presence and weight.
//!
//! ```text
//! expr    := and ('|' and)*
//! and     := unary ('&' unary)*
//! unary   := '!' unary | primary
//! primary := '(' expr ')' | term
//! term    := NAME ('+' NAME)* (CMP NUMBER)?
//! CMP     := '>' | '>=' | '<' | '<='
//! ```
//!
//! A bare `NAME` is true when the symbol is present. A comparison sums the
//! weights of the listed symbols that are present; when none is present the
//! comparison is false.

use crate::primitives::MAX_EXPRESSION_DEPTH;
use std::collections::BTreeSet;

/// Comparison operator of a weight term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Gt,
    Ge,
    Lt,
    Le,
}

impl CmpOp {
    #[must_use]
    pub fn compare(self, left: f64, right: f64) -> bool {
        match self {
            CmpOp::Gt => left > right,
            CmpOp::Ge => left >= right,
            CmpOp::Lt => left < right,
            CmpOp::Le => left <= right,
        }
    }
}

/// Parsed composite expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Symbol(String),
    Weight {
        symbols: Vec<String>,
        op: CmpOp,
        threshold: f64,
    },
    Not(Box<Expr>),
    All(Vec<Expr>),
    Any(Vec<Expr>),
}

impl Expr {
    /// Parse an expression source string.
    pub fn parse(source: &str) -> Result<Self, String> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err("empty expression".to_string());
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.parse_or()?;
        match parser.peek() {
            None => Ok(expr),
            Some(token) => Err(format!("unexpected {:?} at token {}", token, parser.pos)),
        }
    }

    /// Evaluate against a weight lookup (`None` = symbol absent).
    pub fn eval<F>(&self, lookup: &F) -> bool
    where
        F: Fn(&str) -> Option<f64>,
    {
        match self {
            Expr::Symbol(name) => lookup(name).is_some(),
            Expr::Weight {
                symbols,
                op,
                threshold,
            } => {
                let weights: Vec<f64> = symbols.iter().filter_map(|s| lookup(s)).collect();
                !weights.is_empty() && op.compare(weights.iter().sum(), *threshold)
            }
            Expr::Not(inner) => !inner.eval(lookup),
            Expr::All(items) => items.iter().all(|e| e.eval(lookup)),
            Expr::Any(items) => items.iter().any(|e| e.eval(lookup)),
        }
    }

    /// Every symbol name the expression references.
    #[must_use]
    pub fn symbols(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect(&mut out);
        out
    }

    fn collect<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Expr::Symbol(name) => {
                out.insert(name);
            }
            Expr::Weight { symbols, .. } => out.extend(symbols.iter().map(String::as_str)),
            Expr::Not(inner) => inner.collect(out),
            Expr::All(items) | Expr::Any(items) => items.iter().for_each(|e| e.collect(out)),
        }
    }
}

// =============================================================================
// TOKENIZER
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Name(String),
    Number(f64),
    And,
    Or,
    Not,
    Plus,
    Open,
    Close,
    Cmp(CmpOp),
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '&' => {
                tokens.push(Token::And);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Or);
                i += 1;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            '>' | '<' => {
                let or_equal = chars.get(i + 1) == Some(&'=');
                let op = match (c, or_equal) {
                    ('>', true) => CmpOp::Ge,
                    ('>', false) => CmpOp::Gt,
                    ('<', true) => CmpOp::Le,
                    _ => CmpOp::Lt,
                };
                tokens.push(Token::Cmp(op));
                i += if or_equal { 2 } else { 1 };
            }
            c if c.is_ascii_digit() || c == '-' || c == '.' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{}'", text))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                tokens.push(Token::Name(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }

    Ok(tokens)
}

// =============================================================================
// PARSER
// =============================================================================

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Open `(` and `!` levels; bounds recursion in parse, eval and collect.
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn descend(&mut self) -> Result<(), String> {
        self.depth += 1;
        if self.depth > MAX_EXPRESSION_DEPTH {
            return Err(format!("nesting deeper than {}", MAX_EXPRESSION_DEPTH));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut items = vec![self.parse_and()?];
        while self.eat(&Token::Or) {
            items.push(self.parse_and()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Expr::Any(items)
        })
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut items = vec![self.parse_unary()?];
        while self.eat(&Token::And) {
            items.push(self.parse_unary()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Expr::All(items)
        })
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        if self.eat(&Token::Not) {
            self.descend()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        if self.eat(&Token::Open) {
            self.descend()?;
            let inner = self.parse_or()?;
            if !self.eat(&Token::Close) {
                return Err("missing ')'".to_string());
            }
            self.depth -= 1;
            return Ok(inner);
        }
        self.parse_term()
    }

    fn parse_term(&mut self) -> Result<Expr, String> {
        let mut symbols = vec![self.expect_name()?];
        while self.eat(&Token::Plus) {
            symbols.push(self.expect_name()?);
        }

        if let Some(Token::Cmp(op)) = self.peek().cloned() {
            self.pos += 1;
            let threshold = match self.next() {
                Some(Token::Number(value)) => value,
                other => return Err(format!("expected number after comparison, got {:?}", other)),
            };
            return Ok(Expr::Weight {
                symbols,
                op,
                threshold,
            });
        }

        if symbols.len() > 1 {
            return Err("weight sum requires a comparison".to_string());
        }
        Ok(Expr::Symbol(symbols.remove(0)))
    }

    fn expect_name(&mut self) -> Result<String, String> {
        match self.next() {
            Some(Token::Name(name)) => Ok(name),
            Some(other) => Err(format!("expected symbol name, got {:?}", other)),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn lookup(present: &[(&str, f64)]) -> impl Fn(&str) -> Option<f64> {
        let map: BTreeMap<String, f64> =
            present.iter().map(|(k, v)| ((*k).to_string(), *v)).collect();
        move |name| map.get(name).copied()
    }

    #[test]
    fn parses_precedence() {
        let expr = Expr::parse("A | B & !C").expect("parse");
        assert_eq!(
            expr,
            Expr::Any(vec![
                Expr::Symbol("A".into()),
                Expr::All(vec![
                    Expr::Symbol("B".into()),
                    Expr::Not(Box::new(Expr::Symbol("C".into()))),
                ]),
            ])
        );
    }

    #[test]
    fn evaluates_presence() {
        let expr = Expr::parse("R_SPF_FAIL & !R_SPF_ALLOW").expect("parse");
        assert!(expr.eval(&lookup(&[("R_SPF_FAIL", 1.0)])));
        assert!(!expr.eval(&lookup(&[("R_SPF_FAIL", 1.0), ("R_SPF_ALLOW", 1.0)])));
        assert!(!expr.eval(&lookup(&[])));
    }

    #[test]
    fn evaluates_weight_sums() {
        let expr = Expr::parse("A + B >= 3.5").expect("parse");
        assert!(expr.eval(&lookup(&[("A", 2.0), ("B", 1.5)])));
        assert!(!expr.eval(&lookup(&[("A", 2.0)])));
        assert!(!expr.eval(&lookup(&[])));

        let negative = Expr::parse("A < -1").expect("parse");
        assert!(negative.eval(&lookup(&[("A", -2.0)])));
        assert!(!negative.eval(&lookup(&[])));
    }

    #[test]
    fn parentheses_group() {
        let expr = Expr::parse("(A | B) & C").expect("parse");
        assert!(expr.eval(&lookup(&[("B", 1.0), ("C", 1.0)])));
        assert!(!expr.eval(&lookup(&[("A", 1.0)])));
    }

    #[test]
    fn collects_symbols() {
        let expr = Expr::parse("(A | B) & !C & D + E > 1").expect("parse");
        let symbols: Vec<&str> = expr.symbols().into_iter().collect();
        assert_eq!(symbols, vec!["A", "B", "C", "D", "E"]);
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(Expr::parse("").is_err());
        assert!(Expr::parse("A &").is_err());
        assert!(Expr::parse("(A | B").is_err());
        assert!(Expr::parse("A + B").is_err());
        assert!(Expr::parse("A > B").is_err());
        assert!(Expr::parse("A $ B").is_err());
        assert!(Expr::parse("A B").is_err());
    }

    #[test]
    fn nesting_depth_is_bounded() {
        let at_limit = format!(
            "{}A{}",
            "(".repeat(MAX_EXPRESSION_DEPTH),
            ")".repeat(MAX_EXPRESSION_DEPTH)
        );
        assert!(Expr::parse(&at_limit).is_ok());

        let too_deep = format!(
            "{}A{}",
            "(".repeat(MAX_EXPRESSION_DEPTH + 1),
            ")".repeat(MAX_EXPRESSION_DEPTH + 1)
        );
        let err = Expr::parse(&too_deep).expect_err("too deep");
        assert!(err.contains("nesting"));

        let negations = format!("{}A", "!".repeat(MAX_EXPRESSION_DEPTH + 1));
        assert!(Expr::parse(&negations).is_err());
    }

    #[test]
    fn deep_nesting_fails_on_a_small_stack() {
        // 4 KiB of parentheses, under the length limit, on a worker-sized stack.
        let source = format!("{}A{}", "(".repeat(2000), ")".repeat(2000));
        let handle = std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(move || Expr::parse(&source).is_err())
            .expect("spawn");
        assert!(handle.join().expect("join"));
    }
}
