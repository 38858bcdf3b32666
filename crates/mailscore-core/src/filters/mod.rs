//! # Bundled Filters
//!
//! - [`spf`]: sender policy check, the reference asynchronous filter
//! - [`rules`]: header substring rules, run as scripted filters

pub mod rules;
pub mod spf;
