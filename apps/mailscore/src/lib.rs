//! # mailscore
//!
//! Library half of the mailscore binary: configuration and message loading,
//! the bounded scan pool and the CLI commands. The scoring itself lives in
//! `mailscore-core`.

pub mod cli;
pub mod config;
pub mod scan;
