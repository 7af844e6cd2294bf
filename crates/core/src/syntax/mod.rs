//! Go source model: tokenizer, parser and the per-file unit.

pub mod parser;
pub mod token;
pub mod unit;

pub use unit::*;
