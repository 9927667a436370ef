//! Message classification
//!
//! Compiles user-authored patterns and finds the winning match for a message.

pub mod catalog;
pub mod matcher;

pub use catalog::{ActionTrigger, BanWarning, PatternCatalog, PatternLabel, Step};
pub use matcher::{
    CompileWarning, MatchSpan, MatcherLimits, Pattern, PatternMatch, PatternSet, compile_text,
};
