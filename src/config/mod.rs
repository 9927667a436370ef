//! Configuration
//!
//! Loads and validates the YAML run configuration: moderators, patterns,
//! actions, join rules and accounts.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{ConfigLimits, ConfigLoader, LoadResult, LoadWarning};
pub use schema::*;
pub use validation::{ValidationResult, Validator};
