//! Target resolution
//!
//! Decides which button an account clicks for a matched action.

pub mod config;
pub mod resolver;

pub use config::TargetConfig;
pub use resolver::{
    PendingPair, TwoStepPlan, find_candidate, resolve, resolve_two_step, select_fixed,
    select_yes_no,
};
