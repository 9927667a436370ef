//! Per-account decision engine
//!
//! Composes pattern matching, the phase machine, the join policy and target
//! resolution into one synchronous step per message. The engine decides what
//! to send; the worker sends it.

pub mod context;
pub mod outcome;
pub mod snapshot;

pub use context::AccountRunContext;
pub use outcome::{ActionDecision, JoinOutcome, Outcome};
pub use snapshot::{
    AccountSnapshot, DelayRange, JoinAffordance, ResolvedAction, ResolvedButton, SharedState,
};
