//! Phase state machine
//!
//! Tracks which stage of the game an account believes it is in and decides
//! whether a phase marker moves it.

pub mod state;
pub mod transitions;

pub use state::{Phase, PhaseMachine, PhaseOutcome};
pub use transitions::TransitionTable;
