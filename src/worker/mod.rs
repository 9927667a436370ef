//! Account workers
//!
//! Each running account has exactly one worker task that owns its run
//! context. The [`Coordinator`] starts, stops and feeds workers and keeps the
//! observable [`AccountReport`] of every account.

pub mod coordinator;
pub mod runner;
pub mod status;

pub use coordinator::{Coordinator, CoordinatorOptions};
pub use runner::WorkerExit;
pub use status::{AccountId, AccountReport, AccountStatus};
