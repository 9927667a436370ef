//! `phasekeeper` - phase detection and action targeting for chat games
//!
//! Classifies moderator messages into game phases and actions, resolves
//! who to act on, and runs many accounts concurrently with per-account
//! failure isolation. Chat connectivity is a collaborator behind the
//! [`transport::Transport`] trait.

pub mod cli;
pub mod config;
pub mod detection;
pub mod engine;
pub mod error;
pub mod join;
pub mod observability;
pub mod phase;
pub mod targeting;
pub mod transport;
pub mod worker;
