//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Group::register(run, interrupt) × N        (Idle)
//!     → Group::run: spawn every run           (Running)
//!     → first run returns
//!     → every interrupt(first error)          (Draining)
//!     → join remaining runs, log their errors
//!     → first result                          (Done)
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → signal actor returns → group drains
//! ```
//!
//! # Design Decisions
//! - Runs are isolated tasks; a panic is caught and treated as a failure
//! - Interrupt is a broadcast: the actor that returned is interrupted too
//! - No per-actor deadline; a slow actor delays the group's return

pub mod group;
pub mod signals;

pub use group::{ActorError, Group, GroupError};
pub use signals::{register_signal_handler, SignalError};
