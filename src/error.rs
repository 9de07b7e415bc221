//! Aggregate error type for the Porthouse binaries.
//!
//! Library code returns the per-subsystem error enums defined in each
//! module (`BrokerError`, `RpcError`, `SchedulerError`, ...); this type
//! exists only at the edges (CLI, launcher worker) where those errors need
//! a single `?`-friendly return type.

use thiserror::Error;

use crate::broker::BrokerError;
use crate::config::ConfigError;
use crate::launcher::LauncherError;
use crate::pass_prediction::PredictError;
use crate::rotator::RotatorError;
use crate::router::RouterError;
use crate::rpc::RpcError;
use crate::scheduler::SchedulerError;
use crate::storage::StorageError;

/// Top-level error for Porthouse binaries and RPC handler wrappers.
#[derive(Error, Debug)]
pub enum PorthouseError {
    /// Configuration directory or file is invalid or missing.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Broker connection or channel operation failed.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// RPC request failed (timeout or remote error).
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// Launch specification was invalid or a worker failed to start.
    #[error(transparent)]
    Launcher(#[from] LauncherError),

    /// Pass prediction could not complete.
    #[error(transparent)]
    PassPrediction(#[from] PredictError),

    /// Schedule model invariant violation (overlap, invalid task).
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// Rotator safety or hardware error.
    #[error(transparent)]
    Rotator(#[from] RotatorError),

    /// Packet router graph error.
    #[error(transparent)]
    Router(#[from] RouterError),

    /// Persistence (deleted-task archive, packet store) operation failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// An unhandled exception surfaced by a module's RPC handler.
    ///
    /// Mirrors the Python original's `{error: "Unhandled exception <repr>"}`
    /// wrapper (spec §4.B): any handler panic-free error that doesn't fit
    /// the taxonomy above is still reported to the caller, never silently
    /// dropped.
    #[error("unhandled exception: {0}")]
    Unhandled(String),
}
