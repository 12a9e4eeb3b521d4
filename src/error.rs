use thiserror::Error;

use crate::operations::DisabledReason;

/// Errors surfaced on pair streams and document operations.
///
/// `Clone` because a single upstream error is fanned out to every
/// subscriber of a shared pair stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PairError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Checkout of {id} failed: {reason}")]
    Checkout { id: String, reason: String },

    #[error("Commit of {id} failed: {reason}")]
    CommitFailed { id: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation {operation} is disabled: {reason}")]
    OperationDisabled {
        operation: &'static str,
        reason: DisabledReason,
    },
}
