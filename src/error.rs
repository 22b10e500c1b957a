//! Error types for dispatching and action binding.

use crate::dispatcher::DispatchToken;
use thiserror::Error;

/// Errors raised by the dispatcher and by store configuration.
#[derive(Debug, Error)]
pub enum FluxError {
    /// `dispatch` was called from inside a handler.
    #[error("cannot dispatch `{action_type}` in the middle of a dispatch")]
    AlreadyDispatching { action_type: String },

    /// `wait_for` was called while no dispatch was running.
    #[error("wait_for must be invoked while dispatching")]
    NotDispatching,

    /// A handler waited on a handler that is still running.
    #[error("circular dependency detected while waiting for {0}")]
    CircularDependency(DispatchToken),

    /// The token does not belong to a registered handler.
    #[error("{0} does not map to a registered handler")]
    UnknownToken(DispatchToken),

    /// An action was bound to a method the store does not define.
    #[error("action `{action_type}` is bound to undefined method `{method}`")]
    UnknownMethod { action_type: String, method: String },

    /// Prefixes must be non-empty and must not contain `.`.
    #[error("invalid action prefix: {0:?}")]
    InvalidPrefix(String),

    /// The binding spec could not be parsed.
    #[error("invalid binding spec: {0}")]
    InvalidSpec(#[from] serde_json::Error),
}

/// Convenience type alias for dispatcher and store operations.
pub type Result<T> = std::result::Result<T, FluxError>;
