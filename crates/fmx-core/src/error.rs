//! Error types for FMX

use std::fmt::Display;
use thiserror::Error;

/// Core error type
///
/// Every failure inside the runtime is expressed with this type. The public
/// facade never lets it escape: it is logged and turned into an `Option`,
/// `bool` or sentinel value at the boundary.
#[derive(Error, Debug)]
pub enum FmxError {
    #[error("Engine call `{op}` failed for '{target}': {reason}")]
    Engine {
        op: &'static str,
        target: String,
        reason: String,
    },

    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    #[error("Event not found: {0}")]
    EventNotFound(String),

    #[error("Bus not found: {0}")]
    BusNotFound(String),

    #[error("Bank not found: {0}")]
    BankNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl FmxError {
    /// Build an engine-call failure with operation name and bus/event identity
    pub fn engine(op: &'static str, target: impl Display, reason: impl Display) -> Self {
        Self::Engine {
            op,
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }

    /// True for errors caused by a stale or disposed handle
    pub fn is_invalid_handle(&self) -> bool {
        matches!(self, Self::InvalidHandle(_))
    }
}

/// Result type alias
pub type FmxResult<T> = Result<T, FmxError>;
