//! Engine result codes

use thiserror::Error;

/// Non-OK result of an engine call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("invalid handle")]
    InvalidHandle,

    #[error("event not found")]
    EventNotFound,

    #[error("bus not found")]
    BusNotFound,

    #[error("bank not found")]
    BankNotFound,

    #[error("bank already loaded")]
    BankAlreadyLoaded,

    #[error("parameter not found")]
    ParameterNotFound,

    #[error("internal engine error: {0}")]
    Internal(String),
}

/// Result type alias
pub type EngineResult<T> = Result<T, EngineError>;
