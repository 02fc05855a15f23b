// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid change ref: {0}")]
    InvalidChangeRef(String),

    #[error("Unknown job state: {0}")]
    UnknownState(String),

    #[error("Invalid filter pattern: {0}")]
    InvalidPattern(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
