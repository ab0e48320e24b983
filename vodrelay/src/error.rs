//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
///
/// Job-level failures (everything a worker can hit while driving one
/// job) are caught at the worker loop boundary, reported to the
/// requester, and never unwind the pool.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Toolchain error in {stage} stage: {detail}")]
    Toolchain { stage: String, detail: String },

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Delivery capability error: {0}")]
    DeliveryCapability(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    pub fn toolchain(stage: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Toolchain {
            stage: stage.into(),
            detail: detail.into(),
        }
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
