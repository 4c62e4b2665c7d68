//! Client error types

use thiserror::Error;

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// Device service request failed
    #[error("Device service error: {0}")]
    Http(#[from] reqwest::Error),

    /// Device service answered with a non-success status
    #[error("Device service returned {0}")]
    Status(u16),
}

pub type Result<T> = std::result::Result<T, ClientError>;
