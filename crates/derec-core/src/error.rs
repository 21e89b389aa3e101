//! Error types for the DeRec core library

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building or decoding protocol values
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid helper id: {0} (expected 1..={max})", max = crate::MAX_HELPERS)]
    InvalidHelperId(u64),

    #[error("Invalid participant address: {0}")]
    InvalidParticipant(String),

    #[error("Invalid channel id: {0}")]
    InvalidChannelId(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<base64::DecodeError> for Error {
    fn from(e: base64::DecodeError) -> Self {
        Error::Encoding(e.to_string())
    }
}
