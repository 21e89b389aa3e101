//! Error types for DeRec nodes

use derec_engine::CryptoError;
use thiserror::Error;

/// Result type alias for node operations
pub type Result<T> = std::result::Result<T, NodeError>;

/// Errors that can occur in a node
#[derive(Debug, Error)]
pub enum NodeError {
    /// Core library error
    #[error("Core error: {0}")]
    Core(#[from] derec_core::Error),

    /// Secret-sharing engine failure
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// A message referenced an unknown secret or an absent share
    ///
    /// Inbound handlers log violations and answer where the protocol has a
    /// negative response; they never return this variant.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// A user action was attempted without its precondition
    #[error("Precondition not met: {0}")]
    PreconditionNotMet(String),

    /// Message bus error
    #[error("Bus error: {0}")]
    Bus(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The node task has shut down
    #[error("Node stopped")]
    Stopped,
}

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        NodeError::Serialization(e.to_string())
    }
}
