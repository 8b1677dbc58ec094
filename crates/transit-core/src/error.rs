//! Codec errors.

/// A value could not be represented by the wire codec.
#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    #[error("failed to encode value: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected a map at the top level, got {0}")]
    NotAMap(&'static str),
    #[error("{0}")]
    Unsupported(String),
}

/// Received bytes could not be decoded into a payload.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// An `error` field carried inside a payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct PayloadError(pub String);
