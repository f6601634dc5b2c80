//! Shared error taxonomy.

use thiserror::Error;

/// Errors produced by foundation types and shared plumbing.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An id string did not match the expected shape.
    #[error("invalid id: {0}")]
    InvalidId(String),

    /// JSON (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An event channel was closed while a producer was still active.
    #[error("event channel closed")]
    ChannelClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization_error_converts() {
        let bad = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: CoreError = bad.into();
        assert!(err.to_string().starts_with("serialization error"));
    }

    #[test]
    fn display_messages() {
        assert_eq!(
            CoreError::InvalidId("x".into()).to_string(),
            "invalid id: x"
        );
        assert_eq!(CoreError::ChannelClosed.to_string(), "event channel closed");
    }
}
