//! Error types for the SecureChat wire format.

use thiserror::Error;

/// Errors that can occur while encoding or decoding wire data.
#[derive(Debug, Error)]
pub enum WireError {
    /// JSON encoding of a chat event failed
    #[error("event serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// JSON decoding of a chat event failed
    #[error("event deserialization failed: {0}")]
    Deserialization(#[source] serde_json::Error),

    /// A relay frame too short to carry an id and a payload
    #[error("malformed frame: {len} bytes")]
    MalformedFrame {
        /// Length of the rejected frame
        len: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = WireError::MalformedFrame { len: 3 };
        assert_eq!(err.to_string(), "malformed frame: 3 bytes");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WireError>();
    }
}
