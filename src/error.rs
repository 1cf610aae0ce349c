//! Error types for the bridge

use thiserror::Error;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors raised while encoding, decoding or streaming a generation
#[derive(Error, Debug)]
pub enum BridgeError {
    /// First decoded sample was NaN; the frame must be skipped
    #[error("Corrupt frame: decoded sample is NaN")]
    CorruptFrame,

    /// No preview projection exists for this family/channel combination
    #[error("Unsupported preview: {channels} latent channels for {family}")]
    UnsupportedPreview { family: String, channels: u32 },

    /// Buffer shorter than the header or the payload it declares
    #[error("Truncated tensor: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },

    /// Header carries a flag this codec cannot interpret
    #[error("Invalid tensor header: {0}")]
    InvalidHeader(String),

    /// Compressed payload could not be (de)compressed
    #[error("Compressed payload error: {0}")]
    Decompress(String),

    /// Host buffer could not be resized or cropped
    #[error("Image conversion failed: {0}")]
    Image(String),

    /// The engine finished without producing any image
    #[error("The engine returned no images")]
    EmptyResultStream,

    /// Every produced image failed to decode
    #[error("There was an error converting the response images")]
    EmptyDecodedImages,

    /// The engine could not be reached
    #[error("Couldn't connect to the generation engine: {0}")]
    EngineUnavailable(String),

    /// The user cancelled the generation
    #[error("Generation cancelled")]
    Cancelled,

    /// Any other transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Settings could not be parsed
    #[error("Invalid settings: {0}")]
    Settings(String),

    /// Metadata descriptors could not be serialized
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Errors that only invalidate the current frame, never the request
    pub fn is_frame_local(&self) -> bool {
        matches!(
            self,
            BridgeError::CorruptFrame
                | BridgeError::UnsupportedPreview { .. }
                | BridgeError::Truncated { .. }
                | BridgeError::InvalidHeader(_)
                | BridgeError::Decompress(_)
        )
    }
}

/// Failures reported by the transport collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("rpc failed: {0}")]
    Status(String),
}

impl From<TransportError> for BridgeError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unavailable(msg) => BridgeError::EngineUnavailable(msg),
            TransportError::Status(msg) => BridgeError::Transport(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_local_classification() {
        assert!(BridgeError::CorruptFrame.is_frame_local());
        assert!(BridgeError::UnsupportedPreview {
            family: "kandinsky2.1".into(),
            channels: 4
        }
        .is_frame_local());
        assert!(!BridgeError::Cancelled.is_frame_local());
        assert!(!BridgeError::EmptyResultStream.is_frame_local());
    }

    #[test]
    fn test_transport_mapping() {
        let err: BridgeError = TransportError::Unavailable("connection refused".into()).into();
        assert!(matches!(err, BridgeError::EngineUnavailable(_)));
        let err: BridgeError = TransportError::Status("internal".into()).into();
        assert!(matches!(err, BridgeError::Transport(_)));
    }
}
