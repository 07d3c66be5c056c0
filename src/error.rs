//! Error handling for qatprep

use thiserror::Error;

/// Result type alias for qatprep operations
pub type Result<T> = std::result::Result<T, QatError>;

/// Errors raised by the layer tree, the quantization config and its factories.
///
/// The rewriter in [`crate::quantization::qat`] adds no variants of its own;
/// everything here originates in a collaborator and is propagated unchanged.
#[derive(Error, Debug)]
pub enum QatError {
    #[error("Layer of kind `{kind}` cannot be deep-copied")]
    NotCloneable { kind: String },

    #[error("No QAT layer mapping registered for kind `{kind}`")]
    MissingQatMapping { kind: String },

    #[error("No quantization config bound to layer `{path}`")]
    MissingLayerConfig { path: String },

    #[error("Layer `{path}` has no activation quanter configured")]
    MissingActivationQuanter { path: String },

    #[error("Expected layer of kind `{expected}`, found `{found}`")]
    LayerMismatch { expected: String, found: String },

    #[error("Layer of kind `{kind}` has no child named `{name}`")]
    UnknownChild { kind: String, name: String },

    #[error("Child `{name}` of `{parent}` is not a valid path segment")]
    InvalidChildName { parent: String, name: String },

    #[error("Unknown layer kind: {kind}")]
    UnknownLayerKind { kind: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = QatError::MissingQatMapping {
            kind: "conv2d".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "No QAT layer mapping registered for kind `conv2d`"
        );

        let err = QatError::LayerMismatch {
            expected: "linear".to_string(),
            found: "relu".to_string(),
        };
        assert!(err.to_string().contains("linear"));
        assert!(err.to_string().contains("relu"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: QatError = io.into();
        assert!(matches!(err, QatError::Io(_)));
    }
}
