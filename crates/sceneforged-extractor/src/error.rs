//! Error types for sceneforged-extractor.

use std::io;
use thiserror::Error;

/// Result type for sceneforged-extractor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for sceneforged-extractor operations.
#[derive(Debug, Error)]
pub enum Error {
    /// None of the candidate sniffers accepted the stream prefix.
    #[error("None of the available formats ({}) could read the stream", .candidates.join(", "))]
    UnrecognizedInputFormat { candidates: Vec<&'static str> },

    /// The requested format name is not registered.
    #[error("Unknown format: {0}")]
    UnknownFormat(String),

    /// A recognised parameter was given a value of the wrong type or domain.
    #[error("Invalid value for parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Malformed or inconsistent container content.
    #[error("Malformed container: {0}")]
    Parsing(String),

    /// I/O error reported by the input.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The session cannot perform the requested operation in its current phase.
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),
}

impl Error {
    /// Create a parsing error.
    pub fn parsing(msg: impl Into<String>) -> Self {
        Self::Parsing(msg.into())
    }

    /// Create an invalid parameter error.
    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// True for errors raised by the input rather than by the parser.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    /// True when the session is still usable after this error.
    ///
    /// I/O failures leave the extractor untouched so `advance` may be retried,
    /// and a rejected parameter never affects the session.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::InvalidParameter { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrecognized_lists_candidates() {
        let err = Error::UnrecognizedInputFormat {
            candidates: vec!["ogg", "mp3"],
        };
        assert_eq!(
            err.to_string(),
            "None of the available formats (ogg, mp3) could read the stream"
        );
        assert!(!err.is_io());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_io_is_recoverable() {
        let err: Error = io::Error::new(io::ErrorKind::TimedOut, "slow").into();
        assert!(err.is_io());
        assert!(err.is_recoverable());
        assert!(!Error::parsing("bad box").is_recoverable());
    }
}
