// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the capture-and-archive pipeline
//!
//! Per-frame failures are recovered where they happen (logged, counted, the
//! session continues); everything else surfaces as a [`CaptureError`].

use std::fmt;

/// Result type alias using CaptureError
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Pipeline error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// File or archive could not be opened, read or written
    Io(String),
    /// Manifest entry missing, or manifest/timestamps/payload unparsable
    Format(String),
    /// Empty or malformed frame, unsupported stream layout, unreachable target
    Data(String),
    /// Working directory or worker pool could not be created
    Resource(String),
    /// Configuration file could not be loaded or stored
    Config(String),
}

impl CaptureError {
    /// Short category label used in event messages
    pub fn category(&self) -> &'static str {
        match self {
            CaptureError::Io(_) => "I/O",
            CaptureError::Format(_) => "format",
            CaptureError::Data(_) => "data",
            CaptureError::Resource(_) => "resource",
            CaptureError::Config(_) => "config",
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::Io(msg) => write!(f, "I/O error: {}", msg),
            CaptureError::Format(msg) => write!(f, "Format error: {}", msg),
            CaptureError::Data(msg) => write!(f, "Data error: {}", msg),
            CaptureError::Resource(msg) => write!(f, "Resource error: {}", msg),
            CaptureError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for CaptureError {}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::Io(err.to_string())
    }
}

impl From<zip::result::ZipError> for CaptureError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => CaptureError::Io(e.to_string()),
            other => CaptureError::Format(other.to_string()),
        }
    }
}

impl From<serde_yaml::Error> for CaptureError {
    fn from(err: serde_yaml::Error) -> Self {
        CaptureError::Format(format!("manifest: {}", err))
    }
}

impl From<serde_json::Error> for CaptureError {
    fn from(err: serde_json::Error) -> Self {
        CaptureError::Config(err.to_string())
    }
}

impl From<image::ImageError> for CaptureError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(e) => CaptureError::Io(e.to_string()),
            other => CaptureError::Format(other.to_string()),
        }
    }
}

impl From<las::Error> for CaptureError {
    fn from(err: las::Error) -> Self {
        CaptureError::Io(format!("LAS: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let err: CaptureError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, CaptureError::Io(_)));
        assert_eq!(err.category(), "I/O");
    }

    #[test]
    fn test_missing_zip_entry_is_format_error() {
        let err: CaptureError = zip::result::ZipError::FileNotFound.into();
        assert!(matches!(err, CaptureError::Format(_)));
    }

    #[test]
    fn test_display_contains_message() {
        let err = CaptureError::Data("empty frame".to_string());
        assert_eq!(err.to_string(), "Data error: empty frame");
    }
}
