//! Error types for the executor.
//!
//! Every failure that can reach a caller is reported by its wire name. The
//! standard names form a closed set; anything else must be declared by the
//! function's contract or it is coerced to `InternalError` before it leaves
//! the pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Standard wire error names.
pub mod names {
    pub const INVALID_REQUEST: &str = "InvalidRequest";
    pub const UNKNOWN_INTERFACE: &str = "UnknownInterface";
    pub const NOT_SUPPORTED_VERSION: &str = "NotSupportedVersion";
    pub const SECURITY_ERROR: &str = "SecurityError";
    pub const INTERNAL_ERROR: &str = "InternalError";
    pub const NOT_IMPLEMENTED: &str = "NotImplemented";

    /// The closed standard taxonomy.
    pub const STANDARD: [&str; 6] = [
        INVALID_REQUEST,
        UNKNOWN_INTERFACE,
        NOT_SUPPORTED_VERSION,
        SECURITY_ERROR,
        INTERNAL_ERROR,
        NOT_IMPLEMENTED,
    ];
}

/// Main error type for the executor.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("InvalidRequest: {0}")]
    InvalidRequest(String),

    #[error("UnknownInterface: {0}")]
    UnknownInterface(String),

    #[error("NotSupportedVersion: {0}")]
    NotSupportedVersion(String),

    #[error("SecurityError: {0}")]
    SecurityError(String),

    #[error("InternalError: {0}")]
    InternalError(String),

    #[error("NotImplemented: {0}")]
    NotImplemented(String),

    /// Error raised by an implementation under a non-standard name.
    ///
    /// Delivered verbatim only when the function's contract declares it.
    #[error("{name}: {info}")]
    Custom { name: String, info: String },

    // Collaborator failures, reported on the wire as InternalError
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },
}

/// Result type alias for executor operations.
pub type Result<T> = std::result::Result<T, ExecError>;

impl From<std::io::Error> for ExecError {
    fn from(err: std::io::Error) -> Self {
        ExecError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ExecError {
    fn from(err: serde_json::Error) -> Self {
        ExecError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl ExecError {
    /// Build an error from a wire name.
    ///
    /// Standard names map onto their own variant, everything else becomes
    /// [`ExecError::Custom`].
    pub fn raise(name: impl Into<String>, info: impl Into<String>) -> Self {
        let name = name.into();
        let info = info.into();
        match name.as_str() {
            names::INVALID_REQUEST => ExecError::InvalidRequest(info),
            names::UNKNOWN_INTERFACE => ExecError::UnknownInterface(info),
            names::NOT_SUPPORTED_VERSION => ExecError::NotSupportedVersion(info),
            names::SECURITY_ERROR => ExecError::SecurityError(info),
            names::INTERNAL_ERROR => ExecError::InternalError(info),
            names::NOT_IMPLEMENTED => ExecError::NotImplemented(info),
            _ => ExecError::Custom { name, info },
        }
    }

    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ExecError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Wire name of this error.
    pub fn name(&self) -> &str {
        match self {
            ExecError::InvalidRequest(_) => names::INVALID_REQUEST,
            ExecError::UnknownInterface(_) => names::UNKNOWN_INTERFACE,
            ExecError::NotSupportedVersion(_) => names::NOT_SUPPORTED_VERSION,
            ExecError::SecurityError(_) => names::SECURITY_ERROR,
            ExecError::NotImplemented(_) => names::NOT_IMPLEMENTED,
            ExecError::Custom { name, .. } => name,
            ExecError::InternalError(_) | ExecError::Io { .. } | ExecError::Json { .. } => {
                names::INTERNAL_ERROR
            }
        }
    }

    /// Human-readable detail, never sent to the caller.
    pub fn info(&self) -> String {
        match self {
            ExecError::InvalidRequest(info)
            | ExecError::UnknownInterface(info)
            | ExecError::NotSupportedVersion(info)
            | ExecError::SecurityError(info)
            | ExecError::InternalError(info)
            | ExecError::NotImplemented(info) => info.clone(),
            ExecError::Custom { info, .. } => info.clone(),
            ExecError::Io { .. } | ExecError::Json { .. } => self.to_string(),
        }
    }

    /// Whether the wire name belongs to the standard taxonomy.
    pub fn is_standard(&self) -> bool {
        names::STANDARD.contains(&self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ExecError::InvalidRequest("Missing parameter: a".into());
        assert_eq!(err.to_string(), "InvalidRequest: Missing parameter: a");
    }

    #[test]
    fn test_raise_maps_standard_names() {
        assert!(matches!(
            ExecError::raise("SecurityError", "x"),
            ExecError::SecurityError(_)
        ));
        assert!(matches!(
            ExecError::raise("NotImplemented", ""),
            ExecError::NotImplemented(_)
        ));

        let custom = ExecError::raise("MyError", "boom");
        assert_eq!(custom.name(), "MyError");
        assert_eq!(custom.info(), "boom");
        assert!(!custom.is_standard());
    }

    #[test]
    fn test_collaborator_errors_are_internal() {
        let io: ExecError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(io.name(), "InternalError");
        assert!(io.is_standard());

        let json: ExecError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert_eq!(json.name(), "InternalError");
    }
}
