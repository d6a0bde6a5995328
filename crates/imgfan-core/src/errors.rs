//! Error types for the upload core.
//!
//! These errors are designed to be serializable across FFI boundaries
//! (Tauri, CLI, etc.) without depending on non-serializable types like
//! `std::io::Error`. For I/O errors we capture the kind and message as
//! strings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::ServiceId;

/// Per-service error produced by an upload adapter.
///
/// A failure in one adapter never aborts its siblings; the fan-out
/// uploader converts every adapter failure into one of these and keeps
/// going.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UploadError {
    /// Network/HTTP error while talking to the backend.
    #[error("Network error: {message}")]
    Network {
        /// Detailed error message.
        message: String,
        /// HTTP status code if available.
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
    },

    /// Credential is expired or invalid.
    #[error("Authentication failed for {service}: {message}")]
    Auth {
        /// Service the credential belongs to.
        service: ServiceId,
        /// Detailed error message.
        message: String,
    },

    /// I/O error while reading the local file.
    #[error("I/O error ({kind}): {message}")]
    FileIo {
        /// The kind of I/O error (e.g., "NotFound", "PermissionDenied").
        kind: String,
        /// Detailed error message.
        message: String,
    },

    /// The backend rejected the upload or is temporarily down.
    #[error("Service {service} unavailable: {message}")]
    ServiceUnavailable {
        /// The affected service.
        service: ServiceId,
        /// Detailed error message.
        message: String,
    },

    /// The request was invalid before it ever left the machine.
    #[error("Validation error: {message}")]
    Validation {
        /// What was wrong with the input.
        message: String,
    },

    /// The upload was cancelled cooperatively.
    #[error("Upload cancelled")]
    Cancelled,

    /// General/uncategorized adapter error.
    #[error("{message}")]
    Other {
        /// Error message.
        message: String,
    },
}

impl UploadError {
    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            status_code: None,
        }
    }

    /// Create a network error with HTTP status code.
    pub fn network_with_status(message: impl Into<String>, status_code: u16) -> Self {
        Self::Network {
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    /// Create an authentication error.
    pub fn auth(service: ServiceId, message: impl Into<String>) -> Self {
        Self::Auth {
            service,
            message: message.into(),
        }
    }

    /// Create an I/O error from a `std::io::Error`.
    #[must_use]
    pub fn from_io_error(err: &std::io::Error) -> Self {
        Self::FileIo {
            kind: format!("{:?}", err.kind()),
            message: err.to_string(),
        }
    }

    /// Create a service unavailable error.
    pub fn unavailable(service: ServiceId, message: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            service,
            message: message.into(),
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a generic error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Check if retrying this failure can plausibly succeed.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::ServiceUnavailable { .. } | Self::FileIo { .. }
        )
    }

    /// Check if this is a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Errors of the local persistence layer.
///
/// Narrower than [`AppError`]: every variant retains the originating
/// low-level error text so a failed read/write stays diagnosable.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageError {
    /// Reading persisted state failed.
    #[error("Storage read failed: {0}")]
    Read(String),

    /// Writing persisted state failed. Never silently downgraded.
    #[error("Storage write failed: {0}")]
    Write(String),

    /// Clearing persisted state failed.
    #[error("Storage clear failed: {0}")]
    Clear(String),

    /// Opening or migrating the storage backend failed.
    #[error("Storage init failed: {0}")]
    Init(String),
}

impl StorageError {
    /// Create a read error.
    pub fn read(err: impl ToString) -> Self {
        Self::Read(err.to_string())
    }

    /// Create a write error.
    pub fn write(err: impl ToString) -> Self {
        Self::Write(err.to_string())
    }

    /// Create a clear error.
    pub fn clear(err: impl ToString) -> Self {
        Self::Clear(err.to_string())
    }

    /// Create an init error.
    pub fn init(err: impl ToString) -> Self {
        Self::Init(err.to_string())
    }
}

/// Canonical application error taxonomy.
///
/// Adapters map this to their own surfaces (Tauri serialized errors, CLI
/// exit codes). Every kind carries a structured payload rather than only
/// free text.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    /// Generic network failure outside a specific upload.
    #[error("Network error: {message}")]
    Network {
        /// Detailed error message.
        message: String,
    },

    /// Expired or invalid credential.
    #[error("Authentication error: {message}")]
    Auth {
        /// Detailed error message.
        message: String,
    },

    /// Local file I/O failure.
    #[error("File I/O error: {message}")]
    FileIo {
        /// Detailed error message.
        message: String,
    },

    /// A single destination's upload failed.
    #[error("Upload to {service} failed: {message}")]
    Upload {
        /// The destination service.
        service: ServiceId,
        /// Backend-specific error code, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        /// Detailed error message.
        message: String,
    },

    /// Configuration is missing or invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Detailed error message.
        message: String,
    },

    /// Clipboard access failed (surfaced by the presentation collaborator).
    #[error("Clipboard error: {message}")]
    Clipboard {
        /// Detailed error message.
        message: String,
    },

    /// An external collaborator failed.
    #[error("External error: {message}")]
    External {
        /// Detailed error message.
        message: String,
    },

    /// A destination backend is unreachable or down.
    #[error("Service {service} unavailable: {message}")]
    ServiceUnavailable {
        /// The affected service.
        service: ServiceId,
        /// Detailed error message.
        message: String,
    },

    /// Invalid input.
    #[error("Validation error: {message}")]
    Validation {
        /// Detailed error message.
        message: String,
    },

    /// WebDAV remote failure during synchronization.
    #[error("WebDAV error: {message}")]
    WebDav {
        /// Detailed error message.
        message: String,
        /// HTTP status code if available.
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
    },

    /// Local persistence failure. Surfaced as blocking: data loss risk.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl AppError {
    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a file I/O error.
    pub fn file_io(message: impl Into<String>) -> Self {
        Self::FileIo {
            message: message.into(),
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create an external collaborator error.
    pub fn external(message: impl Into<String>) -> Self {
        Self::External {
            message: message.into(),
        }
    }

    /// Create a WebDAV error.
    pub fn webdav(message: impl Into<String>) -> Self {
        Self::WebDav {
            message: message.into(),
            status_code: None,
        }
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Network {
                message,
                status_code,
            } => {
                let message = match status_code {
                    Some(code) => format!("HTTP {code}: {message}"),
                    None => message,
                };
                Self::Network { message }
            }
            UploadError::Auth { message, .. } => Self::Auth { message },
            UploadError::FileIo { message, .. } => Self::FileIo { message },
            UploadError::ServiceUnavailable { service, message } => {
                Self::ServiceUnavailable { service, message }
            }
            UploadError::Validation { message } => Self::Validation { message },
            UploadError::Cancelled => Self::External {
                message: "upload cancelled".to_string(),
            },
            UploadError::Other { message } => Self::External { message },
        }
    }
}

/// Convenience result type for core operations.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = UploadError::from_io_error(&io_err);

        match err {
            UploadError::FileIo { kind, message } => {
                assert_eq!(kind, "NotFound");
                assert!(message.contains("file not found"));
            }
            _ => panic!("Expected FileIo variant"),
        }
    }

    #[test]
    fn test_error_serialization_roundtrip() {
        let err = UploadError::network_with_status("timeout", 408);
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("408"));

        let parsed: UploadError = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, err);
    }

    #[test]
    fn test_is_recoverable() {
        assert!(UploadError::network("timeout").is_recoverable());
        assert!(
            UploadError::unavailable(ServiceId::new("cdn"), "maintenance").is_recoverable()
        );
        assert!(!UploadError::Cancelled.is_recoverable());
        assert!(!UploadError::validation("empty path").is_recoverable());
    }

    #[test]
    fn test_storage_error_keeps_source_text() {
        let err = StorageError::write("disk full (os error 28)");
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_file_io_error_roundtrip_keeps_io_kind() {
        let err = UploadError::FileIo {
            kind: "PermissionDenied".to_string(),
            message: "cannot open photo.png".to_string(),
        };
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"type\":\"file_io\""));
        assert!(json.contains("\"kind\":\"PermissionDenied\""));

        let parsed: UploadError = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, err);
    }

    #[test]
    fn test_storage_error_roundtrip() {
        let err = StorageError::read("malformed row");
        let json = serde_json::to_string(&err).unwrap();
        let parsed: StorageError = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, err);
    }

    #[test]
    fn test_app_error_wrapping_storage_roundtrip() {
        let err = AppError::from(StorageError::init("migration failed"));
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"type\":\"storage\""));

        let parsed: AppError = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, err);
    }
}
