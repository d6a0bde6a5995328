//! Remote backup store port.
//!
//! The sync engine performs file-level GET/PUT against one remote
//! directory. WebDAV is the only shipped implementation, but the engine
//! never sees past this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors of the remote backup store.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteStoreError {
    /// The remote never answered.
    #[error("Remote unreachable: {message}")]
    Unreachable {
        /// Detailed error message.
        message: String,
    },

    /// The remote rejected the credential.
    #[error("Remote authentication failed: {message}")]
    Auth {
        /// Detailed error message.
        message: String,
    },

    /// The remote answered with an unexpected status.
    #[error("Remote error (HTTP {status}): {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Detailed error message.
        message: String,
    },

    /// The request timed out.
    #[error("Remote timeout: {message}")]
    Timeout {
        /// Detailed error message.
        message: String,
    },

    /// The remote answered with a body the engine cannot use.
    #[error("Invalid remote response: {message}")]
    InvalidResponse {
        /// Detailed error message.
        message: String,
    },
}

impl RemoteStoreError {
    /// Create an unreachable error.
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Unreachable {
            message: message.into(),
        }
    }

    /// Create an HTTP error.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }
}

/// File-level access to one remote backup directory.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch a file; `None` when it does not exist remotely.
    async fn get(&self, file_name: &str) -> Result<Option<Vec<u8>>, RemoteStoreError>;

    /// Write a file, creating or replacing it.
    async fn put(&self, file_name: &str, body: Vec<u8>) -> Result<(), RemoteStoreError>;

    /// Ensure the remote directory exists.
    async fn ensure_root(&self) -> Result<(), RemoteStoreError>;
}
