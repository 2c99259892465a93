// Error types shared across the store, server and client halves.
//
// Read paths report "missing" as `Option::None`; these enums only cover the
// conditions a caller can act on.

use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by [`crate::store::MessageStore`] and the version catalog.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{what} not found")]
    NotFound { what: String },

    #[error("invalid version string {0:?}")]
    InvalidVersion(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        StoreError::NotFound { what: what.into() }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Errors raised while starting or running the update server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The only fatal startup condition: a listening port could not be opened.
    #[error("failed to bind {kind} listener on {addr}: {source}")]
    BindFailure {
        kind: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid listen address {0:?}")]
    InvalidAddress(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised by the client side (API client, poller, downloads).
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("update server unreachable at {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request cancelled")]
    Cancelled,

    #[error("unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{0} not found on update server")]
    NotFound(String),

    #[error("downloaded artifact hash mismatch (expected {expected}, got {actual})")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid server url {0:?}")]
    InvalidUrl(String),
}

impl SyncError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    /// Transport-level failures that the poller retries on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::Unreachable { .. } | SyncError::Status { .. } | SyncError::Decode { .. }
        )
    }
}
