//! Error types for CardBridge
//!
//! This module defines the error taxonomy shared by the bootstrap pipeline,
//! the notification pipeline and the supervision loop. Uses `thiserror` for
//! `Display` and `Error` implementations.

use thiserror::Error;

/// The primary error type for CardBridge operations.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Package download failed (connection, timeout, non-success status).
    #[error("Network error: {0}")]
    Network(String),

    /// Digest of a downloaded package does not match the pinned value.
    #[error("Integrity error: expected sha256 {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    /// Corrupt or structurally invalid package archive.
    #[error("Archive error: {0}")]
    Archive(String),

    /// Directory or file could not be created, moved or read.
    #[error("Filesystem error: {0}")]
    Filesystem(String),

    /// No package is known for the running platform.
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// A single repository entry could not be decoded.
    #[error("Config projection error: {0}")]
    ConfigProjection(String),

    /// Host configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The vendored executable could not be spawned or signalled.
    #[error("Process error: {0}")]
    Process(String),

    /// The vendored executable ran but exited unsuccessfully.
    #[error("'{command}' exited with code {code:?}: {stderr}")]
    ProcessExit {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// An artifact is not fully written yet.
    #[error("Artifact not ready: {0}")]
    NotReady(String),

    /// Bootstrap did not produce a usable executable in this process.
    #[error("Vendored executable is not ready")]
    VendorNotReady,

    /// Delivery to a single destination failed.
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Filesystem watcher errors
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),
}

impl BridgeError {
    /// Returns `true` if re-invoking the failed operation may succeed.
    ///
    /// Only network failures qualify. Integrity, archive and filesystem
    /// failures are fatal for the attempt that raised them.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::Network(_) | BridgeError::Http(_))
    }

    /// Returns `true` for errors that abort bootstrap for the process lifetime.
    pub fn is_fatal_for_bootstrap(&self) -> bool {
        matches!(
            self,
            BridgeError::Integrity { .. }
                | BridgeError::Archive(_)
                | BridgeError::Filesystem(_)
                | BridgeError::UnsupportedPlatform(_)
                | BridgeError::Io(_)
        )
    }
}

/// A specialized `Result` type for CardBridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
