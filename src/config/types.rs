//! Configuration type definitions for CardBridge
//!
//! The `GitHub` block mirrors what the host runtime hands to the bridge. The
//! remaining sections tune the vendor bootstrap, the monitor loops, delivery
//! and logging. Every struct has serde defaults so partial files load.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Main configuration struct for CardBridge
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host-supplied GitHub settings, projected into the vendored tool's config
    #[serde(rename = "GitHub")]
    pub github: GitHubSettings,
    /// Vendored package location and download tuning
    pub vendor: VendorConfig,
    /// Watcher, dispatcher, supervisor and scheduler timings
    pub monitor: MonitorConfig,
    /// Notification delivery
    pub delivery: DeliveryConfig,
    /// Logging output
    pub logging: LoggingConfig,
}

// ============================================================================
// GitHub Settings
// ============================================================================

/// GitHub block of the host configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubSettings {
    /// GitHub username shown on generated cards
    pub username: String,
    /// API token handed to the vendored tool
    pub token: String,
    /// Whether cards render with background images
    pub backgrounds: bool,
    /// Watched repositories, raw.
    ///
    /// Entries may be objects or JSON-encoded strings; a missing or non-list
    /// value falls back to the default list during projection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<Value>,
    /// Interval between polling cycles, in seconds
    pub refresh_interval_seconds: u64,
    /// Chat destinations that receive new cards
    pub notification_targets: Vec<String>,
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            username: String::new(),
            token: String::new(),
            backgrounds: true,
            repository: None,
            refresh_interval_seconds: 3600,
            notification_targets: Vec::new(),
        }
    }
}

// ============================================================================
// Vendor Configuration
// ============================================================================

/// Where the vendored package lives and how it is fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VendorConfig {
    /// Vendor root directory (supports `~`)
    pub dir: String,
    /// Total timeout for the package download
    pub download_timeout_secs: u64,
    /// Override for the built-in package URL
    pub package_url: Option<String>,
    /// Expected SHA-256 for `package_url`; absent means verification is skipped
    pub package_sha256: Option<String>,
    /// Executable path relative to the vendor root when `package_url` is set
    pub executable: Option<String>,
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            dir: "~/.cardbridge/YumeCard_core".to_string(),
            download_timeout_secs: 600,
            package_url: None,
            package_sha256: None,
            executable: None,
        }
    }
}

// ============================================================================
// Monitor Configuration
// ============================================================================

/// Timings and switches for the watcher, dispatcher and polling loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Start the watcher and scheduler right after bootstrap
    pub autostart: bool,
    /// Pause between two repository checks in one cycle
    pub repo_spacing_secs: u64,
    /// Minimum interval between two notifications for the same path
    pub debounce_secs: u64,
    /// Wait before reading a new artifact, letting the writer finish
    pub write_grace_secs: u64,
    /// Graceful termination window before a forced kill
    pub stop_timeout_secs: u64,
    /// File extension of generated images (without the dot)
    pub artifact_extension: String,
    /// Also keep the vendored tool running in its own monitor mode
    pub persistent_process: bool,
    /// Arguments for the persistent process
    pub persistent_args: Vec<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            autostart: true,
            repo_spacing_secs: 10,
            debounce_secs: 5,
            write_grace_secs: 2,
            stop_timeout_secs: 5,
            artifact_extension: "png".to_string(),
            persistent_process: false,
            persistent_args: vec!["monitor".to_string()],
        }
    }
}

// ============================================================================
// Delivery Configuration
// ============================================================================

/// How notifications leave the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Webhook receiving `destination`, `text` and `image` as multipart form
    pub webhook_url: Option<String>,
    /// Text sent alongside every card
    pub message: String,
    /// Per-request timeout for webhook delivery
    pub timeout_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            message: "New commit card".to_string(),
            timeout_secs: 30,
        }
    }
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable tracing output
    Pretty,
    /// Compact single-line output with a `component` field
    #[default]
    Component,
    /// JSON lines
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// Append logs to this file instead of stderr
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Component,
            level: "info".to_string(),
            file: None,
        }
    }
}
