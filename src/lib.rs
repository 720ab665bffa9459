//! CardBridge - lifecycle manager for a vendored commit-card generator
//!
//! Fetches and verifies the generator package, projects host settings into
//! its config, polls repositories through it, and forwards the images it
//! renders to subscribed chat destinations.

pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod projector;
pub mod registry;
pub mod scheduler;
pub mod supervisor;
pub mod utils;
pub mod vendor;
pub mod watcher;

pub use bridge::{BridgeDeps, CardBridge, CommandReply};
pub use config::{Config, ConfigStore, FileConfigStore, MemoryConfigStore};
pub use dispatch::{DispatchOutcome, DispatchReport, Dispatcher, Notifier};
pub use error::{BridgeError, Result};
pub use projector::RepositoryTarget;
pub use vendor::{Platform, VendorState};
