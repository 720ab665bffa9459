//! Notification pipeline: validate an artifact, then deliver it everywhere.

pub mod dispatcher;
pub mod notifier;

pub use dispatcher::{DeliveryStats, DispatchOutcome, DispatchReport, Dispatcher};
pub use notifier::{notifier_from_config, LogNotifier, Notifier, WebhookNotifier};
