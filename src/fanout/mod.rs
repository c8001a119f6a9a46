//! Live Fanout
//!
//! Filtered, per-subscriber delivery of ledger events over in-process
//! channels.

pub mod events;
pub mod notifier;
pub mod registry;

pub use events::{AuditUpdate, MetricsUpdate, PushEvent};
pub use notifier::{Delivery, FanoutOutcome, NotificationFanout};
pub use registry::{SubscriberFilter, SubscriberId, SubscriberRegistry};
