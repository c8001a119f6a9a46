//! Notification fanout
//!
//! Drives block formation for each new record and pushes the outcome to
//! every subscriber whose filter accepts the record.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::fanout::events::PushEvent;
use crate::fanout::registry::{SubscriberId, SubscriberRegistry};
use crate::ledger::block::Block;
use crate::ledger::former::BlockFormer;
use crate::ledger::record::AuditRecord;

/// What one `on_new_record` call sealed and delivered.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FanoutOutcome {
    pub sealed: Option<Block>,
    pub pushed: Vec<Delivery>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub subscriber: SubscriberId,
    pub event: PushEvent,
}

impl FanoutOutcome {
    pub fn events_for(&self, subscriber: SubscriberId) -> Vec<&PushEvent> {
        self.pushed
            .iter()
            .filter(|d| d.subscriber == subscriber)
            .map(|d| &d.event)
            .collect()
    }
}

pub struct NotificationFanout {
    registry: Arc<SubscriberRegistry>,
    former: Arc<BlockFormer>,
}

impl NotificationFanout {
    pub fn new(registry: Arc<SubscriberRegistry>, former: Arc<BlockFormer>) -> Self {
        Self { registry, former }
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Handle a freshly stored record.
    ///
    /// The record's organization is always offered to the block former,
    /// subscribed or not. A seal failure is logged and reported to
    /// subscribers as a plain `RECORD_CREATED`.
    pub async fn on_new_record(&self, record: &AuditRecord) -> FanoutOutcome {
        let org_id = record.organization_id;

        let sealed = match self.former.seal_if_ready(org_id).await {
            Ok(block) => block,
            Err(e) => {
                error!("Block formation failed for org {}: {}", org_id, e);
                None
            }
        };

        let events = match &sealed {
            Some(block) => vec![
                PushEvent::block_created(record.clone(), block.hash.clone()),
                PushEvent::metrics(block.hash.clone(), block.metrics_data.clone()),
            ],
            None => vec![PushEvent::record_created(record.clone())],
        };

        let mut pushed = Vec::new();
        let mut disconnected = false;

        for group in self.registry.matching(record).await {
            if group.org_id != org_id {
                continue;
            }
            for (subscriber, sender) in group.targets {
                for event in &events {
                    if sender.send(event.clone()).is_err() {
                        debug!("Subscriber {} disconnected", subscriber);
                        disconnected = true;
                        break;
                    }
                    pushed.push(Delivery {
                        subscriber,
                        event: event.clone(),
                    });
                }
            }
        }

        if disconnected {
            self.registry.prune_closed().await;
        }

        if let Some(block) = &sealed {
            info!(
                "Pushed BLOCK_CREATED for {} to {} deliveries",
                block.summary(),
                pushed.len()
            );
        } else {
            debug!("Pushed RECORD_CREATED for record {} ({} deliveries)", record.id, pushed.len());
        }

        FanoutOutcome { sealed, pushed }
    }
}
