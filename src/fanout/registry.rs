//! Live subscriber registry
//!
//! Each subscriber owns the receiving half of an unbounded channel and a
//! filter deciding which audit records it hears about.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::fanout::events::PushEvent;
use crate::ledger::record::{AuditRecord, OrgId};

pub type SubscriberId = Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberFilter {
    pub org_id: OrgId,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Matched against the record's `action`.
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
}

impl SubscriberFilter {
    pub fn for_org(org_id: OrgId) -> Self {
        Self {
            org_id,
            user_id: None,
            event_type: None,
            start_date: None,
            end_date: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn between(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }

    pub fn matches(&self, record: &AuditRecord) -> bool {
        self.org_id == record.organization_id
            && self.user_id.as_deref().map_or(true, |u| u == record.user_id)
            && self.event_type.as_deref().map_or(true, |e| e == record.action)
            && self.start_date.map_or(true, |start| record.created_at >= start)
            && self.end_date.map_or(true, |end| record.created_at <= end)
    }
}

struct Subscriber {
    filter: SubscriberFilter,
    sender: mpsc::UnboundedSender<PushEvent>,
}

/// Senders for the subscribers that matched one record.
pub struct MatchedGroup {
    pub org_id: OrgId,
    pub targets: Vec<(SubscriberId, mpsc::UnboundedSender<PushEvent>)>,
}

#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: RwLock<HashMap<SubscriberId, Subscriber>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        filter: SubscriberFilter,
    ) -> (SubscriberId, mpsc::UnboundedReceiver<PushEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        info!("Registered subscriber {} for org {}", id, filter.org_id);
        self.subscribers
            .write()
            .await
            .insert(id, Subscriber { filter, sender });
        (id, receiver)
    }

    pub async fn update_filter(
        &self,
        id: SubscriberId,
        filter: SubscriberFilter,
    ) -> Result<(), LedgerError> {
        let mut subscribers = self.subscribers.write().await;
        let subscriber = subscribers
            .get_mut(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("Subscriber {}", id)))?;
        debug!("Subscriber {} filter updated: {:?}", id, filter);
        subscriber.filter = filter;
        Ok(())
    }

    pub async fn remove(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.write().await.remove(&id).is_some();
        if removed {
            info!("Removed subscriber {}", id);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.subscribers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Subscribers registered for `org_id`, whatever their other filters.
    pub async fn lookup_by_org(&self, org_id: OrgId) -> Vec<SubscriberId> {
        self.subscribers
            .read()
            .await
            .iter()
            .filter(|(_, s)| s.filter.org_id == org_id)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Subscribers whose filter accepts `record`, grouped by organization.
    pub async fn matching(&self, record: &AuditRecord) -> Vec<MatchedGroup> {
        let subscribers = self.subscribers.read().await;
        let mut groups: HashMap<OrgId, Vec<(SubscriberId, mpsc::UnboundedSender<PushEvent>)>> =
            HashMap::new();

        for (id, subscriber) in subscribers.iter() {
            if subscriber.filter.matches(record) {
                groups
                    .entry(subscriber.filter.org_id)
                    .or_default()
                    .push((*id, subscriber.sender.clone()));
            }
        }

        groups
            .into_iter()
            .map(|(org_id, targets)| MatchedGroup { org_id, targets })
            .collect()
    }

    /// Drop subscribers whose receivers have gone away.
    pub async fn prune_closed(&self) -> usize {
        let mut subscribers = self.subscribers.write().await;
        let before = subscribers.len();
        subscribers.retain(|_, s| !s.sender.is_closed());
        let pruned = before - subscribers.len();
        if pruned > 0 {
            debug!("Pruned {} disconnected subscribers", pruned);
        }
        pruned
    }
}
