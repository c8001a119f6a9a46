//! Events pushed to live subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cries::CriesSnapshot;
use crate::ledger::record::AuditRecord;

/// Payload of an `audit-update` push, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AuditUpdate {
    #[serde(rename = "BLOCK_CREATED")]
    BlockCreated {
        record: AuditRecord,
        #[serde(rename = "blockHash")]
        block_hash: String,
    },
    #[serde(rename = "RECORD_CREATED")]
    RecordCreated { record: AuditRecord },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsUpdate {
    pub block_hash: String,
    pub metrics: CriesSnapshot,
    pub timestamp: DateTime<Utc>,
}

/// Everything a subscriber channel can receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum PushEvent {
    #[serde(rename = "audit-update")]
    Audit(AuditUpdate),
    #[serde(rename = "metrics-update")]
    Metrics(MetricsUpdate),
}

impl PushEvent {
    pub fn block_created(record: AuditRecord, block_hash: impl Into<String>) -> Self {
        PushEvent::Audit(AuditUpdate::BlockCreated {
            record,
            block_hash: block_hash.into(),
        })
    }

    pub fn record_created(record: AuditRecord) -> Self {
        PushEvent::Audit(AuditUpdate::RecordCreated { record })
    }

    pub fn metrics(block_hash: impl Into<String>, metrics: CriesSnapshot) -> Self {
        PushEvent::Metrics(MetricsUpdate {
            block_hash: block_hash.into(),
            metrics,
            timestamp: Utc::now(),
        })
    }

    /// Wire discriminator: `BLOCK_CREATED`, `RECORD_CREATED` or `metrics-update`.
    pub fn kind(&self) -> &'static str {
        match self {
            PushEvent::Audit(AuditUpdate::BlockCreated { .. }) => "BLOCK_CREATED",
            PushEvent::Audit(AuditUpdate::RecordCreated { .. }) => "RECORD_CREATED",
            PushEvent::Metrics(_) => "metrics-update",
        }
    }
}
