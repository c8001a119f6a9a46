//! Audit Records
//!
//! The event rows produced by external collaborators and batched into
//! blocks by the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type OrgId = i64;

/// Audit event as persisted by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub id: i64,
    pub organization_id: OrgId,
    pub user_id: String,
    pub action: String,
    pub category: Option<String>,
    pub lamport: u64,
    pub created_at: DateTime<Utc>,
    pub hash_pointer: Option<String>,
    /// Hash of the block this record was sealed into; `None` while accumulating.
    pub block_hash: Option<String>,
    #[serde(default)]
    pub details: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub status: Option<String>,
}

impl AuditRecord {
    pub fn is_sealed(&self) -> bool {
        self.block_hash.is_some()
    }

    pub fn summary(&self) -> String {
        format!(
            "record {} (org {}, lamport {}): {}",
            self.id, self.organization_id, self.lamport, self.action
        )
    }
}

/// Audit event as submitted by a producer, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAuditRecord {
    pub organization_id: OrgId,
    pub user_id: String,
    pub action: String,
    #[serde(default)]
    pub category: Option<String>,
    /// Left empty to have the engine stamp the next Lamport value.
    #[serde(default)]
    pub lamport: Option<u64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub hash_pointer: Option<String>,
    #[serde(default)]
    pub details: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub status: Option<String>,
}

impl NewAuditRecord {
    pub fn new(organization_id: OrgId, user_id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            organization_id,
            user_id: user_id.into(),
            action: action.into(),
            category: None,
            lamport: None,
            created_at: None,
            hash_pointer: None,
            details: Map::new(),
            metadata: Map::new(),
            status: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_lamport(mut self, lamport: u64) -> Self {
        self.lamport = Some(lamport);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Materialize with a store-assigned id and a resolved Lamport stamp.
    pub fn into_record(self, id: i64, lamport: u64) -> AuditRecord {
        AuditRecord {
            id,
            organization_id: self.organization_id,
            user_id: self.user_id,
            action: self.action,
            category: self.category,
            lamport,
            created_at: self.created_at.unwrap_or_else(Utc::now),
            hash_pointer: self.hash_pointer,
            block_hash: None,
            details: self.details,
            metadata: self.metadata,
            status: self.status,
        }
    }
}
