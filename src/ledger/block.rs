//! Ledger Blocks
//!
//! An immutable, hash-linked batch of audit records with its CRIES snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cries::CriesSnapshot;
use crate::ledger::hash::{hash_block, GENESIS_PREVIOUS_HASH};
use crate::ledger::record::{AuditRecord, OrgId};

/// Hash input for a block.
#[derive(Debug, Clone, Copy)]
pub struct BlockData<'a> {
    pub previous_hash: &'a str,
    pub records: &'a [AuditRecord],
    /// Epoch milliseconds.
    pub timestamp: i64,
    /// Highest Lamport stamp among `records`.
    pub lamport_clock: u64,
}

impl<'a> BlockData<'a> {
    pub fn new(previous_hash: &'a str, records: &'a [AuditRecord], timestamp: i64) -> Self {
        let lamport_clock = records.iter().map(|r| r.lamport).max().unwrap_or(0);
        Self {
            previous_hash,
            records,
            timestamp,
            lamport_clock,
        }
    }

    pub fn hash(&self) -> String {
        hash_block(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub hash: String,
    pub previous_hash: String,
    pub organization_id: OrgId,
    pub lamport_clock: u64,
    /// Epoch milliseconds used in the hash.
    pub timestamp: i64,
    /// Merkle root over the member records in ascending id order.
    pub merkle_root: String,
    pub record_count: usize,
    pub metrics_data: CriesSnapshot,
    pub created_at: DateTime<Utc>,
}

impl Block {
    pub fn is_genesis(&self) -> bool {
        self.previous_hash == GENESIS_PREVIOUS_HASH
    }

    pub fn summary(&self) -> String {
        format!(
            "block {} (org {}, {} records, lamport {})",
            &self.hash[..self.hash.len().min(12)],
            self.organization_id,
            self.record_count,
            self.lamport_clock
        )
    }
}
