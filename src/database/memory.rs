//! In-process ledger store.
//!
//! Same contract as the SQLite store, held behind one `RwLock`. Used by
//! tests and by deployments that do not need durable state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::database::models::lamport_column;
use crate::database::LedgerStore;
use crate::error::LedgerError;
use crate::ledger::block::Block;
use crate::ledger::hash::GENESIS_PREVIOUS_HASH;
use crate::ledger::record::{AuditRecord, NewAuditRecord, OrgId};

#[derive(Default)]
struct MemoryState {
    records: BTreeMap<i64, AuditRecord>,
    /// Insertion order is seal order.
    blocks: Vec<Block>,
    next_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn insert_record(
        &self,
        record: NewAuditRecord,
        lamport: u64,
    ) -> Result<AuditRecord, LedgerError> {
        lamport_column(lamport)?;
        let mut state = self.state.write().await;
        state.next_id += 1;
        let record = record.into_record(state.next_id, lamport);
        state.records.insert(record.id, record.clone());
        debug!("Stored audit record {} for org {}", record.id, record.organization_id);
        Ok(record)
    }

    async fn get_record(&self, id: i64) -> Result<Option<AuditRecord>, LedgerError> {
        Ok(self.state.read().await.records.get(&id).cloned())
    }

    async fn latest_lamport(&self, org_id: OrgId) -> Result<Option<u64>, LedgerError> {
        let state = self.state.read().await;
        Ok(state
            .records
            .values()
            .filter(|r| r.organization_id == org_id)
            .map(|r| r.lamport)
            .max())
    }

    async fn unblocked_records(
        &self,
        org_id: OrgId,
        limit: usize,
    ) -> Result<Vec<AuditRecord>, LedgerError> {
        let state = self.state.read().await;
        let mut pending: Vec<AuditRecord> = state
            .records
            .values()
            .filter(|r| r.organization_id == org_id && r.block_hash.is_none())
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn records_in_range(
        &self,
        org_id: OrgId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<AuditRecord>, LedgerError> {
        let state = self.state.read().await;
        Ok(state
            .records
            .values()
            .filter(|r| r.organization_id == org_id)
            .filter(|r| start.map_or(true, |s| r.created_at >= s))
            .filter(|r| end.map_or(true, |e| r.created_at <= e))
            .cloned()
            .collect())
    }

    async fn records_in_block(&self, block_hash: &str) -> Result<Vec<AuditRecord>, LedgerError> {
        let state = self.state.read().await;
        Ok(state
            .records
            .values()
            .filter(|r| r.block_hash.as_deref() == Some(block_hash))
            .cloned()
            .collect())
    }

    async fn latest_block(&self, org_id: OrgId) -> Result<Option<Block>, LedgerError> {
        let state = self.state.read().await;
        Ok(state
            .blocks
            .iter()
            .rev()
            .find(|b| b.organization_id == org_id)
            .cloned())
    }

    async fn get_block(&self, hash: &str) -> Result<Option<Block>, LedgerError> {
        let state = self.state.read().await;
        Ok(state.blocks.iter().find(|b| b.hash == hash).cloned())
    }

    async fn blocks(&self, org_id: OrgId) -> Result<Vec<Block>, LedgerError> {
        let state = self.state.read().await;
        Ok(state
            .blocks
            .iter()
            .filter(|b| b.organization_id == org_id)
            .cloned()
            .collect())
    }

    async fn seal_block(&self, block: &Block, record_ids: &[i64]) -> Result<(), LedgerError> {
        let mut state = self.state.write().await;

        let head = state
            .blocks
            .iter()
            .rev()
            .find(|b| b.organization_id == block.organization_id)
            .map(|b| b.hash.as_str())
            .unwrap_or(GENESIS_PREVIOUS_HASH);
        if block.previous_hash != head {
            return Err(LedgerError::ConflictError(format!(
                "Organization {}: block {} links to {}, but the latest block is {}",
                block.organization_id, block.hash, block.previous_hash, head
            )));
        }

        // Check every claim before touching anything.
        let claimable = record_ids
            .iter()
            .filter(|id| {
                state.records.get(*id).map_or(false, |r| {
                    r.organization_id == block.organization_id && r.block_hash.is_none()
                })
            })
            .count();
        if claimable != record_ids.len() {
            return Err(LedgerError::seal_conflict(
                block.organization_id,
                claimable,
                record_ids.len(),
            ));
        }

        for id in record_ids {
            if let Some(record) = state.records.get_mut(id) {
                record.block_hash = Some(block.hash.clone());
            }
        }
        state.blocks.push(block.clone());

        info!("Stored {}", block.summary());
        Ok(())
    }
}
