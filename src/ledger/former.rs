//! Block Former
//!
//! Per-organization state machine: records accumulate unsealed until
//! `threshold` of them exist, then the oldest `threshold` are sealed into
//! a block chained to the organization's previous block.
//!
//! Sealing for one organization is serialized by an in-process lock; the
//! store's conditional claim catches anything that slips past it (another
//! process sharing the database).

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::cries::score_records;
use crate::database::LedgerStore;
use crate::error::LedgerError;
use crate::ledger::block::{Block, BlockData};
use crate::ledger::hash::GENESIS_PREVIOUS_HASH;
use crate::ledger::merkle::merkle_root;
use crate::ledger::record::{AuditRecord, OrgId};

pub const DEFAULT_BLOCK_THRESHOLD: usize = 10;
pub const DEFAULT_TAKE_WINDOW: usize = 100;

type OrgLocks = Mutex<HashMap<OrgId, Arc<tokio::sync::Mutex<()>>>>;

pub struct BlockFormer {
    store: Arc<dyn LedgerStore>,
    threshold: usize,
    take_window: usize,
    org_locks: OrgLocks,
}

/// Held critical section for one organization. Dropping it releases the
/// lock and forgets the organization's entry once no one else holds or
/// waits on it.
pub struct OrgGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    org_id: OrgId,
    locks: &'a OrgLocks,
}

impl Drop for OrgGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Clones are only handed out under this mutex, so a count of one
        // means the map holds the last reference.
        if locks
            .get(&self.org_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.org_id);
        }
    }
}

impl BlockFormer {
    pub fn new(store: Arc<dyn LedgerStore>, threshold: usize, take_window: usize) -> Self {
        Self {
            store,
            threshold: threshold.max(1),
            take_window: take_window.max(threshold),
            org_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Enter the critical section guarding an organization's unsealed set
    /// and latest block hash.
    pub async fn lock_org(&self, org_id: OrgId) -> OrgGuard<'_> {
        let lock = {
            let mut locks = self
                .org_locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.entry(org_id).or_default().clone()
        };
        OrgGuard {
            guard: Some(lock.lock_owned().await),
            org_id,
            locks: &self.org_locks,
        }
    }

    /// Organizations with a lock currently held or awaited.
    pub fn tracked_orgs(&self) -> usize {
        self.org_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Seal a block if the organization has reached the threshold.
    ///
    /// Returns `None` while fewer than `threshold` records are unsealed.
    pub async fn seal_if_ready(&self, org_id: OrgId) -> Result<Option<Block>, LedgerError> {
        let _guard = self.lock_org(org_id).await;

        let pending = self.store.unblocked_records(org_id, self.take_window).await?;
        if pending.len() < self.threshold {
            debug!(
                "Org {} has {} of {} records needed for a block",
                org_id,
                pending.len(),
                self.threshold
            );
            return Ok(None);
        }

        let batch: Vec<AuditRecord> = pending.into_iter().take(self.threshold).collect();
        let previous_hash = match self.store.latest_block(org_id).await? {
            Some(block) => block.hash,
            None => GENESIS_PREVIOUS_HASH.to_string(),
        };

        let block = build_block(org_id, &previous_hash, &batch, Utc::now().timestamp_millis());
        let ids: Vec<i64> = batch.iter().map(|r| r.id).collect();
        match self.store.seal_block(&block, &ids).await {
            Ok(()) => {}
            Err(LedgerError::ConflictError(reason)) => {
                warn!("Org {} seal abandoned: {}", org_id, reason);
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        info!("Sealed {} on top of {}", block.summary(), short(&previous_hash));
        Ok(Some(block))
    }
}

/// Assemble a block from a batch already in seal order
/// (`created_at`, then id).
pub fn build_block(
    org_id: OrgId,
    previous_hash: &str,
    batch: &[AuditRecord],
    timestamp: i64,
) -> Block {
    let data = BlockData::new(previous_hash, batch, timestamp);
    let hash = data.hash();

    let mut by_id = batch.to_vec();
    by_id.sort_by_key(|r| r.id);

    Block {
        hash,
        previous_hash: previous_hash.to_string(),
        organization_id: org_id,
        lamport_clock: data.lamport_clock,
        timestamp,
        merkle_root: merkle_root(&by_id),
        record_count: batch.len(),
        metrics_data: score_records(batch),
        created_at: DateTime::<Utc>::from_timestamp_millis(timestamp).unwrap_or_else(Utc::now),
    }
}

fn short(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}
