#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;

use governance_ledger::config::{AppConfig, CanonConfig};
use governance_ledger::database::{Database, LedgerStore, MemoryStore};
use governance_ledger::ledger::{AuditRecord, NewAuditRecord, OrgId};
use governance_ledger::GovernanceEngine;

/// Setup an in-memory SQLite database for testing
pub async fn setup_test_db() -> Database {
    Database::new_in_memory()
        .await
        .expect("Failed to create test database")
}

pub fn test_config(block_threshold: usize) -> AppConfig {
    AppConfig {
        block_threshold,
        ..AppConfig::default()
    }
}

/// Engine over a fresh in-memory store
pub fn memory_engine(block_threshold: usize) -> (GovernanceEngine, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let engine = GovernanceEngine::new(
        test_config(block_threshold),
        CanonConfig::default(),
        store.clone(),
    )
    .expect("Failed to build engine");
    (engine, store)
}

/// Engine over a fresh in-memory SQLite database
pub async fn sqlite_engine(block_threshold: usize) -> GovernanceEngine {
    let db = setup_test_db().await;
    GovernanceEngine::new(
        test_config(block_threshold),
        CanonConfig::default(),
        Arc::new(db),
    )
    .expect("Failed to build engine")
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

/// A well-formed record for `org`, `seconds` after the base time
pub fn test_record(org: OrgId, seconds: i64) -> NewAuditRecord {
    NewAuditRecord::new(org, "user-1", "DOCUMENT_APPROVED")
        .with_category("GOVERNANCE")
        .with_status("SUCCESS")
        .with_detail("document", json!(format!("doc-{}", seconds)))
        .with_metadata("source", json!("tests"))
        .with_created_at(base_time() + Duration::seconds(seconds))
}

/// Insert `count` records directly into a store with consecutive Lamport stamps
pub async fn seed_records(store: &dyn LedgerStore, org: OrgId, count: usize) -> Vec<AuditRecord> {
    let mut records = Vec::with_capacity(count);
    for i in 0..count {
        let record = store
            .insert_record(test_record(org, i as i64), i as u64)
            .await
            .expect("Failed to insert record");
        records.push(record);
    }
    records
}
