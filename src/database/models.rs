//! Row mapping between SQLite and ledger types.
//!
//! Timestamps are stored as fixed-width RFC 3339 text (microseconds, `Z`)
//! so that lexicographic order matches chronological order. JSON maps are
//! stored as text.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::cries::CriesSnapshot;
use crate::error::LedgerError;
use crate::ledger::block::Block;
use crate::ledger::record::AuditRecord;

pub const RECORD_COLUMNS: &str = "id, organization_id, user_id, action, category, lamport, \
     created_at, hash_pointer, block_hash, details, metadata, status";

pub const BLOCK_COLUMNS: &str = "hash, previous_hash, organization_id, lamport_clock, \
     timestamp_ms, merkle_root, record_count, metrics_data, created_at";

/// Precision kept by the store; applied before insert so callers see
/// exactly what a later read returns.
pub fn storage_precision(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp.trunc_subsecs(6)
}

pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| LedgerError::DatabaseError(format!("Invalid timestamp {:?}: {}", value, e)))
}

fn parse_map(value: &str) -> Result<Map<String, Value>, LedgerError> {
    Ok(serde_json::from_str(value)?)
}

/// Lamport stamps are stored as signed INTEGER; anything above `i64::MAX`
/// is refused rather than wrapped.
pub fn lamport_column(lamport: u64) -> Result<i64, LedgerError> {
    i64::try_from(lamport).map_err(|_| {
        LedgerError::ValidationError(format!("Lamport {} does not fit the store", lamport))
    })
}

fn to_u64(value: i64, column: &str) -> Result<u64, LedgerError> {
    u64::try_from(value)
        .map_err(|_| LedgerError::DatabaseError(format!("Negative value in {}: {}", column, value)))
}

pub fn record_from_row(row: &SqliteRow) -> Result<AuditRecord, LedgerError> {
    let created_at: String = row.try_get("created_at")?;
    let details: String = row.try_get("details")?;
    let metadata: String = row.try_get("metadata")?;

    Ok(AuditRecord {
        id: row.try_get("id")?,
        organization_id: row.try_get("organization_id")?,
        user_id: row.try_get("user_id")?,
        action: row.try_get("action")?,
        category: row.try_get("category")?,
        lamport: to_u64(row.try_get("lamport")?, "lamport")?,
        created_at: parse_timestamp(&created_at)?,
        hash_pointer: row.try_get("hash_pointer")?,
        block_hash: row.try_get("block_hash")?,
        details: parse_map(&details)?,
        metadata: parse_map(&metadata)?,
        status: row.try_get("status")?,
    })
}

pub fn block_from_row(row: &SqliteRow) -> Result<Block, LedgerError> {
    let metrics_data: String = row.try_get("metrics_data")?;
    let created_at: String = row.try_get("created_at")?;
    let record_count: i64 = row.try_get("record_count")?;
    let metrics: CriesSnapshot = serde_json::from_str(&metrics_data)?;

    Ok(Block {
        hash: row.try_get("hash")?,
        previous_hash: row.try_get("previous_hash")?,
        organization_id: row.try_get("organization_id")?,
        lamport_clock: to_u64(row.try_get("lamport_clock")?, "lamport_clock")?,
        timestamp: row.try_get("timestamp_ms")?,
        merkle_root: row.try_get("merkle_root")?,
        record_count: to_u64(record_count, "record_count")? as usize,
        metrics_data: metrics,
        created_at: parse_timestamp(&created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_text_sorts_chronologically() {
        let early = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap();
        assert!(format_timestamp(&early) < format_timestamp(&late));
        assert_eq!(format_timestamp(&early), "2025-01-01T09:00:00.000000Z");
    }

    #[test]
    fn test_timestamp_round_trip_at_storage_precision() {
        let now = storage_precision(Utc::now());
        assert_eq!(parse_timestamp(&format_timestamp(&now)).unwrap(), now);
    }
}
