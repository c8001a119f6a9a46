//! Hash Chain
//!
//! Deterministic content hashes for blocks, receipts and Merkle leaves.
//!
//! Block and leaf hashes are computed over an explicit, versioned field
//! projection written as compact JSON. Field order is fixed by the
//! projection tables below; nested objects are written with sorted keys.
//! Changing either table changes every block hash, so bump
//! [`HASH_CONTRACT_VERSION`] when you do.

use chrono::SecondsFormat;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::LedgerError;
use crate::ledger::block::BlockData;
use crate::ledger::receipt::Receipt;
use crate::ledger::record::AuditRecord;

pub const HASH_CONTRACT_VERSION: u32 = 1;

/// `previousHash` of the first block in an organization's chain.
pub const GENESIS_PREVIOUS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

pub type Projector = fn(&AuditRecord) -> Value;

/// Record fields included in a block hash, in serialization order.
pub static BLOCK_RECORD_PROJECTION: [(&str, Projector); 7] = [
    ("id", project_id),
    ("action", project_action),
    ("category", project_category),
    ("userId", project_user_id),
    ("lamport", project_lamport),
    ("createdAt", project_created_at),
    ("hashPointer", project_hash_pointer),
];

/// Record fields hashed into a Merkle leaf, in serialization order.
pub static MERKLE_LEAF_PROJECTION: [(&str, Projector); 7] = [
    ("id", project_id),
    ("userId", project_user_id),
    ("action", project_action),
    ("category", project_category),
    ("details", project_details),
    ("lamport", project_lamport),
    ("createdAt", project_created_at),
];

fn project_id(r: &AuditRecord) -> Value {
    Value::from(r.id)
}

fn project_action(r: &AuditRecord) -> Value {
    Value::from(r.action.as_str())
}

fn project_category(r: &AuditRecord) -> Value {
    r.category.as_deref().map(Value::from).unwrap_or(Value::Null)
}

fn project_user_id(r: &AuditRecord) -> Value {
    Value::from(r.user_id.as_str())
}

fn project_lamport(r: &AuditRecord) -> Value {
    Value::from(r.lamport)
}

fn project_created_at(r: &AuditRecord) -> Value {
    Value::from(r.created_at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn project_hash_pointer(r: &AuditRecord) -> Value {
    r.hash_pointer.as_deref().map(Value::from).unwrap_or(Value::Null)
}

fn project_details(r: &AuditRecord) -> Value {
    Value::Object(r.details.clone())
}

/// Lowercase hex SHA-256.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Parent of two Merkle nodes: `sha256(left + right)` over the hex strings.
pub fn hash_pair(left: &str, right: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compact JSON with object keys sorted, independent of map insertion order.
pub fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::from(key.as_str()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_projection(record: &AuditRecord, projection: &[(&str, Projector)], out: &mut String) {
    out.push('{');
    for (i, (name, project)) in projection.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push('"');
        out.push_str(name);
        out.push_str("\":");
        write_canonical(&project(record), out);
    }
    out.push('}');
}

/// Canonical string hashed into a block hash.
pub fn canonical_block_string(block: &BlockData<'_>) -> String {
    let mut out = String::with_capacity(128 + block.records.len() * 192);
    out.push_str("{\"previousHash\":");
    out.push_str(&Value::from(block.previous_hash).to_string());
    out.push_str(",\"records\":[");
    for (i, record) in block.records.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_projection(record, &BLOCK_RECORD_PROJECTION, &mut out);
    }
    out.push_str("],\"timestamp\":");
    out.push_str(&block.timestamp.to_string());
    out.push_str(",\"lamportClock\":");
    out.push_str(&block.lamport_clock.to_string());
    out.push('}');
    out
}

pub fn hash_block(block: &BlockData<'_>) -> String {
    sha256_hex(canonical_block_string(block).as_bytes())
}

/// Canonical string of a record's Merkle leaf projection.
pub fn canonical_leaf_string(record: &AuditRecord) -> String {
    let mut out = String::with_capacity(256);
    write_projection(record, &MERKLE_LEAF_PROJECTION, &mut out);
    out
}

pub fn hash_leaf(record: &AuditRecord) -> String {
    sha256_hex(canonical_leaf_string(record).as_bytes())
}

/// SHA-256 over the receipt with `self_hash` removed, keys sorted.
pub fn hash_receipt(receipt: &Receipt) -> Result<String, LedgerError> {
    let mut value = serde_json::to_value(receipt)?;
    if let Value::Object(map) = &mut value {
        map.remove("self_hash");
    }

    let mut canonical = String::new();
    write_canonical(&value, &mut canonical);
    Ok(sha256_hex(canonical.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn record(id: i64, lamport: u64) -> AuditRecord {
        AuditRecord {
            id,
            organization_id: 7,
            user_id: "3".to_string(),
            action: format!("ACTION_{}", id),
            category: Some("SYSTEM".to_string()),
            lamport,
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, id as u32).unwrap(),
            hash_pointer: None,
            block_hash: None,
            details: serde_json::Map::new(),
            metadata: serde_json::Map::new(),
            status: Some("SUCCESS".to_string()),
        }
    }

    #[test]
    fn test_sha256_hex_shape() {
        let digest = sha256_hex(b"abc");
        assert_eq!(digest.len(), 64);
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_canonical_block_string_field_order() {
        let records = vec![record(1, 1)];
        let block = BlockData {
            previous_hash: GENESIS_PREVIOUS_HASH,
            records: &records,
            timestamp: 1_700_000_000_000,
            lamport_clock: 1,
        };

        let canonical = canonical_block_string(&block);
        assert_eq!(
            canonical,
            format!(
                "{{\"previousHash\":\"{}\",\"records\":[{{\"id\":1,\"action\":\"ACTION_1\",\"category\":\"SYSTEM\",\"userId\":\"3\",\"lamport\":1,\"createdAt\":\"2025-01-01T12:00:01.000Z\",\"hashPointer\":null}}],\"timestamp\":1700000000000,\"lamportClock\":1}}",
                GENESIS_PREVIOUS_HASH
            )
        );
    }

    #[test]
    fn test_hash_block_is_deterministic() {
        let records: Vec<AuditRecord> = (1..=3).map(|i| record(i, i as u64)).collect();
        let block = BlockData {
            previous_hash: GENESIS_PREVIOUS_HASH,
            records: &records,
            timestamp: 1_700_000_000_000,
            lamport_clock: 3,
        };

        let first = hash_block(&block);
        let second = hash_block(&block);
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn test_hash_block_ignores_unprojected_fields() {
        let mut records = vec![record(1, 1)];
        let block = BlockData {
            previous_hash: GENESIS_PREVIOUS_HASH,
            records: &records,
            timestamp: 0,
            lamport_clock: 1,
        };
        let before = hash_block(&block);

        records[0].metadata.insert("note".to_string(), json!("changed"));
        records[0].block_hash = Some("ff".repeat(32));
        let block = BlockData {
            previous_hash: GENESIS_PREVIOUS_HASH,
            records: &records,
            timestamp: 0,
            lamport_clock: 1,
        };
        assert_eq!(before, hash_block(&block));
    }

    #[test]
    fn test_write_canonical_sorts_nested_keys() {
        let value = json!({"b": 1, "a": {"z": true, "m": [1, {"y": null, "x": "s"}]}});
        let mut out = String::new();
        write_canonical(&value, &mut out);
        assert_eq!(out, r#"{"a":{"m":[1,{"x":"s","y":null}],"z":true},"b":1}"#);
    }

    #[test]
    fn test_leaf_includes_details() {
        let plain = record(1, 1);
        let mut detailed = plain.clone();
        detailed.details.insert("k".to_string(), json!("v"));
        assert_ne!(hash_leaf(&plain), hash_leaf(&detailed));
    }
}
