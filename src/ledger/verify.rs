//! Chain Verification
//!
//! Recomputes hashes and Merkle roots and re-checks Lamport ordering.
//! Every check runs to completion and reports all problems it finds;
//! integrity failures are data, never errors.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

use crate::ledger::block::{Block, BlockData};
use crate::ledger::hash::GENESIS_PREVIOUS_HASH;
use crate::ledger::lamport::LamportSequencer;
use crate::ledger::merkle::merkle_root;
use crate::ledger::receipt::Receipt;
use crate::ledger::record::AuditRecord;

/// Result of checking one receipt against its predecessor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptCheck {
    pub hash_valid: bool,
    pub structure_valid: bool,
    pub lamport_valid: bool,
    pub chain_linked: bool,
}

impl ReceiptCheck {
    pub fn is_valid(&self) -> bool {
        self.hash_valid && self.structure_valid && self.lamport_valid && self.chain_linked
    }

    pub fn errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if !self.hash_valid {
            errors.push("self_hash does not match receipt content".to_string());
        }
        if !self.structure_valid {
            errors.push("required receipt fields are empty".to_string());
        }
        if !self.lamport_valid {
            errors.push("lamport is not the successor of the previous receipt".to_string());
        }
        if !self.chain_linked {
            errors.push("prev_digest does not link to the previous receipt".to_string());
        }
        errors
    }
}

/// Full report of a verification pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub checked: usize,
    /// Merkle root over everything checked, in check order (empty for receipts).
    pub merkle_root: String,
    /// Highest Lamport value seen.
    pub lamport_clock: u64,
}

impl VerificationReport {
    pub fn from_errors(errors: Vec<String>, checked: usize, merkle_root: String, lamport_clock: u64) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
            checked,
            merkle_root,
            lamport_clock,
        }
    }

    pub fn summary(&self) -> String {
        if self.is_valid {
            format!("Ledger is valid ({} checked)", self.checked)
        } else {
            format!(
                "Ledger is invalid ({} checked, {} errors): {}",
                self.checked,
                self.errors.len(),
                self.errors.first().map(String::as_str).unwrap_or("unknown error")
            )
        }
    }
}

pub struct ChainVerifier;

impl ChainVerifier {
    /// Check hash, structure and Lamport linkage of `receipt` against `prev`.
    pub fn verify_receipt(receipt: &Receipt, prev: Option<&Receipt>) -> ReceiptCheck {
        let hash_valid = receipt.verify_hash();
        let structure_valid = receipt.has_required_fields();

        let (lamport_valid, chain_linked) = match prev {
            None => (
                LamportSequencer::check(receipt.lamport, None).is_valid(),
                receipt.prev_digest.is_none(),
            ),
            Some(prev) => (
                LamportSequencer::check(receipt.lamport, Some(prev.lamport)).is_valid(),
                receipt.prev_digest.as_deref() == Some(prev.self_hash.as_str()),
            ),
        };

        ReceiptCheck {
            hash_valid,
            structure_valid,
            lamport_valid,
            chain_linked,
        }
    }

    /// Walk a receipt chain from genesis, reporting every broken receipt.
    pub fn verify_receipt_chain(receipts: &[Receipt]) -> VerificationReport {
        let mut errors = Vec::new();
        let mut prev: Option<&Receipt> = None;

        for (index, receipt) in receipts.iter().enumerate() {
            let check = Self::verify_receipt(receipt, prev);
            for error in check.errors() {
                errors.push(format!(
                    "receipt {} ({}) at index {}: {}",
                    receipt.receipt_id, receipt.receipt_type, index, error
                ));
            }
            prev = Some(receipt);
        }

        let lamport_clock = receipts.iter().map(|r| r.lamport).max().unwrap_or(0);
        let report = VerificationReport::from_errors(errors, receipts.len(), String::new(), lamport_clock);
        if report.is_valid {
            info!("Receipt chain verified: {} receipts", receipts.len());
        } else {
            warn!("Receipt chain verification failed: {}", report.summary());
        }
        report
    }

    /// Verify a range of audit records.
    ///
    /// Records are walked in ascending id order; any non-increasing Lamport
    /// value is flagged. Each block touched by the range has its Merkle root
    /// recomputed and compared against `stored_roots`. A range may cut a
    /// block, so members outside it come from `block_members`; the range's
    /// own copies take precedence. Without an entry there, only the
    /// in-range records are hashed.
    pub fn verify_range(
        records: &[AuditRecord],
        stored_roots: &HashMap<String, String>,
        block_members: &HashMap<String, Vec<AuditRecord>>,
    ) -> VerificationReport {
        if records.is_empty() {
            return VerificationReport::from_errors(
                vec!["No records found in the specified range".to_string()],
                0,
                String::new(),
                0,
            );
        }

        let mut ordered: Vec<AuditRecord> = records.to_vec();
        ordered.sort_by_key(|r| r.id);

        let mut errors = Vec::new();

        let lamports: Vec<u64> = ordered.iter().map(|r| r.lamport).collect();
        for violation in LamportSequencer::validate_sequence(&lamports) {
            errors.push(format!(
                "Lamport clock violation at record {}: {} does not exceed {}",
                ordered[violation.index].id, violation.actual, violation.previous
            ));
        }

        let mut block_order: Vec<&str> = Vec::new();
        let mut groups: HashMap<&str, BTreeMap<i64, AuditRecord>> = HashMap::new();
        for record in &ordered {
            if let Some(hash) = record.block_hash.as_deref() {
                let group = groups.entry(hash).or_insert_with(|| {
                    block_order.push(hash);
                    block_members
                        .get(hash)
                        .into_iter()
                        .flatten()
                        .map(|member| (member.id, member.clone()))
                        .collect()
                });
                group.insert(record.id, record.clone());
            }
        }

        for hash in block_order {
            let members: Vec<AuditRecord> = groups[hash].values().cloned().collect();
            let calculated = merkle_root(&members);
            match stored_roots.get(hash) {
                Some(stored) if *stored == calculated => {}
                Some(_) => errors.push(format!("Merkle root mismatch for block {}", hash)),
                None => errors.push(format!("No stored Merkle root for block {}", hash)),
            }
        }

        let lamport_clock = lamports.iter().copied().max().unwrap_or(0);
        let report =
            VerificationReport::from_errors(errors, ordered.len(), merkle_root(&ordered), lamport_clock);

        if report.is_valid {
            info!("Verified {} audit records", report.checked);
        } else {
            warn!("Audit range verification failed: {}", report.summary());
        }
        report
    }

    /// Recompute a block's hash, Lamport clock and Merkle root from its members.
    pub fn verify_block(block: &Block, members: &[AuditRecord]) -> Vec<String> {
        let mut errors = Vec::new();

        let mut by_creation = members.to_vec();
        by_creation.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        if by_creation.len() != block.record_count {
            errors.push(format!(
                "Block {} expected {} records, found {}",
                block.hash,
                block.record_count,
                by_creation.len()
            ));
        }

        let data = BlockData::new(&block.previous_hash, &by_creation, block.timestamp);
        if data.lamport_clock != block.lamport_clock {
            errors.push(format!(
                "Block {} lamport clock mismatch: stored {}, computed {}",
                block.hash, block.lamport_clock, data.lamport_clock
            ));
        }

        if data.hash() != block.hash {
            errors.push(format!("Block hash mismatch for block {}", block.hash));
        }

        let mut by_id = members.to_vec();
        by_id.sort_by_key(|r| r.id);
        if merkle_root(&by_id) != block.merkle_root {
            errors.push(format!("Merkle root mismatch for block {}", block.hash));
        }

        errors
    }

    /// Check genesis and `previousHash` linkage for one organization's blocks,
    /// oldest first.
    pub fn verify_block_chain(blocks: &[Block]) -> VerificationReport {
        let mut errors = Vec::new();

        for (index, block) in blocks.iter().enumerate() {
            let expected_previous = match index {
                0 => GENESIS_PREVIOUS_HASH,
                _ => blocks[index - 1].hash.as_str(),
            };
            if block.previous_hash != expected_previous {
                errors.push(format!(
                    "Block {} at height {} links to {}, expected {}",
                    block.hash, index, block.previous_hash, expected_previous
                ));
            }
        }

        let lamport_clock = blocks.iter().map(|b| b.lamport_clock).max().unwrap_or(0);
        VerificationReport::from_errors(errors, blocks.len(), String::new(), lamport_clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cries::CriesSnapshot;
    use crate::ledger::receipt::ReceiptChain;
    use crate::ledger::record::NewAuditRecord;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::Map;

    fn records(count: usize) -> Vec<AuditRecord> {
        let base = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        (0..count)
            .map(|i| {
                NewAuditRecord::new(7, "3", format!("ACTION_{}", i))
                    .with_created_at(base + Duration::seconds(i as i64))
                    .into_record(i as i64 + 1, i as u64)
            })
            .collect()
    }

    fn seal(records: &mut [AuditRecord], previous: &str) -> Block {
        let data = BlockData::new(previous, records, 1_700_000_000_000);
        let hash = data.hash();
        let lamport_clock = data.lamport_clock;
        let root = merkle_root(records);
        for record in records.iter_mut() {
            record.block_hash = Some(hash.clone());
        }
        Block {
            hash,
            previous_hash: previous.to_string(),
            organization_id: 7,
            lamport_clock,
            timestamp: 1_700_000_000_000,
            merkle_root: root,
            record_count: records.len(),
            metrics_data: CriesSnapshot::default(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_genesis_receipt_passes() {
        let mut chain = ReceiptChain::new("c");
        let genesis = chain.append("BOOT_CONFIRM", Map::new()).unwrap();
        assert!(ChainVerifier::verify_receipt(&genesis, None).is_valid());
    }

    #[test]
    fn test_repeated_lamport_fails() {
        let mut chain = ReceiptChain::new("c");
        let _ = chain.append("A", Map::new()).unwrap();
        let mut prev = chain.append("A", Map::new()).unwrap();
        prev.lamport = 5;
        prev.self_hash = prev.calculate_hash().unwrap();

        let mut next = prev.clone();
        next.receipt_id = "next".to_string();
        next.prev_digest = Some(prev.self_hash.clone());
        next.lamport = 5;
        next.self_hash = next.calculate_hash().unwrap();

        let check = ChainVerifier::verify_receipt(&next, Some(&prev));
        assert!(check.hash_valid);
        assert!(check.chain_linked);
        assert!(!check.lamport_valid);
        assert!(!check.is_valid());
    }

    #[test]
    fn test_non_genesis_without_predecessor_fails() {
        let mut chain = ReceiptChain::new("c");
        let _ = chain.append("A", Map::new()).unwrap();
        let second = chain.append("B", Map::new()).unwrap();
        assert!(!ChainVerifier::verify_receipt(&second, None).is_valid());
    }

    #[test]
    fn test_receipt_chain_reports_every_break() {
        let mut chain = ReceiptChain::new("c");
        let mut receipts: Vec<Receipt> =
            (0..4).map(|_| chain.append("A", Map::new()).unwrap()).collect();
        receipts[1].receipt_type = "TAMPERED".to_string();
        receipts[3].receipt_type = "TAMPERED".to_string();

        let report = ChainVerifier::verify_receipt_chain(&receipts);
        assert!(!report.is_valid);
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.checked, 4);
    }

    #[test]
    fn test_verify_range_accepts_sealed_block() {
        let mut recs = records(4);
        let block = seal(&mut recs, GENESIS_PREVIOUS_HASH);
        let roots = HashMap::from([(block.hash.clone(), block.merkle_root.clone())]);

        let report = ChainVerifier::verify_range(&recs, &roots, &HashMap::new());
        assert!(report.is_valid, "{:?}", report.errors);
        assert_eq!(report.lamport_clock, 3);
    }

    #[test]
    fn test_verify_range_collects_all_errors() {
        let mut recs = records(4);
        let block = seal(&mut recs, GENESIS_PREVIOUS_HASH);
        recs[2].lamport = 0;
        recs[3].details.insert("tampered".to_string(), serde_json::json!(true));
        let roots = HashMap::from([(block.hash.clone(), block.merkle_root.clone())]);

        let report = ChainVerifier::verify_range(&recs, &roots, &HashMap::new());
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.contains("Lamport clock violation at record 3")));
        assert!(report.errors.iter().any(|e| e.contains("Merkle root mismatch")));
    }

    #[test]
    fn test_verify_range_cutting_a_block_uses_full_membership() {
        let mut recs = records(6);
        let block = seal(&mut recs, GENESIS_PREVIOUS_HASH);
        let roots = HashMap::from([(block.hash.clone(), block.merkle_root.clone())]);
        let members = HashMap::from([(block.hash.clone(), recs.clone())]);

        let report = ChainVerifier::verify_range(&recs[2..5], &roots, &members);
        assert!(report.is_valid, "{:?}", report.errors);
        assert_eq!(report.checked, 3);

        let partial = ChainVerifier::verify_range(&recs[2..5], &roots, &HashMap::new());
        assert!(!partial.is_valid);

        let mut forged = recs[3].clone();
        forged.action = "FORGED".to_string();
        let tampered = ChainVerifier::verify_range(&[forged], &roots, &members);
        assert_eq!(
            tampered.errors,
            vec![format!("Merkle root mismatch for block {}", block.hash)]
        );
    }

    #[test]
    fn test_verify_range_empty() {
        let report = ChainVerifier::verify_range(&[], &HashMap::new(), &HashMap::new());
        assert!(!report.is_valid);
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn test_verify_block_detects_tampering() {
        let mut recs = records(3);
        let block = seal(&mut recs, GENESIS_PREVIOUS_HASH);
        assert!(ChainVerifier::verify_block(&block, &recs).is_empty());

        recs[1].action = "EDITED".to_string();
        let errors = ChainVerifier::verify_block(&block, &recs);
        assert!(errors.iter().any(|e| e.contains("Block hash mismatch")));
    }

    #[test]
    fn test_verify_block_chain_linkage() {
        let mut first = records(2);
        let genesis = seal(&mut first, GENESIS_PREVIOUS_HASH);
        let mut second: Vec<AuditRecord> = records(4).split_off(2);
        let next = seal(&mut second, &genesis.hash);

        assert!(ChainVerifier::verify_block_chain(&[genesis.clone(), next.clone()]).is_valid);

        let report = ChainVerifier::verify_block_chain(&[next, genesis]);
        assert!(!report.is_valid);
    }
}
