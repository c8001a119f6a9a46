//! Batch CRIES scoring
//!
//! Structural heuristics over a batch of audit records, used for the
//! metrics snapshot stored on every sealed block.

use crate::cries::snapshot::{Cries, CriesSnapshot};
use crate::ledger::record::AuditRecord;

const HASH_POINTER_LEN: usize = 64;

/// Score a batch in the order given (the seal order for block metrics).
///
/// An empty batch is vacuously perfect.
pub fn score_records(records: &[AuditRecord]) -> CriesSnapshot {
    if records.is_empty() {
        return CriesSnapshot::new(Cries::new(1.0, 1.0, 1.0, 1.0, 1.0), 0);
    }

    let scores = Cries::new(
        ordering_consistency(records),
        share(records, |r| !r.metadata.is_empty()),
        hash_pointer_integrity(records),
        share(records, |r| {
            !r.details.is_empty() && has_text(&r.category) && !r.action.is_empty()
        }),
        share(records, |r| {
            !r.user_id.is_empty() && has_text(&r.category) && has_text(&r.status)
        }),
    );

    CriesSnapshot::new(scores, records.len())
}

fn has_text(value: &Option<String>) -> bool {
    value.as_deref().map_or(false, |v| !v.is_empty())
}

fn share(records: &[AuditRecord], predicate: impl Fn(&AuditRecord) -> bool) -> f64 {
    records.iter().filter(|r| predicate(r)).count() as f64 / records.len() as f64
}

/// Mean of the Lamport-order and time-order scores; each counts adjacent
/// pairs that fail to strictly increase.
fn ordering_consistency(records: &[AuditRecord]) -> f64 {
    let total = records.len() as f64;
    let lamport_violations = records
        .windows(2)
        .filter(|pair| pair[1].lamport <= pair[0].lamport)
        .count() as f64;
    let time_violations = records
        .windows(2)
        .filter(|pair| pair[1].created_at <= pair[0].created_at)
        .count() as f64;

    ((1.0 - lamport_violations / total) + (1.0 - time_violations / total)) / 2.0
}

fn hash_pointer_integrity(records: &[AuditRecord]) -> f64 {
    let well_formed = |r: &AuditRecord| {
        r.hash_pointer
            .as_deref()
            .map_or(false, |p| p.len() == HASH_POINTER_LEN)
    };

    if records.len() == 1 {
        return if well_formed(&records[0]) { 1.0 } else { 0.0 };
    }

    let linked = records
        .windows(2)
        .filter(|pair| pair[0].hash_pointer.is_some() && well_formed(&pair[1]))
        .count() as f64;

    linked / (records.len() - 1) as f64
}
