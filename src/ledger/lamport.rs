//! Lamport Sequencing
//!
//! Stamps and validates the per-lineage logical counter. Violations are
//! reported to the caller, never corrected here.

use serde::{Deserialize, Serialize};

/// Outcome of checking one Lamport stamp against its predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LamportCheck {
    Genesis,
    Valid,
    /// No predecessor exists but the stamp is not 0.
    MissingPredecessor { actual: u64 },
    /// Stamp moved forward by more than one.
    Gap { expected: u64, actual: u64 },
    /// Stamp did not move forward at all.
    Regression { previous: u64, actual: u64 },
}

impl LamportCheck {
    pub fn is_valid(&self) -> bool {
        matches!(self, LamportCheck::Genesis | LamportCheck::Valid)
    }

    pub fn describe(&self) -> String {
        match self {
            LamportCheck::Genesis => "genesis".to_string(),
            LamportCheck::Valid => "valid".to_string(),
            LamportCheck::MissingPredecessor { actual } => {
                format!("lamport {} has no predecessor (genesis must be 0)", actual)
            }
            LamportCheck::Gap { expected, actual } => {
                format!("lamport gap: expected {}, got {}", expected, actual)
            }
            LamportCheck::Regression { previous, actual } => {
                format!("lamport regression: {} does not follow {}", actual, previous)
            }
        }
    }
}

/// Position in a sequence where the Lamport value failed to increase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LamportViolation {
    pub index: usize,
    pub previous: u64,
    pub actual: u64,
}

/// Largest stamp the record stores can persist (SQLite INTEGER is signed).
pub const MAX_LAMPORT: u64 = i64::MAX as u64;

pub struct LamportSequencer;

impl LamportSequencer {
    /// `current + 1`, or `None` once the counter is exhausted.
    pub fn next(current: u64) -> Option<u64> {
        current.checked_add(1)
    }

    /// Stamp for the next event given the lineage's latest stamp, if any.
    pub fn stamp(latest: Option<u64>) -> Option<u64> {
        match latest {
            None => Some(0),
            Some(latest) => Self::next(latest),
        }
    }

    /// Exact-successor check: `lamport == previous + 1`, or `0` with no predecessor.
    pub fn check(lamport: u64, previous: Option<u64>) -> LamportCheck {
        match previous {
            None if lamport == 0 => LamportCheck::Genesis,
            None => LamportCheck::MissingPredecessor { actual: lamport },
            Some(prev) if Some(lamport) == Self::next(prev) => LamportCheck::Valid,
            Some(prev) if lamport <= prev => LamportCheck::Regression {
                previous: prev,
                actual: lamport,
            },
            // lamport > prev here, so prev has a successor
            Some(prev) => LamportCheck::Gap {
                expected: prev + 1,
                actual: lamport,
            },
        }
    }

    /// Every index whose value does not strictly exceed its predecessor.
    pub fn validate_sequence(lamports: &[u64]) -> Vec<LamportViolation> {
        lamports
            .windows(2)
            .enumerate()
            .filter(|(_, pair)| pair[1] <= pair[0])
            .map(|(i, pair)| LamportViolation {
                index: i + 1,
                previous: pair[0],
                actual: pair[1],
            })
            .collect()
    }
}
