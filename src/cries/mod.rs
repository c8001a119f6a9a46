//! CRIES Scoring
//!
//! Five bounded quality scores (Completeness, Reliability, Integrity,
//! Effectiveness, Security) for single exchanges and for record batches,
//! plus Tri-Track aggregation and the Omega drift rule.

pub mod aggregate;
pub mod batch;
pub mod scorer;
pub mod snapshot;

pub use aggregate::{check_thresholds, compute_sigma, update_omega, ThresholdReport, TriTrackWeights};
pub use batch::score_records;
pub use scorer::{Citation, CriesScorer, Intent, PolicyChecker, ScoringInput};
pub use snapshot::{clamp_round, Cries, CriesSnapshot};
