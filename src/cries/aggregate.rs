//! Tri-Track aggregation, Omega drift and canon threshold checks

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::canon::{CanonConfig, OmegaParams};
use crate::cries::snapshot::{clamp_round, Cries};
use crate::error::LedgerError;

const WEIGHT_TOLERANCE: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TriTrackWeights {
    #[serde(rename = "wA")]
    pub w_a: f64,
    #[serde(rename = "wB")]
    pub w_b: f64,
    #[serde(rename = "wC")]
    pub w_c: f64,
}

impl Default for TriTrackWeights {
    fn default() -> Self {
        Self {
            w_a: 0.4,
            w_b: 0.4,
            w_c: 0.2,
        }
    }
}

impl TriTrackWeights {
    pub fn new(w_a: f64, w_b: f64, w_c: f64) -> Self {
        Self { w_a, w_b, w_c }
    }

    pub fn sum(&self) -> f64 {
        self.w_a + self.w_b + self.w_c
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(LedgerError::invalid_weights(sum));
        }
        Ok(())
    }
}

/// Weighted σ over three independently scored tracks.
pub fn compute_sigma(
    track_a: &Cries,
    track_b: &Cries,
    track_c: &Cries,
    weights: &TriTrackWeights,
) -> Result<f64, LedgerError> {
    weights.validate()?;

    let sigma = weights.w_a * track_a.mean()
        + weights.w_b * track_b.mean()
        + weights.w_c * track_c.mean();

    debug!("Tri-Track sigma: {:.4}", sigma);
    Ok(clamp_round(sigma))
}

/// `Ω' = Ω + η·Δclarity − γB·max(0, σ − σ*)`
pub fn update_omega(omega: f64, delta_clarity: f64, sigma: f64, params: &OmegaParams) -> f64 {
    let penalty = (sigma - params.sigma_star).max(0.0);
    clamp_round(omega + params.eta * delta_clarity - params.gamma_b * penalty)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdReport {
    pub warnings: Vec<String>,
    pub blocks: Vec<String>,
}

impl ThresholdReport {
    pub fn is_blocked(&self) -> bool {
        !self.blocks.is_empty()
    }
}

/// Classify each component against the canon thresholds.
///
/// A component the canon does not describe is skipped.
pub fn check_thresholds(cries: &Cries, canon: &CanonConfig) -> ThresholdReport {
    let mut report = ThresholdReport::default();

    for (key, value) in cries.components() {
        let Some(spec) = canon.component(key) else {
            warn!("No canon thresholds for CRIES component {}, skipping", key);
            continue;
        };

        if value < spec.threshold_block {
            report.blocks.push(format!(
                "{} ({}): {:.4} < {} (BLOCK)",
                key, spec.label, value, spec.threshold_block
            ));
        } else if value < spec.threshold_warning {
            report.warnings.push(format!(
                "{} ({}): {:.4} < {} (WARNING)",
                key, spec.label, value, spec.threshold_warning
            ));
        }
    }

    report
}
