use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Clamp to [0, 1] and round to 4 decimals; NaN scores as 0.
pub fn clamp_round(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    (value.clamp(0.0, 1.0) * 10_000.0).round() / 10_000.0
}

/// The five CRIES component scores.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Cries {
    #[serde(rename = "C")]
    pub c: f64,
    #[serde(rename = "R")]
    pub r: f64,
    #[serde(rename = "I")]
    pub i: f64,
    #[serde(rename = "E")]
    pub e: f64,
    #[serde(rename = "S")]
    pub s: f64,
}

impl Cries {
    pub fn new(c: f64, r: f64, i: f64, e: f64, s: f64) -> Self {
        Self {
            c: clamp_round(c),
            r: clamp_round(r),
            i: clamp_round(i),
            e: clamp_round(e),
            s: clamp_round(s),
        }
    }

    pub fn components(&self) -> [(&'static str, f64); 5] {
        [
            ("C", self.c),
            ("R", self.r),
            ("I", self.i),
            ("E", self.e),
            ("S", self.s),
        ]
    }

    /// Unweighted mean of the five components.
    pub fn mean(&self) -> f64 {
        (self.c + self.r + self.i + self.e + self.s) / 5.0
    }
}

/// A CRIES result as stored on a block or returned to callers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriesSnapshot {
    #[serde(flatten)]
    pub scores: Cries,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall: Option<f64>,
    #[serde(rename = "Omega", default, skip_serializing_if = "Option::is_none")]
    pub omega: Option<f64>,
    pub records_analyzed: usize,
    pub timestamp: DateTime<Utc>,
}

impl CriesSnapshot {
    pub fn new(scores: Cries, records_analyzed: usize) -> Self {
        Self {
            overall: Some(clamp_round(scores.mean())),
            scores,
            omega: None,
            records_analyzed,
            timestamp: Utc::now(),
        }
    }

    pub fn with_omega(mut self, omega: f64) -> Self {
        self.omega = Some(clamp_round(omega));
        self
    }
}
