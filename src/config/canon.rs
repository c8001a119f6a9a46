//! Canon configuration loader
//! Loads the CRIES canon (component thresholds, reliability coefficients,
//! Tri-Track weights and Omega parameters) from a YAML file

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::cries::TriTrackWeights;
use crate::error::LedgerError;

pub const COMPONENT_KEYS: [&str; 5] = ["C", "R", "I", "E", "S"];

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ComponentSpec {
    pub label: String,
    pub threshold_warning: f64,
    pub threshold_block: f64,
    #[serde(default)]
    pub computed_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct ReliabilityParams {
    pub r0: f64,
    pub unverified_penalty: f64,
    pub fail_penalty: f64,
}

impl Default for ReliabilityParams {
    fn default() -> Self {
        Self {
            r0: 0.95,
            unverified_penalty: 0.30,
            fail_penalty: 0.10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct OmegaParams {
    pub eta: f64,
    pub gamma_b: f64,
    pub sigma_star: f64,
}

impl Default for OmegaParams {
    fn default() -> Self {
        Self {
            eta: 0.1,
            gamma_b: 0.15,
            sigma_star: 0.15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CanonConfig {
    /// Keyed by component letter (`C`, `R`, `I`, `E`, `S`).
    #[serde(default)]
    pub components: BTreeMap<String, ComponentSpec>,
    #[serde(default)]
    pub reliability: ReliabilityParams,
    #[serde(default)]
    pub tri_track: TriTrackWeights,
    #[serde(default)]
    pub omega: OmegaParams,
}

impl Default for CanonConfig {
    fn default() -> Self {
        let labels = [
            ("C", "Completeness", "Track-A"),
            ("R", "Reliability", "Track-A"),
            ("I", "Integrity", "Track-B"),
            ("E", "Effectiveness", "Track-C"),
            ("S", "Security", "Track-B"),
        ];

        let components = labels
            .iter()
            .map(|(key, label, track)| {
                (
                    key.to_string(),
                    ComponentSpec {
                        label: label.to_string(),
                        threshold_warning: 0.70,
                        threshold_block: 0.50,
                        computed_by: Some(track.to_string()),
                    },
                )
            })
            .collect();

        Self {
            components,
            reliability: ReliabilityParams::default(),
            tri_track: TriTrackWeights::default(),
            omega: OmegaParams::default(),
        }
    }
}

impl CanonConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, LedgerError> {
        info!("Loading CRIES canon from: {:?}", path);

        if !path.exists() {
            return Err(LedgerError::ConfigError(format!(
                "Canon file not found: {:?}",
                path
            )));
        }

        let contents = fs::read_to_string(path).map_err(|e| {
            LedgerError::ConfigError(format!("Failed to read {:?}: {}", path, e))
        })?;

        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, LedgerError> {
        let canon: CanonConfig = serde_yaml::from_str(contents)
            .map_err(|e| LedgerError::ConfigError(format!("Failed to parse canon: {}", e)))?;
        canon.validate()?;
        Ok(canon)
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        for (key, spec) in &self.components {
            if !COMPONENT_KEYS.contains(&key.as_str()) {
                return Err(LedgerError::ConfigError(format!(
                    "Unknown CRIES component in canon: {}",
                    key
                )));
            }

            let in_range = |v: f64| (0.0..=1.0).contains(&v);
            if !in_range(spec.threshold_warning) || !in_range(spec.threshold_block) {
                return Err(LedgerError::ConfigError(format!(
                    "Component {} thresholds must lie in [0, 1]",
                    key
                )));
            }

            if spec.threshold_block > spec.threshold_warning {
                return Err(LedgerError::ConfigError(format!(
                    "Component {}: block threshold {} exceeds warning threshold {}",
                    key, spec.threshold_block, spec.threshold_warning
                )));
            }
        }

        self.tri_track.validate()?;
        Ok(())
    }

    pub fn component(&self, key: &str) -> Option<&ComponentSpec> {
        self.components.get(key)
    }
}
