use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::LedgerError;

pub mod canon;

pub use canon::{CanonConfig, ComponentSpec, OmegaParams, ReliabilityParams};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    /// Unblocked records required before an organization seals a block.
    pub block_threshold: usize,
    /// Upper bound on unblocked records read per seal attempt.
    pub take_window: usize,
    pub canon_path: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            server_host: "0.0.0.0".to_string(),
            server_port: 3000,
            block_threshold: 10,
            take_window: 100,
            canon_path: None,
        }
    }
}

impl AppConfig {
    /// Load from `governance.toml` (optional) and `GOVERNANCE_*` env vars.
    pub fn load() -> Result<Self, LedgerError> {
        Self::load_from("governance")
    }

    pub fn load_from(file_stem: &str) -> Result<Self, LedgerError> {
        let defaults = AppConfig::default();

        let settings = Config::builder()
            .set_default("database_url", defaults.database_url)?
            .set_default("server_host", defaults.server_host)?
            .set_default("server_port", defaults.server_port as i64)?
            .set_default("block_threshold", defaults.block_threshold as i64)?
            .set_default("take_window", defaults.take_window as i64)?
            .add_source(File::with_name(file_stem).required(false))
            .add_source(Environment::with_prefix("GOVERNANCE"))
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;

        info!(
            "Configuration loaded: threshold={}, take_window={}",
            config.block_threshold, config.take_window
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.block_threshold == 0 {
            return Err(LedgerError::ConfigError(
                "block_threshold must be at least 1".to_string(),
            ));
        }

        if self.take_window < self.block_threshold {
            return Err(LedgerError::ConfigError(format!(
                "take_window ({}) must not be smaller than block_threshold ({})",
                self.take_window, self.block_threshold
            )));
        }

        Ok(())
    }

    /// Canon from `canon_path` when set, otherwise the built-in canon.
    pub fn load_canon(&self) -> Result<CanonConfig, LedgerError> {
        match &self.canon_path {
            Some(path) => CanonConfig::load_from_file(std::path::Path::new(path)),
            None => Ok(CanonConfig::default()),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.block_threshold, 10);
        assert_eq!(config.take_window, 100);
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let config = AppConfig {
            block_threshold: 0,
            ..AppConfig::default()
        };
        assert!(matches!(config.validate(), Err(LedgerError::ConfigError(_))));
    }

    #[test]
    fn test_take_window_below_threshold_rejected() {
        let config = AppConfig {
            block_threshold: 10,
            take_window: 5,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "block_threshold = 4").unwrap();
        writeln!(file, "take_window = 8").unwrap();
        writeln!(file, "server_port = 8080").unwrap();

        let stem = dir.path().join("ledger");
        let config = AppConfig::load_from(stem.to_str().unwrap()).unwrap();
        assert_eq!(config.block_threshold, 4);
        assert_eq!(config.take_window, 8);
        assert_eq!(config.server_port, 8080);
        assert_eq!(config.database_url, "sqlite::memory:");
    }
}
