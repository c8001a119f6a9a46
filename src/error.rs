use thiserror::Error;

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(format!("JSON serialization error: {}", err))
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        Self::DatabaseError(err.to_string())
    }
}

impl From<config::ConfigError> for LedgerError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Integrity error: {0}")]
    IntegrityError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Seal conflict: {0}")]
    ConflictError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl LedgerError {
    pub fn invalid_weights(sum: f64) -> Self {
        Self::ValidationError(format!(
            "Tri-Track weights must sum to 1.0 (got {})",
            sum
        ))
    }

    pub fn missing_receipt_fields(fields: &[&str]) -> Self {
        Self::ValidationError(format!(
            "Receipt is missing required fields: {}",
            fields.join(", ")
        ))
    }

    pub fn seal_conflict(org_id: i64, claimed: usize, expected: usize) -> Self {
        Self::ConflictError(format!(
            "Organization {}: claimed {} of {} records, another seal won the race",
            org_id, claimed, expected
        ))
    }
}
