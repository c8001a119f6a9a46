//! Governance Receipts
//!
//! Hash-chained, Lamport-stamped records of single governance events.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::error::LedgerError;
use crate::ledger::hash::hash_receipt;
use crate::ledger::lamport::LamportSequencer;

pub const REQUIRED_RECEIPT_FIELDS: [&str; 7] = [
    "receipt_id",
    "receipt_type",
    "conversation_id",
    "lamport",
    "prev_digest",
    "self_hash",
    "timestamp",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub receipt_id: String,
    pub receipt_type: String,
    pub conversation_id: String,
    pub lamport: u64,
    /// `None` only on the genesis receipt.
    pub prev_digest: Option<String>,
    pub self_hash: String,
    pub timestamp: String,
    /// Any further fields; hashed along with the fixed ones.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Receipt {
    /// Parse an untyped receipt, rejecting one that lacks a required field.
    ///
    /// `prev_digest` must be present but may be `null`; every other
    /// required field must be present and non-null.
    pub fn from_value(value: Value) -> Result<Self, LedgerError> {
        let map = value.as_object().ok_or_else(|| {
            LedgerError::ValidationError("Receipt must be a JSON object".to_string())
        })?;

        let missing: Vec<&str> = REQUIRED_RECEIPT_FIELDS
            .iter()
            .copied()
            .filter(|field| match map.get(*field) {
                None => true,
                Some(Value::Null) => *field != "prev_digest",
                Some(_) => false,
            })
            .collect();

        if !missing.is_empty() {
            return Err(LedgerError::missing_receipt_fields(&missing));
        }

        serde_json::from_value(value)
            .map_err(|e| LedgerError::ValidationError(format!("Malformed receipt: {}", e)))
    }

    /// Required string fields are non-empty.
    pub fn has_required_fields(&self) -> bool {
        [
            &self.receipt_id,
            &self.receipt_type,
            &self.conversation_id,
            &self.self_hash,
            &self.timestamp,
        ]
        .iter()
        .all(|field| !field.is_empty())
            && self.prev_digest.as_deref().map_or(true, |d| !d.is_empty())
    }

    pub fn is_genesis(&self) -> bool {
        self.lamport == 0 && self.prev_digest.is_none()
    }

    pub fn calculate_hash(&self) -> Result<String, LedgerError> {
        hash_receipt(self)
    }

    pub fn verify_hash(&self) -> bool {
        self.calculate_hash()
            .map(|hash| hash == self.self_hash)
            .unwrap_or(false)
    }
}

/// Builds a receipt chain for one conversation, one receipt at a time.
#[derive(Debug, Clone)]
pub struct ReceiptChain {
    conversation_id: String,
    head: Option<Receipt>,
}

impl ReceiptChain {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            head: None,
        }
    }

    /// Continue an existing chain from its latest receipt.
    pub fn resume(conversation_id: impl Into<String>, head: Option<Receipt>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            head,
        }
    }

    pub fn head(&self) -> Option<&Receipt> {
        self.head.as_ref()
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn append(
        &mut self,
        receipt_type: &str,
        payload: Map<String, Value>,
    ) -> Result<Receipt, LedgerError> {
        let lamport = LamportSequencer::stamp(self.head.as_ref().map(|h| h.lamport))
            .ok_or_else(|| {
                LedgerError::ValidationError(format!(
                    "Conversation {}: lamport clock exhausted",
                    self.conversation_id
                ))
            })?;
        let prev_digest = self.head.as_ref().map(|h| h.self_hash.clone());

        let mut receipt = Receipt {
            receipt_id: Uuid::new_v4().to_string(),
            receipt_type: receipt_type.to_string(),
            conversation_id: self.conversation_id.clone(),
            lamport,
            prev_digest,
            self_hash: String::new(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            payload,
        };
        receipt.self_hash = receipt.calculate_hash()?;

        debug!(
            "Appended {} receipt {} at lamport {}",
            receipt.receipt_type, receipt.receipt_id, receipt.lamport
        );

        self.head = Some(receipt.clone());
        Ok(receipt)
    }
}
