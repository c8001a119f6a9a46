//! Receipt Log
//!
//! Append-only JSONL file of governance receipts. Every append is checked
//! against the current head so the file on disk is always a valid chain.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::LedgerError;
use crate::ledger::receipt::Receipt;
use crate::ledger::verify::ChainVerifier;

#[derive(Clone)]
pub struct ReceiptLog {
    log_path: PathBuf,
    file: Arc<Mutex<File>>,
    head: Arc<Mutex<Option<Receipt>>>,
    entry_count: Arc<Mutex<u64>>,
}

impl ReceiptLog {
    /// Open (or create) a log, re-verifying any receipts already on disk.
    pub fn open(log_path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let log_path = log_path.as_ref().to_path_buf();

        if let Some(parent) = log_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    LedgerError::ConfigError(format!("Failed to create log directory: {}", e))
                })?;
            }
        }

        let existing = if log_path.exists() {
            load_receipts_from_file(&log_path)?
        } else {
            Vec::new()
        };

        let report = ChainVerifier::verify_receipt_chain(&existing);
        if !report.is_valid {
            return Err(LedgerError::IntegrityError(format!(
                "Receipt log {:?} failed verification: {}",
                log_path,
                report.errors.join("; ")
            )));
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| LedgerError::ConfigError(format!("Failed to open receipt log: {}", e)))?;

        info!("Opened receipt log {:?} with {} receipts", log_path, existing.len());

        Ok(Self {
            log_path,
            file: Arc::new(Mutex::new(file)),
            entry_count: Arc::new(Mutex::new(existing.len() as u64)),
            head: Arc::new(Mutex::new(existing.into_iter().last())),
        })
    }

    /// Append a receipt that must extend the current head.
    pub async fn append(&self, receipt: Receipt) -> Result<(), LedgerError> {
        let mut head = self.head.lock().await;

        let check = ChainVerifier::verify_receipt(&receipt, head.as_ref());
        if !check.is_valid() {
            warn!(
                "Rejected receipt {} at lamport {}: {}",
                receipt.receipt_id,
                receipt.lamport,
                check.errors().join("; ")
            );
            return Err(LedgerError::IntegrityError(format!(
                "Receipt {} does not extend the log head: {}",
                receipt.receipt_id,
                check.errors().join("; ")
            )));
        }

        let json = serde_json::to_string(&receipt)?;
        {
            let mut file = self.file.lock().await;
            writeln!(file, "{}", json)
                .map_err(|e| LedgerError::DatabaseError(format!("Failed to write receipt: {}", e)))?;
            file.flush()
                .map_err(|e| LedgerError::DatabaseError(format!("Failed to flush receipt log: {}", e)))?;
        }

        *self.entry_count.lock().await += 1;
        debug!("Appended receipt {} (lamport {})", receipt.receipt_id, receipt.lamport);
        *head = Some(receipt);
        Ok(())
    }

    pub async fn head(&self) -> Option<Receipt> {
        self.head.lock().await.clone()
    }

    pub async fn entry_count(&self) -> u64 {
        *self.entry_count.lock().await
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }

    pub async fn all_receipts(&self) -> Result<Vec<Receipt>, LedgerError> {
        load_receipts_from_file(&self.log_path)
    }
}

/// Read every receipt from a JSONL file, skipping blank lines.
pub fn load_receipts_from_file(path: &Path) -> Result<Vec<Receipt>, LedgerError> {
    let file = File::open(path)
        .map_err(|e| LedgerError::NotFound(format!("Failed to open receipt log {:?}: {}", path, e)))?;

    let reader = BufReader::new(file);
    let mut receipts = Vec::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| {
            LedgerError::SerializationError(format!("Failed to read line {}: {}", line_num + 1, e))
        })?;

        if line.trim().is_empty() {
            continue;
        }

        let value: serde_json::Value = serde_json::from_str(&line).map_err(|e| {
            LedgerError::SerializationError(format!(
                "Failed to parse receipt at line {}: {}",
                line_num + 1,
                e
            ))
        })?;
        receipts.push(Receipt::from_value(value)?);
    }

    debug!("Loaded {} receipts from {:?}", receipts.len(), path);
    Ok(receipts)
}
