//! Governance Engine
//!
//! Explicitly constructed façade over the ledger: one instance per
//! deployment, carrying its own configuration and store. Exposes the
//! operations collaborators call: ingest, scoring, sealing, verification
//! and the per-record fanout.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{AppConfig, CanonConfig};
use crate::cries::{
    check_thresholds, compute_sigma, score_records, update_omega, Cries, CriesScorer,
    CriesSnapshot, PolicyChecker, ScoringInput, ThresholdReport, TriTrackWeights,
};
use crate::database::LedgerStore;
use crate::error::LedgerError;
use crate::fanout::{FanoutOutcome, NotificationFanout, SubscriberRegistry};
use crate::ledger::block::Block;
use crate::ledger::former::BlockFormer;
use crate::ledger::lamport::{LamportSequencer, MAX_LAMPORT};
use crate::ledger::record::{AuditRecord, NewAuditRecord, OrgId};
use crate::ledger::verify::{ChainVerifier, VerificationReport};

pub const LAMPORT_VIOLATION_KEY: &str = "lamportViolation";

pub struct GovernanceEngine {
    config: AppConfig,
    canon: CanonConfig,
    store: Arc<dyn LedgerStore>,
    scorer: CriesScorer,
    former: Arc<BlockFormer>,
    fanout: NotificationFanout,
}

impl GovernanceEngine {
    pub fn new(
        config: AppConfig,
        canon: CanonConfig,
        store: Arc<dyn LedgerStore>,
    ) -> Result<Self, LedgerError> {
        config.validate()?;
        canon.validate()?;

        let scorer = CriesScorer::new(canon.reliability);
        let former = Arc::new(BlockFormer::new(
            store.clone(),
            config.block_threshold,
            config.take_window,
        ));
        let fanout = NotificationFanout::new(Arc::new(SubscriberRegistry::new()), former.clone());

        info!(
            "Governance engine ready (threshold {}, take window {})",
            config.block_threshold, config.take_window
        );

        Ok(Self {
            config,
            canon,
            store,
            scorer,
            former,
            fanout,
        })
    }

    pub fn with_policy(mut self, policy: Arc<dyn PolicyChecker>) -> Self {
        self.scorer = self.scorer.with_policy(policy);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn canon(&self) -> &CanonConfig {
        &self.canon
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn subscribers(&self) -> &Arc<SubscriberRegistry> {
        self.fanout.registry()
    }

    /// Store a new record with a Lamport stamp.
    ///
    /// A record without a stamp gets the organization's next value. A
    /// supplied stamp is kept; if it is not the exact successor, the check
    /// result is recorded under `metadata.lamportViolation`. Stamps above
    /// [`MAX_LAMPORT`] are rejected, as is stamping past it.
    pub async fn ingest(&self, mut record: NewAuditRecord) -> Result<AuditRecord, LedgerError> {
        let org_id = record.organization_id;
        let _guard = self.former.lock_org(org_id).await;

        let latest = self.store.latest_lamport(org_id).await?;
        let lamport = match record.lamport {
            None => LamportSequencer::stamp(latest)
                .filter(|lamport| *lamport <= MAX_LAMPORT)
                .ok_or_else(|| {
                    LedgerError::ValidationError(format!(
                        "Organization {}: lamport clock exhausted",
                        org_id
                    ))
                })?,
            Some(lamport) if lamport > MAX_LAMPORT => {
                return Err(LedgerError::ValidationError(format!(
                    "Organization {}: lamport {} exceeds {}",
                    org_id, lamport, MAX_LAMPORT
                )));
            }
            Some(lamport) => {
                let check = LamportSequencer::check(lamport, latest);
                if !check.is_valid() {
                    warn!("Org {} record {}: {}", org_id, record.action, check.describe());
                    record
                        .metadata
                        .insert(LAMPORT_VIOLATION_KEY.to_string(), serde_json::to_value(check)?);
                }
                lamport
            }
        };

        self.store.insert_record(record, lamport).await
    }

    /// Ingest a record, then run block formation and fanout for it.
    pub async fn submit(
        &self,
        record: NewAuditRecord,
    ) -> Result<(AuditRecord, FanoutOutcome), LedgerError> {
        let stored = self.ingest(record).await?;
        let outcome = self.on_new_record(&stored).await;
        Ok((stored, outcome))
    }

    pub async fn on_new_record(&self, record: &AuditRecord) -> FanoutOutcome {
        self.fanout.on_new_record(record).await
    }

    pub async fn seal_if_ready(&self, org_id: OrgId) -> Result<Option<Block>, LedgerError> {
        self.former.seal_if_ready(org_id).await
    }

    /// Batch CRIES snapshot over `records` in the order given.
    pub fn score_records(&self, records: &[AuditRecord]) -> CriesSnapshot {
        score_records(records)
    }

    /// CRIES snapshot for a single prompt/response exchange.
    pub fn score_exchange(&self, input: &ScoringInput<'_>) -> CriesSnapshot {
        CriesSnapshot::new(self.scorer.score(input), 1)
    }

    pub fn check_thresholds(&self, cries: &Cries) -> ThresholdReport {
        check_thresholds(cries, &self.canon)
    }

    /// Tri-Track σ; the canon's weights apply when none are given.
    pub fn compute_sigma(
        &self,
        track_a: &Cries,
        track_b: &Cries,
        track_c: &Cries,
        weights: Option<&TriTrackWeights>,
    ) -> Result<f64, LedgerError> {
        compute_sigma(
            track_a,
            track_b,
            track_c,
            weights.unwrap_or(&self.canon.tri_track),
        )
    }

    pub fn update_omega(&self, omega: f64, delta_clarity: f64, sigma: f64) -> f64 {
        update_omega(omega, delta_clarity, sigma, &self.canon.omega)
    }

    /// Re-check Lamport order and block Merkle roots over an organization's
    /// records created within `[start, end]`. Blocks the range only partly
    /// covers are checked against their full stored membership.
    pub async fn verify_chain(
        &self,
        org_id: OrgId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<VerificationReport, LedgerError> {
        let records = self.store.records_in_range(org_id, start, end).await?;
        let stored_roots: HashMap<String, String> = self
            .store
            .blocks(org_id)
            .await?
            .into_iter()
            .map(|block| (block.hash, block.merkle_root))
            .collect();

        let touched: BTreeSet<&str> = records
            .iter()
            .filter_map(|record| record.block_hash.as_deref())
            .collect();
        let mut block_members = HashMap::with_capacity(touched.len());
        for hash in touched {
            block_members.insert(hash.to_string(), self.store.records_in_block(hash).await?);
        }

        Ok(ChainVerifier::verify_range(&records, &stored_roots, &block_members))
    }

    /// Re-derive every block of an organization from its members and check
    /// the `previousHash` chain.
    pub async fn verify_blocks(&self, org_id: OrgId) -> Result<VerificationReport, LedgerError> {
        let blocks = self.store.blocks(org_id).await?;
        let chain = ChainVerifier::verify_block_chain(&blocks);

        let mut errors = chain.errors;
        for block in &blocks {
            let members = self.store.records_in_block(&block.hash).await?;
            errors.extend(ChainVerifier::verify_block(block, &members));
        }

        let report =
            VerificationReport::from_errors(errors, blocks.len(), String::new(), chain.lamport_clock);
        if report.is_valid {
            info!("Org {}: {} blocks verified", org_id, blocks.len());
        } else {
            warn!("Org {} block verification failed: {}", org_id, report.summary());
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;

    fn engine(threshold: usize) -> GovernanceEngine {
        let config = AppConfig {
            block_threshold: threshold,
            ..AppConfig::default()
        };
        GovernanceEngine::new(config, CanonConfig::default(), Arc::new(MemoryStore::new())).unwrap()
    }

    #[tokio::test]
    async fn test_ingest_stamps_consecutive_lamports() {
        let engine = engine(10);
        let first = engine.ingest(NewAuditRecord::new(1, "u", "A")).await.unwrap();
        let second = engine.ingest(NewAuditRecord::new(1, "u", "B")).await.unwrap();
        let other_org = engine.ingest(NewAuditRecord::new(2, "u", "C")).await.unwrap();

        assert_eq!(first.lamport, 0);
        assert_eq!(second.lamport, 1);
        assert_eq!(other_org.lamport, 0);
    }

    #[tokio::test]
    async fn test_ingest_flags_supplied_gap() {
        let engine = engine(10);
        engine.ingest(NewAuditRecord::new(1, "u", "A")).await.unwrap();
        let skipped = engine
            .ingest(NewAuditRecord::new(1, "u", "B").with_lamport(5))
            .await
            .unwrap();

        assert_eq!(skipped.lamport, 5);
        assert_eq!(skipped.metadata[LAMPORT_VIOLATION_KEY]["kind"], "gap");
    }

    #[tokio::test]
    async fn test_ingest_rejects_unstorable_lamport() {
        let engine = engine(10);
        engine.ingest(NewAuditRecord::new(1, "u", "A")).await.unwrap();

        for lamport in [u64::MAX, MAX_LAMPORT + 1] {
            let err = engine
                .ingest(NewAuditRecord::new(1, "u", "B").with_lamport(lamport))
                .await
                .unwrap_err();
            assert!(matches!(err, LedgerError::ValidationError(_)), "{}", err);
        }

        let next = engine.ingest(NewAuditRecord::new(1, "u", "C")).await.unwrap();
        assert_eq!(next.lamport, 1);
    }

    #[tokio::test]
    async fn test_ingest_at_clock_ceiling() {
        let engine = engine(10);
        let last = engine
            .ingest(NewAuditRecord::new(1, "u", "A").with_lamport(MAX_LAMPORT))
            .await
            .unwrap();
        assert_eq!(last.lamport, MAX_LAMPORT);

        let err = engine.ingest(NewAuditRecord::new(1, "u", "B")).await.unwrap_err();
        assert!(matches!(err, LedgerError::ValidationError(_)));

        let regressed = engine
            .ingest(NewAuditRecord::new(1, "u", "C").with_lamport(MAX_LAMPORT))
            .await
            .unwrap();
        assert_eq!(regressed.metadata[LAMPORT_VIOLATION_KEY]["kind"], "regression");
    }

    #[tokio::test]
    async fn test_verify_after_seal() {
        let engine = engine(3);
        for _ in 0..4 {
            engine.submit(NewAuditRecord::new(1, "u", "A")).await.unwrap();
        }

        let report = engine.verify_chain(1, None, None).await.unwrap();
        assert!(report.is_valid, "{:?}", report.errors);
        assert_eq!(report.checked, 4);

        let blocks = engine.verify_blocks(1).await.unwrap();
        assert!(blocks.is_valid, "{:?}", blocks.errors);
        assert_eq!(blocks.checked, 1);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = AppConfig {
            block_threshold: 0,
            ..AppConfig::default()
        };
        assert!(matches!(
            GovernanceEngine::new(config, CanonConfig::default(), Arc::new(MemoryStore::new())),
            Err(LedgerError::ConfigError(_))
        ));
    }
}
