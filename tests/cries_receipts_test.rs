//! CRIES scoring and receipt chain tests

mod common;

use serde_json::{json, Map};
use tempfile::tempdir;

use governance_ledger::cries::{Cries, ScoringInput, TriTrackWeights};
use governance_ledger::ledger::{ChainVerifier, ReceiptChain, ReceiptLog};
use governance_ledger::LedgerError;

use common::memory_engine;

fn assert_bounded(cries: &Cries) {
    for (key, value) in cries.components() {
        assert!((0.0..=1.0).contains(&value), "{} out of range: {}", key, value);
        assert_eq!((value * 10_000.0).round() / 10_000.0, value, "{} not rounded", key);
    }
}

#[test]
fn test_exchange_scores_are_bounded() {
    let (engine, _store) = memory_engine(10);
    let mut chain = ReceiptChain::new("conv-bounds");
    let genesis = chain.append("BOOT_CONFIRM", Map::new()).unwrap();
    let receipt = chain.append("ANALYSIS", Map::new()).unwrap();

    let cases = [
        ("", ""),
        ("Explain the budget.", "The budget covers staffing and tooling [1]."),
        ("List the risks", "1. Delay\n2. Cost overrun\n3. Scope creep"),
    ];

    for (prompt, response) in cases {
        let snapshot = engine.score_exchange(&ScoringInput {
            prompt,
            response,
            receipt: &receipt,
            prev_receipt: Some(&genesis),
            citations: &[],
        });
        assert_bounded(&snapshot.scores);
        assert_eq!(snapshot.scores.i, 1.0);
    }
}

#[test]
fn test_broken_receipt_link_zeroes_integrity() {
    let (engine, _store) = memory_engine(10);
    let mut chain = ReceiptChain::new("conv-broken");
    let genesis = chain.append("BOOT_CONFIRM", Map::new()).unwrap();
    let mut receipt = chain.append("ANALYSIS", Map::new()).unwrap();
    receipt.prev_digest = Some("f".repeat(64));

    let snapshot = engine.score_exchange(&ScoringInput {
        prompt: "Summarize",
        response: "Summary.",
        receipt: &receipt,
        prev_receipt: Some(&genesis),
        citations: &[],
    });
    assert_eq!(snapshot.scores.i, 0.0);

    let report = engine.check_thresholds(&snapshot.scores);
    assert!(report.blocks.iter().any(|b| b.starts_with("I (Integrity)")));
}

#[test]
fn test_tri_track_weights_validation() {
    let (engine, _store) = memory_engine(10);
    let track = Cries::new(0.9, 0.8, 1.0, 0.7, 1.0);

    let err = engine
        .compute_sigma(&track, &track, &track, Some(&TriTrackWeights::new(0.5, 0.3, 0.3)))
        .unwrap_err();
    assert!(matches!(err, LedgerError::ValidationError(_)));

    let sigma = engine.compute_sigma(&track, &track, &track, None).unwrap();
    assert_eq!(sigma, 0.88);

    let omega = engine.update_omega(0.5, 0.2, sigma);
    // 0.5 + 0.1 * 0.2 - 0.15 * (0.88 - 0.15)
    assert_eq!(omega, 0.4105);
}

#[tokio::test]
async fn test_receipt_log_round_trip_verifies() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let path = dir.path().join("logs").join("receipts.jsonl");

    let log = ReceiptLog::open(&path)?;
    let mut chain = ReceiptChain::new("conv-log");
    for step in ["BOOT_CONFIRM", "ANALYSIS", "RESULT"] {
        let mut payload = Map::new();
        payload.insert("step".to_string(), json!(step));
        log.append(chain.append(step, payload)?).await?;
    }

    let receipts = log.all_receipts().await?;
    let report = ChainVerifier::verify_receipt_chain(&receipts);
    assert!(report.is_valid, "{:?}", report.errors);
    assert_eq!(report.checked, 3);
    assert_eq!(report.lamport_clock, 2);

    // Resume from the persisted head.
    let reopened = ReceiptLog::open(&path)?;
    let mut resumed = ReceiptChain::resume("conv-log", reopened.head().await);
    reopened.append(resumed.append("AUDIT", Map::new())?).await?;
    assert_eq!(reopened.entry_count().await, 4);

    Ok(())
}
