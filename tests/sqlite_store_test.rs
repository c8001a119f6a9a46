//! SQLite-backed ledger tests

mod common;

use std::sync::Arc;

use governance_ledger::config::CanonConfig;
use governance_ledger::database::{Database, LedgerStore};
use governance_ledger::ledger::MAX_LAMPORT;
use governance_ledger::{GovernanceEngine, LedgerError};
use tempfile::tempdir;

use common::{setup_test_db, sqlite_engine, test_config, test_record};

#[tokio::test]
async fn test_sqlite_engine_seals_and_verifies() -> Result<(), Box<dyn std::error::Error>> {
    let engine = sqlite_engine(10).await;

    let mut sealed = None;
    for i in 0..12 {
        let (_, outcome) = engine.submit(test_record(1, i)).await?;
        if outcome.sealed.is_some() {
            sealed = outcome.sealed;
        }
    }

    let block = sealed.expect("one block after twelve records");
    assert_eq!(block.record_count, 10);

    let stored = engine.store().get_block(&block.hash).await?.expect("stored block");
    assert_eq!(stored.hash, block.hash);
    assert_eq!(stored.merkle_root, block.merkle_root);
    assert_eq!(stored.metrics_data.scores, block.metrics_data.scores);
    assert_eq!(engine.store().unblocked_records(1, 100).await?.len(), 2);

    let range = engine.verify_chain(1, None, None).await?;
    assert!(range.is_valid, "{:?}", range.errors);
    let blocks = engine.verify_blocks(1).await?;
    assert!(blocks.is_valid, "{:?}", blocks.errors);

    Ok(())
}

#[tokio::test]
async fn test_ledger_survives_reopen() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let url = format!("sqlite://{}", dir.path().join("ledger.db").display());

    {
        let db = Database::new(&url).await?;
        let engine =
            GovernanceEngine::new(test_config(5), CanonConfig::default(), Arc::new(db))?;
        for i in 0..7 {
            engine.submit(test_record(3, i)).await?;
        }
    }

    let db = Database::new(&url).await?;
    let engine = GovernanceEngine::new(test_config(5), CanonConfig::default(), Arc::new(db))?;

    assert_eq!(engine.store().latest_lamport(3).await?, Some(6));
    let next = engine.ingest(test_record(3, 7)).await?;
    assert_eq!(next.lamport, 7);

    let blocks = engine.store().blocks(3).await?;
    assert_eq!(blocks.len(), 1);
    assert!(engine.verify_blocks(3).await?.is_valid);

    Ok(())
}

#[tokio::test]
async fn test_oversized_lamport_is_refused_not_stored() -> Result<(), Box<dyn std::error::Error>> {
    let engine = sqlite_engine(10).await;
    engine.submit(test_record(1, 0)).await?;

    let err = engine
        .submit(test_record(1, 1).with_lamport(u64::MAX))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::ValidationError(_)), "{}", err);

    // The organization's reads and stamping are unaffected.
    assert_eq!(engine.store().latest_lamport(1).await?, Some(0));
    let (next, _) = engine.submit(test_record(1, 2)).await?;
    assert_eq!(next.lamport, 1);
    assert_eq!(engine.store().records_in_range(1, None, None).await?.len(), 2);
    assert!(engine.verify_chain(1, None, None).await?.is_valid);

    let db = setup_test_db().await;
    assert!(matches!(
        db.insert_record(test_record(2, 0), MAX_LAMPORT + 1).await,
        Err(LedgerError::ValidationError(_))
    ));
    let top = db.insert_record(test_record(2, 1), MAX_LAMPORT).await?;
    assert_eq!(db.get_record(top.id).await?.map(|r| r.lamport), Some(MAX_LAMPORT));

    Ok(())
}
