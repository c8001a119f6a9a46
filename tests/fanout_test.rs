//! Subscriber filtering and push tests

mod common;

use governance_ledger::fanout::{AuditUpdate, PushEvent, SubscriberFilter};

use common::{base_time, memory_engine, test_record};

fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<PushEvent>) -> Vec<PushEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_subscribers_see_record_then_block_events() -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _store) = memory_engine(3);
    let (_id, mut rx) = engine
        .subscribers()
        .register(SubscriberFilter::for_org(1))
        .await;

    for i in 0..3 {
        engine.submit(test_record(1, i)).await?;
    }

    let kinds: Vec<&str> = drain(&mut rx).iter().map(PushEvent::kind).collect();
    assert_eq!(
        kinds,
        vec!["RECORD_CREATED", "RECORD_CREATED", "BLOCK_CREATED", "metrics-update"]
    );

    Ok(())
}

#[tokio::test]
async fn test_block_event_carries_trigger_and_metrics() -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _store) = memory_engine(2);
    let (_id, mut rx) = engine
        .subscribers()
        .register(SubscriberFilter::for_org(1))
        .await;

    engine.submit(test_record(1, 0)).await?;
    let (trigger, outcome) = engine.submit(test_record(1, 1)).await?;
    let block = outcome.sealed.expect("sealed on second record");

    let events = drain(&mut rx);
    match &events[1] {
        PushEvent::Audit(AuditUpdate::BlockCreated { record, block_hash }) => {
            assert_eq!(record.id, trigger.id);
            assert_eq!(block_hash, &block.hash);
        }
        other => panic!("expected BLOCK_CREATED, got {:?}", other),
    }
    match &events[2] {
        PushEvent::Metrics(update) => {
            assert_eq!(update.block_hash, block.hash);
            assert_eq!(update.metrics, block.metrics_data);
            assert_eq!(update.metrics.records_analyzed, 2);
        }
        other => panic!("expected metrics-update, got {:?}", other),
    }

    Ok(())
}

#[tokio::test]
async fn test_filters_select_subscribers() -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _store) = memory_engine(10);
    let registry = engine.subscribers();

    let (everyone, mut everyone_rx) = registry.register(SubscriberFilter::for_org(1)).await;
    let (_other_org, mut other_org_rx) = registry.register(SubscriberFilter::for_org(2)).await;
    let (_wrong_user, mut wrong_user_rx) = registry
        .register(SubscriberFilter::for_org(1).with_user("user-2"))
        .await;
    let (_wrong_action, mut wrong_action_rx) = registry
        .register(SubscriberFilter::for_org(1).with_event_type("LOGIN"))
        .await;
    let (_too_late, mut too_late_rx) = registry
        .register(
            SubscriberFilter::for_org(1)
                .between(Some(base_time() + chrono::Duration::hours(1)), None),
        )
        .await;
    let (windowed, mut windowed_rx) = registry
        .register(SubscriberFilter::for_org(1).between(
            Some(base_time() - chrono::Duration::hours(1)),
            Some(base_time() + chrono::Duration::hours(1)),
        ))
        .await;

    let (_, outcome) = engine.submit(test_record(1, 0)).await?;

    assert_eq!(outcome.events_for(everyone).len(), 1);
    assert_eq!(outcome.events_for(windowed).len(), 1);
    assert_eq!(outcome.pushed.len(), 2);

    assert_eq!(drain(&mut everyone_rx).len(), 1);
    assert_eq!(drain(&mut windowed_rx).len(), 1);
    assert!(drain(&mut other_org_rx).is_empty());
    assert!(drain(&mut wrong_user_rx).is_empty());
    assert!(drain(&mut wrong_action_rx).is_empty());
    assert!(drain(&mut too_late_rx).is_empty());

    Ok(())
}

#[tokio::test]
async fn test_blocks_form_without_subscribers() -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _store) = memory_engine(2);

    engine.submit(test_record(5, 0)).await?;
    let (_, outcome) = engine.submit(test_record(5, 1)).await?;

    assert!(outcome.sealed.is_some());
    assert!(outcome.pushed.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_disconnected_subscriber_is_pruned() -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _store) = memory_engine(10);
    let (_id, rx) = engine
        .subscribers()
        .register(SubscriberFilter::for_org(1))
        .await;
    drop(rx);

    engine.submit(test_record(1, 0)).await?;
    assert!(engine.subscribers().is_empty().await);
    Ok(())
}
