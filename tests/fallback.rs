use std::time::Duration;

use wt_cache::prelude::*;
use wt_cache::test::fixtures::change;
use wt_cache::test::fixtures::test_config;
use wt_cache::test::fixtures::test_engine;
use wt_cache::test::fixtures::TestEngine;
use wt_cache::test::init_tracing;
use wt_cache::test::Fault;
use wt_cache::test::StoreOp;

async fn seeded(config: EngineConfig, doc: &Document) -> (TestEngine, Locator) {
    let engine = test_engine(config).unwrap();
    let locator = engine.writer().write_document(doc, &OpContext::new()).await.unwrap();
    (engine, locator)
}

#[tokio::test]
async fn hits_are_served_from_the_cache() {
    init_tracing();
    let doc = change("CHG-1", &["hts"], 1000);
    let (engine, locator) = seeded(test_config(), &doc).await;

    let read = engine
        .reader()
        .get_document_with_fallback("CHG-1", &locator, &OpContext::new())
        .await
        .unwrap();
    assert_eq!(read, doc);
    assert_eq!(engine.primary().faults().calls(StoreOp::Get), 0);
}

#[tokio::test]
async fn reported_miss_reads_through_and_backfills() {
    init_tracing();
    let doc = change("CHG-1", &["hts"], 1000);
    let (engine, locator) = seeded(test_config(), &doc).await;
    let cache_store = engine.cache().store();
    let cache_faults = cache_store.faults();
    let puts = cache_faults.calls(StoreOp::Put);
    // The entry is there, but the store claims otherwise once.
    cache_faults.fail_next(StoreOp::Get, Fault::NotFound, 1);

    let read = engine
        .reader()
        .get_document_with_fallback("CHG-1", &locator, &OpContext::new())
        .await
        .unwrap();
    assert_eq!(read, doc);
    assert_eq!(engine.primary().faults().calls(StoreOp::Get), 1);
    assert_eq!(cache_faults.calls(StoreOp::Put), puts + 1);

    let entry = engine.cache().get("CHG-1", &OpContext::new()).await.unwrap();
    assert_eq!(engine.cache().converter().from_entry(&entry).unwrap(), doc);
}

#[tokio::test(start_paused = true)]
async fn unavailable_cache_degrades_to_primary() {
    init_tracing();
    let doc = change("CHG-1", &["hts"], 1000);
    let (engine, locator) = seeded(test_config(), &doc).await;
    engine.cache().store().faults().fail_always(StoreOp::Get, Fault::Unavailable);

    let read = engine
        .reader()
        .get_document_with_fallback("CHG-1", &locator, &OpContext::new())
        .await
        .unwrap();
    assert_eq!(read, doc);
    assert_eq!(engine.primary().faults().calls(StoreOp::Get), 1);
}

#[tokio::test(start_paused = true)]
async fn backfill_failure_is_not_the_readers_problem() {
    init_tracing();
    let doc = change("CHG-1", &["hts"], 1000);
    let (engine, locator) = seeded(test_config(), &doc).await;
    engine.cache().store().inner().purge_expired(i64::MAX).await;
    engine.cache().store().faults().fail_always(StoreOp::Put, Fault::Unavailable);

    let read = engine
        .reader()
        .get_document_with_fallback("CHG-1", &locator, &OpContext::new())
        .await
        .unwrap();
    assert_eq!(read, doc);
    assert!(engine.cache().store().inner().is_empty());
}

#[tokio::test(start_paused = true)]
async fn asynchronous_backfill_lands_eventually() {
    init_tracing();
    let config = EngineConfig {
        backfill: BackfillMode::Async,
        ..test_config()
    };
    let doc = change("CHG-1", &["hts"], 1000);
    let (engine, locator) = seeded(config, &doc).await;
    engine.cache().store().inner().purge_expired(i64::MAX).await;

    engine
        .reader()
        .get_document_with_fallback("CHG-1", &locator, &OpContext::new())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(engine.cache().get("CHG-1", &OpContext::new()).await.is_ok());
}

#[tokio::test]
async fn undecodable_entries_are_replaced() {
    init_tracing();
    let doc = change("CHG-1", &["hts"], 1000);
    let (engine, locator) = seeded(test_config(), &doc).await;
    let ctx = OpContext::new();

    let mut broken = engine.cache().get("CHG-1", &ctx).await.unwrap();
    broken.serialized_document = "{\"id\": 42".to_string();
    engine.cache().store().inner().put_entry(broken).await.unwrap();

    let read = engine
        .reader()
        .get_document_with_fallback("CHG-1", &locator, &ctx)
        .await
        .unwrap();
    assert_eq!(read, doc);

    let repaired = engine.cache().get("CHG-1", &ctx).await.unwrap();
    assert_eq!(engine.cache().converter().from_entry(&repaired).unwrap(), doc);
}

#[tokio::test(start_paused = true)]
async fn both_paths_failing_is_read_failed() {
    init_tracing();
    let doc = change("CHG-1", &["hts"], 1000);
    let (engine, locator) = seeded(test_config(), &doc).await;
    engine.cache().store().faults().fail_always(StoreOp::Get, Fault::Network);
    engine.primary().faults().fail_always(StoreOp::Get, Fault::Unavailable);

    let err = engine
        .reader()
        .get_document_with_fallback("CHG-1", &locator, &OpContext::new())
        .await
        .unwrap_err();

    match err {
        CacheError::ReadFailed { id, cache, source } => {
            assert_eq!(id, "CHG-1");
            assert!(cache.contains("network"), "cache failure: {cache}");
            assert!(matches!(*source, CacheError::Unavailable { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(engine.cache().store().faults().calls(StoreOp::Get), 3);
}

#[tokio::test(start_paused = true)]
async fn cancellation_is_not_disguised_as_read_failure() {
    init_tracing();
    let doc = change("CHG-1", &["hts"], 1000);
    let (engine, locator) = seeded(test_config(), &doc).await;
    engine.cache().store().faults().fail_next(StoreOp::Get, Fault::Hang, 1);

    let ctx = OpContext::new().with_timeout(Duration::from_secs(1));
    let err = engine
        .reader()
        .get_document_with_fallback("CHG-1", &locator, &ctx)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(engine.primary().faults().calls(StoreOp::Get), 0);
}

#[tokio::test]
async fn disabled_cache_is_never_consulted() {
    init_tracing();
    let config = EngineConfig {
        cache_enabled: false,
        ..test_config()
    };
    let doc = change("CHG-1", &["hts"], 1000);
    let (engine, locator) = seeded(config, &doc).await;

    let read = engine
        .reader()
        .get_document_with_fallback("CHG-1", &locator, &OpContext::new())
        .await
        .unwrap();
    assert_eq!(read, doc);

    let faults = engine.cache().store();
    assert_eq!(faults.faults().calls(StoreOp::Get), 0);
    assert_eq!(faults.faults().calls(StoreOp::Put), 0);
    assert!(engine.primary().inner().contains(&locator));
}
