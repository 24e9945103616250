use std::sync::Arc;
use std::time::Duration;

use wt_cache::prelude::*;
use wt_cache::test::fixtures::announcement;
use wt_cache::test::fixtures::change;
use wt_cache::test::fixtures::test_config;
use wt_cache::test::fixtures::test_engine;
use wt_cache::test::init_tracing;
use wt_cache::test::Fault;
use wt_cache::test::StoreOp;
use wt_cache::ItemConverter;

#[tokio::test]
async fn documents_are_indexed_under_their_primary_customer_only() {
    init_tracing();
    let engine = test_engine(test_config()).unwrap();
    let ctx = OpContext::new();
    engine
        .writer()
        .write_document(&change("CHG-1", &["hts", "cds"], 1000), &ctx)
        .await
        .unwrap();

    let hts = engine
        .cache()
        .query_by_customer_and_time("hts", 0, 2000, &ctx)
        .try_collect::<Vec<_>>()
        .await
        .unwrap();
    assert_eq!(hts.len(), 1);
    assert_eq!(hts[0].id, "CHG-1");
    assert_eq!(hts[0].primary_customer, "hts");
    assert_eq!(hts[0].customers, vec!["hts", "cds"]);
    assert_eq!(hts[0].expires_at, 1000 + 90 * SECONDS_PER_DAY);

    let cds = engine
        .cache()
        .query_by_customer_and_time("cds", 0, 2000, &ctx)
        .try_collect::<Vec<_>>()
        .await
        .unwrap();
    assert!(cds.is_empty());
}

#[tokio::test]
async fn type_and_status_queries_have_inclusive_bounds() {
    init_tracing();
    let engine = test_engine(test_config()).unwrap();
    let ctx = OpContext::new();
    for doc in [
        change("CHG-1", &["hts"], 100),
        change("CHG-2", &["hts"], 200).with_status("approved"),
        change("CHG-3", &["cds"], 300),
        announcement("ANN-1", &["hts"], 200),
    ] {
        engine.writer().write_document(&doc, &ctx).await.unwrap();
    }

    let changes = engine
        .cache()
        .query_by_time_range(DocumentType::Change, 100, 300, &ctx)
        .map_ok(|entry| entry.id)
        .try_collect::<Vec<_>>()
        .await
        .unwrap();
    assert_eq!(changes, vec!["CHG-1", "CHG-2", "CHG-3"]);

    let exact = engine
        .cache()
        .query_by_time_range(DocumentType::Announcement, 200, 200, &ctx)
        .try_collect::<Vec<_>>()
        .await
        .unwrap();
    assert_eq!(exact.len(), 1);

    let drafts = engine
        .cache()
        .query_by_status_and_time("draft", 0, 1000, &ctx)
        .map_ok(|entry| entry.id)
        .try_collect::<Vec<_>>()
        .await
        .unwrap();
    assert_eq!(drafts, vec!["CHG-1", "ANN-1", "CHG-3"]);
}

#[tokio::test(start_paused = true)]
async fn throttled_pages_are_retried() {
    init_tracing();
    let config = EngineConfig {
        page_size: 2,
        ..test_config()
    };
    let engine = test_engine(config).unwrap();
    let ctx = OpContext::new();
    for i in 0..5 {
        engine
            .writer()
            .write_document(&change(&format!("CHG-{i}"), &["hts"], i), &ctx)
            .await
            .unwrap();
    }

    engine.cache().store().faults().fail_next(StoreOp::Query, Fault::Throttle, 2);
    let all = engine
        .cache()
        .query_by_customer_and_time("hts", 0, 10, &ctx)
        .try_collect::<Vec<_>>()
        .await
        .unwrap();

    assert_eq!(all.len(), 5);
    // Three pages plus two throttled attempts.
    assert_eq!(engine.cache().store().faults().calls(StoreOp::Query), 5);
}

#[tokio::test]
async fn unavailable_cache_fails_the_query() {
    init_tracing();
    let engine = test_engine(test_config()).unwrap();
    engine.cache().store().faults().fail_always(StoreOp::Query, Fault::Unavailable);

    let outcome = engine
        .cache()
        .query_by_customer_and_time("hts", 0, 10, &OpContext::new())
        .try_collect::<Vec<_>>()
        .await;
    assert!(matches!(outcome, Err(CacheError::Unavailable { .. })));
}

#[tokio::test]
async fn ttl_expiry_never_touches_the_primary_store() {
    init_tracing();
    let engine = test_engine(test_config()).unwrap();
    let ctx = OpContext::new();
    let doc = change("CHG-1", &["hts"], 1000);
    let locator = engine.writer().write_document(&doc, &ctx).await.unwrap();

    let purged = engine
        .cache()
        .store()
        .inner()
        .purge_expired(1000 + 90 * SECONDS_PER_DAY)
        .await;
    assert_eq!(purged, 1);
    assert!(engine.cache().get("CHG-1", &ctx).await.unwrap_err().is_not_found());
    assert!(engine.primary().inner().contains(&locator));

    // The next read rebuilds the entry from the primary store.
    let read = engine
        .reader()
        .get_document_with_fallback("CHG-1", &locator, &ctx)
        .await
        .unwrap();
    assert_eq!(read, doc);
    assert!(engine.cache().get("CHG-1", &ctx).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn sweeper_purges_in_the_background() {
    init_tracing();
    let store = Arc::new(MemoryCacheStore::builder().name("swept").build().unwrap());
    let converter = ItemConverter::default();
    // Created at the dawn of the epoch, long expired by the wall clock.
    store
        .put_entry(converter.to_entry(&change("CHG-1", &["hts"], 1000)).unwrap())
        .await
        .unwrap();

    let sweeper = store.spawn_ttl_sweeper(Duration::from_secs(60));
    tokio::time::sleep(Duration::from_secs(1)).await;
    sweeper.abort();

    assert!(store.is_empty());
    for index in Index::ALL {
        assert_eq!(store.index_len(index), 0);
    }
}
