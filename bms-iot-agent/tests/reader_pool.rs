mod common;

use std::collections::HashMap;
use std::sync::Arc;

use bms_iot_agent::bacnet::balancer::Strategy;
use bms_iot_agent::bacnet::ReaderPool;

use common::{reader_config, MockFactory};

#[tokio::test]
async fn conflicting_endpoints_keep_only_the_first_reader() {
    let factory = Arc::new(MockFactory::default());
    let pool = ReaderPool::new(factory);

    let configs = vec![
        reader_config("reader-a", "10.0.1.2", 24, 47808),
        reader_config("reader-b", "10.0.1.2", 24, 47808),
        reader_config("reader-c", "10.0.1.2", 24, 47809),
    ];
    let connected = pool.initialize(&configs).await;

    assert_eq!(connected, vec!["reader-a".to_string(), "reader-c".to_string()]);

    let endpoints: Vec<(String, u16)> = pool
        .utilization()
        .into_iter()
        .map(|entry| entry.endpoint)
        .collect();
    let unique: std::collections::HashSet<_> = endpoints.iter().cloned().collect();
    assert_eq!(endpoints.len(), unique.len());
}

#[tokio::test]
async fn inactive_readers_are_skipped() {
    let factory = Arc::new(MockFactory::default());
    let pool = ReaderPool::new(factory);

    let mut inactive = reader_config("reader-b", "10.0.2.2", 24, 47808);
    inactive.is_active = false;
    let configs = vec![reader_config("reader-a", "10.0.1.2", 24, 47808), inactive];

    let connected = pool.initialize(&configs).await;
    assert_eq!(connected, vec!["reader-a".to_string()]);
    assert_eq!(pool.snapshot().len(), 1);
}

#[tokio::test]
async fn failed_connections_do_not_become_the_default() {
    let factory = Arc::new(MockFactory::default());
    factory.fail_reader("reader-a");
    let pool = ReaderPool::new(factory);

    let configs = vec![
        reader_config("reader-a", "10.0.1.2", 24, 47808),
        reader_config("reader-b", "10.0.2.2", 24, 47808),
    ];
    let connected = pool.initialize(&configs).await;

    assert_eq!(connected, vec!["reader-b".to_string()]);
    assert_eq!(pool.default_reader().unwrap().id(), "reader-b");
}

#[tokio::test]
async fn round_robin_selection_is_fair() {
    let factory = Arc::new(MockFactory::default());
    let pool = ReaderPool::new(factory);

    pool.initialize(&[
        reader_config("reader-a", "10.0.1.2", 24, 47808),
        reader_config("reader-b", "10.0.2.2", 24, 47808),
        reader_config("reader-c", "10.0.3.2", 24, 47808),
    ])
    .await;

    let mut tally: HashMap<String, usize> = HashMap::new();
    let rounds = 10;
    for _ in 0..rounds {
        let reader = pool.select_for_operation().unwrap();
        *tally.entry(reader.id().to_string()).or_default() += 1;
    }

    // 10 selections over 3 readers: every reader lands on 3 or 4.
    assert_eq!(tally.len(), 3);
    for (_, count) in tally {
        assert!(count == rounds / 3 || count == rounds / 3 + 1);
    }
}

#[tokio::test]
async fn subnet_selection_prefers_the_covering_reader() {
    let factory = Arc::new(MockFactory::default());
    let pool = ReaderPool::new(factory);

    pool.initialize(&[
        reader_config("reader-a", "10.0.1.2", 24, 47808),
        reader_config("reader-b", "10.0.2.2", 24, 47808),
    ])
    .await;

    let a = pool.select_by_subnet("10.0.1.50".parse().unwrap()).unwrap();
    assert_eq!(a.id(), "reader-a");

    let b = pool.select_by_subnet("10.0.2.50".parse().unwrap()).unwrap();
    assert_eq!(b.id(), "reader-b");

    // Off-subnet targets go through the default (first initialized) reader.
    let fallback = pool.select_by_subnet("10.0.3.50".parse().unwrap()).unwrap();
    assert_eq!(fallback.id(), "reader-a");
}

#[tokio::test]
async fn cleanup_resets_selection_state() {
    let factory = Arc::new(MockFactory::default());
    let pool = ReaderPool::new(factory);

    pool.initialize(&[
        reader_config("reader-a", "10.0.1.2", 24, 47808),
        reader_config("reader-b", "10.0.2.2", 24, 47808),
    ])
    .await;
    assert!(pool.is_initialized());

    // Advance the round-robin cursor off zero, then rebuild the pool.
    pool.select_for_operation().unwrap();
    pool.cleanup().await;
    assert!(!pool.is_initialized());
    assert!(pool.snapshot().is_empty());
    assert!(pool.default_reader().is_none());
    assert!(pool.select_for_operation().is_none());

    pool.initialize(&[reader_config("reader-c", "10.0.3.2", 24, 47808)])
        .await;
    assert_eq!(pool.select_for_operation().unwrap().id(), "reader-c");
}

#[tokio::test]
async fn available_filters_by_in_flight_ceiling() {
    let factory = Arc::new(MockFactory::default());
    let pool = ReaderPool::new(factory);

    pool.initialize(&[
        reader_config("reader-a", "10.0.1.2", 24, 47808),
        reader_config("reader-b", "10.0.2.2", 24, 47808),
    ])
    .await;

    assert_eq!(pool.available(5).len(), 2);
    // A ceiling of zero makes every idle reader count as saturated.
    assert!(pool.available(0).is_empty());
}

#[tokio::test]
async fn least_busy_strategy_picks_an_idle_reader() {
    let factory = Arc::new(MockFactory::default());
    let pool = ReaderPool::with_strategy(factory, Strategy::LeastBusy);

    pool.initialize(&[
        reader_config("reader-a", "10.0.1.2", 24, 47808),
        reader_config("reader-b", "10.0.2.2", 24, 47808),
    ])
    .await;

    // With no traffic every reader is equally idle; selection still works.
    assert!(pool.select_for_operation().is_some());
}
