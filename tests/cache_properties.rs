// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 缓存与限流的行为性质测试
//!
//! 每个测试覆盖一组输入，而不是单个样例。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::join_all;
use serde_json::{Value, json};

use cachet::backend::{BackingStore, FallbackBackend, MemoryBackend};
use cachet::cache::{
    CacheOptions, EntryStore, RefreshCoordinator, RefreshSettings, StoreLimits,
};
use cachet::rate_limit::RateLimiter;

const TTL: Duration = Duration::from_secs(60);

fn samples() -> Vec<Value> {
    vec![
        json!(null),
        json!(true),
        json!(-17),
        json!(3.25),
        json!(""),
        json!("多语言 text ✓"),
        json!([]),
        json!([1, [2, [3, {"deep": null}]]]),
        json!({}),
        json!({"title": "Graph neural networks", "citations": 128, "open_access": false,
               "authors": [{"name": "Ng", "orcid": null}]}),
    ]
}

#[tokio::test(start_paused = true)]
async fn test_value_visible_until_ttl_elapses() {
    for ttl_ms in [1u64, 10, 999, 1_000, 60_000] {
        let store = EntryStore::new(StoreLimits::unbounded());
        let ttl = Duration::from_millis(ttl_ms);
        store.set("k", json!(ttl_ms), ttl, Vec::new()).await;

        tokio::time::advance(ttl - Duration::from_millis(1)).await;
        assert_eq!(store.get("k").await, Some(json!(ttl_ms)), "ttl {}ms", ttl_ms);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(store.get("k").await, None, "ttl {}ms", ttl_ms);
        assert!(store.get_stale("k").await.unwrap().is_stale);
    }
}

#[tokio::test]
async fn test_set_then_get_returns_equal_value() {
    let store = EntryStore::new(StoreLimits::unbounded());
    for (i, value) in samples().into_iter().enumerate() {
        let key = format!("sample:{}", i);
        store.set(&key, value.clone(), TTL, Vec::new()).await;
        assert_eq!(store.get(&key).await, Some(value));
    }
}

#[tokio::test]
async fn test_repeated_invalidation_removes_nothing_more() {
    let store = EntryStore::new(StoreLimits::unbounded());
    for i in 0..20 {
        let tags = if i % 2 == 0 {
            vec!["even".to_string(), "all".to_string()]
        } else {
            vec!["all".to_string()]
        };
        store.set(&format!("k{}", i), json!(i), TTL, tags).await;
    }

    assert_eq!(store.invalidate_by_tags(&["even"]).await, 10);
    for _ in 0..5 {
        assert_eq!(store.invalidate_by_tags(&["even"]).await, 0);
    }
    assert_eq!(store.invalidate_by_tags(&["all"]).await, 10);
    assert_eq!(store.invalidate_by_tags(&["all", "even"]).await, 0);
}

#[tokio::test]
async fn test_tag_invalidation_scenario() {
    let store = EntryStore::new(StoreLimits::unbounded());
    store
        .set("K1", json!("v"), TTL, vec!["a".to_string(), "b".to_string()])
        .await;
    store.set("K2", json!("v"), TTL, vec!["b".to_string()]).await;

    assert_eq!(store.invalidate_by_tags(&["a"]).await, 1);
    assert!(store.get("K1").await.is_none());
    assert!(store.get("K2").await.is_some());

    assert_eq!(store.invalidate_by_tags(&["b"]).await, 1);
    assert!(store.get("K2").await.is_none());
    assert!(store.stats().await.tags.is_empty());
}

#[tokio::test]
async fn test_lru_boundary_for_various_capacities() {
    for capacity in [1usize, 2, 5, 16] {
        let store = EntryStore::new(StoreLimits::entries(capacity));
        for i in 0..=capacity {
            store.set(&format!("k{}", i), json!(i), TTL, Vec::new()).await;
        }

        assert!(store.get("k0").await.is_none(), "capacity {}", capacity);
        for i in 1..=capacity {
            assert_eq!(
                store.get(&format!("k{}", i)).await,
                Some(json!(i)),
                "capacity {}",
                capacity
            );
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_stale_reads_fetch_once_regardless_of_concurrency() {
    for callers in [1usize, 4, 32] {
        let store = Arc::new(EntryStore::new(StoreLimits::unbounded()));
        let coordinator = RefreshCoordinator::new(
            store.clone(),
            Arc::new(MemoryBackend::new()),
            RefreshSettings::default(),
        );
        store
            .set("k", json!("before"), Duration::from_secs(1), Vec::new())
            .await;
        tokio::time::advance(Duration::from_secs(2)).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let options = CacheOptions::with_ttl_seconds(60);
        let reads = (0..callers).map(|_| {
            let calls = calls.clone();
            coordinator.read_through("k", &options, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(json!("after"))
            })
        });

        for result in join_all(reads).await {
            assert_eq!(result.unwrap(), json!("before"), "{} callers", callers);
        }
        assert!(coordinator.drain(Duration::from_secs(1)).await);
        assert_eq!(calls.load(Ordering::SeqCst), 1, "{} callers", callers);
        assert_eq!(store.get("k").await, Some(json!("after")));
    }
}

#[tokio::test(start_paused = true)]
async fn test_fixed_window_sequence() {
    let limiter = RateLimiter::new(Arc::new(MemoryBackend::new()));
    let window = Duration::from_millis(1000);

    let mut allowed = Vec::new();
    for _ in 0..4 {
        allowed.push(limiter.check("user:7", 3, window).await.unwrap().allowed);
        tokio::time::advance(Duration::from_millis(200)).await;
    }
    assert_eq!(allowed, vec![true, true, true, false]);

    tokio::time::advance(Duration::from_millis(1000)).await;
    let fifth = limiter.check("user:7", 3, window).await.unwrap();
    assert!(fifth.allowed);
    assert_eq!(fifth.count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_limiter_windows_shared_across_instances() {
    let shared: Arc<dyn BackingStore> = Arc::new(MemoryBackend::new());
    let first = RateLimiter::new(shared.clone());
    let second = RateLimiter::new(shared);
    let window = Duration::from_secs(10);

    assert!(first.check("ip:1", 2, window).await.unwrap().allowed);
    assert!(second.check("ip:1", 2, window).await.unwrap().allowed);
    assert!(!first.check("ip:1", 2, window).await.unwrap().allowed);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_lease_shared_across_instances() {
    let backend: Arc<dyn BackingStore> = Arc::new(FallbackBackend::new(Arc::new(
        MemoryBackend::new(),
    )));
    let calls = Arc::new(AtomicUsize::new(0));
    let options = CacheOptions::with_ttl_seconds(60);

    let mut instances = Vec::new();
    for _ in 0..3 {
        let store = Arc::new(EntryStore::new(StoreLimits::unbounded()));
        store
            .set("k", json!("before"), Duration::from_secs(1), Vec::new())
            .await;
        instances.push(RefreshCoordinator::new(
            store,
            backend.clone(),
            RefreshSettings::default(),
        ));
    }
    tokio::time::advance(Duration::from_secs(2)).await;

    for coordinator in &instances {
        let calls = calls.clone();
        let value = coordinator
            .read_through("k", &options, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(json!("after"))
            })
            .await
            .unwrap();
        assert_eq!(value, json!("before"));
    }
    for coordinator in &instances {
        assert!(coordinator.drain(Duration::from_secs(1)).await);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
