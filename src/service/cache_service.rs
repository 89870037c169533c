// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::backend::BackingStore;
use crate::cache::{
    CacheOptions, CacheStats, EntryStore, EvictionTarget, RefreshCoordinator, RefreshSettings,
    FetchResult, SetOutcome, StaleRead, StoreLimits, WarmupEntry, WarmupRegistry, WarmupReport,
    WarmupSource,
};
use crate::config::CacheSettings;
use crate::error::CacheError;
use crate::metrics::PrometheusCollector;
use crate::utils::{MAX_KEY_LENGTH, MAX_TAGS_PER_ENTRY};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 管理操作结果
///
/// 管理接口只返回结果对象，不向调用方抛出错误。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct AdminOutcome {
    pub success: bool,
    /// 受影响的条目数（删除、淘汰或加载）
    pub affected: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AdminOutcome {
    fn ok(affected: usize) -> Self {
        Self {
            success: true,
            affected,
            failed: 0,
            message: None,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            affected: 0,
            failed: 0,
            message: Some(message.into()),
        }
    }
}

/// 缓存服务
///
/// 进程启动时通过 `init` 构造，关闭时调用 `flush_and_close`。
pub struct CacheService {
    store: Arc<EntryStore>,
    refresh: RefreshCoordinator,
    backend: Arc<dyn BackingStore>,
    metrics: Option<Arc<PrometheusCollector>>,
    warmup_sources: RwLock<WarmupRegistry>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    settings: CacheSettings,
}

impl CacheService {
    pub fn init(
        settings: CacheSettings,
        backend: Arc<dyn BackingStore>,
        metrics: Option<Arc<PrometheusCollector>>,
    ) -> Result<Self, CacheError> {
        settings.validate()?;

        let store = Arc::new(EntryStore::new(StoreLimits {
            max_entries: Some(settings.max_entries),
            max_bytes: Some(settings.max_bytes),
        }));
        let refresh_settings = RefreshSettings {
            fetch_timeout: Duration::from_millis(settings.fetch_timeout_ms),
            lease_ttl: Duration::from_millis(settings.refresh_lease_ms),
        };
        let refresh = match &metrics {
            Some(metrics) => RefreshCoordinator::with_metrics(
                store.clone(),
                backend.clone(),
                refresh_settings,
                metrics.clone(),
            ),
            None => RefreshCoordinator::new(store.clone(), backend.clone(), refresh_settings),
        };

        info!(
            "Cache initialized: max_entries={}, max_bytes={}, backend={:?}",
            settings.max_entries,
            settings.max_bytes,
            backend.kind()
        );

        Ok(Self {
            store,
            refresh,
            backend,
            metrics,
            warmup_sources: RwLock::new(WarmupRegistry::new()),
            sweeper: Mutex::new(None),
            settings,
        })
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn backend(&self) -> Arc<dyn BackingStore> {
        self.backend.clone()
    }

    /// 默认写入选项
    pub fn default_options(&self) -> CacheOptions {
        CacheOptions::with_ttl_seconds(self.settings.default_ttl_seconds)
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        validate_key(key)?;
        let value = self.store.get(key).await;
        self.record_lookup(if value.is_some() { "hit" } else { "miss" });
        Ok(value)
    }

    pub async fn get_stale(&self, key: &str) -> Result<Option<StaleRead>, CacheError> {
        validate_key(key)?;
        let read = self.store.get_stale(key).await;
        self.record_lookup(match &read {
            Some(read) if read.is_stale => "stale",
            Some(_) => "hit",
            None => "miss",
        });
        Ok(read)
    }

    pub async fn set(
        &self,
        key: &str,
        value: Value,
        options: &CacheOptions,
    ) -> Result<SetOutcome, CacheError> {
        validate_key(key)?;
        validate_options(options)?;

        let outcome = self
            .store
            .set(key, value, options.ttl, options.tags.iter().cloned())
            .await;
        if outcome.evicted > 0
            && let Some(metrics) = &self.metrics
        {
            metrics.record_evictions(outcome.evicted);
        }
        Ok(outcome)
    }

    pub async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        validate_key(key)?;
        Ok(self.store.delete(key).await)
    }

    pub async fn read_through<F, Fut>(
        &self,
        key: &str,
        options: &CacheOptions,
        fetch: F,
    ) -> Result<Value, CacheError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = FetchResult> + Send + 'static,
    {
        validate_key(key)?;
        validate_options(options)?;
        self.refresh.read_through(key, options, fetch).await
    }

    /// 预热一批条目；键或选项不合法的条目直接计入失败
    pub async fn warmup(&self, entries: Vec<WarmupEntry>) -> WarmupReport {
        let mut rejected = Vec::new();
        let mut valid = Vec::with_capacity(entries.len());
        for entry in entries {
            match validate_key(&entry.key).and_then(|_| validate_options(&entry.options)) {
                Ok(()) => valid.push(entry),
                Err(e) => {
                    warn!("Skipping warmup entry '{}': {}", entry.key, e);
                    rejected.push(entry.key);
                }
            }
        }

        let mut report = self.refresh.warmup(valid).await;
        report.failed.extend(rejected);
        report
    }

    pub async fn is_refreshing(&self, key: &str) -> bool {
        self.refresh.is_refreshing(key).await
    }

    pub async fn keys_for_tag(&self, tag: &str) -> Vec<String> {
        self.store.keys_for_tag(tag).await
    }

    fn record_lookup(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_lookup(outcome);
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let stats = self.store.stats().await;
        if let Some(metrics) = &self.metrics {
            metrics.set_cache_size(stats.entries, stats.total_bytes);
        }
        stats
    }

    /// 同步容量指标
    pub async fn refresh_gauges(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.set_cache_size(self.store.len().await, self.store.total_bytes().await);
        }
    }

    pub async fn clear_all(&self) -> AdminOutcome {
        let removed = self.store.clear().await;
        info!("Cache cleared: {} entries removed", removed);
        self.refresh_gauges().await;
        AdminOutcome::ok(removed)
    }

    pub async fn invalidate_tags(&self, tags: &[String]) -> AdminOutcome {
        let tags: Vec<&str> = tags
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect();
        if tags.is_empty() {
            return AdminOutcome::failed("at least one tag is required");
        }

        let removed = self.store.invalidate_by_tags(&tags).await;
        info!("Invalidated {} entries for tags {:?}", removed, tags);
        self.refresh_gauges().await;
        AdminOutcome::ok(removed)
    }

    /// 管理端淘汰：按 LRU 顺序淘汰到目标条目数或字节数
    pub async fn purge_lru(&self, target: EvictionTarget) -> AdminOutcome {
        if target.max_entries.is_none() && target.max_bytes.is_none() {
            return AdminOutcome::failed("an entry or byte target is required");
        }

        let evicted = self.store.evict_until(target).await;
        if evicted > 0
            && let Some(metrics) = &self.metrics
        {
            metrics.record_evictions(evicted);
        }
        info!("LRU purge evicted {} entries", evicted);
        self.refresh_gauges().await;
        AdminOutcome::ok(evicted)
    }

    pub async fn register_warmup_source(
        &self,
        category: impl Into<String>,
        source: Arc<dyn WarmupSource>,
    ) {
        let category = category.into();
        debug!("Registered warmup source '{}'", category);
        self.warmup_sources.write().await.register(category, source);
    }

    pub async fn warmup_categories(&self) -> Vec<String> {
        self.warmup_sources.read().await.categories()
    }

    pub async fn warmup_category(&self, category: &str) -> AdminOutcome {
        let Some(source) = self.warmup_sources.read().await.get(category) else {
            warn!("Warmup requested for unknown category '{}'", category);
            return AdminOutcome::failed(format!("unknown warmup category '{}'", category));
        };

        let entries = match source.entries().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Warmup source '{}' failed: {:#}", category, e);
                return AdminOutcome::failed(format!("warmup source '{}' failed", category));
            }
        };

        let report = self.warmup(entries).await;
        self.refresh_gauges().await;
        AdminOutcome {
            success: report.failed.is_empty(),
            affected: report.loaded.len(),
            failed: report.failed.len(),
            message: None,
        }
    }

    /// 启动过期条目清理任务，重复调用会替换旧任务
    ///
    /// 同时回收后端中过期的限流窗口和刷新租约。
    pub async fn spawn_sweeper(&self) {
        let store = self.store.clone();
        let backend = self.backend.clone();
        let metrics = self.metrics.clone();
        let interval = Duration::from_secs(self.settings.sweep_interval_seconds);
        let grace = Duration::from_secs(self.settings.stale_grace_seconds);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = store.purge_expired(grace).await;
                if purged > 0 {
                    debug!("Sweeper removed {} expired entries", purged);
                }
                let reclaimed = backend.purge_expired().await;
                if reclaimed > 0 {
                    debug!("Sweeper reclaimed {} expired backend keys", reclaimed);
                }
                if let Some(metrics) = &metrics {
                    metrics.set_cache_size(store.len().await, store.total_bytes().await);
                }
            }
        });

        if let Some(previous) = self.sweeper.lock().await.replace(handle) {
            previous.abort();
        }
    }

    /// 停止后台任务，等待进行中的回源，然后清空本地状态
    pub async fn flush_and_close(&self) {
        if let Some(sweeper) = self.sweeper.lock().await.take() {
            sweeper.abort();
        }

        let grace = Duration::from_millis(self.settings.shutdown_grace_ms);
        if !self.refresh.drain(grace).await {
            warn!(
                "{} fetch tasks still running after {:?}, abandoning them",
                self.refresh.in_flight_count().await,
                grace
            );
        }

        let removed = self.store.clear().await;
        info!("Cache closed, {} entries released", removed);
    }
}

fn validate_key(key: &str) -> Result<(), CacheError> {
    if key.is_empty() {
        return Err(CacheError::InvalidInput("key must not be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(CacheError::InvalidInput(format!(
            "key exceeds {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}

fn validate_options(options: &CacheOptions) -> Result<(), CacheError> {
    if options.ttl.is_zero() {
        return Err(CacheError::InvalidInput("ttl must be positive".to_string()));
    }
    if options.tags.len() > MAX_TAGS_PER_ENTRY {
        return Err(CacheError::InvalidInput(format!(
            "at most {} tags per entry",
            MAX_TAGS_PER_ENTRY
        )));
    }
    if options.tags.iter().any(|t| t.trim().is_empty()) {
        return Err(CacheError::InvalidInput("tags must not be blank".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::cache::StaticWarmupSource;
    use crate::utils::{RATE_LIMIT_NAMESPACE, backend_key};
    use crate::config::WarmupSeed;
    use serde_json::json;

    fn service(settings: CacheSettings) -> CacheService {
        CacheService::init(settings, Arc::new(MemoryBackend::new()), None).unwrap()
    }

    #[test]
    fn test_init_rejects_invalid_settings() {
        let settings = CacheSettings {
            max_entries: 0,
            ..Default::default()
        };
        assert!(matches!(
            CacheService::init(settings, Arc::new(MemoryBackend::new()), None),
            Err(CacheError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = service(CacheSettings::default());
        let options = cache.default_options().with_tags(["a"]);

        cache.set("k", json!({"v": 1}), &options).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(json!({"v": 1})));
        assert!(cache.delete("k").await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_input_validation() {
        let cache = service(CacheSettings::default());
        assert!(matches!(
            cache.get("").await,
            Err(CacheError::InvalidInput(_))
        ));
        let long_key = "k".repeat(MAX_KEY_LENGTH + 1);
        assert!(cache.get(&long_key).await.is_err());

        let zero_ttl = CacheOptions::new(Duration::ZERO);
        assert!(cache.set("k", json!(1), &zero_ttl).await.is_err());

        let blank_tag = cache.default_options().with_tags([" "]);
        assert!(cache.set("k", json!(1), &blank_tag).await.is_err());
    }

    #[tokio::test]
    async fn test_admin_operations_report_outcomes() {
        let cache = service(CacheSettings::default());
        let options = cache.default_options().with_tags(["a"]);
        for i in 0..4 {
            cache
                .set(&format!("k{}", i), json!(i), &options)
                .await
                .unwrap();
        }

        let purged = cache.purge_lru(StoreLimits::entries(3)).await;
        assert!(purged.success);
        assert_eq!(purged.affected, 1);

        let missing_target = cache.purge_lru(StoreLimits::unbounded()).await;
        assert!(!missing_target.success);

        let invalidated = cache.invalidate_tags(&["a".to_string()]).await;
        assert_eq!(invalidated.affected, 3);
        assert!(!cache.invalidate_tags(&[]).await.success);

        cache.set("x", json!(1), &options).await.unwrap();
        let cleared = cache.clear_all().await;
        assert_eq!(cleared.affected, 1);
        assert_eq!(cache.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn test_warmup_category() {
        let cache = service(CacheSettings::default());
        let seeds = vec![WarmupSeed {
            key: "landing".to_string(),
            value: json!({"hero": "hi"}),
            ttl_seconds: None,
            tags: vec!["pages".to_string()],
        }];
        cache
            .register_warmup_source(
                "config",
                Arc::new(StaticWarmupSource::new(seeds, Duration::from_secs(60))),
            )
            .await;

        let outcome = cache.warmup_category("config").await;
        assert!(outcome.success);
        assert_eq!(outcome.affected, 1);
        assert_eq!(cache.keys_for_tag("pages").await, vec!["landing".to_string()]);

        let unknown = cache.warmup_category("nope").await;
        assert!(!unknown.success);
        assert!(unknown.message.unwrap().contains("nope"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_removes_entries_past_grace() {
        let settings = CacheSettings {
            sweep_interval_seconds: 1,
            stale_grace_seconds: 5,
            ..Default::default()
        };
        let cache = service(settings);
        cache
            .set("k", json!(1), &CacheOptions::with_ttl_seconds(1))
            .await
            .unwrap();
        cache.spawn_sweeper().await;

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(cache.get_stale("k").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(cache.get_stale("k").await.unwrap().is_none());

        cache.flush_and_close().await;
    }

    #[tokio::test]
    async fn test_flush_and_close_clears_state() {
        let cache = service(CacheSettings::default());
        cache
            .set("k", json!(1), &cache.default_options())
            .await
            .unwrap();
        cache.flush_and_close().await;
        assert_eq!(cache.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn test_lookups_are_recorded_in_metrics() {
        let metrics = Arc::new(PrometheusCollector::new().unwrap());
        let cache = CacheService::init(
            CacheSettings::default(),
            Arc::new(MemoryBackend::new()),
            Some(metrics.clone()),
        )
        .unwrap();
        cache
            .set("k", json!(1), &cache.default_options())
            .await
            .unwrap();

        cache.get("k").await.unwrap();
        cache.get("missing").await.unwrap();
        cache.get_stale("k").await.unwrap();

        let text = metrics.export().unwrap();
        assert!(text.contains("cache_hits_total 2"));
        assert!(text.contains("cache_misses_total 1"));
    }

    #[tokio::test]
    async fn test_warmup_rejects_invalid_entries() {
        let cache = service(CacheSettings::default());
        let options = cache.default_options();
        let entries = vec![
            WarmupEntry::new("good", options.clone(), async { Ok(json!(1)) }),
            WarmupEntry::new("", options.clone(), async { Ok(json!(2)) }),
            WarmupEntry::new("blank-tag", options.clone().with_tags([" "]), async {
                Ok(json!(3))
            }),
        ];

        let mut report = cache.warmup(entries).await;
        report.failed.sort();
        assert_eq!(report.loaded, vec!["good".to_string()]);
        assert_eq!(report.failed, vec!["".to_string(), "blank-tag".to_string()]);
        assert_eq!(cache.stats().await.entries, 1);
        assert!(cache.keys_for_tag(" ").await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_reclaims_expired_backend_keys() {
        let backend = Arc::new(MemoryBackend::new());
        let settings = CacheSettings {
            sweep_interval_seconds: 1,
            ..Default::default()
        };
        let cache = CacheService::init(settings, backend.clone(), None).unwrap();

        for i in 0..100 {
            let key = backend_key(RATE_LIMIT_NAMESPACE, &format!("ip:10.0.0.{}", i));
            backend
                .incr_window(&key, Duration::from_secs(1))
                .await
                .unwrap();
        }
        assert_eq!(backend.stored_keys().await, 100);

        cache.spawn_sweeper().await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(backend.stored_keys().await, 0);

        cache.flush_and_close().await;
    }
}
