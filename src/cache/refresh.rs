// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 刷新协调器
//!
//! 实现 stale-while-revalidate 与冷读取回源。每个键同一时刻最多一个回源任务：
//! 本进程内由任务注册表保证，跨进程由后端上的短期租约键保证。
//!
//! 回源任务通过 `tokio::spawn` 独立运行，调用方放弃等待（超时或断开）不会
//! 取消回源，结果仍会写入缓存供后续请求使用。

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared, join_all};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::entry::{CacheOptions, CacheStrategy};
use super::store::EntryStore;
use super::warmup::{WarmupEntry, WarmupReport};
use crate::backend::BackingStore;
use crate::error::CacheError;
use crate::metrics::PrometheusCollector;
use crate::utils::{REFRESH_LEASE_NAMESPACE, backend_key};

/// 回源函数的返回值
pub type FetchResult = anyhow::Result<Value>;

type SharedOutcome = Shared<BoxFuture<'static, Result<Value, CacheError>>>;

/// 回源任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// 缓存中没有可用值，调用方等待结果
    Cold,
    /// 后台刷新陈旧值
    Refresh,
}

struct InFlight {
    id: u64,
    kind: TaskKind,
    outcome: SharedOutcome,
}

enum Claim {
    Fresh(Value),
    Started(SharedOutcome),
    Joined(SharedOutcome),
}

struct FetchJob {
    id: u64,
    kind: TaskKind,
    key: String,
    ttl: Duration,
    tags: Vec<String>,
    deadline: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSettings {
    /// 冷读取默认等待时间
    pub fetch_timeout: Duration,
    /// 跨进程刷新租约的有效期，同时限制后台任务的最长运行时间
    pub lease_ttl: Duration,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_millis(5_000),
            lease_ttl: Duration::from_millis(30_000),
        }
    }
}

struct CoordinatorInner {
    store: Arc<EntryStore>,
    backend: Arc<dyn BackingStore>,
    in_flight: Mutex<HashMap<String, InFlight>>,
    next_id: AtomicU64,
    settings: RefreshSettings,
    metrics: Option<Arc<PrometheusCollector>>,
}

/// 刷新协调器
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<EntryStore>,
        backend: Arc<dyn BackingStore>,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                store,
                backend,
                in_flight: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                settings,
                metrics: None,
            }),
        }
    }

    pub fn with_metrics(
        store: Arc<EntryStore>,
        backend: Arc<dyn BackingStore>,
        settings: RefreshSettings,
        metrics: Arc<PrometheusCollector>,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                store,
                backend,
                in_flight: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                settings,
                metrics: Some(metrics),
            }),
        }
    }

    pub fn settings(&self) -> RefreshSettings {
        self.inner.settings
    }

    /// 读穿
    ///
    /// 1. 新鲜值直接返回；
    /// 2. 陈旧值立即返回，并在后台发起至多一个刷新任务；
    /// 3. 无值时等待回源（受超时限制），写入缓存后返回。
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
        if let Some(read) = self.inner.store.get_stale(key).await {
            if !read.is_stale {
                self.inner.record_lookup("hit");
                return Ok(read.value);
            }
            if options.strategy == CacheStrategy::StaleWhileRevalidate {
                self.inner.record_lookup("stale");
                if let Claim::Started(_) = self.claim(key, options, fetch, TaskKind::Refresh).await
                {
                    debug!("Serving stale value for '{}' while refreshing", key);
                }
                return Ok(read.value);
            }
        }
        self.inner.record_lookup("miss");

        let timeout = options
            .fetch_timeout
            .unwrap_or(self.inner.settings.fetch_timeout);
        let outcome = match self.claim(key, options, fetch, TaskKind::Cold).await {
            Claim::Fresh(value) => return Ok(value),
            Claim::Started(outcome) | Claim::Joined(outcome) => outcome,
        };

        match tokio::time::timeout(timeout, outcome).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Read-through of '{}' timed out after {:?}; fetch continues in background",
                    key, timeout
                );
                Err(CacheError::FetchTimeout {
                    key: key.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// 预热：逐项回源并写入；单项失败只记录日志，不影响其他条目
    pub async fn warmup(&self, entries: Vec<WarmupEntry>) -> WarmupReport {
        let total = entries.len();
        let fetch_timeout = self.inner.settings.fetch_timeout;

        let results = join_all(entries.into_iter().map(|entry| {
            let inner = self.inner.clone();
            async move {
                let WarmupEntry {
                    key,
                    options,
                    fetch,
                } = entry;
                match tokio::time::timeout(fetch_timeout, fetch).await {
                    Ok(Ok(value)) => {
                        let outcome = inner
                            .store
                            .set(&key, value, options.ttl, options.tags)
                            .await;
                        inner.record_evictions(outcome.evicted);
                        if outcome.stored {
                            Ok(key)
                        } else {
                            Err(key)
                        }
                    }
                    Ok(Err(e)) => {
                        warn!("Warmup fetch for '{}' failed, skipping: {:#}", key, e);
                        Err(key)
                    }
                    Err(_) => {
                        warn!(
                            "Warmup fetch for '{}' timed out after {:?}, skipping",
                            key, fetch_timeout
                        );
                        Err(key)
                    }
                }
            }
        }))
        .await;

        let mut report = WarmupReport::default();
        for result in results {
            match result {
                Ok(key) => report.loaded.push(key),
                Err(key) => report.failed.push(key),
            }
        }
        info!(
            "Cache warmup finished: {} of {} entries loaded",
            report.loaded.len(),
            total
        );
        report
    }

    /// 该键是否有正在进行的后台刷新
    pub async fn is_refreshing(&self, key: &str) -> bool {
        self.inner
            .in_flight
            .lock()
            .await
            .get(key)
            .is_some_and(|task| task.kind == TaskKind::Refresh)
    }

    pub async fn in_flight_count(&self) -> usize {
        self.inner.in_flight.lock().await.len()
    }

    /// 等待所有进行中的回源任务结束，超时返回 false
    pub async fn drain(&self, grace: Duration) -> bool {
        let outcomes: Vec<SharedOutcome> = self
            .inner
            .in_flight
            .lock()
            .await
            .values()
            .map(|task| task.outcome.clone())
            .collect();
        if outcomes.is_empty() {
            return true;
        }
        tokio::time::timeout(grace, join_all(outcomes)).await.is_ok()
    }

    async fn claim<F, Fut>(
        &self,
        key: &str,
        options: &CacheOptions,
        fetch: F,
        kind: TaskKind,
    ) -> Claim
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = FetchResult> + Send + 'static,
    {
        let mut in_flight = self.inner.in_flight.lock().await;

        if let Some(task) = in_flight.get(key) {
            return Claim::Joined(task.outcome.clone());
        }

        // 前一个任务可能在我们读取之后、加锁之前刚刚写入了新值
        if let Some(read) = self.inner.store.peek(key).await
            && !read.is_stale
        {
            return Claim::Fresh(read.value);
        }

        let deadline = match kind {
            TaskKind::Refresh => self.inner.settings.lease_ttl,
            TaskKind::Cold => self.inner.settings.lease_ttl.max(
                options
                    .fetch_timeout
                    .unwrap_or(self.inner.settings.fetch_timeout),
            ),
        };
        let job = FetchJob {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            kind,
            key: key.to_string(),
            ttl: options.ttl,
            tags: options.tags.clone(),
            deadline,
        };
        let id = job.id;

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { inner.run(job, fetch()).await });

        let task_key = key.to_string();
        let outcome = async move {
            handle.await.unwrap_or_else(|e| {
                Err(CacheError::FetchFailed {
                    key: task_key,
                    reason: format!("fetch task aborted: {}", e),
                })
            })
        }
        .boxed()
        .shared();

        in_flight.insert(
            key.to_string(),
            InFlight {
                id,
                kind,
                outcome: outcome.clone(),
            },
        );
        Claim::Started(outcome)
    }
}

impl CoordinatorInner {
    async fn run<Fut>(self: Arc<Self>, job: FetchJob, fetch: Fut) -> Result<Value, CacheError>
    where
        Fut: Future<Output = FetchResult> + Send,
    {
        let result = match job.kind {
            TaskKind::Cold => self.fetch_and_store(&job, fetch).await,
            TaskKind::Refresh => self.refresh(&job, fetch).await,
        };

        let mut in_flight = self.in_flight.lock().await;
        if in_flight.get(&job.key).is_some_and(|task| task.id == job.id) {
            in_flight.remove(&job.key);
        }
        result
    }

    async fn fetch_and_store<Fut>(&self, job: &FetchJob, fetch: Fut) -> Result<Value, CacheError>
    where
        Fut: Future<Output = FetchResult> + Send,
    {
        let value = match tokio::time::timeout(job.deadline, fetch).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                return Err(CacheError::FetchFailed {
                    key: job.key.clone(),
                    reason: format!("{:#}", e),
                });
            }
            Err(_) => {
                return Err(CacheError::FetchFailed {
                    key: job.key.clone(),
                    reason: format!("fetch exceeded {:?}", job.deadline),
                });
            }
        };

        let outcome = self
            .store
            .set(&job.key, value.clone(), job.ttl, job.tags.clone())
            .await;
        self.record_evictions(outcome.evicted);
        debug!("Cached '{}' after fetch ({:?})", job.key, job.kind);
        Ok(value)
    }

    async fn refresh<Fut>(&self, job: &FetchJob, fetch: Fut) -> Result<Value, CacheError>
    where
        Fut: Future<Output = FetchResult> + Send,
    {
        let lease_key = backend_key(REFRESH_LEASE_NAMESPACE, &job.key);
        let token = uuid::Uuid::new_v4().to_string();

        let leased = match self
            .backend
            .set_if_absent(&lease_key, &token, self.settings.lease_ttl)
            .await
        {
            Ok(true) => true,
            Ok(false) => {
                debug!(
                    "Refresh of '{}' already claimed by another instance",
                    job.key
                );
                self.record_refresh("skipped");
                return self.current_value(&job.key).await;
            }
            Err(e) => {
                warn!(
                    "Could not claim refresh lease for '{}' ({}), refreshing without it",
                    job.key, e
                );
                false
            }
        };

        let result = self.fetch_and_store(job, fetch).await;
        match &result {
            Ok(_) => self.record_refresh("success"),
            Err(e) => {
                self.record_refresh("failure");
                warn!("Background refresh failed, keeping stale value: {}", e);
            }
        }

        if leased
            && let Err(e) = self.backend.compare_and_delete(&lease_key, &token).await
        {
            warn!("Failed to release refresh lease for '{}': {}", job.key, e);
        }

        result
    }

    async fn current_value(&self, key: &str) -> Result<Value, CacheError> {
        self.store
            .peek(key)
            .await
            .map(|read| read.value)
            .ok_or_else(|| CacheError::NotFound(key.to_string()))
    }

    fn record_lookup(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_lookup(outcome);
        }
    }

    fn record_refresh(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_refresh(outcome);
        }
    }

    fn record_evictions(&self, evicted: usize) {
        if evicted > 0
            && let Some(metrics) = &self.metrics
        {
            metrics.record_evictions(evicted);
        }
    }
}
