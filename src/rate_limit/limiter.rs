// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 限流器模块
//!
//! 固定窗口计数。计数器保存在共享后端中，自增与过期设置是一次原子操作，
//! 多个进程实例共享同一后端时计数依然准确。

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::identifier::{IdentifierFn, IdentifierStrategy, TrustedHeaders};
use crate::backend::BackingStore;
use crate::config::RateLimitSettings;
use crate::error::CacheError;
use crate::metrics::PrometheusCollector;
use crate::utils::{RATE_LIMIT_NAMESPACE, backend_key};

/// 单次检查结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct RateLimitDecision {
    pub identifier: String,
    pub allowed: bool,
    pub limit: u64,
    /// 当前窗口内的计数（包含本次）
    pub count: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
    pub retry_after_secs: u64,
}

/// 窗口状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct RateWindow {
    pub identifier: String,
    pub window_start: DateTime<Utc>,
    pub count: u64,
    pub limit: u64,
    pub window_ms: u64,
}

/// 限流策略
#[derive(Clone)]
pub struct RateLimitPolicy {
    pub enabled: bool,
    pub limit: u64,
    pub window: Duration,
    pub message: String,
    pub headers_enabled: bool,
    pub trusted_headers: TrustedHeaders,
    pub identifier: IdentifierFn,
}

impl RateLimitPolicy {
    pub fn from_settings(settings: &RateLimitSettings) -> Result<Self, CacheError> {
        settings.validate()?;
        Ok(Self {
            enabled: settings.enabled,
            limit: settings.limit,
            window: Duration::from_millis(settings.window_ms),
            message: settings.message.clone(),
            headers_enabled: settings.headers_enabled,
            trusted_headers: TrustedHeaders {
                forwarded_for: settings.trust_forwarded_for,
                principal: settings.trust_principal_header,
            },
            identifier: IdentifierStrategy::from(settings.identifier).into_fn(),
        })
    }

    /// 替换标识符派生函数
    pub fn with_identifier(mut self, identifier: IdentifierFn) -> Self {
        self.identifier = identifier;
        self
    }
}

impl std::fmt::Debug for RateLimitPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitPolicy")
            .field("enabled", &self.enabled)
            .field("limit", &self.limit)
            .field("window", &self.window)
            .field("headers_enabled", &self.headers_enabled)
            .field("trusted_headers", &self.trusted_headers)
            .finish_non_exhaustive()
    }
}

/// 限流器
pub struct RateLimiter {
    backend: Arc<dyn BackingStore>,
    metrics: Option<Arc<PrometheusCollector>>,
}

impl RateLimiter {
    pub fn new(backend: Arc<dyn BackingStore>) -> Self {
        Self {
            backend,
            metrics: None,
        }
    }

    pub fn with_metrics(backend: Arc<dyn BackingStore>, metrics: Arc<PrometheusCollector>) -> Self {
        Self {
            backend,
            metrics: Some(metrics),
        }
    }

    /// 计数并判断是否放行
    ///
    /// 后端故障时放行请求并记录警告，限流不可用不应拖垮业务。
    pub async fn check(
        &self,
        identifier: &str,
        limit: u64,
        window: Duration,
    ) -> Result<RateLimitDecision, CacheError> {
        if limit == 0 || window.is_zero() {
            return Err(CacheError::InvalidConfiguration(format!(
                "rate limit requires a positive limit and window (limit={}, window={:?})",
                limit, window
            )));
        }

        let key = backend_key(RATE_LIMIT_NAMESPACE, identifier);
        let counted = match self.backend.incr_window(&key, window).await {
            Ok(counted) => counted,
            Err(e) => {
                warn!(
                    "Rate limit store unavailable for '{}' ({}), allowing request",
                    identifier, e
                );
                return Ok(RateLimitDecision {
                    identifier: identifier.to_string(),
                    allowed: true,
                    limit,
                    count: 0,
                    remaining: limit,
                    reset_at: reset_time(window),
                    retry_after_secs: 0,
                });
            }
        };

        let allowed = counted.count <= limit;
        let decision = RateLimitDecision {
            identifier: identifier.to_string(),
            allowed,
            limit,
            count: counted.count,
            remaining: limit.saturating_sub(counted.count),
            reset_at: reset_time(counted.remaining),
            retry_after_secs: if allowed {
                0
            } else {
                (counted.remaining.as_millis().div_ceil(1000) as u64).max(1)
            },
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_rate_limit(allowed);
        }
        if !allowed {
            debug!(
                "Rate limit exceeded for '{}': {}/{}",
                identifier, counted.count, limit
            );
        }
        Ok(decision)
    }

    /// 计数并在超限时返回 `RateLimitExceeded`
    pub async fn enforce(
        &self,
        identifier: &str,
        policy: &RateLimitPolicy,
    ) -> Result<RateLimitDecision, CacheError> {
        let decision = self.check(identifier, policy.limit, policy.window).await?;
        if decision.allowed {
            return Ok(decision);
        }
        Err(CacheError::RateLimitExceeded {
            identifier: decision.identifier,
            limit: decision.limit,
            reset_at: decision.reset_at,
            retry_after_secs: decision.retry_after_secs,
            message: policy.message.clone(),
        })
    }

    /// 当前窗口状态，窗口不存在时返回 `None`
    pub async fn status(
        &self,
        identifier: &str,
        limit: u64,
        window: Duration,
    ) -> Result<Option<RateWindow>, CacheError> {
        let key = backend_key(RATE_LIMIT_NAMESPACE, identifier);
        let Some(raw) = self.backend.get(&key).await? else {
            return Ok(None);
        };
        let count = raw.parse::<u64>().map_err(|e| {
            CacheError::BackingStoreUnavailable(format!(
                "rate limit counter '{}' is not a number: {}",
                key, e
            ))
        })?;
        let remaining = self
            .backend
            .ttl(&key)
            .await?
            .unwrap_or_default()
            .min(window);

        Ok(Some(RateWindow {
            identifier: identifier.to_string(),
            window_start: reset_time(remaining) - to_chrono(window),
            count,
            limit,
            window_ms: window.as_millis() as u64,
        }))
    }

    /// 清除计数，返回窗口是否存在
    pub async fn reset(&self, identifier: &str) -> Result<bool, CacheError> {
        let key = backend_key(RATE_LIMIT_NAMESPACE, identifier);
        Ok(self.backend.del(&key).await?)
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}

fn reset_time(remaining: Duration) -> DateTime<Utc> {
    Utc::now() + to_chrono(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, StoreError, StoreResult, WindowCount, BackendKind};

    fn limiter() -> RateLimiter {
        RateLimiter::new(Arc::new(MemoryBackend::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window_allows_limit_then_rejects() {
        let limiter = limiter();
        let window = Duration::from_millis(1000);

        let mut allowed = Vec::new();
        for _ in 0..4 {
            allowed.push(limiter.check("ip:1.2.3.4", 3, window).await.unwrap().allowed);
            tokio::time::advance(Duration::from_millis(100)).await;
        }
        assert_eq!(allowed, vec![true, true, true, false]);

        tokio::time::advance(Duration::from_millis(1000)).await;
        let decision = limiter.check("ip:1.2.3.4", 3, window).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.count, 1);
        assert_eq!(decision.remaining, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_carries_retry_hint() {
        let limiter = limiter();
        let window = Duration::from_millis(2500);
        limiter.check("id", 1, window).await.unwrap();

        let decision = limiter.check("id", 1, window).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.retry_after_secs, 3);
        assert!(decision.reset_at > Utc::now());
    }

    #[tokio::test]
    async fn test_identifiers_are_counted_independently() {
        let limiter = limiter();
        let window = Duration::from_secs(60);
        assert!(limiter.check("a", 1, window).await.unwrap().allowed);
        assert!(limiter.check("b", 1, window).await.unwrap().allowed);
        assert!(!limiter.check("a", 1, window).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_non_positive_limit_is_invalid() {
        let limiter = limiter();
        assert!(matches!(
            limiter.check("id", 0, Duration::from_secs(1)).await,
            Err(CacheError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            limiter.check("id", 1, Duration::ZERO).await,
            Err(CacheError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_enforce_uses_policy_message() {
        let limiter = limiter();
        let settings = RateLimitSettings {
            limit: 1,
            message: "hold on".to_string(),
            ..Default::default()
        };
        let policy = RateLimitPolicy::from_settings(&settings).unwrap();

        assert!(limiter.enforce("id", &policy).await.is_ok());
        match limiter.enforce("id", &policy).await {
            Err(CacheError::RateLimitExceeded { message, limit, .. }) => {
                assert_eq!(message, "hold on");
                assert_eq!(limit, 1);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_status_and_reset() {
        let limiter = limiter();
        let window = Duration::from_secs(60);
        assert!(limiter.status("id", 5, window).await.unwrap().is_none());

        limiter.check("id", 5, window).await.unwrap();
        limiter.check("id", 5, window).await.unwrap();

        let status = limiter.status("id", 5, window).await.unwrap().unwrap();
        assert_eq!(status.count, 2);
        assert_eq!(status.limit, 5);
        assert_eq!(status.window_ms, 60_000);
        assert!(status.window_start <= Utc::now());

        assert!(limiter.reset("id").await.unwrap());
        assert!(limiter.status("id", 5, window).await.unwrap().is_none());
        assert!(limiter.check("id", 5, window).await.unwrap().count == 1);
    }

    struct DownStore;

    #[async_trait::async_trait]
    impl BackingStore for DownStore {
        fn kind(&self) -> BackendKind {
            BackendKind::Redis
        }
        async fn ping(&self) -> StoreResult<()> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn get(&self, _: &str) -> StoreResult<Option<String>> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn set_if_absent(&self, _: &str, _: &str, _: Duration) -> StoreResult<bool> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn compare_and_delete(&self, _: &str, _: &str) -> StoreResult<bool> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn del(&self, _: &str) -> StoreResult<bool> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn ttl(&self, _: &str) -> StoreResult<Option<Duration>> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn incr_window(&self, _: &str, _: Duration) -> StoreResult<WindowCount> {
            Err(StoreError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let limiter = RateLimiter::new(Arc::new(DownStore));
        let decision = limiter.check("id", 1, Duration::from_secs(1)).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);

        assert!(matches!(
            limiter.status("id", 1, Duration::from_secs(1)).await,
            Err(CacheError::BackingStoreUnavailable(_))
        ));
    }
}
