// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::backend::connect_backend;
use crate::cache::StaticWarmupSource;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::metrics::PrometheusCollector;
use crate::rate_limit::{RateLimitPolicy, RateLimitState, RateLimiter};
use crate::service::CacheService;

/// 配置文件中 `[[cache.warmup]]` 条目对应的预热类别
pub const CONFIG_WARMUP_CATEGORY: &str = "config";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<CacheService>,
    pub rate_limiter: Arc<RateLimiter>,
    pub rate_limit_policy: Arc<RateLimitPolicy>,
    pub prometheus_collector: Option<Arc<PrometheusCollector>>,
    pub request_timeout: Duration,
}

impl AppState {
    /// Wires backend, metrics, cache service and rate limiter from configuration
    pub async fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        config.validate()?;

        let prometheus_collector = match PrometheusCollector::new() {
            Ok(collector) => Some(Arc::new(collector)),
            Err(e) => {
                warn!("Prometheus metrics disabled: {}", e);
                None
            }
        };

        let backend = connect_backend(&config.backend).await;
        let cache = Arc::new(CacheService::init(
            config.cache.clone(),
            backend.clone(),
            prometheus_collector.clone(),
        )?);

        if !config.cache.warmup.is_empty() {
            let source = StaticWarmupSource::new(
                config.cache.warmup.clone(),
                Duration::from_secs(config.cache.default_ttl_seconds),
            );
            info!(
                "Registered {} warmup entries under category '{}'",
                source.len(),
                CONFIG_WARMUP_CATEGORY
            );
            cache
                .register_warmup_source(CONFIG_WARMUP_CATEGORY, Arc::new(source))
                .await;
        }

        let rate_limiter = Arc::new(match &prometheus_collector {
            Some(metrics) => RateLimiter::with_metrics(backend, metrics.clone()),
            None => RateLimiter::new(backend),
        });
        let rate_limit_policy = Arc::new(RateLimitPolicy::from_settings(&config.rate_limit)?);

        Ok(Self {
            cache,
            rate_limiter,
            rate_limit_policy,
            prometheus_collector,
            request_timeout: Duration::from_secs(config.server.request_timeout_secs),
        })
    }

    pub fn rate_limit_state(&self) -> RateLimitState {
        RateLimitState {
            limiter: self.rate_limiter.clone(),
            policy: self.rate_limit_policy.clone(),
        }
    }
}
