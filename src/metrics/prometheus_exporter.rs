// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! Prometheus 指标收集模块
//!
//! 缓存命中、淘汰、后台刷新与限流决策的计数，以及缓存容量的实时值

use prometheus::{
    CounterVec, Encoder, Gauge, HistogramVec, IntCounter, Registry, TextEncoder,
    register_counter_vec_with_registry, register_gauge_with_registry,
    register_histogram_vec_with_registry, register_int_counter_with_registry,
};
use std::sync::Arc;

/// Prometheus 指标收集器
pub struct PrometheusCollector {
    registry: Arc<Registry>,

    // HTTP 请求计数器
    http_requests_total: CounterVec,

    // HTTP 请求延迟直方图
    http_request_duration_seconds: HistogramVec,

    // 缓存读取结果
    cache_hits: IntCounter,
    cache_misses: IntCounter,
    cache_stale_served: IntCounter,
    cache_evictions: IntCounter,

    // 后台刷新结果（success / failure / skipped）
    cache_refreshes: CounterVec,

    // 限流决策（allowed / rejected）
    rate_limit_decisions: CounterVec,

    cache_entries: Gauge,
    cache_bytes: Gauge,
}

impl PrometheusCollector {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Arc::new(Registry::new());

        // HTTP 请求总数（按端点、方法、状态码）
        let http_requests_total = register_counter_vec_with_registry!(
            "http_requests_total",
            "Total number of HTTP requests",
            &["method", "endpoint", "status"],
            registry.clone()
        )?;

        let http_request_duration_seconds = register_histogram_vec_with_registry!(
            "http_request_duration_seconds",
            "HTTP request duration in seconds",
            &["method", "endpoint"],
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            registry.clone()
        )?;

        let cache_hits = register_int_counter_with_registry!(
            "cache_hits_total",
            "Total number of fresh cache hits",
            registry.clone()
        )?;

        let cache_misses = register_int_counter_with_registry!(
            "cache_misses_total",
            "Total number of cache misses",
            registry.clone()
        )?;

        let cache_stale_served = register_int_counter_with_registry!(
            "cache_stale_served_total",
            "Total number of stale values served while revalidating",
            registry.clone()
        )?;

        let cache_evictions = register_int_counter_with_registry!(
            "cache_evictions_total",
            "Total number of LRU evictions",
            registry.clone()
        )?;

        let cache_refreshes = register_counter_vec_with_registry!(
            "cache_refreshes_total",
            "Background refresh attempts by outcome",
            &["outcome"],
            registry.clone()
        )?;

        let rate_limit_decisions = register_counter_vec_with_registry!(
            "rate_limit_decisions_total",
            "Rate limit decisions by outcome",
            &["outcome"],
            registry.clone()
        )?;

        let cache_entries = register_gauge_with_registry!(
            "cache_entries",
            "Number of entries currently held",
            registry.clone()
        )?;

        let cache_bytes = register_gauge_with_registry!(
            "cache_bytes",
            "Aggregate serialized size of held entries",
            registry.clone()
        )?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            cache_hits,
            cache_misses,
            cache_stale_served,
            cache_evictions,
            cache_refreshes,
            rate_limit_decisions,
            cache_entries,
            cache_bytes,
        })
    }

    /// 记录 HTTP 请求
    pub fn record_http_request(&self, method: &str, endpoint: &str, status_code: u16) {
        self.http_requests_total
            .with_label_values(&[method, endpoint, &status_code.to_string()])
            .inc();
    }

    /// 开始计时 HTTP 请求
    pub fn start_http_request_timer(
        &self,
        method: &str,
        endpoint: &str,
    ) -> prometheus::HistogramTimer {
        self.http_request_duration_seconds
            .with_label_values(&[method, endpoint])
            .start_timer()
    }

    /// 记录一次读取结果：`hit`、`miss` 或 `stale`
    pub fn record_cache_lookup(&self, outcome: &str) {
        match outcome {
            "hit" => self.cache_hits.inc(),
            "stale" => self.cache_stale_served.inc(),
            _ => self.cache_misses.inc(),
        }
    }

    pub fn record_evictions(&self, count: usize) {
        self.cache_evictions.inc_by(count as u64);
    }

    pub fn record_refresh(&self, outcome: &str) {
        self.cache_refreshes.with_label_values(&[outcome]).inc();
    }

    pub fn record_rate_limit(&self, allowed: bool) {
        let outcome = if allowed { "allowed" } else { "rejected" };
        self.rate_limit_decisions.with_label_values(&[outcome]).inc();
    }

    /// 更新缓存容量
    pub fn set_cache_size(&self, entries: usize, bytes: usize) {
        self.cache_entries.set(entries as f64);
        self.cache_bytes.set(bytes as f64);
    }

    /// 获取缓存命中率（陈旧命中计为命中）
    pub fn get_cache_hit_rate(&self) -> f64 {
        let hits = (self.cache_hits.get() + self.cache_stale_served.get()) as f64;
        let total = hits + self.cache_misses.get() as f64;
        if total == 0.0 { 0.0 } else { hits / total }
    }

    /// 获取注册表（用于暴露指标）
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// 以 Prometheus 文本格式导出
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
