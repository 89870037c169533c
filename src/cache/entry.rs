// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

/// 缓存条目
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub created_at: Instant,
    pub expires_at: Instant,
    pub last_accessed_at: Instant,
    pub tags: BTreeSet<String>,
    pub size_bytes: usize,
    pub access_count: u64,
}

impl CacheEntry {
    pub fn new(key: String, value: Value, ttl: Duration, tags: BTreeSet<String>) -> Self {
        let now = Instant::now();
        let size_bytes = measure_value(&value);
        Self {
            key,
            value,
            created_at: now,
            expires_at: now + ttl,
            last_accessed_at: now,
            tags,
            size_bytes,
            access_count: 0,
        }
    }

    /// `expires_at <= now` 的条目在逻辑上已不存在，只能通过陈旧读取拿到
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }

    /// 过期时长，未过期时为零
    pub fn staleness(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.expires_at)
    }

    pub fn time_to_live(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }

    pub fn record_access(&mut self, now: Instant) {
        self.last_accessed_at = now;
        self.access_count += 1;
    }
}

/// 值序列化后的字节数
pub fn measure_value(value: &Value) -> usize {
    serde_json::to_vec(value).map(|bytes| bytes.len()).unwrap_or(0)
}

/// 读取策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheStrategy {
    /// 过期即视为未命中，由调用方同步回源
    CacheAside,
    /// 过期后先返回旧值，同时在后台刷新
    #[default]
    StaleWhileRevalidate,
}

/// 写入选项
#[derive(Debug, Clone, PartialEq)]
pub struct CacheOptions {
    pub ttl: Duration,
    pub tags: Vec<String>,
    pub strategy: CacheStrategy,
    /// 冷读取等待回源的上限，`None` 时使用服务默认值
    pub fetch_timeout: Option<Duration>,
}

impl CacheOptions {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            tags: Vec::new(),
            strategy: CacheStrategy::default(),
            fetch_timeout: None,
        }
    }

    pub fn with_ttl_seconds(ttl_seconds: u64) -> Self {
        Self::new(Duration::from_secs(ttl_seconds))
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_strategy(mut self, strategy: CacheStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }
}

/// 陈旧读取结果
#[derive(Debug, Clone, PartialEq)]
pub struct StaleRead {
    pub value: Value,
    pub is_stale: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_at_ttl_boundary() {
        let entry = CacheEntry::new(
            "k".to_string(),
            json!({"a": 1}),
            Duration::from_secs(10),
            BTreeSet::new(),
        );
        let created = entry.created_at;

        assert!(!entry.is_expired(created + Duration::from_millis(9_999)));
        assert!(entry.is_expired(created + Duration::from_secs(10)));
        assert_eq!(
            entry.staleness(created + Duration::from_secs(12)),
            Duration::from_secs(2)
        );
        assert_eq!(entry.time_to_live(created), Duration::from_secs(10));
    }

    #[test]
    fn test_measure_value_counts_serialized_bytes() {
        assert_eq!(measure_value(&json!("abc")), 5);
        assert_eq!(measure_value(&json!({"a": 1})), 7);
    }

    #[test]
    fn test_strategy_serialization() {
        assert_eq!(
            serde_json::to_string(&CacheStrategy::CacheAside).unwrap(),
            "\"CACHE_ASIDE\""
        );
        let parsed: CacheStrategy = serde_json::from_str("\"STALE_WHILE_REVALIDATE\"").unwrap();
        assert_eq!(parsed, CacheStrategy::StaleWhileRevalidate);
    }
}
