// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 条目存储
//!
//! 条目、标签索引和访问顺序放在同一把锁之下，任何变更都同时更新三者，
//! 不会出现存储与索引不一致的中间状态。

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::entry::{CacheEntry, StaleRead};
use super::lru_order::LruOrder;
use super::tag_index::TagIndex;

/// 容量上限，任一维度超出都会触发 LRU 淘汰
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    pub max_entries: Option<usize>,
    pub max_bytes: Option<usize>,
}

impl StoreLimits {
    pub fn unbounded() -> Self {
        Self {
            max_entries: None,
            max_bytes: None,
        }
    }

    pub fn entries(max_entries: usize) -> Self {
        Self {
            max_entries: Some(max_entries),
            max_bytes: None,
        }
    }

    pub fn bytes(max_bytes: usize) -> Self {
        Self {
            max_entries: None,
            max_bytes: Some(max_bytes),
        }
    }
}

/// 淘汰目标
pub type EvictionTarget = StoreLimits;

/// 写入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetOutcome {
    pub stored: bool,
    pub replaced: bool,
    pub evicted: usize,
}

/// 缓存统计
#[derive(Debug, Clone, Default, Serialize, utoipa::ToSchema)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: usize,
    pub stale_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub stale_hits: u64,
    pub evictions: u64,
    pub hit_rate: f64,
    pub average_access_count: f64,
    pub tags: BTreeMap<String, usize>,
    pub max_entries: Option<usize>,
    pub max_bytes: Option<usize>,
}

#[derive(Debug, Default)]
struct StoreState {
    entries: HashMap<String, CacheEntry>,
    tags: TagIndex,
    recency: LruOrder,
    total_bytes: usize,
    hits: u64,
    misses: u64,
    stale_hits: u64,
    evictions: u64,
}

impl StoreState {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.tags.unindex_all(key);
        self.recency.remove(key);
        self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    fn over(&self, limits: &StoreLimits) -> bool {
        limits.max_entries.is_some_and(|max| self.entries.len() > max)
            || limits.max_bytes.is_some_and(|max| self.total_bytes > max)
    }

    /// 反复淘汰最久未使用的键直到满足目标
    fn evict_until(&mut self, target: &StoreLimits) -> usize {
        let mut evicted = 0;
        while self.over(target) {
            let Some(victim) = self.recency.pop_lru() else {
                break;
            };
            if self.remove(&victim).is_some() {
                debug!("LRU evicted entry: {}", victim);
                self.evictions += 1;
                evicted += 1;
            }
        }
        evicted
    }
}

/// 条目存储
pub struct EntryStore {
    state: Mutex<StoreState>,
    limits: StoreLimits,
}

impl EntryStore {
    pub fn new(limits: StoreLimits) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            limits,
        }
    }

    pub fn limits(&self) -> StoreLimits {
        self.limits
    }

    /// 读取未过期的值，并刷新访问时间
    pub async fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        match state.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.record_access(now);
                state.recency.touch(key);
                state.hits += 1;
                Some(entry.value.clone())
            }
            _ => {
                state.misses += 1;
                None
            }
        }
    }

    /// 读取值，即使已过期；过期时 `is_stale` 为 true
    pub async fn get_stale(&self, key: &str) -> Option<StaleRead> {
        let now = Instant::now();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let Some(entry) = state.entries.get_mut(key) else {
            state.misses += 1;
            return None;
        };

        entry.record_access(now);
        state.recency.touch(key);
        let is_stale = entry.is_expired(now);
        if is_stale {
            state.stale_hits += 1;
        } else {
            state.hits += 1;
        }
        Some(StaleRead {
            value: entry.value.clone(),
            is_stale,
        })
    }

    /// 查看当前值，不计入命中统计，也不改变访问顺序
    pub async fn peek(&self, key: &str) -> Option<StaleRead> {
        let now = Instant::now();
        let state = self.state.lock().await;
        state.entries.get(key).map(|entry| StaleRead {
            value: entry.value.clone(),
            is_stale: entry.is_expired(now),
        })
    }

    /// 插入或覆盖条目
    ///
    /// 超过容量时自动淘汰；单个值大于字节预算时不会写入。
    pub async fn set(
        &self,
        key: &str,
        value: Value,
        ttl: Duration,
        tags: impl IntoIterator<Item = String>,
    ) -> SetOutcome {
        let entry = CacheEntry::new(key.to_string(), value, ttl, tags.into_iter().collect());
        let mut state = self.state.lock().await;

        if self
            .limits
            .max_bytes
            .is_some_and(|max| entry.size_bytes > max)
        {
            warn!(
                "Entry '{}' is {} bytes, larger than the cache budget; not cached",
                key, entry.size_bytes
            );
            return SetOutcome {
                stored: false,
                replaced: false,
                evicted: 0,
            };
        }

        let replaced = state.remove(key).is_some();

        state.tags.index_tags(key, &entry.tags);
        state.recency.touch(key);
        state.total_bytes += entry.size_bytes;
        state.entries.insert(key.to_string(), entry);

        let evicted = state.evict_until(&self.limits);

        SetOutcome {
            stored: true,
            replaced,
            evicted,
        }
    }

    /// 删除条目并注销其标签，返回条目是否存在
    pub async fn delete(&self, key: &str) -> bool {
        let mut state = self.state.lock().await;
        state.remove(key).is_some()
    }

    pub async fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        let state = self.state.lock().await;
        state
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    pub async fn keys_for_tag(&self, tag: &str) -> Vec<String> {
        let state = self.state.lock().await;
        let mut keys: Vec<String> = state.tags.keys_for_tag(tag).into_iter().collect();
        keys.sort();
        keys
    }

    /// 删除带有任一标签的条目，返回删除的不同键数量
    pub async fn invalidate_by_tags<S: AsRef<str>>(&self, tags: &[S]) -> usize {
        let mut state = self.state.lock().await;
        let mut removed = 0;
        for key in state.tags.keys_for_tags(tags) {
            if state.remove(&key).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// 淘汰到满足目标为止，返回淘汰数量
    pub async fn evict_until(&self, target: EvictionTarget) -> usize {
        let mut state = self.state.lock().await;
        state.evict_until(&target)
    }

    /// 清理过期超过 `grace` 的条目
    pub async fn purge_expired(&self, grace: Duration) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let expired: Vec<String> = state
            .entries
            .values()
            .filter(|entry| entry.is_expired(now) && entry.staleness(now) >= grace)
            .map(|entry| entry.key.clone())
            .collect();
        for key in &expired {
            state.remove(key);
        }
        expired.len()
    }

    pub async fn clear(&self) -> usize {
        let mut state = self.state.lock().await;
        let removed = state.entries.len();
        state.entries.clear();
        state.tags.clear();
        state.recency.clear();
        state.total_bytes = 0;
        removed
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn total_bytes(&self) -> usize {
        self.state.lock().await.total_bytes
    }

    pub async fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let state = self.state.lock().await;

        let entries = state.entries.len();
        let total_access: u64 = state.entries.values().map(|e| e.access_count).sum();
        let stale_entries = state
            .entries
            .values()
            .filter(|e| e.is_expired(now))
            .count();
        let lookups = state.hits + state.stale_hits + state.misses;

        CacheStats {
            entries,
            total_bytes: state.total_bytes,
            stale_entries,
            hits: state.hits,
            misses: state.misses,
            stale_hits: state.stale_hits,
            evictions: state.evictions,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                (state.hits + state.stale_hits) as f64 / lookups as f64
            },
            average_access_count: if entries == 0 {
                0.0
            } else {
                total_access as f64 / entries as f64
            },
            tags: state.tags.tag_counts(),
            max_entries: self.limits.max_entries,
            max_bytes: self.limits.max_bytes,
        }
    }
}
