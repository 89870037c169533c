// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 内存后端
//!
//! 单进程部署使用；所有操作在同一把锁内完成，因此对本进程是原子的。

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;

use super::{BackendKind, BackingStore, StoreResult, WindowCount};

#[derive(Debug, Clone)]
struct MemoryValue {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// 内存键值后端
pub struct MemoryBackend {
    values: AsyncMutex<HashMap<String, MemoryValue>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            values: AsyncMutex::new(HashMap::new()),
        }
    }

    /// 表中保存的键数量，包括尚未回收的过期键
    pub async fn stored_keys(&self) -> usize {
        self.values.lock().await.len()
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let values = self.values.lock().await;
        values.values().filter(|v| v.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BackingStore for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = Instant::now();
        let values = self.values.lock().await;
        Ok(values
            .get(key)
            .filter(|v| v.is_live(now))
            .map(|v| v.value.clone()))
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let now = Instant::now();
        let mut values = self.values.lock().await;
        if values.get(key).is_some_and(|v| v.is_live(now)) {
            return Ok(false);
        }
        values.insert(
            key.to_string(),
            MemoryValue {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let now = Instant::now();
        let mut values = self.values.lock().await;
        let matches = values
            .get(key)
            .is_some_and(|v| v.is_live(now) && v.value == expected);
        if matches {
            values.remove(key);
        }
        Ok(matches)
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        let now = Instant::now();
        let mut values = self.values.lock().await;
        Ok(values.remove(key).is_some_and(|v| v.is_live(now)))
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let now = Instant::now();
        let values = self.values.lock().await;
        Ok(values.get(key).filter(|v| v.is_live(now)).map(|v| {
            v.expires_at
                .map(|at| at.saturating_duration_since(now))
                .unwrap_or(Duration::MAX)
        }))
    }

    async fn incr_window(&self, key: &str, window: Duration) -> StoreResult<WindowCount> {
        let now = Instant::now();
        let mut values = self.values.lock().await;

        let entry = values
            .entry(key.to_string())
            .and_modify(|v| {
                if !v.is_live(now) {
                    v.value = "0".to_string();
                    v.expires_at = Some(now + window);
                }
            })
            .or_insert_with(|| MemoryValue {
                value: "0".to_string(),
                expires_at: Some(now + window),
            });

        let count = entry.value.parse::<u64>().unwrap_or(0) + 1;
        entry.value = count.to_string();
        let expires_at = *entry.expires_at.get_or_insert(now + window);

        Ok(WindowCount {
            count,
            remaining: expires_at.saturating_duration_since(now),
        })
    }

    async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut values = self.values.lock().await;
        let before = values.len();
        values.retain(|_, v| v.is_live(now));
        before - values.len()
    }
}
