// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 降级后端
//!
//! 包装远程后端；远程调用失败时改用本地内存后端完成同一操作，
//! 调用方永远不会看到后端不可用的错误。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tracing::{info, warn};

use super::{BackendKind, BackingStore, MemoryBackend, StoreError, StoreResult, WindowCount};

pub struct FallbackBackend {
    primary: Arc<dyn BackingStore>,
    local: MemoryBackend,
    degraded: AtomicBool,
    fallback_ops: AtomicU64,
}

impl FallbackBackend {
    pub fn new(primary: Arc<dyn BackingStore>) -> Self {
        Self {
            primary,
            local: MemoryBackend::new(),
            degraded: AtomicBool::new(false),
            fallback_ops: AtomicU64::new(0),
        }
    }

    /// 最近一次远程调用是否失败
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// 由本地后端完成的操作数
    pub fn fallback_ops(&self) -> u64 {
        self.fallback_ops.load(Ordering::Relaxed)
    }

    fn on_success(&self) {
        if self.degraded.swap(false, Ordering::Relaxed) {
            info!(
                "{:?} backing store recovered, leaving in-memory fallback",
                self.primary.kind()
            );
        }
    }

    fn on_failure(&self, op: &str, err: &StoreError) {
        self.fallback_ops.fetch_add(1, Ordering::Relaxed);
        if !self.degraded.swap(true, Ordering::Relaxed) {
            warn!(
                "{:?} backing store failed during {} ({}), serving from in-memory fallback",
                self.primary.kind(),
                op,
                err
            );
        }
    }
}

#[async_trait::async_trait]
impl BackingStore for FallbackBackend {
    fn kind(&self) -> BackendKind {
        self.primary.kind()
    }

    async fn ping(&self) -> StoreResult<()> {
        match self.primary.ping().await {
            Ok(()) => {
                self.on_success();
                Ok(())
            }
            Err(e) => {
                self.on_failure("ping", &e);
                self.local.ping().await
            }
        }
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match self.primary.get(key).await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure("get", &e);
                self.local.get(key).await
            }
        }
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        match self.primary.set_if_absent(key, value, ttl).await {
            Ok(written) => {
                self.on_success();
                Ok(written)
            }
            Err(e) => {
                self.on_failure("set_if_absent", &e);
                self.local.set_if_absent(key, value, ttl).await
            }
        }
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        // 租约可能是在降级期间写入本地的，两边都尝试释放
        let local = self.local.compare_and_delete(key, expected).await?;
        match self.primary.compare_and_delete(key, expected).await {
            Ok(removed) => {
                self.on_success();
                Ok(removed || local)
            }
            Err(e) => {
                self.on_failure("compare_and_delete", &e);
                Ok(local)
            }
        }
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        let local = self.local.del(key).await?;
        match self.primary.del(key).await {
            Ok(removed) => {
                self.on_success();
                Ok(removed || local)
            }
            Err(e) => {
                self.on_failure("del", &e);
                Ok(local)
            }
        }
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        match self.primary.ttl(key).await {
            Ok(ttl) => {
                self.on_success();
                Ok(ttl)
            }
            Err(e) => {
                self.on_failure("ttl", &e);
                self.local.ttl(key).await
            }
        }
    }

    async fn incr_window(&self, key: &str, window: Duration) -> StoreResult<WindowCount> {
        match self.primary.incr_window(key, window).await {
            Ok(counted) => {
                self.on_success();
                Ok(counted)
            }
            Err(e) => {
                self.on_failure("incr_window", &e);
                self.local.incr_window(key, window).await
            }
        }
    }

    async fn purge_expired(&self) -> usize {
        self.local.purge_expired().await + self.primary.purge_expired().await
    }
}
