// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 后端存储模块
//!
//! 限流计数器与刷新租约共享的键值后端，提供本地内存实现和 Redis 远程实现。
//! 远程实现的自增、条件删除等操作均为原子命令，多个进程实例可以安全共享。

pub mod fallback;
pub mod memory;
pub mod redis_store;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::app::{BackendChoice, BackendSettings};

pub use fallback::FallbackBackend;
pub use memory::MemoryBackend;
#[cfg(feature = "redis")]
pub use redis_store::{RedisBackend, RedisConfig};

/// 后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Redis,
}

/// 固定窗口计数结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// 自增后的计数
    pub count: u64,
    /// 窗口剩余时间
    pub remaining: Duration,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("backing store unavailable: {0}")]
    Unavailable(String),

    #[error("backing store command failed: {0}")]
    Command(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// 键值后端接口
///
/// 所有 TTL 均为毫秒精度。
#[async_trait::async_trait]
pub trait BackingStore: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// 连通性检查
    async fn ping(&self) -> StoreResult<()>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// 键不存在时写入并设置过期时间（SET NX PX），返回是否写入成功
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// 仅当当前值等于 `expected` 时删除
    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool>;

    async fn del(&self, key: &str) -> StoreResult<bool>;

    /// 键的剩余存活时间，键不存在时返回 `None`
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    /// 原子地自增窗口计数器；计数器不存在或已过期时以 1 开启新窗口
    async fn incr_window(&self, key: &str, window: Duration) -> StoreResult<WindowCount>;

    /// 回收已过期的键，返回回收数量；服务端自行过期的后端无需实现
    async fn purge_expired(&self) -> usize {
        0
    }
}

/// 根据配置选择后端
///
/// 远程后端不可用时退化为本地内存后端，只记录警告，不会导致启动失败。
pub async fn connect_backend(settings: &BackendSettings) -> Arc<dyn BackingStore> {
    match settings.kind {
        BackendChoice::Memory => {
            info!("Using in-memory backing store (single-process deployment)");
            Arc::new(MemoryBackend::new())
        }
        BackendChoice::Redis => connect_remote(settings).await,
    }
}

#[cfg(feature = "redis")]
async fn connect_remote(settings: &BackendSettings) -> Arc<dyn BackingStore> {
    let config = RedisConfig::from_settings(settings);
    match RedisBackend::connect(config).await {
        Ok(remote) => {
            info!("Connected to Redis backing store at {}", settings.redis_url);
            Arc::new(FallbackBackend::new(Arc::new(remote)))
        }
        Err(e) => {
            warn!(
                "Redis backing store unavailable ({}), falling back to in-memory store",
                e
            );
            Arc::new(MemoryBackend::new())
        }
    }
}

#[cfg(not(feature = "redis"))]
async fn connect_remote(settings: &BackendSettings) -> Arc<dyn BackingStore> {
    warn!(
        "Redis backing store requested at {} but the `redis` feature is disabled, \
         falling back to in-memory store",
        settings.redis_url
    );
    Arc::new(MemoryBackend::new())
}
