// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information

//! Redis 后端模块
//!
//! 支持多实例部署，计数器自增与租约释放通过 Lua 脚本在服务端原子执行。
//! 仅在启用 `redis` feature 时编译

#[cfg(feature = "redis")]
use std::time::Duration;

#[cfg(feature = "redis")]
use redis::aio::ConnectionManager;

#[cfg(feature = "redis")]
use super::{BackendKind, BackingStore, StoreError, StoreResult, WindowCount};

#[cfg(feature = "redis")]
use crate::config::app::BackendSettings;

/// 自增计数；首次创建或缺少过期时间时设置窗口 TTL，返回 {count, pttl}
#[cfg(feature = "redis")]
const INCR_WINDOW_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if count == 1 or ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
";

#[cfg(feature = "redis")]
const COMPARE_AND_DELETE_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

/// Redis 连接配置
#[cfg(feature = "redis")]
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub prefix: String,
    pub connect_timeout: Duration,
}

#[cfg(feature = "redis")]
impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            prefix: "cachet".to_string(),
            connect_timeout: Duration::from_millis(2000),
        }
    }
}

#[cfg(feature = "redis")]
impl RedisConfig {
    pub fn new(url: String) -> Self {
        Self {
            url,
            ..Default::default()
        }
    }

    pub fn from_settings(settings: &BackendSettings) -> Self {
        Self {
            url: settings.redis_url.clone(),
            prefix: settings.key_prefix.clone(),
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
        }
    }
}

/// Redis 后端
#[cfg(feature = "redis")]
pub struct RedisBackend {
    manager: ConnectionManager,
    config: RedisConfig,
    incr_window_script: redis::Script,
    compare_and_delete_script: redis::Script,
}

#[cfg(feature = "redis")]
impl RedisBackend {
    pub async fn connect(config: RedisConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.url.clone())
            .map_err(|e| StoreError::Unavailable(format!("Failed to create Redis client: {}", e)))?;
        let manager = tokio::time::timeout(config.connect_timeout, client.get_connection_manager())
            .await
            .map_err(|_| {
                StoreError::Unavailable(format!(
                    "Timed out connecting to Redis after {:?}",
                    config.connect_timeout
                ))
            })?
            .map_err(|e| {
                StoreError::Unavailable(format!("Failed to create connection manager: {}", e))
            })?;

        let backend = Self {
            manager,
            config,
            incr_window_script: redis::Script::new(INCR_WINDOW_SCRIPT),
            compare_and_delete_script: redis::Script::new(COMPARE_AND_DELETE_SCRIPT),
        };
        backend.ping().await?;
        Ok(backend)
    }

    fn make_key(&self, key: &str) -> String {
        format!("{}:{}", self.config.prefix, key)
    }
}

#[cfg(feature = "redis")]
fn command_error(e: redis::RedisError) -> StoreError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
    {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Command(e.to_string())
    }
}

#[cfg(feature = "redis")]
#[async_trait::async_trait]
impl BackingStore for RedisBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Redis
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(self.make_key(key))
            .query_async(&mut conn)
            .await
            .map_err(command_error)
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.make_key(key))
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(reply.is_some())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let mut conn = self.manager.clone();
        let removed: i64 = self
            .compare_and_delete_script
            .key(self.make_key(key))
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(removed > 0)
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.manager.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(self.make_key(key))
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(removed > 0)
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let mut conn = self.manager.clone();
        let pttl: i64 = redis::cmd("PTTL")
            .arg(self.make_key(key))
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(match pttl {
            -2 => None,
            -1 => Some(Duration::MAX),
            ms => Some(Duration::from_millis(ms.max(0) as u64)),
        })
    }

    async fn incr_window(&self, key: &str, window: Duration) -> StoreResult<WindowCount> {
        let mut conn = self.manager.clone();
        let (count, pttl): (i64, i64) = self
            .incr_window_script
            .key(self.make_key(key))
            .arg(window.as_millis().max(1) as u64)
            .invoke_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(WindowCount {
            count: count.max(0) as u64,
            remaining: Duration::from_millis(pttl.max(0) as u64),
        })
    }
}

#[cfg(feature = "redis")]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_config_default() {
        let config = RedisConfig::default();
        assert_eq!(config.url, "redis://127.0.0.1:6379");
        assert_eq!(config.prefix, "cachet");
    }

    #[test]
    fn test_redis_config_from_settings() {
        let settings = BackendSettings {
            redis_url: "redis://cache.internal:6380".to_string(),
            key_prefix: "tenant-a".to_string(),
            connect_timeout_ms: 250,
            ..Default::default()
        };
        let config = RedisConfig::from_settings(&settings);
        assert_eq!(config.url, "redis://cache.internal:6380");
        assert_eq!(config.prefix, "tenant-a");
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_redis_reports_unavailable() {
        let config = RedisConfig {
            url: "redis://127.0.0.1:1".to_string(),
            connect_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let result = RedisBackend::connect(config).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }
}
