// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;

use super::entry::CacheOptions;
use super::refresh::FetchResult;
use crate::config::WarmupSeed;

/// 待预热的条目
pub struct WarmupEntry {
    pub key: String,
    pub options: CacheOptions,
    pub fetch: BoxFuture<'static, FetchResult>,
}

impl WarmupEntry {
    pub fn new<F>(key: impl Into<String>, options: CacheOptions, fetch: F) -> Self
    where
        F: Future<Output = FetchResult> + Send + 'static,
    {
        Self {
            key: key.into(),
            options,
            fetch: fetch.boxed(),
        }
    }
}

impl std::fmt::Debug for WarmupEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarmupEntry")
            .field("key", &self.key)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// 预热结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct WarmupReport {
    pub loaded: Vec<String>,
    pub failed: Vec<String>,
}

/// 预热数据源
///
/// 每个类别对应一个数据源，管理接口按类别触发预热。
#[async_trait::async_trait]
pub trait WarmupSource: Send + Sync {
    async fn entries(&self) -> anyhow::Result<Vec<WarmupEntry>>;
}

/// 由配置文件中的 `[[cache.warmup]]` 构造的静态数据源
#[derive(Debug, Clone)]
pub struct StaticWarmupSource {
    seeds: Vec<WarmupSeed>,
    default_ttl: Duration,
}

impl StaticWarmupSource {
    pub fn new(seeds: Vec<WarmupSeed>, default_ttl: Duration) -> Self {
        Self { seeds, default_ttl }
    }

    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }
}

#[async_trait::async_trait]
impl WarmupSource for StaticWarmupSource {
    async fn entries(&self) -> anyhow::Result<Vec<WarmupEntry>> {
        Ok(self
            .seeds
            .iter()
            .map(|seed| {
                let ttl = seed
                    .ttl_seconds
                    .map(Duration::from_secs)
                    .unwrap_or(self.default_ttl);
                let options = CacheOptions::new(ttl).with_tags(seed.tags.clone());
                let value = seed.value.clone();
                WarmupEntry::new(seed.key.clone(), options, async move { Ok(value) })
            })
            .collect())
    }
}

/// 按类别登记的预热数据源
#[derive(Default)]
pub struct WarmupRegistry {
    sources: BTreeMap<String, Arc<dyn WarmupSource>>,
}

impl WarmupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记数据源，同名类别会被替换
    pub fn register(&mut self, category: impl Into<String>, source: Arc<dyn WarmupSource>) {
        self.sources.insert(category.into(), source);
    }

    pub fn get(&self, category: &str) -> Option<Arc<dyn WarmupSource>> {
        self.sources.get(category).cloned()
    }

    pub fn categories(&self) -> Vec<String> {
        self.sources.keys().cloned().collect()
    }
}
