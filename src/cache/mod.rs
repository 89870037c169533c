// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub mod entry;
pub mod lru_order;
pub mod refresh;
pub mod store;
pub mod tag_index;
pub mod warmup;

pub use entry::{CacheEntry, CacheOptions, CacheStrategy, StaleRead, measure_value};
pub use lru_order::LruOrder;
pub use refresh::{FetchResult, RefreshCoordinator, RefreshSettings, TaskKind};
pub use store::{CacheStats, EntryStore, EvictionTarget, SetOutcome, StoreLimits};
pub use tag_index::TagIndex;
pub use warmup::{StaticWarmupSource, WarmupEntry, WarmupReport, WarmupRegistry, WarmupSource};
