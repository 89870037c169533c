// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod rate_limit;
pub mod routes;
pub mod service;
pub mod state;
pub mod utils;

pub use backend::{BackingStore, connect_backend};
pub use cache::{CacheOptions, CacheStats, CacheStrategy, EntryStore, RefreshCoordinator};
pub use config::{AppConfig, ServerConfig};
pub use error::{AppError, CacheError};
pub use rate_limit::{RateLimitDecision, RateLimiter};
pub use routes::create_router;
pub use service::CacheService;
pub use state::AppState;
