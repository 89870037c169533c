// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub mod app;

pub use app::{
    AppConfig, BackendChoice, BackendSettings, CacheSettings, ConfigError, ConfigLoader,
    IdentifierChoice, LoggingSettings, RateLimitSettings, ServerConfig, WarmupSeed,
};
