// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub mod cache_service;

pub use cache_service::{AdminOutcome, CacheService};
