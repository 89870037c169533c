// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub const MAX_RAW_BACKEND_KEY_LEN: usize = 200;
pub const RATE_LIMIT_NAMESPACE: &str = "ratelimit";
pub const REFRESH_LEASE_NAMESPACE: &str = "lease:refresh";
pub const DEFAULT_TTL_SECS: u64 = 300;
pub const MAX_TAGS_PER_ENTRY: usize = 64;
pub const MAX_KEY_LENGTH: usize = 1024;
