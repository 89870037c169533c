// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub mod constants;
pub mod hash;

pub use constants::{
    DEFAULT_TTL_SECS, MAX_KEY_LENGTH, MAX_RAW_BACKEND_KEY_LEN, MAX_TAGS_PER_ENTRY,
    RATE_LIMIT_NAMESPACE, REFRESH_LEASE_NAMESPACE,
};
pub use hash::{backend_key, hash_key};

