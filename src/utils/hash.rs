// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::hash::Hasher;
use xxhash_rust::xxh3::Xxh3;

use super::constants::MAX_RAW_BACKEND_KEY_LEN;

/// 计算键的 xxh3 哈希
pub fn hash_key(key: &str) -> u64 {
    let mut hasher = Xxh3::default();
    hasher.write(key.as_bytes());
    hasher.finish()
}

/// 生成后端存储使用的命名空间键
///
/// 过长的原始键会被替换为其哈希值，避免远程存储的键无限增长
pub fn backend_key(namespace: &str, raw: &str) -> String {
    if raw.len() > MAX_RAW_BACKEND_KEY_LEN {
        format!("{}:#{:016x}", namespace, hash_key(raw))
    } else {
        format!("{}:{}", namespace, raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_key_is_stable() {
        assert_eq!(hash_key("user:42"), hash_key("user:42"));
        assert_ne!(hash_key("user:42"), hash_key("user:43"));
    }

    #[test]
    fn test_backend_key_short_keys_are_readable() {
        assert_eq!(backend_key("ratelimit", "ip:10.0.0.1"), "ratelimit:ip:10.0.0.1");
    }

    #[test]
    fn test_backend_key_long_keys_are_hashed() {
        let raw = "x".repeat(MAX_RAW_BACKEND_KEY_LEN + 1);
        let key = backend_key("lease", &raw);
        assert!(key.starts_with("lease:#"));
        assert_eq!(key.len(), "lease:#".len() + 16);
    }
}
