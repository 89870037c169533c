// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use lru::LruCache;

/// 访问顺序
///
/// 只记录键的新近度，条目本身保存在 `EntryStore` 中。每次 touch 都会把键移到
/// 最近端，因此访问时间相同的键按插入顺序淘汰。
#[derive(Debug)]
pub struct LruOrder {
    order: LruCache<String, ()>,
}

impl LruOrder {
    pub fn new() -> Self {
        Self {
            order: LruCache::unbounded(),
        }
    }

    /// 将键移到最近使用端，O(1)
    pub fn touch(&mut self, key: &str) {
        if self.order.contains(key) {
            self.order.promote(key);
        } else {
            self.order.push(key.to_string(), ());
        }
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.order.pop(key).is_some()
    }

    /// 弹出最久未使用的键
    pub fn pop_lru(&mut self) -> Option<String> {
        self.order.pop_lru().map(|(key, _)| key)
    }

    pub fn peek_lru(&self) -> Option<&str> {
        self.order.peek_lru().map(|(key, _)| key.as_str())
    }

    /// 从最久未使用到最近使用
    pub fn iter_lru(&self) -> impl Iterator<Item = &str> {
        self.order.iter().rev().map(|(key, _)| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
    }
}

impl Default for LruOrder {
    fn default() -> Self {
        Self::new()
    }
}
