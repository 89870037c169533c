// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// 标签索引：tag -> keys，同时保存反向映射 key -> tags
///
/// 键出现在标签 T 下，当且仅当该键的标签集合包含 T。
#[derive(Debug, Default)]
pub struct TagIndex {
    by_tag: HashMap<String, HashSet<String>>,
    by_key: HashMap<String, BTreeSet<String>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以给定集合替换键的全部标签
    pub fn index_tags(&mut self, key: &str, tags: &BTreeSet<String>) {
        self.unindex_all(key);
        if tags.is_empty() {
            return;
        }
        for tag in tags {
            self.by_tag
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        self.by_key.insert(key.to_string(), tags.clone());
    }

    /// 从所有标签中移除该键，返回它原来的标签
    pub fn unindex_all(&mut self, key: &str) -> BTreeSet<String> {
        let tags = self.by_key.remove(key).unwrap_or_default();
        for tag in &tags {
            if let Some(keys) = self.by_tag.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_tag.remove(tag);
                }
            }
        }
        tags
    }

    pub fn keys_for_tag(&self, tag: &str) -> HashSet<String> {
        self.by_tag.get(tag).cloned().unwrap_or_default()
    }

    /// 多个标签下的键的并集（已去重）
    pub fn keys_for_tags<S: AsRef<str>>(&self, tags: &[S]) -> HashSet<String> {
        tags.iter()
            .filter_map(|tag| self.by_tag.get(tag.as_ref()))
            .flat_map(|keys| keys.iter().cloned())
            .collect()
    }

    pub fn tags_for_key(&self, key: &str) -> Option<&BTreeSet<String>> {
        self.by_key.get(key)
    }

    pub fn tag_counts(&self) -> BTreeMap<String, usize> {
        self.by_tag
            .iter()
            .map(|(tag, keys)| (tag.clone(), keys.len()))
            .collect()
    }

    pub fn tag_count(&self) -> usize {
        self.by_tag.len()
    }

    pub fn clear(&mut self) {
        self.by_tag.clear();
        self.by_key.clear();
    }
}
