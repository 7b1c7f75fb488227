// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use std::num::NonZeroUsize;

use lru::LruCache;

/// 缓存中保存的一次成功查找。
///
/// 参数保存的是解码前的原始片段，命中后由路由树重新解码。
#[derive(Clone, Debug)]
pub struct CacheEntry<H> {
    pub handler: H,
    pub raw_params: Vec<(String, String)>,
    pub path: String,
}

/// 路由查找缓存，键为 `方法 + 原始路径`，容量满时淘汰最近最少使用的条目。
pub struct RouteCache<H> {
    cache: LruCache<String, CacheEntry<H>>,
}

impl<H: Clone> RouteCache<H> {
    // 根据容量构造，容量为 0 表示不启用缓存
    pub fn from_capacity(capacity: usize) -> Option<Self> {
        NonZeroUsize::new(capacity).map(|cap| Self {
            cache: LruCache::new(cap),
        })
    }

    pub fn key(method: &str, path: &str) -> String {
        [method, " ", path].concat()
    }

    // 放入
    pub fn push(&mut self, key: String, entry: CacheEntry<H>) {
        self.cache.put(key, entry);
    }

    // 查询，命中时刷新其最近使用位置
    pub fn find(&mut self, key: &str) -> Option<CacheEntry<H>> {
        self.cache.get(key).cloned()
    }

    // 路由表变化后清空
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn contains(&self, key: &str) -> bool {
        self.cache.contains(key)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }
}
