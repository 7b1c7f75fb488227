// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 路由树
//!
//! 以 `/` 切分路径，逐段建立一棵大小写敏感的前缀树。每个节点包含：
//! - 字面量子节点表（按片段原文索引）；
//! - 至多一个参数子节点（`:name`），参数名记录在父节点上；
//! - 至多一个通配子节点（`*`）；
//! - 方法名到处理器的映射，`ALL` 匹配该节点上没有更具体注册的任意方法。
//!
//! 查找时在每一层优先匹配字面量，其次参数，通配节点只作为回退候选被记住。
//! 匹配过程不回溯：一旦沿字面量分支走入死路，只会回退到最近记住的通配节点。
//!
//! 同一节点上字面量与参数定义重叠、或同一方法与路径重复注册时，后注册者静默覆盖，
//! 不做冲突检测。这很容易造成路由被悄悄遮蔽，注册时需要留意。

use std::{collections::HashMap, sync::Mutex};

use log::{debug, warn};
use percent_encoding::percent_decode_str;

use crate::{
    cache::{CacheEntry, RouteCache},
    param::ALL,
    request::Params,
};

/// 一个或多个字符串（路径或方法名），用于注册接口。
#[derive(Debug, Clone, PartialEq)]
pub struct OneOrMany(pub Vec<String>);

impl From<&str> for OneOrMany {
    fn from(value: &str) -> Self {
        Self(vec![value.to_string()])
    }
}

impl From<String> for OneOrMany {
    fn from(value: String) -> Self {
        Self(vec![value])
    }
}

impl From<&[&str]> for OneOrMany {
    fn from(values: &[&str]) -> Self {
        Self(values.iter().map(|v| v.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for OneOrMany {
    fn from(values: [&str; N]) -> Self {
        Self(values.iter().map(|v| v.to_string()).collect())
    }
}

impl From<Vec<&str>> for OneOrMany {
    fn from(values: Vec<&str>) -> Self {
        Self(values.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for OneOrMany {
    fn from(values: Vec<String>) -> Self {
        Self(values)
    }
}

/// 一次成功的路由查找。
#[derive(Debug, Clone)]
pub struct Match<H> {
    pub handler: H,
    pub params: Params,
    /// 完整的请求路径（不含查询字符串）；通配匹配时同样是完整路径而非匹配到的前缀
    pub path: String,
}

struct ParamChild<H> {
    name: String,
    node: Node<H>,
}

struct Node<H> {
    children: HashMap<String, Node<H>>,
    param: Option<Box<ParamChild<H>>>,
    wildcard: Option<Box<Node<H>>>,
    methods: HashMap<String, H>,
}

impl<H> Node<H> {
    fn new() -> Self {
        Self {
            children: HashMap::new(),
            param: None,
            wildcard: None,
            methods: HashMap::new(),
        }
    }

    // 依次尝试给定的方法，都没有时才使用 ALL
    fn handler(&self, methods: &[&str]) -> Option<&H> {
        methods
            .iter()
            .find_map(|method| self.methods.get(*method))
            .or_else(|| self.methods.get(ALL))
    }
}

/// 按方法与路径存放处理器的分段路由树，可选带 LRU 查找缓存。
pub struct RouteTree<H> {
    root: Node<H>,
    cache: Option<Mutex<RouteCache<H>>>,
}

impl<H: Clone> Default for RouteTree<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Clone> RouteTree<H> {
    /// 不带缓存的路由树
    pub fn new() -> Self {
        Self {
            root: Node::new(),
            cache: None,
        }
    }

    /// 带查找缓存的路由树，`capacity` 为 0 时不启用缓存
    pub fn with_cache(capacity: usize) -> Self {
        Self {
            root: Node::new(),
            cache: RouteCache::from_capacity(capacity).map(Mutex::new),
        }
    }

    /// 为 `method` 与每个给定路径注册 `handler`。
    ///
    /// 路径末尾连续的多个 `/` 折叠为一个，因此 `/path` 与 `/path/` 是两条不同的路由。
    pub fn add(&mut self, method: &str, paths: impl Into<OneOrMany>, handler: H) {
        for path in paths.into().0 {
            let path = normalize(&path);
            debug!("注册路由：{} {}", method, path);

            let mut node = &mut self.root;
            for segment in path.split('/') {
                node = if segment == "*" {
                    &mut **node.wildcard.get_or_insert_with(|| Box::new(Node::new()))
                } else if let Some(name) = segment.strip_prefix(':') {
                    let param = node.param.get_or_insert_with(|| {
                        Box::new(ParamChild {
                            name: name.to_string(),
                            node: Node::new(),
                        })
                    });
                    if param.name != name {
                        warn!("参数名 {} 覆盖了同一位置上的 {}（{}）", name, param.name, path);
                        param.name = name.to_string();
                    }
                    &mut param.node
                } else {
                    node.children.entry(segment.to_string()).or_insert_with(Node::new)
                };
            }
            node.methods.insert(method.to_string(), handler.clone());
        }

        // 新的注册可能改变已缓存路径的结果
        if let Some(cache) = self.cache.as_mut() {
            match cache.get_mut() {
                Ok(cache) => cache.clear(),
                Err(poisoned) => poisoned.into_inner().clear(),
            }
        }
    }

    /// 解析一个请求；`url` 中 `?` 之后的查询字符串会被忽略。未命中时返回 `None`。
    pub fn find(&self, method: &str, url: &str) -> Option<Match<H>> {
        self.find_first(&[method], url)
    }

    /// 与 `find` 相同，但在每个节点上按顺序尝试 `methods`，例如 HEAD 请求先找 `HEAD` 再找 `GET`。
    pub fn find_first(&self, methods: &[&str], url: &str) -> Option<Match<H>> {
        let pathname = url.split('?').next().unwrap_or_default();

        let Some(cache) = &self.cache else {
            return self.walk(methods, pathname).map(CacheEntry::into_match);
        };

        let key = RouteCache::<H>::key(&methods.join(","), pathname);
        if let Some(entry) = lock(cache).find(&key) {
            debug!("路由缓存命中：{}", key);
            return Some(entry.into_match());
        }
        let entry = self.walk(methods, pathname)?;
        lock(cache).push(key, entry.clone());
        Some(entry.into_match())
    }

    /// 当前缓存的条目数，未启用缓存时为 0
    pub fn cached(&self) -> usize {
        self.cache.as_ref().map_or(0, |cache| lock(cache).len())
    }

    fn walk(&self, methods: &[&str], pathname: &str) -> Option<CacheEntry<H>> {
        let mut node = &self.root;
        // 最近记住的通配节点
        let mut fallback: Option<&Node<H>> = None;
        let mut raw_params: Vec<(String, String)> = Vec::new();
        let mut exhausted = true;

        for segment in pathname.split('/') {
            if let Some(wildcard) = node.wildcard.as_deref() {
                fallback = Some(wildcard);
            }
            if let Some(child) = node.children.get(segment) {
                node = child;
                continue;
            }
            match node.param.as_deref() {
                Some(param) => {
                    raw_params.push((param.name.clone(), segment.to_string()));
                    node = &param.node;
                }
                None => {
                    exhausted = false;
                    break;
                }
            }
        }

        let direct = match exhausted {
            true => node.handler(methods),
            false => None,
        };
        let handler = match direct {
            Some(handler) => handler,
            // 回退到通配节点时保留沿途已捕获的全部参数
            None => fallback?.handler(methods)?,
        };

        Some(CacheEntry {
            handler: handler.clone(),
            raw_params,
            path: pathname.to_string(),
        })
    }
}

impl<H> CacheEntry<H> {
    fn into_match(self) -> Match<H> {
        let mut params = Params::new();
        for (name, raw) in self.raw_params {
            match decode_segment(&raw) {
                Some(value) => params.insert(name, value),
                None => debug!("参数 {} 的值 {} 无法解码，忽略", name, raw),
            }
        }
        Match {
            handler: self.handler,
            params,
            path: self.path,
        }
    }
}

fn lock<H>(cache: &Mutex<RouteCache<H>>) -> std::sync::MutexGuard<'_, RouteCache<H>> {
    match cache.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("路由缓存锁被污染，恢复并继续");
            poisoned.into_inner()
        }
    }
}

/// 折叠末尾连续的 `/`，并保证以 `/` 开头
fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    let path = match trimmed.len() < path.len() {
        true => &path[..trimmed.len() + 1],
        false => path,
    };
    match path.starts_with('/') {
        true => path.to_string(),
        false => ["/", path].concat(),
    }
}

/// 百分号解码；转义序列残缺或结果不是合法 UTF-8 时返回 `None`
fn decode_segment(raw: &str) -> Option<String> {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return None;
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    percent_decode_str(raw)
        .decode_utf8()
        .ok()
        .map(|value| value.into_owned())
}
