// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求模块
//!
//! 负责将 TCP 流中读取的原始字节解析为 `Request`，并承载分发过程中
//! 由路由派生出的状态：
//! 1. 请求行（方法、URL、版本）与标头。
//! 2. `original_url`：第一次进入分发器时的 URL 快照，挂载改写 URL 时保持不变。
//! 3. `params` 与 `path`：每次路由命中后重新计算，不会在请求之间共享。

use std::collections::HashMap;

use crate::{exception::Exception, param::*};
use log::error;

/// 路径参数集合（参数名 -> 已解码的值）。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    inner: HashMap<String, String>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.insert(name.into(), value.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for Params
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// 一个 HTTP 请求。
#[derive(Debug, Clone)]
pub struct Request {
    /// 全局请求 ID，用于日志追踪
    id: u128,
    /// 大写的请求方法名
    method: String,
    /// 当前 URL（含查询字符串），挂载时会被逐级截短
    url: String,
    /// 第一次进入分发器时的 URL
    original_url: Option<String>,
    version: HttpVersion,
    /// 按出现顺序保存的标头
    headers: Vec<(String, String)>,
    /// 路由命中后填充的路径参数
    params: Params,
    /// 路由命中后填充的路径（不含查询字符串）
    path: String,
}

impl Request {
    /// 以编程方式构造请求，常用于测试或嵌入其他传输层。
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            id: 0,
            method: method.to_uppercase(),
            url: url.to_string(),
            original_url: None,
            version: HttpVersion::V1_1,
            headers: Vec::new(),
            params: Params::new(),
            path: String::new(),
        }
    }

    /// 附加一个标头（构建器风格）。
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// 设置请求 ID（构建器风格）。
    pub fn with_id(mut self, id: u128) -> Self {
        self.id = id;
        self
    }

    /// 从原始字节缓冲区尝试构建 `Request` 实例。
    ///
    /// # 逻辑步骤
    /// 1. 验证编码：确保请求数据是合法的 UTF-8 字符串。
    /// 2. 解析请求行：提取方法、URL 和协议版本。
    /// 3. 解析标头，直到遇到空行。
    pub fn try_from(buffer: &[u8], id: u128) -> Result<Self, Exception> {
        // 读缓冲区末尾可能是未使用的 0 字节
        let end = buffer.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
        let request_string = match std::str::from_utf8(&buffer[..end]) {
            Ok(string) => string,
            Err(_) => {
                error!("[ID{}]无法解析HTTP请求", id);
                return Err(Exception::RequestIsNotUtf8);
            }
        };

        let mut request_lines = request_string.split(CRLF);
        let first_line = request_lines.next().unwrap_or_default();
        let first_line_parts: Vec<&str> = first_line.split(' ').collect();

        if first_line_parts.len() < 3 {
            error!("[ID{}]HTTP请求行格式不正确：{}", id, first_line);
            return Err(Exception::MalformedRequestLine);
        }

        let method = first_line_parts[0].to_uppercase();
        if method.is_empty() || !method.chars().all(|c| c.is_ascii_alphabetic()) {
            error!("[ID{}]非法的HTTP请求方法：{}", id, &method);
            return Err(Exception::MalformedRequestLine);
        }

        let version_str = first_line_parts[first_line_parts.len() - 1].to_uppercase();
        let version = match version_str.as_str() {
            "HTTP/1.1" => HttpVersion::V1_1,
            "HTTP/1.0" => HttpVersion::V1_0,
            _ => {
                error!("[ID{}]不支持的HTTP协议版本：{}", id, &version_str);
                return Err(Exception::UnsupportedHttpVersion);
            }
        };

        // 路径中可能包含空格，虽然不规范但通过 join 尝试恢复
        let url = first_line_parts[1..first_line_parts.len() - 1].join(" ");

        let headers = request_lines
            .take_while(|line| !line.is_empty())
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
            .collect();

        Ok(Self {
            id,
            method,
            url,
            original_url: None,
            version,
            headers,
            params: Params::new(),
            path: String::new(),
        })
    }
}

impl Request {
    pub fn id(&self) -> u128 {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// 当前 URL（含查询字符串）
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = url.into();
    }

    /// 第一次进入分发器时的 URL；尚未进入分发器时为当前 URL。
    pub fn original_url(&self) -> &str {
        self.original_url.as_deref().unwrap_or(&self.url)
    }

    /// 记录原始 URL，重复调用不会覆盖。
    pub(crate) fn snapshot_original_url(&mut self) {
        if self.original_url.is_none() {
            self.original_url = Some(self.url.clone());
        }
    }

    pub fn version(&self) -> HttpVersion {
        self.version
    }

    /// 按名称查找标头，名称大小写不敏感。
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn user_agent(&self) -> &str {
        self.header("user-agent").unwrap_or_default()
    }

    pub fn accept(&self) -> Option<&str> {
        self.header("accept")
    }

    /// 当前 URL 中 `?` 之后的部分
    pub fn query(&self) -> Option<&str> {
        self.url.split_once('?').map(|(_, q)| q)
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// 路由命中的路径（不含查询字符串）
    pub fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn set_route(&mut self, params: Params, path: String) {
        self.params = params;
        self.path = path;
    }
}
