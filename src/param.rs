// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 路由协议参数与常量模块
//!
//! 该模块定义了请求分发核心所遵循的 HTTP 协议相关常量和数据结构，包括：
//! - 路由注册时可用的 HTTP 方法名，以及匹配任意方法的 `ALL`。
//! - 常见的 HTTP 状态码及其原因短语（Reason Phrase）。
//! - HTTP 协议版本的强类型枚举。

use std::collections::HashMap;
use lazy_static::lazy_static;

/// 服务器名称标识，用于 HTTP 响应头的 `Server` 字段
pub const SERVER_NAME: &str = "webrouter";

/// HTTP 协议规定的换行符（Carriage Return Line Feed）
pub const CRLF: &str = "\r\n";

/// 特殊的“方法”名：在同一节点上没有更具体的方法注册时匹配任意方法。
pub const ALL: &str = "ALL";

/// 分发器为之提供快捷注册函数的标准 HTTP 方法。
pub const METHODS: [&str; 9] = [
    "GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "OPTIONS", "TRACE", "CONNECT",
];

lazy_static! {
    /// HTTP 状态码与其对应的标准原因短语映射表。
    ///
    /// 参考标准：[RFC 9110: HTTP Semantics](https://www.rfc-editor.org/rfc/rfc9110.html)。
    pub static ref STATUS_CODES: HashMap<u16, &'static str> = {
        let mut map = HashMap::new();
        // 1xx: 信息响应 (Informational)
        map.insert(100, "Continue");
        map.insert(101, "Switching Protocols");
        
        // 2xx: 成功响应 (Successful)
        map.insert(200, "OK");
        map.insert(201, "Created");
        map.insert(202, "Accepted");
        map.insert(203, "Non-Authoritative Information");
        map.insert(204, "No Content");
        map.insert(205, "Reset Content");
        map.insert(206, "Partial Content");
        
        // 3xx: 重定向 (Redirection)
        map.insert(300, "Multiple Choices");
        map.insert(301, "Moved Permanently");
        map.insert(302, "Found");
        map.insert(303, "See Other");
        map.insert(304, "Not Modified");
        map.insert(305, "Use Proxy");
        // 306 已弃用 (Reserved)
        map.insert(307, "Temporary Redirect");
        map.insert(308, "Permanent Redirect");
        
        // 4xx: 客户端错误 (Client Error)
        map.insert(400, "Bad Request");
        map.insert(401, "Unauthorized");
        map.insert(402, "Payment Required");
        map.insert(403, "Forbidden");
        map.insert(404, "Not Found");
        map.insert(405, "Method Not Allowed");
        map.insert(406, "Not Acceptable");
        map.insert(407, "Proxy Authentication Required");
        map.insert(408, "Request Timeout");
        map.insert(409, "Conflict");
        map.insert(410, "Gone");
        map.insert(411, "Length Required");
        map.insert(412, "Precondition Failed");
        map.insert(413, "Content Too Large");
        map.insert(414, "URI Too Long");
        map.insert(415, "Unsupported Media Type");
        map.insert(416, "Range Not Satisfiable");
        map.insert(417, "Expectation Failed");
        map.insert(418, "I'm a teapot");
        map.insert(421, "Misdirected Request");
        map.insert(422, "Unprocessable Content");
        map.insert(426, "Upgrade Required");
        
        // 5xx: 服务端错误 (Server Error)
        map.insert(500, "Internal Server Error");
        map.insert(501, "Not Implemented");
        map.insert(502, "Bad Gateway");
        map.insert(503, "Service Unavailable");
        map.insert(504, "Gateway Timeout");
        map.insert(505, "HTTP Version Not Supported");
        map
    };
}

/// 支持的 HTTP 协议版本
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HttpVersion {
    /// HTTP/1.0 版本
    V1_0,
    /// HTTP/1.1 版本
    V1_1,
}

use std::fmt;

impl fmt::Display for HttpVersion {
    /// 将枚举格式化为 HTTP 报文中的版本字符串
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpVersion::V1_0 => write!(f, "1.0"),
            HttpVersion::V1_1 => write!(f, "1.1"),
        }
    }
}

/// 查询状态码对应的原因短语，未知状态码返回 `None`。
pub fn reason_phrase(code: u16) -> Option<&'static str> {
    STATUS_CODES.get(&code).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_phrase() {
        assert_eq!(reason_phrase(200), Some("OK"));
        assert_eq!(reason_phrase(404), Some("Not Found"));
        assert_eq!(reason_phrase(999), None);
    }

    #[test]
    fn test_methods_are_uppercase() {
        assert!(METHODS.iter().all(|m| m.chars().all(|c| c.is_ascii_uppercase())));
        assert!(!METHODS.contains(&ALL));
    }
}
