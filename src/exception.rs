// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 定义请求分发过程中可能出现的各类异常。
//!
//! ## 设计意图
//! - **统一通道**：处理器显式返回的错误、处理器 panic、路由未命中，都会被归一化为 `Exception`，
//!   沿同一条错误通道流向错误处理器或最终兜底处理器。
//! - **语义映射**：每个变体都能通过 `status_code()` 映射为 HTTP 状态码。
//! - **可记录**：实现了 `Display` 与 `std::error::Error`，可直接写入日志。

use std::{error::Error, fmt, io};

/// 请求处理过程中发生的异常。
#[derive(Debug)]
pub enum Exception {
    /// 客户端发送的请求字节流不是合法的 UTF-8。
    RequestIsNotUtf8,
    /// 请求行缺少方法、路径或协议版本。
    MalformedRequestLine,
    /// 客户端使用了不支持的 HTTP 协议版本。
    UnsupportedHttpVersion,
    /// 路由树中没有匹配的路由，或者管道走完了却没有任何处理器结束响应。对应 `404 Not Found`。
    NotFound,
    /// 处理器主动报告的、带状态码的错误。
    Http { status: u16, message: String },
    /// 处理器在执行过程中 panic。
    HandlerPanicked(String),
    /// 处理器透传的其他错误。
    Other(Box<dyn Error + Send + Sync>),
    /// 配置文件无法读取。
    ConfigUnreadable(String),
}

use Exception::*;

impl Exception {
    /// 构造一个带状态码的错误。
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Http {
            status,
            message: message.into(),
        }
    }

    /// 包装任意错误。
    pub fn other<E>(err: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Other(Box::new(err))
    }

    /// 该异常对应的 HTTP 状态码。
    pub fn status_code(&self) -> u16 {
        match self {
            RequestIsNotUtf8 | MalformedRequestLine => 400,
            UnsupportedHttpVersion => 505,
            NotFound => 404,
            Http { status, .. } => *status,
            HandlerPanicked(_) | Other(_) | ConfigUnreadable(_) => 500,
        }
    }

    /// 从 panic 负载中提取可读信息。
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        HandlerPanicked(message)
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestIsNotUtf8 => write!(f, "Request bytes can't be parsed in UTF-8"),
            MalformedRequestLine => write!(f, "Malformed request line"),
            UnsupportedHttpVersion => write!(f, "Unsupported HTTP version"),
            NotFound => write!(f, "Not found (404)"),
            Http { status, message } => write!(f, "{} ({})", message, status),
            HandlerPanicked(msg) => write!(f, "Handler panicked: {}", msg),
            Other(e) => write!(f, "{}", e),
            ConfigUnreadable(msg) => write!(f, "Config file unreadable: {}", msg),
        }
    }
}

impl Error for Exception {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for Exception {
    fn from(err: io::Error) -> Self {
        Other(Box::new(err))
    }
}

impl From<&str> for Exception {
    fn from(message: &str) -> Self {
        Self::http(500, message)
    }
}

impl From<String> for Exception {
    fn from(message: String) -> Self {
        Self::http(500, message)
    }
}
