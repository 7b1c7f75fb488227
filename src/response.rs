// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use crate::{exception::Exception, param::*};

use bytes::Bytes;
use chrono::prelude::*;
use log::warn;
use serde::Serialize;

/// HTTP 响应。
///
/// 除了状态行、标头与正文之外，还携带三个由管道驱动器和协作者读写的标志：
/// - `ended`：某个处理器已经结束了响应，管道不再推进；
/// - `streamed`：流式协作者已接管原始输出，管道同样停止推进且不调用 `done`；
/// - `head_only`：HEAD 请求被当作 GET 路由，序列化时省略正文。
#[derive(Debug, Clone)]
pub struct Response {
    version: HttpVersion,
    status_code: u16,
    information: String,
    content_type: Option<String>,
    headers: Vec<(String, String)>,
    date: DateTime<Utc>,
    server_name: String,
    content: Option<Bytes>,
    ended: bool,
    streamed: bool,
    head_only: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            version: HttpVersion::V1_1,
            status_code: 200,
            information: "OK".to_string(),
            content_type: None,
            headers: Vec::new(),
            date: Utc::now(),
            server_name: SERVER_NAME.to_string(),
            content: None,
            ended: false,
            streamed: false,
            head_only: false,
        }
    }

    pub fn set_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.information = match reason_phrase(code) {
            Some(phrase) => phrase.to_string(),
            None => {
                warn!("未知的状态码：{}", code);
                "Unknown Status".to_string()
            }
        };
        self
    }

    pub fn set_content_type(&mut self, content_type: &str) -> &mut Self {
        self.content_type = Some(content_type.to_string());
        self
    }

    /// 设置标头，同名（大小写不敏感）标头会被替换。
    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        match self
            .headers
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            Some(index) => self.headers[index].1 = value.to_string(),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        if name.eq_ignore_ascii_case("content-type") {
            return self.content_type.as_deref();
        }
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn set_date(&mut self) -> &mut Self {
        self.date = Utc::now();
        self
    }

    /// 写入正文并结束响应。已结束的响应再次调用会被忽略。
    pub fn end(&mut self, body: impl Into<Bytes>) {
        if self.ended {
            warn!("响应已经结束，忽略重复的end调用");
            return;
        }
        self.content = Some(body.into());
        self.set_date();
        self.ended = true;
    }

    pub fn text(&mut self, body: impl Into<String>) {
        self.set_content_type("text/plain;charset=utf-8");
        self.end(body.into());
    }

    pub fn html(&mut self, body: impl Into<String>) {
        self.set_content_type("text/html;charset=utf-8");
        self.end(body.into());
    }

    pub fn json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Exception> {
        let body = serde_json::to_vec(value).map_err(Exception::other)?;
        self.set_content_type("application/json");
        self.end(body);
        Ok(())
    }

    /// 标记流式协作者已接管输出。
    pub fn mark_streamed(&mut self) {
        self.streamed = true;
    }

    pub(crate) fn set_head_only(&mut self, head_only: bool) {
        self.head_only = head_only;
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let version = match self.version {
            HttpVersion::V1_0 => "HTTP/1.0",
            HttpVersion::V1_1 => "HTTP/1.1",
        };
        let content: &[u8] = match &self.content {
            Some(c) => c,
            None => b"",
        };

        let mut header = format!("{} {} {}{}", version, self.status_code, self.information, CRLF);
        if let Some(t) = &self.content_type {
            header.push_str(&["Content-Type: ", t, CRLF].concat());
        }
        // HEAD 响应保留正文长度，但不发送正文
        header.push_str(&format!("Content-Length: {}{}", content.len(), CRLF));
        header.push_str(&["Date: ", &format_date(&self.date), CRLF].concat());
        header.push_str(&["Server: ", &self.server_name, CRLF].concat());
        for (name, value) in &self.headers {
            header.push_str(&[name.as_str(), ": ", value.as_str(), CRLF].concat());
        }
        header.push_str(CRLF);

        match self.head_only {
            true => header.into_bytes(),
            false => [header.as_bytes(), content].concat(),
        }
    }
}

impl Response {
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn information(&self) -> &str {
        &self.information
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.content.as_ref()
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn is_streamed(&self) -> bool {
        self.streamed
    }

    pub fn is_head_only(&self) -> bool {
        self.head_only
    }
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
