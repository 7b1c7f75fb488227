// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use serde_derive::Deserialize;
use serde_derive::Serialize;

use log::{error, warn};
use std::fs::File;
use std::io::prelude::*;

use crate::exception::Exception;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_local")]
    local: bool,
    #[serde(default)]
    worker_threads: usize,
    #[serde(default = "default_route_cache_size")]
    route_cache_size: usize,
    #[serde(default = "default_read_buffer_size")]
    read_buffer_size: usize,
}

fn default_port() -> u16 {
    7878
}

fn default_local() -> bool {
    true
}

fn default_route_cache_size() -> usize {
    1000
}

fn default_read_buffer_size() -> usize {
    8192 // 8KB
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            port: default_port(),
            local: default_local(),
            worker_threads: 0,
            route_cache_size: default_route_cache_size(),
            read_buffer_size: default_read_buffer_size(),
        }
        .resolved()
    }

    /// 从 TOML 文件读取配置。
    ///
    /// 文件无法读取时返回错误；内容无法解析时记录日志并使用默认配置。
    pub fn from_toml(filename: &str) -> Result<Self, Exception> {
        let mut file = File::open(filename).map_err(|e| {
            error!("无法打开配置文件{}：{}", filename, e);
            Exception::ConfigUnreadable(format!("{}: {}", filename, e))
        })?;
        let mut str_val = String::new();
        file.read_to_string(&mut str_val).map_err(|e| {
            error!("读取配置文件{}时出错：{}", filename, e);
            Exception::ConfigUnreadable(format!("{}: {}", filename, e))
        })?;

        Ok(Self::from_toml_str(&str_val))
    }

    /// 从 TOML 文本解析配置，解析失败时使用默认配置。
    pub fn from_toml_str(content: &str) -> Self {
        match toml::from_str::<Config>(content) {
            Ok(config) => config.resolved(),
            Err(e) => {
                error!("无法成功从配置文件构建配置对象，使用默认配置：{}", e);
                Config::new()
            }
        }
    }

    fn resolved(mut self) -> Self {
        if self.worker_threads == 0 {
            self.worker_threads = num_cpus::get();
        }
        if self.read_buffer_size == 0 {
            warn!("read_buffer_size被设置为0，无法读取任何请求，因此该值将被改为{}。", default_read_buffer_size());
            self.read_buffer_size = default_read_buffer_size();
        }
        self
    }
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    /// 路由查找缓存容量，0 表示不启用
    pub fn route_cache_size(&self) -> usize {
        self.route_cache_size
    }

    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }
}
