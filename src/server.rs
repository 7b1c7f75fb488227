// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 传输层
//!
//! 一个很薄的 TCP 前端：每个连接读取一个请求，交给分发器处理，写回响应后关闭连接。

use std::{sync::Arc, time::Instant};

use log::{debug, error, info, warn};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

use crate::{config::Config, dispatcher::Dispatcher, request::Request, response::Response};

/// 持续接收新连接，并把每个连接交给独立的任务处理。
pub async fn serve(listener: TcpListener, dispatcher: Arc<Dispatcher>, config: Arc<Config>) {
    let mut id: u128 = 0;

    loop {
        let (mut stream, addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("接受TCP连接时出错：{}", e);
                continue;
            }
        };
        debug!("[ID{}]TCP连接已建立：{}", id, addr);

        let dispatcher = Arc::clone(&dispatcher);
        let config = Arc::clone(&config);
        tokio::spawn(async move {
            handle_connection(&mut stream, id, &dispatcher, &config).await;
        });
        id += 1;
    }
}

/// 读取并解析一个请求，执行分发器，写回响应。
async fn handle_connection(stream: &mut TcpStream, id: u128, dispatcher: &Dispatcher, config: &Config) {
    let mut buffer = vec![0; config.read_buffer_size()];

    let n = match stream.read(&mut buffer).await {
        Ok(0) => return, // 客户端主动关闭连接
        Ok(n) => n,
        Err(e) => {
            error!("[ID{}]读取TCPStream时遇到错误: {}", id, e);
            return;
        }
    };
    debug!("[ID{}]HTTP请求接收完毕", id);

    let start_time = Instant::now();
    let mut response = Response::new();

    match Request::try_from(&buffer[..n], id) {
        Ok(mut request) => {
            dispatcher.handle(&mut request, &mut response).await;

            if response.is_streamed() {
                debug!("[ID{}]响应已被流式协作者接管", id);
                return;
            }
            if !response.is_ended() {
                warn!("[ID{}]没有任何处理器结束响应，返回500", id);
                response.set_code(500);
                response.text("Internal Server Error");
            }

            info!(
                "[ID{}] {}, {}, {}, {}, {}, {}, {}ms",
                id,
                request.version(),
                request.original_url(),
                request.method(),
                response.status_code(),
                response.information(),
                request.user_agent(),
                start_time.elapsed().as_millis(),
            );
        }
        Err(e) => {
            warn!("[ID{}]解析HTTP请求失败：{}", id, e);
            response.set_code(e.status_code());
            response.text(e.to_string());
        }
    }

    let response_bytes = response.as_bytes();
    debug!("[ID{}]发送响应，长度: {}", id, response_bytes.len());
    if let Err(e) = stream.write_all(&response_bytes).await {
        error!("[ID{}]发送响应失败: {}", id, e);
        return;
    }
    if let Err(e) = stream.flush().await {
        warn!("[ID{}]刷新TCPStream失败: {}", id, e);
    }
}
