// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 演示服务器
//!
//! 加载配置与日志，构建一组演示路由，并在 Tokio 运行时上启动传输层：
//! - `GET /`：欢迎页
//! - `GET /users/:user`：以 JSON 返回路径参数
//! - `ALL /api/*`：挂载的子分发器
//! - 每个请求都经过一个记录访问日志的前置钩子

use std::{
    net::{Ipv4Addr, SocketAddrV4},
    process,
    sync::Arc,
};

use log::{debug, error, info};
use serde_json::json;
use tokio::{net::TcpListener, runtime::Builder};

use webrouter::{Config, Dispatcher, DispatcherOptions, Exception, Handler, HtmlBuilder, Layer};

fn main() {
    // 1. 初始化日志系统：通过外部 YAML 配置级别与输出目的地
    if let Err(e) = log4rs::init_file("config/log4rs.yaml", Default::default()) {
        eprintln!("无法初始化日志系统：{}", e);
        process::exit(1);
    }

    // 2. 环境配置加载：从 TOML 文件读取运行参数
    let config = match Config::from_toml("config/development.toml") {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };
    info!("配置文件已载入");

    // 3. 异步运行时：根据配置文件分配工作线程数
    let runtime = match Builder::new_multi_thread()
        .worker_threads(config.worker_threads())
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("无法构建Tokio运行时：{}", e);
            process::exit(1);
        }
    };

    let dispatcher = Arc::new(build_dispatcher(&config));
    for (method, path) in dispatcher.routes() {
        debug!("已注册路由：{} {}", method, path);
    }

    runtime.block_on(async move {
        // 4. 网络层初始化：支持全地址监听或本地回环监听
        let port = config.port();
        let address = match config.local() {
            true => Ipv4Addr::new(127, 0, 0, 1),
            false => Ipv4Addr::new(0, 0, 0, 0),
        };
        let socket = SocketAddrV4::new(address, port);
        let listener = match TcpListener::bind(socket).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("无法绑定端口：{}，错误：{}", port, e);
                process::exit(1);
            }
        };
        info!("服务端将在{}上监听Socket连接", socket);

        webrouter::server::serve(listener, dispatcher, Arc::new(config)).await;
    });
}

fn build_dispatcher(config: &Config) -> Dispatcher {
    let mut app = Dispatcher::with_options(DispatcherOptions {
        cache_size: config.route_cache_size(),
        ..Default::default()
    });

    app.pre_hook(Handler::sync(|req, _res, next| {
        debug!("[ID{}]{} {}", req.id(), req.method(), req.url());
        next.pass();
        Ok(())
    }));

    app.get(
        "/",
        Handler::sync(|_req, res, _next| {
            res.html(HtmlBuilder::from_status_code(200, Some("webrouter 正在运行")).build());
            Ok(())
        }),
    );

    app.get(
        "/users/:user",
        Handler::future(|req, res| {
            Box::pin(async move {
                let user = req
                    .params()
                    .get("user")
                    .ok_or_else(|| Exception::http(400, "missing user"))?;
                res.json(&json!({ "user": user }))
            })
        }),
    );

    let mut api = Dispatcher::with_options(DispatcherOptions {
        mount_path: "/api".to_string(),
        ..Default::default()
    });
    api.get(
        "/time",
        Handler::sync(|_req, res, _next| res.json(&json!({ "now": chrono::Utc::now().to_rfc3339() }))),
    );
    api.post(
        "/echo",
        Handler::sync(|req, res, _next| {
            let headers: Vec<_> = req.headers().iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
            res.json(&headers)
        }),
    );
    app.mount(api, Layer::Skip);

    app
}
