// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 分发器
//!
//! 分发器持有一棵路由树，树中每个位置存放一条预先组合好的管道。
//!
//! 注册阶段（启动时，可变借用）：
//! - `get` / `post` / ... / `all` 与 `method`：把 `前置钩子 + 路由处理器 + 后置钩子` 组合成一条管道，
//!   注册到方法与路径的每个组合上；
//! - `pre_hook` / `post_hook`：追加钩子，只影响之后注册的路由；
//! - `mount` / `mount_at`：把子分发器或处理器挂载到路径前缀下，并把请求 URL 改写为相对挂载点的形式。
//!
//! 请求阶段（共享借用，通常放在 `Arc` 中）：
//! - `handle`：顶层入口，未命中或管道走完仍未结束响应时交给最终处理器兜底；
//! - `dispatch`：被挂载到其他管道中时使用，把结果交还给外层管道。

use std::sync::Arc;

use log::{debug, error, info};
use serde_json::json;

use crate::{
    exception::Exception,
    param::ALL,
    pipeline::{compose, BoxFuture, Flow, Handler, Layer, Pipeline},
    request::Request,
    response::Response,
    tree::{OneOrMany, RouteTree},
    util::HtmlBuilder,
};

/// 最终兜底处理器：保证每个请求都得到一次应答。
pub type FinalHandler = dyn Fn(Exception, &mut Request, &mut Response) + Send + Sync;

/// 把处理器列表组合成管道的工厂函数。
pub type Composer = fn(Vec<Layer>) -> Pipeline;

pub struct DispatcherOptions {
    /// `mount` 时使用的挂载路径
    pub mount_path: String,
    /// 路由查找缓存容量，0 表示不启用
    pub cache_size: usize,
    pub pre_hooks: Vec<Layer>,
    pub post_hooks: Vec<Layer>,
    pub final_handler: Arc<FinalHandler>,
    pub composer: Composer,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            mount_path: "/".to_string(),
            cache_size: 0,
            pre_hooks: Vec::new(),
            post_hooks: Vec::new(),
            final_handler: Arc::new(default_final_handler),
            composer: compose::<Vec<Layer>, Layer>,
        }
    }
}

pub struct Dispatcher {
    tree: RouteTree<Arc<Pipeline>>,
    mount_path: String,
    pre_hooks: Vec<Layer>,
    post_hooks: Vec<Layer>,
    final_handler: Arc<FinalHandler>,
    composer: Composer,
    routes: Vec<(String, String)>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_options(DispatcherOptions::default())
    }

    pub fn with_options(options: DispatcherOptions) -> Self {
        Self {
            tree: RouteTree::with_cache(options.cache_size),
            mount_path: options.mount_path,
            pre_hooks: options.pre_hooks,
            post_hooks: options.post_hooks,
            final_handler: options.final_handler,
            composer: options.composer,
            routes: Vec::new(),
        }
    }

    pub fn mount_path(&self) -> &str {
        &self.mount_path
    }

    /// 已注册的 `(方法, 路径)`，按注册顺序排列
    pub fn routes(&self) -> &[(String, String)] {
        &self.routes
    }

    /// 为每个方法与路径的组合注册同一条管道。没有处理器时什么也不做。
    pub fn method(
        &mut self,
        methods: impl Into<OneOrMany>,
        paths: impl Into<OneOrMany>,
        handlers: impl Into<Layer>,
    ) -> &mut Self {
        let handlers = handlers.into();
        if handlers.is_empty() {
            return self;
        }

        let layers = vec![
            Layer::Nested(self.pre_hooks.clone()),
            handlers,
            Layer::Nested(self.post_hooks.clone()),
        ];
        let pipeline = Arc::new((self.composer)(layers));

        let paths = paths.into().0;
        for method in methods.into().0 {
            let method = method.to_uppercase();
            for path in &paths {
                self.tree.add(&method, path.as_str(), Arc::clone(&pipeline));
                self.routes.push((method.clone(), path.clone()));
            }
        }
        self
    }

    /// 追加前置钩子，之后注册的每条路由都会先执行它们
    pub fn pre_hook(&mut self, handlers: impl Into<Layer>) -> &mut Self {
        let handlers = handlers.into();
        if !handlers.is_empty() {
            self.pre_hooks.push(handlers);
        }
        self
    }

    /// 追加后置钩子，之后注册的每条路由都会在路由处理器之后执行它们
    pub fn post_hook(&mut self, handlers: impl Into<Layer>) -> &mut Self {
        let handlers = handlers.into();
        if !handlers.is_empty() {
            self.post_hooks.push(handlers);
        }
        self
    }

    /// 把子分发器挂载到它自己的挂载路径下。
    ///
    /// 子分发器排在 `handlers` 之前；子分发器中的路由调用 `next` 后才会轮到 `handlers`。
    /// 不需要额外处理器时传入 `Layer::Skip`。
    pub fn mount(&mut self, sub: Dispatcher, handlers: impl Into<Layer>) -> &mut Self {
        let path = sub.mount_path.clone();
        let layers = vec![Layer::Handler(Handler::from(sub)), handlers.into()];
        self.mount_at(path.as_str(), layers)
    }

    /// 在每个给定路径的精确位置与 `path/*` 上注册 `ALL` 路由。
    ///
    /// 管道最前面插入一个改写 URL 的处理器，去掉与挂载路径段数相同的前导路径段，
    /// 使被挂载的处理器看到相对挂载点的路径；查询字符串保持不变。
    pub fn mount_at(&mut self, paths: impl Into<OneOrMany>, handlers: impl Into<Layer>) -> &mut Self {
        let handlers = handlers.into();
        if handlers.is_empty() {
            return self;
        }

        for path in paths.into().0 {
            let prefix = path.trim_end_matches('/');
            let exact = match prefix.is_empty() {
                true => "/".to_string(),
                false => prefix.to_string(),
            };
            let wildcard = [prefix, "/*"].concat();
            let depth = prefix.split('/').filter(|s| !s.is_empty()).count();
            debug!("挂载到 {}，改写时去掉 {} 段路径", exact, depth);

            let rewrite = Handler::sync(move |req, _res, next| {
                let url = strip_segments(req.url(), depth);
                req.set_url(url);
                next.pass();
                Ok(())
            });
            let layers = vec![Layer::Handler(rewrite), handlers.clone()];
            self.method(ALL, vec![exact, wildcard], layers);
        }
        self
    }

    /// 顶层请求入口。
    ///
    /// 未命中路由、管道报告错误、或管道走完却没有结束响应时，交给最终处理器；
    /// 管道被中止（响应已结束、已被流式接管、或续体被丢弃）时不再做任何事。
    pub async fn handle(&self, req: &mut Request, res: &mut Response) {
        let flow = match self.resolve(req, res) {
            Some(pipeline) => pipeline.run(req, res).await,
            None => Flow::Error(Exception::NotFound),
        };
        match flow {
            Flow::Continue if !res.is_ended() && !res.is_streamed() => {
                (self.final_handler)(Exception::NotFound, req, res)
            }
            Flow::Continue | Flow::Halt => {}
            Flow::Error(err) => (self.final_handler)(err, req, res),
        }
    }

    /// 作为外层管道中的一步执行。未命中时报告 `NotFound`，其余结果原样交还外层管道。
    pub fn dispatch<'a>(&'a self, req: &'a mut Request, res: &'a mut Response) -> BoxFuture<'a, Flow> {
        Box::pin(async move {
            match self.resolve(req, res) {
                Some(pipeline) => pipeline.run(req, res).await,
                None => Flow::Error(Exception::NotFound),
            }
        })
    }

    fn resolve(&self, req: &mut Request, res: &mut Response) -> Option<Arc<Pipeline>> {
        req.snapshot_original_url();

        // HEAD 优先匹配显式注册的 HEAD 路由，否则按 GET 路由；由响应在序列化时省略正文
        let head = req.method() == "HEAD";
        if head {
            res.set_head_only(true);
        }
        let methods = match head {
            true => vec!["HEAD", "GET"],
            false => vec![req.method()],
        };

        match self.tree.find_first(&methods, req.url()) {
            Some(found) => {
                debug!("[ID{}]路由命中：{} {}", req.id(), req.method(), found.path);
                req.set_route(found.params, found.path);
                Some(found.handler)
            }
            None => {
                debug!("[ID{}]未找到路由：{} {}", req.id(), req.method(), req.url());
                None
            }
        }
    }
}

macro_rules! verbs {
    ($($name:ident => $method:literal),* $(,)?) => {
        impl Dispatcher {
            $(
                #[doc = concat!("注册 `", $method, "` 路由")]
                pub fn $name(
                    &mut self,
                    paths: impl Into<OneOrMany>,
                    handlers: impl Into<Layer>,
                ) -> &mut Self {
                    self.method($method, paths, handlers)
                }
            )*
        }
    };
}

verbs! {
    get => "GET",
    post => "POST",
    put => "PUT",
    patch => "PATCH",
    delete => "DELETE",
    head => "HEAD",
    options => "OPTIONS",
    trace => "TRACE",
    connect => "CONNECT",
    all => "ALL",
}

/// 默认的最终处理器：记录日志，并以状态页（或 JSON）应答尚未结束的响应。
pub fn default_final_handler(err: Exception, req: &mut Request, res: &mut Response) {
    let status = err.status_code();
    match status >= 500 {
        true => error!(
            "[ID{}]{} {} 处理失败：{}",
            req.id(),
            req.method(),
            req.original_url(),
            err
        ),
        false => info!(
            "[ID{}]{} {} 以{}结束：{}",
            req.id(),
            req.method(),
            req.original_url(),
            status,
            err
        ),
    }
    if res.is_ended() {
        return;
    }

    res.set_code(status);
    // 5xx 不向客户端暴露内部错误信息
    let message = match status >= 500 {
        true => res.information().to_string(),
        false => err.to_string(),
    };
    let wants_json = req
        .accept()
        .map_or(false, |a| a.contains("application/json"));
    if wants_json {
        if let Err(e) = res.json(&json!({ "status": status, "message": message })) {
            error!("[ID{}]无法序列化错误响应：{}", req.id(), e);
        }
    } else {
        res.html(HtmlBuilder::from_status_code(status, Some(&message)).build());
    }
}

// 去掉 url 路径部分的前 depth 段，保留查询字符串
fn strip_segments(url: &str, depth: usize) -> String {
    let (path, query) = match url.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (url, None),
    };
    let mut rest = path;
    for _ in 0..depth {
        let trimmed = rest.strip_prefix('/').unwrap_or(rest);
        rest = match trimmed.find('/') {
            Some(i) => &trimmed[i..],
            None => "",
        };
    }
    let rest = match rest.is_empty() {
        true => "/",
        false => rest,
    };
    match query {
        Some(query) => [rest, "?", query].concat(),
        None => rest.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn text(body: &'static str) -> Handler {
        Handler::sync(move |_req, res, _next| {
            res.text(body);
            Ok(())
        })
    }

    fn body(res: &Response) -> String {
        res.body()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default()
    }

    async fn send(dispatcher: &Dispatcher, req: Request) -> (Request, Response) {
        let mut req = req;
        let mut res = Response::new();
        dispatcher.handle(&mut req, &mut res).await;
        (req, res)
    }

    #[test]
    fn test_strip_segments() {
        assert_eq!(strip_segments("/api/users?x=1", 1), "/users?x=1");
        assert_eq!(strip_segments("/api", 1), "/");
        assert_eq!(strip_segments("/api/", 1), "/");
        assert_eq!(strip_segments("/api?x=1", 1), "/?x=1");
        assert_eq!(strip_segments("/a/b/c/d", 2), "/c/d");
        assert_eq!(strip_segments("/a/b", 0), "/a/b");
    }

    #[tokio::test]
    async fn test_route_params_and_path() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.get(
            "/users/:user",
            Handler::sync(|req, res, _next| {
                let user = req.params().get("user").unwrap_or_default().to_string();
                res.json(&json!({ "user": user }))
            }),
        );

        let (req, res) = send(&dispatcher, Request::new("GET", "/users/andi?x=1")).await;
        assert_eq!(req.params().get("user"), Some("andi"));
        assert_eq!(req.path(), "/users/andi");
        assert_eq!(res.status_code(), 200);
        assert_eq!(body(&res), r#"{"user":"andi"}"#);
    }

    #[tokio::test]
    async fn test_miss_goes_to_final_handler() {
        let dispatcher = Dispatcher::new();
        let (_, res) = send(&dispatcher, Request::new("GET", "/missing")).await;
        assert_eq!(res.status_code(), 404);
        assert!(body(&res).contains("<h1>404</h1>"));

        let req = Request::new("GET", "/missing").with_header("Accept", "application/json");
        let (_, res) = send(&dispatcher, req).await;
        assert_eq!(res.status_code(), 404);
        assert_eq!(body(&res), r#"{"message":"Not found (404)","status":404}"#);
    }

    #[tokio::test]
    async fn test_fall_through_is_not_found() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.get(
            "/quiet",
            Handler::sync(|_req, _res, next| {
                next.pass();
                Ok(())
            }),
        );
        let (_, res) = send(&dispatcher, Request::new("GET", "/quiet")).await;
        assert_eq!(res.status_code(), 404);
    }

    #[tokio::test]
    async fn test_handler_error_reaches_final_handler() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.post(
            "/fail",
            Handler::future(|_req, _res| {
                Box::pin(async move { Err(Exception::http(422, "invalid body")) })
            }),
        );
        let req = Request::new("POST", "/fail").with_header("accept", "application/json");
        let (_, res) = send(&dispatcher, req).await;
        assert_eq!(res.status_code(), 422);
        assert_eq!(body(&res), r#"{"message":"invalid body (422)","status":422}"#);
    }

    #[tokio::test]
    async fn test_server_errors_hide_details() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.get("/panic", Handler::sync(|_req, _res, _next| panic!("secret")));
        let req = Request::new("GET", "/panic").with_header("Accept", "application/json");
        let (_, res) = send(&dispatcher, req).await;
        assert_eq!(res.status_code(), 500);
        assert!(!body(&res).contains("secret"));
    }

    #[tokio::test]
    async fn test_head_is_routed_as_get() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.get("/page", text("hello"));
        let (req, res) = send(&dispatcher, Request::new("HEAD", "/page")).await;

        assert_eq!(req.method(), "HEAD");
        assert!(res.is_head_only());
        let bytes = res.as_bytes();
        let raw = String::from_utf8_lossy(&bytes);
        assert!(raw.contains("Content-Length: 5"));
        assert!(!raw.contains("hello"));
    }

    #[tokio::test]
    async fn test_explicit_head_route() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.head(
            "/only-head",
            Handler::sync(|_req, res, _next| {
                res.text("");
                Ok(())
            }),
        );
        dispatcher.get("/both", text("from get"));
        dispatcher.head("/both", text("from head"));

        let (_, res) = send(&dispatcher, Request::new("HEAD", "/only-head")).await;
        assert_eq!(res.status_code(), 200);
        assert!(res.is_head_only());

        let (_, res) = send(&dispatcher, Request::new("HEAD", "/both")).await;
        assert_eq!(body(&res), "from head");
        let (_, res) = send(&dispatcher, Request::new("GET", "/both")).await;
        assert_eq!(body(&res), "from get");
        let (_, res) = send(&dispatcher, Request::new("GET", "/only-head")).await;
        assert_eq!(res.status_code(), 404);
    }

    #[tokio::test]
    async fn test_hooks_wrap_route_handlers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mark = |name: &'static str| {
            let seen = seen.clone();
            Handler::sync(move |_req, _res, next| {
                seen.lock().unwrap().push(name);
                next.pass();
                Ok(())
            })
        };

        let mut dispatcher = Dispatcher::new();
        dispatcher.get("/before-hooks", mark("early"));
        dispatcher.pre_hook(mark("pre"));
        dispatcher.post_hook(mark("post"));
        dispatcher.get("/after-hooks", vec![mark("route"), text("ok")]);

        send(&dispatcher, Request::new("GET", "/before-hooks")).await;
        send(&dispatcher, Request::new("GET", "/after-hooks")).await;
        // 钩子只作用于之后注册的路由；响应结束后后置钩子不再执行
        assert_eq!(*seen.lock().unwrap(), vec!["early", "pre", "route"]);
    }

    #[tokio::test]
    async fn test_post_hook_runs_after_route() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut options = DispatcherOptions::default();
        options.post_hooks.push(Layer::Handler({
            let seen = seen.clone();
            Handler::sync(move |_req, res, _next| {
                seen.lock().unwrap().push("post");
                res.text("finished by post hook");
                Ok(())
            })
        }));

        let mut dispatcher = Dispatcher::with_options(options);
        dispatcher.get("/", {
            let seen = seen.clone();
            Handler::sync(move |_req, _res, next| {
                seen.lock().unwrap().push("route");
                next.pass();
                Ok(())
            })
        });
        let (_, res) = send(&dispatcher, Request::new("GET", "/")).await;
        assert_eq!(*seen.lock().unwrap(), vec!["route", "post"]);
        assert_eq!(body(&res), "finished by post hook");
    }

    #[tokio::test]
    async fn test_method_without_handlers_is_noop() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.get("/nothing", Vec::<Handler>::new());
        dispatcher.method(["GET", "post"], ["/a", "/b"], text("x"));
        assert_eq!(
            dispatcher.routes(),
            &[
                ("GET".to_string(), "/a".to_string()),
                ("GET".to_string(), "/b".to_string()),
                ("POST".to_string(), "/a".to_string()),
                ("POST".to_string(), "/b".to_string()),
            ]
        );
        let (_, res) = send(&dispatcher, Request::new("POST", "/b")).await;
        assert_eq!(body(&res), "x");
    }

    #[tokio::test]
    async fn test_mount_sub_dispatcher() {
        let mut api = Dispatcher::with_options(DispatcherOptions {
            mount_path: "/api".to_string(),
            ..Default::default()
        });
        api.get(
            "/users/:id",
            Handler::sync(|req, res, _next| {
                let reply = format!(
                    "{} {} {}",
                    req.params().get("id").unwrap_or_default(),
                    req.url(),
                    req.original_url()
                );
                res.text(reply);
                Ok(())
            }),
        );
        api.get("/", text("api root"));

        let mut app = Dispatcher::new();
        app.mount(api, Layer::Skip);

        let (_, res) = send(&app, Request::new("GET", "/api/users/7?x=1")).await;
        assert_eq!(body(&res), "7 /users/7?x=1 /api/users/7?x=1");

        let (_, res) = send(&app, Request::new("GET", "/api")).await;
        assert_eq!(body(&res), "api root");

        // 子分发器中未命中时由外层的最终处理器应答
        let (_, res) = send(&app, Request::new("GET", "/api/nope")).await;
        assert_eq!(res.status_code(), 404);
    }

    #[tokio::test]
    async fn test_mount_runs_sub_dispatcher_before_handlers() {
        let mut api = Dispatcher::with_options(DispatcherOptions {
            mount_path: "/api".to_string(),
            ..Default::default()
        });
        api.get(
            "/hello",
            Handler::sync(|_req, res, next| {
                res.set_header("X-Api", "hello");
                next.pass();
                Ok(())
            }),
        );

        let mut app = Dispatcher::new();
        app.mount(api, text("after api"));

        let (_, res) = send(&app, Request::new("GET", "/api/hello")).await;
        assert_eq!(res.header("X-Api"), Some("hello"));
        assert_eq!(body(&res), "after api");

        // 子分发器未命中时报告错误，后面的处理器不会执行
        let (_, res) = send(&app, Request::new("GET", "/api/other")).await;
        assert_eq!(res.status_code(), 404);
        assert_ne!(body(&res), "after api");
    }

    #[tokio::test]
    async fn test_mount_at_handlers() {
        let mut app = Dispatcher::new();
        app.mount_at(
            "/static/",
            Handler::sync(|req, res, _next| {
                let url = req.url().to_string();
                res.text(url);
                Ok(())
            }),
        );
        let (_, res) = send(&app, Request::new("GET", "/static/css/site.css")).await;
        assert_eq!(body(&res), "/css/site.css");
        let (_, res) = send(&app, Request::new("PUT", "/static")).await;
        assert_eq!(body(&res), "/");
    }

    #[tokio::test]
    async fn test_custom_final_handler() {
        let mut dispatcher = Dispatcher::with_options(DispatcherOptions {
            final_handler: Arc::new(|err: Exception, _req: &mut Request, res: &mut Response| {
                res.set_code(err.status_code());
                res.text("custom");
            }),
            ..Default::default()
        });
        dispatcher.get("/", text("root"));
        let (_, res) = send(&dispatcher, Request::new("GET", "/nowhere")).await;
        assert_eq!(res.status_code(), 404);
        assert_eq!(body(&res), "custom");
    }

    #[tokio::test]
    async fn test_halted_pipeline_leaves_response_alone() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.get("/halt", Handler::sync(|_req, _res, _next| Ok(())));
        let (_, res) = send(&dispatcher, Request::new("GET", "/halt")).await;
        assert!(!res.is_ended());
        assert_eq!(res.status_code(), 200);
    }

    #[tokio::test]
    async fn test_error_handler_in_route() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.get(
            "/guarded",
            vec![
                Handler::sync(|_req, _res, next| {
                    next.fail(Exception::http(401, "login required"));
                    Ok(())
                }),
                Handler::error(|err, _req, res, _done| {
                    res.set_code(err.status_code());
                    res.text("please log in");
                    Ok(())
                }),
            ],
        );
        let (_, res) = send(&dispatcher, Request::new("GET", "/guarded")).await;
        assert_eq!(res.status_code(), 401);
        assert_eq!(body(&res), "please log in");
    }

    #[tokio::test]
    async fn test_cached_dispatcher() {
        let mut dispatcher = Dispatcher::with_options(DispatcherOptions {
            cache_size: 4,
            ..Default::default()
        });
        dispatcher.get("/items/:id", Handler::sync(|req, res, _next| {
            let id = req.params().get("id").unwrap_or_default().to_string();
            res.text(id);
            Ok(())
        }));
        for _ in 0..3 {
            let (_, res) = send(&dispatcher, Request::new("GET", "/items/9")).await;
            assert_eq!(body(&res), "9");
        }
    }
}
