// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 处理器管道
//!
//! `compose` 把一组（可任意嵌套、可含空位的）处理器展平成一条 `Pipeline`，
//! 每个请求通过 `Pipeline::run` 顺序执行。
//!
//! 处理器有三种形态，在构造时显式选定：
//! - `Handler::sync`：回调式 `(req, res, next)`，通过消费 `Next` 继续或转入错误通道；
//! - `Handler::future`：异步 `(req, res)`，返回的 future 完成即继续，`Err` 转入错误通道；
//! - `Handler::error`：错误处理器 `(err, req, res, done)`，每条管道只保留第一个。
//!
//! 驱动器以循环推进游标，链再长也不会加深调用栈；每第 100 个普通处理器之前插入一次
//! `yield_now`，让出调度器，避免长同步链独占工作线程。

use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use futures::FutureExt;
use log::debug;
use tokio::sync::oneshot;

pub use futures::future::BoxFuture;

use crate::{dispatcher::Dispatcher, exception::Exception, request::Request, response::Response};

/// 每隔多少个普通处理器插入一次让出点
pub const YIELD_INTERVAL: usize = 100;

type SyncFn = dyn Fn(&mut Request, &mut Response, Next) -> Result<(), Exception> + Send + Sync;
type AsyncFn = dyn for<'a> Fn(&'a mut Request, &'a mut Response) -> BoxFuture<'a, Result<(), Exception>>
    + Send
    + Sync;
type ErrorFn =
    dyn Fn(Exception, &mut Request, &mut Response, Next) -> Result<(), Exception> + Send + Sync;

/// 回调式处理器收到的续体。
///
/// 只能消费一次：`pass()` 继续执行下一个处理器，`fail(err)` 转入错误通道。
/// 丢弃而不调用表示该处理器不再推进管道（例如它已经结束了响应）。
/// `Next` 是 `Send` 的，可以交给后台任务稍后再调用。
#[derive(Debug)]
pub struct Next {
    tx: oneshot::Sender<Option<Exception>>,
}

impl Next {
    fn channel() -> (Self, oneshot::Receiver<Option<Exception>>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    pub fn pass(self) {
        self.call(None);
    }

    pub fn fail(self, err: impl Into<Exception>) {
        self.call(Some(err.into()));
    }

    pub fn call(self, err: Option<Exception>) {
        // 接收端只会在管道被整体丢弃时消失，此时结果已无人关心
        let _ = self.tx.send(err);
    }
}

/// 一步执行的结果，同时也是整条管道的完成值。
#[derive(Debug)]
pub enum Flow {
    /// 继续；作为管道结果时等价于 `done()`
    Continue,
    /// 转入错误通道；作为管道结果时等价于 `done(err)`
    Error(Exception),
    /// 停止推进且不调用 `done`：响应已结束、已被流式接管，或者 `Next` 被丢弃
    Halt,
}

impl Flow {
    pub fn is_continue(&self) -> bool {
        matches!(self, Flow::Continue)
    }

    pub fn is_halt(&self) -> bool {
        matches!(self, Flow::Halt)
    }

    pub fn error(&self) -> Option<&Exception> {
        match self {
            Flow::Error(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Clone)]
enum Kind {
    Sync(Arc<SyncFn>),
    Async(Arc<AsyncFn>),
    Error(Arc<ErrorFn>),
    Mounted(Arc<Dispatcher>),
}

/// 管道中的一个处理器。
#[derive(Clone)]
pub struct Handler {
    kind: Kind,
}

impl Handler {
    /// 回调式处理器。返回 `Err` 等价于以该错误调用 `next`。
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&mut Request, &mut Response, Next) -> Result<(), Exception> + Send + Sync + 'static,
    {
        Self {
            kind: Kind::Sync(Arc::new(f)),
        }
    }

    /// 异步处理器，只接收 `(req, res)`。
    ///
    /// ```ignore
    /// Handler::future(|req, res| Box::pin(async move {
    ///     res.text(format!("hello {}", req.path()));
    ///     Ok(())
    /// }))
    /// ```
    pub fn future<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Request, &'a mut Response) -> BoxFuture<'a, Result<(), Exception>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            kind: Kind::Async(Arc::new(f)),
        }
    }

    /// 错误处理器；它收到的 `Next` 就是管道的 `done`。
    pub fn error<F>(f: F) -> Self
    where
        F: Fn(Exception, &mut Request, &mut Response, Next) -> Result<(), Exception>
            + Send
            + Sync
            + 'static,
    {
        Self {
            kind: Kind::Error(Arc::new(f)),
        }
    }

    pub fn is_error_handler(&self) -> bool {
        matches!(self.kind, Kind::Error(_))
    }
}

impl From<Dispatcher> for Handler {
    fn from(dispatcher: Dispatcher) -> Self {
        Arc::new(dispatcher).into()
    }
}

impl From<Arc<Dispatcher>> for Handler {
    fn from(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            kind: Kind::Mounted(dispatcher),
        }
    }
}

/// 可嵌套的处理器列表项。`Skip` 对应空位，构造管道时被丢弃。
#[derive(Clone)]
pub enum Layer {
    Handler(Handler),
    Nested(Vec<Layer>),
    Skip,
}

impl From<Handler> for Layer {
    fn from(handler: Handler) -> Self {
        Layer::Handler(handler)
    }
}

impl From<Option<Handler>> for Layer {
    fn from(handler: Option<Handler>) -> Self {
        handler.map_or(Layer::Skip, Layer::Handler)
    }
}

impl From<Vec<Handler>> for Layer {
    fn from(handlers: Vec<Handler>) -> Self {
        Layer::Nested(handlers.into_iter().map(Layer::Handler).collect())
    }
}

impl From<Vec<Layer>> for Layer {
    fn from(layers: Vec<Layer>) -> Self {
        Layer::Nested(layers)
    }
}

impl From<Dispatcher> for Layer {
    fn from(dispatcher: Dispatcher) -> Self {
        Layer::Handler(dispatcher.into())
    }
}

impl Layer {
    /// 展平后是否不含任何处理器
    pub fn is_empty(&self) -> bool {
        match self {
            Layer::Handler(_) => false,
            Layer::Nested(layers) => layers.iter().all(Layer::is_empty),
            Layer::Skip => true,
        }
    }

    fn flatten_into(self, out: &mut Vec<Handler>) {
        match self {
            Layer::Handler(handler) => out.push(handler),
            Layer::Nested(layers) => layers.into_iter().for_each(|l| l.flatten_into(out)),
            Layer::Skip => {}
        }
    }
}

enum Step {
    Yield,
    Sync(Arc<SyncFn>),
    Async(Arc<AsyncFn>),
    Mounted(Arc<Dispatcher>),
}

/// 组合好的处理器序列，注册时构造一次，之后在所有请求间共享。
pub struct Pipeline {
    steps: Vec<Step>,
    error_handler: Option<Arc<ErrorFn>>,
    regular: usize,
}

/// 把处理器列表展平、分类，组合成一条管道。
///
/// 多个错误处理器时只保留第一个，其余被静默丢弃。
pub fn compose<I, L>(layers: I) -> Pipeline
where
    I: IntoIterator<Item = L>,
    L: Into<Layer>,
{
    let mut handlers = Vec::new();
    for layer in layers {
        layer.into().flatten_into(&mut handlers);
    }

    let mut steps = Vec::with_capacity(handlers.len());
    let mut error_handler = None;
    let mut regular = 0;
    for handler in handlers {
        let step = match handler.kind {
            Kind::Error(f) => {
                if error_handler.is_none() {
                    error_handler = Some(f);
                } else {
                    debug!("管道中已有错误处理器，忽略后续的错误处理器");
                }
                continue;
            }
            Kind::Sync(f) => Step::Sync(f),
            Kind::Async(f) => Step::Async(f),
            Kind::Mounted(d) => Step::Mounted(d),
        };
        if regular % YIELD_INTERVAL == YIELD_INTERVAL - 1 {
            steps.push(Step::Yield);
        }
        steps.push(step);
        regular += 1;
    }

    Pipeline {
        steps,
        error_handler,
        regular,
    }
}

impl Pipeline {
    /// 普通处理器（不含错误处理器与让出点）的个数
    pub fn len(&self) -> usize {
        self.regular
    }

    pub fn is_empty(&self) -> bool {
        self.regular == 0
    }

    pub fn has_error_handler(&self) -> bool {
        self.error_handler.is_some()
    }

    /// 对一个请求执行整条管道。
    pub async fn run(&self, req: &mut Request, res: &mut Response) -> Flow {
        if self.steps.is_empty() {
            return Flow::Continue;
        }

        let mut steps = self.steps.iter();
        loop {
            if res.is_ended() || res.is_streamed() {
                return Flow::Halt;
            }
            let Some(step) = steps.next() else {
                return Flow::Continue;
            };

            let flow = match step {
                Step::Yield => {
                    tokio::task::yield_now().await;
                    Flow::Continue
                }
                Step::Sync(f) => {
                    let (next, rx) = Next::channel();
                    match panic::catch_unwind(AssertUnwindSafe(|| f(req, res, next))) {
                        Ok(Ok(())) => settle(rx).await,
                        Ok(Err(err)) => Flow::Error(err),
                        Err(payload) => Flow::Error(Exception::from_panic(payload)),
                    }
                }
                Step::Async(f) => {
                    match AssertUnwindSafe(async { f(req, res).await })
                        .catch_unwind()
                        .await
                    {
                        Ok(Ok(())) => Flow::Continue,
                        Ok(Err(err)) => Flow::Error(err),
                        Err(payload) => Flow::Error(Exception::from_panic(payload)),
                    }
                }
                Step::Mounted(dispatcher) => dispatcher.dispatch(req, res).await,
            };

            match flow {
                Flow::Continue => {}
                Flow::Halt => return Flow::Halt,
                Flow::Error(err) => {
                    debug!("[ID{}]处理器报告错误：{}", req.id(), err);
                    return self.recover(err, req, res).await;
                }
            }
        }
    }

    // 错误处理器只会被调用一次，它的续体直接通向 done
    async fn recover(&self, err: Exception, req: &mut Request, res: &mut Response) -> Flow {
        let Some(handler) = &self.error_handler else {
            return Flow::Error(err);
        };
        let (done, rx) = Next::channel();
        match panic::catch_unwind(AssertUnwindSafe(|| handler(err, req, res, done))) {
            Ok(Ok(())) => settle(rx).await,
            Ok(Err(err)) => Flow::Error(err),
            Err(payload) => Flow::Error(Exception::from_panic(payload)),
        }
    }
}

async fn settle(rx: oneshot::Receiver<Option<Exception>>) -> Flow {
    match rx.await {
        Ok(None) => Flow::Continue,
        Ok(Some(err)) => Flow::Error(err),
        Err(_) => Flow::Halt,
    }
}
