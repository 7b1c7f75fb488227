pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod exception;
pub mod param;
pub mod pipeline;
pub mod request;
pub mod response;
pub mod server;
pub mod tree;
pub mod util;

pub use config::Config;
pub use dispatcher::{default_final_handler, Dispatcher, DispatcherOptions};
pub use exception::Exception;
pub use param::{HttpVersion, ALL};
pub use pipeline::{compose, BoxFuture, Flow, Handler, Layer, Next, Pipeline};
pub use request::{Params, Request};
pub use response::Response;
pub use tree::{Match, OneOrMany, RouteTree};
pub use util::HtmlBuilder;
