pub mod http_backend;
pub mod models;
pub mod ws_push;

pub use http_backend::HttpJobBackend;
pub use ws_push::{DisabledPushSource, WebSocketPushSource};
