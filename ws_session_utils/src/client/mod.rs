// ws_session_utils/src/client/mod.rs

//! 客户端会话：HTTP 纯请求/应答会话与 WebSocket 长连接会话。

pub mod http_session;
pub mod ws_session;

pub use http_session::{HttpRequest, HttpResponse, HttpSession};
pub use ws_session::{PollVerdict, WebSocketSession};
