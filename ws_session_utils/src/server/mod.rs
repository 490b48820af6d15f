// ws_session_utils/src/server/mod.rs

//! 服务端传输层：准入门控的监听、接受与协议分派。

pub mod transport;

pub use transport::{start_server, AcceptedStream, WsStream};
