//! WebSocket 服务端：连接生命周期、消息路由、保活与保存触发。

pub mod client_session;
pub mod connection_manager;
pub mod keepalive_monitor;
pub mod message_router;
pub mod save_state;
pub mod service;
