//! `collab_doc_server` 服务端核心库。
//!
//! 本 Crate 是协同文档服务的连接层服务端实现，负责连接的接纳与生命周期管理、
//! 基于行协议的消息路由、双层保活以及保存触发到存储后端的请求头契约。
//!
//! 主要模块包括：
//! - `config`: 管理服务端配置的加载与全局访问。
//! - `error`: 定义服务端特定的错误类型。
//! - `storage`: 存储后端抽象与用于验证保存契约的记录型实现。
//! - `ws_server`: 实现 WebSocket 服务端，处理客户端连接、消息路由、
//!   保活巡查与保存触发状态机。

pub mod config;
pub mod error;
pub mod storage;
pub mod ws_server;
