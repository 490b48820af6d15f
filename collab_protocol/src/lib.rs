//! `collab_protocol` 协作文档协议公共库 crate。
//!
//! 本 crate 集中定义了协作文档服务端 (`collab_doc_server`) 与各类客户端
//! (包括 `ws_session_utils` 提供的测试/集成客户端) 之间共享的协议类型。
//! 协议本体是面向行的 WebSocket 文本协议：每条文本帧承载一条命令或一条通知。
//!
//! 主要包含以下类型的模型：
//! - **客户端命令 (`commands`)**: 客户端发往服务端的文本命令，如 `load`、`key`、`save`、`ping`。
//! - **服务端通知 (`notifications`)**: 服务端发往客户端的通知行，如 `progress:`、`statechanged:`、
//!   `pong` 以及固定的过载错误文本，并提供消息匹配辅助函数。
//! - **扩展元数据 (`extended_data`)**: `save` 命令可携带的有序键值对集合，
//!   线上传输时经过百分号转义，分号分隔、等号赋值。
//! - **存储请求 (`storage`)**: 保存动作到达存储后端 (WOPI 风格) 时必须携带的请求头契约。
//!
//! 设计原则：
//! - **共享性**: 所有类型同时被服务端与客户端/测试使用，避免双方对协议文本各自解析。
//! - **序列化/反序列化**: 结构化模型派生 `serde::Serialize` / `serde::Deserialize`，
//!   便于日志记录与持久化；线格式本身则通过 `parse` / `Display` 往返。
//! - **可调试性与克隆**: 所有模型派生 `Debug` 和 `Clone`。

pub mod commands;       // 客户端发往服务端的文本命令
pub mod extended_data;  // save 命令携带的有序键值对扩展元数据
pub mod notifications;  // 服务端发往客户端的通知行与匹配辅助
pub mod storage;        // 存储后端保存请求的请求头契约

pub use commands::{ClientCommand, KeyEventType};
pub use extended_data::ExtendedData;
pub use notifications::{ServerNotification, SERVICE_UNAVAILABLE_ERROR};
pub use storage::SaveRequest;

use thiserror::Error;

/// 协议层的统一错误类型。
///
/// 凡是收到的消息不符合预期的行格式、缺少必填字段、或字段取值非法，
/// 都会落入此错误。对单个会话场景而言这是致命的（契约违规），
/// 但不影响进程中的其他会话。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// 收到了无法识别的命令动词。
    #[error("未知命令: '{0}'")]
    UnknownCommand(String),

    /// 命令缺少必填的 key=value 字段。
    #[error("命令 '{command}' 缺少必填字段 '{field}'")]
    MissingField { command: &'static str, field: &'static str },

    /// 字段存在但取值无法解析。
    #[error("命令 '{command}' 字段 '{field}' 取值非法: '{value}'")]
    InvalidValue {
        command: &'static str,
        field: &'static str,
        value: String,
    },

    /// 扩展元数据的百分号转义或键值对格式非法。
    #[error("扩展元数据格式非法: {0}")]
    InvalidExtendedData(String),
}

/// 从 `key=value` 形式的记号中取出指定 key 的 value。
///
/// 行协议的命令参数全部是空格分隔的 `key=value` 记号，本函数在记号序列中
/// 做一次线性查找。找不到返回 `None`，由调用方决定该字段是否必填。
pub(crate) fn find_token_value<'a>(tokens: &'a [&'a str], key: &str) -> Option<&'a str> {
    tokens.iter().find_map(|token| {
        let (k, v) = token.split_once('=')?;
        (k == key).then_some(v)
    })
}
