// ws_session_utils/src/error.rs

//! 定义连接层工具库相关的错误类型。

use std::time::Duration;

use thiserror::Error;

/// 连接/会话传输层的统一错误类型。
///
/// 注意错误分类的边界（与整体错误设计保持一致）：
/// - 准入拒绝**不是**错误，它表现为 `try_admit` 返回 `None`、
///   HTTP 应答无状态码、会话报告未连接；
/// - 超时是可区分的终局结果，携带会话标签与期望模式以便定位；
/// - 传输失败在 HTTP 会话的状态层面与准入拒绝不可区分，这是设计使然。
#[derive(Error, Debug)]
pub enum SessionError {
    /// `poll` 或同步请求在限定时长内未等到满足条件的消息。
    ///
    /// `label` 由调用方提供，应包含会话名与期望模式，使超时报告足以定位问题。
    #[error("等待超时: '{label}' 在 {timeout:?} 内未等到满足谓词的消息")]
    Timeout {
        /// 发生超时的会话/期望标签。
        label: String,
        /// 允许的等待时长。
        timeout: Duration,
    },

    /// 消息谓词显式拒绝了收到的消息（契约违规，立即终止本场景）。
    #[error("消息被谓词拒绝: {0}")]
    Rejected(String),

    /// WebSocket 协议相关的底层错误。
    #[error("WebSocket协议错误: {0}")]
    WebSocketProtocol(#[from] tokio_tungstenite::tungstenite::Error),

    /// 底层 I/O 错误。
    #[error("I/O错误: {0}")]
    Io(#[from] std::io::Error),

    /// 无效的 URL 格式。
    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    /// 在未建立连接的会话上执行了需要连接的操作。
    #[error("未连接")]
    NotConnected,

    /// 连接已经关闭（对端或本端已完成收尾）。
    #[error("连接已关闭")]
    Closed,
}
