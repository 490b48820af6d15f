// collab_protocol/src/notifications.rs

//! 服务端发往客户端的通知行，以及客户端/测试侧的消息匹配辅助。
//!
//! 通知同样是面向行的文本帧：
//! - `progress: id=<tag>` — 文档加载过程中的进度通知，tag 依次为 `find`、`connect`、`ready`；
//! - `statechanged: modified=<true|false>` — 文档修改状态变化；
//! - `pong` — 对应用层 `ping` 探测的应答；
//! - `error: ...` — 服务端主动上报的致命/过载错误，其中"服务不可用"
//!   使用固定常量 [`SERVICE_UNAVAILABLE_ERROR`]，逐字节稳定以便客户端比对。

use std::fmt;

/// 服务端在连接数或资源超限时发出的固定错误文本。
///
/// 该文本是协议常量：客户端在等待任何应答时一旦收到以 `error:` 开头的消息，
/// 应将其与此常量整行比对，而不是做模糊匹配。
pub const SERVICE_UNAVAILABLE_ERROR: &str = "error: cmd=socket kind=serviceunavailable";

/// 所有以错误通知开头的行共享的前缀。
pub const ERROR_PREFIX: &str = "error:";

/// 文档加载进度通知的前缀。
pub const PROGRESS_PREFIX: &str = "progress:";

/// 服务端发往客户端的一条通知。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerNotification {
    /// 文档加载进度，`id` 为阶段标识（`find` / `connect` / `ready`）。
    Progress { id: String },
    /// 文档修改状态变化。
    StateChanged { modified: bool },
    /// 应用层保活应答。
    Pong,
    /// 服务端主动上报的错误文本（含 `error:` 前缀的完整行）。
    Error(String),
}

impl ServerNotification {
    /// 构造"服务不可用"过载错误通知。
    pub fn service_unavailable() -> Self {
        ServerNotification::Error(SERVICE_UNAVAILABLE_ERROR.to_string())
    }
}

impl fmt::Display for ServerNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerNotification::Progress { id } => write!(f, "progress: id={}", id),
            ServerNotification::StateChanged { modified } => {
                write!(f, "statechanged: modified={}", modified)
            }
            ServerNotification::Pong => write!(f, "pong"),
            ServerNotification::Error(line) => write!(f, "{}", line),
        }
    }
}

/// 判断消息是否以给定前缀开头（协议里的前缀匹配总是逐字节的）。
pub fn match_prefix(prefix: &str, message: &str) -> bool {
    message.starts_with(prefix)
}

/// 判断一条 `progress:` 通知是否携带期望的阶段标识。
///
/// 匹配规则：消息必须以 `progress:` 开头，且其记号中存在 `id=<expected>`。
pub fn progress_has_id(message: &str, expected_id: &str) -> bool {
    if !match_prefix(PROGRESS_PREFIX, message) {
        return false;
    }
    message
        .split_whitespace()
        .any(|token| token.strip_prefix("id=").is_some_and(|id| id == expected_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_wire_forms() {
        assert_eq!(
            ServerNotification::Progress { id: "ready".to_string() }.to_string(),
            "progress: id=ready"
        );
        assert_eq!(
            ServerNotification::StateChanged { modified: true }.to_string(),
            "statechanged: modified=true"
        );
        assert_eq!(ServerNotification::Pong.to_string(), "pong");
        assert_eq!(
            ServerNotification::service_unavailable().to_string(),
            SERVICE_UNAVAILABLE_ERROR,
            "过载错误通知必须逐字节等于固定常量"
        );
    }

    #[test]
    fn test_progress_id_matching() {
        assert!(progress_has_id("progress: id=find", "find"));
        assert!(progress_has_id("progress: id=connect pid=42", "connect"));
        assert!(!progress_has_id("progress: id=find", "ready"), "阶段标识不同不应匹配");
        assert!(!progress_has_id("statechanged: modified=true", "find"), "非 progress 消息不应匹配");
    }

    #[test]
    fn test_error_prefix_detection() {
        assert!(match_prefix(ERROR_PREFIX, SERVICE_UNAVAILABLE_ERROR));
        assert!(!match_prefix(ERROR_PREFIX, "pong"));
    }
}
