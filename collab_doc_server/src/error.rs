use collab_protocol::ProtocolError;
use thiserror::Error;

/// 服务端的主要错误类型
///
/// 这个枚举定义了连接层服务端中可能出现的各种错误类型。
/// 注意准入拒绝不在其中：被拒绝的连接在握手前被丢弃，是设计内行为，
/// 不经由错误通道表达。
#[derive(Error, Debug)]
pub enum ServerError {
    /// 行协议解析失败（未知命令、字段缺失或取值非法）
    #[error("协议解析错误: {0}")]
    Protocol(#[from] ProtocolError),

    /// 协议契约违规：时序非法的命令或非法的状态迁移。
    /// 对当前场景致命，但不终止服务进程。
    #[error("协议契约违规: {0}")]
    ProtocolViolation(String),

    /// 存储后端写入失败
    #[error("存储后端错误: {0}")]
    Storage(String),

    /// 底层传输 I/O 错误
    #[error("传输层错误: {0}")]
    Transport(#[from] std::io::Error),

    /// WebSocket 协议层错误
    #[error("WebSocket 错误: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),
}
