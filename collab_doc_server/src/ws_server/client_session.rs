use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::protocol::Message;
use uuid::Uuid;

use crate::ws_server::save_state::DocumentSession;

/// 代表一个已连接的 WebSocket 客户端会话
#[derive(Debug)]
pub struct ClientSession {
    /// 由服务端生成的唯一客户端标识
    pub client_id: Uuid,
    /// 客户端的 IP 地址和端口
    pub addr: SocketAddr,
    /// 用于向此客户端异步发送 WebSocket 帧的通道发送端
    pub sender: mpsc::Sender<Message>,
    /// 会话创建的时间戳
    pub creation_time: DateTime<Utc>,
    /// 客户端最后活跃时间戳，用于保活机制，使用 RwLock 实现线程安全更新
    pub last_seen: Arc<RwLock<DateTime<Utc>>>,
    /// 此会话上已加载的文档（`load` 之前为 None）
    pub document: Arc<RwLock<Option<DocumentSession>>>,
    /// 连接应当关闭的信号标志，收发循环据此退出
    pub connection_should_close: Arc<AtomicBool>,
}

impl ClientSession {
    /// 创建一个新的 ClientSession 实例
    pub fn new(
        addr: SocketAddr,
        sender: mpsc::Sender<Message>,
        connection_should_close: Arc<AtomicBool>,
    ) -> Self {
        let now = Utc::now();
        Self {
            client_id: Uuid::new_v4(),
            addr,
            sender,
            creation_time: now,
            last_seen: Arc::new(RwLock::new(now)),
            document: Arc::new(RwLock::new(None)),
            connection_should_close,
        }
    }

    /// 将最后活跃时间更新为当前时刻
    pub async fn touch(&self) {
        *self.last_seen.write().await = Utc::now();
    }

    /// 向客户端发送一行文本通知。
    ///
    /// 发送失败（通道已关闭）说明连接正在拆除，调用方视情况终止处理即可。
    pub async fn send_line(&self, line: String) -> bool {
        self.sender.send(Message::Text(line)).await.is_ok()
    }
}
