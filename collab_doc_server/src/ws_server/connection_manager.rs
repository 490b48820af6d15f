// collab_doc_server/src/ws_server/connection_manager.rs

//! WebSocket 连接管理。

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use uuid::Uuid;

use crate::ws_server::client_session::ClientSession;

/// 管理所有活动的 WebSocket 客户端会话
#[derive(Clone, Default)]
pub struct ConnectionManager {
    /// 存储所有活动的 ClientSession，使用 DashMap 实现线程安全
    /// Key: client_id (Uuid) - 由会话创建时生成的会话ID
    /// Value: Arc<ClientSession>
    clients: Arc<DashMap<Uuid, Arc<ClientSession>>>,
}

impl ConnectionManager {
    /// 创建一个新的 ConnectionManager 实例
    pub fn new() -> Self {
        Self { clients: Arc::new(DashMap::new()) }
    }

    /// 添加一个新的客户端会话到管理器中。
    /// 此方法应由传输层在完成 WebSocket 握手后调用。
    ///
    /// # Arguments
    /// * `addr` - 新连接客户端的 SocketAddr。
    /// * `sender` - 用于向该客户端发送 WebSocket 帧的 mpsc::Sender。
    /// * `connection_should_close` - 连接关闭信号标志，由收发循环共享。
    ///
    /// # Returns
    /// 返回新创建的 `Arc<ClientSession>`。
    pub fn add_client(
        &self,
        addr: SocketAddr,
        sender: mpsc::Sender<Message>,
        connection_should_close: Arc<AtomicBool>,
    ) -> Arc<ClientSession> {
        let client_session = Arc::new(ClientSession::new(addr, sender, connection_should_close));
        self.clients.insert(client_session.client_id, Arc::clone(&client_session));

        info!(
            "新客户端连接成功: id={}, addr={}",
            client_session.client_id, client_session.addr
        );
        debug!("当前活动客户端总数: {}", self.clients.len());

        client_session
    }

    /// 根据 client_id 获取一个客户端会话的引用。
    pub fn get_client(&self, client_id: &Uuid) -> Option<Arc<ClientSession>> {
        self.clients.get(client_id).map(|entry| Arc::clone(entry.value()))
    }

    /// 当前所有活动客户端会话的快照，供保活巡查遍历。
    pub fn get_all_client_sessions(&self) -> Vec<Arc<ClientSession>> {
        self.clients.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// 当前活动客户端数。
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// 从管理器中移除一个客户端会话，并向其收发循环发出关闭信号。
    ///
    /// 此方法在连接断开时由传输回调调用，也在保活巡查判定失联时调用。
    ///
    /// # Returns
    /// 如果找到并成功移除了会话，则返回被移除的 `Arc<ClientSession>`，否则返回 `None`。
    pub fn remove_client(&self, client_id: &Uuid) -> Option<Arc<ClientSession>> {
        match self.clients.remove(client_id) {
            Some((_id, session)) => {
                // 收发循环观察到该标志后自行退出并释放准入名额
                session.connection_should_close.store(true, Ordering::SeqCst);
                info!("客户端断开连接: id={}, addr={}", session.client_id, session.addr);
                debug!("移除后当前活动客户端总数: {}", self.clients.len());
                Some(session)
            }
            None => {
                warn!("尝试移除不存在的客户端: id={}", client_id);
                None
            }
        }
    }
}
