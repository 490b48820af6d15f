// collab_doc_server/src/ws_server/service.rs

//! WebSocket 服务端核心服务：监听、准入门控的连接接纳与每连接收发循环。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;

use ws_session_utils::admission::{AdmissionCounter, AdmissionPermit};
use ws_session_utils::server::{start_server, AcceptedStream, WsStream};

use crate::config::ServerConfig;
use crate::storage::StorageBackend;
use crate::ws_server::connection_manager::ConnectionManager;
use crate::ws_server::message_router;

/// 普通 HTTP 请求的固定应答体。
const HTTP_BODY: &[u8] = b"OK";

/// 协同文档服务结构体，封装了配置、连接管理器与存储后端。
pub struct DocService {
    config: ServerConfig,
    connection_manager: Arc<ConnectionManager>,
    storage: Arc<dyn StorageBackend>,
}

impl DocService {
    /// 创建一个新的 DocService 实例。
    pub fn new(
        config: ServerConfig,
        connection_manager: Arc<ConnectionManager>,
        storage: Arc<dyn StorageBackend>,
    ) -> Self {
        info!("[文档服务] 新实例已创建。");
        Self {
            config,
            connection_manager,
            storage,
        }
    }

    /// 按配置的地址绑定并启动服务。
    pub async fn start(&self) -> Result<()> {
        let listen_addr = format!("{}:{}", self.config.host, self.config.port);
        info!("[文档服务] 正在启动，监听地址: {}", listen_addr);
        let listener = TcpListener::bind(&listen_addr)
            .await
            .with_context(|| format!("绑定监听地址 {} 失败", listen_addr))?;
        self.start_on(listener).await
    }

    /// 在给定监听器上启动服务（测试用随机端口时走这里）。
    pub async fn start_on(&self, listener: TcpListener) -> Result<()> {
        let admission = AdmissionCounter::new(self.config.max_connections);
        info!(
            "[文档服务] 准入上限: {} (0 表示不限制)。",
            self.config.max_connections
        );

        let connection_manager = Arc::clone(&self.connection_manager);
        let storage = Arc::clone(&self.storage);
        let treat_modified_save_as_autosave = self.config.treat_modified_save_as_autosave;

        let on_connect = move |accepted: AcceptedStream,
                               peer_addr: std::net::SocketAddr,
                               permit: AdmissionPermit| {
            let connection_manager = Arc::clone(&connection_manager);
            let storage = Arc::clone(&storage);
            async move {
                match accepted {
                    AcceptedStream::Http(stream) => {
                        handle_http_connection(stream, peer_addr, permit).await;
                    }
                    AcceptedStream::WebSocket(ws_stream) => {
                        handle_ws_connection(
                            ws_stream,
                            peer_addr,
                            permit,
                            connection_manager,
                            storage,
                            treat_modified_save_as_autosave,
                        )
                        .await;
                    }
                }
            }
        };

        if let Err(e) = start_server(listener, admission, on_connect).await {
            error!("[文档服务] 服务运行中发生严重错误: {}", e);
            return Err(anyhow::Error::from(e)).context("文档服务监听循环失败");
        }
        warn!("[文档服务] 监听循环已意外返回。");
        Ok(())
    }
}

/// 处理一条普通 HTTP 连接：应答固定内容后保持连接打开。
///
/// 连接保持打开意味着它继续占用准入名额——这正是连接上限生效的前提：
/// 对端不关闭，名额就不归还。
async fn handle_http_connection(
    mut stream: TcpStream,
    peer_addr: std::net::SocketAddr,
    permit: AdmissionPermit,
) {
    debug!("[文档服务] 来自 {} 的 HTTP 连接。", peer_addr);

    let mut buffer = [0u8; 2048];
    // 读掉请求头（内容不影响应答，连接层只服务固定资源）
    if stream.read(&mut buffer).await.is_err() {
        return;
    }

    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: text/plain\r\nConnection: keep-alive\r\n\r\n",
        HTTP_BODY.len()
    );
    if stream.write_all(head.as_bytes()).await.is_err()
        || stream.write_all(HTTP_BODY).await.is_err()
    {
        debug!("[文档服务] 向 {} 写入 HTTP 应答失败。", peer_addr);
        return;
    }

    // keep-alive：持有连接直到对端关闭，名额随本任务结束归还
    loop {
        match stream.read(&mut buffer).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }
    debug!(
        "[文档服务] 来自 {} 的 HTTP 连接已结束 (剩余名额快照: {}).",
        peer_addr,
        permit.counter_snapshot()
    );
}

/// 处理一条已完成握手的 WebSocket 连接的完整生命周期。
async fn handle_ws_connection(
    ws_stream: WsStream,
    peer_addr: std::net::SocketAddr,
    _permit: AdmissionPermit,
    connection_manager: Arc<ConnectionManager>,
    storage: Arc<dyn StorageBackend>,
    treat_modified_save_as_autosave: bool,
) {
    let (mut ws_writer, mut ws_receiver) = ws_stream.split();
    let (tx_to_client, mut rx_from_session) = mpsc::channel::<Message>(32);
    let connection_should_close = Arc::new(AtomicBool::new(false));

    let client_session = connection_manager.add_client(
        peer_addr,
        tx_to_client,
        Arc::clone(&connection_should_close),
    );
    info!(
        "[文档服务] 新 WebSocket 客户端: SessionID={}, Addr={}",
        client_session.client_id, client_session.addr
    );

    // 发送循环：把会话通道里的帧写到对端，收到关闭信号后收尾
    let sender_session_id = client_session.client_id;
    let sender_close_flag = Arc::clone(&connection_should_close);
    let sender_task = tokio::spawn(async move {
        loop {
            if sender_close_flag.load(Ordering::SeqCst) {
                info!("[发送循环 {}] 收到关闭信号，发送任务结束。", sender_session_id);
                break;
            }
            tokio::select! {
                biased;
                maybe_frame = rx_from_session.recv() => {
                    match maybe_frame {
                        Some(frame) => {
                            if let Err(e) = ws_writer.send(frame).await {
                                warn!(
                                    "[发送循环 {}] 发送帧失败: {}。按连接已断开处理。",
                                    sender_session_id, e
                                );
                                break;
                            }
                        }
                        None => {
                            info!("[发送循环 {}] 会话通道已关闭，发送任务结束。", sender_session_id);
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep(Duration::from_millis(100)) => {
                    // 周期性醒来复查关闭信号
                    continue;
                }
            }
        }
        // 尽力而为的关闭握手
        let _ = ws_writer.send(Message::Close(None)).await;
        let _ = ws_writer.close().await;
    });

    // 接收循环：逐帧读取并交给消息路由
    loop {
        if connection_should_close.load(Ordering::SeqCst) {
            info!(
                "[文档服务] SessionID {}: 接收循环收到关闭信号，终止连接处理。",
                client_session.client_id
            );
            break;
        }

        let received = tokio::select! {
            biased;
            next = ws_receiver.next() => Some(next),
            _ = tokio::time::sleep(Duration::from_secs(1)) => None,
        };

        match received {
            Some(Some(Ok(Message::Text(line)))) => {
                if let Err(e) = message_router::handle_command(
                    Arc::clone(&client_session),
                    &line,
                    Arc::clone(&storage),
                    treat_modified_save_as_autosave,
                )
                .await
                {
                    // 场景级错误：记录并继续服务该连接
                    error!(
                        "[文档服务] SessionID {}: 处理命令 '{}' 失败: {}",
                        client_session.client_id, line, e
                    );
                }
            }
            Some(Some(Ok(Message::Pong(_)))) | Some(Some(Ok(Message::Ping(_)))) => {
                // 传输层保活的应答路径：Pong 即活跃证据。
                // 对端 Ping 由 tokio-tungstenite 自动回 Pong，这里只刷新活跃时间。
                client_session.touch().await;
                debug!(
                    "[文档服务] SessionID {}: 收到传输层控制帧，已刷新活跃时间。",
                    client_session.client_id
                );
            }
            Some(Some(Ok(Message::Close(frame)))) => {
                info!(
                    "[文档服务] SessionID {}: 对端发起关闭: {:?}",
                    client_session.client_id, frame
                );
                break;
            }
            Some(Some(Ok(_))) => {
                // 本协议不使用二进制帧，忽略
            }
            Some(Some(Err(e))) => {
                warn!(
                    "[文档服务] SessionID {}: WebSocket 协议错误: {}。连接视为已断开。",
                    client_session.client_id, e
                );
                break;
            }
            Some(None) => {
                info!(
                    "[文档服务] SessionID {}: 对端已关闭连接 (流结束)。",
                    client_session.client_id
                );
                break;
            }
            None => {
                // 读取超时：回到循环顶部复查关闭信号
                continue;
            }
        }
    }

    // 接收循环结束：通知发送循环收尾并等待其退出
    connection_should_close.store(true, Ordering::SeqCst);
    if let Err(e) = sender_task.await {
        error!(
            "[文档服务] SessionID {}: 发送任务汇合失败: {:?}",
            client_session.client_id, e
        );
    }

    connection_manager.remove_client(&client_session.client_id);
    info!(
        "[文档服务] SessionID {}: 连接处理已全部结束，名额随任务退出归还。",
        client_session.client_id
    );
}
