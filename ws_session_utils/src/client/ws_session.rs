// ws_session_utils/src/client/ws_session.rs

//! WebSocket 变体的客户端会话与消息等待原语。
//!
//! `WebSocketSession` 在 HTTP 会话之上增加：异步 Upgrade 握手
//! (`async_request`，返回"是否已发起"而非"最终是否成功")、文本帧发送、
//! 以及核心同步原语 [`WebSocketSession::poll`]——带超时地等待某条入站消息
//! 满足给定谓词。拆除分两种：`shutdown_ws` 走优雅的关闭握手，
//! `async_shutdown` 突然丢弃连接；两者都幂等。
//!
//! 读循环的归属跟随轮询器模式：dedicated 模式下由 [`SocketPoller::spawn`]
//! 派生的后台任务持续读取并投递到收件箱；client-thread 模式下 `poll`
//! 自己泵动读端——调用方不泵，入站数据就永远不可见。
//!
//! 传输层 Ping 控制帧由 tokio-tungstenite 在读取路径上自动应答 Pong，
//! 应用层不可见；这正是服务端"控制帧保活"机制所依赖的对端行为。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::Message,
    MaybeTlsStream, WebSocketStream,
};
use url::Url;

use crate::client::http_session::HttpRequest;
use crate::error::SessionError;
use crate::poller::{PollerMode, SocketHandle, SocketPoller};

/// 客户端 WebSocket 流类型（可能经过 TLS 的 TCP 流）。
pub type ClientWsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 优雅关闭握手允许的等待时长。
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// `poll` 谓词对单条消息的裁决。
///
/// 谓词保持纯函数：断言与报告逻辑留在谓词之外，
/// 使这一等待原语在测试之外同样可用。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollVerdict {
    /// 本条消息不相关，消费并继续等待。
    Continue,
    /// 本条消息满足期望，`poll` 以它作为结果返回。
    Accept,
    /// 本条消息违反契约，`poll` 立即以错误终止本场景。
    Reject(String),
}

/// WebSocket 客户端会话。
pub struct WebSocketSession {
    /// 服务端基础 URI，形如 `http://127.0.0.1:9980`。
    server_uri: String,
    /// 握手是否已成功建立且尚未拆除。
    connected: AtomicBool,
    /// 本端或对端是否已完成收尾。
    closed: AtomicBool,
    /// 发送端（握手成功后存在）。
    writer: tokio::sync::Mutex<Option<SplitSink<ClientWsStream, Message>>>,
    /// client-thread 模式下由 `poll` 直接泵动的读端。
    reader: tokio::sync::Mutex<Option<SplitStream<ClientWsStream>>>,
    /// dedicated 模式下读循环投递文本消息的收件箱。
    inbox: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    /// 在轮询器注册表中的句柄。
    handle: Mutex<Option<SocketHandle>>,
}

impl WebSocketSession {
    /// 创建一个未连接的会话句柄。
    pub fn create(server_uri: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            server_uri: server_uri.into(),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            writer: tokio::sync::Mutex::new(None),
            reader: tokio::sync::Mutex::new(None),
            inbox: tokio::sync::Mutex::new(None),
            handle: Mutex::new(None),
        })
    }

    /// 针对给定轮询器异步发起 Upgrade 握手。
    ///
    /// 返回值表示"请求是否已被发起"，而**不是**握手最终是否成功：
    /// 服务端在握手前丢弃连接（准入拒绝）时本方法仍返回 `true`，
    /// 会话随后表现为 `is_connected() == false` 且收不到任何帧。
    /// 仅当 URI 本身无法构成合法的 WebSocket URL 时返回 `false`。
    pub async fn async_request(self: &Arc<Self>, request: &HttpRequest, poller: &Arc<SocketPoller>) -> bool {
        let ws_url = match build_ws_url(&self.server_uri, request.path()) {
            Some(url) => url,
            None => {
                warn!("[WS会话] 无法由 {} 构造 WebSocket URL", self.server_uri);
                return false;
            }
        };

        let handle = poller.register_socket();
        if handle.is_close_requested() {
            self.closed.store(true, Ordering::Release);
            return false;
        }
        *self.handle.lock().expect("WS会话句柄锁中毒") = Some(handle.clone());

        match connect_async(ws_url.as_str()).await {
            Ok((ws_stream, response)) => {
                debug!(
                    "[WS会话] {} 握手成功 (HTTP 状态码: {})",
                    self.server_uri,
                    response.status()
                );
                let (writer, reader) = ws_stream.split();
                *self.writer.lock().await = Some(writer);
                self.connected.store(true, Ordering::Release);

                match poller.mode() {
                    PollerMode::Dedicated => {
                        // 读循环挂到轮询器名下，文本消息投递到收件箱
                        let (tx, rx) = mpsc::unbounded_channel();
                        *self.inbox.lock().await = Some(rx);
                        let session = Arc::clone(self);
                        poller.spawn(async move {
                            session.reader_loop(reader, handle, tx).await;
                        });
                    }
                    PollerMode::ClientThread => {
                        // 调用方经由 poll 自行泵动
                        *self.reader.lock().await = Some(reader);
                    }
                }
                true
            }
            Err(e) => {
                // 握手前被丢弃或握手失败：会话保持未连接，这不是异常路径
                info!("[WS会话] {} 握手未完成: {}", self.server_uri, e);
                self.connected.store(false, Ordering::Release);
                self.closed.store(true, Ordering::Release);
                true
            }
        }
    }

    /// dedicated 模式的后台读循环。
    async fn reader_loop(
        self: Arc<Self>,
        mut reader: SplitStream<ClientWsStream>,
        handle: SocketHandle,
        tx: mpsc::UnboundedSender<String>,
    ) {
        loop {
            tokio::select! {
                _ = handle.wait_close() => {
                    debug!("[WS会话] {} 读循环收到强制关闭信号", self.server_uri);
                    self.mark_closed();
                    break;
                }
                next = reader.next() => match next {
                    Some(Ok(Message::Text(text))) => {
                        if tx.send(text).is_err() {
                            // 收件箱已被拆除，会话不再关心入站消息
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        // 控制帧保活由 tokio-tungstenite 自动应答，应用层无需处理
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!("[WS会话] {} 收到 Close 帧: {:?}", self.server_uri, frame);
                        self.mark_closed();
                        break;
                    }
                    Some(Ok(_)) => {
                        // 其余帧类型（Binary/Frame）在本协议中不出现，跳过
                    }
                    Some(Err(e)) => {
                        debug!("[WS会话] {} 读循环错误: {}", self.server_uri, e);
                        self.mark_closed();
                        break;
                    }
                    None => {
                        self.mark_closed();
                        break;
                    }
                }
            }
        }
    }

    /// 发送一个应用层文本帧。
    pub async fn send_message(&self, text: &str) -> Result<(), SessionError> {
        let mut writer = self.writer.lock().await;
        let sink = writer.as_mut().ok_or(SessionError::NotConnected)?;
        if let Err(e) = sink.send(Message::Text(text.to_string())).await {
            debug!("[WS会话] {} 发送 '{}' 失败: {}", self.server_uri, text, e);
            self.mark_closed();
            return Err(SessionError::WebSocketProtocol(e));
        }
        Ok(())
    }

    /// 阻塞等待某条入站消息满足谓词，或超时。
    ///
    /// 消息按传输层交付顺序逐条交给谓词：`Continue` 消费并继续等待，
    /// `Accept` 以该消息返回，`Reject` 立即终止。等待期间本方法泵动
    /// 所属轮询器的读端（client-thread 模式）或消费收件箱（dedicated 模式），
    /// 因此同一轮询器上的其他工作不会被饿死。
    ///
    /// 超时是可区分的终局结果：`label` 应包含会话名与期望模式。
    pub async fn poll<F>(
        &self,
        predicate: F,
        timeout: Duration,
        label: &str,
    ) -> Result<String, SessionError>
    where
        F: Fn(&str) -> PollVerdict,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or_else(|| SessionError::Timeout { label: label.to_string(), timeout })?;

            let message = match self.next_message(remaining).await {
                Ok(Some(message)) => message,
                Ok(None) => {
                    // 流在等待期间结束
                    return Err(SessionError::Closed);
                }
                Err(SessionError::Timeout { .. }) => {
                    return Err(SessionError::Timeout { label: label.to_string(), timeout });
                }
                Err(e) => return Err(e),
            };

            debug!("[WS会话] {} poll('{}') 收到: {}", self.server_uri, label, message);
            match predicate(&message) {
                PollVerdict::Continue => continue,
                PollVerdict::Accept => return Ok(message),
                PollVerdict::Reject(reason) => return Err(SessionError::Rejected(reason)),
            }
        }
    }

    /// 取出下一条文本消息；`Ok(None)` 表示流已结束。
    async fn next_message(&self, remaining: Duration) -> Result<Option<String>, SessionError> {
        // dedicated 模式：消费读循环投递的收件箱
        {
            let mut inbox = self.inbox.lock().await;
            if let Some(rx) = inbox.as_mut() {
                return match tokio::time::timeout(remaining, rx.recv()).await {
                    Ok(message) => Ok(message),
                    Err(_) => Err(SessionError::Timeout {
                        label: String::new(),
                        timeout: remaining,
                    }),
                };
            }
        }

        // client-thread 模式：就地泵动读端
        let mut reader_guard = self.reader.lock().await;
        let reader = reader_guard.as_mut().ok_or(SessionError::NotConnected)?;
        let deadline = Instant::now() + remaining;
        loop {
            let step = deadline
                .checked_duration_since(Instant::now())
                .ok_or(SessionError::Timeout { label: String::new(), timeout: remaining })?;
            match tokio::time::timeout(step, reader.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => return Ok(Some(text)),
                Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                    self.mark_closed();
                    return Ok(None);
                }
                Ok(Some(Ok(_))) => continue, // 控制帧，继续泵动
                Ok(Some(Err(e))) => {
                    self.mark_closed();
                    return Err(SessionError::WebSocketProtocol(e));
                }
                Err(_) => {
                    return Err(SessionError::Timeout { label: String::new(), timeout: remaining })
                }
            }
        }
    }

    /// 执行优雅的 WebSocket 关闭握手：发送 Close 帧并在宽限期内等待收尾。
    /// 幂等：对已关闭会话调用是无操作。
    pub async fn shutdown_ws(&self) {
        if self.closed.load(Ordering::Acquire) {
            self.connected.store(false, Ordering::Release);
            return;
        }
        info!("[WS会话] {} 发起优雅关闭", self.server_uri);

        if let Some(sink) = self.writer.lock().await.as_mut() {
            if let Err(e) = sink.send(Message::Close(None)).await {
                debug!("[WS会话] {} 发送 Close 帧失败: {}", self.server_uri, e);
            }
        }

        // client-thread 模式下就地排空直到对端确认；dedicated 模式下读循环负责收尾
        {
            let mut reader_guard = self.reader.lock().await;
            if let Some(reader) = reader_guard.as_mut() {
                let _ = tokio::time::timeout(SHUTDOWN_GRACE, async {
                    while let Some(next) = reader.next().await {
                        if matches!(next, Ok(Message::Close(_)) | Err(_)) {
                            break;
                        }
                    }
                })
                .await;
            }
        }
        let wait_until = Instant::now() + SHUTDOWN_GRACE;
        while !self.closed.load(Ordering::Acquire) && Instant::now() < wait_until {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        self.mark_closed();
        self.release_halves().await;
    }

    /// 突然关闭：不发送 Close 帧，不等待对端，立即丢弃连接。幂等。
    pub async fn async_shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("[WS会话] {} 突然关闭", self.server_uri);
        }
        self.connected.store(false, Ordering::Release);
        self.release_halves().await;
        if let Some(handle) = self.handle.lock().expect("WS会话句柄锁中毒").as_ref() {
            handle.request_close();
        }
    }

    /// 会话是否仍处于已连接状态。
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.closed.load(Ordering::Acquire)
    }

    /// 本端或对端是否已完成关闭收尾。
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
        self.connected.store(false, Ordering::Release);
    }

    /// 释放收发两半，使底层套接字随之关闭。
    async fn release_halves(&self) {
        self.writer.lock().await.take();
        self.reader.lock().await.take();
        self.inbox.lock().await.take();
    }
}

/// 由服务端基础 URI 与请求路径构造 WebSocket URL（http -> ws）。
fn build_ws_url(server_uri: &str, path: &str) -> Option<Url> {
    let mut url = Url::parse(server_uri).ok()?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return None,
    };
    url.set_scheme(scheme).ok()?;
    url.set_path(path);
    Some(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_ws_url() {
        let url = build_ws_url("http://127.0.0.1:9980", "/collab/doc/ws").expect("构造失败");
        assert_eq!(url.as_str(), "ws://127.0.0.1:9980/collab/doc/ws");
        assert!(build_ws_url("ftp://127.0.0.1", "/x").is_none(), "不支持的 scheme 应被拒绝");
    }

    #[tokio::test]
    async fn test_poll_on_disconnected_session_reports_not_connected() {
        let session = WebSocketSession::create("http://127.0.0.1:1");
        let result = session
            .poll(|_| PollVerdict::Accept, Duration::from_millis(50), "未连接会话")
            .await;
        assert!(
            matches!(result, Err(SessionError::NotConnected)),
            "未连接会话的 poll 应返回 NotConnected，实际: {:?}",
            result.err()
        );
    }

    #[tokio::test]
    async fn test_double_async_shutdown_is_idempotent() {
        let session = WebSocketSession::create("http://127.0.0.1:1");
        session.async_shutdown().await;
        assert!(!session.is_connected());
        assert!(session.is_closed());
        // 第二次拆除观察到同样的状态，且无副作用
        session.async_shutdown().await;
        assert!(!session.is_connected());
        assert!(session.is_closed());
    }
}
