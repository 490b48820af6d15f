// ws_session_utils/src/server/transport.rs

//! 包含服务端监听、准入门控的连接接受与协议分派逻辑。
//!
//! 接受循环对每条入站 TCP 连接做三件事，顺序严格：
//! 1. **准入检查**——发生在任何协议握手**之前**。计数已达上限时直接丢弃
//!    TCP 流：对端观察到"从未建立连接"，没有状态码，也没有任何帧。
//! 2. **协议分派**——窥探（peek）请求头判断是普通 HTTP 请求还是
//!    WebSocket Upgrade，后者交给 `tokio-tungstenite` 完成握手。
//! 3. **移交**——把接受结果连同准入许可一起交给回调；许可随连接任务
//!    存亡，析构即归还名额，任何退出路径都不会泄漏。

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, WebSocketStream};

use crate::admission::{AdmissionCounter, AdmissionPermit};
use crate::error::SessionError;

/// 经过 WebSocket 握手后的服务端流。
pub type WsStream = WebSocketStream<TcpStream>;

/// 窥探请求头允许的最长等待。
const PEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// 一条已被接纳的入站连接，按协议分派后的形态。
pub enum AcceptedStream {
    /// 普通 HTTP 请求/应答连接，流保持未读状态。
    Http(TcpStream),
    /// 已完成 Upgrade 握手的 WebSocket 连接。
    WebSocket(WsStream),
}

/// 在给定监听器上运行准入门控的接受循环。
///
/// 对于每一条通过准入检查并完成协议分派的连接，调用 `on_connect` 回调。
/// 此循环会持续运行，直到所在任务被中止或监听器发生不可恢复的错误。
///
/// # Arguments
/// * `listener`: 已绑定的 `TcpListener`（由调用方绑定，便于测试使用随机端口）。
/// * `admission`: 进程级准入计数器；每条连接的许可随回调任务存亡。
/// * `on_connect`: 连接处理回调，参数为分派后的流、对端地址与准入许可。
///   回调在新的 Tokio 任务中执行，因此必须是 `Send + Sync + Clone + 'static`。
///
/// # Returns
/// * `Result<(), SessionError>`: 监听器错误时返回；正常情况下无限运行。
pub async fn start_server<F, Fut>(
    listener: TcpListener,
    admission: Arc<AdmissionCounter>,
    on_connect: F,
) -> Result<(), SessionError>
where
    F: Fn(AcceptedStream, SocketAddr, AdmissionPermit) -> Fut + Send + Sync + Clone + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let local_addr = listener.local_addr()?;
    info!("[服务端传输] 正在监听 {}", local_addr);

    loop {
        match listener.accept().await {
            Ok((tcp_stream, peer_addr)) => {
                // 准入检查先于一切协议握手
                let Some(permit) = admission.try_admit() else {
                    info!(
                        "[服务端传输] 达到连接上限，丢弃来自 {} 的连接 (当前 {}/{})",
                        peer_addr,
                        admission.current(),
                        admission.max_connections()
                    );
                    drop(tcp_stream);
                    continue;
                };

                debug!("[服务端传输] 接纳来自 {} 的 TCP 连接", peer_addr);
                let on_connect_callback = on_connect.clone();

                tokio::spawn(async move {
                    // 许可被移入本任务：无论分派/握手成败，析构都会归还名额
                    match dispatch_stream(tcp_stream, peer_addr).await {
                        Ok(accepted) => on_connect_callback(accepted, peer_addr, permit).await,
                        Err(e) => {
                            warn!("[服务端传输] 来自 {} 的连接分派失败: {}", peer_addr, e);
                        }
                    }
                });
            }
            Err(e) => {
                // 接受单条连接失败不终止服务，记录后继续监听
                error!("[服务端传输] 接受 TCP 连接失败: {}。服务继续运行。", e);
            }
        }
    }
}

/// 窥探请求头，把连接分派为普通 HTTP 或 WebSocket。
async fn dispatch_stream(
    stream: TcpStream,
    peer_addr: SocketAddr,
) -> Result<AcceptedStream, SessionError> {
    let is_upgrade = tokio::time::timeout(PEEK_TIMEOUT, peek_is_websocket_upgrade(&stream))
        .await
        .map_err(|_| SessionError::Timeout {
            label: format!("窥探来自 {} 的请求头", peer_addr),
            timeout: PEEK_TIMEOUT,
        })??;

    if is_upgrade {
        let ws_stream = accept_async(stream).await?;
        debug!("[服务端传输] 与 {} 的 WebSocket 握手成功", peer_addr);
        Ok(AcceptedStream::WebSocket(ws_stream))
    } else {
        Ok(AcceptedStream::Http(stream))
    }
}

/// 不消费数据地判断请求头是否携带 WebSocket Upgrade。
async fn peek_is_websocket_upgrade(stream: &TcpStream) -> Result<bool, SessionError> {
    let mut buffer = [0u8; 2048];
    loop {
        let n = stream.peek(&mut buffer).await?;
        if n == 0 {
            // 对端在发送请求头之前就关闭了
            return Ok(false);
        }
        let head = String::from_utf8_lossy(&buffer[..n]);
        if head.contains("\r\n\r\n") || n == buffer.len() {
            let lowered = head.to_ascii_lowercase();
            return Ok(lowered.contains("upgrade: websocket"));
        }
        // 请求头尚未到齐，稍后再窥探
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
