// ws_session_utils/src/client/http_session.rs

//! HTTP 变体的客户端会话。
//!
//! `HttpSession` 表示对服务端的一次逻辑对话：`create` 得到未连接的句柄，
//! `sync_request` 在调用方上下文中驱动给定轮询器直到收到完整应答或连接
//! 失败/被拒。关键契约：被准入控制拒绝的连接，其应答**没有状态码**且
//! `is_connected()` 为 false——这是"触到上限"的成功路径，调用方必须把
//! "拿到 HTTP 200"与"从未连上"视为同一调用的两种合法终局，而不是异常。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use url::Url;

use crate::poller::{SocketHandle, SocketPoller};

/// 单次请求允许的总时长（连接 + 写入 + 读取完整应答）。
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// 一次 HTTP 请求的描述。目前连接层只需要 GET。
#[derive(Debug, Clone)]
pub struct HttpRequest {
    path: String,
}

impl HttpRequest {
    /// 以请求路径构造（例如 `/favicon.ico`）。
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// 请求路径。
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// 一次 HTTP 请求的终局应答。
///
/// `status_code()` 为 `None` 表示连接从未建立或在收到状态行之前就被
/// 对端关闭——准入拒绝与底层传输失败在本层面刻意不可区分。
#[derive(Debug, Default)]
pub struct HttpResponse {
    status_code: Option<u16>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl HttpResponse {
    /// "从未连上"的空应答。
    fn none() -> Self {
        Self::default()
    }

    /// HTTP 状态码；`None` 表示未收到任何状态行。
    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    /// 按名称（不区分大小写）查找应答头。
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// 应答体长度。
    pub fn content_length(&self) -> usize {
        self.body.len()
    }

    /// 应答体。
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// HTTP 客户端会话。
pub struct HttpSession {
    /// 服务端基础 URI，形如 `http://127.0.0.1:9980`。
    server_uri: String,
    /// 当前是否持有存活的连接。
    connected: AtomicBool,
    /// 请求完成后保持打开的连接（keep-alive），直到会话拆除。
    stream: tokio::sync::Mutex<Option<TcpStream>>,
    /// 在轮询器注册表中的句柄，用于强制关闭。
    handle: Mutex<Option<SocketHandle>>,
}

impl HttpSession {
    /// 创建一个未连接的会话句柄。
    pub fn create(server_uri: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            server_uri: server_uri.into(),
            connected: AtomicBool::new(false),
            stream: tokio::sync::Mutex::new(None),
            handle: Mutex::new(None),
        })
    }

    /// 同步驱动一次完整的请求/应答。
    ///
    /// 在调用方上下文中推进 I/O（client-thread 轮询器的契约），直到：
    /// 收到完整应答、连接失败/被拒、套接字被轮询器强制关闭、或整体超时。
    /// 后三种情况一律返回无状态码的空应答并把会话置为未连接。
    pub async fn sync_request(&self, request: &HttpRequest, poller: &SocketPoller) -> HttpResponse {
        let handle = poller.register_socket();
        if handle.is_close_requested() {
            // 轮询器已在停止流程中，不再建立新连接
            self.connected.store(false, Ordering::Release);
            return HttpResponse::none();
        }
        *self.handle.lock().expect("HTTP会话句柄锁中毒") = Some(handle.clone());

        let outcome = tokio::select! {
            result = tokio::time::timeout(REQUEST_TIMEOUT, self.drive_request(request)) => result,
            _ = handle.wait_close() => {
                info!("[HTTP会话] {} 套接字被轮询器强制关闭", self.server_uri);
                self.connected.store(false, Ordering::Release);
                return HttpResponse::none();
            }
        };

        match outcome {
            Ok(Some(response)) => {
                self.connected.store(true, Ordering::Release);
                response
            }
            Ok(None) => {
                // 从未连上：准入拒绝或传输失败，两者在此层面同形
                self.connected.store(false, Ordering::Release);
                HttpResponse::none()
            }
            Err(_) => {
                warn!(
                    "[HTTP会话] {} 请求 '{}' 超时 ({:?})",
                    self.server_uri,
                    request.path(),
                    REQUEST_TIMEOUT
                );
                self.connected.store(false, Ordering::Release);
                HttpResponse::none()
            }
        }
    }

    /// 实际的连接、写请求、读应答流程。
    ///
    /// 返回 `None` 表示连接未建立或在状态行之前关闭。
    async fn drive_request(&self, request: &HttpRequest) -> Option<HttpResponse> {
        let (host, port) = match parse_host_port(&self.server_uri) {
            Some(pair) => pair,
            None => {
                warn!("[HTTP会话] 无法解析服务端 URI: {}", self.server_uri);
                return None;
            }
        };

        let mut stream = match TcpStream::connect((host.as_str(), port)).await {
            Ok(stream) => stream,
            Err(e) => {
                debug!("[HTTP会话] 连接 {}:{} 失败: {}", host, port, e);
                return None;
            }
        };

        let request_text = format!(
            "GET {} HTTP/1.1\r\nHost: {}:{}\r\nConnection: keep-alive\r\nUser-Agent: ws_session_utils\r\n\r\n",
            request.path(),
            host,
            port
        );
        if let Err(e) = stream.write_all(request_text.as_bytes()).await {
            debug!("[HTTP会话] 写入请求失败: {}", e);
            return None;
        }

        // 读到头部结束标记为止
        let mut raw = Vec::with_capacity(1024);
        let header_end = loop {
            let mut chunk = [0u8; 1024];
            match stream.read(&mut chunk).await {
                Ok(0) => {
                    // 状态行之前对端就关闭了连接：准入拒绝的观察形态
                    debug!("[HTTP会话] 对端在应答前关闭连接 (已读 {} 字节)", raw.len());
                    return None;
                }
                Ok(n) => {
                    raw.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = find_header_end(&raw) {
                        break pos;
                    }
                }
                Err(e) => {
                    debug!("[HTTP会话] 读取应答失败: {}", e);
                    return None;
                }
            }
        };

        let (status_code, headers) = parse_response_head(&raw[..header_end])?;

        // 按 Content-Length 读满应答体
        let content_length = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        let mut body = raw[header_end + 4..].to_vec();
        while body.len() < content_length {
            let mut chunk = [0u8; 1024];
            match stream.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => body.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    debug!("[HTTP会话] 读取应答体失败: {}", e);
                    return None;
                }
            }
        }

        debug!(
            "[HTTP会话] {} '{}' -> 状态 {}，应答体 {} 字节",
            self.server_uri,
            request.path(),
            status_code,
            body.len()
        );

        // keep-alive：连接保持打开，继续占用服务端的准入名额
        *self.stream.lock().await = Some(stream);

        Some(HttpResponse { status_code: Some(status_code), headers, body })
    }

    /// 当前套接字状态是否为已连接。
    pub fn is_connected(&self) -> bool {
        if !self.connected.load(Ordering::Acquire) {
            return false;
        }
        let handle = self.handle.lock().expect("HTTP会话句柄锁中毒");
        !handle.as_ref().is_some_and(|h| h.is_close_requested())
    }

    /// 发起突然关闭：不等待对端确认，立即丢弃连接。幂等。
    pub async fn async_shutdown(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            debug!("[HTTP会话] {} 突然关闭", self.server_uri);
        }
        self.stream.lock().await.take();
        if let Some(handle) = self.handle.lock().expect("HTTP会话句柄锁中毒").as_ref() {
            handle.request_close();
        }
    }
}

/// 从 `http://host:port` 形式的 URI 中解析主机与端口。
fn parse_host_port(server_uri: &str) -> Option<(String, u16)> {
    let url = Url::parse(server_uri).ok()?;
    let host = url.host_str()?.to_string();
    let port = url.port_or_known_default()?;
    Some((host, port))
}

/// 在原始字节中查找头部结束标记 `\r\n\r\n` 的起始位置。
fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|window| window == b"\r\n\r\n")
}

/// 解析状态行与应答头。格式无法识别时返回 `None`（视同未连上）。
fn parse_response_head(head: &[u8]) -> Option<(u16, Vec<(String, String)>)> {
    let text = std::str::from_utf8(head).ok()?;
    let mut lines = text.split("\r\n");
    let status_line = lines.next()?;
    // "HTTP/1.1 200 OK" -> 第二个记号是状态码
    let status_code = status_line.split_whitespace().nth(1)?.parse::<u16>().ok()?;
    let headers = lines
        .filter_map(|line| {
            let (k, v) = line.split_once(':')?;
            Some((k.trim().to_string(), v.trim().to_string()))
        })
        .collect();
    Some((status_code, headers))
}
