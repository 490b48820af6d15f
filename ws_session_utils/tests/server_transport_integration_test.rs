// ws_session_utils/tests/server_transport_integration_test.rs

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{info, LevelFilter};
use tokio_tungstenite::tungstenite::protocol::Message;

use ws_session_utils::admission::AdmissionCounter;
use ws_session_utils::client::{HttpRequest, HttpSession, PollVerdict, WebSocketSession};
use ws_session_utils::error::SessionError;
use ws_session_utils::poller::SocketPoller;
use ws_session_utils::server::transport::{start_server, AcceptedStream};

// 辅助函数：初始化日志，仅用于测试，避免多次初始化
fn init_test_logger() {
    let _ = env_logger::builder()
        .filter_level(LevelFilter::Info)
        .is_test(true)
        .try_init();
}

/// 启动一个准入门控的回显服务端：
/// - WebSocket 连接回显收到的每个文本帧，直到对端关闭；
/// - 普通 HTTP 请求应答 200 与固定正文，随后保持连接直到对端关闭。
async fn spawn_echo_server(limit: usize) -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("无法绑定到随机端口");
    let addr = listener.local_addr().expect("无法获取本地监听地址");
    let admission = AdmissionCounter::new(limit);

    let server_handle = tokio::spawn(async move {
        let result = start_server(listener, admission, |accepted, peer_addr, _permit| async move {
            // 把许可移入连接任务，名额保持占用直到本处理函数返回
            let _permit = _permit;
            match accepted {
                AcceptedStream::WebSocket(mut ws_stream) => {
                    info!("[回显服务端] 新的 WebSocket 连接来自 {}", peer_addr);
                    while let Some(Ok(message)) = ws_stream.next().await {
                        match message {
                            Message::Text(text) => {
                                let echo = format!("echo: {}", text);
                                if ws_stream.send(Message::Text(echo)).await.is_err() {
                                    break;
                                }
                            }
                            Message::Close(_) => break,
                            _ => {}
                        }
                    }
                }
                AcceptedStream::Http(mut stream) => {
                    use tokio::io::{AsyncReadExt, AsyncWriteExt};
                    let mut discard = [0u8; 1024];
                    let _ = stream.read(&mut discard).await;
                    let body = b"ok";
                    let head = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: keep-alive\r\n\r\n",
                        body.len()
                    );
                    let _ = stream.write_all(head.as_bytes()).await;
                    let _ = stream.write_all(body).await;
                    // keep-alive：占住名额直到对端关闭
                    loop {
                        match stream.read(&mut discard).await {
                            Ok(0) | Err(_) => break,
                            Ok(_) => {}
                        }
                    }
                }
            }
        })
        .await;
        if let Err(e) = result {
            panic!("[回显服务端] start_server 失败: {:?}", e);
        }
    });

    // 稍作等待，确保监听循环已经就绪
    tokio::time::sleep(Duration::from_millis(100)).await;
    (addr, server_handle)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ws_echo_through_admission_gate() {
    init_test_logger();
    let (addr, server_handle) = spawn_echo_server(4).await;
    let server_uri = format!("http://{}", addr);

    let poller = SocketPoller::new("ws-echo-test");
    poller.start_thread();

    let session = WebSocketSession::create(&server_uri);
    let dispatched = session.async_request(&HttpRequest::new("/doc/ws"), &poller).await;
    assert!(dispatched, "Upgrade 请求应已发起");
    assert!(session.is_connected(), "限额之内的握手应成功");

    session.send_message("来自集成测试的问候").await.expect("发送文本帧失败");
    let reply = session
        .poll(
            |msg| {
                if msg.contains("来自集成测试的问候") {
                    PollVerdict::Accept
                } else {
                    PollVerdict::Continue
                }
            },
            Duration::from_secs(5),
            "等待回显",
        )
        .await
        .expect("未在限期内等到回显");
    assert!(reply.starts_with("echo: "), "回显格式不符: {}", reply);

    session.shutdown_ws().await;
    assert!(!session.is_connected(), "优雅关闭后会话应为未连接");
    poller.join_thread().await;
    server_handle.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_poll_predicate_reject_terminates_with_rejected_error() {
    init_test_logger();
    let (addr, server_handle) = spawn_echo_server(4).await;
    let server_uri = format!("http://{}", addr);

    let poller = SocketPoller::new("poll-reject-test");
    poller.start_thread();
    let session = WebSocketSession::create(&server_uri);
    assert!(session.async_request(&HttpRequest::new("/doc/ws"), &poller).await);
    assert!(session.is_connected(), "握手应成功");

    // 回显帧在本谓词眼中即契约违规，poll 必须立即以 Rejected 终止
    session.send_message("越界消息").await.expect("发送文本帧失败");
    let result = session
        .poll(
            |msg| {
                if msg.contains("越界消息") {
                    PollVerdict::Reject(format!("收到越界消息: {}", msg))
                } else {
                    PollVerdict::Continue
                }
            },
            Duration::from_secs(5),
            "等待越界消息被拒绝",
        )
        .await;
    match result {
        Err(SessionError::Rejected(reason)) => {
            assert!(
                reason.contains("echo: 越界消息"),
                "拒绝原因应携带违规消息本身: {}",
                reason
            );
        }
        other => panic!("谓词拒绝应以 Rejected 终止，实际: {:?}", other),
    }

    session.shutdown_ws().await;
    poller.join_thread().await;
    server_handle.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_admission_gate_drops_excess_connection_before_handshake() {
    init_test_logger();
    // 上限 1：第一条连接占住名额后，第二条必须被丢弃
    let (addr, server_handle) = spawn_echo_server(1).await;
    let server_uri = format!("http://{}", addr);

    let poller_first = SocketPoller::new("gate-first");
    poller_first.start_thread();
    let first = WebSocketSession::create(&server_uri);
    assert!(first.async_request(&HttpRequest::new("/doc/ws"), &poller_first).await);
    assert!(first.is_connected(), "第一条连接应被接纳");

    // 第二条连接：HTTP 会话在限额之外，应答必须没有状态码
    let poller_second = SocketPoller::new("gate-second");
    poller_second.run_on_client_thread();
    let second = HttpSession::create(&server_uri);
    let response = second.sync_request(&HttpRequest::new("/favicon.ico"), &poller_second).await;
    assert_eq!(response.status_code(), None, "限额之外的请求不应收到任何状态码");
    assert!(!second.is_connected(), "限额之外的会话应报告未连接");

    // 第一条连接拆除并归还名额后，后续请求恢复正常
    first.shutdown_ws().await;
    poller_first.join_thread().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let poller_third = SocketPoller::new("gate-third");
    poller_third.run_on_client_thread();
    let third = HttpSession::create(&server_uri);
    let response = third.sync_request(&HttpRequest::new("/favicon.ico"), &poller_third).await;
    assert_eq!(response.status_code(), Some(200), "名额归还后的请求应收到 200");
    assert!(third.is_connected());
    assert!(response.content_length() > 0, "应答体不应为空");

    third.async_shutdown().await;
    poller_second.close_all_sockets();
    poller_third.close_all_sockets();
    server_handle.abort();
}
