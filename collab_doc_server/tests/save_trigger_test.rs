// collab_doc_server/tests/save_trigger_test.rs

//! 保存触发状态机的端到端测试：完整走一遍"未修改保存、修改、带扩展数据
//! 的保存"场景，逐字断言发往存储后端的请求头契约与保存时序。

use std::sync::Arc;
use std::time::Duration;

use log::LevelFilter;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use collab_doc_server::config::ServerConfig;
use collab_doc_server::storage::RecordingStorage;
use collab_doc_server::ws_server::connection_manager::ConnectionManager;
use collab_doc_server::ws_server::service::DocService;
use collab_protocol::notifications::progress_has_id;
use collab_protocol::storage::{
    SaveRequest, HEADER_EXTENDED_DATA, HEADER_IS_AUTOSAVE, HEADER_IS_MODIFIED_BY_USER,
};
use ws_session_utils::client::{HttpRequest, PollVerdict, WebSocketSession};
use ws_session_utils::poller::SocketPoller;

/// 场景使用的扩展数据线格式（百分号转义）。
const EXTENDED_DATA_WIRE: &str = "CustomFlag%3DCustom%20Value%3BAnotherFlag%3DAnotherValue";
/// 解码后期望出现在存储请求头里的明文。
const EXTENDED_DATA_HEADER: &str = "CustomFlag=Custom Value;AnotherFlag=AnotherValue";

fn init_test_logger() {
    let _ = env_logger::builder()
        .filter_level(LevelFilter::Info)
        .is_test(true)
        .try_init();
}

/// 启动带观察者存储后端的文档服务。
async fn start_doc_server_with_observer(
    config: ServerConfig,
) -> (
    String,
    Arc<RecordingStorage>,
    mpsc::UnboundedReceiver<SaveRequest>,
    tokio::task::JoinHandle<()>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("无法绑定到随机端口");
    let addr = listener.local_addr().expect("无法获取本地监听地址");

    let (storage, save_rx) = RecordingStorage::with_observer();
    let connection_manager = Arc::new(ConnectionManager::new());
    let service = DocService::new(
        config,
        connection_manager,
        Arc::clone(&storage) as Arc<dyn collab_doc_server::storage::StorageBackend>,
    );

    let server_handle = tokio::spawn(async move {
        if let Err(e) = service.start_on(listener).await {
            panic!("文档服务启动失败: {:?}", e);
        }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    (format!("http://{}", addr), storage, save_rx, server_handle)
}

/// 带超时地等待下一次到达存储后端的保存请求。
async fn next_save(rx: &mut mpsc::UnboundedReceiver<SaveRequest>) -> SaveRequest {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("等待保存请求超时")
        .expect("存储观察者通道已关闭")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_save_trigger_scenario_end_to_end() {
    init_test_logger();
    let config = ServerConfig {
        max_connections: 0,
        ws_ping_period_seconds: 0,
        ws_ping_timeout_seconds: 0,
        treat_modified_save_as_autosave: true,
        ..ServerConfig::default()
    };
    let (server_uri, storage, mut save_rx, server_handle) =
        start_doc_server_with_observer(config).await;

    let poller = SocketPoller::new("save-trigger");
    poller.start_thread();
    let session = WebSocketSession::create(&server_uri);
    assert!(session.async_request(&HttpRequest::new("/collab/doc/ws"), &poller).await);
    assert!(session.is_connected(), "握手应成功");

    // 1. 加载文档，等待 ready
    session.send_message("load url=hello.odt").await.expect("发送 load 失败");
    session
        .poll(
            |msg| {
                if progress_has_id(msg, "ready") {
                    PollVerdict::Accept
                } else {
                    PollVerdict::Continue
                }
            },
            Duration::from_secs(5),
            "等待加载完成",
        )
        .await
        .expect("未等到加载完成");

    // 2. 未修改之腿：保存一篇从未被改动的文档
    session
        .send_message("save dontTerminateEdit=1 dontSaveIfUnmodified=0")
        .await
        .expect("发送未修改保存失败");
    let first = next_save(&mut save_rx).await;
    assert_eq!(first.document_url, "hello.odt");
    assert_eq!(first.header(HEADER_IS_MODIFIED_BY_USER).as_deref(), Some("false"));
    assert_eq!(first.header(HEADER_IS_AUTOSAVE).as_deref(), Some("false"));
    assert_eq!(first.header(HEADER_EXTENDED_DATA), None, "未修改之腿不应携带扩展数据头");

    // 3. 修改文档：一次字符输入加一次按键抬起
    session
        .send_message("key type=input char=97 key=0")
        .await
        .expect("发送字符输入失败");
    session
        .send_message("key type=up char=0 key=512")
        .await
        .expect("发送按键抬起失败");
    session
        .poll(
            |msg| {
                if msg.contains("statechanged: modified=true") {
                    PollVerdict::Accept
                } else {
                    PollVerdict::Continue
                }
            },
            Duration::from_secs(5),
            "等待修改状态变化",
        )
        .await
        .expect("字符输入后应收到 statechanged: modified=true");

    // 4. 已修改之腿：带扩展数据的保存，按策略上报为自动保存
    session
        .send_message(&format!(
            "save dontTerminateEdit=0 dontSaveIfUnmodified=0 extendedData={}",
            EXTENDED_DATA_WIRE
        ))
        .await
        .expect("发送已修改保存失败");
    let second = next_save(&mut save_rx).await;
    assert_eq!(second.document_url, "hello.odt");
    assert_eq!(second.header(HEADER_IS_MODIFIED_BY_USER).as_deref(), Some("true"));
    assert_eq!(second.header(HEADER_IS_AUTOSAVE).as_deref(), Some("true"));
    assert_eq!(
        second.header(HEADER_EXTENDED_DATA).as_deref(),
        Some(EXTENDED_DATA_HEADER),
        "扩展数据头必须是解码后的明文且逐字一致"
    );

    // 5. 两腿各发生一次，且按发出顺序到达
    let saves = storage.saves();
    assert_eq!(saves.len(), 2, "场景应恰好产生两次保存");
    assert!(!saves[0].is_modified_by_user && saves[1].is_modified_by_user, "保存时序应为先未修改后已修改");

    session.shutdown_ws().await;
    poller.join_thread().await;
    server_handle.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_skip_save_when_unmodified_flag_set() {
    init_test_logger();
    let config = ServerConfig {
        max_connections: 0,
        ws_ping_period_seconds: 0,
        ws_ping_timeout_seconds: 0,
        ..ServerConfig::default()
    };
    let (server_uri, storage, mut save_rx, server_handle) =
        start_doc_server_with_observer(config).await;

    let poller = SocketPoller::new("skip-save");
    poller.start_thread();
    let session = WebSocketSession::create(&server_uri);
    assert!(session.async_request(&HttpRequest::new("/collab/doc/ws"), &poller).await);

    session.send_message("load url=hello.odt").await.expect("发送 load 失败");
    session
        .poll(
            |msg| {
                if progress_has_id(msg, "ready") {
                    PollVerdict::Accept
                } else {
                    PollVerdict::Continue
                }
            },
            Duration::from_secs(5),
            "等待加载完成",
        )
        .await
        .expect("未等到加载完成");

    // 未修改且设置跳过标志：不应有任何保存到达存储后端
    session
        .send_message("save dontTerminateEdit=1 dontSaveIfUnmodified=1")
        .await
        .expect("发送跳过保存失败");
    let outcome = tokio::time::timeout(Duration::from_millis(500), save_rx.recv()).await;
    assert!(outcome.is_err(), "设置跳过标志的未修改保存不应到达存储后端");
    assert_eq!(storage.save_count(), 0);

    // 修改之后同样的标志不再跳过
    session.send_message("key type=input char=97 key=0").await.expect("发送字符输入失败");
    session
        .send_message("save dontTerminateEdit=1 dontSaveIfUnmodified=1")
        .await
        .expect("发送保存失败");
    let saved = next_save(&mut save_rx).await;
    assert_eq!(saved.header(HEADER_IS_MODIFIED_BY_USER).as_deref(), Some("true"));

    session.shutdown_ws().await;
    poller.join_thread().await;
    server_handle.abort();
}
