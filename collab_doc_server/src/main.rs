use std::sync::Arc;
use std::time::Duration;

use log::{error, info, LevelFilter};

use collab_doc_server::storage::RecordingStorage;
use collab_doc_server::ws_server::connection_manager::ConnectionManager;
use collab_doc_server::ws_server::keepalive_monitor::KeepaliveMonitor;
use collab_doc_server::ws_server::service::DocService;

#[tokio::main]
async fn main() {
    // 初始化日志记录器
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .format_timestamp_millis()
        .init();
    info!("[主程序] 日志系统已成功初始化 (env_logger)，默认级别: Info。");

    // 初始化应用配置
    collab_doc_server::config::init_config();
    let server_config = collab_doc_server::config::get_config().server.clone();
    info!(
        "[主程序] 应用配置已加载。监听地址: {}:{}，准入上限: {}。",
        server_config.host, server_config.port, server_config.max_connections
    );

    // 创建连接管理器
    let connection_manager = Arc::new(ConnectionManager::new());
    info!("[主程序] 连接管理器 (ConnectionManager) 已创建。");

    // 创建存储后端（内存记录型；真实部署时替换为持久化实现）
    let storage = RecordingStorage::new();
    info!("[主程序] 存储后端 (RecordingStorage) 已创建。");

    // 创建并启动保活监视器
    let keepalive_monitor = KeepaliveMonitor::new(
        Arc::clone(&connection_manager),
        Duration::from_secs(server_config.ws_ping_period_seconds),
        Duration::from_secs(server_config.ws_ping_timeout_seconds),
        Duration::from_secs(server_config.keepalive_check_interval_seconds.max(1)),
    );
    tokio::spawn(async move {
        info!("[主程序] 正在启动独立的保活监视器 (KeepaliveMonitor) 异步任务...");
        keepalive_monitor.run().await;
        info!("[主程序] 警告：保活监视器 (KeepaliveMonitor) 任务已意外结束。这可能表明存在问题。");
    });
    info!("[主程序] 保活监视器启动任务已成功派生到后台异步执行。");

    // 启动文档服务
    let service = DocService::new(server_config, connection_manager, storage);
    info!("[主程序] 正在启动文档服务...");
    if let Err(e) = service.start().await {
        error!("[主程序] 致命错误：启动文档服务时发生严重问题: {}", e);
    }
}
