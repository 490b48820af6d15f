// collab_doc_server/src/ws_server/keepalive_monitor.rs

//! 保活监视器模块。
//!
//! 该模块定期巡查所有已连接 WebSocket 客户端的活跃状态，承担保活的两层
//! 中的传输层：
//! 1. 对空闲超过 Ping 周期的连接发送传输层 Ping 控制帧。健康对端的
//!    WebSocket 协议栈会自动应答 Pong，应答在接收循环中刷新 `last_seen`，
//!    因此只读不写的客户端也能长期保持连接。
//! 2. 对空闲超过失联阈值的连接（Ping 也无人应答）启动移除流程，
//!    及时释放准入名额，防止僵尸连接耗尽上限。
//!
//! 应用层的 `"ping"`/`"pong"` 文本保活不经过本模块，由消息路由处理。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::ws_server::connection_manager::ConnectionManager;

/// `KeepaliveMonitor` 结构体定义。
///
/// 封装保活巡查所需的状态与依赖：连接管理器的共享引用、
/// 空闲多久后发 Ping、空闲多久后判定失联、以及巡查周期。
/// Ping 周期或失联阈值为零时对应的那一层被禁用。
pub struct KeepaliveMonitor {
    /// 对 `ConnectionManager` 的共享引用，用于获取客户端列表和移除失联客户端。
    connection_manager: Arc<ConnectionManager>,
    /// 连接空闲超过此时长后向其发送传输层 Ping（零值禁用）。
    ping_period: Duration,
    /// 连接空闲超过此时长后被判定失联并移除（零值禁用）。
    idle_timeout: Duration,
    /// 巡查主循环的执行间隔。应明显小于失联阈值，以确保及时发现超时。
    check_interval: Duration,
}

impl KeepaliveMonitor {
    /// 创建一个新的 `KeepaliveMonitor` 实例。
    pub fn new(
        connection_manager: Arc<ConnectionManager>,
        ping_period: Duration,
        idle_timeout: Duration,
        check_interval: Duration,
    ) -> Self {
        info!(
            "[保活监视器] 正在创建 KeepaliveMonitor 实例。Ping 周期: {:?}，失联阈值: {:?}，巡查间隔: {:?}",
            ping_period, idle_timeout, check_interval
        );
        Self {
            connection_manager,
            ping_period,
            idle_timeout,
            check_interval,
        }
    }

    /// 启动保活监视器的主运行循环。
    ///
    /// 设计为经 `tokio::spawn` 在后台持续运行：每个巡查周期醒来一次，
    /// 对全部活动客户端执行一轮检查，直到所在任务被取消或程序终止。
    pub async fn run(self) {
        info!(
            "[保活监视器] 后台巡查循环已启动，周期 {:?}。",
            self.check_interval
        );
        loop {
            sleep(self.check_interval).await;
            self.sweep_clients().await;
        }
    }

    /// 对所有活动客户端执行一轮保活检查。
    async fn sweep_clients(&self) {
        let clients_snapshot = self.connection_manager.get_all_client_sessions();
        if clients_snapshot.is_empty() {
            return;
        }

        let now = Utc::now();
        for client_session in &clients_snapshot {
            let last_seen = *client_session.last_seen.read().await;
            let idle = now
                .signed_duration_since(last_seen)
                .to_std()
                .unwrap_or(Duration::ZERO);

            // 第二层优先：失联阈值命中时直接移除，不再发 Ping
            if !self.idle_timeout.is_zero() && idle > self.idle_timeout {
                warn!(
                    "[保活监视器] 客户端 {} (ID: {}) 空闲 {:?} 已超过失联阈值 {:?}，启动移除流程。",
                    client_session.addr, client_session.client_id, idle, self.idle_timeout
                );
                self.connection_manager.remove_client(&client_session.client_id);
                continue;
            }

            if !self.ping_period.is_zero() && idle > self.ping_period {
                debug!(
                    "[保活监视器] 客户端 {} (ID: {}) 空闲 {:?}，发送传输层 Ping。",
                    client_session.addr, client_session.client_id, idle
                );
                // 发送失败说明发送循环已经退出，留待下一轮按失联处理
                if client_session.sender.send(Message::Ping(Vec::new())).await.is_err() {
                    debug!(
                        "[保活监视器] 客户端 {} (ID: {}) 的发送通道已关闭，跳过。",
                        client_session.addr, client_session.client_id
                    );
                }
            }
        }
    }
}
