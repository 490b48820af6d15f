// ws_session_utils/src/poller.rs

//! 套接字轮询器：会话 I/O 的驱动与确定性拆除单元。
//!
//! 一个 `SocketPoller` 可以同时服务多条会话，但驱动模式在使用前二选一且不可混用：
//!
//! - **client-thread 模式** (`run_on_client_thread`)：轮询器不派生任何后台任务，
//!   会话的 I/O future 由调用方在 `sync_request` / `poll` 内部自行驱动。
//!   调用方若不泵动，会话永远观察不到入站数据——同步请求会就地死锁，
//!   这是该模式的契约而非缺陷。
//! - **dedicated 模式** (`start_thread`)：会话的读循环通过 [`SocketPoller::spawn`]
//!   派生到后台任务集上持续运行，`join_thread` 负责停止并汇合它们。
//!
//! 两种模式共享同一套套接字注册表：每条会话注册一个 [`SocketHandle`]
//! （关闭标志 + 唤醒通知），`close_all_sockets` 据此强制、同步地关闭
//! 轮询器名下的所有套接字，这是测试与停机路径做确定性拆除的机制。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// 轮询器的驱动模式。单个实例一经设定不再改变。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerMode {
    /// 由调用线程驱动：同步原语内部泵动套接字。
    ClientThread,
    /// 由后台任务集驱动：读循环经 `spawn` 挂到轮询器名下。
    Dedicated,
}

/// 注册在轮询器名下的单个套接字的句柄。
///
/// 句柄只承载"请求关闭"信号：真正持有流的会话在 I/O 循环中
/// `select!` 等待 [`SocketHandle::wait_close`]，收到信号后自行收尾。
/// 句柄可克隆，克隆体共享同一份关闭标志。
#[derive(Debug, Clone)]
pub struct SocketHandle {
    /// 套接字在注册表中的唯一标识。
    pub id: Uuid,
    /// 注册（即连接建立）时刻。
    pub accepted_at: DateTime<Utc>,
    closed: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl SocketHandle {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            accepted_at: Utc::now(),
            closed: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
        }
    }

    /// 请求关闭此套接字。幂等：重复调用只设置一次标志。
    pub fn request_close(&self) {
        // 先置标志再唤醒，wait_close 的循环检查消除两者间的竞态
        self.closed.store(true, Ordering::Release);
        self.wake.notify_waiters();
    }

    /// 是否已被请求关闭。
    pub fn is_close_requested(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// 挂起直到此套接字被请求关闭。
    pub async fn wait_close(&self) {
        while !self.is_close_requested() {
            self.wake.notified().await;
        }
    }
}

/// 套接字轮询器。
///
/// 持有零或多条连接的 I/O 就绪生命周期，不持有它们的应用层会话状态。
/// 通过 `Arc` 在会话间共享；一个轮询器在任意时刻只被一个驱动上下文推进。
#[derive(Debug)]
pub struct SocketPoller {
    /// 标识性标签，出现在日志与超时报告中。
    label: String,
    /// 驱动模式，首次设定后不可更改。
    mode: OnceLock<PollerMode>,
    /// 当前注册在名下的套接字句柄。
    sockets: Mutex<Vec<SocketHandle>>,
    /// dedicated 模式下派生的后台任务。
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// 已进入停止流程的标志，使 join/close 幂等。
    stopping: AtomicBool,
}

impl SocketPoller {
    /// 以标识标签构造一个尚未设定模式的轮询器。
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        let label = label.into();
        debug!("[轮询器 {}] 已创建", label);
        Arc::new(Self {
            label,
            mode: OnceLock::new(),
            sockets: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            stopping: AtomicBool::new(false),
        })
    }

    /// 轮询器的标识标签。
    pub fn label(&self) -> &str {
        &self.label
    }

    /// 标记本轮询器由调用线程同步驱动（不派生后台任务）。
    pub fn run_on_client_thread(&self) {
        if self.mode.set(PollerMode::ClientThread).is_err()
            && self.mode.get() != Some(&PollerMode::ClientThread)
        {
            warn!(
                "[轮询器 {}] 已处于 {:?} 模式，忽略 run_on_client_thread 请求（模式不可混用）",
                self.label,
                self.mode.get()
            );
        }
    }

    /// 标记本轮询器使用后台任务集驱动会话读循环。
    pub fn start_thread(&self) {
        if self.mode.set(PollerMode::Dedicated).is_err()
            && self.mode.get() != Some(&PollerMode::Dedicated)
        {
            warn!(
                "[轮询器 {}] 已处于 {:?} 模式，忽略 start_thread 请求（模式不可混用）",
                self.label,
                self.mode.get()
            );
        }
    }

    /// 当前驱动模式。未显式设定时按 dedicated 处理。
    pub fn mode(&self) -> PollerMode {
        *self.mode.get().unwrap_or(&PollerMode::Dedicated)
    }

    /// 是否处于 client-thread 模式。
    pub fn is_client_thread(&self) -> bool {
        self.mode() == PollerMode::ClientThread
    }

    /// 注册一个新的套接字，返回其句柄。
    ///
    /// 轮询器已进入停止流程时返回的句柄立即处于已关闭状态，
    /// 会话据此放弃建立连接。
    pub fn register_socket(&self) -> SocketHandle {
        let handle = SocketHandle::new();
        if self.stopping.load(Ordering::Acquire) {
            handle.request_close();
            return handle;
        }
        let mut sockets = self.sockets.lock().expect("轮询器套接字注册表锁中毒");
        // 顺带清理已关闭连接留下的句柄，注册表不随连接总数单调增长
        sockets.retain(|h| !h.is_close_requested());
        sockets.push(handle.clone());
        debug!("[轮询器 {}] 注册套接字 {}", self.label, handle.id);
        handle
    }

    /// 当前注册表中的套接字句柄数量。
    pub fn socket_count(&self) -> usize {
        self.sockets.lock().expect("轮询器套接字注册表锁中毒").len()
    }

    /// 将一个会话读循环派生到本轮询器的后台任务集。
    ///
    /// 仅在 dedicated 模式下有意义；client-thread 模式的调用方
    /// 应当在自身上下文中驱动会话，而不是调用本方法。
    pub fn spawn<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        if self.is_client_thread() {
            warn!(
                "[轮询器 {}] client-thread 模式下不应派生后台任务，已忽略",
                self.label
            );
            return;
        }
        let handle = tokio::spawn(future);
        self.tasks.lock().expect("轮询器任务表锁中毒").push(handle);
    }

    /// 强制、同步地关闭名下全部套接字。
    ///
    /// 不等待在途 I/O；持有流的会话在下一次等待点观察到关闭信号后收尾。
    /// 幂等：对已关闭的套接字重复发信号无副作用。
    pub fn close_all_sockets(&self) {
        let sockets = self.sockets.lock().expect("轮询器套接字注册表锁中毒");
        info!(
            "[轮询器 {}] 强制关闭全部套接字，共 {} 个",
            self.label,
            sockets.len()
        );
        for handle in sockets.iter() {
            handle.request_close();
        }
    }

    /// 停止后台任务集并等待其结束。
    ///
    /// 先关闭全部套接字使读循环自然退出，再汇合任务；
    /// 等待超过宽限期的任务被中止。幂等；client-thread 模式下除
    /// 关闭套接字外无事可做。
    pub async fn join_thread(&self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            debug!("[轮询器 {}] join_thread 重复调用，忽略", self.label);
            return;
        }
        self.close_all_sockets();

        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = self.tasks.lock().expect("轮询器任务表锁中毒");
            guard.drain(..).collect()
        };
        info!("[轮询器 {}] 正在汇合 {} 个后台任务", self.label, tasks.len());
        for task in tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
                warn!("[轮询器 {}] 后台任务未在宽限期内退出，强制中止", self.label);
                abort.abort();
            }
        }
        info!("[轮询器 {}] 已停止", self.label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_is_fixed_after_first_choice() {
        let poller = SocketPoller::new("mode-test");
        poller.run_on_client_thread();
        assert!(poller.is_client_thread());
        // 与首次设定冲突的请求被忽略，模式保持不变
        poller.start_thread();
        assert!(poller.is_client_thread(), "模式一经设定不可混用");
    }

    #[test]
    fn test_close_all_sockets_is_idempotent() {
        let poller = SocketPoller::new("close-test");
        poller.run_on_client_thread();
        let a = poller.register_socket();
        let b = poller.register_socket();
        assert!(!a.is_close_requested() && !b.is_close_requested());

        poller.close_all_sockets();
        assert!(a.is_close_requested() && b.is_close_requested());

        // 重复关闭是无操作，不是错误
        poller.close_all_sockets();
        assert!(a.is_close_requested() && b.is_close_requested());
    }

    #[test]
    fn test_register_socket_prunes_closed_handles() {
        let poller = SocketPoller::new("prune-test");
        poller.run_on_client_thread();
        let a = poller.register_socket();
        let _b = poller.register_socket();
        assert_eq!(poller.socket_count(), 2);

        a.request_close();
        // 下一次注册顺带清理已关闭的句柄
        let _c = poller.register_socket();
        assert_eq!(poller.socket_count(), 2, "注册表不应随已关闭的连接单调增长");
    }

    #[tokio::test]
    async fn test_wait_close_wakes_on_request() {
        let poller = SocketPoller::new("wake-test");
        poller.start_thread();
        let handle = poller.register_socket();

        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move {
                handle.wait_close().await;
            })
        };
        // 尚未关闭时等待者应保持挂起
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished(), "关闭信号发出前等待者不应返回");

        handle.request_close();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("关闭信号应唤醒等待者")
            .expect("等待任务不应 panic");
    }

    #[tokio::test]
    async fn test_join_thread_is_idempotent_and_registers_reject_after_stop() {
        let poller = SocketPoller::new("join-test");
        poller.start_thread();
        let handle = poller.register_socket();
        {
            let handle = handle.clone();
            poller.spawn(async move {
                handle.wait_close().await;
            });
        }

        poller.join_thread().await;
        assert!(handle.is_close_requested(), "join 应关闭名下套接字");
        // 第二次 join 是无操作
        poller.join_thread().await;

        let late = poller.register_socket();
        assert!(late.is_close_requested(), "停止后的注册应立即处于关闭状态");
    }
}
