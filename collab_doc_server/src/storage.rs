//! 存储后端抽象。
//!
//! 连接层不关心文件真正写到哪里：保存触发状态机产出 [`SaveRequest`] 后，
//! 经由 [`StorageBackend`] 交给可插拔的后端。本模块同时提供一个内存记录型
//! 实现 [`RecordingStorage`]，二进制默认使用它，测试也用它来断言
//! 保存请求头契约与保存时序。

use std::sync::{Arc, Mutex};

use collab_protocol::storage::SaveRequest;
use log::{info, warn};
use tokio::sync::mpsc;

use crate::error::ServerError;

/// 文件持久化后端的统一抽象。
///
/// 实现必须是线程安全的：保存请求可能来自任意连接任务。
/// 写入失败通过 `Err` 上报，消息路由会据此向客户端回送
/// 固定的"服务不可用"错误文本。
pub trait StorageBackend: Send + Sync {
    /// 将一次保存请求持久化。
    fn put_file(&self, request: SaveRequest) -> Result<(), ServerError>;
}

/// 内存记录型存储后端。
///
/// 按到达顺序记录每一次保存请求，并通过无界通道把请求实时投递给
/// 观察者（测试用它等待"保存已发生"而不必轮询）。
pub struct RecordingStorage {
    saves: Mutex<Vec<SaveRequest>>,
    observer: Mutex<Option<mpsc::UnboundedSender<SaveRequest>>>,
}

impl RecordingStorage {
    /// 创建一个不带观察者的记录后端。
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            saves: Mutex::new(Vec::new()),
            observer: Mutex::new(None),
        })
    }

    /// 创建一个带观察者通道的记录后端，返回后端与接收端。
    pub fn with_observer() -> (Arc<Self>, mpsc::UnboundedReceiver<SaveRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let storage = Arc::new(Self {
            saves: Mutex::new(Vec::new()),
            observer: Mutex::new(Some(tx)),
        });
        (storage, rx)
    }

    /// 迄今记录的全部保存请求（按到达顺序）。
    pub fn saves(&self) -> Vec<SaveRequest> {
        self.saves.lock().expect("存储记录锁中毒").clone()
    }

    /// 迄今记录的保存次数。
    pub fn save_count(&self) -> usize {
        self.saves.lock().expect("存储记录锁中毒").len()
    }
}

impl StorageBackend for RecordingStorage {
    fn put_file(&self, request: SaveRequest) -> Result<(), ServerError> {
        info!(
            "[存储后端] 收到保存请求: url={}, 已修改={}, 自动保存={}",
            request.document_url, request.is_modified_by_user, request.is_autosave
        );
        self.saves.lock().expect("存储记录锁中毒").push(request.clone());
        if let Some(tx) = self.observer.lock().expect("存储观察者锁中毒").as_ref() {
            // 观察端已拆除不算写入失败
            let _ = tx.send(request);
        }
        Ok(())
    }
}

/// 恒定失败的存储后端，用于验证过载路径下的错误通知。
pub struct FailingStorage;

impl StorageBackend for FailingStorage {
    fn put_file(&self, request: SaveRequest) -> Result<(), ServerError> {
        warn!("[存储后端] 拒绝保存请求 (恒定失败后端): url={}", request.document_url);
        Err(ServerError::Storage("存储后端不可用".to_string()))
    }
}
