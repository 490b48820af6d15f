//! 保存触发状态机。
//!
//! 每个文档会话维护一个两态的修改状态：`Unmodified` / `Modified`。
//! 字符输入使状态进入 `Modified`；`save` 命令在发出的那一刻对状态做快照，
//! 快照决定发往存储后端的请求头；保存完成后状态回到 `Unmodified`。
//! 非法的时序（保存尚未开始就宣告完成、保存进行中再次开始）是协议契约
//! 违规，必须显式报错而不是悄悄吞掉。

use collab_protocol::extended_data::ExtendedData;
use collab_protocol::storage::SaveRequest;

use crate::error::ServerError;

/// 文档的修改状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveState {
    /// 自上次保存（或加载）以来没有用户修改。
    Unmodified,
    /// 存在尚未持久化的用户修改。
    Modified,
}

/// 单个已加载文档的会话状态。
///
/// 状态迁移只经由本类型的方法发生，调用方拿不到可变的内部状态，
/// 因此所有非法迁移都会在这里被拦截为 [`ServerError::ProtocolViolation`]。
#[derive(Debug)]
pub struct DocumentSession {
    /// `load` 命令给出的文档 URL。
    document_url: String,
    /// 当前修改状态。
    state: SaveState,
    /// 进行中保存的状态快照；`None` 表示没有保存在途。
    pending_save: Option<SaveState>,
}

impl DocumentSession {
    /// 加载完成后的初始会话：未修改、无保存在途。
    pub fn new(document_url: impl Into<String>) -> Self {
        Self {
            document_url: document_url.into(),
            state: SaveState::Unmodified,
            pending_save: None,
        }
    }

    /// 文档 URL。
    pub fn document_url(&self) -> &str {
        &self.document_url
    }

    /// 当前修改状态。
    pub fn state(&self) -> SaveState {
        self.state
    }

    /// 当前是否处于已修改状态。
    pub fn is_modified(&self) -> bool {
        self.state == SaveState::Modified
    }

    /// 记录一次用户修改。
    ///
    /// # Returns
    /// * `bool` - 状态是否因本次修改而发生变化。仅在 Unmodified -> Modified
    ///   的迁移上为 true；对已修改文档重复输入是无操作。
    pub fn mark_modified(&mut self) -> bool {
        match self.state {
            SaveState::Unmodified => {
                self.state = SaveState::Modified;
                true
            }
            SaveState::Modified => false,
        }
    }

    /// 开始一次保存：对当前状态做快照。
    ///
    /// # Arguments
    /// * `dont_save_if_unmodified` - 为 true 且文档未修改时跳过本次保存。
    ///
    /// # Returns
    /// * `Ok(Some(snapshot))` - 保存应当执行，快照为保存命令发出时的状态；
    /// * `Ok(None)` - 按标志跳过，状态不变；
    /// * `Err(ProtocolViolation)` - 已有保存在途时重复开始。
    pub fn begin_save(
        &mut self,
        dont_save_if_unmodified: bool,
    ) -> Result<Option<SaveState>, ServerError> {
        if self.pending_save.is_some() {
            return Err(ServerError::ProtocolViolation(format!(
                "文档 '{}' 已有保存在途，不能重复开始保存",
                self.document_url
            )));
        }
        if dont_save_if_unmodified && self.state == SaveState::Unmodified {
            return Ok(None);
        }
        self.pending_save = Some(self.state);
        Ok(Some(self.state))
    }

    /// 宣告在途保存成功完成：状态回到 Unmodified。
    ///
    /// 没有保存在途时调用是非法迁移。
    pub fn complete_save(&mut self) -> Result<(), ServerError> {
        match self.pending_save.take() {
            Some(_snapshot) => {
                self.state = SaveState::Unmodified;
                Ok(())
            }
            None => Err(ServerError::ProtocolViolation(format!(
                "文档 '{}' 没有进行中的保存，不能宣告保存完成",
                self.document_url
            ))),
        }
    }

    /// 在途保存失败时的回退：丢弃快照，修改状态保持原样。
    pub fn abort_save(&mut self) {
        self.pending_save = None;
    }

    /// 由状态快照与策略生成发往存储后端的保存请求。
    ///
    /// # Arguments
    /// * `snapshot` - `begin_save` 返回的状态快照。
    /// * `treat_modified_save_as_autosave` - 策略开关：已修改状态下的保存
    ///   是否按自动保存上报。
    /// * `extended_data` - `save` 命令携带的扩展元数据（已解码）。
    pub fn build_save_request(
        &self,
        snapshot: SaveState,
        treat_modified_save_as_autosave: bool,
        extended_data: Option<ExtendedData>,
    ) -> SaveRequest {
        let is_modified_by_user = snapshot == SaveState::Modified;
        SaveRequest {
            document_url: self.document_url.clone(),
            is_modified_by_user,
            is_autosave: is_modified_by_user && treat_modified_save_as_autosave,
            extended_data,
        }
    }
}
