// collab_protocol/src/storage.rs

//! 存储后端（WOPI 风格）保存请求的请求头契约。
//!
//! 保存动作离开连接层、到达存储后端时，必须携带三个请求头：
//! 文档是否被用户修改过、本次保存是否为自动保存、以及可选的扩展元数据。
//! 存储后端按字符串逐字比对这些头部，任何不一致都是协议契约违规。

use serde::{Deserialize, Serialize};

use crate::extended_data::ExtendedData;

/// 保存请求头：文档在保存请求发出时是否处于"已被用户修改"状态。
pub const HEADER_IS_MODIFIED_BY_USER: &str = "X-COLLAB-WOPI-IsModifiedByUser";

/// 保存请求头：本次保存是否为自动保存（相对于用户显式保存）。
pub const HEADER_IS_AUTOSAVE: &str = "X-COLLAB-WOPI-IsAutosave";

/// 保存请求头：可选的扩展元数据，值为已解码的 `k=v;k=v` 明文。
pub const HEADER_EXTENDED_DATA: &str = "X-COLLAB-WOPI-ExtendedData";

/// 连接层发往存储后端的一次文件写入请求。
///
/// 字段在保存命令到达状态机的那一刻快照生成，之后不再改变；
/// 存储后端据此验证保存时序与修改状态的因果一致性。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SaveRequest {
    /// 被保存文档的 URL（`load` 命令给出的那个）。
    pub document_url: String,
    /// 保存请求发出时文档是否处于已修改状态。
    pub is_modified_by_user: bool,
    /// 本次保存是否按自动保存处理。
    pub is_autosave: bool,
    /// 保存命令携带的扩展元数据（已解码），无则省略对应头部。
    pub extended_data: Option<ExtendedData>,
}

impl SaveRequest {
    /// 生成本请求携带的全部头部，布尔值渲染为 `"true"` / `"false"`。
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            (HEADER_IS_MODIFIED_BY_USER, self.is_modified_by_user.to_string()),
            (HEADER_IS_AUTOSAVE, self.is_autosave.to_string()),
        ];
        if let Some(data) = &self.extended_data {
            headers.push((HEADER_EXTENDED_DATA, data.to_header_value()));
        }
        headers
    }

    /// 按名称查找头部值，存储后端的断言入口。
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers()
            .into_iter()
            .find_map(|(k, v)| (k == name).then_some(v))
    }
}
