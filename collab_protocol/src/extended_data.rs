// collab_protocol/src/extended_data.rs

//! `save` 命令可携带的扩展元数据。
//!
//! 扩展元数据是一组**有序**的键值对：分号分隔各对，等号赋值。
//! 线上传输时整体经过百分号转义（`=`、`;`、空格、`%` 均被转义），
//! 服务端解码恰好一次后以明文 `k=v;k=v` 的形式转发给存储后端请求头。

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// 线上传输时需要转义的字符集：控制字符之外，还包括会破坏
/// 记号边界的空格、以及键值对语法本身使用的 `=`、`;`、`%`。
const WIRE_ESCAPE: &AsciiSet = &CONTROLS.add(b' ').add(b'=').add(b';').add(b'%');

/// 有序键值对形式的扩展元数据。
///
/// 顺序必须保持与发送方一致：存储后端按原样比对整个头部值。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtendedData {
    pairs: Vec<(String, String)>,
}

impl ExtendedData {
    /// 从已解码的键值对序列构造。
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        Self { pairs }
    }

    /// 解析线格式（百分号转义后的 `k=v;k=v`）。
    ///
    /// 解码恰好一次，然后按 `;` 拆对、按第一个 `=` 拆键值。
    /// 空字符串解析为空集合；缺少 `=` 的片段视为格式非法。
    pub fn parse_encoded(raw: &str) -> Result<Self, ProtocolError> {
        let decoded = percent_decode_str(raw)
            .decode_utf8()
            .map_err(|e| ProtocolError::InvalidExtendedData(format!("非法的 UTF-8 转义序列: {}", e)))?;

        let mut pairs = Vec::new();
        for segment in decoded.split(';') {
            if segment.is_empty() {
                continue;
            }
            let (key, value) = segment.split_once('=').ok_or_else(|| {
                ProtocolError::InvalidExtendedData(format!("片段 '{}' 缺少 '=' 赋值", segment))
            })?;
            pairs.push((key.to_string(), value.to_string()));
        }
        Ok(Self { pairs })
    }

    /// 按到达顺序访问键值对。
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// 是否为空集合。
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// 生成发往存储后端请求头的明文形式：`k=v;k=v`（已解码，不再转义）。
    pub fn to_header_value(&self) -> String {
        self.pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// 生成线格式：整体百分号转义后的 `k=v;k=v`，与 `parse_encoded` 互逆。
    pub fn to_encoded(&self) -> String {
        utf8_percent_encode(&self.to_header_value(), WIRE_ESCAPE).to_string()
    }
}
