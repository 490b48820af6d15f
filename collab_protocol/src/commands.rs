// collab_protocol/src/commands.rs

//! 定义客户端发往服务端的行协议命令。
//!
//! 每条命令占用一个 WebSocket 文本帧，形如 `动词 key1=value1 key2=value2 ...`。
//! 本模块提供命令的解析 (`ClientCommand::parse`) 与线格式回写 (`Display`)，
//! 服务端的消息路由和客户端/测试共用同一份语法，避免两侧各写一套解析。

use std::fmt;

use crate::extended_data::ExtendedData;
use crate::{find_token_value, ProtocolError};

/// `key` 命令的事件类型：按下输入或抬起。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEventType {
    /// 字符输入事件 (`type=input`)，会使文档进入已修改状态。
    Input,
    /// 按键抬起事件 (`type=up`)，不独立改变修改状态。
    Up,
}

impl KeyEventType {
    fn as_wire(self) -> &'static str {
        match self {
            KeyEventType::Input => "input",
            KeyEventType::Up => "up",
        }
    }
}

/// 客户端发往服务端的一条文本协议命令。
///
/// 变体与线格式一一对应：
/// - `load url=<url>` — 请求在本会话上加载一篇文档；
/// - `key type=<input|up> char=<code> key=<code>` — 向已加载文档投递一次按键事件；
/// - `save dontTerminateEdit=<0|1> dontSaveIfUnmodified=<0|1> [extendedData=<百分号转义的 k=v;k=v>]`
///   — 请求持久化当前文档；
/// - `ping` — 应用层保活探测，期待服务端回复 `pong`。
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    /// 加载指定 URL 的文档。
    Load { url: String },
    /// 按键事件。`char_code`/`key_code` 原样透传给文档引擎。
    Key {
        event: KeyEventType,
        char_code: u32,
        key_code: u32,
    },
    /// 保存请求。两个布尔标志的线格式为 `0`/`1`。
    Save {
        dont_terminate_edit: bool,
        dont_save_if_unmodified: bool,
        extended_data: Option<ExtendedData>,
    },
    /// 应用层文本保活探测。
    Ping,
}

impl ClientCommand {
    /// 解析一行客户端命令。
    ///
    /// # Arguments
    /// * `line` - 不含换行的一条文本帧内容。
    ///
    /// # Returns
    /// * `Result<ClientCommand, ProtocolError>` - 成功时返回解析出的命令；
    ///   命令动词未知、缺少必填字段或字段取值非法时返回相应的 `ProtocolError`。
    pub fn parse(line: &str) -> Result<ClientCommand, ProtocolError> {
        let mut tokens = line.split_whitespace();
        let verb = tokens.next().unwrap_or("");
        let args: Vec<&str> = tokens.collect();

        match verb {
            "load" => {
                let url = find_token_value(&args, "url").ok_or(ProtocolError::MissingField {
                    command: "load",
                    field: "url",
                })?;
                Ok(ClientCommand::Load { url: url.to_string() })
            }
            "key" => {
                let event = match find_token_value(&args, "type") {
                    Some("input") => KeyEventType::Input,
                    Some("up") => KeyEventType::Up,
                    Some(other) => {
                        return Err(ProtocolError::InvalidValue {
                            command: "key",
                            field: "type",
                            value: other.to_string(),
                        })
                    }
                    None => {
                        return Err(ProtocolError::MissingField { command: "key", field: "type" })
                    }
                };
                let char_code = parse_u32(&args, "key", "char")?;
                let key_code = parse_u32(&args, "key", "key")?;
                Ok(ClientCommand::Key { event, char_code, key_code })
            }
            "save" => {
                let dont_terminate_edit = parse_flag(&args, "save", "dontTerminateEdit")?;
                let dont_save_if_unmodified = parse_flag(&args, "save", "dontSaveIfUnmodified")?;
                // extendedData 是可选字段，存在时按百分号转义的 k=v;k=v 解码
                let extended_data = match find_token_value(&args, "extendedData") {
                    Some(raw) => Some(ExtendedData::parse_encoded(raw)?),
                    None => None,
                };
                Ok(ClientCommand::Save {
                    dont_terminate_edit,
                    dont_save_if_unmodified,
                    extended_data,
                })
            }
            "ping" => Ok(ClientCommand::Ping),
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }
}

/// 解析必填的 u32 字段。
fn parse_u32(args: &[&str], command: &'static str, field: &'static str) -> Result<u32, ProtocolError> {
    let raw = find_token_value(args, field)
        .ok_or(ProtocolError::MissingField { command, field })?;
    raw.parse::<u32>().map_err(|_| ProtocolError::InvalidValue {
        command,
        field,
        value: raw.to_string(),
    })
}

/// 解析必填的 `0`/`1` 布尔标志。
fn parse_flag(args: &[&str], command: &'static str, field: &'static str) -> Result<bool, ProtocolError> {
    match find_token_value(args, field) {
        Some("0") => Ok(false),
        Some("1") => Ok(true),
        Some(other) => Err(ProtocolError::InvalidValue {
            command,
            field,
            value: other.to_string(),
        }),
        None => Err(ProtocolError::MissingField { command, field }),
    }
}

impl fmt::Display for ClientCommand {
    /// 将命令回写为线格式，与 `parse` 互逆。
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientCommand::Load { url } => write!(f, "load url={}", url),
            ClientCommand::Key { event, char_code, key_code } => {
                write!(f, "key type={} char={} key={}", event.as_wire(), char_code, key_code)
            }
            ClientCommand::Save { dont_terminate_edit, dont_save_if_unmodified, extended_data } => {
                write!(
                    f,
                    "save dontTerminateEdit={} dontSaveIfUnmodified={}",
                    u8::from(*dont_terminate_edit),
                    u8::from(*dont_save_if_unmodified)
                )?;
                if let Some(data) = extended_data {
                    write!(f, " extendedData={}", data.to_encoded())?;
                }
                Ok(())
            }
            ClientCommand::Ping => write!(f, "ping"),
        }
    }
}
