// collab_doc_server/src/ws_server/message_router.rs

//! 负责处理从客户端接收到的文本协议命令，并根据命令类型进行分发处理。

use std::sync::Arc;

use log::{debug, warn};

use collab_protocol::commands::{ClientCommand, KeyEventType};
use collab_protocol::notifications::ServerNotification;

use crate::error::ServerError;
use crate::storage::StorageBackend;
use crate::ws_server::client_session::ClientSession;
use crate::ws_server::save_state::DocumentSession;

/// 文档加载过程中依次下发的进度阶段。
const LOAD_PROGRESS_STAGES: [&str; 3] = ["find", "connect", "ready"];

/// 异步处理从客户端接收到的单条文本命令。
///
/// 此函数由服务端的接收循环在收到文本帧后调用。
///
/// # 参数
/// * `client_session`: 发送此命令的客户端会话的共享引用。
/// * `line`: 该文本帧的内容（一条行协议命令）。
/// * `storage`: 保存请求的目的后端。
/// * `treat_modified_save_as_autosave`: 已修改保存是否按自动保存上报的策略开关。
///
/// # 返回
/// * `Result<(), ServerError>`: 命令非法或时序违规时返回 `Err`。
///   此类错误对当前场景致命，但不应导致连接或服务终止；调用方记录后继续。
///   向客户端发送应答失败不视为错误，因为那通常意味着连接已在拆除中。
pub async fn handle_command(
    client_session: Arc<ClientSession>,
    line: &str,
    storage: Arc<dyn StorageBackend>,
    treat_modified_save_as_autosave: bool,
) -> Result<(), ServerError> {
    // 1. 任何入站命令都是活跃证据，先刷新 last_seen
    client_session.touch().await;

    debug!("客户端 {}: 收到命令: '{}'", client_session.client_id, line);

    // 2. 解析并按命令类型分发
    let command = ClientCommand::parse(line)?;
    match command {
        ClientCommand::Load { url } => {
            let mut document = client_session.document.write().await;
            if document.is_some() {
                return Err(ServerError::ProtocolViolation(format!(
                    "会话 {} 已加载文档，不能重复 load",
                    client_session.client_id
                )));
            }
            debug!("客户端 {}: 开始加载文档 '{}'", client_session.client_id, url);
            *document = Some(DocumentSession::new(url));

            // 加载进度按固定阶段顺序下发
            for stage in LOAD_PROGRESS_STAGES {
                let line = ServerNotification::Progress { id: stage.to_string() }.to_string();
                if !client_session.send_line(line).await {
                    debug!(
                        "客户端 {}: 进度通知发送失败，连接正在拆除。",
                        client_session.client_id
                    );
                    break;
                }
            }
        }
        ClientCommand::Key { event, char_code, key_code } => {
            let mut document = client_session.document.write().await;
            let doc = document.as_mut().ok_or_else(|| {
                ServerError::ProtocolViolation(format!(
                    "会话 {} 尚未加载文档，不能投递按键事件",
                    client_session.client_id
                ))
            })?;

            debug!(
                "客户端 {}: 按键事件 type={:?} char={} key={}",
                client_session.client_id, event, char_code, key_code
            );
            // 仅字符输入改变修改状态；抬起事件只作为活跃证据
            if event == KeyEventType::Input && doc.mark_modified() {
                let line = ServerNotification::StateChanged { modified: true }.to_string();
                client_session.send_line(line).await;
            }
        }
        ClientCommand::Save { dont_terminate_edit, dont_save_if_unmodified, extended_data } => {
            let mut document = client_session.document.write().await;
            let doc = document.as_mut().ok_or_else(|| {
                ServerError::ProtocolViolation(format!(
                    "会话 {} 尚未加载文档，不能保存",
                    client_session.client_id
                ))
            })?;

            debug!(
                "客户端 {}: 保存命令 dontTerminateEdit={} dontSaveIfUnmodified={}",
                client_session.client_id, dont_terminate_edit, dont_save_if_unmodified
            );

            let snapshot = match doc.begin_save(dont_save_if_unmodified)? {
                Some(snapshot) => snapshot,
                None => {
                    debug!(
                        "客户端 {}: 文档未修改且设置了跳过标志，本次保存不执行。",
                        client_session.client_id
                    );
                    return Ok(());
                }
            };

            let request =
                doc.build_save_request(snapshot, treat_modified_save_as_autosave, extended_data);
            match storage.put_file(request) {
                Ok(()) => {
                    doc.complete_save()?;
                    debug!("客户端 {}: 保存已完成并持久化。", client_session.client_id);
                }
                Err(e) => {
                    // 存储不可用：回退状态机并用固定错误文本告知客户端
                    warn!(
                        "客户端 {}: 存储后端写入失败: {}。向客户端回送服务不可用。",
                        client_session.client_id, e
                    );
                    doc.abort_save();
                    let line = ServerNotification::service_unavailable().to_string();
                    client_session.send_line(line).await;
                }
            }
        }
        ClientCommand::Ping => {
            debug!("客户端 {}: 收到应用层 ping。", client_session.client_id);
            client_session.send_line(ServerNotification::Pong.to_string()).await;
        }
    }

    Ok(())
}
