//! `ws_session_utils` 连接层工具库。
//!
//! 本 crate 是协作文档服务的连接/会话传输层，供服务端 (`collab_doc_server`)
//! 与客户端/集成测试共同使用。核心内容：
//!
//! - `admission`: 进程级连接准入计数器。以原子 CAS 实现"预增量严格小于上限才放行"，
//!   准入成功返回作用域化的许可对象，任何退出路径（正常关闭、错误、强制拆除）
//!   都会在许可析构时恰好归还一次计数。
//! - `poller`: 套接字轮询器。一个轮询器可同时服务多条会话；模式在构建后二选一：
//!   由调用线程自行驱动（client-thread 模式），或在后台任务集上运行（dedicated 模式）。
//!   支持幂等的"强制关闭全部套接字"和"停止并汇合"。
//! - `client::http_session`: 纯请求/应答的 HTTP 会话。同步请求在调用方上下文中
//!   驱动完成；被准入控制拒绝或底层传输失败时，应答**没有状态码**且会话报告未连接——
//!   这是"触到上限"的成功路径，不是错误。
//! - `client::ws_session`: WebSocket 会话。异步发起 Upgrade 握手、发送文本帧、
//!   以及核心同步原语 `poll`（带超时地等待某条消息满足谓词）。提供优雅关闭
//!   (`shutdown_ws`) 与突然关闭 (`async_shutdown`) 两种拆除方式，均幂等。
//! - `server::transport`: 准入门控的服务端接受循环。准入检查发生在协议握手**之前**，
//!   被拒绝的连接直接丢弃 TCP 流，对端观察到"从未建立连接"。

pub mod admission;
pub mod client;
pub mod error;
pub mod poller;
pub mod server;

pub use admission::{AdmissionCounter, AdmissionPermit};
pub use error::SessionError;
pub use poller::SocketPoller;
