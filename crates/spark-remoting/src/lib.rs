#![deny(unsafe_code)]

//! # spark-remoting
//!
//! ## 定位与职责（Why）
//! - 点对点 RPC 运行时的连接层：一条 [`Connection`] 代表两个端点之间已建立的逻辑连接，
//!   在其上异步协商类型化远端客户端，并把本地监听器发布给对端调用；
//! - 把传输层“打开服务”这一未类型化操作转换为类型安全、可取消的异步句柄，
//!   同时组合连接、客户端上下文与本地处理器的生命周期，保证任何失败或取消都不留下孤儿资源。
//!
//! ## 架构嵌入（Where）
//! - `pending` / `translate`：单次赋值、可取消的挂起句柄及其翻译组合子；
//! - `connection` / `context` / `connector`：对外暴露的连接面与发布面；
//! - `spi`：传输能力与 Endpoint 的边界契约，二者均由调用方注入；
//! - `options` / `executor` / `error`：选项映射、回调执行器与统一错误域。
//!
//! ## Feature 策略（Trade-offs）
//! - 默认不依赖任何异步运行时；`runtime-tokio` 特性提供基于 Tokio 句柄的执行器实现。

/// 连接作用域的强类型附件存储。
pub mod attachments;

/// 类型化客户端与 Endpoint 产出的客户端核心。
pub mod client;

/// 连接器：本地处理器发布的返回值。
pub mod connector;

/// 连接本体：客户端协商、处理器发布与关闭生命周期。
///
/// - **契约定位 (What)**：`open_client` 永不阻塞，结果经由 [`PendingHandle`] 交付；
/// - **风险提示 (Trade-offs)**：连接关闭不级联关闭已派生的客户端上下文。
pub mod connection;

/// 每次发布本地处理器时创建的生命周期作用域。
pub mod context;

/// 错误域与稳定错误码。
pub mod error;

/// 回调执行器契约与内置实现。
pub mod executor;

/// 可挂接关闭处理器的关闭生命周期。
pub mod lifecycle;

/// 命名调优选项。
pub mod options;

/// 挂起操作句柄。
///
/// - **意图说明 (Why)**：所有异步结果的唯一载体，取消与失败分属两条通道；
/// - **契约定位 (What)**：终态单调、观察者恰好通知一次、取消动作恰好执行一次。
pub mod pending;

/// 传输能力与 Endpoint 的边界契约。
pub mod spi;

/// 可记录调用的传输能力、Endpoint 与监听器桩实现，供测试与示例使用。
pub mod test_stubs;

/// 挂起句柄的翻译组合子。
pub mod translate;

/// 类型描述符与类型解析上下文。
pub mod types;

pub use attachments::{AttachmentKey, Attachments};
pub use client::{Client, ClientCore};
pub use connection::Connection;
pub use connector::ClientConnector;
pub use context::ClientContext;
pub use error::{ErrorKind, RemotingError, Result};
#[cfg(feature = "runtime-tokio")]
pub use executor::TokioExecutor;
pub use executor::{Executor, InlineExecutor, Task};
pub use lifecycle::{CloseHandler, CloseHandlerKey, LifecyclePhase};
pub use options::{OptionKey, OptionMap, OptionMapBuilder, OptionValue, UnknownOptionPolicy};
pub use pending::{CancelAction, Completer, Outcome, PendingHandle, Status};
pub use spi::{
    ConnectionHandler, ConnectionHandlerContext, ConnectionHandlerFactory,
    ConnectionProviderContext, Endpoint, ErasedListener, LocalRequestHandler, RawRemoteHandler,
    RemoteRequestHandler, RequestHandlerConnector, RequestListener,
};
pub use translate::{Discarded, TranslatingResult};
pub use types::{ResolutionContext, TypeDescriptor};
