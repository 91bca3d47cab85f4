//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义连接层对外暴露的失败语义：传输打开失败、客户端构造（翻译）失败、连接器分配失败、
//!   关闭失败等；
//! - 取消 **不是** 错误：它是 [`Outcome::Cancelled`](crate::pending::Outcome::Cancelled) 这一独立终态，
//!   因而本模块刻意不提供 `Cancelled` 变体，避免与失败通道混用。
//!
//! ## 设计要求（What）
//! - 所有错误派生 `thiserror::Error`，保持与 `std::error::Error` 生态兼容；
//! - 错误需满足 `Clone`，以便同一失败可以分发给多个完成观察者；
//! - 通过 [`RemotingError::code`] 暴露 `<域>.<语义>` 形式的稳定错误码，供日志聚合与告警使用。

use std::io;

use thiserror::Error;

/// 连接层统一返回值别名，默认错误类型为 [`RemotingError`]。
pub type Result<T, E = RemotingError> = core::result::Result<T, E>;

/// 粗粒度错误分类，帮助调用方在不解析消息文本的前提下区分失败来源。
///
/// - `TransportOpen` 与 `Translation` 对应客户端协商的两段失败；
/// - `Io` 专指传输能力关闭等底层 I/O 故障；
/// - `Closed` 表示目标对象已进入关闭流程，拒绝新的操作。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    TransportOpen,
    Translation,
    ConnectorAllocation,
    Closed,
    Io,
    InvalidOption,
    Abandoned,
}

/// 连接层错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：把客户端协商、本地处理器发布与生命周期管理中的全部失败路径收敛为一个枚举，
///   使 `?` 运算符在各层之间直接生效；
/// - **契约 (What)**：
///   - 所有变体均为 `Send + Sync + 'static` 且可克隆，可安全地扇出给多个观察者；
///   - `code()` 返回稳定错误码，`kind()` 返回 [`ErrorKind`] 分类；
/// - **风险 (Trade-offs)**：上下文以 `String` 保存，牺牲少量分配换取可读性；
///   底层 `io::Error` 不可克隆，因此仅保留其 `ErrorKind` 与描述文本。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RemotingError {
    /// 传输层未能建立远端绑定（服务不存在、对端拒绝、链路故障等）。
    #[error("failed to open service `{service_type}` in group `{group_name}`: {detail}")]
    TransportOpen {
        service_type: String,
        group_name: String,
        detail: String,
    },

    /// 已取得原始远端处理器，但无法构造出类型化客户端。
    ///
    /// - **契约 (What)**：`request`/`reply` 为调用方声明的类型名；原始处理器的释放由 Endpoint 负责。
    #[error("failed to build client <{request}, {reply}>: {detail}")]
    Translation {
        request: String,
        reply: String,
        detail: String,
    },

    /// 传输层无法为本地处理器分配连接器，例如连接已在关闭。
    #[error("failed to allocate request handler connector: {detail}")]
    ConnectorAllocation { detail: String },

    /// 目标对象已关闭，拒绝继续操作。
    #[error("`{target}` is already closed")]
    Closed { target: String },

    /// 关闭传输能力或本地处理器时出现 I/O 故障。
    #[error("i/o failure ({kind:?}): {detail}")]
    Io { kind: io::ErrorKind, detail: String },

    /// 挂起操作的生产方在给出结果前被释放。
    #[error("pending operation `{operation}` was abandoned by its producer")]
    Abandoned { operation: String },

    /// 选项映射中出现被策略拒绝的名称或类型不符的取值。
    #[error("invalid option `{name}`: {detail}")]
    InvalidOption { name: String, detail: String },
}

impl RemotingError {
    /// 构造传输打开失败。
    pub fn transport_open(
        service_type: impl Into<String>,
        group_name: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::TransportOpen {
            service_type: service_type.into(),
            group_name: group_name.into(),
            detail: detail.into(),
        }
    }

    /// 构造翻译（客户端构造）失败。
    pub fn translation(
        request: impl Into<String>,
        reply: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::Translation {
            request: request.into(),
            reply: reply.into(),
            detail: detail.into(),
        }
    }

    /// 构造连接器分配失败。
    pub fn connector_allocation(detail: impl Into<String>) -> Self {
        Self::ConnectorAllocation {
            detail: detail.into(),
        }
    }

    /// 构造“已关闭”错误，`target` 通常为对象的展示名。
    pub fn closed(target: impl Into<String>) -> Self {
        Self::Closed {
            target: target.into(),
        }
    }

    /// 返回错误分类。
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TransportOpen { .. } => ErrorKind::TransportOpen,
            Self::Translation { .. } => ErrorKind::Translation,
            Self::ConnectorAllocation { .. } => ErrorKind::ConnectorAllocation,
            Self::Closed { .. } => ErrorKind::Closed,
            Self::Io { .. } => ErrorKind::Io,
            Self::InvalidOption { .. } => ErrorKind::InvalidOption,
            Self::Abandoned { .. } => ErrorKind::Abandoned,
        }
    }

    /// 返回稳定错误码。
    ///
    /// # 契约 (What)
    /// - 码值遵循 `remoting.<阶段>.<语义>` 命名，一经发布不得更改；
    /// - 日志、指标应以码值而非 `Display` 文本作为聚合维度。
    pub fn code(&self) -> &'static str {
        match self {
            Self::TransportOpen { .. } => "remoting.open.failed",
            Self::Translation { .. } => "remoting.translate.failed",
            Self::ConnectorAllocation { .. } => "remoting.connector.unavailable",
            Self::Closed { .. } => "remoting.lifecycle.closed",
            Self::Io { .. } => "remoting.io.failed",
            Self::InvalidOption { .. } => "remoting.option.invalid",
            Self::Abandoned { .. } => "remoting.operation.abandoned",
        }
    }
}

impl From<io::Error> for RemotingError {
    fn from(value: io::Error) -> Self {
        Self::Io {
            kind: value.kind(),
            detail: value.to_string(),
        }
    }
}
