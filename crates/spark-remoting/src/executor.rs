//! 回调执行器契约。
//!
//! ## 契约声明
//! * 连接层自身不创建线程：完成通知、关闭处理器等回调一律提交给注入的 [`Executor`]；
//! * 执行器决定“由哪个工作者运行回调”，连接层只保证“每个回调提交恰好一次”。

use std::{fmt, sync::Arc};

/// 提交给执行器的最小任务单元。
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// `Executor` 定义回调的调度契约。
///
/// # 设计背景（Why）
/// - 连接、客户端上下文与挂起句柄共享同一个执行器，保证回调不会在调用者线程上意外地长时间执行；
/// - 以对象安全接口暴露，便于 Endpoint 以 `Arc<dyn Executor>` 形式注入。
///
/// # 契约说明（What）
/// - `execute` 不得阻塞等待任务完成；
/// - 任务必须最终被运行一次，除非执行器本身正在关闭（此时允许丢弃，但应记录日志）。
pub trait Executor: Send + Sync + 'static {
    /// 提交一个任务。
    fn execute(&self, task: Task);
}

impl<E> Executor for Arc<E>
where
    E: Executor + ?Sized,
{
    fn execute(&self, task: Task) {
        (**self).execute(task)
    }
}

/// 在提交线程上立即运行任务的执行器。
///
/// 适用于测试与“回调本身足够轻量”的场景；调用 `execute` 返回时任务已运行完毕。
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, task: Task) {
        task()
    }
}

/// 基于 Tokio 运行时句柄的执行器。
///
/// # 契约说明（What）
/// - 每个任务以 `spawn_blocking` 提交，回调允许执行同步 I/O（例如关闭传输能力）；
/// - 句柄需在任务运行期间保持有效，运行时关闭后提交的任务会被 Tokio 丢弃。
#[cfg(feature = "runtime-tokio")]
#[derive(Clone)]
pub struct TokioExecutor {
    handle: tokio::runtime::Handle,
}

#[cfg(feature = "runtime-tokio")]
impl TokioExecutor {
    /// 使用给定运行时句柄构造执行器。
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// 捕获当前上下文的运行时句柄；不在 Tokio 上下文中时返回 `None`。
    pub fn current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }
}

#[cfg(feature = "runtime-tokio")]
impl Executor for TokioExecutor {
    fn execute(&self, task: Task) {
        drop(self.handle.spawn_blocking(task));
    }
}

#[cfg(feature = "runtime-tokio")]
impl fmt::Debug for TokioExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioExecutor").finish_non_exhaustive()
    }
}

/// 便于在结构体中打印执行器字段的占位包装。
pub(crate) struct ExecutorRef<'a>(pub(crate) &'a Arc<dyn Executor>);

impl fmt::Debug for ExecutorRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Executor@{:p}", Arc::as_ptr(self.0))
    }
}
