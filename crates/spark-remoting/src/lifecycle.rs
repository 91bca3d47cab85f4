//! # 关闭生命周期
//!
//! ## 核心意图（Why）
//! - 连接与客户端上下文都是“可挂接关闭处理器的可关闭对象”：关闭动作恰好执行一次，
//!   关闭完成后按登记顺序把关闭处理器投递到执行器；
//! - 两者共用 [`CloseLifecycle`]，确保幂等语义只在一处实现。
//!
//! ## 行为契约（What）
//! - 阶段严格单调：`Open → Closing → Closed`；
//! - 第二次及以后的 `close` 为无操作并返回 `Ok(())`，不会重复执行关闭动作；
//! - 关闭动作失败时错误返回给发起者，但对象仍被视为已关闭，不重试也不回滚；
//! - 对已关闭对象登记处理器会立即投递执行。

use std::{fmt, mem, sync::Arc};

use parking_lot::Mutex;

use crate::{
    error::Result,
    executor::{Executor, ExecutorRef},
};

/// 关闭处理器。
pub type CloseHandler = Box<dyn FnOnce() + Send + 'static>;

/// 生命周期阶段。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecyclePhase {
    Open,
    Closing,
    Closed,
}

/// 关闭处理器登记凭据，可用于撤销尚未执行的处理器。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CloseHandlerKey(u64);

struct State {
    phase: LifecyclePhase,
    handlers: Vec<(CloseHandlerKey, CloseHandler)>,
    next_key: u64,
}

pub(crate) struct CloseLifecycle {
    state: Mutex<State>,
    executor: Arc<dyn Executor>,
}

impl CloseLifecycle {
    pub(crate) fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            state: Mutex::new(State {
                phase: LifecyclePhase::Open,
                handlers: Vec::new(),
                next_key: 0,
            }),
            executor,
        }
    }

    pub(crate) fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    pub(crate) fn phase(&self) -> LifecyclePhase {
        self.state.lock().phase
    }

    /// 执行关闭。
    ///
    /// # 执行逻辑（How）
    /// 1. 持锁把 `Open` 推进到 `Closing`；若已不是 `Open`，直接返回 `Ok(())`；
    /// 2. 释放锁执行 `action`，避免关闭动作回调本对象时自锁；
    /// 3. 推进到 `Closed`，摘下全部处理器按登记顺序投递；
    /// 4. 返回 `action` 的结果。
    pub(crate) fn close(&self, action: impl FnOnce() -> Result<()>) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.phase != LifecyclePhase::Open {
                return Ok(());
            }
            state.phase = LifecyclePhase::Closing;
        }

        let result = action();

        let handlers = {
            let mut state = self.state.lock();
            state.phase = LifecyclePhase::Closed;
            mem::take(&mut state.handlers)
        };
        for (_, handler) in handlers {
            self.executor.execute(handler);
        }
        result
    }

    /// 登记关闭处理器；对象已关闭时立即投递并返回 `None`。
    pub(crate) fn add_close_handler(&self, handler: CloseHandler) -> Option<CloseHandlerKey> {
        let mut state = self.state.lock();
        if state.phase == LifecyclePhase::Closed {
            drop(state);
            self.executor.execute(handler);
            return None;
        }
        let key = CloseHandlerKey(state.next_key);
        state.next_key += 1;
        state.handlers.push((key, handler));
        Some(key)
    }

    /// 撤销尚未执行的处理器。
    pub(crate) fn remove_close_handler(&self, key: CloseHandlerKey) -> bool {
        let mut state = self.state.lock();
        let before = state.handlers.len();
        state.handlers.retain(|(k, _)| *k != key);
        state.handlers.len() != before
    }
}

impl fmt::Debug for CloseLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CloseLifecycle")
            .field("phase", &state.phase)
            .field("handlers", &state.handlers.len())
            .field("executor", &ExecutorRef(&self.executor))
            .finish()
    }
}
