//! # 挂起操作句柄（Pending-Operation Handle）
//!
//! ## 核心意图（Why）
//! - 每个异步操作的最终结果都落在一个“单次赋值、可取消”的容器里，连接层的所有高层操作
//!   （打开客户端、翻译结果）都以它为基底；
//! - 生产方与消费方拆分为 [`Completer`] 与 [`PendingHandle`] 两个角色：前者负责给出结果、登记取消动作，
//!   后者负责观察、等待与取消。
//!
//! ## 状态机（What）
//! - `Waiting → {Cancelled, Succeeded, Failed}`，三个终态均不可再迁移；
//! - `cancel` 仅在 `Waiting` 时生效，立即进入 `Cancelled` 并恰好执行一次全部取消动作；
//! - 取消之后到达的成功/失败结果被丢弃，调用返回 `false`；
//! - 完成观察者在终态迁移之后经由执行器通知，每个观察者至多一次。
//!
//! ## 风险提示（Trade-offs）
//! - 取消动作在调用 `cancel` 的线程上同步执行，要求动作本身非阻塞（通常只是向传输层投递一个信号）；
//! - 值类型需满足 `Clone`：同一结果会扇出给多个观察者与等待者。

use std::{
    fmt,
    future::Future,
    mem,
    pin::Pin,
    sync::{Arc, Weak},
    task::{Context, Poll, Waker},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

use crate::{
    error::RemotingError,
    executor::{Executor, ExecutorRef},
};

/// 取消动作：在句柄被取消时恰好执行一次。
pub type CancelAction = Box<dyn FnOnce() + Send + 'static>;

type Observer<T> = Box<dyn FnOnce(Outcome<T>) + Send + 'static>;

/// 挂起操作的终态结果。
///
/// 取消与失败是两条独立的通道：`Cancelled` 从不携带错误。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome<T> {
    Succeeded(T),
    Failed(RemotingError),
    Cancelled,
}

impl<T> Outcome<T> {
    /// 对应的状态标签。
    pub fn status(&self) -> Status {
        match self {
            Self::Succeeded(_) => Status::Succeeded,
            Self::Failed(_) => Status::Failed,
            Self::Cancelled => Status::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// 取出成功值。
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Succeeded(value) => Some(value),
            _ => None,
        }
    }

    /// 借用失败原因。
    pub fn err(&self) -> Option<&RemotingError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// 映射成功值，失败与取消原样保留。
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Succeeded(value) => Outcome::Succeeded(f(value)),
            Self::Failed(err) => Outcome::Failed(err),
            Self::Cancelled => Outcome::Cancelled,
        }
    }
}

/// 句柄状态标签。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    Waiting,
    Succeeded,
    Failed,
    Cancelled,
}

impl Status {
    /// 是否为终态。
    pub fn is_terminal(self) -> bool {
        !matches!(self, Status::Waiting)
    }
}

enum State<T> {
    Waiting,
    Done(Outcome<T>),
}

struct Inner<T> {
    state: State<T>,
    cancel_actions: Vec<CancelAction>,
    observers: Vec<Observer<T>>,
    wakers: Vec<Waker>,
}

struct Shared<T: Clone + Send + 'static> {
    inner: Mutex<Inner<T>>,
    done: Condvar,
    executor: Arc<dyn Executor>,
}

impl<T: Clone + Send + 'static> Shared<T> {
    fn new(executor: Arc<dyn Executor>, state: State<T>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state,
                cancel_actions: Vec::new(),
                observers: Vec::new(),
                wakers: Vec::new(),
            }),
            done: Condvar::new(),
            executor,
        }
    }

    fn status(&self) -> Status {
        match &self.inner.lock().state {
            State::Waiting => Status::Waiting,
            State::Done(outcome) => outcome.status(),
        }
    }

    fn transition(&self, outcome: Outcome<T>) -> bool {
        self.transition_with(outcome, |outcome| outcome).is_ok()
    }

    /// 唯一的终态迁移入口。
    ///
    /// # 执行逻辑（How）
    /// 1. 持锁检查 `Waiting`；已是终态时把 `value` 原样交还给调用方；
    /// 2. 写入终态并摘下观察者、唤醒器与取消动作；
    /// 3. 释放锁后依次：唤醒同步等待者、执行取消动作（仅取消时）、唤醒异步等待者、向执行器投递观察者回调；
    /// 4. 非取消终态直接丢弃取消动作，保证它们永不执行。
    fn transition_with<V>(
        &self,
        value: V,
        into_outcome: impl FnOnce(V) -> Outcome<T>,
    ) -> Result<(), V> {
        let (outcome, cancel_actions, observers, wakers) = {
            let mut inner = self.inner.lock();
            if !matches!(inner.state, State::Waiting) {
                return Err(value);
            }
            let outcome = into_outcome(value);
            let cancel_actions = mem::take(&mut inner.cancel_actions);
            inner.state = State::Done(outcome.clone());
            (
                outcome,
                cancel_actions,
                mem::take(&mut inner.observers),
                mem::take(&mut inner.wakers),
            )
        };
        self.done.notify_all();

        if outcome.is_cancelled() {
            for action in cancel_actions {
                action();
            }
        } else {
            drop(cancel_actions);
        }
        for waker in wakers {
            waker.wake();
        }
        for observer in observers {
            let outcome = outcome.clone();
            self.executor.execute(Box::new(move || observer(outcome)));
        }
        Ok(())
    }

    fn add_cancel_action(&self, action: CancelAction) {
        let mut inner = self.inner.lock();
        match &inner.state {
            State::Waiting => inner.cancel_actions.push(action),
            State::Done(Outcome::Cancelled) => {
                drop(inner);
                action();
            }
            State::Done(_) => {}
        }
    }

    fn add_observer(&self, observer: Observer<T>) {
        let mut inner = self.inner.lock();
        match &inner.state {
            State::Waiting => inner.observers.push(observer),
            State::Done(outcome) => {
                let outcome = outcome.clone();
                drop(inner);
                self.executor.execute(Box::new(move || observer(outcome)));
            }
        }
    }
}

/// 创建一对生产方/消费方，初始处于 `Waiting`。
///
/// # 契约说明（What）
/// - `executor`：完成观察者的投递目标；
/// - 返回的 [`Completer`] 唯一；它被释放时若句柄仍在等待，句柄以
///   [`RemotingError::Abandoned`] 失败，避免消费方永久挂起。
pub fn channel<T>(executor: Arc<dyn Executor>) -> (Completer<T>, PendingHandle<T>)
where
    T: Clone + Send + 'static,
{
    let shared = Arc::new(Shared::new(executor, State::Waiting));
    (
        Completer {
            shared: Arc::clone(&shared),
        },
        PendingHandle { shared },
    )
}

/// 生产方：给出结果、登记取消动作。
pub struct Completer<T: Clone + Send + 'static> {
    shared: Arc<Shared<T>>,
}

impl<T: Clone + Send + 'static> Completer<T> {
    /// 以成功值结束操作；若句柄已是终态（包括已取消）则丢弃该值并返回 `false`。
    pub fn succeed(&self, value: T) -> bool {
        self.try_succeed(value).is_ok()
    }

    /// 以成功值结束操作；句柄已是终态时把值原样交还，由调用方负责释放其持有的资源。
    pub fn try_succeed(&self, value: T) -> Result<(), T> {
        self.shared.transition_with(value, Outcome::Succeeded)
    }

    /// 以失败结束操作；语义与 [`Self::succeed`] 对称。
    pub fn fail(&self, error: RemotingError) -> bool {
        self.shared.transition(Outcome::Failed(error))
    }

    /// 生产方确认操作已被取消（例如底层操作自行放弃）。
    pub fn cancelled(&self) -> bool {
        self.shared.transition(Outcome::Cancelled)
    }

    /// 按终态转发一个已有结果。
    pub fn complete(&self, outcome: Outcome<T>) -> bool {
        self.shared.transition(outcome)
    }

    /// 登记取消动作。
    ///
    /// - 句柄仍在等待：动作入队，取消时执行；
    /// - 句柄已取消：立即在当前线程执行；
    /// - 句柄已成功/失败：动作被丢弃。
    pub fn add_cancel_action(&self, action: impl FnOnce() + Send + 'static) {
        self.shared.add_cancel_action(Box::new(action));
    }

    /// 当前状态。
    pub fn status(&self) -> Status {
        self.shared.status()
    }

    /// 派生消费方句柄。
    pub fn handle(&self) -> PendingHandle<T> {
        PendingHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone + Send + 'static> Drop for Completer<T> {
    fn drop(&mut self) {
        if self.shared.transition(Outcome::Failed(RemotingError::Abandoned {
            operation: std::any::type_name::<T>().to_owned(),
        })) {
            tracing::debug!(
                value_type = std::any::type_name::<T>(),
                "pending operation abandoned by producer"
            );
        }
    }
}

impl<T: Clone + Send + 'static> fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("status", &self.status())
            .finish()
    }
}

/// 消费方：观察、等待、取消。
///
/// # 契约说明（What）
/// - 可克隆，所有克隆共享同一状态；
/// - 实现 [`Future`]，`await` 得到 [`Outcome`]；也可通过 [`Self::wait`] 同步阻塞等待；
/// - `cancel` 是非阻塞的“发出即忘”信号，对已终态句柄调用为无操作且不报错。
pub struct PendingHandle<T: Clone + Send + 'static> {
    shared: Arc<Shared<T>>,
}

impl<T: Clone + Send + 'static> PendingHandle<T> {
    /// 已成功的句柄。
    pub fn ready(executor: Arc<dyn Executor>, value: T) -> Self {
        Self::resolved(executor, Outcome::Succeeded(value))
    }

    /// 已失败的句柄。
    pub fn failed(executor: Arc<dyn Executor>, error: RemotingError) -> Self {
        Self::resolved(executor, Outcome::Failed(error))
    }

    /// 已取消的句柄。
    pub fn cancelled(executor: Arc<dyn Executor>) -> Self {
        Self::resolved(executor, Outcome::Cancelled)
    }

    fn resolved(executor: Arc<dyn Executor>, outcome: Outcome<T>) -> Self {
        Self {
            shared: Arc::new(Shared::new(executor, State::Done(outcome))),
        }
    }

    /// 当前状态。
    pub fn status(&self) -> Status {
        self.shared.status()
    }

    /// 终态结果；仍在等待时返回 `None`。
    pub fn outcome(&self) -> Option<Outcome<T>> {
        match &self.shared.inner.lock().state {
            State::Waiting => None,
            State::Done(outcome) => Some(outcome.clone()),
        }
    }

    /// 请求取消。
    ///
    /// 返回 `true` 表示本次调用完成了 `Waiting → Cancelled` 迁移并执行了取消动作；
    /// 重复调用或对终态句柄调用返回 `false`。
    pub fn cancel(&self) -> bool {
        self.shared.transition(Outcome::Cancelled)
    }

    /// 登记完成观察者。
    ///
    /// 观察者恰好被调用一次，由句柄绑定的执行器运行；若句柄已是终态，立即投递。
    pub fn on_complete(&self, observer: impl FnOnce(Outcome<T>) + Send + 'static) {
        self.shared.add_observer(Box::new(observer));
    }

    /// 阻塞当前线程直至终态。
    pub fn wait(&self) -> Outcome<T> {
        let mut inner = self.shared.inner.lock();
        loop {
            if let State::Done(outcome) = &inner.state {
                return outcome.clone();
            }
            self.shared.done.wait(&mut inner);
        }
    }

    /// 带超时的阻塞等待；超时仍未终态时返回 `None`，句柄状态不受影响。
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Outcome<T>> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.shared.inner.lock();
        loop {
            if let State::Done(outcome) = &inner.state {
                return Some(outcome.clone());
            }
            if self.shared.done.wait_until(&mut inner, deadline).timed_out() {
                return match &inner.state {
                    State::Done(outcome) => Some(outcome.clone()),
                    State::Waiting => None,
                };
            }
        }
    }

    pub(crate) fn downgrade(&self) -> WeakPendingHandle<T> {
        WeakPendingHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }
}

impl<T: Clone + Send + 'static> Clone for PendingHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone + Send + 'static> Future for PendingHandle<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.shared.inner.lock();
        match &inner.state {
            State::Done(outcome) => Poll::Ready(outcome.clone()),
            State::Waiting => {
                if !inner.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    inner.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl<T: Clone + Send + 'static> fmt::Debug for PendingHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingHandle")
            .field("status", &self.status())
            .field("executor", &ExecutorRef(&self.shared.executor))
            .finish()
    }
}

/// 不延长生命周期的句柄引用，用于在取消动作中回指另一个句柄而不形成引用环。
pub(crate) struct WeakPendingHandle<T: Clone + Send + 'static> {
    shared: Weak<Shared<T>>,
}

impl<T: Clone + Send + 'static> WeakPendingHandle<T> {
    /// 若目标仍存活则请求取消。
    pub(crate) fn cancel(&self) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| shared.transition(Outcome::Cancelled))
    }
}
