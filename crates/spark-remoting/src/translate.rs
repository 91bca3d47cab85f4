//! # 翻译结果（Translating Result）
//!
//! ## 核心意图（Why）
//! - 打开服务时传输层只能给出“未类型化的远端处理器”，调用方需要的却是类型化客户端；
//! - 本模块把“内层句柄 + 转换函数”组合为外层句柄，并负责把取消向下转发到真正的底层操作，
//!   而不是仅仅屏蔽可见结果。
//!
//! ## 组合规则（What）
//! 1. 外层登记一个取消动作：外层被取消时取消内层；
//! 2. 内层成功 → 运行转换函数，按其返回值使外层成功或失败；内层失败 → 外层以同一错误失败，
//!    不运行转换函数；内层被取消 → 外层取消；
//! 3. 外层先被取消时，内层随后给出的任何结果都被丢弃。
//!
//! 由此保证：转换函数至多运行一次，且从不在外层取消之后运行。
//!
//! ## 风险提示（Trade-offs）
//! - 取消可能恰好落在“内层已成功、转换尚未完成”的窗口内。此时内层的值或转换产物无人接收，
//!   若它们持有资源（远端绑定、客户端），必须经 [`TranslatingResult::on_discard`] 登记的钩子释放；
//! - 钩子对每个被丢弃的值恰好调用一次，在完成内层的线程（或执行器）上运行。

use std::{fmt, marker::PhantomData};

use tracing::debug;

use crate::{
    error::Result,
    pending::{Completer, Outcome, PendingHandle},
};

/// 因外层已终态而无人接收的值。
#[derive(Debug)]
pub enum Discarded<A, B> {
    /// 外层在转换前已终态，内层的成功值未经转换。
    Input(A),
    /// 转换完成时外层已终态，转换产物被拒收。
    Output(B),
}

type DiscardHook<A, B> = Box<dyn FnOnce(Discarded<A, B>) + Send + 'static>;

/// 把 `PendingHandle<A>` 翻译为 `Completer<B>` 所驱动句柄的组合器。
///
/// # 契约说明（What）
/// - `outer`：外层生产方，调用方通常已持有其消费方句柄并返回给用户；
/// - `translate`：`FnOnce(A) -> Result<B>`，其失败直接成为外层的失败；
/// - `discard`：可选的释放钩子，接收因取消而无人认领的值；
/// - 组合器与内层之间只有单向观察关系，不延长内层的生命周期。
pub struct TranslatingResult<A, B, F>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
{
    outer: Completer<B>,
    translate: F,
    discard: Option<DiscardHook<A, B>>,
    _input: PhantomData<fn(A)>,
}

impl<A, B, F> TranslatingResult<A, B, F>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    F: FnOnce(A) -> Result<B> + Send + 'static,
{
    /// 绑定外层生产方与转换函数。
    pub fn new(outer: Completer<B>, translate: F) -> Self {
        Self {
            outer,
            translate,
            discard: None,
            _input: PhantomData,
        }
    }

    /// 登记释放钩子：外层已终态时，内层成功值或转换产物交给它处置，而不是静默丢弃。
    pub fn on_discard(mut self, hook: impl FnOnce(Discarded<A, B>) + Send + 'static) -> Self {
        self.discard = Some(Box::new(hook));
        self
    }

    /// 开始观察内层句柄，按组合规则驱动外层。
    ///
    /// # 执行逻辑（How）
    /// - 取消转发使用内层的弱引用，避免“内层观察者 → 外层生产方 → 取消动作 → 内层”形成引用环；
    /// - 观察者在内层终态后由执行器运行；转换函数运行前再次确认外层仍在等待；
    /// - 转换产物经 `try_succeed` 交付，被拒收时连同内层值一样走释放钩子。
    pub fn observe(self, inner: &PendingHandle<A>) {
        let Self {
            outer,
            translate,
            discard,
            ..
        } = self;

        let weak_inner = inner.downgrade();
        outer.add_cancel_action(move || {
            weak_inner.cancel();
        });

        inner.on_complete(move |outcome| match outcome {
            Outcome::Succeeded(value) => {
                if outer.status().is_terminal() {
                    release(discard, Discarded::Input(value));
                    return;
                }
                match translate(value) {
                    Ok(translated) => {
                        if let Err(rejected) = outer.try_succeed(translated) {
                            release(discard, Discarded::Output(rejected));
                        }
                    }
                    Err(error) => {
                        outer.fail(error);
                    }
                }
            }
            Outcome::Failed(error) => {
                outer.fail(error);
            }
            Outcome::Cancelled => {
                outer.cancelled();
            }
        });
    }
}

fn release<A, B>(hook: Option<DiscardHook<A, B>>, value: Discarded<A, B>) {
    match hook {
        Some(hook) => hook(value),
        None => debug!("dropping value that arrived after the outer handle completed"),
    }
}

impl<A, B, F> fmt::Debug for TranslatingResult<A, B, F>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranslatingResult")
            .field("outer", &self.outer)
            .field("has_discard_hook", &self.discard.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::RemotingError,
        executor::{Executor, InlineExecutor},
        pending::{self, Status},
    };
    use parking_lot::Mutex;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    fn inline() -> Arc<dyn Executor> {
        Arc::new(InlineExecutor)
    }

    /// 暂存任务、由测试手动排空的执行器，用于构造“观察者尚未运行”的窗口。
    #[derive(Default)]
    struct QueuedExecutor {
        tasks: Mutex<Vec<crate::executor::Task>>,
    }

    impl QueuedExecutor {
        fn drain(&self) {
            let tasks = std::mem::take(&mut *self.tasks.lock());
            for task in tasks {
                task();
            }
        }
    }

    impl Executor for QueuedExecutor {
        fn execute(&self, task: crate::executor::Task) {
            self.tasks.lock().push(task);
        }
    }

    fn recording_discards(
        sink: &Arc<Mutex<Vec<String>>>,
    ) -> impl FnOnce(Discarded<u32, String>) + Send + use<> {
        let sink = Arc::clone(sink);
        move |discarded| {
            let entry = match discarded {
                Discarded::Input(value) => format!("input:{value}"),
                Discarded::Output(value) => format!("output:{value}"),
            };
            sink.lock().push(entry);
        }
    }

    fn counting_translation(
        calls: &Arc<AtomicUsize>,
    ) -> impl FnOnce(u32) -> Result<String> + Send + use<> {
        let calls = Arc::clone(calls);
        move |value| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("#{value}"))
        }
    }

    #[test]
    fn inner_success_is_translated() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (inner_tx, inner) = pending::channel::<u32>(inline());
        let (outer_tx, outer) = pending::channel::<String>(inline());
        TranslatingResult::new(outer_tx, counting_translation(&calls)).observe(&inner);

        assert_eq!(outer.status(), Status::Waiting);
        inner_tx.succeed(3);
        assert_eq!(outer.outcome(), Some(Outcome::Succeeded("#3".to_owned())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn inner_failure_bypasses_translation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (inner_tx, inner) = pending::channel::<u32>(inline());
        let (outer_tx, outer) = pending::channel::<String>(inline());
        TranslatingResult::new(outer_tx, counting_translation(&calls)).observe(&inner);

        let error = RemotingError::transport_open("echo", "default", "refused");
        inner_tx.fail(error.clone());
        assert_eq!(outer.outcome(), Some(Outcome::Failed(error)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn translation_error_fails_outer() {
        let (inner_tx, inner) = pending::channel::<u32>(inline());
        let (outer_tx, outer) = pending::channel::<String>(inline());
        let error = RemotingError::translation("u32", "String", "mismatch");
        let reported = error.clone();
        TranslatingResult::new(outer_tx, move |_| Err(reported)).observe(&inner);

        inner_tx.succeed(1);
        assert_eq!(outer.outcome(), Some(Outcome::Failed(error)));
    }

    #[test]
    fn outer_cancel_is_forwarded_downward_and_never_translates() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (inner_tx, inner) = pending::channel::<u32>(inline());
        let (outer_tx, outer) = pending::channel::<String>(inline());
        TranslatingResult::new(outer_tx, counting_translation(&calls)).observe(&inner);

        assert!(outer.cancel());
        assert_eq!(inner.status(), Status::Cancelled);
        assert!(!inner_tx.succeed(9));
        assert_eq!(outer.outcome(), Some(Outcome::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancel_during_translation_releases_translated_value() {
        let discarded = Arc::new(Mutex::new(Vec::new()));
        let (inner_tx, inner) = pending::channel::<u32>(inline());
        let (outer_tx, outer) = pending::channel::<String>(inline());
        let racing = outer.clone();
        TranslatingResult::new(outer_tx, move |value: u32| {
            racing.cancel();
            Ok(format!("#{value}"))
        })
        .on_discard(recording_discards(&discarded))
        .observe(&inner);

        inner_tx.succeed(5);
        assert_eq!(outer.outcome(), Some(Outcome::Cancelled));
        assert_eq!(*discarded.lock(), vec!["output:#5".to_owned()]);
    }

    #[test]
    fn cancel_before_observer_runs_releases_inner_value() {
        let calls = Arc::new(AtomicUsize::new(0));
        let discarded = Arc::new(Mutex::new(Vec::new()));
        let queue = Arc::new(QueuedExecutor::default());
        let (inner_tx, inner) = pending::channel::<u32>(queue.clone());
        let (outer_tx, outer) = pending::channel::<String>(inline());
        TranslatingResult::new(outer_tx, counting_translation(&calls))
            .on_discard(recording_discards(&discarded))
            .observe(&inner);

        assert!(inner_tx.succeed(8));
        assert!(outer.cancel());
        queue.drain();

        assert_eq!(outer.outcome(), Some(Outcome::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(*discarded.lock(), vec!["input:8".to_owned()]);
    }

    #[test]
    fn delivered_value_is_never_discarded() {
        let discarded = Arc::new(Mutex::new(Vec::new()));
        let (inner_tx, inner) = pending::channel::<u32>(inline());
        let (outer_tx, outer) = pending::channel::<String>(inline());
        TranslatingResult::new(outer_tx, |v: u32| Ok(v.to_string()))
            .on_discard(recording_discards(&discarded))
            .observe(&inner);

        inner_tx.succeed(2);
        assert_eq!(outer.status(), Status::Succeeded);
        assert!(discarded.lock().is_empty());
    }

    #[test]
    fn inner_cancel_is_mirrored_by_outer() {
        let (inner_tx, inner) = pending::channel::<u32>(inline());
        let (outer_tx, outer) = pending::channel::<String>(inline());
        TranslatingResult::new(outer_tx, |v: u32| Ok(v.to_string())).observe(&inner);

        inner_tx.cancelled();
        assert_eq!(outer.status(), Status::Cancelled);
    }
}
