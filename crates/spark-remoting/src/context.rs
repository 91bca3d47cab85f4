//! # 客户端上下文（Client Context）
//!
//! ## 核心意图（Why）
//! - 每次 `create_client_connector` 都会创建一个上下文，作为“本地处理器发布”这一动作的生命周期作用域；
//! - 上下文关闭即撤回发布：至少有一个关闭处理器负责关闭对应的本地处理器，无论连接器是否被激活过。
//!
//! ## 契约（What）
//! - 对连接只持有弱引用，上下文不会延长连接寿命；
//! - 与连接共享执行器，关闭处理器在该执行器上运行；
//! - 关闭幂等，连接关闭不会级联关闭上下文。

use std::{
    fmt,
    sync::{Arc, Weak},
};

use crate::{
    connection::{Connection, ConnectionInner},
    error::Result,
    executor::Executor,
    lifecycle::{CloseHandlerKey, CloseLifecycle, LifecyclePhase},
    options::OptionMap,
};

/// 客户端上下文，克隆共享同一作用域。
#[derive(Clone)]
pub struct ClientContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    connection: Weak<ConnectionInner>,
    options: OptionMap,
    lifecycle: CloseLifecycle,
}

impl ClientContext {
    pub(crate) fn new(
        connection: Weak<ConnectionInner>,
        executor: Arc<dyn Executor>,
        options: OptionMap,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                connection,
                options,
                lifecycle: CloseLifecycle::new(executor),
            }),
        }
    }

    /// 所属连接；连接已被释放时返回 `None`。
    pub fn connection(&self) -> Option<Connection> {
        self.inner.connection.upgrade().map(Connection::from_inner)
    }

    pub fn executor(&self) -> &Arc<dyn Executor> {
        self.inner.lifecycle.executor()
    }

    /// 创建本上下文时传入的选项，供本地处理器读取调优参数。
    pub fn options(&self) -> &OptionMap {
        &self.inner.options
    }

    /// 登记关闭处理器；上下文已关闭时立即在执行器上运行并返回 `None`。
    pub fn add_close_handler(
        &self,
        handler: impl FnOnce() + Send + 'static,
    ) -> Option<CloseHandlerKey> {
        self.inner.lifecycle.add_close_handler(Box::new(handler))
    }

    /// 撤销尚未运行的关闭处理器。
    pub fn remove_close_handler(&self, key: CloseHandlerKey) -> bool {
        self.inner.lifecycle.remove_close_handler(key)
    }

    /// 关闭上下文，幂等。
    pub fn close(&self) -> Result<()> {
        self.inner.lifecycle.close(|| {
            tracing::debug!("client context closed");
            Ok(())
        })
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lifecycle.phase() != LifecyclePhase::Open
    }
}

impl PartialEq for ClientContext {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ClientContext {}

impl fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientContext")
            .field("lifecycle", &self.inner.lifecycle)
            .field("options", &self.inner.options)
            .field("connected", &(self.inner.connection.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::InlineExecutor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn detached() -> ClientContext {
        ClientContext::new(Weak::new(), Arc::new(InlineExecutor), OptionMap::default())
    }

    #[test]
    fn handlers_run_once_after_close() {
        let fired = Arc::new(AtomicUsize::new(0));
        let context = detached();
        let counter = Arc::clone(&fired);
        context.add_close_handler(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(!context.is_closed());

        context.close().unwrap();
        context.close().unwrap();
        assert!(context.is_closed());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn detached_context_has_no_connection() {
        let context = detached();
        assert!(context.connection().is_none());
        assert_eq!(context, context.clone());
    }
}
