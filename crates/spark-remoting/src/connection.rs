//! # 连接（Connection）
//!
//! ## 核心意图（Why）
//! - 表示两个端点之间一条已建立的逻辑连接，并在其上提供两项操作：
//!   异步协商类型化远端客户端（[`Connection::open_client`]），以及发布本地处理器供对端调用
//!   （[`Connection::create_client_connector`]）；
//! - 资源生命周期在此组合：任意环节失败或取消都不得留下孤儿资源。
//!
//! ## 所有权（What）
//! - 传输能力在构造时由工厂创建、由连接独占，永不替换，关闭恰好一次；
//! - 附件存储由连接独占，生命周期内始终是同一实例；
//! - 客户端上下文只弱引用连接，连接关闭不会级联关闭上下文或本地处理器。
//!
//! ## 风险提示（Trade-offs）
//! - `open_client` 永不阻塞：打开失败、翻译失败都经由返回句柄报告，而非同步错误；
//! - 便捷重载使用构造时获得的默认解析上下文，从不查询线程局部或全局状态。

use std::{fmt, sync::Arc};

use tracing::{debug, warn};

use crate::{
    attachments::Attachments,
    client::Client,
    connector::ClientConnector,
    context::ClientContext,
    error::{RemotingError, Result},
    executor::{Executor, ExecutorRef},
    lifecycle::{CloseHandlerKey, CloseLifecycle, LifecyclePhase},
    options::OptionMap,
    pending::{self, PendingHandle},
    spi::{
        ConnectionHandler, ConnectionHandlerContext, ConnectionHandlerFactory,
        ConnectionProviderContext, Endpoint, ErasedListener, LocalRequestHandler, RawRemoteHandler,
        RequestListener,
    },
    translate::{Discarded, TranslatingResult},
    types::{ResolutionContext, TypeDescriptor},
};

/// 一条逻辑连接，克隆共享同一实例。
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

pub(crate) struct ConnectionInner {
    name: Arc<str>,
    attachments: Attachments,
    handler: Box<dyn ConnectionHandler>,
    endpoint: Arc<dyn Endpoint>,
    resolution: ResolutionContext,
    lifecycle: CloseLifecycle,
}

impl Connection {
    /// 构造连接。
    ///
    /// # 执行逻辑（How）
    /// 1. 从 Endpoint 取得共享执行器；
    /// 2. 以连接名、执行器与 Provider 上下文调用工厂，恰好一次；
    /// 3. 工厂失败时原样返回错误，不产生任何连接状态。
    pub fn new(
        endpoint: Arc<dyn Endpoint>,
        factory: &dyn ConnectionHandlerFactory,
        provider: ConnectionProviderContext,
        name: impl Into<Arc<str>>,
    ) -> Result<Self> {
        let name = name.into();
        let executor = endpoint.executor();
        let resolution = provider.resolution().clone();
        let handler = factory.create_instance(ConnectionHandlerContext::new(
            Arc::clone(&name),
            Arc::clone(&executor),
            provider,
        ))?;
        debug!(connection = %name, "connection established");
        Ok(Self {
            inner: Arc::new(ConnectionInner {
                name,
                attachments: Attachments::new(),
                handler,
                endpoint,
                resolution,
                lifecycle: CloseLifecycle::new(executor),
            }),
        })
    }

    pub(crate) fn from_inner(inner: Arc<ConnectionInner>) -> Self {
        Self { inner }
    }

    /// 展示名。
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// 连接共享的执行器。
    pub fn executor(&self) -> &Arc<dyn Executor> {
        self.inner.lifecycle.executor()
    }

    /// 便捷重载使用的默认解析上下文。
    pub fn default_resolution(&self) -> &ResolutionContext {
        &self.inner.resolution
    }

    /// 连接作用域的附件存储。
    pub fn attachments(&self) -> &Attachments {
        &self.inner.attachments
    }

    /// 打开远端服务并异步协商类型化客户端。
    ///
    /// # 教案式说明
    /// - **意图 (Why)**：把传输层的“打开服务”转换为可取消、类型安全的客户端句柄；
    /// - **契约 (What)**：
    ///   - 立即向传输能力发起打开，同步返回外层句柄，从不阻塞；
    ///   - 打开失败 → 外层以同一错误失败，不经翻译；
    ///   - 翻译失败 → 外层以翻译错误失败，原始远端处理器由 Endpoint 释放；
    ///   - 结果到达前取消 → 传输层取消动作被调用，翻译不会运行；
    ///   - 取消与结果到达竞争 → 无人接收的远端处理器或客户端被关闭，不留孤儿；
    ///   - 连接已关闭 → 返回已失败的句柄，不触碰传输能力；
    /// - **执行 (How)**：传输层取消动作登记在外层句柄上；[`TranslatingResult`] 负责把外层取消
    ///   转发到内层并在内层成功时调用 Endpoint 构造客户端。
    pub fn open_client<Req, Rep>(
        &self,
        service_type: &str,
        group_name: &str,
        resolution: &ResolutionContext,
        options: &OptionMap,
    ) -> PendingHandle<Client<Req, Rep>>
    where
        Req: 'static,
        Rep: 'static,
    {
        let executor = Arc::clone(self.executor());
        if self.is_closed() {
            return PendingHandle::failed(executor, RemotingError::closed(self.to_string()));
        }

        debug!(
            connection = %self.inner.name,
            service = service_type,
            group = group_name,
            resolution = resolution.label(),
            "opening remote service"
        );
        let (cancel, inner) = self
            .inner
            .handler
            .open(service_type, group_name, resolution, options);

        let (outer_tx, outer) = pending::channel(executor);
        outer_tx.add_cancel_action(cancel);

        let endpoint = Arc::clone(&self.inner.endpoint);
        let resolution = resolution.clone();
        TranslatingResult::new(outer_tx, move |raw: RawRemoteHandler| {
            let core = endpoint.create_client(
                raw,
                TypeDescriptor::of::<Req>(),
                TypeDescriptor::of::<Rep>(),
                &resolution,
            )?;
            Client::from_core(core)
        })
        .on_discard(release_discarded::<Req, Rep>)
        .observe(&inner);

        outer
    }

    /// [`Self::open_client`] 的便捷形式：空选项、默认解析上下文。
    pub fn open_service<Req, Rep>(
        &self,
        service_type: &str,
        group_name: &str,
    ) -> PendingHandle<Client<Req, Rep>>
    where
        Req: 'static,
        Rep: 'static,
    {
        self.open_service_with_options(service_type, group_name, OptionMap::empty())
    }

    /// [`Self::open_client`] 的便捷形式：默认解析上下文。
    pub fn open_service_with_options<Req, Rep>(
        &self,
        service_type: &str,
        group_name: &str,
        options: &OptionMap,
    ) -> PendingHandle<Client<Req, Rep>>
    where
        Req: 'static,
        Rep: 'static,
    {
        let resolution = self.inner.resolution.clone();
        self.open_client(service_type, group_name, &resolution, options)
    }

    /// 发布本地监听器，返回可递交给对端的客户端连接器。
    ///
    /// # 教案式说明
    /// - **意图 (Why)**：让对端能够调用本地监听器，同时以客户端上下文界定这次发布的生命周期；
    /// - **契约 (What)**：
    ///   - 上下文与连接共享执行器，并携带 `options` 供本地处理器读取；
    ///   - 上下文关闭即关闭本地处理器，即便连接器从未被激活；
    ///   - 连接已关闭或传输能力无法分配连接器时同步失败，此时新建的上下文与本地处理器均被关闭；
    /// - **执行 (How)**：关闭处理器在调用传输能力之前登记，失败路径只需关闭上下文即可回收一切。
    pub fn create_client_connector<Req, Rep>(
        &self,
        listener: Arc<dyn RequestListener<Req, Rep>>,
        options: &OptionMap,
    ) -> Result<ClientConnector<Req, Rep>>
    where
        Req: 'static,
        Rep: 'static,
    {
        if self.is_closed() {
            return Err(RemotingError::connector_allocation(format!(
                "{self} is closed"
            )));
        }

        let context = ClientContext::new(
            Arc::downgrade(&self.inner),
            Arc::clone(self.executor()),
            options.clone(),
        );
        let local = match self.inner.endpoint.create_local_request_handler(
            ErasedListener::new(listener),
            &context,
            TypeDescriptor::of::<Req>(),
            TypeDescriptor::of::<Rep>(),
        ) {
            Ok(local) => local,
            Err(error) => {
                discard_context(&context);
                return Err(error);
            }
        };

        let closing = Arc::clone(&local);
        context.add_close_handler(move || close_local_handler(&*closing));

        match self.inner.handler.create_connector(local) {
            Ok(connector) => {
                debug!(connection = %self.inner.name, "client connector created");
                Ok(ClientConnector::new(
                    connector,
                    Arc::clone(&self.inner.endpoint),
                    context,
                ))
            }
            Err(error) => {
                debug!(
                    connection = %self.inner.name,
                    code = error.code(),
                    "connector allocation failed"
                );
                discard_context(&context);
                Err(error)
            }
        }
    }

    /// [`Self::create_client_connector`] 的便捷形式：空选项。
    pub fn create_client_connector_default<Req, Rep>(
        &self,
        listener: Arc<dyn RequestListener<Req, Rep>>,
    ) -> Result<ClientConnector<Req, Rep>>
    where
        Req: 'static,
        Rep: 'static,
    {
        self.create_client_connector(listener, OptionMap::empty())
    }

    /// 登记关闭处理器；连接已关闭时立即在执行器上运行并返回 `None`。
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

    /// 关闭连接。
    ///
    /// - 传输能力的 `close` 恰好被调用一次，重复调用为无操作；
    /// - 传输关闭失败时错误返回给调用者，连接仍视为已关闭；
    /// - 不会关闭由本连接派生的客户端上下文与本地处理器。
    pub fn close(&self) -> Result<()> {
        self.inner.lifecycle.close(|| {
            let result = self.inner.handler.close();
            match &result {
                Ok(()) => debug!(connection = %self.inner.name, "connection closed"),
                Err(error) => warn!(
                    connection = %self.inner.name,
                    code = error.code(),
                    error = %error,
                    "transport close failed"
                ),
            }
            result
        })
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lifecycle.phase() != LifecyclePhase::Open
    }
}

fn close_local_handler(local: &dyn LocalRequestHandler) {
    if let Err(error) = local.close() {
        warn!(
            code = error.code(),
            error = %error,
            "failed to close local request handler"
        );
    }
}

fn release_discarded<Req, Rep>(discarded: Discarded<RawRemoteHandler, Client<Req, Rep>>)
where
    Req: 'static,
    Rep: 'static,
{
    let result = match discarded {
        Discarded::Input(raw) => raw.close(),
        Discarded::Output(client) => client.close(),
    };
    match result {
        Ok(()) => debug!("released remote handler negotiated after cancellation"),
        Err(error) => warn!(
            code = error.code(),
            error = %error,
            "failed to release remote handler negotiated after cancellation"
        ),
    }
}

fn discard_context(context: &ClientContext) {
    if let Err(error) = context.close() {
        warn!(
            code = error.code(),
            error = %error,
            "failed to close client context"
        );
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Connection to {}", self.inner.name)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.inner.name)
            .field("attachments", &self.inner.attachments)
            .field("resolution", &self.inner.resolution)
            .field("lifecycle", &self.inner.lifecycle)
            .field("executor", &ExecutorRef(self.executor()))
            .finish()
    }
}
