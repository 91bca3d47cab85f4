//! # 外部协作者契约（SPI）
//!
//! ## 模块定位（Why）
//! - 连接层夹在两个外部能力之间：下方是承载线路协议的传输能力（[`ConnectionHandler`]），
//!   上方是负责服务注册与编解码的 [`Endpoint`]；
//! - 本模块只定义二者在边界上的最小接口，连接层对其内部实现一无所知。
//!
//! ## 契约要点（What）
//! - [`ConnectionHandler::open`] 显式返回“取消动作 + 挂起句柄”二元组，取消与结果各走各的通道；
//! - [`ConnectionHandlerFactory`] 在每个连接构造时恰好调用一次，产出的传输能力由连接独占；
//! - [`Endpoint`] 接收运行期 [`TypeDescriptor`]，负责核对服务端声明的类型；
//!   当构造客户端失败时，原始远端处理器由 Endpoint 负责释放。

use std::{any::Any, fmt, sync::Arc};

use crate::{
    client::ClientCore,
    context::ClientContext,
    error::Result,
    executor::{Executor, ExecutorRef},
    options::{OptionMap, UnknownOptionPolicy},
    pending::{CancelAction, PendingHandle},
    types::{ResolutionContext, TypeDescriptor},
};

/// 传输层给出的未类型化远端处理器。
pub trait RemoteRequestHandler: Send + Sync + 'static {
    /// 释放远端绑定；重复调用应为无操作。
    fn close(&self) -> Result<()>;
}

/// 未类型化远端处理器的共享引用。
pub type RawRemoteHandler = Arc<dyn RemoteRequestHandler>;

/// 包装本地监听器、可被远端调用的本地处理器。
pub trait LocalRequestHandler: Send + Sync + 'static {
    /// 停止接受远端请求并释放监听器。
    fn close(&self) -> Result<()>;
}

/// 传输能力为本地处理器分配的连接器。
///
/// 连接器是“可递交给对端的凭据”；激活后得到指向本地处理器的远端处理器，
/// 供 Endpoint 构造类型化客户端。
pub trait RequestHandlerConnector: Send + Sync + 'static {
    /// 激活连接器。
    fn activate(&self) -> Result<RawRemoteHandler>;
}

/// 传输能力。
///
/// # 教案式说明
/// - **意图 (Why)**：把线路协议、重传与认证完全隔离在连接层之外；
/// - **契约 (What)**：
///   - `open`：立即开始打开服务并返回，不得阻塞；取消动作需幂等、非阻塞；
///   - `create_connector`：同步分配连接器，连接正在关闭等情况下返回错误；
///   - `close`：由所属连接恰好调用一次；非正常关闭返回 I/O 类错误；
/// - **风险 (Trade-offs)**：`open` 返回的句柄若被传输层提前丢弃生产方，
///   消费方会观察到 `Abandoned` 失败而不是永久挂起。
pub trait ConnectionHandler: Send + Sync + 'static {
    fn open(
        &self,
        service_type: &str,
        group_name: &str,
        resolution: &ResolutionContext,
        options: &OptionMap,
    ) -> (CancelAction, PendingHandle<RawRemoteHandler>);

    fn create_connector(
        &self,
        local: Arc<dyn LocalRequestHandler>,
    ) -> Result<Arc<dyn RequestHandlerConnector>>;

    fn close(&self) -> Result<()>;
}

/// Provider 上下文：连接在构造时获得的环境参数。
///
/// - `resolution`：便捷重载使用的默认类型解析上下文；
/// - `option_policy`：传输能力对未知选项名称的处理策略。
#[derive(Clone, Debug, Default)]
pub struct ConnectionProviderContext {
    resolution: ResolutionContext,
    option_policy: UnknownOptionPolicy,
}

impl ConnectionProviderContext {
    pub fn new(resolution: ResolutionContext) -> Self {
        Self {
            resolution,
            option_policy: UnknownOptionPolicy::default(),
        }
    }

    /// 替换未知选项策略。
    pub fn with_option_policy(mut self, policy: UnknownOptionPolicy) -> Self {
        self.option_policy = policy;
        self
    }

    pub fn resolution(&self) -> &ResolutionContext {
        &self.resolution
    }

    pub fn option_policy(&self) -> UnknownOptionPolicy {
        self.option_policy
    }
}

/// 传递给 [`ConnectionHandlerFactory`] 的构造参数。
#[derive(Clone)]
pub struct ConnectionHandlerContext {
    connection_name: Arc<str>,
    executor: Arc<dyn Executor>,
    provider: ConnectionProviderContext,
}

impl ConnectionHandlerContext {
    pub(crate) fn new(
        connection_name: Arc<str>,
        executor: Arc<dyn Executor>,
        provider: ConnectionProviderContext,
    ) -> Self {
        Self {
            connection_name,
            executor,
            provider,
        }
    }

    /// 所属连接的展示名。
    pub fn connection_name(&self) -> &str {
        &self.connection_name
    }

    /// 连接共享的执行器，传输能力应以它创建挂起句柄。
    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    pub fn provider(&self) -> &ConnectionProviderContext {
        &self.provider
    }
}

impl fmt::Debug for ConnectionHandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandlerContext")
            .field("connection_name", &self.connection_name)
            .field("executor", &ExecutorRef(&self.executor))
            .field("provider", &self.provider)
            .finish()
    }
}

/// 传输能力工厂，每个连接恰好调用一次。
pub trait ConnectionHandlerFactory {
    fn create_instance(&self, context: ConnectionHandlerContext)
    -> Result<Box<dyn ConnectionHandler>>;
}

impl<F> ConnectionHandlerFactory for F
where
    F: Fn(ConnectionHandlerContext) -> Result<Box<dyn ConnectionHandler>>,
{
    fn create_instance(
        &self,
        context: ConnectionHandlerContext,
    ) -> Result<Box<dyn ConnectionHandler>> {
        self(context)
    }
}

/// Endpoint：类型化客户端与本地处理器包装的工厂。
///
/// # 契约说明（What）
/// - `executor`：连接及其派生的上下文、句柄共享的执行器；
/// - `create_client`：以原始远端处理器构造客户端核心；失败时须自行释放 `raw`；
/// - `create_local_request_handler`：把监听器包装为本地处理器，并与 `context` 绑定。
pub trait Endpoint: Send + Sync + 'static {
    fn executor(&self) -> Arc<dyn Executor>;

    fn create_client(
        &self,
        raw: RawRemoteHandler,
        request: TypeDescriptor,
        reply: TypeDescriptor,
        resolution: &ResolutionContext,
    ) -> Result<ClientCore>;

    fn create_local_request_handler(
        &self,
        listener: ErasedListener,
        context: &ClientContext,
        request: TypeDescriptor,
        reply: TypeDescriptor,
    ) -> Result<Arc<dyn LocalRequestHandler>>;
}

/// 本地请求监听器。
pub trait RequestListener<Req, Rep>: Send + Sync + 'static {
    /// 处理一条远端请求。
    fn handle_request(&self, context: &ClientContext, request: Req) -> Result<Rep>;

    /// 本地处理器关闭时的通知，默认忽略。
    fn handle_close(&self) {}
}

/// 擦除了请求/应答类型的监听器，交由 Endpoint 依据描述符还原。
///
/// # 执行逻辑（How）
/// - 内部保存 `Arc<dyn RequestListener<Req, Rep>>` 的 `Any` 包装，`downcast` 以相同的类型参数取回；
/// - 另存一个类型无关的关闭钩子，使 Endpoint 不还原类型也能转发 `handle_close`。
#[derive(Clone)]
pub struct ErasedListener {
    listener: Arc<dyn Any + Send + Sync>,
    close_hook: Arc<dyn Fn() + Send + Sync>,
    request: TypeDescriptor,
    reply: TypeDescriptor,
}

impl ErasedListener {
    pub fn new<Req: 'static, Rep: 'static>(listener: Arc<dyn RequestListener<Req, Rep>>) -> Self {
        let hook_target = Arc::clone(&listener);
        Self {
            listener: Arc::new(listener),
            close_hook: Arc::new(move || hook_target.handle_close()),
            request: TypeDescriptor::of::<Req>(),
            reply: TypeDescriptor::of::<Rep>(),
        }
    }

    /// 还原类型化监听器；类型参数不匹配时返回 `None`。
    pub fn downcast<Req: 'static, Rep: 'static>(
        &self,
    ) -> Option<Arc<dyn RequestListener<Req, Rep>>> {
        self.listener
            .downcast_ref::<Arc<dyn RequestListener<Req, Rep>>>()
            .cloned()
    }

    /// 转发关闭通知。
    pub fn notify_close(&self) {
        (self.close_hook)()
    }

    pub fn request_type(&self) -> TypeDescriptor {
        self.request
    }

    pub fn reply_type(&self) -> TypeDescriptor {
        self.reply
    }
}

impl fmt::Debug for ErasedListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErasedListener")
            .field("request", &self.request)
            .field("reply", &self.reply)
            .finish_non_exhaustive()
    }
}
