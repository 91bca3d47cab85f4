//! 测试桩：可记录调用、可延迟决议的传输能力与 Endpoint。
//!
//! # 设计说明
//! - 桩对象以 `Arc` 共享内部状态，交给连接的是克隆，测试代码保留另一份用于断言与驱动；
//! - [`MockConnectionHandler`] 的 `open` 默认不立即决议，由测试调用 [`MockConnectionHandler::resolve_next`]
//!   等方法按需推进，以覆盖“等待中取消”“延迟成功”等时序；
//! - 这些实现只满足契约所需的最小行为，不模拟任何线路协议。

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use parking_lot::Mutex;

use crate::{
    client::ClientCore,
    context::ClientContext,
    error::{RemotingError, Result},
    executor::{Executor, InlineExecutor},
    options::{KNOWN_OPTIONS, OptionMap, UnknownOptionPolicy},
    pending::{self, CancelAction, Completer, PendingHandle},
    spi::{
        ConnectionHandler, ConnectionHandlerContext, ConnectionHandlerFactory, Endpoint,
        ErasedListener, LocalRequestHandler, RawRemoteHandler, RemoteRequestHandler,
        RequestHandlerConnector, RequestListener,
    },
    types::{ResolutionContext, TypeDescriptor},
};

/// 记录关闭次数的远端处理器。
#[derive(Debug)]
pub struct MockRemoteHandler {
    label: String,
    closes: AtomicUsize,
}

impl MockRemoteHandler {
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            closes: AtomicUsize::new(0),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl RemoteRequestHandler for MockRemoteHandler {
    fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 一次 `open` 调用的记录。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenRecord {
    pub service_type: String,
    pub group_name: String,
    pub resolution: String,
}

#[derive(Default)]
struct TransportState {
    executor: Mutex<Option<Arc<dyn Executor>>>,
    policy: Mutex<UnknownOptionPolicy>,
    opens: Mutex<Vec<OpenRecord>>,
    pending: Mutex<VecDeque<Completer<RawRemoteHandler>>>,
    cancels: AtomicUsize,
    closes: AtomicUsize,
    instances: AtomicUsize,
    connectors: AtomicUsize,
    activations: AtomicUsize,
    refuse_connectors: AtomicBool,
    close_error: Mutex<Option<RemotingError>>,
}

/// 可记录、可延迟决议的传输能力。
#[derive(Clone, Default)]
pub struct MockConnectionHandler {
    state: Arc<TransportState>,
}

impl MockConnectionHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以本桩为产物的工厂；工厂记录执行器与未知选项策略。
    pub fn factory(&self) -> impl ConnectionHandlerFactory + use<> {
        let this = self.clone();
        move |context: ConnectionHandlerContext| -> Result<Box<dyn ConnectionHandler>> {
            this.state.instances.fetch_add(1, Ordering::SeqCst);
            *this.state.executor.lock() = Some(Arc::clone(context.executor()));
            *this.state.policy.lock() = context.provider().option_policy();
            Ok(Box::new(this.clone()))
        }
    }

    /// 以成功值决议最早一个仍在等待的 `open`。
    pub fn resolve_next(&self, raw: RawRemoteHandler) -> bool {
        self.take_pending()
            .is_some_and(|completer| completer.succeed(raw))
    }

    /// 以失败决议最早一个仍在等待的 `open`。
    pub fn fail_next(&self, error: RemotingError) -> bool {
        self.take_pending()
            .is_some_and(|completer| completer.fail(error))
    }

    fn take_pending(&self) -> Option<Completer<RawRemoteHandler>> {
        let mut pending = self.state.pending.lock();
        while let Some(completer) = pending.pop_front() {
            if !completer.status().is_terminal() {
                return Some(completer);
            }
        }
        None
    }

    /// 让后续 `create_connector` 失败。
    pub fn refuse_connectors(&self, refuse: bool) {
        self.state.refuse_connectors.store(refuse, Ordering::SeqCst);
    }

    /// 让 `close` 返回给定错误。
    pub fn fail_close_with(&self, error: RemotingError) {
        *self.state.close_error.lock() = Some(error);
    }

    pub fn opens(&self) -> Vec<OpenRecord> {
        self.state.opens.lock().clone()
    }

    pub fn open_count(&self) -> usize {
        self.state.opens.lock().len()
    }

    pub fn cancel_count(&self) -> usize {
        self.state.cancels.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn instance_count(&self) -> usize {
        self.state.instances.load(Ordering::SeqCst)
    }

    pub fn connector_count(&self) -> usize {
        self.state.connectors.load(Ordering::SeqCst)
    }

    /// 由本传输能力分配的连接器累计被激活的次数。
    pub fn activation_count(&self) -> usize {
        self.state.activations.load(Ordering::SeqCst)
    }

    fn executor(&self) -> Arc<dyn Executor> {
        self.state
            .executor
            .lock()
            .clone()
            .unwrap_or_else(|| Arc::new(InlineExecutor))
    }
}

impl ConnectionHandler for MockConnectionHandler {
    fn open(
        &self,
        service_type: &str,
        group_name: &str,
        resolution: &ResolutionContext,
        options: &OptionMap,
    ) -> (CancelAction, PendingHandle<RawRemoteHandler>) {
        self.state.opens.lock().push(OpenRecord {
            service_type: service_type.to_owned(),
            group_name: group_name.to_owned(),
            resolution: resolution.label().to_owned(),
        });
        let executor = self.executor();
        let noop: CancelAction = Box::new(|| {});

        if let Err(error) = options.validate(KNOWN_OPTIONS, *self.state.policy.lock()) {
            return (noop, PendingHandle::failed(executor, error));
        }

        let (completer, handle) = pending::channel(executor);
        self.state.pending.lock().push_back(completer);
        let state = Arc::downgrade(&self.state);
        let cancel: CancelAction = Box::new(move || {
            if let Some(state) = state.upgrade() {
                state.cancels.fetch_add(1, Ordering::SeqCst);
            }
        });
        (cancel, handle)
    }

    fn create_connector(
        &self,
        local: Arc<dyn LocalRequestHandler>,
    ) -> Result<Arc<dyn RequestHandlerConnector>> {
        if self.state.refuse_connectors.load(Ordering::SeqCst) {
            return Err(RemotingError::connector_allocation("transport is closing"));
        }
        self.state.connectors.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockConnector {
            local,
            state: Arc::clone(&self.state),
        }))
    }

    fn close(&self) -> Result<()> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        match self.state.close_error.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// 激活后返回“指向本地处理器”的远端处理器。
pub struct MockConnector {
    local: Arc<dyn LocalRequestHandler>,
    state: Arc<TransportState>,
}

impl RequestHandlerConnector for MockConnector {
    fn activate(&self) -> Result<RawRemoteHandler> {
        self.state.activations.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(LoopbackRemote {
            _local: Arc::clone(&self.local),
        }))
    }
}

struct LoopbackRemote {
    _local: Arc<dyn LocalRequestHandler>,
}

impl RemoteRequestHandler for LoopbackRemote {
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// 记录关闭并转发监听器关闭通知的本地处理器。
#[derive(Debug)]
pub struct RecordingLocalHandler {
    listener: ErasedListener,
    request: TypeDescriptor,
    reply: TypeDescriptor,
    closes: AtomicUsize,
}

impl RecordingLocalHandler {
    /// 以监听器处理一条请求，类型参数需与发布时一致。
    pub fn invoke<Req: 'static, Rep: 'static>(
        &self,
        context: &ClientContext,
        request: Req,
    ) -> Result<Rep> {
        if self.is_closed() {
            return Err(RemotingError::closed("local request handler"));
        }
        let listener = self.listener.downcast::<Req, Rep>().ok_or_else(|| {
            RemotingError::translation(
                TypeDescriptor::of::<Req>().name(),
                TypeDescriptor::of::<Rep>().name(),
                format!("listener serves <{}, {}>", self.request, self.reply),
            )
        })?;
        listener.handle_request(context, request)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }
}

impl LocalRequestHandler for RecordingLocalHandler {
    fn close(&self) -> Result<()> {
        if self.closes.fetch_add(1, Ordering::SeqCst) == 0 {
            self.listener.notify_close();
        }
        Ok(())
    }
}

#[derive(Default)]
struct EndpointState {
    create_client_calls: AtomicUsize,
    released_raw: AtomicUsize,
    client_error: Mutex<Option<RemotingError>>,
    local_error: Mutex<Option<RemotingError>>,
    reply_override: Mutex<Option<TypeDescriptor>>,
    local_handlers: Mutex<Vec<Arc<RecordingLocalHandler>>>,
    before_client: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

/// 记录调用的 Endpoint。
#[derive(Clone)]
pub struct MockEndpoint {
    executor: Arc<dyn Executor>,
    state: Arc<EndpointState>,
}

impl MockEndpoint {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
            state: Arc::default(),
        }
    }

    /// 让后续 `create_client` 失败；失败时按契约释放原始远端处理器。
    pub fn fail_clients_with(&self, error: RemotingError) {
        *self.state.client_error.lock() = Some(error);
    }

    /// 让后续 `create_local_request_handler` 失败。
    pub fn fail_local_handlers_with(&self, error: RemotingError) {
        *self.state.local_error.lock() = Some(error);
    }

    /// 构造客户端时谎报应答类型，用于覆盖描述符核对失败的路径。
    pub fn misreport_reply_type(&self, reply: TypeDescriptor) {
        *self.state.reply_override.lock() = Some(reply);
    }

    /// 在下一次 `create_client` 构造客户端之前运行 `hook`，用于模拟转换期间到达的取消。
    pub fn before_next_client(&self, hook: impl FnOnce() + Send + 'static) {
        *self.state.before_client.lock() = Some(Box::new(hook));
    }

    pub fn create_client_calls(&self) -> usize {
        self.state.create_client_calls.load(Ordering::SeqCst)
    }

    pub fn released_raw_handlers(&self) -> usize {
        self.state.released_raw.load(Ordering::SeqCst)
    }

    pub fn local_handlers(&self) -> Vec<Arc<RecordingLocalHandler>> {
        self.state.local_handlers.lock().clone()
    }
}

impl Default for MockEndpoint {
    fn default() -> Self {
        Self::new(Arc::new(InlineExecutor))
    }
}

impl Endpoint for MockEndpoint {
    fn executor(&self) -> Arc<dyn Executor> {
        Arc::clone(&self.executor)
    }

    fn create_client(
        &self,
        raw: RawRemoteHandler,
        request: TypeDescriptor,
        reply: TypeDescriptor,
        _resolution: &ResolutionContext,
    ) -> Result<ClientCore> {
        self.state.create_client_calls.fetch_add(1, Ordering::SeqCst);
        let hook = self.state.before_client.lock().take();
        if let Some(hook) = hook {
            hook();
        }
        if let Some(error) = self.state.client_error.lock().clone() {
            self.state.released_raw.fetch_add(1, Ordering::SeqCst);
            raw.close()?;
            return Err(error);
        }
        let reply = self.state.reply_override.lock().as_ref().copied().unwrap_or(reply);
        Ok(ClientCore::new(raw, request, reply))
    }

    fn create_local_request_handler(
        &self,
        listener: ErasedListener,
        _context: &ClientContext,
        request: TypeDescriptor,
        reply: TypeDescriptor,
    ) -> Result<Arc<dyn LocalRequestHandler>> {
        if let Some(error) = self.state.local_error.lock().clone() {
            return Err(error);
        }
        let local = Arc::new(RecordingLocalHandler {
            listener,
            request,
            reply,
            closes: AtomicUsize::new(0),
        });
        self.state.local_handlers.lock().push(Arc::clone(&local));
        Ok(local)
    }
}

/// 原样回显请求的监听器。
#[derive(Debug, Default)]
pub struct EchoListener {
    requests: AtomicUsize,
    closed: AtomicBool,
}

impl EchoListener {
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl RequestListener<String, String> for EchoListener {
    fn handle_request(&self, _context: &ClientContext, request: String) -> Result<String> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(request)
    }

    fn handle_close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
