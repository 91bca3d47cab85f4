//! 客户端连接器：`create_client_connector` 的返回值。
//!
//! 连接器把“已发布的本地处理器”递交给需要它的一方；激活后可通过 Endpoint 构造指向该处理器的
//! 类型化客户端。连接器的有效期受其客户端上下文约束，上下文关闭后不可再激活。

use std::{fmt, marker::PhantomData, sync::Arc};

use crate::{
    client::Client,
    context::ClientContext,
    error::{RemotingError, Result},
    spi::{Endpoint, RequestHandlerConnector},
    types::{ResolutionContext, TypeDescriptor},
};

/// 本地处理器发布结果。
pub struct ClientConnector<Req, Rep> {
    connector: Arc<dyn RequestHandlerConnector>,
    endpoint: Arc<dyn Endpoint>,
    context: ClientContext,
    _types: PhantomData<fn() -> (Req, Rep)>,
}

impl<Req: 'static, Rep: 'static> ClientConnector<Req, Rep> {
    pub(crate) fn new(
        connector: Arc<dyn RequestHandlerConnector>,
        endpoint: Arc<dyn Endpoint>,
        context: ClientContext,
    ) -> Self {
        Self {
            connector,
            endpoint,
            context,
            _types: PhantomData,
        }
    }

    /// 激活连接器并构造类型化客户端。
    ///
    /// # 契约说明（What）
    /// - 上下文已关闭时返回 [`RemotingError::Closed`]，不触碰传输能力；
    /// - 激活或 Endpoint 构造失败时原样返回其错误；
    /// - 描述符核对失败时返回翻译错误，已构造的客户端核心被释放。
    pub fn client(&self, resolution: &ResolutionContext) -> Result<Client<Req, Rep>> {
        if self.context.is_closed() {
            return Err(RemotingError::closed("client context"));
        }
        let raw = self.connector.activate()?;
        let core = self.endpoint.create_client(
            raw,
            TypeDescriptor::of::<Req>(),
            TypeDescriptor::of::<Rep>(),
            resolution,
        )?;
        Client::from_core(core)
    }
}

impl<Req, Rep> ClientConnector<Req, Rep> {
    /// 传输能力分配的连接器对象。
    pub fn connector(&self) -> &Arc<dyn RequestHandlerConnector> {
        &self.connector
    }

    /// 约束本连接器有效期的客户端上下文。
    pub fn client_context(&self) -> &ClientContext {
        &self.context
    }
}

impl<Req, Rep> Clone for ClientConnector<Req, Rep> {
    fn clone(&self) -> Self {
        Self {
            connector: Arc::clone(&self.connector),
            endpoint: Arc::clone(&self.endpoint),
            context: self.context.clone(),
            _types: PhantomData,
        }
    }
}

impl<Req: 'static, Rep: 'static> fmt::Debug for ClientConnector<Req, Rep> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnector")
            .field("request", &TypeDescriptor::of::<Req>())
            .field("reply", &TypeDescriptor::of::<Rep>())
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}
