//! 类型化远端客户端。
//!
//! Endpoint 只产出类型无关的 [`ClientCore`]；[`Client<Req, Rep>`] 在其上核对描述符并附加
//! 编译期类型参数。核对失败视为翻译失败，客户端核心随即被释放，调用方永远拿不到半成品。

use std::{
    fmt,
    marker::PhantomData,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use crate::{
    error::{RemotingError, Result},
    spi::RawRemoteHandler,
    types::TypeDescriptor,
};

/// Endpoint 构造出的客户端核心。
pub struct ClientCore {
    remote: RawRemoteHandler,
    request: TypeDescriptor,
    reply: TypeDescriptor,
    closed: AtomicBool,
}

impl ClientCore {
    pub fn new(remote: RawRemoteHandler, request: TypeDescriptor, reply: TypeDescriptor) -> Self {
        Self {
            remote,
            request,
            reply,
            closed: AtomicBool::new(false),
        }
    }

    pub fn remote_handler(&self) -> &RawRemoteHandler {
        &self.remote
    }

    pub fn request_type(&self) -> TypeDescriptor {
        self.request
    }

    pub fn reply_type(&self) -> TypeDescriptor {
        self.reply
    }

    /// 关闭远端绑定，仅首次调用生效。
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.remote.close()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ClientCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCore")
            .field("request", &self.request)
            .field("reply", &self.reply)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// 类型化客户端。
///
/// # 契约说明（What）
/// - 克隆共享同一核心，任一克隆关闭即整体关闭；
/// - `Req`/`Rep` 仅作为编译期标记，不要求可克隆或可发送。
pub struct Client<Req, Rep> {
    core: Arc<ClientCore>,
    _types: PhantomData<fn() -> (Req, Rep)>,
}

impl<Req: 'static, Rep: 'static> Client<Req, Rep> {
    /// 核对描述符并包装客户端核心。
    ///
    /// 描述符与 `Req`/`Rep` 不符时关闭核心并返回翻译错误。
    pub fn from_core(core: ClientCore) -> Result<Self> {
        if core.request.is::<Req>() && core.reply.is::<Rep>() {
            return Ok(Self {
                core: Arc::new(core),
                _types: PhantomData,
            });
        }
        let error = RemotingError::translation(
            TypeDescriptor::of::<Req>().name(),
            TypeDescriptor::of::<Rep>().name(),
            format!(
                "endpoint built a client for <{}, {}>",
                core.request, core.reply
            ),
        );
        if let Err(close_error) = core.close() {
            tracing::warn!(
                code = close_error.code(),
                error = %close_error,
                "failed to release mistyped client core"
            );
        }
        Err(error)
    }
}

impl<Req, Rep> Client<Req, Rep> {
    /// 客户端包装的原始远端处理器。
    pub fn remote_handler(&self) -> &RawRemoteHandler {
        &self.core.remote
    }

    pub fn request_type(&self) -> TypeDescriptor {
        self.core.request
    }

    pub fn reply_type(&self) -> TypeDescriptor {
        self.core.reply
    }

    /// 关闭客户端，幂等。
    pub fn close(&self) -> Result<()> {
        self.core.close()
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}

impl<Req, Rep> Clone for Client<Req, Rep> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            _types: PhantomData,
        }
    }
}

impl<Req, Rep> PartialEq for Client<Req, Rep> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl<Req, Rep> fmt::Debug for Client<Req, Rep> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Client").field(&self.core).finish()
    }
}
