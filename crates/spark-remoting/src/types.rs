//! 运行时类型描述与类型解析上下文。
//!
//! 连接层在 API 边界使用泛型参数保证编译期类型安全，同时把 [`TypeDescriptor`] 作为运行期值
//! 原样转交给 Endpoint 做兼容性校验；连接层自身从不解读描述符内容。

use std::{
    any::{Any, TypeId, type_name},
    borrow::Cow,
    fmt,
    sync::Arc,
};

/// 请求/应答类型的运行期描述符。
///
/// # 契约说明（What）
/// - `id` 为 [`TypeId`]，用于精确比较；`name` 为 [`type_name`] 文本，仅用于诊断输出；
/// - 描述符不会在线路上传输，两端的比较由 Endpoint 依据自身的服务注册信息完成。
#[derive(Clone, Copy)]
pub struct TypeDescriptor {
    id: TypeId,
    name: &'static str,
}

impl TypeDescriptor {
    /// 生成类型 `T` 的描述符。
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    /// 类型唯一标识。
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// 类型名称，仅供诊断。
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 判断描述符是否对应类型 `T`。
    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl PartialEq for TypeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeDescriptor {}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// 类型解析上下文，帮助 Endpoint 在构造客户端时消解有歧义的类型。
///
/// # 设计背景（Why）
/// - 连接层绝不通过线程局部或全局查找推导解析上下文；调用方要么显式传入，
///   要么使用连接在构造时从 Provider 上下文获得的默认值；
/// - 上下文对连接层是不透明的：`label` 用于日志，`payload` 交由 Endpoint 自行 downcast。
#[derive(Clone)]
pub struct ResolutionContext {
    label: Cow<'static, str>,
    payload: Option<Arc<dyn Any + Send + Sync>>,
}

impl ResolutionContext {
    /// 构造只带标签的上下文。
    pub fn new(label: impl Into<Cow<'static, str>>) -> Self {
        Self {
            label: label.into(),
            payload: None,
        }
    }

    /// 附带 Endpoint 专属的解析载荷。
    pub fn with_payload(mut self, payload: Arc<dyn Any + Send + Sync>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// 上下文标签。
    pub fn label(&self) -> &str {
        &self.label
    }

    /// 以类型 `T` 读取解析载荷。
    pub fn payload<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.payload.as_deref().and_then(|p| p.downcast_ref::<T>())
    }
}

impl Default for ResolutionContext {
    fn default() -> Self {
        Self::new("default")
    }
}

impl fmt::Debug for ResolutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolutionContext")
            .field("label", &self.label)
            .field("payload", &self.payload.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptors_compare_by_type_identity() {
        let a = TypeDescriptor::of::<String>();
        assert_eq!(a, TypeDescriptor::of::<String>());
        assert_ne!(a, TypeDescriptor::of::<u32>());
        assert!(a.is::<String>());
        assert!(a.name().ends_with("String"));
    }

    #[test]
    fn resolution_payload_downcasts() {
        let ctx = ResolutionContext::new("plugin-a").with_payload(Arc::new(7_u16));
        assert_eq!(ctx.payload::<u16>(), Some(&7));
        assert_eq!(ctx.payload::<u32>(), None);
        assert_eq!(ctx.label(), "plugin-a");
    }
}
