//! 命名调优选项（OptionMap）。
//!
//! ## 设计目的（Why）
//! - `open_client` 与 `create_client_connector` 都接受一组开放式的命名选项（超时、缓冲等）；
//! - 选项集合对连接层不透明：连接层只负责转交，是否拒绝未知名称由传输能力的策略决定。
//!
//! ## 契约定义（What）
//! - [`OptionKey`] 把名称与文档化的默认值绑定，[`OptionMap::get`] 在缺省时回退到默认值；
//! - [`OptionMap`] 构造后不可变，克隆只增加引用计数。

use std::{
    borrow::Cow,
    collections::BTreeMap,
    fmt,
    marker::PhantomData,
    sync::{Arc, OnceLock},
    time::Duration,
};

use crate::error::{RemotingError, Result};

/// 选项取值。
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum OptionValue {
    Bool(bool),
    Integer(i64),
    Text(Cow<'static, str>),
    Duration(Duration),
}

impl OptionValue {
    fn type_label(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Text(_) => "text",
            Self::Duration(_) => "duration",
        }
    }
}

/// 可存入 [`OptionMap`] 的强类型值。
pub trait OptionType: Sized {
    /// 转换为通用取值。
    fn into_value(self) -> OptionValue;

    /// 从通用取值还原；类型不符时返回 `None`。
    fn from_value(value: &OptionValue) -> Option<Self>;
}

impl OptionType for bool {
    fn into_value(self) -> OptionValue {
        OptionValue::Bool(self)
    }

    fn from_value(value: &OptionValue) -> Option<Self> {
        match value {
            OptionValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl OptionType for i64 {
    fn into_value(self) -> OptionValue {
        OptionValue::Integer(self)
    }

    fn from_value(value: &OptionValue) -> Option<Self> {
        match value {
            OptionValue::Integer(v) => Some(*v),
            _ => None,
        }
    }
}

impl OptionType for Duration {
    fn into_value(self) -> OptionValue {
        OptionValue::Duration(self)
    }

    fn from_value(value: &OptionValue) -> Option<Self> {
        match value {
            OptionValue::Duration(v) => Some(*v),
            _ => None,
        }
    }
}

impl OptionType for Cow<'static, str> {
    fn into_value(self) -> OptionValue {
        OptionValue::Text(self)
    }

    fn from_value(value: &OptionValue) -> Option<Self> {
        match value {
            OptionValue::Text(v) => Some(v.clone()),
            _ => None,
        }
    }
}

/// 带默认值的强类型选项键。
///
/// # 契约说明（What）
/// - `name` 在同一 [`OptionMap`] 中唯一；
/// - `default` 为文档化默认值，在映射缺少该项或类型不符时使用。
pub struct OptionKey<T> {
    name: &'static str,
    default: fn() -> T,
    _marker: PhantomData<fn() -> T>,
}

impl<T> OptionKey<T> {
    /// 声明选项键。
    pub const fn new(name: &'static str, default: fn() -> T) -> Self {
        Self {
            name,
            default,
            _marker: PhantomData,
        }
    }

    /// 选项名称。
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// 文档化默认值。
    pub fn default_value(&self) -> T {
        (self.default)()
    }
}

impl<T> fmt::Debug for OptionKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OptionKey").field(&self.name).finish()
    }
}

/// 打开服务的超时时间，默认 30 秒。
pub const OPEN_TIMEOUT: OptionKey<Duration> =
    OptionKey::new("remoting.open_timeout", || Duration::from_secs(30));

/// 单条消息缓冲大小（字节），默认 8192。
pub const BUFFER_SIZE: OptionKey<i64> = OptionKey::new("remoting.buffer_size", || 8192);

/// 允许同时在途的入站消息数，默认 80。
pub const MAX_INBOUND_MESSAGES: OptionKey<i64> =
    OptionKey::new("remoting.max_inbound_messages", || 80);

/// 允许同时在途的出站消息数，默认 65535。
pub const MAX_OUTBOUND_MESSAGES: OptionKey<i64> =
    OptionKey::new("remoting.max_outbound_messages", || 65535);

/// 本 crate 文档化的全部选项名称。
pub const KNOWN_OPTIONS: &[&str] = &[
    OPEN_TIMEOUT.name(),
    BUFFER_SIZE.name(),
    MAX_INBOUND_MESSAGES.name(),
    MAX_OUTBOUND_MESSAGES.name(),
];

/// 未知选项名称的处理策略，由传输能力选择。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnknownOptionPolicy {
    /// 忽略未知名称（默认）。
    #[default]
    Ignore,
    /// 遇到未知名称即失败。
    Reject,
}

/// 不可变的命名选项集合。
#[derive(Clone, Default, PartialEq, Eq)]
pub struct OptionMap {
    entries: Arc<BTreeMap<Cow<'static, str>, OptionValue>>,
}

impl OptionMap {
    /// 空选项集合，所有选项取默认值。
    pub fn empty() -> &'static OptionMap {
        static EMPTY: OnceLock<OptionMap> = OnceLock::new();
        EMPTY.get_or_init(OptionMap::default)
    }

    /// 创建构建器。
    pub fn builder() -> OptionMapBuilder {
        OptionMapBuilder::default()
    }

    /// 读取强类型选项，缺省或类型不符时回退到默认值。
    pub fn get<T: OptionType>(&self, key: &OptionKey<T>) -> T {
        self.try_get(key)
            .ok()
            .flatten()
            .unwrap_or_else(|| key.default_value())
    }

    /// 读取强类型选项；缺省返回 `Ok(None)`，类型不符返回错误。
    pub fn try_get<T: OptionType>(&self, key: &OptionKey<T>) -> Result<Option<T>> {
        match self.entries.get(key.name()) {
            None => Ok(None),
            Some(value) => T::from_value(value).map(Some).ok_or_else(|| {
                RemotingError::InvalidOption {
                    name: key.name().to_owned(),
                    detail: format!("unexpected {} value", value.type_label()),
                }
            }),
        }
    }

    /// 读取原始取值。
    pub fn raw(&self, name: &str) -> Option<&OptionValue> {
        self.entries.get(name)
    }

    /// 是否包含指定名称。
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// 选项数量。
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空。
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 按名称顺序遍历。
    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.entries.iter().map(|(k, v)| (k.as_ref(), v))
    }

    /// 按策略校验未知名称。
    ///
    /// # 契约说明（What）
    /// - `known`：传输能力认可的名称集合；
    /// - `Ignore` 策略下总是成功；`Reject` 策略下返回第一个未知名称对应的错误。
    pub fn validate(&self, known: &[&str], policy: UnknownOptionPolicy) -> Result<()> {
        if policy == UnknownOptionPolicy::Ignore {
            return Ok(());
        }
        match self.entries.keys().find(|name| !known.contains(&name.as_ref())) {
            Some(name) => Err(RemotingError::InvalidOption {
                name: name.to_string(),
                detail: "unrecognized option name".to_owned(),
            }),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for OptionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

/// [`OptionMap`] 构建器。
#[derive(Debug, Default)]
pub struct OptionMapBuilder {
    entries: BTreeMap<Cow<'static, str>, OptionValue>,
}

impl OptionMapBuilder {
    /// 设置强类型选项，重复设置时以最后一次为准。
    pub fn set<T: OptionType>(mut self, key: &OptionKey<T>, value: T) -> Self {
        self.entries
            .insert(Cow::Borrowed(key.name()), value.into_value());
        self
    }

    /// 设置任意命名选项，用于传输能力私有的扩展名称。
    pub fn set_raw(mut self, name: impl Into<Cow<'static, str>>, value: OptionValue) -> Self {
        self.entries.insert(name.into(), value);
        self
    }

    /// 生成不可变选项集合。
    pub fn build(self) -> OptionMap {
        OptionMap {
            entries: Arc::new(self.entries),
        }
    }
}
