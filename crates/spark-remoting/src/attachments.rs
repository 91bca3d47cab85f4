//! # 附件存储（Attachments）
//!
//! ## 角色定位（Why）
//! - 连接上的旁路元数据（认证主体、统计、插件私有状态等）需要一个与连接同寿命的存放处；
//! - 键是不透明的强类型 [`AttachmentKey<T>`]：取值无需调用方做 downcast，也不会与其他插件的键冲突。
//!
//! ## 契约（What）
//! - `get` / `put` / `remove` 线程安全，可在任意回调中并发调用；
//! - 无淘汰、无容量上限、无过期；条目随所属连接一起释放。
//!
//! ## 实现（How）
//! - 底层为 `DashMap<u64, Arc<dyn Any + Send + Sync>>`，键 ID 由全局单调计数器分配；
//! - 值以 `Arc<T>` 形式交还，读取方无需持有分片锁。

use std::{
    any::Any,
    borrow::Cow,
    fmt,
    marker::PhantomData,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::{DashMap, mapref::entry::Entry};

type Slot = Arc<dyn Any + Send + Sync>;

static NEXT_KEY_ID: AtomicU64 = AtomicU64::new(1);

/// 附件键。
///
/// # 教案式说明
/// - **意图 (Why)**：以“键对象身份”而非字符串区分条目，防止不同模块意外共享同名键；
/// - **契约 (What)**：每次 [`AttachmentKey::new`] 都得到一个全新的键；克隆得到的是同一个键；
///   `name` 仅用于诊断输出；
/// - **风险 (Trade-offs)**：键通常以 `static`/`LazyLock` 或长寿命字段持有，丢失键即无法再读到对应条目。
pub struct AttachmentKey<T> {
    id: u64,
    name: Cow<'static, str>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> AttachmentKey<T> {
    /// 分配新键。
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            id: NEXT_KEY_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            _marker: PhantomData,
        }
    }

    /// 诊断名称。
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> Clone for AttachmentKey<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for AttachmentKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for AttachmentKey<T> {}

impl<T> fmt::Debug for AttachmentKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachmentKey")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

/// 连接作用域的附件存储。
#[derive(Default)]
pub struct Attachments {
    entries: DashMap<u64, Slot>,
}

impl Attachments {
    /// 创建空存储。
    pub fn new() -> Self {
        Self::default()
    }

    /// 读取附件。
    pub fn get<T: Any + Send + Sync>(&self, key: &AttachmentKey<T>) -> Option<Arc<T>> {
        let slot = self.entries.get(&key.id).map(|entry| Arc::clone(entry.value()))?;
        downcast(slot)
    }

    /// 写入附件并返回旧值。
    pub fn put<T: Any + Send + Sync>(&self, key: &AttachmentKey<T>, value: T) -> Option<Arc<T>> {
        self.entries
            .insert(key.id, Arc::new(value))
            .and_then(downcast)
    }

    /// 仅在缺省时写入。
    ///
    /// - **契约 (What)**：已存在时不覆盖，返回现有值；写入成功返回 `None`。
    pub fn put_if_absent<T: Any + Send + Sync>(
        &self,
        key: &AttachmentKey<T>,
        value: T,
    ) -> Option<Arc<T>> {
        match self.entries.entry(key.id) {
            Entry::Occupied(occupied) => downcast(Arc::clone(occupied.get())),
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(value));
                None
            }
        }
    }

    /// 移除附件并返回其值。
    pub fn remove<T: Any + Send + Sync>(&self, key: &AttachmentKey<T>) -> Option<Arc<T>> {
        self.entries.remove(&key.id).and_then(|(_, slot)| downcast(slot))
    }

    pub fn contains<T>(&self, key: &AttachmentKey<T>) -> bool {
        self.entries.contains_key(&key.id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 清空全部附件。
    pub fn clear(&self) {
        self.entries.clear();
    }
}

fn downcast<T: Any + Send + Sync>(slot: Slot) -> Option<Arc<T>> {
    slot.downcast::<T>().ok()
}

impl fmt::Debug for Attachments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachments")
            .field("len", &self.entries.len())
            .finish()
    }
}
