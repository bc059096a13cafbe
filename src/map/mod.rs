//! Open-addressing hash map with lock-free reads.
//!
//! The current [`MapTable`] is reached through an atomic pointer. Readers look keys up
//! in that table from inside a read section. The writer (serialized by an internal
//! mutex) builds every entry in full before swapping it into its slot, retires
//! replaced and erased entries through the domain, and replaces the whole table
//! when the load factor would pass 0.75.
//!
//! 读操作无锁的开放寻址哈希映射。
//! 当前 [`MapTable`] 通过原子指针访问。读者在读区段内在该表中查找键。
//! 写入者（由内部互斥锁串行化）先完整构建每个条目，再将其换入槽位；
//! 被替换和擦除的条目通过域退休，当负载因子将超过 0.75 时整体替换表。

mod slot;
mod table;

pub use table::{Iter, MapTable};

use crate::domain::RcuDomain;
use crate::error::RcuError;
use crate::reader::ReadGuard;
use crate::sync::{AtomicPtr, Mutex, Ordering};
use slot::Entry;
use std::borrow::Borrow;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;

/// Requested capacity of the first table; rounded up to a prime.
pub(crate) const INITIAL_CAPACITY: usize = 8;

/// Whether one more entry would push the load factor past 3/4.
#[inline]
fn exceeds_max_load(len: usize, capacity: usize) -> bool {
    len.saturating_add(1).saturating_mul(4) > capacity.saturating_mul(3)
}

/// A hash map whose readers never block.
///
/// # Example
/// ```
/// use swmr_rcu::{RcuDomain, RcuMap};
///
/// let domain = RcuDomain::builder().purge_period(None).build().unwrap();
/// let map = RcuMap::new(&domain);
///
/// map.insert("answer", 42);
///
/// let guard = domain.enter();
/// assert_eq!(map.find("answer", &guard), Some(&42));
/// assert!(map.at("question", &guard).is_err());
/// ```
///
/// 读者永不阻塞的哈希映射。
pub struct RcuMap<K, V, S = RandomState> {
    domain: RcuDomain,
    current: AtomicPtr<MapTable<K, V, S>>,
    writer: Mutex<()>,
    _marker: PhantomData<Box<MapTable<K, V, S>>>,
}

// SAFETY: readers on any thread share `&K`/`&V`; retired entries and tables are
// dropped on whichever thread runs the purge.
unsafe impl<K: Send + Sync, V: Send + Sync, S: Send + Sync> Send for RcuMap<K, V, S> {}
unsafe impl<K: Send + Sync, V: Send + Sync, S: Send + Sync> Sync for RcuMap<K, V, S> {}

impl<K, V> RcuMap<K, V, RandomState>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Create an empty map whose retired entries go through `domain`.
    pub fn new(domain: &RcuDomain) -> Self {
        Self::with_hasher(domain, RandomState::new())
    }

    pub fn with_capacity(domain: &RcuDomain, capacity: usize) -> Self {
        Self::with_capacity_and_hasher(domain, capacity, RandomState::new())
    }
}

impl<K, V, S> RcuMap<K, V, S>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: BuildHasher + Send + Sync + 'static,
{
    pub fn with_hasher(domain: &RcuDomain, hash_builder: S) -> Self {
        Self::with_capacity_and_hasher(domain, INITIAL_CAPACITY, hash_builder)
    }

    pub fn with_capacity_and_hasher(domain: &RcuDomain, capacity: usize, hash_builder: S) -> Self {
        let table = MapTable::with_capacity_and_hasher(capacity, hash_builder);

        Self {
            domain: domain.clone(),
            current: AtomicPtr::new(Box::into_raw(Box::new(table))),
            writer: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    /// Snapshot of the current table, valid for as long as `guard` is held.
    ///
    /// Iterate the snapshot, not the handle: the handle may publish a new table at any time.
    ///
    /// 当前表的快照，在持有 `guard` 期间有效。
    /// 迭代快照而不是句柄：句柄随时可能发布新表。
    #[inline]
    pub fn get<'g>(&'g self, guard: &'g ReadGuard<'_>) -> &'g MapTable<K, V, S> {
        debug_assert!(
            guard.domain().same_domain(&self.domain),
            "read guard belongs to a different RCU domain"
        );

        // SAFETY: tables are retired only after being swapped out, and the guard keeps
        // them from being reclaimed until it is dropped.
        unsafe { &*self.current.load(Ordering::Acquire) }
    }

    /// Value stored under `key`.
    #[inline]
    pub fn find<'g, Q>(&'g self, key: &Q, guard: &'g ReadGuard<'_>) -> Option<&'g V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(guard).get(key)
    }

    #[inline]
    pub fn get_key_value<'g, Q>(&'g self, key: &Q, guard: &'g ReadGuard<'_>) -> Option<(&'g K, &'g V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(guard).get_key_value(key)
    }

    /// Value stored under `key`, or `RcuError::KeyNotFound`.
    #[inline]
    pub fn at<'g, Q>(&'g self, key: &Q, guard: &'g ReadGuard<'_>) -> Result<&'g V, RcuError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(guard).at(key)
    }

    #[inline]
    pub fn count<Q>(&self, key: &Q, guard: &ReadGuard<'_>) -> usize
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(guard).count(key)
    }

    #[inline]
    pub fn contains_key<Q>(&self, key: &Q, guard: &ReadGuard<'_>) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(guard).contains_key(key)
    }

    /// Iterate the entries of the current table.
    #[inline]
    pub fn iter<'g>(&'g self, guard: &'g ReadGuard<'_>) -> Iter<'g, K, V> {
        self.get(guard).iter()
    }

    /// Writer-side entry count. Takes the writer lock.
    pub fn len(&self) -> usize {
        let _writer = self.writer.lock();
        self.writer_view().len()
    }

    /// Writer-side slot count. Takes the writer lock.
    pub fn capacity(&self) -> usize {
        let _writer = self.writer.lock();
        self.writer_view().capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove `key`. Returns `false` if it was not present.
    ///
    /// The slot becomes a tombstone and the entry is retired.
    ///
    /// 移除 `key`。不存在时返回 `false`。槽位变为墓碑，条目被退休。
    pub fn erase<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let _writer = self.writer.lock();
        let table = self.writer_view();

        let Some(index) = table.index_of(key) else {
            return false;
        };

        match table.erase_at(index) {
            Some(entry) => {
                self.domain.free_object(entry);
                true
            }
            None => false,
        }
    }

    /// The current table, for the writer.
    ///
    /// Only valid while the writer lock is held: only the writer retires tables.
    #[inline]
    fn writer_view(&self) -> &MapTable<K, V, S> {
        // SAFETY: the caller holds the writer lock, so the table is not retired meanwhile.
        unsafe { &*self.current.load(Ordering::Acquire) }
    }

    /// Swap `next` in and retire the previous table together with its entries.
    fn publish(&self, next: MapTable<K, V, S>) {
        let capacity = next.capacity();
        let next = Box::into_raw(Box::new(next));
        let previous = self.current.swap(next, Ordering::AcqRel);

        // SAFETY: `previous` came from `Box::into_raw` and is now unreachable for new readers.
        let previous = unsafe { Box::from_raw(previous) };

        log::trace!(
            "RCU map published a table of {} slots, retiring one of {} slots",
            capacity,
            previous.capacity()
        );

        self.domain.free_object(previous);
    }
}

impl<K, V, S> RcuMap<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    /// Insert or replace the value under `key`. Returns `true` if the key is new.
    ///
    /// 插入或替换 `key` 对应的值。键是新的则返回 `true`。
    pub fn insert(&self, key: K, value: V) -> bool {
        let _writer = self.writer.lock();
        self.install(key, value)
    }

    /// Like [`insert`](Self::insert), with a value built by `make`.
    ///
    /// The value is built before anything is touched, so an error leaves the map as it was.
    ///
    /// 与 [`insert`](Self::insert) 相同，但值由 `make` 构建。
    /// 值在修改任何东西之前构建，因此出错时映射保持原样。
    pub fn emplace_with<E, F>(&self, key: K, make: F) -> Result<bool, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let _writer = self.writer.lock();
        let value = make()?;
        Ok(self.install(key, value))
    }

    /// Value under `key`, inserting `V::default()` first if it is missing.
    ///
    /// 获取 `key` 对应的值，缺失时先插入 `V::default()`。
    pub fn get_or_insert_default<'g>(&'g self, key: K, guard: &'g ReadGuard<'_>) -> &'g V
    where
        V: Default,
    {
        let _writer = self.writer.lock();

        if !self.writer_view().contains_key(&key) {
            self.install(key.clone(), V::default());
        }

        match self.get(guard).get(&key) {
            Some(value) => value,
            None => panic!("BUG: RCU map lost a key it just inserted"),
        }
    }

    /// Exchange the contents of two maps.
    ///
    /// Snapshots taken before the call keep the table they saw. Both maps must
    /// retire through the same domain.
    ///
    /// # Panics
    ///
    /// Panics if `other` belongs to a different domain.
    ///
    /// 交换两个映射的内容。
    /// 调用之前获取的快照保留它们看到的表。两个映射必须通过同一个域退休。
    pub fn swap(&self, other: &Self) {
        if std::ptr::eq(self, other) {
            return;
        }
        assert!(
            self.domain.same_domain(&other.domain),
            "RcuMap::swap across different RCU domains"
        );

        // Lock in address order so two opposite swaps cannot deadlock.
        let (first, second) = if (self as *const Self) < (other as *const Self) {
            (self, other)
        } else {
            (other, self)
        };
        let _first = first.writer.lock();
        let _second = second.writer.lock();

        let mine = self.current.load(Ordering::Acquire);
        let theirs = other.current.swap(mine, Ordering::AcqRel);
        self.current.store(theirs, Ordering::Release);
    }

    /// Publish an empty table of the same capacity.
    pub fn clear(&self) {
        let _writer = self.writer.lock();
        let table = self.writer_view();

        if table.is_empty() {
            return;
        }

        let next = MapTable::with_capacity_and_hasher(table.capacity(), table.hasher().clone());
        self.publish(next);
    }

    fn install(&self, key: K, value: V) -> bool {
        let mut table = self.writer_view();
        let hash = table.hash_of(&key);

        if !table.contains_key(&key) && exceeds_max_load(table.len(), table.capacity()) {
            let next = table.rebuilt(table.capacity().saturating_mul(2));
            log::debug!(
                "RCU map growing from {} to {} slots at {} entries",
                table.capacity(),
                next.capacity(),
                table.len()
            );
            self.publish(next);
            table = self.writer_view();
        }

        let (index, exists) = table.find_slot(&key, hash);
        if let Some(previous) = table.install(index, Entry::boxed(hash, key, value)) {
            self.domain.free_object(previous);
        }

        !exists
    }
}

impl<K, V, S> Drop for RcuMap<K, V, S> {
    fn drop(&mut self) {
        let current = self.current.load(Ordering::Acquire);
        // SAFETY: `&mut self` means no reader holds a snapshot of this handle any more.
        unsafe { drop(Box::from_raw(current)) };
    }
}

impl<K, V, S> std::fmt::Debug for RcuMap<K, V, S>
where
    K: Hash + Eq + std::fmt::Debug,
    V: std::fmt::Debug,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let _writer = self.writer.lock();
        // SAFETY: the writer lock keeps the table from being retired.
        let table = unsafe { &*self.current.load(Ordering::Acquire) };
        f.debug_tuple("RcuMap").field(table).finish()
    }
}
