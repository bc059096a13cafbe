use super::slot::{Entry, Slot, SlotState};
use crate::error::RcuError;
use crate::sync::{AtomicUsize, Ordering};
use std::borrow::Borrow;
use std::hash::{BuildHasher, Hash};
use std::slice;

/// Smallest prime `>= n` (and at least 2).
pub(crate) fn next_prime(n: usize) -> usize {
    fn is_prime(n: usize) -> bool {
        if n < 4 {
            return n >= 2;
        }
        if n % 2 == 0 {
            return false;
        }
        let mut divisor = 3;
        while divisor <= n / divisor {
            if n % divisor == 0 {
                return false;
            }
            divisor += 2;
        }
        true
    }

    let mut candidate = n.max(2);
    while !is_prime(candidate) {
        candidate += 1;
    }
    candidate
}

/// One fixed-capacity table of an [`RcuMap`](super::RcuMap), as seen by a reader.
///
/// The capacity is a prime; probing is linear with wraparound from `hash % capacity`.
/// A table never grows: the map replaces it wholesale instead.
///
/// [`RcuMap`](super::RcuMap) 的一张固定容量表，即读者看到的快照。
/// 容量是质数；从 `hash % capacity` 开始线性探测并回绕。
/// 表永远不会增长：映射会整体替换它。
pub struct MapTable<K, V, S> {
    slots: Box<[Slot<K, V>]>,
    len: AtomicUsize,
    hash_builder: S,
}

impl<K, V, S> MapTable<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    pub(crate) fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        let capacity = next_prime(capacity);
        Self {
            slots: (0..capacity).map(|_| Slot::empty()).collect(),
            len: AtomicUsize::new(0),
            hash_builder,
        }
    }

    /// Live entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn load_factor(&self) -> f64 {
        self.len() as f64 / self.capacity() as f64
    }

    #[inline]
    pub(crate) fn hasher(&self) -> &S {
        &self.hash_builder
    }

    #[inline]
    pub(crate) fn hash_of<Q>(&self, key: &Q) -> u64
    where
        Q: Hash + ?Sized,
    {
        self.hash_builder.hash_one(key)
    }

    /// Slot indices in probe order for `hash`.
    #[inline]
    fn probe(&self, hash: u64) -> impl Iterator<Item = usize> {
        let capacity = self.capacity();
        let home = (hash % capacity as u64) as usize;
        (0..capacity).map(move |step| (home + step) % capacity)
    }

    fn find_entry<Q>(&self, key: &Q) -> Option<(usize, &Entry<K, V>)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash_of(key);

        for index in self.probe(hash) {
            match self.slots[index].load() {
                SlotState::Empty => return None,
                SlotState::Tombstone => continue,
                SlotState::Occupied(entry) => {
                    if entry.hash == hash && entry.key.borrow() == key {
                        return Some((index, entry));
                    }
                }
            }
        }

        None
    }

    /// Value stored under `key`.
    ///
    /// 获取 `key` 对应的值。
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find_entry(key).map(|(_, entry)| &entry.value)
    }

    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find_entry(key).map(|(_, entry)| (&entry.key, &entry.value))
    }

    /// Value stored under `key`, or `RcuError::KeyNotFound`.
    pub fn at<Q>(&self, key: &Q) -> Result<&V, RcuError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).ok_or(RcuError::KeyNotFound)
    }

    /// 1 if `key` is present, 0 otherwise.
    pub fn count<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        usize::from(self.contains_key(key))
    }

    #[inline]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find_entry(key).is_some()
    }

    /// Iterate live entries in slot order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            slots: self.slots.iter(),
        }
    }

    pub(crate) fn index_of<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find_entry(key).map(|(index, _)| index)
    }

    /// Where `key` lives or should go, and whether it is already there.
    ///
    /// The first tombstone on the probe path is remembered, but probing continues
    /// until an empty slot so a key stored past the tombstone is still found.
    ///
    /// # Panics
    ///
    /// If every slot is occupied by another key.
    pub(crate) fn find_slot(&self, key: &K, hash: u64) -> (usize, bool) {
        let mut first_free = None;

        for index in self.probe(hash) {
            match self.slots[index].load() {
                SlotState::Empty => return (first_free.unwrap_or(index), false),
                SlotState::Tombstone => {
                    first_free.get_or_insert(index);
                }
                SlotState::Occupied(entry) => {
                    if entry.hash == hash && entry.key == *key {
                        return (index, true);
                    }
                }
            }
        }

        match first_free {
            Some(index) => (index, false),
            None => panic!(
                "BUG: RCU map table of capacity {} has no free slot",
                self.capacity()
            ),
        }
    }

    /// Store `entry` at `index`; returns the replaced entry, which the caller retires.
    pub(crate) fn install(&self, index: usize, entry: Box<Entry<K, V>>) -> Option<Box<Entry<K, V>>> {
        let previous = self.slots[index].publish(entry);
        if previous.is_none() {
            self.len.fetch_add(1, Ordering::AcqRel);
        }
        previous
    }

    /// Bury the slot at `index`; returns the erased entry, which the caller retires.
    pub(crate) fn erase_at(&self, index: usize) -> Option<Box<Entry<K, V>>> {
        let previous = self.slots[index].bury();
        if previous.is_some() {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
        previous
    }
}

impl<K, V, S> MapTable<K, V, S>
where
    K: Hash + Eq + Clone,
    V: Clone,
    S: BuildHasher + Clone,
{
    /// A new unpublished table of at least `capacity` slots holding copies of every live entry.
    pub(crate) fn rebuilt(&self, capacity: usize) -> Self {
        let table = Self::with_capacity_and_hasher(capacity, self.hash_builder.clone());

        for slot in self.slots.iter() {
            if let SlotState::Occupied(entry) = slot.load() {
                let (index, exists) = table.find_slot(&entry.key, entry.hash);
                debug_assert!(!exists, "duplicate key while rebuilding an RCU map table");
                table.install(
                    index,
                    Entry::boxed(entry.hash, entry.key.clone(), entry.value.clone()),
                );
            }
        }

        table
    }
}

impl<'a, K, V, S> IntoIterator for &'a MapTable<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K, V, S> std::fmt::Debug for MapTable<K, V, S>
where
    K: Hash + Eq + std::fmt::Debug,
    V: std::fmt::Debug,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Iterator over the live entries of a [`MapTable`], in slot order.
pub struct Iter<'a, K, V> {
    slots: slice::Iter<'a, Slot<K, V>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        for slot in self.slots.by_ref() {
            if let SlotState::Occupied(entry) = slot.load() {
                return Some((&entry.key, &entry.value));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.slots.len()))
    }
}
