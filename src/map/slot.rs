use crate::sync::{AtomicPtr, Ordering};
use std::marker::PhantomData;
use std::ptr;

/// A published key/value pair. Built in full before it is stored in a slot.
pub(crate) struct Entry<K, V> {
    pub(crate) hash: u64,
    pub(crate) key: K,
    pub(crate) value: V,
}

impl<K, V> Entry<K, V> {
    #[inline]
    pub(crate) fn boxed(hash: u64, key: K, value: V) -> Box<Self> {
        Box::new(Entry { hash, key, value })
    }
}

/// What a reader finds in a slot.
///
/// 读者在槽位中看到的内容。
pub(crate) enum SlotState<'a, K, V> {
    /// Never used: probing stops here.
    /// 从未使用：探测到此停止。
    Empty,
    /// Held an entry that was erased: probing continues past it.
    /// 曾保存过已被擦除的条目：探测会越过它继续。
    Tombstone,
    Occupied(&'a Entry<K, V>),
}

/// Address standing for a tombstone. `Entry` holds a `u64`, so no entry lives at 1.
#[inline]
fn tombstone<K, V>() -> *mut Entry<K, V> {
    ptr::without_provenance_mut(1)
}

/// One cell of the open-addressing table: null, the tombstone marker, or an owned entry.
pub(crate) struct Slot<K, V> {
    ptr: AtomicPtr<Entry<K, V>>,
    _owns: PhantomData<Box<Entry<K, V>>>,
}

impl<K, V> Slot<K, V> {
    #[inline]
    pub(crate) fn empty() -> Self {
        Self {
            ptr: AtomicPtr::new(ptr::null_mut()),
            _owns: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn load(&self) -> SlotState<'_, K, V> {
        Self::classify(self.ptr.load(Ordering::Acquire))
    }

    #[inline]
    fn classify<'a>(raw: *mut Entry<K, V>) -> SlotState<'a, K, V> {
        if raw.is_null() {
            SlotState::Empty
        } else if raw == tombstone() {
            SlotState::Tombstone
        } else {
            // SAFETY: any other value came from `Box::into_raw` in `publish`, and the
            // entry outlives every reader that can reach this slot.
            SlotState::Occupied(unsafe { &*raw })
        }
    }

    /// Store `entry`, returning the previous occupant if there was one.
    ///
    /// The caller must retire the returned entry, not drop it: readers may still hold it.
    pub(crate) fn publish(&self, entry: Box<Entry<K, V>>) -> Option<Box<Entry<K, V>>> {
        let previous = self.ptr.swap(Box::into_raw(entry), Ordering::AcqRel);
        Self::reclaim(previous)
    }

    /// Turn the slot into a tombstone, returning the erased entry if there was one.
    pub(crate) fn bury(&self) -> Option<Box<Entry<K, V>>> {
        let previous = self.ptr.swap(tombstone(), Ordering::AcqRel);
        Self::reclaim(previous)
    }

    #[inline]
    fn reclaim(raw: *mut Entry<K, V>) -> Option<Box<Entry<K, V>>> {
        match Self::classify(raw) {
            // SAFETY: occupied slots own a pointer from `Box::into_raw`, and the swap
            // took it out of the slot.
            SlotState::Occupied(_) => Some(unsafe { Box::from_raw(raw) }),
            SlotState::Empty | SlotState::Tombstone => None,
        }
    }
}

impl<K, V> Drop for Slot<K, V> {
    fn drop(&mut self) {
        let raw = self.ptr.load(Ordering::Acquire);
        drop(Self::reclaim(raw));
    }
}
