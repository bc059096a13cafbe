use crate::alloc::RcuAllocator;
use crate::error::RcuError;
use crate::sync::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::alloc::{handle_alloc_error, Layout};
use std::marker::PhantomData;
use std::ops::Index;
use std::ptr::NonNull;
use std::slice;

/// Above this share of constructed-but-dropped trailing elements, shrinking
/// reallocates instead of lowering the length in place.
pub(crate) const MAX_WASTE: f64 = 0.5;

/// Lifecycle of a backing buffer.
///
/// 后备缓冲区的生命周期。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BufferState {
    /// Append-only so far: every constructed element is published.
    /// 目前只追加：每个已构造的元素都已发布。
    Fresh = 0,
    /// The length was lowered in place. Slots past the length still hold values
    /// readers may have seen, so the buffer never grows in place again.
    /// 长度被就地降低。长度之后的槽位仍保存着读者可能看到过的值，
    /// 因此缓冲区不会再就地增长。
    Shrunk = 1,
    /// Replaced by a newer buffer and handed to the reclamation queue.
    /// 已被更新的缓冲区替换并交给回收队列。
    Retired = 2,
}

impl BufferState {
    #[inline]
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Fresh,
            1 => Self::Shrunk,
            _ => Self::Retired,
        }
    }
}

/// Outcome of the in-place vs copy decision for one mutation.
///
/// 一次修改的就地/复制决策结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Growth {
    /// Mutate the current buffer.
    InPlace,
    /// Build a new buffer, copy the live prefix, mutate the copy and publish it.
    Reallocate,
}

/// A fixed-capacity backing array of an [`RcuVec`](super::RcuVec).
///
/// Readers only get shared access. Elements below `len()` never change once
/// published; in a `Fresh` buffer `len()` never decreases either.
///
/// [`RcuVec`](super::RcuVec) 的固定容量后备数组。
/// 读者只能获得共享访问。`len()` 以下的元素一旦发布就不会改变；
/// 在 `Fresh` 状态的缓冲区中 `len()` 也不会减少。
pub struct VecBuffer<T> {
    ptr: NonNull<T>,
    capacity: usize,
    len: AtomicUsize,
    /// Elements actually constructed: `len <= created <= capacity`. Writer only.
    created: AtomicUsize,
    state: AtomicU8,
    /// Set once a reader could reach the buffer; until then its memory is released at once.
    published: AtomicBool,
    alloc: RcuAllocator,
    _marker: PhantomData<T>,
}

// SAFETY: readers get `&T` from any thread; writers move `T` in and the purger drops
// it on another thread.
unsafe impl<T: Send + Sync> Sync for VecBuffer<T> {}
unsafe impl<T: Send> Send for VecBuffer<T> {}

fn array_layout<T>(capacity: usize) -> Layout {
    match Layout::array::<T>(capacity) {
        Ok(layout) => layout,
        Err(_) => panic!("capacity overflow"),
    }
}

impl<T> VecBuffer<T> {
    /// Allocate an empty buffer, reporting allocation failure.
    pub(crate) fn try_with_capacity(alloc: &RcuAllocator, capacity: usize) -> Result<Self, RcuError> {
        let ptr = alloc.allocate_array::<T>(capacity)?;

        Ok(Self {
            ptr,
            capacity,
            len: AtomicUsize::new(0),
            created: AtomicUsize::new(0),
            state: AtomicU8::new(BufferState::Fresh as u8),
            published: AtomicBool::new(false),
            alloc: alloc.clone(),
            _marker: PhantomData,
        })
    }

    /// Allocate an empty buffer. Allocation failure aborts like the standard collections.
    pub(crate) fn with_capacity(alloc: &RcuAllocator, capacity: usize) -> Self {
        match Self::try_with_capacity(alloc, capacity) {
            Ok(buffer) => buffer,
            Err(RcuError::CapacityOverflow) => panic!("capacity overflow"),
            Err(_) => handle_alloc_error(array_layout::<T>(capacity)),
        }
    }

    /// Number of published elements.
    /// 已发布元素的数量。
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn state(&self) -> BufferState {
        BufferState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Share of constructed elements that are no longer published.
    ///
    /// 已构造但不再发布的元素所占比例。
    pub fn waste_factor(&self) -> f64 {
        let created = self.created.load(Ordering::Relaxed);
        if created == 0 {
            return 0.0;
        }
        (created - self.len()) as f64 / created as f64
    }

    /// The published elements, as of now.
    ///
    /// Take the slice once and index into it: calling `len()` again later may
    /// report more elements than a buffer sized from an earlier call can hold.
    ///
    /// 当前已发布的元素。
    /// 获取一次切片并在其上索引：之后再次调用 `len()` 可能报告比
    /// 按之前的调用分配的缓冲区能容纳的更多的元素。
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        // SAFETY: the first `len` elements are initialized and never rewritten.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len()) }
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.as_slice().get(index)
    }

    /// Element at `index`, or `RcuError::IndexOutOfBounds`.
    pub fn at(&self, index: usize) -> Result<&T, RcuError> {
        let values = self.as_slice();
        values.get(index).ok_or(RcuError::IndexOutOfBounds {
            index,
            len: values.len(),
        })
    }

    #[inline]
    pub fn first(&self) -> Option<&T> {
        self.as_slice().first()
    }

    #[inline]
    pub fn last(&self) -> Option<&T> {
        self.as_slice().last()
    }

    #[inline]
    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.as_slice().iter()
    }

    /// Decide how to append `extra` elements.
    pub fn plan_append(&self, extra: usize) -> Growth {
        let fits = self
            .len()
            .checked_add(extra)
            .is_some_and(|needed| needed <= self.capacity);

        if fits && self.state() == BufferState::Fresh {
            Growth::InPlace
        } else {
            Growth::Reallocate
        }
    }

    /// Decide how to drop trailing elements.
    pub fn plan_shrink(&self) -> Growth {
        if self.waste_factor() < MAX_WASTE && self.state() != BufferState::Retired {
            Growth::InPlace
        } else {
            Growth::Reallocate
        }
    }

    /// Decide how to change the length to `new_len`.
    pub fn plan_resize(&self, new_len: usize) -> Growth {
        let len = self.len();

        if new_len == len {
            Growth::InPlace
        } else if new_len < len {
            self.plan_shrink()
        } else {
            self.plan_append(new_len - len)
        }
    }

    #[inline]
    fn assert_writable(&self, extra: usize) {
        assert_eq!(
            self.plan_append(extra),
            Growth::InPlace,
            "BUG: in-place append of {} elements on a {:?} buffer with {} of {} slots used",
            extra,
            self.state(),
            self.len(),
            self.capacity
        );
    }

    /// Construct `value` in the first free slot, then publish it.
    pub(crate) fn push(&self, value: T) {
        self.assert_writable(1);

        let index = self.len();
        // SAFETY: `index < capacity`, and no reader looks past `len` in a fresh buffer.
        unsafe { self.ptr.as_ptr().add(index).write(value) };
        self.created.store(index + 1, Ordering::Relaxed);
        self.len.store(index + 1, Ordering::Release);
    }

    /// Lower the length without dropping anything; the buffer becomes `Shrunk`.
    pub(crate) fn truncate(&self, new_len: usize) {
        let len = self.len();
        assert!(new_len <= len, "BUG: truncate to {new_len} on a buffer of length {len}");
        assert_ne!(self.state(), BufferState::Retired, "BUG: writer touched a retired buffer");

        if new_len < len {
            self.state.store(BufferState::Shrunk as u8, Ordering::Release);
            self.len.store(new_len, Ordering::Release);
        }
    }

    pub(crate) fn mark_published(&self) {
        self.published.store(true, Ordering::Relaxed);
    }

    pub(crate) fn mark_retired(&self) {
        self.state.store(BufferState::Retired as u8, Ordering::Release);
    }
}

impl<T: Clone> VecBuffer<T> {
    /// Build an unpublished buffer holding a copy of `values`.
    ///
    /// If a clone panics the partial buffer is dropped; nobody ever saw it.
    pub(crate) fn from_prefix(alloc: &RcuAllocator, capacity: usize, values: &[T]) -> Self {
        let buffer = Self::with_capacity(alloc, capacity.max(values.len()));
        buffer.extend_from_slice(values);
        buffer
    }

    pub(crate) fn try_from_prefix(
        alloc: &RcuAllocator,
        capacity: usize,
        values: &[T],
    ) -> Result<Self, RcuError> {
        let buffer = Self::try_with_capacity(alloc, capacity.max(values.len()))?;
        buffer.extend_from_slice(values);
        Ok(buffer)
    }

    /// Append clones of `values`, publishing each one as soon as it is constructed.
    pub(crate) fn extend_from_slice(&self, values: &[T]) {
        self.assert_writable(values.len());

        for value in values {
            self.push(value.clone());
        }
    }

    /// Grow to `new_len` with clones of `value`.
    pub(crate) fn fill_to(&self, new_len: usize, value: &T) {
        let len = self.len();
        if new_len <= len {
            return;
        }
        self.assert_writable(new_len - len);

        for _ in len..new_len {
            self.push(value.clone());
        }
    }
}

impl<T> Index<usize> for VecBuffer<T> {
    type Output = T;

    #[inline]
    fn index(&self, index: usize) -> &T {
        &self.as_slice()[index]
    }
}

impl<'a, T> IntoIterator for &'a VecBuffer<T> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for VecBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VecBuffer")
            .field("state", &self.state())
            .field("capacity", &self.capacity)
            .field("values", &self.as_slice())
            .finish()
    }
}

impl<T> Drop for VecBuffer<T> {
    fn drop(&mut self) {
        let created = self.created.load(Ordering::Relaxed);

        // SAFETY: exactly the first `created` slots hold values, and this buffer is
        // unreachable: either never published or past its grace period.
        unsafe {
            std::ptr::drop_in_place(slice::from_raw_parts_mut(self.ptr.as_ptr(), created));

            if self.published.load(Ordering::Acquire) {
                self.alloc.deallocate_array(self.ptr, self.capacity);
            } else {
                let layout = array_layout::<T>(self.capacity);
                self.alloc.release_unpublished(self.ptr.cast(), layout);
            }
        }
    }
}
