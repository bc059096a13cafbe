//! Copy-on-grow vector.
//!
//! Readers take a snapshot of the current [`VecBuffer`] inside a read section and
//! index into it without locks. The single writer (serialized by an internal mutex)
//! appends in place while the buffer has room and was never shrunk; every other
//! change builds a new buffer, copies the live prefix, mutates the copy and swaps it
//! in, retiring the old buffer through the domain.
//!
//! 增长时复制的向量。
//! 读者在读区段内获取当前 [`VecBuffer`] 的快照，无需加锁即可索引。
//! 单一写入者（由内部互斥锁串行化）在缓冲区有空间且从未收缩时就地追加；
//! 其他所有修改都会构建新的缓冲区、复制存活前缀、修改副本并将其换入，
//! 旧缓冲区通过域退休。

mod buffer;

pub use buffer::{BufferState, Growth, VecBuffer};

use crate::alloc::RcuAllocator;
use crate::domain::RcuDomain;
use crate::error::RcuError;
use crate::reader::ReadGuard;
use crate::sync::{AtomicPtr, Mutex, Ordering};
use std::marker::PhantomData;

/// Capacity of the first buffer of an `RcuVec::new()`.
pub(crate) const INITIAL_CAPACITY: usize = 8;

#[inline]
fn grown_capacity(len: usize) -> usize {
    len.saturating_mul(2).saturating_add(1)
}

/// A vector whose readers never block and never see a published element change.
///
/// # Example
/// ```
/// use swmr_rcu::{RcuDomain, RcuVec};
///
/// let domain = RcuDomain::builder().purge_period(None).build().unwrap();
/// let values = RcuVec::new(&domain);
///
/// values.push_back(1);
/// values.push_back(2);
///
/// let guard = domain.enter();
/// assert_eq!(values.span(&guard), &[1, 2]);
/// ```
///
/// 读者永不阻塞、且永远不会看到已发布元素发生变化的向量。
pub struct RcuVec<T> {
    domain: RcuDomain,
    alloc: RcuAllocator,
    current: AtomicPtr<VecBuffer<T>>,
    writer: Mutex<()>,
    _marker: PhantomData<Box<VecBuffer<T>>>,
}

// SAFETY: readers on any thread share `&T`; the buffer holding them is dropped on
// whichever thread runs the purge.
unsafe impl<T: Send + Sync> Send for RcuVec<T> {}
unsafe impl<T: Send + Sync> Sync for RcuVec<T> {}

impl<T> RcuVec<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an empty vector whose retired buffers go through `domain`.
    pub fn new(domain: &RcuDomain) -> Self {
        Self::with_capacity(domain, INITIAL_CAPACITY)
    }

    pub fn with_capacity(domain: &RcuDomain, capacity: usize) -> Self {
        let alloc = RcuAllocator::new(domain);
        let buffer = VecBuffer::with_capacity(&alloc, capacity);
        Self::from_buffer(domain, alloc, buffer)
    }

    /// Create a vector holding clones of `values`.
    pub fn from_slice(domain: &RcuDomain, values: &[T]) -> Self {
        let alloc = RcuAllocator::new(domain);
        let buffer = VecBuffer::from_prefix(&alloc, values.len(), values);
        Self::from_buffer(domain, alloc, buffer)
    }

    /// Create a vector of `len` clones of `value`.
    pub fn from_elem(domain: &RcuDomain, len: usize, value: T) -> Self {
        let alloc = RcuAllocator::new(domain);
        let buffer = VecBuffer::with_capacity(&alloc, len);
        buffer.fill_to(len, &value);
        Self::from_buffer(domain, alloc, buffer)
    }

    fn from_buffer(domain: &RcuDomain, alloc: RcuAllocator, buffer: VecBuffer<T>) -> Self {
        buffer.mark_published();
        Self {
            domain: domain.clone(),
            alloc,
            current: AtomicPtr::new(Box::into_raw(Box::new(buffer))),
            writer: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    /// Snapshot of the current buffer, valid for as long as `guard` is held.
    ///
    /// 当前缓冲区的快照，在持有 `guard` 期间有效。
    #[inline]
    pub fn get<'g>(&'g self, guard: &'g ReadGuard<'_>) -> &'g VecBuffer<T> {
        debug_assert!(
            guard.domain().same_domain(&self.domain),
            "read guard belongs to a different RCU domain"
        );

        // SAFETY: the buffer is retired only after being swapped out, and the guard keeps
        // it from being reclaimed until it is dropped.
        unsafe { &*self.current.load(Ordering::Acquire) }
    }

    /// The published elements as one slice.
    #[inline]
    pub fn span<'g>(&'g self, guard: &'g ReadGuard<'_>) -> &'g [T] {
        self.get(guard).as_slice()
    }

    /// Element at `index`, or `RcuError::IndexOutOfBounds`.
    #[inline]
    pub fn at<'g>(&'g self, index: usize, guard: &'g ReadGuard<'_>) -> Result<&'g T, RcuError> {
        self.get(guard).at(index)
    }

    /// Writer-side length. Takes the writer lock.
    pub fn len(&self) -> usize {
        let _writer = self.writer.lock();
        self.writer_view().len()
    }

    /// Writer-side capacity. Takes the writer lock.
    pub fn capacity(&self) -> usize {
        let _writer = self.writer.lock();
        self.writer_view().capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `value`.
    ///
    /// 追加 `value`。
    pub fn push_back(&self, value: T) {
        let _writer = self.writer.lock();
        self.append(value);
    }

    /// Build the value with `make` and append it. Nothing changes if `make` panics.
    ///
    /// 用 `make` 构建值并追加。如果 `make` panic，则什么都不会改变。
    pub fn emplace_back<F>(&self, make: F)
    where
        F: FnOnce() -> T,
    {
        let _writer = self.writer.lock();
        let value = make();
        self.append(value);
    }

    /// Drop the last element from the published range. Returns `false` if empty.
    ///
    /// While the buffer's waste stays below the threshold the length is lowered in
    /// place and the element itself is left alone for readers that still see it.
    ///
    /// 从已发布范围中移除最后一个元素。为空时返回 `false`。
    /// 当缓冲区的浪费率低于阈值时，长度会被就地降低，元素本身保持不动，
    /// 供仍能看到它的读者使用。
    pub fn pop_back(&self) -> bool {
        let _writer = self.writer.lock();
        let buffer = self.writer_view();
        let len = buffer.len();

        if len == 0 {
            return false;
        }

        self.shrink_to(buffer, len - 1);
        true
    }

    /// Append clones of `values`.
    pub fn extend_from_slice(&self, values: &[T]) {
        let _writer = self.writer.lock();
        self.append_slice(values);
    }

    /// Insert `values` at `position`, which must be the current length.
    ///
    /// Anything else would move published elements and yields
    /// `RcuError::InsertPosition`.
    ///
    /// 在 `position` 处插入 `values`，`position` 必须等于当前长度。
    /// 其他位置会移动已发布的元素，并返回 `RcuError::InsertPosition`。
    pub fn insert(&self, position: usize, values: &[T]) -> Result<(), RcuError> {
        let _writer = self.writer.lock();
        let len = self.writer_view().len();

        if position != len {
            return Err(RcuError::InsertPosition { position, len });
        }

        self.append_slice(values);
        Ok(())
    }

    /// Change the length to `new_len`, filling with clones of `value`.
    pub fn resize(&self, new_len: usize, value: T) {
        let _writer = self.writer.lock();
        let buffer = self.writer_view();
        let len = buffer.len();

        if new_len <= len {
            self.shrink_to(buffer, new_len);
            return;
        }

        match buffer.plan_resize(new_len) {
            Growth::InPlace => buffer.fill_to(new_len, &value),
            Growth::Reallocate => {
                let capacity = grown_capacity(len).max(new_len);
                let next = VecBuffer::from_prefix(&self.alloc, capacity, buffer.as_slice());
                next.fill_to(new_len, &value);
                self.publish(next);
            }
        }
    }

    /// Make room for at least `capacity` elements.
    pub fn reserve(&self, capacity: usize) {
        let _writer = self.writer.lock();
        let buffer = self.writer_view();

        if capacity <= buffer.capacity() {
            return;
        }

        let next = VecBuffer::from_prefix(&self.alloc, capacity, buffer.as_slice());
        self.publish(next);
    }

    /// Like [`reserve`](Self::reserve), reporting allocation failure instead of aborting.
    ///
    /// 与 [`reserve`](Self::reserve) 相同，但报告分配失败而不是中止。
    pub fn try_reserve(&self, capacity: usize) -> Result<(), RcuError> {
        let _writer = self.writer.lock();
        let buffer = self.writer_view();

        if capacity <= buffer.capacity() {
            return Ok(());
        }

        let next = VecBuffer::try_from_prefix(&self.alloc, capacity, buffer.as_slice())?;
        self.publish(next);
        Ok(())
    }

    /// Publish an empty buffer of the same capacity.
    pub fn clear(&self) {
        let _writer = self.writer.lock();
        let buffer = self.writer_view();

        if buffer.is_empty() {
            return;
        }

        let next = VecBuffer::with_capacity(&self.alloc, buffer.capacity());
        self.publish(next);
    }

    /// The current buffer, for the writer.
    ///
    /// Only valid while the writer lock is held: only the writer retires buffers.
    #[inline]
    fn writer_view(&self) -> &VecBuffer<T> {
        // SAFETY: the caller holds the writer lock, so the buffer is not retired meanwhile.
        unsafe { &*self.current.load(Ordering::Acquire) }
    }

    fn append(&self, value: T) {
        let buffer = self.writer_view();

        match buffer.plan_append(1) {
            Growth::InPlace => buffer.push(value),
            Growth::Reallocate => {
                let capacity = grown_capacity(buffer.len());
                let next = VecBuffer::from_prefix(&self.alloc, capacity, buffer.as_slice());
                next.push(value);
                self.publish(next);
            }
        }
    }

    fn append_slice(&self, values: &[T]) {
        if values.is_empty() {
            return;
        }

        let buffer = self.writer_view();

        match buffer.plan_append(values.len()) {
            Growth::InPlace => buffer.extend_from_slice(values),
            Growth::Reallocate => {
                let len = buffer.len();
                let capacity = grown_capacity(len).max(len.saturating_add(values.len()));
                let next = VecBuffer::from_prefix(&self.alloc, capacity, buffer.as_slice());
                next.extend_from_slice(values);
                self.publish(next);
            }
        }
    }

    fn shrink_to(&self, buffer: &VecBuffer<T>, new_len: usize) {
        if new_len == buffer.len() {
            return;
        }

        match buffer.plan_shrink() {
            Growth::InPlace => buffer.truncate(new_len),
            Growth::Reallocate => {
                let capacity = grown_capacity(new_len).min(buffer.capacity());
                let live = &buffer.as_slice()[..new_len];
                let next = VecBuffer::from_prefix(&self.alloc, capacity, live);
                self.publish(next);
            }
        }
    }

    /// Swap `next` in and retire the previous buffer.
    ///
    /// The previous buffer must not be touched by the caller afterwards.
    fn publish(&self, next: VecBuffer<T>) {
        next.mark_published();
        let capacity = next.capacity();
        let next = Box::into_raw(Box::new(next));
        let previous = self.current.swap(next, Ordering::AcqRel);

        // SAFETY: `previous` came from `Box::into_raw` and is now unreachable for new readers.
        let previous = unsafe { Box::from_raw(previous) };
        previous.mark_retired();

        log::trace!(
            "RCU vector published a buffer of capacity {}, retiring one of capacity {}",
            capacity,
            previous.capacity()
        );

        self.domain.free_object(previous);
    }
}

impl<T: Default + Clone + Send + Sync + 'static> RcuVec<T> {
    /// Change the length to `new_len`, filling with default values.
    pub fn resize_default(&self, new_len: usize) {
        self.resize(new_len, T::default());
    }
}

impl<T> Drop for RcuVec<T> {
    fn drop(&mut self) {
        let current = self.current.load(Ordering::Acquire);
        // SAFETY: `&mut self` means no reader holds a snapshot of this handle any more.
        unsafe { drop(Box::from_raw(current)) };
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for RcuVec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let _writer = self.writer.lock();
        // SAFETY: the writer lock keeps the buffer from being retired.
        let buffer = unsafe { &*self.current.load(Ordering::Acquire) };
        f.debug_tuple("RcuVec").field(&buffer.as_slice()).finish()
    }
}
