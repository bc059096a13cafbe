use crate::domain::{retire_or_drop, RcuDomain};
use crate::error::RcuError;
use crate::state::SharedState;
use crate::sync::Weak;
use std::alloc::{self, Layout};
use std::boxed::Box;
use std::ptr::NonNull;

/// Raw memory whose deallocation waits for a grace period.
struct RawBlock {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the block is plain memory; nothing in it is dropped, only deallocated.
unsafe impl Send for RawBlock {}

impl Drop for RawBlock {
    fn drop(&mut self) {
        unsafe {
            alloc::dealloc(self.ptr.as_ptr(), self.layout);
        }
    }
}

/// An allocator whose deallocations are routed through the reclamation queue.
///
/// Allocation is immediate. Deallocation only queues the block; the memory is
/// returned to the global allocator after the grace period, so readers holding a
/// pointer into it inside a read section are unaffected. Memory that was never
/// published can be handed back synchronously with [`release_unpublished`].
///
/// This does not make any standard container RCU-safe: it only defers the release
/// of memory that is already unreachable for new readers.
///
/// [`release_unpublished`]: RcuAllocator::release_unpublished
///
/// 一个通过回收队列释放内存的分配器。
/// 分配是即时的。释放只会将内存块排队；内存在宽限期结束后才归还给全局分配器，
/// 因此在读区段内持有其中指针的读者不受影响。从未发布过的内存可以通过
/// [`release_unpublished`] 同步归还。
#[derive(Clone)]
pub struct RcuAllocator {
    domain: Weak<SharedState>,
}

impl RcuAllocator {
    pub fn new(domain: &RcuDomain) -> Self {
        Self {
            domain: domain.downgrade(),
        }
    }

    /// Allocate a block for `layout`. Zero-sized layouts get a dangling, well-aligned pointer.
    pub fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, RcuError> {
        if layout.size() == 0 {
            // SAFETY: alignment is never zero.
            return Ok(unsafe { NonNull::new_unchecked(layout.align() as *mut u8) });
        }

        // SAFETY: the layout has a non-zero size.
        let ptr = unsafe { alloc::alloc(layout) };

        NonNull::new(ptr).ok_or(RcuError::AllocationFailed {
            size: layout.size(),
            align: layout.align(),
        })
    }

    /// Allocate uninitialized room for `len` values of `T`.
    pub fn allocate_array<T>(&self, len: usize) -> Result<NonNull<T>, RcuError> {
        let layout = Layout::array::<T>(len).map_err(|_| RcuError::CapacityOverflow)?;
        self.allocate(layout).map(NonNull::cast)
    }

    /// Queue `ptr` for deallocation once the current grace period has elapsed.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` with the same `layout`, must not be used by the
    /// caller afterwards, and any values stored in it must already be dropped or
    /// have been moved out.
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        retire_or_drop(&self.domain, Box::new(RawBlock { ptr, layout }));
    }

    /// # Safety
    ///
    /// Same contract as [`deallocate`](Self::deallocate) for an array of `len` values.
    pub unsafe fn deallocate_array<T>(&self, ptr: NonNull<T>, len: usize) {
        if let Ok(layout) = Layout::array::<T>(len) {
            unsafe { self.deallocate(ptr.cast(), layout) };
        }
    }

    /// Return a block that was never reachable by any reader, without waiting.
    ///
    /// # Safety
    ///
    /// Same as [`deallocate`](Self::deallocate), and no other thread may ever have
    /// observed `ptr`.
    pub unsafe fn release_unpublished(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        drop(RawBlock { ptr, layout });
    }
}

impl std::fmt::Debug for RcuAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RcuAllocator")
            .field("domain_alive", &(self.domain.strong_count() > 0))
            .finish()
    }
}
