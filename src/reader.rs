use crate::domain::RcuDomain;
use crate::state::{ThreadState, INACTIVE_GENERATION};
use crate::sync::{fence, Arc, Ordering};
use std::marker::PhantomData;

/// A guard that keeps the current thread inside a read section.
///
/// `ReadGuard` is obtained by calling `RcuDomain::enter()` or
/// `ThreadAttachment::enter()`. It is `!Send` and `!Sync`: the section belongs to
/// the thread that entered it. Its lifetime is bound to the domain it came from.
///
/// While a `ReadGuard` is held, nothing retired at or after the thread's snapshot
/// generation is reclaimed.
///
/// `ReadGuard` supports cloning (increments the nesting depth), allowing nested
/// sections. The thread leaves its section when the last guard is dropped; at that
/// point its pending callbacks are flushed into the global queue.
///
/// **Safety**: the `ReadGuard` is what makes the references returned by
/// `RcuVec::get()` and `RcuMap::get()` valid. Readers must hold one while touching
/// shared data.
///
/// 一个保持当前线程处于读区段内的守卫。
/// `ReadGuard` 通过调用 `RcuDomain::enter()` 或 `ThreadAttachment::enter()` 获得。
/// 它是 `!Send` 和 `!Sync` 的：区段属于进入它的线程。它的生命周期被绑定到它来自的域。
/// 当 `ReadGuard` 被持有时，在线程快照世代或之后退休的任何数据都不会被回收。
/// `ReadGuard` 支持克隆（增加嵌套深度），允许嵌套区段。
/// 当最后一个守卫被 drop 时线程离开区段；此时其待处理回调被刷新到全局队列。
/// **安全性**：`ReadGuard` 保证了 `RcuVec::get()` 和 `RcuMap::get()` 返回的引用有效。
/// 读者在访问共享数据时必须持有它。
#[must_use]
pub struct ReadGuard<'d> {
    domain: &'d RcuDomain,
    state: Arc<ThreadState>,
    _not_send: PhantomData<*const ()>,
}

impl<'d> ReadGuard<'d> {
    #[inline]
    pub(crate) fn begin(domain: &'d RcuDomain, state: Arc<ThreadState>) -> Self {
        let depth = state.depth.load(Ordering::Relaxed);

        if depth == 0 {
            debug_assert!(!state.is_active(), "thread entered twice at depth 0");
            let generation = domain.shared.generation.load(Ordering::SeqCst);
            state.generation.store(generation, Ordering::SeqCst);
            // Pairs with the fence in the purge scan: either the purger sees this
            // snapshot, or every load below sees what was unpublished before it.
            fence(Ordering::SeqCst);
        }

        state.depth.store(depth + 1, Ordering::Relaxed);

        ReadGuard {
            domain,
            state,
            _not_send: PhantomData,
        }
    }

    /// The domain this section belongs to.
    #[inline]
    pub fn domain(&self) -> &'d RcuDomain {
        self.domain
    }

    /// The generation snapshot taken when the outermost section was entered.
    /// 进入最外层区段时获取的世代快照。
    #[inline]
    pub fn generation(&self) -> u64 {
        self.state.generation.load(Ordering::Relaxed)
    }

    /// Current nesting depth, 1 for the outermost guard alone.
    #[inline]
    pub fn depth(&self) -> usize {
        self.state.depth.load(Ordering::Relaxed)
    }
}

impl Clone for ReadGuard<'_> {
    /// Clone this guard to create a nested section.
    ///
    /// 克隆此守卫以创建嵌套区段。
    #[inline]
    fn clone(&self) -> Self {
        let depth = self.state.depth.load(Ordering::Relaxed);

        assert!(
            depth > 0,
            "BUG: Cloning a ReadGuard outside a read section (depth = 0). \
             This indicates incorrect API usage or a library bug."
        );

        self.state.depth.store(depth + 1, Ordering::Relaxed);

        ReadGuard {
            domain: self.domain,
            state: Arc::clone(&self.state),
            _not_send: PhantomData,
        }
    }
}

impl Drop for ReadGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        let depth = self.state.depth.load(Ordering::Relaxed);
        debug_assert!(depth > 0, "ReadGuard dropped outside a read section");

        self.state.depth.store(depth - 1, Ordering::Relaxed);

        if depth == 1 {
            self.domain.flush_state(&self.state);
            self.state
                .generation
                .store(INACTIVE_GENERATION, Ordering::SeqCst);

            if self.state.detach_on_exit.load(Ordering::Relaxed) {
                self.domain.remove_thread_state(&self.state);
            }
        }
    }
}

impl std::fmt::Debug for ReadGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadGuard")
            .field("generation", &self.generation())
            .field("depth", &self.depth())
            .finish()
    }
}

/// Registration of the current thread with a domain, undone on drop.
///
/// `ThreadAttachment` is `!Send`. Dropping it flushes the thread's pending callbacks
/// and removes it from the registry, unless the thread was already registered when
/// the attachment was created. If the thread is still inside a read section at that
/// point, the removal waits for the section to end.
///
/// 当前线程在域中的注册，在 drop 时撤销。
/// `ThreadAttachment` 是 `!Send` 的。drop 它会刷新线程的待处理回调并将其从注册表中移除，
/// 除非创建该附着时线程已经注册。如果此时线程仍在读区段内，移除会等到区段结束。
pub struct ThreadAttachment<'d> {
    domain: &'d RcuDomain,
    state: Arc<ThreadState>,
    owned: bool,
    _not_send: PhantomData<*const ()>,
}

impl<'d> ThreadAttachment<'d> {
    pub(crate) fn new(domain: &'d RcuDomain, state: Arc<ThreadState>, owned: bool) -> Self {
        Self {
            domain,
            state,
            owned,
            _not_send: PhantomData,
        }
    }

    /// Enter a read section without looking the thread up in the registry.
    ///
    /// The guard borrows the attachment, so the thread cannot be detached through
    /// it while the section is open. If the thread was unregistered by other means
    /// in the meantime, this falls back to `RcuDomain::enter()`.
    ///
    /// 进入读区段，无需在注册表中查找线程。
    /// 守卫借用该附着，因此区段打开期间无法通过它注销线程。
    /// 如果线程在此期间通过其他方式被注销，则回退到 `RcuDomain::enter()`。
    #[inline]
    pub fn enter(&self) -> ReadGuard<'_> {
        if !self.state.registered.load(Ordering::Relaxed) {
            return self.domain.enter();
        }
        ReadGuard::begin(self.domain, Arc::clone(&self.state))
    }

    /// Whether dropping this attachment unregisters the thread.
    #[inline]
    pub fn is_owner(&self) -> bool {
        self.owned
    }
}

impl Drop for ThreadAttachment<'_> {
    fn drop(&mut self) {
        // A record already removed by hand was not re-registered by this attachment.
        if self.owned && self.state.registered.load(Ordering::Relaxed) {
            self.domain.unregister_current_thread();
        }
    }
}

impl std::fmt::Debug for ThreadAttachment<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadAttachment")
            .field("thread", &self.state.id)
            .field("owned", &self.owned)
            .finish()
    }
}
