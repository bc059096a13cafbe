use crate::garbage::{Callback, ReclamationQueue};
use crate::periodic::PeriodicTask;
use crate::lifecycle::{HookId, ThreadHooks};
use crate::sync::{
    current_thread_id, fence, Arc, AtomicBool, AtomicU64, AtomicUsize, Cell, Mutex, Ordering, ThreadId,
};
use std::collections::HashMap;
use std::time::Duration;
use std::vec::Vec;

/// The value of the generation clock when a domain is created.
/// 域创建时世代时钟的初始值。
pub(crate) const INITIAL_GENERATION: u64 = 1;

/// Represents a thread that is not currently inside a read section.
/// 表示当前不在读区段内的线程。
pub(crate) const INACTIVE_GENERATION: u64 = u64::MAX;

/// The per-thread record kept in the registry.
///
/// Only the owning thread writes `generation`, `depth` and `pending`; the purger and
/// `synchronize()` only read `generation`.
///
/// 注册表中保存的每线程记录。
/// 只有所属线程写入 `generation`、`depth` 和 `pending`；
/// 清理器和 `synchronize()` 只读取 `generation`。
#[repr(align(64))]
pub(crate) struct ThreadState {
    pub(crate) id: ThreadId,
    /// Snapshot taken by the outermost `enter()`, or INACTIVE_GENERATION.
    /// 最外层 `enter()` 获取的快照，或 INACTIVE_GENERATION。
    pub(crate) generation: AtomicU64,
    /// Read section nesting depth.
    /// 读区段嵌套深度。
    pub(crate) depth: AtomicUsize,
    /// Set when the thread asked to unregister while inside a read section; the
    /// outermost exit completes the removal.
    /// 线程在读区段内请求注销时置位；最外层退出时完成移除。
    pub(crate) detach_on_exit: AtomicBool,
    /// Cleared when the record leaves the registry. A section begun on a removed
    /// record would be invisible to the purge scan.
    /// 记录离开注册表时清除。在已移除的记录上开始的区段对清理扫描不可见。
    pub(crate) registered: AtomicBool,
    /// Callbacks retired by this thread and not yet batched globally.
    /// 本线程退休但尚未进入全局批次的回调。
    pending: Cell<Vec<Callback>>,
}

// SAFETY: `pending` is only touched by the owning thread, or by `SharedState::drop`
// once no domain handle (and so no guard or attachment) is left. Every other field
// is atomic.
unsafe impl Sync for ThreadState {}

impl ThreadState {
    pub(crate) fn for_current_thread() -> Self {
        Self {
            id: current_thread_id(),
            generation: AtomicU64::new(INACTIVE_GENERATION),
            depth: AtomicUsize::new(0),
            detach_on_exit: AtomicBool::new(false),
            registered: AtomicBool::new(true),
            pending: Cell::new(Vec::new()),
        }
    }

    #[inline]
    pub(crate) fn is_active(&self) -> bool {
        self.generation.load(Ordering::Acquire) != INACTIVE_GENERATION
    }

    /// Append to the pending list. Owning thread only.
    #[inline]
    pub(crate) fn defer(&self, callback: Callback) {
        let mut pending = self.pending.replace(Vec::new());
        pending.push(callback);
        self.pending.set(pending);
    }

    /// Take the pending list, leaving it empty. Owning thread only.
    #[inline]
    pub(crate) fn take_pending(&self) -> Vec<Callback> {
        self.pending.replace(Vec::new())
    }
}

impl std::fmt::Debug for ThreadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadState")
            .field("id", &self.id)
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .field("depth", &self.depth.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Global shared state of one RCU domain.
///
/// Contains the generation clock, the thread registry and the reclamation queue.
/// The two locks are never held at the same time.
///
/// 一个 RCU 域的全局共享状态。
/// 包含世代时钟、线程注册表和回收队列。两把锁从不同时持有。
#[derive(Debug)]
pub(crate) struct SharedState {
    /// The process-wide monotonic generation clock.
    /// 单调递增的世代时钟。
    pub(crate) generation: AtomicU64,
    /// Registered threads, keyed by the owning thread's identity.
    /// 已注册的线程，以所属线程标识为键。
    pub(crate) threads: Mutex<HashMap<ThreadId, Arc<ThreadState>>>,
    /// Batches of callbacks waiting for their grace period.
    /// 等待宽限期结束的回调批次。
    pub(crate) queue: Mutex<ReclamationQueue>,
    pub(crate) synchronize_poll: Duration,
    pub(crate) purger: Mutex<Option<PeriodicTask>>,
    pub(crate) hook: Mutex<Option<(ThreadHooks, HookId)>>,
}

impl SharedState {
    pub(crate) fn new(synchronize_poll: Duration) -> Self {
        Self {
            generation: AtomicU64::new(INITIAL_GENERATION),
            threads: Mutex::new(HashMap::new()),
            queue: Mutex::new(ReclamationQueue::new()),
            synchronize_poll,
            purger: Mutex::new(None),
            hook: Mutex::new(None),
        }
    }

    /// Look up the calling thread's record.
    #[inline]
    pub(crate) fn current_thread(&self) -> Option<Arc<ThreadState>> {
        let id = current_thread_id();
        self.threads.lock().get(&id).cloned()
    }

    /// Minimum snapshot generation over every registered thread except `exclude`.
    ///
    /// Returns INACTIVE_GENERATION when none of the scanned threads is inside a read section.
    ///
    /// 除 `exclude` 之外所有已注册线程的最小快照世代。
    /// 当被扫描的线程都不在读区段内时返回 INACTIVE_GENERATION。
    pub(crate) fn oldest_generation(&self, exclude: Option<ThreadId>) -> u64 {
        fence(Ordering::SeqCst);
        let threads = self.threads.lock();

        threads
            .values()
            .filter(|state| Some(state.id) != exclude)
            .map(|state| state.generation.load(Ordering::SeqCst))
            .min()
            .unwrap_or(INACTIVE_GENERATION)
    }

    /// Append `callbacks` as one batch tagged with the current generation.
    /// Empty lists never produce a batch.
    pub(crate) fn push_batch(&self, callbacks: Vec<Callback>) {
        if callbacks.is_empty() {
            return;
        }

        let mut queue = self.queue.lock();
        let generation = self.generation.load(Ordering::SeqCst);

        log::trace!(
            "flushing {} RCU callbacks at generation {}",
            callbacks.len(),
            generation
        );
        queue.push(generation, callbacks);
    }
}

impl Drop for SharedState {
    fn drop(&mut self) {
        if let Some(task) = self.purger.lock().take() {
            drop(task);
        }
        if let Some((hooks, id)) = self.hook.lock().take() {
            hooks.unregister_setup(id);
        }

        // No domain handle, guard or container is left, so nothing can still
        // reference retired data.
        let mut leftovers: Vec<Callback> = Vec::new();
        for state in self.threads.lock().values() {
            leftovers.append(&mut state.take_pending());
        }
        let batches = self.queue.lock().drain_all();
        let tally = ReclamationQueue::run_batches(batches)
            .merge(ReclamationQueue::run_callbacks(leftovers));

        log::debug!(
            "RCU domain dropped, ran {} outstanding callbacks ({} failed)",
            tally.ran,
            tally.failed
        );
    }
}
