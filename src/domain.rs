use crate::config::{purge_period_from_env, DEFAULT_SYNCHRONIZE_POLL};
use crate::error::RcuError;
use crate::garbage::{Callback, PurgeStats, ReclamationQueue};
use crate::lifecycle::ThreadHooks;
use crate::periodic::PeriodicTask;
use crate::reader::{ReadGuard, ThreadAttachment};
use crate::state::{SharedState, ThreadState, INACTIVE_GENERATION};
use crate::sync::{current_thread_id, pause, Arc, Ordering, Weak};
use std::boxed::Box;
use std::time::Duration;

/// Name given to the background purge thread.
const PURGER_THREAD_NAME: &str = "rcu-purger";

/// Builder for configuring an `RcuDomain`.
///
/// Use this builder to customize reclamation behavior:
/// - `purge_period`: How often the background purger runs (`None` disables it)
/// - `synchronize_poll`: How long `synchronize()` sleeps between scans
/// - `thread_hooks`: Lifecycle hooks that register threads with the domain
///
/// # Example
/// ```
/// use std::time::Duration;
/// use swmr_rcu::RcuDomain;
///
/// let domain = RcuDomain::builder()
///     .purge_period(Duration::from_millis(50))
///     .synchronize_poll(Duration::from_millis(5))
///     .build()
///     .unwrap();
/// # drop(domain);
/// ```
///
/// 用于配置 `RcuDomain` 的构建器。
pub struct RcuDomainBuilder {
    purge_period: Option<Duration>,
    synchronize_poll: Duration,
    hooks: Option<ThreadHooks>,
}

impl RcuDomainBuilder {
    /// Create a new builder with default settings.
    ///
    /// The purge period defaults to `RCU_PURGE_PERIOD` (milliseconds), or one second.
    ///
    /// 创建一个带有默认设置的新构建器。
    /// 清理周期默认取 `RCU_PURGE_PERIOD`（毫秒），否则为一秒。
    #[inline]
    pub fn new() -> Self {
        Self {
            purge_period: Some(purge_period_from_env()),
            synchronize_poll: DEFAULT_SYNCHRONIZE_POLL,
            hooks: None,
        }
    }

    /// Set the background purge period.
    ///
    /// Pass `None` to disable the background purger; `RcuDomain::purge()` can still
    /// be called by hand.
    ///
    /// 设置后台清理周期。
    /// 传递 `None` 可禁用后台清理器；仍可手动调用 `RcuDomain::purge()`。
    #[inline]
    pub fn purge_period(mut self, period: impl Into<Option<Duration>>) -> Self {
        self.purge_period = period.into();
        self
    }

    /// Set the sleep between two registry scans in `synchronize()`.
    ///
    /// Default: 250 ms
    #[inline]
    pub fn synchronize_poll(mut self, poll: Duration) -> Self {
        self.synchronize_poll = poll;
        self
    }

    /// Register the domain's per-thread setup/teardown with `hooks`.
    ///
    /// Threads spawned through `hooks` are registered before their body runs and
    /// flushed and unregistered when it returns. The purge thread is spawned through
    /// `hooks` as well.
    ///
    /// 将域的每线程 setup/teardown 注册到 `hooks`。
    /// 通过 `hooks` 启动的线程会在主体运行前注册，并在返回时刷新并注销。
    /// 清理线程也通过 `hooks` 启动。
    #[inline]
    pub fn thread_hooks(mut self, hooks: &ThreadHooks) -> Self {
        self.hooks = Some(hooks.clone());
        self
    }

    /// Build the `RcuDomain` with the configured settings.
    ///
    /// Fails only if the purge thread cannot be spawned.
    ///
    /// 使用配置的设置构建 `RcuDomain`。仅当清理线程无法启动时失败。
    pub fn build(self) -> Result<RcuDomain, RcuError> {
        let domain = RcuDomain {
            shared: Arc::new(SharedState::new(self.synchronize_poll)),
        };

        if let Some(hooks) = &self.hooks {
            let on_start = Arc::downgrade(&domain.shared);
            let on_stop = Arc::downgrade(&domain.shared);
            let id = hooks.register_setup(
                move || {
                    if let Some(domain) = RcuDomain::upgrade(&on_start) {
                        domain.register_current_thread();
                    }
                },
                move || {
                    if let Some(domain) = RcuDomain::upgrade(&on_stop) {
                        domain.unregister_current_thread();
                    }
                },
            );
            *domain.shared.hook.lock() = Some((hooks.clone(), id));
        }

        if let Some(period) = self.purge_period {
            let weak = Arc::downgrade(&domain.shared);
            let task = PeriodicTask::spawn(PURGER_THREAD_NAME, period, self.hooks.as_ref(), move || {
                if let Some(domain) = RcuDomain::upgrade(&weak) {
                    domain.purge();
                }
            })
            .map_err(RcuError::ThreadSpawn)?;

            log::debug!("RCU purger started with a period of {:?}", period);
            *domain.shared.purger.lock() = Some(task);
        }

        Ok(domain)
    }
}

impl Default for RcuDomainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A read-copy-update reclamation domain.
///
/// `RcuDomain` is the explicit context object of the reclamation engine. It owns:
/// - The generation clock.
/// - The registry of participating threads.
/// - The global queue of callbacks waiting for their grace period.
/// - The background purger, if enabled.
///
/// `RcuDomain` is `Clone` and can be safely shared across threads. Clones refer to
/// the same domain; the domain is torn down, and every remaining callback run, when
/// the last clone is dropped.
///
/// **Typical Usage**:
/// ```
/// use swmr_rcu::RcuDomain;
///
/// let domain = RcuDomain::builder().purge_period(None).build().unwrap();
///
/// // Reader: enter a read section
/// {
///     let guard = domain.enter();
///     assert!(guard.generation() >= 1);
/// }
///
/// // Writer: retire something, then let a purge run reclaim it
/// domain.free_object(Box::new(String::from("old value")));
/// let stats = domain.purge();
/// assert_eq!(stats.reclaimed_callbacks, 1);
/// ```
///
/// 读-复制-更新回收域。
/// `RcuDomain` 是回收引擎的显式上下文对象。它拥有：
/// - 世代时钟。
/// - 参与线程的注册表。
/// - 等待宽限期的全局回调队列。
/// - 后台清理器（如果启用）。
/// `RcuDomain` 是 `Clone` 的，可以安全地在线程间共享。克隆指向同一个域；
/// 当最后一个克隆被 drop 时，域被拆除，所有剩余的回调都会执行。
#[derive(Clone)]
pub struct RcuDomain {
    pub(crate) shared: Arc<SharedState>,
}

impl std::fmt::Debug for RcuDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RcuDomain")
            .field("generation", &self.generation())
            .field("registered_threads", &self.registered_threads())
            .field("pending_batches", &self.pending_batches())
            .finish()
    }
}

impl RcuDomain {
    /// Create a new domain with default settings (background purger enabled).
    /// 使用默认设置创建一个新域（启用后台清理器）。
    #[inline]
    pub fn new() -> Result<Self, RcuError> {
        Self::builder().build()
    }

    /// Create a builder for configuring the domain.
    /// 创建一个用于配置域的构建器。
    #[inline]
    pub fn builder() -> RcuDomainBuilder {
        RcuDomainBuilder::new()
    }

    #[inline]
    pub(crate) fn upgrade(weak: &Weak<SharedState>) -> Option<Self> {
        weak.upgrade().map(|shared| Self { shared })
    }

    #[inline]
    pub(crate) fn downgrade(&self) -> Weak<SharedState> {
        Arc::downgrade(&self.shared)
    }

    #[inline]
    pub(crate) fn same_domain(&self, other: &RcuDomain) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Current value of the generation clock.
    /// 世代时钟的当前值。
    #[inline]
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    /// Number of batches waiting in the global queue.
    pub fn pending_batches(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Number of callbacks waiting in the global queue.
    pub fn pending_callbacks(&self) -> usize {
        self.shared.queue.lock().callback_count()
    }

    /// Number of threads currently in the registry.
    pub fn registered_threads(&self) -> usize {
        self.shared.threads.lock().len()
    }

    /// Whether the calling thread is registered.
    pub fn is_current_thread_registered(&self) -> bool {
        self.shared.current_thread().is_some()
    }

    /// Register the calling thread. Returns `false` if it already was.
    ///
    /// A registered thread holds back reclamation only while inside a read section.
    ///
    /// 注册调用线程。如果已经注册则返回 `false`。
    /// 已注册的线程只有在读区段内时才会阻止回收。
    pub fn register_current_thread(&self) -> bool {
        self.register_thread_state().1
    }

    pub(crate) fn register_thread_state(&self) -> (Arc<ThreadState>, bool) {
        let id = current_thread_id();
        let mut threads = self.shared.threads.lock();

        if let Some(state) = threads.get(&id) {
            // Registering again cancels an unregister deferred to the section's end.
            state.detach_on_exit.store(false, Ordering::Relaxed);
            return (Arc::clone(state), false);
        }

        let state = Arc::new(ThreadState::for_current_thread());
        threads.insert(id, Arc::clone(&state));
        log::debug!("RCU thread {:?} registered", id);

        (state, true)
    }

    /// Flush the calling thread's pending callbacks and remove it from the registry.
    ///
    /// Returns `false` if the thread was not registered, or if it is inside a read
    /// section. In the latter case the removal happens when its outermost guard is
    /// dropped; until then its snapshot keeps holding back reclamation.
    ///
    /// 刷新调用线程的待处理回调，并将其从注册表中移除。
    /// 如果线程未注册，或者正处于读区段内，则返回 `false`。后一种情况下，
    /// 移除在其最外层守卫被 drop 时发生；在此之前其快照仍会阻止回收。
    pub fn unregister_current_thread(&self) -> bool {
        let Some(state) = self.shared.current_thread() else {
            return false;
        };

        if state.depth.load(Ordering::Relaxed) != 0 {
            log::warn!(
                "RCU thread {:?} asked to unregister inside a read section, deferring to its exit",
                state.id
            );
            state.detach_on_exit.store(true, Ordering::Relaxed);
            return false;
        }

        self.remove_thread_state(&state);
        true
    }

    pub(crate) fn remove_thread_state(&self, state: &ThreadState) {
        self.flush_state(state);
        state.detach_on_exit.store(false, Ordering::Relaxed);
        state.registered.store(false, Ordering::Relaxed);
        self.shared.threads.lock().remove(&state.id);
        log::debug!("RCU thread {:?} unregistered", state.id);
    }

    /// Register the calling thread for the lifetime of the returned value.
    ///
    /// 在返回值的生命周期内注册调用线程。
    pub fn attach(&self) -> ThreadAttachment<'_> {
        let (state, fresh) = self.register_thread_state();
        ThreadAttachment::new(self, state, fresh)
    }

    /// Enter a read section.
    ///
    /// The outermost section snapshots the generation clock; nested sections only
    /// bump the depth. A thread that was never registered is registered here.
    ///
    /// **Reentrancy**: the thread stays in its read section until every guard is dropped.
    ///
    /// 进入一个读区段。
    /// 最外层区段对世代时钟做快照；嵌套区段只增加深度。从未注册的线程会在此注册。
    /// **可重入性**：线程保持在读区段内，直到所有守卫都被 drop。
    #[inline]
    pub fn enter(&self) -> ReadGuard<'_> {
        let state = match self.shared.current_thread() {
            Some(state) => state,
            None => self.register_thread_state().0,
        };
        ReadGuard::begin(self, state)
    }

    /// Queue `release(data)` to run once the current grace period has elapsed.
    ///
    /// # Safety
    ///
    /// `data` must stay valid until `release` runs, `release(data)` must be sound to
    /// call exactly once, from any thread, and no reader may reach `data` through a
    /// published reference taken after this call.
    ///
    /// 将 `release(data)` 排队，在当前宽限期结束后运行。
    pub unsafe fn enqueue_callback(&self, data: *mut (), release: unsafe fn(*mut ())) {
        let callback = unsafe { Callback::new(data, release) };
        self.enqueue(callback);
    }

    pub(crate) fn enqueue(&self, callback: Callback) {
        log::trace!("pointer added to the RCU queue: {:p}", callback.data());

        let Some(state) = self.shared.current_thread() else {
            // Unregistered threads have no pending list of their own.
            self.shared.push_batch(vec![callback]);
            return;
        };

        state.defer(callback);

        // Outside a read section no exit will come to flush it.
        if state.depth.load(Ordering::Relaxed) == 0 {
            self.flush_state(&state);
        }
    }

    /// Retire a boxed object: it is dropped once no reader can still see it.
    ///
    /// 退休一个 Box 对象：一旦没有读者还能看到它，它就会被 drop。
    #[inline]
    pub fn free_object<T: Send + 'static>(&self, value: Box<T>) {
        self.enqueue(Callback::from_box(value));
    }

    /// Retire a boxed slice: it is dropped once no reader can still see it.
    ///
    /// 退休一个 Box 切片：一旦没有读者还能看到它，它就会被 drop。
    #[inline]
    pub fn free_array<T: Send + 'static>(&self, values: Box<[T]>) {
        self.enqueue(Callback::from_box(Box::new(values)));
    }

    /// Move the calling thread's pending callbacks into a new global batch.
    ///
    /// A no-op when nothing is pending: no empty batch is ever appended.
    ///
    /// 将调用线程的待处理回调移入一个新的全局批次。
    /// 没有待处理回调时为空操作：永远不会追加空批次。
    pub fn flush_callbacks(&self) {
        if let Some(state) = self.shared.current_thread() {
            self.flush_state(&state);
        }
    }

    pub(crate) fn flush_state(&self, state: &ThreadState) {
        let callbacks = state.take_pending();
        if callbacks.is_empty() {
            return;
        }
        self.shared.push_batch(callbacks);
    }

    /// Run one grace-period sweep.
    ///
    /// This method:
    /// 1. Advances the generation clock.
    /// 2. Scans every registered thread, the caller included, for the oldest snapshot.
    /// 3. Runs every batch tagged strictly below that snapshot.
    /// 4. Flushes callbacks the reclaimed objects retired while being dropped.
    ///
    /// Calling this inside a read section is safe: nothing the caller might still
    /// see is reclaimed until its own section ends.
    ///
    /// Panics raised by callbacks are caught and logged, never propagated.
    ///
    /// 执行一次宽限期清理。
    /// 此方法：
    /// 1. 推进世代时钟。
    /// 2. 扫描所有已注册线程（包括调用者），找出最旧的快照。
    /// 3. 运行所有标记严格小于该快照的批次。
    /// 4. 刷新被回收对象在 drop 时退休的回调。
    /// 在读区段内调用是安全的：调用者仍可能看到的数据在其区段结束前不会被回收。
    /// 回调引发的 panic 会被捕获并记录，绝不会传播。
    pub fn purge(&self) -> PurgeStats {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst);
        log::trace!("running RCU purge at generation {}", generation);

        let oldest = self.shared.oldest_generation(None);
        log::trace!("oldest thread RCU generation is {}", oldest);

        // A batch flushed after the scan carries a tag above `generation`; a reader
        // the scan missed may still hold what it retired.
        let limit = oldest.min(generation + 1);
        let ready = self.shared.queue.lock().take_ready(limit);
        let reclaimed_batches = ready.len();
        let tally = ReclamationQueue::run_batches(ready);

        self.flush_callbacks();

        let stats = PurgeStats {
            generation,
            oldest_active: (oldest != INACTIVE_GENERATION).then_some(oldest),
            reclaimed_batches,
            reclaimed_callbacks: tally.ran,
            failed_callbacks: tally.failed,
            remaining_batches: self.pending_batches(),
        };

        if reclaimed_batches > 0 {
            log::debug!(
                "RCU purge at generation {} reclaimed {} callbacks in {} batches, {} batches left",
                generation,
                stats.reclaimed_callbacks,
                reclaimed_batches,
                stats.remaining_batches
            );
        }

        stats
    }

    /// Block until every other thread has left the read sections it was in when this
    /// call started.
    ///
    /// Polls the registry, sleeping `synchronize_poll` between scans. Calling this
    /// from inside a read section does not deadlock: the caller's own snapshot is
    /// ignored.
    ///
    /// 阻塞，直到其他所有线程都离开了本调用开始时所处的读区段。
    /// 轮询注册表，两次扫描之间休眠 `synchronize_poll`。
    /// 在读区段内调用不会死锁：调用者自身的快照会被忽略。
    pub fn synchronize(&self) {
        let this_id = current_thread_id();
        let generation = self.generation();

        log::debug!("entering RCU synchronize for thread {:?}", this_id);

        while self.shared.oldest_generation(Some(this_id)) <= generation {
            pause(self.shared.synchronize_poll);
        }

        log::debug!("exiting RCU synchronize for thread {:?}", this_id);
    }
}

/// Retire `value` through the domain behind `weak`, or drop it on the spot when the
/// domain is already gone (no reader can exist without it).
pub(crate) fn retire_or_drop<T: Send + 'static>(weak: &Weak<SharedState>, value: Box<T>) {
    match RcuDomain::upgrade(weak) {
        Some(domain) => domain.free_object(value),
        None => drop(value),
    }
}
