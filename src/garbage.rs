use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::vec::Vec;
use std::boxed::Box;

/// One deferred destruction: an opaque data pointer and the function that releases it.
///
/// The release function runs exactly once, either when the batch holding the
/// callback is purged or, as a fallback, when the callback itself is dropped.
///
/// 一次延迟销毁：一个不透明的数据指针以及释放它的函数。
/// 释放函数恰好运行一次：在包含该回调的批次被清理时，
/// 或者作为后备，在回调自身被 drop 时。
pub(crate) struct Callback {
    data: *mut (),
    release: unsafe fn(*mut ()),
}

// SAFETY: callbacks are only built from `Send` payloads (see `RcuDomain::free_object`)
// or from raw pointers whose caller promised the same through `enqueue_callback`.
unsafe impl Send for Callback {}

/// Generic release function for retired boxes.
/// Converts the raw pointer back to Box<T> and drops it.
///
/// 已退休 Box 的通用释放函数。将原始指针转换回 Box<T> 并将其 drop。
#[inline(always)]
pub(crate) unsafe fn release_box<T>(ptr: *mut ()) {
    unsafe {
        drop(Box::from_raw(ptr as *mut T));
    }
}

impl Callback {
    /// # Safety
    ///
    /// `release(data)` must be sound to call once, from any thread, after the grace period.
    #[inline(always)]
    pub(crate) unsafe fn new(data: *mut (), release: unsafe fn(*mut ())) -> Self {
        Callback { data, release }
    }

    #[inline(always)]
    pub(crate) fn from_box<T: Send + 'static>(value: Box<T>) -> Self {
        Callback {
            data: Box::into_raw(value) as *mut (),
            release: release_box::<T>,
        }
    }

    #[inline]
    pub(crate) fn data(&self) -> *mut () {
        self.data
    }

    /// Run the release function now.
    #[inline]
    pub(crate) fn invoke(self) {
        drop(self);
    }
}

impl Drop for Callback {
    #[inline(always)]
    fn drop(&mut self) {
        let data = std::mem::replace(&mut self.data, std::ptr::null_mut());
        if !data.is_null() {
            unsafe {
                (self.release)(data);
            }
        }
    }
}

impl std::fmt::Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Callback").field(&self.data).finish()
    }
}

/// Callbacks flushed together, tagged with the generation current at flush time.
///
/// A batch may run once every registered thread's snapshot exceeds `generation`.
///
/// 一起刷新的回调，以刷新时的当前世代作为标记。
/// 当所有已注册线程的快照都超过 `generation` 时，该批次可以执行。
#[derive(Debug)]
pub(crate) struct GenerationBatch {
    pub(crate) generation: u64,
    pub(crate) callbacks: Vec<Callback>,
}

/// Counts produced by running a set of callbacks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CallbackTally {
    pub(crate) ran: usize,
    pub(crate) failed: usize,
}

impl CallbackTally {
    pub(crate) fn merge(self, other: CallbackTally) -> CallbackTally {
        CallbackTally {
            ran: self.ran + other.ran,
            failed: self.failed + other.failed,
        }
    }
}

/// The global list of batches waiting for their grace period.
///
/// Flushes may be tagged out of order (two threads racing for the lock), so
/// eligibility is decided batch by batch rather than by prefix.
///
/// 等待宽限期的全局批次列表。
/// 刷新的标记可能乱序（两个线程争抢锁），因此逐个批次判断是否可回收，而不是按前缀。
#[derive(Debug, Default)]
pub(crate) struct ReclamationQueue {
    batches: VecDeque<GenerationBatch>,
}

impl ReclamationQueue {
    pub(crate) fn new() -> Self {
        Self {
            batches: VecDeque::new(),
        }
    }

    /// Number of batches still waiting.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.batches.len()
    }

    /// Number of callbacks still waiting, across all batches.
    pub(crate) fn callback_count(&self) -> usize {
        self.batches.iter().map(|batch| batch.callbacks.len()).sum()
    }

    pub(crate) fn push(&mut self, generation: u64, callbacks: Vec<Callback>) {
        if callbacks.is_empty() {
            return;
        }

        // Batches tagged with the same generation as the tail can share it.
        if let Some(last) = self.batches.back_mut() {
            if last.generation == generation {
                last.callbacks.extend(callbacks);
                return;
            }
        }

        self.batches.push_back(GenerationBatch {
            generation,
            callbacks,
        });
    }

    /// Remove and return every batch whose tag is strictly below `oldest_active`.
    pub(crate) fn take_ready(&mut self, oldest_active: u64) -> Vec<GenerationBatch> {
        let mut ready = Vec::new();

        for _ in 0..self.batches.len() {
            let Some(batch) = self.batches.pop_front() else {
                break;
            };

            if batch.generation < oldest_active {
                log::trace!("RCU batch for generation {} is ready", batch.generation);
                ready.push(batch);
            } else {
                log::trace!("skipping RCU batch for generation {}", batch.generation);
                self.batches.push_back(batch);
            }
        }

        ready
    }

    pub(crate) fn drain_all(&mut self) -> Vec<GenerationBatch> {
        self.batches.drain(..).collect()
    }

    /// Run every callback of every batch, isolating panics per callback.
    pub(crate) fn run_batches(batches: Vec<GenerationBatch>) -> CallbackTally {
        batches
            .into_iter()
            .map(|batch| {
                log::trace!("running RCU callbacks for generation {}", batch.generation);
                Self::run_callbacks(batch.callbacks)
            })
            .fold(CallbackTally::default(), CallbackTally::merge)
    }

    /// Run callbacks in order. A panicking callback is logged and skipped; it
    /// never stops the remaining ones.
    pub(crate) fn run_callbacks(callbacks: Vec<Callback>) -> CallbackTally {
        let mut tally = CallbackTally::default();

        for callback in callbacks {
            let data = callback.data();

            log::trace!("RCU callback for {:p}", data);
            match panic::catch_unwind(AssertUnwindSafe(|| callback.invoke())) {
                Ok(()) => tally.ran += 1,
                Err(payload) => {
                    tally.failed += 1;
                    log::error!(
                        "panic while calling RCU callback for {:p}: {}",
                        data,
                        panic_message(payload.as_ref())
                    );
                }
            }
        }

        tally
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Outcome of one purge run.
///
/// 一次清理运行的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgeStats {
    /// Generation the clock held before this run advanced it.
    /// 本次运行推进时钟之前的世代。
    pub generation: u64,
    /// Oldest snapshot among the other registered threads, if any is inside a read section.
    /// 其他已注册线程中最旧的快照（如果有线程处于读区段内）。
    pub oldest_active: Option<u64>,
    /// Batches whose grace period had elapsed.
    pub reclaimed_batches: usize,
    /// Callbacks that ran to completion.
    pub reclaimed_callbacks: usize,
    /// Callbacks that panicked. They are logged and dropped.
    pub failed_callbacks: usize,
    /// Batches left for a later run.
    pub remaining_batches: usize,
}
