#[cfg(feature = "loom")]
pub use loom::cell::Cell;
#[cfg(not(feature = "loom"))]
pub use std::cell::Cell;

#[cfg(feature = "loom")]
pub use loom::sync::atomic::{fence, AtomicBool, AtomicPtr, AtomicU64, AtomicU8, AtomicUsize, Ordering};
#[cfg(not(feature = "loom"))]
pub use std::sync::atomic::{fence, AtomicBool, AtomicPtr, AtomicU64, AtomicU8, AtomicUsize, Ordering};

// loom has no `Weak`, so the domain handle stays on std in both builds.
pub use std::sync::{Arc, Weak};

#[cfg(feature = "loom")]
pub use loom::thread::ThreadId;
#[cfg(not(feature = "loom"))]
pub use std::thread::ThreadId;

// Non-poisoning locks. A panicking reclamation callback must never leave the
// registry or the queue unusable for the next purge.
#[cfg(not(feature = "loom"))]
pub use antidote::Mutex;

#[cfg(feature = "loom")]
#[derive(Debug, Default)]
pub struct Mutex<T>(loom::sync::Mutex<T>);

#[cfg(feature = "loom")]
impl<T> Mutex<T> {
    pub fn new(t: T) -> Self {
        Self(loom::sync::Mutex::new(t))
    }

    pub fn lock(&self) -> loom::sync::MutexGuard<'_, T> {
        self.0.lock().unwrap()
    }
}

/// Identity of the calling thread, as the registry keys it.
#[inline]
pub fn current_thread_id() -> ThreadId {
    #[cfg(feature = "loom")]
    {
        loom::thread::current().id()
    }
    #[cfg(not(feature = "loom"))]
    {
        std::thread::current().id()
    }
}

/// Back off between two registry scans.
#[inline]
pub fn pause(duration: std::time::Duration) {
    #[cfg(feature = "loom")]
    {
        let _ = duration;
        loom::thread::yield_now();
    }
    #[cfg(not(feature = "loom"))]
    {
        std::thread::sleep(duration);
    }
}
