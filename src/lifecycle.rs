//! Thread lifecycle hooks.
//!
//! Components that keep per-thread state register a `(setup, teardown)` pair here.
//! Threads started through [`ThreadHooks::spawn`] run every setup before their body
//! and every teardown after it, in reverse registration order, even when the body
//! panics.
//!
//! 线程生命周期钩子。
//! 维护每线程状态的组件在此注册一对 `(setup, teardown)`。
//! 通过 [`ThreadHooks::spawn`] 启动的线程会在主体之前运行所有 setup，
//! 并在主体之后按注册的逆序运行所有 teardown，即使主体发生 panic。

use crate::garbage::panic_message;
use antidote::Mutex;
use std::sync::Arc;
use std::collections::BTreeMap;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::vec::Vec;

type HookFn = Box<dyn Fn() + Send + Sync>;

/// Identifier returned by [`ThreadHooks::register_setup`].
/// [`ThreadHooks::register_setup`] 返回的标识符。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HookId(u64);

struct Hook {
    setup: HookFn,
    teardown: HookFn,
}

#[derive(Default)]
struct HookTable {
    next_id: u64,
    hooks: BTreeMap<HookId, Arc<Hook>>,
}

/// A registry of per-thread setup/teardown pairs.
///
/// `ThreadHooks` is `Clone`; clones share the same registry.
///
/// 每线程 setup/teardown 对的注册表。`ThreadHooks` 是 `Clone` 的，克隆共享同一个注册表。
#[derive(Clone)]
pub struct ThreadHooks {
    table: Arc<Mutex<HookTable>>,
}

impl Default for ThreadHooks {
    fn default() -> Self {
        Self {
            table: Arc::new(Mutex::new(HookTable::default())),
        }
    }
}

impl std::fmt::Debug for ThreadHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadHooks")
            .field("registered", &self.len())
            .finish()
    }
}

/// Runs the teardowns of the setups that completed, last one first.
struct Teardowns(Vec<Arc<Hook>>);

impl Drop for Teardowns {
    fn drop(&mut self) {
        while let Some(hook) = self.0.pop() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| (hook.teardown)())) {
                log::error!(
                    "error executing thread teardown: {}",
                    panic_message(payload.as_ref())
                );
            }
        }
    }
}

impl ThreadHooks {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a setup/teardown pair for every thread started afterwards.
    ///
    /// 为之后启动的每个线程注册一对 setup/teardown。
    pub fn register_setup<S, T>(&self, setup: S, teardown: T) -> HookId
    where
        S: Fn() + Send + Sync + 'static,
        T: Fn() + Send + Sync + 'static,
    {
        let mut table = self.table.lock();
        table.next_id += 1;

        let id = HookId(table.next_id);
        table.hooks.insert(
            id,
            Arc::new(Hook {
                setup: Box::new(setup),
                teardown: Box::new(teardown),
            }),
        );

        id
    }

    /// Remove a pair. Threads already running keep the teardown they captured.
    pub fn unregister_setup(&self, id: HookId) -> bool {
        self.table.lock().hooks.remove(&id).is_some()
    }

    /// Number of registered pairs.
    pub fn len(&self) -> usize {
        self.table.lock().hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` on the current thread between the registered setups and teardowns.
    ///
    /// 在当前线程上运行 `f`，前后分别执行已注册的 setup 和 teardown。
    pub fn run_attached<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let hooks: Vec<Arc<Hook>> = self.table.lock().hooks.values().cloned().collect();
        let mut teardowns = Teardowns(Vec::with_capacity(hooks.len()));

        for hook in hooks {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| (hook.setup)())) {
                log::error!(
                    "error executing thread setup: {}",
                    panic_message(payload.as_ref())
                );
                drop(teardowns);
                panic::resume_unwind(payload);
            }
            teardowns.0.push(hook);
        }

        f()
    }

    /// Spawn a thread whose body runs between the registered setups and teardowns.
    pub fn spawn<F, R>(&self, f: F) -> io::Result<JoinHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let hooks = self.clone();
        thread::Builder::new().spawn(move || hooks.run_attached(f))
    }

    /// Like [`spawn`](Self::spawn), with a thread name.
    pub fn spawn_named<F, R>(&self, name: &str, f: F) -> io::Result<JoinHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let hooks = self.clone();
        thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || hooks.run_attached(f))
    }
}
