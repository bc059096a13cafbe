use crate::garbage::panic_message;
use crate::lifecycle::ThreadHooks;
use antidote::{Condvar, Mutex};
use std::sync::Arc;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

struct TaskControl {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// A task invoked on a fixed period from a dedicated thread, until stopped.
///
/// `stop()` wakes the sleeping thread at once. Dropping the task stops it and joins
/// its thread; a run already in progress is never interrupted.
///
/// 在专用线程上按固定周期调用的任务，直到被停止。
/// `stop()` 会立即唤醒休眠中的线程。drop 任务会停止它并 join 其线程；
/// 正在进行的运行不会被中断。
pub struct PeriodicTask {
    control: Arc<TaskControl>,
    thread: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl PeriodicTask {
    /// Start `task` on a new thread named `name`, first run after one `period`.
    ///
    /// When `hooks` is given, the thread is spawned through it so per-thread setup and
    /// teardown run around the loop.
    ///
    /// 在名为 `name` 的新线程上启动 `task`，首次运行在一个 `period` 之后。
    /// 如果提供了 `hooks`，线程将通过它启动，以便在循环前后运行每线程的 setup 和 teardown。
    pub fn spawn<F>(
        name: &str,
        period: Duration,
        hooks: Option<&ThreadHooks>,
        task: F,
    ) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let control = Arc::new(TaskControl {
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        });

        let thread_control = Arc::clone(&control);
        let body = move || run(&thread_control, period, task);

        let thread = match hooks {
            Some(hooks) => hooks.spawn_named(name, body)?,
            None => thread::Builder::new().name(name.to_owned()).spawn(body)?,
        };
        let thread_id = thread.thread().id();

        Ok(Self {
            control,
            thread: Some(thread),
            thread_id,
        })
    }

    /// Ask the loop to exit after the current run, if any.
    pub fn stop(&self) {
        *self.control.stopped.lock() = true;
        self.control.wake.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.control.stopped.lock()
    }
}

impl std::fmt::Debug for PeriodicTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicTask")
            .field("thread", &self.thread_id)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();

        let Some(thread) = self.thread.take() else {
            return;
        };
        // The last owner may be the task itself; joining would deadlock.
        if thread::current().id() == self.thread_id {
            return;
        }
        if thread.join().is_err() {
            log::error!("periodic task thread terminated with a panic");
        }
    }
}

fn run<F: FnMut()>(control: &TaskControl, period: Duration, mut task: F) {
    loop {
        {
            // A period too long to represent never elapses.
            let deadline = Instant::now().checked_add(period);
            let mut stopped = control.stopped.lock();

            while !*stopped {
                let Some(deadline) = deadline else {
                    stopped = control.wake.wait(stopped);
                    continue;
                };
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                stopped = control.wake.wait_timeout(stopped, deadline - now).0;
            }

            if *stopped {
                break;
            }
        }

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(&mut task)) {
            log::error!(
                "error executing periodic task: {}",
                panic_message(payload.as_ref())
            );
        }
    }
}
