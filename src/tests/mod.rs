mod concurrent_tests;
mod edge_case_tests;

use crate::RcuDomain;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 没有后台清理器的域，回收只在手动调用 purge() 时发生
fn manual_domain() -> RcuDomain {
    RcuDomain::builder().purge_period(None).build().unwrap()
}

/// drop 时递增共享计数器的值
#[derive(Debug)]
struct DropCounter {
    drops: Arc<AtomicUsize>,
}

impl DropCounter {
    fn new(drops: &Arc<AtomicUsize>) -> Self {
        DropCounter {
            drops: Arc::clone(drops),
        }
    }
}

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// 可克隆的值，`live` 记录当前存活的实例数
#[derive(Debug)]
struct Tracked {
    value: usize,
    live: Arc<AtomicUsize>,
}

impl Tracked {
    fn new(value: usize, live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Tracked {
            value,
            live: Arc::clone(live),
        }
    }
}

impl Clone for Tracked {
    fn clone(&self) -> Self {
        Tracked::new(self.value, &self.live)
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}
