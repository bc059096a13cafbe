/// 并发测试模块
/// 测试宽限期检测、多读取者场景、synchronize 和后台清理器
use super::{manual_domain, DropCounter};
use crate::{RcuBox, RcuDomain};
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

/// 测试1: 活跃的读取者阻止回收，离开后才回收
#[test]
fn test_active_reader_blocks_reclamation() {
    let domain = manual_domain();
    let drops = Arc::new(AtomicUsize::new(0));

    let (entered_tx, entered_rx) = mpsc::channel();
    let (leave_tx, leave_rx) = mpsc::channel::<()>();

    let reader_domain = domain.clone();
    let reader = thread::spawn(move || {
        let guard = reader_domain.enter();
        entered_tx.send(guard.generation()).unwrap();
        leave_rx.recv().unwrap();
    });

    let snapshot = entered_rx.recv().unwrap();

    domain.free_object(Box::new(DropCounter::new(&drops)));
    let stats = domain.purge();

    assert_eq!(stats.oldest_active, Some(snapshot));
    assert_eq!(stats.reclaimed_callbacks, 0);
    assert_eq!(stats.remaining_batches, 1);
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    leave_tx.send(()).unwrap();
    reader.join().unwrap();

    let stats = domain.purge();
    assert_eq!(stats.reclaimed_callbacks, 1);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

/// 测试2: 快照晚于批次标记的读取者不会阻止回收
#[test]
fn test_later_reader_does_not_block_older_batch() {
    let domain = manual_domain();
    let drops = Arc::new(AtomicUsize::new(0));

    let spawn_reader = |domain: &RcuDomain| {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (leave_tx, leave_rx) = mpsc::channel::<()>();
        let reader_domain = domain.clone();
        let handle = thread::spawn(move || {
            let guard = reader_domain.enter();
            entered_tx.send(guard.generation()).unwrap();
            leave_rx.recv().unwrap();
        });
        (entered_rx.recv().unwrap(), leave_tx, handle)
    };

    // 第一个读取者在退休之前进入
    let (first_snapshot, first_leave, first) = spawn_reader(&domain);
    domain.free_object(Box::new(DropCounter::new(&drops)));
    assert_eq!(domain.purge().reclaimed_callbacks, 0);

    // 第二个读取者的快照晚于批次标记
    let (second_snapshot, second_leave, second) = spawn_reader(&domain);
    assert!(second_snapshot > first_snapshot);

    first_leave.send(()).unwrap();
    first.join().unwrap();

    let stats = domain.purge();
    assert_eq!(stats.oldest_active, Some(second_snapshot));
    assert_eq!(stats.reclaimed_callbacks, 1);
    assert_eq!(drops.load(Ordering::SeqCst), 1);

    second_leave.send(()).unwrap();
    second.join().unwrap();
}

/// 测试3: 在读区段内调用清理，调用线程自己的快照同样阻止回收
#[test]
fn test_purge_respects_own_section() {
    let domain = manual_domain();
    let drops = Arc::new(AtomicUsize::new(0));

    let guard = domain.enter();
    assert_eq!(guard.generation(), 1);
    domain.free_object(Box::new(DropCounter::new(&drops)));

    let first = domain.purge();
    let second = domain.purge();
    assert_eq!(first.oldest_active, Some(1));
    assert_eq!(second.oldest_active, Some(1));
    assert_eq!(second.reclaimed_callbacks, 0);
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    drop(guard);

    let stats = domain.purge();
    assert_eq!(stats.oldest_active, None);
    assert_eq!(stats.reclaimed_callbacks, 1);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

/// 测试4: synchronize 等待其他线程离开读区段
#[test]
fn test_synchronize_waits_for_readers() {
    let domain = RcuDomain::builder()
        .purge_period(None)
        .synchronize_poll(Duration::from_millis(1))
        .build()
        .unwrap();

    let left = Arc::new(AtomicBool::new(false));
    let (entered_tx, entered_rx) = mpsc::channel();

    let reader_domain = domain.clone();
    let reader_left = Arc::clone(&left);
    let reader = thread::spawn(move || {
        let guard = reader_domain.enter();
        entered_tx.send(()).unwrap();
        thread::sleep(Duration::from_millis(50));
        reader_left.store(true, Ordering::SeqCst);
        drop(guard);
    });

    entered_rx.recv().unwrap();
    domain.synchronize();

    assert!(left.load(Ordering::SeqCst));
    reader.join().unwrap();
}

/// 测试5: 在读区段内调用 synchronize 不会死锁
#[test]
fn test_synchronize_inside_own_section() {
    let domain = RcuDomain::builder()
        .purge_period(None)
        .synchronize_poll(Duration::from_millis(1))
        .build()
        .unwrap();

    let _guard = domain.enter();
    domain.synchronize();
}

/// 测试6: 后台清理器自动回收
#[test]
fn test_background_purger_reclaims() {
    let domain = RcuDomain::builder()
        .purge_period(Duration::from_millis(5))
        .build()
        .unwrap();
    let drops = Arc::new(AtomicUsize::new(0));

    domain.free_object(Box::new(DropCounter::new(&drops)));

    let deadline = Instant::now() + Duration::from_secs(5);
    while drops.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

/// 测试7: 多个读取者和一个写入者并发交换指针，读到的值永远有效
#[test]
fn test_concurrent_swap_and_read() {
    let domain = RcuDomain::builder()
        .purge_period(Duration::from_millis(1))
        .build()
        .unwrap();

    let shared = Arc::new(AtomicPtr::new(Box::into_raw(Box::new(0usize))));
    let stop = Arc::new(AtomicBool::new(false));
    let start = Arc::new(Barrier::new(5));

    let mut readers = Vec::new();
    for _ in 0..4 {
        let domain = domain.clone();
        let shared = Arc::clone(&shared);
        let stop = Arc::clone(&stop);
        let start = Arc::clone(&start);

        readers.push(thread::spawn(move || {
            let _attachment = domain.attach();
            start.wait();

            let mut last = 0;
            while !stop.load(Ordering::Acquire) {
                let guard = domain.enter();
                let value = unsafe { *shared.load(Ordering::Acquire) };
                // 值只会增加
                assert!(value >= last);
                last = value;
                drop(guard);
            }
        }));
    }

    start.wait();
    for i in 1..=2000usize {
        let old = shared.swap(Box::into_raw(Box::new(i)), Ordering::AcqRel);
        domain.free_object(unsafe { Box::from_raw(old) });
    }
    stop.store(true, Ordering::Release);

    for reader in readers {
        reader.join().unwrap();
    }

    let last = shared.swap(std::ptr::null_mut(), Ordering::AcqRel);
    domain.free_object(unsafe { Box::from_raw(last) });
}

/// 测试8: 许多线程通过 RcuBox 共享值
#[test]
fn test_rcu_box_shared_across_threads() {
    let domain = manual_domain();
    let drops = Arc::new(AtomicUsize::new(0));
    let boxed = Arc::new(RcuBox::new(&domain, DropCounter::new(&drops)));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let boxed = Arc::clone(&boxed);
            let domain = domain.clone();
            thread::spawn(move || {
                let _guard = domain.enter();
                assert_eq!(boxed.drops.load(Ordering::SeqCst), 0);
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    drop(boxed);
    domain.purge();
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}
