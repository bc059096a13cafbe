/// 边界情况测试模块
/// 测试嵌套区段、回调 panic、回收期间的再次退休和域的拆除
use super::{manual_domain, DropCounter};
use crate::RcuBox;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

/// 测试1: 嵌套区段只有最外层退出才离开
#[test]
fn test_nested_sections_leave_on_outermost_exit() {
    let domain = manual_domain();
    let drops = Arc::new(AtomicUsize::new(0));

    let outer = domain.enter();
    let snapshot = outer.generation();
    {
        let inner = domain.enter();
        assert_eq!(inner.depth(), 2);
        assert_eq!(inner.generation(), snapshot);

        domain.free_object(Box::new(DropCounter::new(&drops)));
    }

    // 内层退出不刷新
    assert_eq!(outer.depth(), 1);
    assert_eq!(domain.pending_batches(), 0);

    drop(outer);
    assert_eq!(domain.pending_batches(), 1);
}

/// 测试2: 克隆守卫增加深度，drop 顺序无关
#[test]
fn test_guard_clone_any_drop_order() {
    let domain = manual_domain();

    let first = domain.enter();
    let second = first.clone();
    assert_eq!(first.depth(), 2);

    drop(first);
    assert_eq!(second.depth(), 1);
    drop(second);

    let again = domain.enter();
    assert_eq!(again.depth(), 1);
}

/// 测试3: 嵌套区段期间时钟推进，快照保持不变
#[test]
fn test_nested_section_keeps_outer_snapshot() {
    let domain = manual_domain();

    let outer = domain.enter();
    domain.purge();
    domain.purge();

    let inner = domain.enter();
    assert_eq!(inner.generation(), outer.generation());
    assert!(domain.generation() > inner.generation());
}

struct PanicOnDrop;

impl Drop for PanicOnDrop {
    fn drop(&mut self) {
        panic!("release failed");
    }
}

/// 测试4: panic 的回调被记录，其他回调照常运行
#[test]
fn test_panicking_callback_is_isolated() {
    let domain = manual_domain();
    let drops = Arc::new(AtomicUsize::new(0));

    domain.free_object(Box::new(DropCounter::new(&drops)));
    domain.free_object(Box::new(PanicOnDrop));
    domain.free_object(Box::new(DropCounter::new(&drops)));

    let stats = domain.purge();

    assert_eq!(stats.failed_callbacks, 1);
    assert_eq!(stats.reclaimed_callbacks, 2);
    assert_eq!(drops.load(Ordering::SeqCst), 2);
    assert_eq!(domain.pending_batches(), 0);
}

/// 测试5: 回收时再次退休的对象进入新的批次
#[test]
fn test_retire_from_inside_purge() {
    let domain = manual_domain();
    let drops = Arc::new(AtomicUsize::new(0));

    domain.register_current_thread();

    let inner = RcuBox::new(&domain, DropCounter::new(&drops));
    let outer = RcuBox::new(&domain, inner);
    drop(outer);

    let first = domain.purge();
    assert_eq!(first.reclaimed_callbacks, 1);
    // 外层回收时退休了内层
    assert_eq!(first.remaining_batches, 1);
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    let second = domain.purge();
    assert_eq!(second.reclaimed_callbacks, 1);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

/// 测试6: 在读区段内注销线程会推迟到最外层守卫 drop
#[test]
fn test_unregister_inside_section() {
    let domain = manual_domain();
    let drops = Arc::new(AtomicUsize::new(0));

    domain.free_object(Box::new(DropCounter::new(&drops)));

    let guard = domain.enter();
    let nested = guard.clone();

    assert!(!domain.unregister_current_thread());
    assert!(domain.is_current_thread_registered());
    assert_eq!(guard.depth(), 2);

    // 快照仍然有效，清理不能回收区段开始前退休的对象
    let stats = domain.purge();
    assert_eq!(stats.oldest_active, Some(guard.generation()));
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    drop(nested);
    assert!(domain.is_current_thread_registered());

    drop(guard);
    assert!(!domain.is_current_thread_registered());
    assert_eq!(domain.registered_threads(), 0);

    domain.purge();
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

/// 测试7: ThreadAttachment 只注销自己注册的线程
#[test]
fn test_attachment_ownership() {
    let domain = manual_domain();

    {
        let attachment = domain.attach();
        assert!(attachment.is_owner());
        assert!(domain.is_current_thread_registered());

        let nested = domain.attach();
        assert!(!nested.is_owner());
        drop(nested);
        assert!(domain.is_current_thread_registered());

        let guard = attachment.enter();
        assert_eq!(guard.depth(), 1);
    }

    assert!(!domain.is_current_thread_registered());
}

/// 测试8: drop 最后一个域句柄会运行所有剩余回调
#[test]
fn test_domain_drop_runs_outstanding_callbacks() {
    let drops = Arc::new(AtomicUsize::new(0));

    {
        let domain = manual_domain();
        let clone = domain.clone();

        for _ in 0..10 {
            domain.free_object(Box::new(DropCounter::new(&drops)));
        }
        drop(domain);

        // 仍有一个克隆存活
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        assert_eq!(clone.pending_callbacks(), 10);
    }

    assert_eq!(drops.load(Ordering::SeqCst), 10);
}

/// 测试9: 零大小类型的退休
#[test]
fn test_zero_sized_type() {
    let domain = manual_domain();

    domain.free_object(Box::new(()));
    domain.free_array::<()>(vec![(); 3].into_boxed_slice());

    let stats = domain.purge();
    assert_eq!(stats.reclaimed_callbacks, 2);
}

/// 测试10: 同一世代的批次合并
#[test]
fn test_same_generation_batches_merge() {
    let domain = manual_domain();

    for i in 0..100u64 {
        domain.free_object(Box::new(i));
    }

    // 未注册线程的每次退休都标记为同一世代
    assert_eq!(domain.pending_batches(), 1);
    assert_eq!(domain.pending_callbacks(), 100);
}

/// 测试11: 大量快速进入和离开
#[test]
fn test_rapid_enter_exit() {
    let domain = manual_domain();

    for _ in 0..10_000 {
        let _guard = domain.enter();
    }

    assert_eq!(domain.registered_threads(), 1);
    assert_eq!(domain.pending_batches(), 0);
}

/// 测试12: 附着先于守卫被 drop，守卫仍然阻止回收，线程在离开区段时注销
#[test]
fn test_guard_outlives_attachment() {
    let domain = manual_domain();
    let drops = Arc::new(AtomicUsize::new(0));
    let (ready_tx, ready_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let reader_domain = domain.clone();
    let reader = thread::spawn(move || {
        let attachment = reader_domain.attach();
        let guard = reader_domain.enter();
        drop(attachment);
        assert!(reader_domain.is_current_thread_registered());

        ready_tx.send(guard.generation()).unwrap();
        release_rx.recv().unwrap();
        drop(guard);

        reader_domain.is_current_thread_registered()
    });

    let snapshot = ready_rx.recv().unwrap();
    assert_eq!(domain.registered_threads(), 1);

    domain.free_object(Box::new(DropCounter::new(&drops)));
    let first = domain.purge();
    let second = domain.purge();
    assert_eq!(first.oldest_active, Some(snapshot));
    assert_eq!(second.reclaimed_callbacks, 0);
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    release_tx.send(()).unwrap();
    assert!(!reader.join().unwrap());
    assert_eq!(domain.registered_threads(), 0);

    domain.purge();
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

/// 测试13: 线程被注销后，旧附着进入的区段仍然对清理可见
#[test]
fn test_attachment_enter_after_unregister() {
    let domain = manual_domain();
    let drops = Arc::new(AtomicUsize::new(0));

    let attachment = domain.attach();
    assert!(domain.unregister_current_thread());
    assert!(!domain.is_current_thread_registered());

    domain.free_object(Box::new(DropCounter::new(&drops)));

    let guard = attachment.enter();
    assert!(domain.is_current_thread_registered());

    let stats = domain.purge();
    assert_eq!(stats.oldest_active, Some(guard.generation()));
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    drop(guard);
    domain.purge();
    assert_eq!(drops.load(Ordering::SeqCst), 1);

    // 回退的 enter() 重新注册了线程，旧附着不再拥有这次注册
    drop(attachment);
    assert!(domain.is_current_thread_registered());
}
