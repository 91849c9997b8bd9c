//! Reference-counting backend tests

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use objrt_gc::{Collector, RefCountCollector, Trace, alloc_value};
use parking_lot::Mutex;

static DROPS: AtomicUsize = AtomicUsize::new(0);
static DROP_THREAD: Mutex<Option<thread::ThreadId>> = Mutex::new(None);

/// Records which thread ran its destructor
struct Tracked;

impl Trace for Tracked {
    const NEEDS_TRACE: bool = false;

    fn trace(&self, _tracer: &mut dyn FnMut(objrt_gc::Block)) {}
}

impl Drop for Tracked {
    fn drop(&mut self) {
        DROPS.fetch_add(1, Ordering::SeqCst);
        *DROP_THREAD.lock() = Some(thread::current().id());
    }
}

#[test]
fn test_destructor_runs_once_on_last_release() {
    let rc = Arc::new(RefCountCollector::default());
    let block = alloc_value(rc.as_ref(), 0, Tracked);
    rc.retain(block);
    rc.retain(block);

    assert!(!rc.release(block));
    assert!(!rc.release(block));
    assert_eq!(DROPS.load(Ordering::SeqCst), 0);

    let releaser = {
        let rc = Arc::clone(&rc);
        thread::spawn(move || {
            assert!(rc.release(block));
            thread::current().id()
        })
    };
    let releaser_id = releaser.join().expect("release thread");

    assert_eq!(DROPS.load(Ordering::SeqCst), 1);
    assert_eq!(*DROP_THREAD.lock(), Some(releaser_id));
    assert_eq!(rc.live_blocks(), 0);
}

#[test]
fn test_concurrent_retain_release_pairs() {
    const THREADS: usize = 8;
    const PAIRS: usize = 10_000;

    let rc = RefCountCollector::default();
    let block = rc.allocate(32);

    thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                for _ in 0..PAIRS {
                    assert!(rc.retain(block));
                    assert!(!rc.release(block));
                }
            });
        }
    });

    assert_eq!(rc.refcount(block), 1);
    assert_eq!(rc.live_blocks(), 1);
    assert!(rc.release(block));
    assert_eq!(rc.live_blocks(), 0);
}

#[test]
fn test_concurrent_release_frees_exactly_once() {
    const THREADS: usize = 16;

    let rc = RefCountCollector::default();
    let block = rc.allocate(16);
    for _ in 1..THREADS {
        rc.retain(block);
    }

    let destroyed = AtomicUsize::new(0);
    thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                if rc.release(block) {
                    destroyed.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
    });

    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    assert_eq!(rc.stats().total_frees, 1);
}

#[test]
fn test_cycles_are_never_reclaimed() {
    let rc = RefCountCollector::default();
    let a = alloc_value(&rc, 0, Mutex::new(None::<objrt_gc::Block>));
    let b = alloc_value(&rc, 0, Mutex::new(Some(a)));
    let a_ptr = a.downcast_ptr::<Mutex<Option<objrt_gc::Block>>>().expect("typed");
    unsafe { *a_ptr.as_ref().lock() = Some(b) };

    assert_eq!(rc.collect(&[]), Default::default());
    let report = rc.teardown();
    assert_eq!(report.leaked_blocks, 2);

    rc.release(a);
    rc.release(b);
}
