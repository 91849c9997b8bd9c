//! Every block goes through the configured allocator vtable

use std::alloc::Layout;
use std::sync::atomic::{AtomicUsize, Ordering};

use objrt_gc::{AllocatorVTable, Backend, GcConfig, build_collector};

static MALLOCS: AtomicUsize = AtomicUsize::new(0);
static FREES: AtomicUsize = AtomicUsize::new(0);
static REALLOCS: AtomicUsize = AtomicUsize::new(0);

unsafe fn counting_malloc(layout: Layout) -> *mut u8 {
    MALLOCS.fetch_add(1, Ordering::SeqCst);
    unsafe { std::alloc::alloc_zeroed(layout) }
}

unsafe fn counting_free(ptr: *mut u8, layout: Layout) {
    FREES.fetch_add(1, Ordering::SeqCst);
    unsafe { std::alloc::dealloc(ptr, layout) }
}

unsafe fn counting_realloc(ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
    REALLOCS.fetch_add(1, Ordering::SeqCst);
    unsafe { std::alloc::realloc(ptr, layout, new_size) }
}

const COUNTING: AllocatorVTable = AllocatorVTable {
    malloc: counting_malloc,
    free: counting_free,
    realloc: counting_realloc,
};

// Both backends share the counters, so they run in one test
#[test]
fn test_backends_allocate_through_vtable() {
    let rc = build_collector(
        &GcConfig::default()
            .with_backend(Backend::RefCount)
            .with_vtable(COUNTING),
    );
    let blocks: Vec<_> = (0..5).map(|i| rc.allocate(8 * (i + 1))).collect();
    assert_eq!(MALLOCS.load(Ordering::SeqCst), 5);
    for block in &blocks {
        rc.release_or_collect(*block);
    }
    assert_eq!(FREES.load(Ordering::SeqCst), 5);

    let grown = rc.allocate(4);
    let grown = rc.resize(grown, 400).expect("single owner");
    assert_eq!(REALLOCS.load(Ordering::SeqCst), 1);
    rc.release_or_collect(grown);
    assert_eq!(MALLOCS.load(Ordering::SeqCst), 6);
    assert_eq!(FREES.load(Ordering::SeqCst), 6);

    let ms = build_collector(
        &GcConfig::default()
            .with_backend(Backend::MarkSweep)
            .with_vtable(COUNTING),
    );
    let kept = ms.allocate(16);
    for _ in 0..3 {
        ms.allocate(16);
    }
    assert_eq!(MALLOCS.load(Ordering::SeqCst), 10);

    let stats = ms.collect(&[kept]);
    assert_eq!(stats.reclaimed_blocks, 3);
    assert_eq!(FREES.load(Ordering::SeqCst), 9);

    ms.teardown();
    assert_eq!(FREES.load(Ordering::SeqCst), 10);
    assert_eq!(MALLOCS.load(Ordering::SeqCst), FREES.load(Ordering::SeqCst));
}
