//! Atomic reference-counting backend
//!
//! A block is `Live(n)` with `n >= 1` from allocation until the release that
//! takes `n` to zero. That release runs the payload destructor and returns the
//! memory on the releasing thread. Cycles are never reclaimed.

use std::ptr::NonNull;

use parking_lot::RwLock;

use crate::allocator::AllocatorVTable;
use crate::atomic::MAX_REF_COUNT;
use crate::collector::{
    BlockCounters, BlockRequest, CollectStats, Collector, CollectorStats, TeardownReport,
    create_block, destroy_block, resize_block,
};
use crate::error::{GcError, GcResult};
use crate::gc::Backend;
use crate::header::Block;

/// Debug hook: receives the block and its count before the operation.
pub type RefHook = fn(Block, i32);

#[derive(Default, Clone, Copy)]
struct RefHooks {
    on_new: Option<RefHook>,
    on_ref: Option<RefHook>,
    on_unref: Option<RefHook>,
}

/// Reference-counting collector
pub struct RefCountCollector {
    vtable: AllocatorVTable,
    counters: BlockCounters,
    hooks: RwLock<RefHooks>,
}

impl RefCountCollector {
    /// Create a collector allocating through `vtable`
    pub fn new(vtable: AllocatorVTable) -> Self {
        Self {
            vtable,
            counters: BlockCounters::default(),
            hooks: RwLock::new(RefHooks::default()),
        }
    }

    /// Called after every allocation with the initial count
    pub fn set_new_hook(&self, hook: Option<RefHook>) {
        self.hooks.write().on_new = hook;
    }

    /// Called before every retain
    pub fn set_ref_hook(&self, hook: Option<RefHook>) {
        self.hooks.write().on_ref = hook;
    }

    /// Called before every release
    pub fn set_unref_hook(&self, hook: Option<RefHook>) {
        self.hooks.write().on_unref = hook;
    }

    /// Snapshot of the hook table. Hooks run without the lock held, so they
    /// may replace themselves or re-enter the collector.
    fn hooks(&self) -> RefHooks {
        *self.hooks.read()
    }

    /// Current count of `block`
    pub fn refcount(&self, block: Block) -> i32 {
        block.header().refcount().get()
    }

    /// Take one more reference.
    ///
    /// Returns false, leaving the block untouched, if its count is outside
    /// `(0, MAX_REF_COUNT)`.
    ///
    /// # Panics
    /// Panics if `block` does not carry the magic value.
    pub fn retain(&self, block: Block) -> bool {
        let count = self.checked_count(block, "retain");
        if count.is_none() {
            return false;
        }

        if let Some(hook) = self.hooks().on_ref {
            hook(block, block.header().refcount().get());
        }

        block.header().refcount().inc();
        true
    }

    /// Drop one reference. Returns true if this call destroyed the block.
    ///
    /// # Panics
    /// Panics if `block` does not carry the magic value.
    pub fn release(&self, block: Block) -> bool {
        if self.checked_count(block, "release").is_none() {
            return false;
        }

        if let Some(hook) = self.hooks().on_unref {
            hook(block, block.header().refcount().get());
        }

        if !block.header().refcount().dec_and_test() {
            return false;
        }

        let size = block.size();
        // SAFETY: this thread observed the transition to zero, nobody else owns the block
        unsafe { destroy_block(&self.vtable, block) };
        self.counters.on_free(size);
        true
    }

    fn checked_count(&self, block: Block, op: &'static str) -> Option<i32> {
        if !block.is_valid() {
            panic!("block integrity check failed on {op}: {:p}", block.as_ptr());
        }

        let refcount = block.header().refcount();
        if !refcount.is_valid(MAX_REF_COUNT) {
            tracing::warn!(
                target: "objrt::gc",
                block = ?block.as_ptr(),
                count = refcount.get(),
                op,
                "block refcount check failed"
            );
            return None;
        }
        Some(refcount.get())
    }
}

impl Default for RefCountCollector {
    fn default() -> Self {
        Self::new(AllocatorVTable::system())
    }
}

impl Collector for RefCountCollector {
    fn backend(&self) -> Backend {
        Backend::RefCount
    }

    fn vtable(&self) -> &AllocatorVTable {
        &self.vtable
    }

    fn allocate_with(&self, request: BlockRequest, init: &mut dyn FnMut(NonNull<u8>)) -> Block {
        let block = create_block(&self.vtable, &request, init);
        self.counters.on_alloc(request.size);

        if let Some(hook) = self.hooks().on_new {
            hook(block, block.header().refcount().get());
        }
        block
    }

    fn retain_or_mark(&self, block: Block) {
        self.retain(block);
    }

    fn release_or_collect(&self, block: Block) {
        self.release(block);
    }

    fn resize(&self, block: Block, new_size: usize) -> GcResult<Block> {
        if !block.is_valid() {
            return Err(GcError::InvalidBlock(block.as_ptr() as usize));
        }
        if block.header().type_id().is_some() {
            return Err(GcError::TypedResize);
        }
        let count = block.header().refcount().get();
        if count != 1 {
            return Err(GcError::SharedResize(count));
        }

        let old_size = block.size();
        // SAFETY: raw block, single owner, allocated through our vtable
        let resized = unsafe { resize_block(&self.vtable, block, new_size) };
        self.counters.on_resize(old_size, new_size);
        Ok(resized)
    }

    fn collect(&self, _roots: &[Block]) -> CollectStats {
        CollectStats::default()
    }

    fn live_blocks(&self) -> usize {
        self.counters.live_blocks()
    }

    fn stats(&self) -> CollectorStats {
        let mut stats = CollectorStats::default();
        self.counters.fill(&mut stats);
        stats
    }

    fn teardown(&self) -> TeardownReport {
        let report = TeardownReport {
            leaked_blocks: self.counters.live_blocks(),
            leaked_bytes: self.counters.live_bytes(),
            reclaimed_blocks: 0,
        };

        if report.leaked_blocks > 0 {
            tracing::warn!(
                target: "objrt::gc",
                leaked_blocks = report.leaked_blocks,
                leaked_bytes = report.leaked_bytes,
                "blocks still referenced at teardown"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::alloc_value;
    use std::sync::LazyLock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_allocate_starts_live_one() {
        let rc = RefCountCollector::default();
        let block = rc.allocate(32);

        assert!(block.is_valid());
        assert_eq!(rc.refcount(block), 1);
        assert_eq!(rc.live_blocks(), 1);

        assert!(rc.release(block));
        assert_eq!(rc.live_blocks(), 0);
    }

    #[test]
    fn test_retain_release_balance() {
        let rc = RefCountCollector::default();
        let block = rc.allocate(8);

        assert!(rc.retain(block));
        assert!(rc.retain(block));
        assert_eq!(rc.refcount(block), 3);

        assert!(!rc.release(block));
        assert!(!rc.release(block));
        assert!(rc.release(block));
        assert_eq!(rc.stats().total_frees, 1);
    }

    #[test]
    fn test_corrupt_count_is_ignored() {
        let rc = RefCountCollector::default();
        let block = rc.allocate(8);

        block.header().refcount().set(MAX_REF_COUNT);
        assert!(!rc.retain(block));
        assert!(!rc.release(block));
        assert_eq!(rc.live_blocks(), 1);

        block.header().refcount().set(1);
        assert!(rc.release(block));
    }

    #[test]
    fn test_resize_rejects_shared_and_typed() {
        let rc = RefCountCollector::default();

        let typed = alloc_value(&rc, 0, 5u64);
        assert_eq!(rc.resize(typed, 64), Err(GcError::TypedResize));
        rc.release(typed);

        let raw = rc.allocate(8);
        rc.retain(raw);
        assert_eq!(rc.resize(raw, 64), Err(GcError::SharedResize(2)));
        rc.release(raw);

        let raw = rc.resize(raw, 64).expect("single owner");
        assert_eq!(raw.size(), 64);
        assert_eq!(rc.stats().live_bytes, 64);
        rc.release(raw);
    }

    #[test]
    fn test_teardown_reports_leaks() {
        let rc = RefCountCollector::default();
        let kept = rc.allocate(10);
        let freed = rc.allocate(20);
        rc.release(freed);

        let report = rc.teardown();
        assert_eq!(report.leaked_blocks, 1);
        assert_eq!(report.leaked_bytes, 10);

        rc.release(kept);
    }

    static HOOK_CALLS: AtomicUsize = AtomicUsize::new(0);

    static ONE_SHOT: LazyLock<RefCountCollector> = LazyLock::new(RefCountCollector::default);
    static ONE_SHOT_CALLS: AtomicUsize = AtomicUsize::new(0);

    fn unregister_self(block: Block, _count: i32) {
        ONE_SHOT_CALLS.fetch_add(1, Ordering::SeqCst);
        ONE_SHOT.set_ref_hook(None);
        // Re-entering the collector from a hook must not block either
        assert!(ONE_SHOT.refcount(block) >= 1);
    }

    #[test]
    fn test_hook_can_unregister_itself() {
        ONE_SHOT.set_ref_hook(Some(unregister_self));
        let block = ONE_SHOT.allocate(8);

        assert!(ONE_SHOT.retain(block));
        assert!(ONE_SHOT.retain(block));
        assert_eq!(ONE_SHOT_CALLS.load(Ordering::SeqCst), 1);
        assert_eq!(ONE_SHOT.refcount(block), 3);

        ONE_SHOT.release(block);
        ONE_SHOT.release(block);
        assert!(ONE_SHOT.release(block));
    }

    fn count_hook(_block: Block, _count: i32) {
        HOOK_CALLS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_hooks_fire() {
        let rc = RefCountCollector::default();
        rc.set_new_hook(Some(count_hook));
        rc.set_ref_hook(Some(count_hook));
        rc.set_unref_hook(Some(count_hook));

        let block = rc.allocate(4);
        rc.retain(block);
        rc.release(block);
        rc.release(block);

        assert_eq!(HOOK_CALLS.load(Ordering::SeqCst), 4);
    }
}
