//! Stop-the-world mark/sweep backend
//!
//! ## Design
//!
//! - **Live-block registry**: every block this collector allocated, keyed by address
//! - **Explicit cycles**: nothing is reclaimed until [`Collector::collect`] runs
//! - **Roots**: explicit roots passed to `collect`, pinned blocks, non-empty
//!   [`RootSlot`]s, and every `Manual` block
//! - **Worklist marking**: gray blocks are traced through their payload trace
//!   function; a non-white block is never queued twice, so cycles terminate
//! - **Sweep**: white `Auto` blocks are freed, survivors are reset to white
//!
//! A cycle holds the registry lock from the first mark to the end of the
//! sweep, so allocations on other threads wait for it. Root mutation during a
//! cycle is not supported.

use std::collections::VecDeque;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::allocator::AllocatorVTable;
use crate::collector::{
    BlockCounters, BlockRequest, CollectStats, Collector, CollectorStats, TeardownReport,
    create_block, destroy_block, resize_block,
};
use crate::error::{GcError, GcResult};
use crate::gc::Backend;
use crate::header::{Block, MarkColor, TrackMode};
use crate::roots::{RootSlot, RootTable};

/// Default collection threshold (1MB of live payload)
pub const DEFAULT_GC_THRESHOLD: usize = 1024 * 1024;

/// Default number of leaked blocks itemised at teardown
pub const DEFAULT_LEAK_REPORT_LIMIT: usize = 20;

/// Mark/sweep collector
pub struct MarkSweepCollector {
    vtable: AllocatorVTable,
    /// Live-block registry
    registry: Mutex<FxHashSet<Block>>,
    /// Pin counts from `retain_or_mark`
    pins: Mutex<FxHashMap<Block, usize>>,
    roots: Arc<RootTable>,
    counters: BlockCounters,
    /// Threshold for `should_collect`
    gc_threshold: AtomicUsize,
    leak_report_limit: AtomicUsize,
    /// Number of collections performed
    collection_count: AtomicUsize,
    /// Blocks reclaimed in last collection
    last_reclaimed: AtomicUsize,
    /// Total pause time in nanoseconds (accumulated across all collections)
    total_pause_nanos: AtomicU64,
    /// Last pause time in nanoseconds
    last_pause_nanos: AtomicU64,
}

impl MarkSweepCollector {
    /// Create a collector allocating through `vtable`
    pub fn new(vtable: AllocatorVTable) -> Self {
        Self {
            vtable,
            registry: Mutex::new(FxHashSet::default()),
            pins: Mutex::new(FxHashMap::default()),
            roots: RootTable::new(),
            counters: BlockCounters::default(),
            gc_threshold: AtomicUsize::new(DEFAULT_GC_THRESHOLD),
            leak_report_limit: AtomicUsize::new(DEFAULT_LEAK_REPORT_LIMIT),
            collection_count: AtomicUsize::new(0),
            last_reclaimed: AtomicUsize::new(0),
            total_pause_nanos: AtomicU64::new(0),
            last_pause_nanos: AtomicU64::new(0),
        }
    }

    /// Create a collector with a custom collection threshold
    pub fn with_threshold(vtable: AllocatorVTable, threshold: usize) -> Self {
        let collector = Self::new(vtable);
        collector.set_gc_threshold(threshold);
        collector
    }

    /// Get GC threshold
    pub fn gc_threshold(&self) -> usize {
        self.gc_threshold.load(Ordering::Relaxed)
    }

    /// Set GC threshold
    pub fn set_gc_threshold(&self, threshold: usize) {
        self.gc_threshold.store(threshold, Ordering::Relaxed);
    }

    /// Cap on blocks listed individually in the teardown leak report
    pub fn set_leak_report_limit(&self, limit: usize) {
        self.leak_report_limit.store(limit, Ordering::Relaxed);
    }

    /// Live payload bytes reached the threshold
    pub fn should_collect(&self) -> bool {
        self.counters.live_bytes() >= self.gc_threshold()
    }

    /// Root slot registry
    pub fn roots(&self) -> &Arc<RootTable> {
        &self.roots
    }

    /// Register a named root slot
    pub fn register_root(&self, name: impl Into<String>) -> RootSlot {
        self.roots.register(name)
    }

    /// Whether `block` is in the live-block registry
    pub fn contains(&self, block: Block) -> bool {
        self.registry.lock().contains(&block)
    }

    /// Snapshot of the live-block registry
    pub fn live_set(&self) -> FxHashSet<Block> {
        self.registry.lock().clone()
    }

    /// Allocate a block the sweep never reclaims; release it with [`free`](Self::free)
    pub fn allocate_manual(&self, size: usize) -> Block {
        self.allocate_with(
            BlockRequest::raw(size).with_track(TrackMode::Manual),
            &mut |_| {},
        )
    }

    /// Hand a manual block over to the sweep
    pub fn adopt(&self, block: Block) {
        block.header().set_track(TrackMode::Auto);
    }

    /// Free a manual block now. Managed (`Auto`) blocks are refused.
    pub fn free(&self, block: Block) -> bool {
        {
            let mut registry = self.registry.lock();
            if !registry.contains(&block) {
                tracing::warn!(target: "objrt::gc", block = ?block.as_ptr(), "free of unknown block");
                return false;
            }
            if block.header().track() == TrackMode::Auto {
                tracing::warn!(target: "objrt::gc", block = ?block.as_ptr(), "can not free managed block");
                return false;
            }
            if !registry.remove(&block) {
                return false;
            }
        }

        self.pins.lock().remove(&block);
        let size = block.size();
        // SAFETY: removed from the registry, so this is the only release
        unsafe { destroy_block(&self.vtable, block) };
        self.counters.on_free(size);
        true
    }

    /// Keep `block` alive across collections until a matching [`unpin`](Self::unpin)
    pub fn pin(&self, block: Block) {
        if !self.contains(block) {
            tracing::warn!(target: "objrt::gc", block = ?block.as_ptr(), "pin of unknown block");
            return;
        }
        *self.pins.lock().entry(block).or_insert(0) += 1;
    }

    /// Drop one pin. Returns false if `block` was not pinned.
    pub fn unpin(&self, block: Block) -> bool {
        let mut pins = self.pins.lock();
        match pins.get_mut(&block) {
            Some(count) if *count > 1 => {
                *count -= 1;
                true
            }
            Some(_) => {
                pins.remove(&block);
                true
            }
            None => false,
        }
    }

    /// Whether `block` has at least one pin
    pub fn is_pinned(&self, block: Block) -> bool {
        self.pins.lock().contains_key(&block)
    }

    fn gather_roots(&self, registry: &FxHashSet<Block>, extra: &[Block]) -> Vec<Block> {
        let mut roots: Vec<Block> = extra.to_vec();
        roots.extend(self.pins.lock().keys().copied());
        roots.extend(self.roots.targets());
        roots.extend(
            registry
                .iter()
                .filter(|block| block.header().track() == TrackMode::Manual)
                .copied(),
        );
        roots
    }

    /// Gray `block` if it is ours and still white.
    fn shade(registry: &FxHashSet<Block>, block: Block, worklist: &mut VecDeque<Block>) {
        if !registry.contains(&block) {
            tracing::warn!(
                target: "objrt::gc",
                block = ?block.as_ptr(),
                "reference to a block outside the registry"
            );
            return;
        }
        let header = block.header();
        if header.mark() == MarkColor::White {
            header.set_mark(MarkColor::Gray);
            worklist.push_back(block);
        }
    }

    /// Mark phase: trace from roots and mark all reachable blocks
    fn mark(&self, registry: &FxHashSet<Block>, roots: &[Block]) -> usize {
        let mut worklist: VecDeque<Block> = VecDeque::new();
        for &root in roots {
            Self::shade(registry, root, &mut worklist);
        }

        let mut marked = 0;
        while let Some(block) = worklist.pop_front() {
            let header = block.header();

            // Skip if already black (fully processed)
            if header.mark() == MarkColor::Black {
                continue;
            }

            if let Some(trace_fn) = header.trace_fn() {
                // SAFETY: registered blocks hold initialized payloads
                unsafe {
                    trace_fn(block.payload().as_ptr(), &mut |child| {
                        Self::shade(registry, child, &mut worklist);
                    });
                }
            }

            header.set_mark(MarkColor::Black);
            marked += 1;
        }
        marked
    }

    /// Sweep phase: unlink white `Auto` blocks, reset survivors to white
    fn sweep(registry: &mut FxHashSet<Block>) -> Vec<Block> {
        let mut dead = Vec::new();
        registry.retain(|block| {
            let header = block.header();
            if header.mark() == MarkColor::White && header.track() == TrackMode::Auto {
                dead.push(*block);
                false
            } else {
                header.set_mark(MarkColor::White);
                true
            }
        });
        dead
    }

    /// Return swept blocks to the allocator. Runs without the registry lock.
    fn reclaim(&self, dead: Vec<Block>) -> usize {
        let mut bytes = 0;
        for block in dead {
            let size = block.size();
            // SAFETY: unlinked from the registry by the sweep, released exactly once
            unsafe { destroy_block(&self.vtable, block) };
            self.counters.on_free(size);
            bytes += size;
        }
        bytes
    }
}

impl Default for MarkSweepCollector {
    fn default() -> Self {
        Self::new(AllocatorVTable::system())
    }
}

impl Collector for MarkSweepCollector {
    fn backend(&self) -> Backend {
        Backend::MarkSweep
    }

    fn vtable(&self) -> &AllocatorVTable {
        &self.vtable
    }

    fn allocate_with(&self, request: BlockRequest, init: &mut dyn FnMut(NonNull<u8>)) -> Block {
        let block = create_block(&self.vtable, &request, init);
        self.registry.lock().insert(block);
        self.counters.on_alloc(request.size);
        block
    }

    fn retain_or_mark(&self, block: Block) {
        self.pin(block);
    }

    fn release_or_collect(&self, block: Block) {
        self.unpin(block);
    }

    fn resize(&self, block: Block, new_size: usize) -> GcResult<Block> {
        let mut registry = self.registry.lock();
        if !registry.contains(&block) || !block.is_valid() {
            return Err(GcError::InvalidBlock(block.as_ptr() as usize));
        }
        if block.header().type_id().is_some() {
            return Err(GcError::TypedResize);
        }

        let old_size = block.size();
        registry.remove(&block);
        // SAFETY: raw block owned by this collector, caller holds the only handle
        let resized = unsafe { resize_block(&self.vtable, block, new_size) };
        registry.insert(resized);
        drop(registry);

        let mut pins = self.pins.lock();
        if let Some(count) = pins.remove(&block) {
            pins.insert(resized, count);
        }
        self.counters.on_resize(old_size, new_size);
        Ok(resized)
    }

    fn collect(&self, roots: &[Block]) -> CollectStats {
        let start = Instant::now();
        let mut registry = self.registry.lock();

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "objrt::gc",
            roots = roots.len(),
            heap_bytes = self.counters.live_bytes(),
            blocks = registry.len(),
            "GC cycle starting"
        );

        let all_roots = self.gather_roots(&registry, roots);
        let marked = self.mark(&registry, &all_roots);
        let dead = Self::sweep(&mut registry);
        drop(registry);

        let reclaimed_blocks = dead.len();
        let reclaimed_bytes = self.reclaim(dead);

        let elapsed = start.elapsed();
        let elapsed_nanos = elapsed.as_nanos() as u64;

        #[cfg(feature = "gc_logging")]
        let collection_num = self.collection_count.fetch_add(1, Ordering::Relaxed) + 1;
        #[cfg(not(feature = "gc_logging"))]
        self.collection_count.fetch_add(1, Ordering::Relaxed);

        self.last_reclaimed
            .store(reclaimed_blocks, Ordering::Relaxed);
        self.total_pause_nanos
            .fetch_add(elapsed_nanos, Ordering::Relaxed);
        self.last_pause_nanos
            .store(elapsed_nanos, Ordering::Relaxed);

        #[cfg(feature = "gc_logging")]
        tracing::info!(
            target: "objrt::gc",
            collection = collection_num,
            marked,
            reclaimed_blocks,
            reclaimed_bytes,
            pause_us = elapsed.as_micros() as u64,
            live_bytes = self.counters.live_bytes(),
            "GC cycle complete"
        );

        CollectStats {
            marked,
            reclaimed_blocks,
            reclaimed_bytes,
        }
    }

    fn live_blocks(&self) -> usize {
        self.counters.live_blocks()
    }

    fn stats(&self) -> CollectorStats {
        let mut stats = CollectorStats {
            collection_count: self.collection_count.load(Ordering::Relaxed),
            last_reclaimed: self.last_reclaimed.load(Ordering::Relaxed),
            total_pause_time: Duration::from_nanos(self.total_pause_nanos.load(Ordering::Relaxed)),
            last_pause_time: Duration::from_nanos(self.last_pause_nanos.load(Ordering::Relaxed)),
            ..CollectorStats::default()
        };
        self.counters.fill(&mut stats);
        stats
    }

    fn teardown(&self) -> TeardownReport {
        let all: Vec<Block> = self.registry.lock().drain().collect();
        let mut pins = self.pins.lock();
        let limit = self.leak_report_limit.load(Ordering::Relaxed);

        let mut report = TeardownReport::default();
        for &block in &all {
            let rooted = self.roots.name_of(block);
            let held = pins.contains_key(&block)
                || rooted.is_some()
                || block.header().track() == TrackMode::Manual;
            if !held {
                continue;
            }

            if report.leaked_blocks < limit {
                tracing::info!(
                    target: "objrt::gc",
                    block = ?block.as_ptr(),
                    size = block.size(),
                    root = rooted.as_deref().unwrap_or("<pinned>"),
                    "memory leak block"
                );
            }
            report.leaked_blocks += 1;
            report.leaked_bytes += block.size();
        }
        pins.clear();
        drop(pins);
        self.roots.clear_all();

        report.reclaimed_blocks = all.len();
        self.reclaim(all);

        if report.leaked_blocks > 0 {
            tracing::warn!(
                target: "objrt::gc",
                leaked_blocks = report.leaked_blocks,
                leaked_bytes = report.leaked_bytes,
                "blocks still held at teardown"
            );
        }
        report
    }
}

impl Drop for MarkSweepCollector {
    fn drop(&mut self) {
        if !self.registry.get_mut().is_empty() {
            self.teardown();
        }
    }
}
