//! Collector abstraction shared by both backends
//!
//! Client code talks to `dyn Collector` only. The two implementations,
//! [`RefCountCollector`](crate::refcount::RefCountCollector) and
//! [`MarkSweepCollector`](crate::mark_sweep::MarkSweepCollector), differ in
//! when a block dies, never in how it is laid out or allocated.

use std::any::TypeId;
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam_utils::CachePadded;

use crate::allocator::AllocatorVTable;
use crate::error::GcResult;
use crate::gc::Backend;
use crate::header::{
    BLOCK_ALIGN, Block, BlockHeader, DropFn, PAYLOAD_OFFSET, TraceFn, TrackMode, block_layout,
};
use crate::trace::{Trace, drop_payload, trace_payload};

/// Everything a backend needs to know to lay out a new block
#[derive(Clone, Copy)]
pub struct BlockRequest {
    /// Payload size in bytes
    pub size: usize,
    /// Type tag stored in the header
    pub tag: u32,
    /// Sweep eligibility under mark-sweep
    pub track: TrackMode,
    /// Rust type of the payload, for checked downcasts
    pub type_id: Option<TypeId>,
    /// Payload destructor
    pub drop_fn: Option<DropFn>,
    /// Payload tracer
    pub trace_fn: Option<TraceFn>,
}

impl BlockRequest {
    /// Untyped zeroed bytes.
    pub fn raw(size: usize) -> Self {
        Self {
            size,
            tag: 0,
            track: TrackMode::Auto,
            type_id: None,
            drop_fn: None,
            trace_fn: None,
        }
    }

    /// Block holding one `T`.
    ///
    /// # Panics
    /// Panics if `T` needs more than [`BLOCK_ALIGN`] alignment.
    pub fn for_type<T: Trace + 'static>() -> Self {
        assert!(
            std::mem::align_of::<T>() <= BLOCK_ALIGN,
            "payload alignment {} exceeds block alignment {BLOCK_ALIGN}",
            std::mem::align_of::<T>()
        );
        Self {
            size: std::mem::size_of::<T>(),
            tag: 0,
            track: TrackMode::Auto,
            type_id: Some(TypeId::of::<T>()),
            drop_fn: if std::mem::needs_drop::<T>() {
                Some(drop_payload::<T> as DropFn)
            } else {
                None
            },
            trace_fn: if T::NEEDS_TRACE {
                Some(trace_payload::<T> as TraceFn)
            } else {
                None
            },
        }
    }

    /// Set the type tag.
    pub fn with_tag(mut self, tag: u32) -> Self {
        self.tag = tag;
        self
    }

    /// Set the tracking mode.
    pub fn with_track(mut self, track: TrackMode) -> Self {
        self.track = track;
        self
    }
}

impl fmt::Debug for BlockRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockRequest")
            .field("size", &self.size)
            .field("tag", &self.tag)
            .field("track", &self.track)
            .field("typed", &self.type_id.is_some())
            .field("drops", &self.drop_fn.is_some())
            .field("traces", &self.trace_fn.is_some())
            .finish()
    }
}

/// Result of one collection cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectStats {
    /// Blocks found reachable
    pub marked: usize,
    /// Blocks reclaimed
    pub reclaimed_blocks: usize,
    /// Payload bytes reclaimed
    pub reclaimed_bytes: usize,
}

/// What `teardown` found still alive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Blocks an owner never released (refcount) or still pinned/rooted (mark-sweep)
    pub leaked_blocks: usize,
    /// Payload bytes of those blocks
    pub leaked_bytes: usize,
    /// Blocks freed by the teardown itself
    pub reclaimed_blocks: usize,
}

/// Running totals for a collector
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectorStats {
    /// Blocks currently allocated
    pub live_blocks: usize,
    /// Payload bytes currently allocated
    pub live_bytes: usize,
    /// Blocks ever allocated
    pub total_allocations: u64,
    /// Blocks ever returned to the allocator
    pub total_frees: u64,
    /// Completed collection cycles
    pub collection_count: usize,
    /// Blocks reclaimed by the last cycle
    pub last_reclaimed: usize,
    /// Accumulated collection time
    pub total_pause_time: Duration,
    /// Duration of the last cycle
    pub last_pause_time: Duration,
}

/// Memory-management contract every backend implements
pub trait Collector: Send + Sync {
    /// Which backend this is
    fn backend(&self) -> Backend;

    /// Vtable this collector allocates through
    fn vtable(&self) -> &AllocatorVTable;

    /// Allocate a stamped block. `init` fills the payload before the block
    /// becomes visible to the collector.
    fn allocate_with(&self, request: BlockRequest, init: &mut dyn FnMut(NonNull<u8>)) -> Block;

    /// Allocate `size` zeroed payload bytes
    fn allocate(&self, size: usize) -> Block {
        self.allocate_with(BlockRequest::raw(size), &mut |_| {})
    }

    /// Allocate `size` zeroed payload bytes carrying a type tag
    fn allocate_tagged(&self, size: usize, tag: u32) -> Block {
        self.allocate_with(BlockRequest::raw(size).with_tag(tag), &mut |_| {})
    }

    /// Take a reference (refcount) or pin as a root (mark-sweep)
    fn retain_or_mark(&self, block: Block);

    /// Drop a reference (refcount, may destroy) or unpin (mark-sweep, reclaimed
    /// by a later cycle once unreachable)
    fn release_or_collect(&self, block: Block);

    /// Resize a raw block held by a single owner; the old handle is dead afterwards
    fn resize(&self, block: Block, new_size: usize) -> GcResult<Block>;

    /// Run a collection cycle with `roots` as extra roots. A no-op for reference counting.
    fn collect(&self, roots: &[Block]) -> CollectStats;

    /// Number of blocks currently allocated
    fn live_blocks(&self) -> usize;

    /// Running totals
    fn stats(&self) -> CollectorStats;

    /// Reclaim what the backend can and report what was left behind
    fn teardown(&self) -> TeardownReport;
}

/// Allocate a GC-managed value
///
/// The returned block is owned by the caller under reference counting
/// (count 1) and unrooted under mark-sweep.
pub fn alloc_value<T>(collector: &dyn Collector, tag: u32, value: T) -> Block
where
    T: Trace + Send + Sync + 'static,
{
    let request = BlockRequest::for_type::<T>().with_tag(tag);
    let mut value = Some(value);
    collector.allocate_with(request, &mut |payload| {
        if let Some(value) = value.take() {
            // SAFETY: payload is sized and aligned for T per BlockRequest::for_type
            unsafe { payload.cast::<T>().as_ptr().write(value) };
        }
    })
}

/// Allocation counters, padded since every thread bumps them
#[derive(Default)]
pub(crate) struct BlockCounters {
    live_blocks: CachePadded<AtomicUsize>,
    live_bytes: CachePadded<AtomicUsize>,
    allocations: AtomicU64,
    frees: AtomicU64,
}

impl BlockCounters {
    pub(crate) fn on_alloc(&self, size: usize) {
        self.live_blocks.fetch_add(1, Ordering::Relaxed);
        self.live_bytes.fetch_add(size, Ordering::Relaxed);
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_free(&self, size: usize) {
        self.live_blocks.fetch_sub(1, Ordering::Relaxed);
        self.live_bytes.fetch_sub(size, Ordering::Relaxed);
        self.frees.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_resize(&self, old_size: usize, new_size: usize) {
        self.live_bytes.fetch_sub(old_size, Ordering::Relaxed);
        self.live_bytes.fetch_add(new_size, Ordering::Relaxed);
    }

    pub(crate) fn live_blocks(&self) -> usize {
        self.live_blocks.load(Ordering::Relaxed)
    }

    pub(crate) fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Relaxed)
    }

    pub(crate) fn fill(&self, stats: &mut CollectorStats) {
        stats.live_blocks = self.live_blocks();
        stats.live_bytes = self.live_bytes();
        stats.total_allocations = self.allocations.load(Ordering::Relaxed);
        stats.total_frees = self.frees.load(Ordering::Relaxed);
    }
}

/// Obtain memory through `vtable`, write and stamp the header, run `init`.
pub(crate) fn create_block(
    vtable: &AllocatorVTable,
    request: &BlockRequest,
    init: &mut dyn FnMut(NonNull<u8>),
) -> Block {
    let layout = block_layout(request.size);
    let header = vtable.allocate(layout).cast::<BlockHeader>();

    // SAFETY: fresh allocation sized and aligned for the header
    unsafe {
        header.as_ptr().write(BlockHeader::new(
            request.size,
            request.tag,
            request.track,
            request.type_id,
            request.drop_fn,
            request.trace_fn,
        ));
        header.as_ref().stamp();
    }

    // SAFETY: header is initialized and stamped
    let block = unsafe { Block::from_header(header) };
    init(block.payload());
    block
}

/// Run the payload destructor, clear the magic value, return the memory.
///
/// # Safety
/// `block` must have been created through `vtable` and must not be used again.
pub(crate) unsafe fn destroy_block(vtable: &AllocatorVTable, block: Block) {
    let layout = block.layout();
    if let Some(drop_fn) = block.header().drop_fn() {
        // SAFETY: payload was initialized by the allocating caller
        unsafe { drop_fn(block.payload().as_ptr()) };
    }
    block.header().invalidate();
    // SAFETY: block memory came from this vtable with this layout
    unsafe {
        vtable.release(
            NonNull::new_unchecked(block.as_ptr() as *mut u8),
            layout,
        )
    };
}

/// Reallocate a raw block to carry `new_size` payload bytes.
///
/// Bytes past the old payload are zeroed.
///
/// # Safety
/// `block` must have been created through `vtable`, hold no typed value,
/// and have no other users.
pub(crate) unsafe fn resize_block(vtable: &AllocatorVTable, block: Block, new_size: usize) -> Block {
    let old_size = block.size();
    let old_layout = block.layout();
    let new_layout = block_layout(new_size);

    // SAFETY: forwarded caller contract
    let moved = unsafe {
        vtable.resize(
            NonNull::new_unchecked(block.as_ptr() as *mut u8),
            old_layout,
            new_layout.size(),
        )
    };
    let header = moved.cast::<BlockHeader>();

    // SAFETY: realloc preserved the header; we are the only user
    unsafe {
        BlockHeader::set_size(header.as_ptr(), new_size);
        if new_size > old_size {
            let tail = (moved.as_ptr()).add(PAYLOAD_OFFSET + old_size);
            std::ptr::write_bytes(tail, 0, new_size - old_size);
        }
        Block::from_header(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_request() {
        let request = BlockRequest::raw(24).with_tag(9);
        assert_eq!(request.size, 24);
        assert_eq!(request.tag, 9);
        assert_eq!(request.track, TrackMode::Auto);
        assert!(request.type_id.is_none());
        assert!(request.drop_fn.is_none());
    }

    #[test]
    fn test_typed_request() {
        let request = BlockRequest::for_type::<String>();
        assert_eq!(request.size, std::mem::size_of::<String>());
        assert_eq!(request.type_id, Some(TypeId::of::<String>()));
        assert!(request.drop_fn.is_some());
        assert!(request.trace_fn.is_none());

        let request = BlockRequest::for_type::<Option<Block>>();
        assert!(request.drop_fn.is_none());
        assert!(request.trace_fn.is_some());
    }

    #[test]
    fn test_create_and_destroy_block() {
        let vtable = AllocatorVTable::system();
        let block = create_block(&vtable, &BlockRequest::raw(40).with_tag(3), &mut |payload| {
            // SAFETY: 40 payload bytes
            unsafe { payload.as_ptr().write(0x5A) };
        });

        assert!(block.is_valid());
        assert_eq!(block.size(), 40);
        assert_eq!(block.tag(), 3);
        assert_eq!(unsafe { block.payload().as_ptr().read() }, 0x5A);
        assert_eq!(unsafe { block.payload().as_ptr().add(39).read() }, 0);

        unsafe { destroy_block(&vtable, block) };
    }

    #[test]
    fn test_resize_block_zeroes_tail() {
        let vtable = AllocatorVTable::system();
        let block = create_block(&vtable, &BlockRequest::raw(8), &mut |payload| unsafe {
            std::ptr::write_bytes(payload.as_ptr(), 0xFF, 8);
        });

        let grown = unsafe { resize_block(&vtable, block, 64) };
        assert!(grown.is_valid());
        assert_eq!(grown.size(), 64);
        let bytes = unsafe { std::slice::from_raw_parts(grown.payload().as_ptr(), 64) };
        assert!(bytes[..8].iter().all(|&b| b == 0xFF));
        assert!(bytes[8..].iter().all(|&b| b == 0));

        unsafe { destroy_block(&vtable, grown) };
    }
}
