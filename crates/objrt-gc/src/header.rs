//! Checked block layout
//!
//! Every managed allocation is a [`BlockHeader`] followed by the payload at a
//! fixed offset:
//!
//! ```text
//! ┌──────────────────────────────┐ <- Block (NonNull<BlockHeader>)
//! │ check | size | tag           │
//! │ refcount | mark | track      │
//! │ type id | drop fn | trace fn │
//! ├──────────────────────────────┤ <- header + PAYLOAD_OFFSET
//! │ payload: [u8; size]          │
//! └──────────────────────────────┘
//! ```
//!
//! `check` holds [`BLOCK_MAGIC`] from [`BlockHeader::stamp`] until the block is
//! handed back to its allocator, at which point it is zeroed.

use std::alloc::Layout;
use std::any::TypeId;
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crate::atomic::RefCount;

/// Integrity tag written into every live header.
pub const BLOCK_MAGIC: usize = 0xCCCC_CCCC;

/// Alignment of every block and therefore the largest payload alignment.
pub const BLOCK_ALIGN: usize = 16;

/// Distance from the header to the payload.
pub const PAYLOAD_OFFSET: usize =
    (std::mem::size_of::<BlockHeader>() + BLOCK_ALIGN - 1) & !(BLOCK_ALIGN - 1);

/// Type-erased payload destructor.
pub type DropFn = unsafe fn(*mut u8);

/// Type-erased payload tracer: reports every block the payload references.
pub type TraceFn = unsafe fn(*const u8, &mut dyn FnMut(Block));

/// Mark color for tri-color marking
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkColor {
    /// Not yet visited
    White = 0,
    /// In worklist
    Gray = 1,
    /// Fully scanned
    Black = 2,
}

/// Whether the mark-sweep collector may reclaim a block on its own.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackMode {
    /// Freed explicitly by its owner, never swept
    Manual = 0,
    /// Reclaimed by the sweep once unreachable
    Auto = 1,
}

/// Layout of a whole block carrying `size` payload bytes.
///
/// # Panics
/// Panics if the total size overflows `isize::MAX`.
pub fn block_layout(size: usize) -> Layout {
    match PAYLOAD_OFFSET
        .checked_add(size)
        .and_then(|total| Layout::from_size_align(total, BLOCK_ALIGN).ok())
    {
        Some(layout) => layout,
        None => panic!("block payload of {size} bytes exceeds the maximum allocation size"),
    }
}

/// Header stamped at the start of every managed allocation
#[repr(C)]
pub struct BlockHeader {
    check: AtomicUsize,
    size: usize,
    tag: u32,
    refcount: RefCount,
    mark: AtomicU8,
    track: AtomicU8,
    type_id: Option<TypeId>,
    drop_fn: Option<DropFn>,
    trace_fn: Option<TraceFn>,
}

impl BlockHeader {
    /// Unstamped header. Nothing validates until [`stamp`](Self::stamp) runs.
    pub(crate) fn new(
        size: usize,
        tag: u32,
        track: TrackMode,
        type_id: Option<TypeId>,
        drop_fn: Option<DropFn>,
        trace_fn: Option<TraceFn>,
    ) -> Self {
        Self {
            check: AtomicUsize::new(0),
            size,
            tag,
            refcount: RefCount::new(),
            mark: AtomicU8::new(MarkColor::White as u8),
            track: AtomicU8::new(track as u8),
            type_id,
            drop_fn,
            trace_fn,
        }
    }

    /// Write the magic value. Integrity checks succeed from here on.
    pub fn stamp(&self) {
        debug_assert_eq!(
            self.check.load(Ordering::Relaxed),
            0,
            "block header stamped twice"
        );
        self.check.store(BLOCK_MAGIC, Ordering::Release);
    }

    /// True while the magic value is present.
    #[inline]
    pub fn is_stamped(&self) -> bool {
        self.check.load(Ordering::Acquire) == BLOCK_MAGIC
    }

    /// Zero the magic value right before the memory goes back to the allocator.
    pub(crate) fn invalidate(&self) {
        self.check.store(0, Ordering::Release);
    }

    /// Requested payload size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Type tag chosen by the allocating type system (0 = untyped)
    pub fn tag(&self) -> u32 {
        self.tag
    }

    /// Reference count (meaningful under the reference-count backend)
    pub fn refcount(&self) -> &RefCount {
        &self.refcount
    }

    /// Get mark color
    pub fn mark(&self) -> MarkColor {
        match self.mark.load(Ordering::Acquire) {
            0 => MarkColor::White,
            1 => MarkColor::Gray,
            _ => MarkColor::Black,
        }
    }

    /// Set mark color
    pub fn set_mark(&self, color: MarkColor) {
        self.mark.store(color as u8, Ordering::Release);
    }

    /// Tracking mode (meaningful under the mark-sweep backend)
    pub fn track(&self) -> TrackMode {
        match self.track.load(Ordering::Acquire) {
            0 => TrackMode::Manual,
            _ => TrackMode::Auto,
        }
    }

    /// Change the tracking mode
    pub fn set_track(&self, mode: TrackMode) {
        self.track.store(mode as u8, Ordering::Release);
    }

    /// Rust type stored in the payload, if it was allocated from a value
    pub fn type_id(&self) -> Option<TypeId> {
        self.type_id
    }

    /// Record a new payload size after reallocation.
    ///
    /// # Safety
    /// `header` must be initialized and not observed by any other thread.
    pub(crate) unsafe fn set_size(header: *mut BlockHeader, size: usize) {
        // SAFETY: exclusive access per the caller contract
        unsafe { (*header).size = size }
    }

    pub(crate) fn drop_fn(&self) -> Option<DropFn> {
        self.drop_fn
    }

    pub(crate) fn trace_fn(&self) -> Option<TraceFn> {
        self.trace_fn
    }
}

/// Check a raw header pointer: non-null and carrying [`BLOCK_MAGIC`].
///
/// # Safety
/// A non-null `header` must point to readable memory of at least
/// `size_of::<BlockHeader>()` bytes.
pub unsafe fn is_valid(header: *const BlockHeader) -> bool {
    if header.is_null() {
        return false;
    }
    // SAFETY: non-null and readable per the caller contract
    unsafe { (*header).is_stamped() }
}

/// Recover the owning structure from a pointer to one of its members.
///
/// `O` must begin with a [`BlockHeader`]; the header found `offset` bytes
/// before `member` is validated before anything is returned.
///
/// # Safety
/// `member` must be null or point `offset` bytes into a readable allocation
/// that starts with a `BlockHeader`-sized region.
pub unsafe fn cast_to_owner<O>(member: *const u8, offset: usize) -> Option<NonNull<O>> {
    if member.is_null() {
        return None;
    }
    // SAFETY: member lies `offset` bytes inside its owner per the caller contract
    let owner = unsafe { member.sub(offset) };
    // SAFETY: owner starts with a header-sized readable region
    if !unsafe { is_valid(owner as *const BlockHeader) } {
        return None;
    }
    NonNull::new(owner as *mut O)
}

/// Handle to a live managed block.
///
/// A `Block` is a plain address: copying it does not retain anything, and
/// using it after its block was released or swept is a caller bug.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Block(NonNull<BlockHeader>);

// SAFETY: the header's mutable state is atomic, the rest is immutable after
// stamping. Payload access goes through unsafe accessors.
unsafe impl Send for Block {}
unsafe impl Sync for Block {}

impl Block {
    /// Wrap a header pointer.
    ///
    /// # Safety
    /// `header` must point to an initialized, stamped header.
    pub(crate) unsafe fn from_header(header: NonNull<BlockHeader>) -> Self {
        Self(header)
    }

    /// Checked cast from a payload pointer back to its block.
    ///
    /// Returns `None` for null or for memory that does not carry the magic value.
    ///
    /// # Safety
    /// A non-null `payload` must point [`PAYLOAD_OFFSET`] bytes past readable memory.
    pub unsafe fn try_from_payload(payload: *const u8) -> Option<Self> {
        // SAFETY: forwarded caller contract
        unsafe { cast_to_owner::<BlockHeader>(payload, PAYLOAD_OFFSET) }.map(Self)
    }

    /// Like [`try_from_payload`](Self::try_from_payload) but fails fast.
    ///
    /// # Panics
    /// Panics if the integrity check fails.
    ///
    /// # Safety
    /// Same as [`try_from_payload`](Self::try_from_payload).
    pub unsafe fn from_payload(payload: *const u8) -> Self {
        // SAFETY: forwarded caller contract
        match unsafe { Self::try_from_payload(payload) } {
            Some(block) => block,
            None => panic!("block integrity check failed for payload {payload:p}"),
        }
    }

    /// Header reference.
    #[inline]
    pub fn header(&self) -> &BlockHeader {
        // SAFETY: a Block is only constructed for stamped headers; using it
        // after release is excluded by contract
        unsafe { self.0.as_ref() }
    }

    /// Raw header pointer.
    #[inline]
    pub fn as_ptr(&self) -> *mut BlockHeader {
        self.0.as_ptr()
    }

    /// Start of the payload.
    #[inline]
    pub fn payload(&self) -> NonNull<u8> {
        // SAFETY: every block is allocated with PAYLOAD_OFFSET bytes of header room
        unsafe { NonNull::new_unchecked((self.0.as_ptr() as *mut u8).add(PAYLOAD_OFFSET)) }
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.header().size()
    }

    /// Type tag.
    pub fn tag(&self) -> u32 {
        self.header().tag()
    }

    /// True while the header carries the magic value.
    pub fn is_valid(&self) -> bool {
        self.header().is_stamped()
    }

    /// Typed payload pointer, or `None` if the block does not hold a `T`.
    pub fn downcast_ptr<T: 'static>(&self) -> Option<NonNull<T>> {
        if !self.is_valid() || self.header().type_id() != Some(TypeId::of::<T>()) {
            return None;
        }
        Some(self.payload().cast::<T>())
    }

    /// Whole-block layout, as handed to the allocator.
    pub(crate) fn layout(&self) -> Layout {
        block_layout(self.size())
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("addr", &self.0.as_ptr())
            .field("size", &self.size())
            .field("tag", &self.tag())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C, align(16))]
    struct Payload([u8; 32]);

    #[repr(C, align(16))]
    struct Raw {
        header: BlockHeader,
        payload: Payload,
    }

    fn raw(tag: u32) -> Box<Raw> {
        Box::new(Raw {
            header: BlockHeader::new(32, tag, TrackMode::Auto, None, None, None),
            payload: Payload([0; 32]),
        })
    }

    #[test]
    fn test_payload_offset_is_aligned() {
        assert_eq!(PAYLOAD_OFFSET % BLOCK_ALIGN, 0);
        assert!(PAYLOAD_OFFSET >= std::mem::size_of::<BlockHeader>());
        assert_eq!(std::mem::offset_of!(Raw, payload), PAYLOAD_OFFSET);
    }

    #[test]
    fn test_stamp_makes_header_valid() {
        let r = raw(3);
        assert!(!unsafe { is_valid(&r.header) });
        r.header.stamp();
        assert!(unsafe { is_valid(&r.header) });
        r.header.invalidate();
        assert!(!unsafe { is_valid(&r.header) });
    }

    #[test]
    fn test_is_valid_rejects_null() {
        assert!(!unsafe { is_valid(std::ptr::null()) });
        assert!(unsafe { cast_to_owner::<BlockHeader>(std::ptr::null(), 8) }.is_none());
    }

    #[test]
    fn test_cast_to_owner_recovers_block() {
        let r = raw(7);
        r.header.stamp();

        let payload = r.payload.0.as_ptr();
        let block = unsafe { Block::try_from_payload(payload) }.expect("stamped block");
        assert_eq!(block.as_ptr() as *const BlockHeader, &r.header as *const _);
        assert_eq!(block.tag(), 7);
        assert_eq!(block.payload().as_ptr() as *const u8, payload);
    }

    #[test]
    fn test_cast_to_owner_rejects_unstamped() {
        let r = raw(1);
        assert!(unsafe { Block::try_from_payload(r.payload.0.as_ptr()) }.is_none());
    }

    #[test]
    #[should_panic(expected = "integrity check failed")]
    fn test_from_payload_fails_fast() {
        let r = raw(1);
        let _ = unsafe { Block::from_payload(r.payload.0.as_ptr()) };
    }

    #[test]
    fn test_header_marking() {
        let r = raw(0);
        assert_eq!(r.header.mark(), MarkColor::White);

        r.header.set_mark(MarkColor::Gray);
        assert_eq!(r.header.mark(), MarkColor::Gray);

        r.header.set_mark(MarkColor::Black);
        assert_eq!(r.header.mark(), MarkColor::Black);
    }

    #[test]
    fn test_downcast_requires_matching_type() {
        let r = Box::new(Raw {
            header: BlockHeader::new(4, 0, TrackMode::Auto, Some(TypeId::of::<u32>()), None, None),
            payload: Payload([0; 32]),
        });
        r.header.stamp();
        let block = unsafe { Block::from_payload(r.payload.0.as_ptr()) };

        assert!(block.downcast_ptr::<u32>().is_some());
        assert!(block.downcast_ptr::<i64>().is_none());
    }
}
