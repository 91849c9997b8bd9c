//! # objrt garbage collector
//!
//! Checked memory blocks behind a swappable collector.
//!
//! ## Design
//!
//! - **Blocks**: a stamped [`BlockHeader`] in front of every payload, verified on every use
//! - **Allocator vtable**: every block is obtained and returned through an [`AllocatorVTable`]
//! - **Reference counting**: atomic counts, reclamation on the last release
//! - **Mark-sweep**: live-block registry, explicit cycles from roots, pins and root slots
//!
//! Both backends implement [`Collector`]. The `mark-sweep` cargo feature picks
//! the one [`gc_setup`] installs by default.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod allocator;
pub mod atomic;
pub mod collector;
pub mod error;
pub mod gc;
pub mod header;
pub mod mark_sweep;
pub mod refcount;
pub mod roots;
pub mod trace;

pub use allocator::AllocatorVTable;
pub use atomic::{MAX_REF_COUNT, RefCount};
pub use collector::{
    BlockRequest, CollectStats, Collector, CollectorStats, TeardownReport, alloc_value,
};
pub use error::{GcError, GcResult};
pub use gc::{
    Backend, GcConfig, build_collector, gc_allocate, gc_collect, gc_collector, gc_is_active,
    gc_release, gc_retain, gc_setup, gc_setup_with, gc_teardown,
};
pub use header::{BLOCK_MAGIC, Block, BlockHeader, MarkColor, TrackMode, cast_to_owner};
pub use mark_sweep::MarkSweepCollector;
pub use refcount::{RefCountCollector, RefHook};
pub use roots::{RootSlot, RootTable};
pub use trace::Trace;
