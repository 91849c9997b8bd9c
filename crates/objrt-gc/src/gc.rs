//! Process-wide collector dispatch
//!
//! [`gc_setup`] installs one collector for the whole process; the other
//! `gc_*` functions forward to it. Which backend is installed comes from the
//! `mark-sweep` cargo feature unless [`GcConfig::with_backend`] overrides it.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::allocator::AllocatorVTable;
use crate::collector::{CollectStats, Collector, TeardownReport};
use crate::error::{GcError, GcResult};
use crate::header::Block;
use crate::mark_sweep::{DEFAULT_GC_THRESHOLD, DEFAULT_LEAK_REPORT_LIMIT, MarkSweepCollector};
use crate::refcount::RefCountCollector;

/// Memory-management strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Atomic reference counting, immediate reclamation
    RefCount,
    /// Registry plus explicit mark/sweep cycles
    MarkSweep,
}

impl Backend {
    /// Backend selected at build time
    pub const fn compiled() -> Self {
        if cfg!(feature = "mark-sweep") {
            Backend::MarkSweep
        } else {
            Backend::RefCount
        }
    }

    /// Short name used in logs
    pub const fn name(self) -> &'static str {
        match self {
            Backend::RefCount => "refcount",
            Backend::MarkSweep => "mark-sweep",
        }
    }
}

impl Default for Backend {
    fn default() -> Self {
        Self::compiled()
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Collector configuration
#[derive(Debug, Clone, Copy)]
pub struct GcConfig {
    /// Backend to build
    pub backend: Backend,
    /// Allocator every block goes through
    pub vtable: AllocatorVTable,
    /// Live bytes at which mark-sweep reports `should_collect`
    pub gc_threshold: usize,
    /// Leaked blocks itemised at mark-sweep teardown
    pub leak_report_limit: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            backend: Backend::compiled(),
            vtable: AllocatorVTable::system(),
            gc_threshold: DEFAULT_GC_THRESHOLD,
            leak_report_limit: DEFAULT_LEAK_REPORT_LIMIT,
        }
    }
}

impl GcConfig {
    /// Override the compiled backend
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Allocate through `vtable`
    pub fn with_vtable(mut self, vtable: AllocatorVTable) -> Self {
        self.vtable = vtable;
        self
    }

    /// Set the mark-sweep collection threshold
    pub fn with_gc_threshold(mut self, threshold: usize) -> Self {
        self.gc_threshold = threshold;
        self
    }

    /// Set how many leaked blocks teardown itemises
    pub fn with_leak_report_limit(mut self, limit: usize) -> Self {
        self.leak_report_limit = limit;
        self
    }
}

/// Build a standalone collector for `config`
pub fn build_collector(config: &GcConfig) -> Arc<dyn Collector> {
    match config.backend {
        Backend::RefCount => Arc::new(RefCountCollector::new(config.vtable)),
        Backend::MarkSweep => {
            let collector = MarkSweepCollector::with_threshold(config.vtable, config.gc_threshold);
            collector.set_leak_report_limit(config.leak_report_limit);
            Arc::new(collector)
        }
    }
}

static ACTIVE: RwLock<Option<Arc<dyn Collector>>> = RwLock::new(None);

/// Install the default collector
pub fn gc_setup() -> GcResult<()> {
    gc_setup_with(GcConfig::default())
}

/// Install a collector built from `config`
pub fn gc_setup_with(config: GcConfig) -> GcResult<()> {
    let mut active = ACTIVE.write();
    if let Some(current) = active.as_ref() {
        return Err(GcError::AlreadyInitialized(current.backend()));
    }
    *active = Some(build_collector(&config));

    tracing::debug!(target: "objrt::gc", backend = %config.backend, "collector installed");
    Ok(())
}

/// Uninstall the collector and report what it still held
pub fn gc_teardown() -> GcResult<TeardownReport> {
    let collector = ACTIVE.write().take().ok_or(GcError::NotInitialized)?;
    let report = collector.teardown();

    tracing::debug!(
        target: "objrt::gc",
        backend = %collector.backend(),
        leaked_blocks = report.leaked_blocks,
        "collector removed"
    );
    Ok(report)
}

/// The installed collector
pub fn gc_collector() -> GcResult<Arc<dyn Collector>> {
    ACTIVE.read().clone().ok_or(GcError::NotInitialized)
}

/// Whether a collector is installed
pub fn gc_is_active() -> bool {
    ACTIVE.read().is_some()
}

/// Allocate `size` zeroed bytes tagged `tag` from the installed collector
pub fn gc_allocate(size: usize, tag: u32) -> GcResult<Block> {
    Ok(gc_collector()?.allocate_tagged(size, tag))
}

/// Retain (refcount) or pin (mark-sweep) `block`
pub fn gc_retain(block: Block) -> GcResult<()> {
    gc_collector()?.retain_or_mark(block);
    Ok(())
}

/// Release (refcount) or unpin (mark-sweep) `block`
pub fn gc_release(block: Block) -> GcResult<()> {
    gc_collector()?.release_or_collect(block);
    Ok(())
}

/// Run a collection cycle with `roots` as extra roots
pub fn gc_collect(roots: &[Block]) -> GcResult<CollectStats> {
    Ok(gc_collector()?.collect(roots))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_names() {
        assert_eq!(Backend::RefCount.to_string(), "refcount");
        assert_eq!(Backend::MarkSweep.to_string(), "mark-sweep");
        assert_eq!(Backend::default(), Backend::compiled());
    }

    #[test]
    fn test_build_collector_honours_backend() {
        let config = GcConfig::default().with_backend(Backend::MarkSweep);
        assert_eq!(build_collector(&config).backend(), Backend::MarkSweep);

        let config = config.with_backend(Backend::RefCount);
        assert_eq!(build_collector(&config).backend(), Backend::RefCount);
    }

    #[test]
    fn test_build_collector_dispatch() {
        let ms = build_collector(&GcConfig::default().with_backend(Backend::MarkSweep));
        let block = ms.allocate_tagged(16, 7);
        assert_eq!(block.tag(), 7);
        ms.retain_or_mark(block);
        assert_eq!(ms.collect(&[]).reclaimed_blocks, 0);
        ms.release_or_collect(block);
        assert_eq!(ms.collect(&[]).reclaimed_blocks, 1);

        let rc = build_collector(&GcConfig::default().with_backend(Backend::RefCount));
        let block = rc.allocate(16);
        rc.retain_or_mark(block);
        rc.release_or_collect(block);
        assert_eq!(rc.live_blocks(), 1);
        rc.release_or_collect(block);
        assert_eq!(rc.live_blocks(), 0);
    }
}
