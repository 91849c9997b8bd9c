//! Named root slots for the mark-sweep collector
//!
//! A [`RootSlot`] is a registered, named location holding at most one block.
//! Every non-empty slot is a root at the start of the mark phase. Dropping
//! the slot unregisters it.

use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::atomic::compare_and_swap_ptr;
use crate::header::{Block, BlockHeader};

struct RootEntry {
    name: String,
    target: AtomicPtr<BlockHeader>,
}

impl RootEntry {
    fn block(&self) -> Option<Block> {
        // SAFETY: slots only ever hold headers of blocks handed out by a collector
        NonNull::new(self.target.load(Ordering::Acquire)).map(|p| unsafe { Block::from_header(p) })
    }
}

/// Registry of root slots
#[derive(Default)]
pub struct RootTable {
    slots: Mutex<FxHashMap<u64, Arc<RootEntry>>>,
    next_id: AtomicU64,
}

impl RootTable {
    /// Empty table
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register an empty slot named `name`
    pub fn register(self: &Arc<Self>, name: impl Into<String>) -> RootSlot {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(RootEntry {
            name: name.into(),
            target: AtomicPtr::new(std::ptr::null_mut()),
        });
        self.slots.lock().insert(id, entry.clone());
        RootSlot {
            id,
            entry,
            table: Arc::clone(self),
        }
    }

    /// Number of registered slots, empty ones included
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// True if no slot is registered
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Blocks currently held by non-empty slots
    pub fn targets(&self) -> Vec<Block> {
        self.slots
            .lock()
            .values()
            .filter_map(|entry| entry.block())
            .collect()
    }

    /// Name of a slot currently holding `block`, lowest registration first
    pub fn name_of(&self, block: Block) -> Option<String> {
        let slots = self.slots.lock();
        let mut ids: Vec<&u64> = slots.keys().collect();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|id| slots.get(id))
            .find(|entry| entry.block() == Some(block))
            .map(|entry| entry.name.clone())
    }

    /// Empty every slot without unregistering it
    pub fn clear_all(&self) {
        for entry in self.slots.lock().values() {
            entry.target.store(std::ptr::null_mut(), Ordering::Release);
        }
    }

    fn unregister(&self, id: u64) {
        self.slots.lock().remove(&id);
    }
}

/// A registered root location; unregisters on drop
pub struct RootSlot {
    id: u64,
    entry: Arc<RootEntry>,
    table: Arc<RootTable>,
}

impl RootSlot {
    /// Slot name, used in leak reports
    pub fn name(&self) -> &str {
        &self.entry.name
    }

    /// Current block
    pub fn get(&self) -> Option<Block> {
        self.entry.block()
    }

    /// Store `block` (or empty the slot with `None`)
    pub fn set(&self, block: Option<Block>) {
        self.entry.target.store(Self::raw(block), Ordering::Release);
    }

    /// Empty the slot
    pub fn clear(&self) {
        self.set(None);
    }

    /// Store `new` only if the slot still holds `expected`
    pub fn replace_if(&self, expected: Option<Block>, new: Option<Block>) -> bool {
        compare_and_swap_ptr(&self.entry.target, Self::raw(expected), Self::raw(new))
    }

    fn raw(block: Option<Block>) -> *mut BlockHeader {
        block.map_or(std::ptr::null_mut(), |b| b.as_ptr())
    }
}

impl Drop for RootSlot {
    fn drop(&mut self) {
        self.table.unregister(self.id);
    }
}

impl std::fmt::Debug for RootSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootSlot")
            .field("name", &self.entry.name)
            .field("target", &self.get())
            .finish()
    }
}
