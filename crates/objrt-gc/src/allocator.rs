//! Allocator vtable shared by every collector backend
//!
//! Backends never touch `std::alloc` directly; they go through the
//! [`AllocatorVTable`] handed to their constructor. Swapping the vtable (for
//! instance with a counting one in tests) changes where block memory comes
//! from without touching backend code.

use std::alloc::Layout;
use std::fmt;
use std::ptr::NonNull;

/// Zero-initialized allocation. Returns null on exhaustion.
pub type MallocFn = unsafe fn(Layout) -> *mut u8;

/// Release memory obtained from the matching [`MallocFn`].
pub type FreeFn = unsafe fn(*mut u8, Layout);

/// Grow or shrink an allocation, possibly moving it. Returns null on exhaustion.
pub type ReallocFn = unsafe fn(*mut u8, Layout, usize) -> *mut u8;

/// Three function pointers every backend allocates through
#[derive(Clone, Copy)]
pub struct AllocatorVTable {
    /// Zeroed allocation
    pub malloc: MallocFn,
    /// Deallocation
    pub free: FreeFn,
    /// Reallocation
    pub realloc: ReallocFn,
}

unsafe fn system_malloc(layout: Layout) -> *mut u8 {
    // SAFETY: block layouts always carry a non-zero header
    unsafe { std::alloc::alloc_zeroed(layout) }
}

unsafe fn system_free(ptr: *mut u8, layout: Layout) {
    // SAFETY: ptr came from system_malloc/system_realloc with this layout
    unsafe { std::alloc::dealloc(ptr, layout) }
}

unsafe fn system_realloc(ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
    // SAFETY: ptr came from system_malloc/system_realloc with this layout
    unsafe { std::alloc::realloc(ptr, layout, new_size) }
}

impl AllocatorVTable {
    /// Vtable backed by the global Rust allocator.
    pub const fn system() -> Self {
        Self {
            malloc: system_malloc,
            free: system_free,
            realloc: system_realloc,
        }
    }

    /// Allocate a zeroed region for `layout`.
    ///
    /// Exhaustion is fatal: this diverges through `handle_alloc_error`.
    pub fn allocate(&self, layout: Layout) -> NonNull<u8> {
        // SAFETY: layout is valid; the vtable contract requires zeroed memory
        let ptr = unsafe { (self.malloc)(layout) };
        match NonNull::new(ptr) {
            Some(ptr) => ptr,
            None => std::alloc::handle_alloc_error(layout),
        }
    }

    /// Hand a region back.
    ///
    /// # Safety
    /// `ptr` must come from this vtable with `layout`, and must not be released twice.
    pub unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: forwarded caller contract
        unsafe { (self.free)(ptr.as_ptr(), layout) }
    }

    /// Resize a region. On relocation the old address is dead.
    ///
    /// Exhaustion is fatal: this diverges through `handle_alloc_error`.
    ///
    /// # Safety
    /// `ptr` must come from this vtable with `layout`.
    pub unsafe fn resize(&self, ptr: NonNull<u8>, layout: Layout, new_size: usize) -> NonNull<u8> {
        // SAFETY: forwarded caller contract
        let moved = unsafe { (self.realloc)(ptr.as_ptr(), layout, new_size) };
        match NonNull::new(moved) {
            Some(moved) => moved,
            None => std::alloc::handle_alloc_error(
                Layout::from_size_align(new_size, layout.align()).unwrap_or(layout),
            ),
        }
    }
}

impl Default for AllocatorVTable {
    fn default() -> Self {
        Self::system()
    }
}

impl fmt::Debug for AllocatorVTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocatorVTable")
            .field("malloc", &(self.malloc as *const ()))
            .field("free", &(self.free as *const ()))
            .field("realloc", &(self.realloc as *const ()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_allocate_is_zeroed() {
        let vtable = AllocatorVTable::system();
        let layout = Layout::from_size_align(64, 16).unwrap();
        let ptr = vtable.allocate(layout);

        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 64) };
        assert!(bytes.iter().all(|&b| b == 0));

        unsafe { vtable.release(ptr, layout) };
    }

    #[test]
    fn test_system_resize_keeps_prefix() {
        let vtable = AllocatorVTable::system();
        let layout = Layout::from_size_align(16, 16).unwrap();
        let ptr = vtable.allocate(layout);
        unsafe { ptr.as_ptr().write(0xAB) };

        let grown = unsafe { vtable.resize(ptr, layout, 256) };
        assert_eq!(unsafe { grown.as_ptr().read() }, 0xAB);

        unsafe { vtable.release(grown, Layout::from_size_align(256, 16).unwrap()) };
    }
}
