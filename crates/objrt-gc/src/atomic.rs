//! Lock-free integer and pointer primitives
//!
//! Everything here is a single atomic instruction on one memory location.
//! Reference counting builds on [`RefCount`]; root slots use the pointer CAS.

use std::sync::atomic::{AtomicI32, AtomicPtr, Ordering};

/// Upper bound for a sane reference count. Anything at or above this is
/// treated as a corrupted header.
pub const MAX_REF_COUNT: i32 = 0xff_ffff;

/// Initial count of a freshly allocated block (the allocating owner).
pub const REF_INIT_VALUE: i32 = 1;

/// Add one to `x`.
#[inline]
pub fn atomic_increment(x: &AtomicI32) {
    x.fetch_add(1, Ordering::SeqCst);
}

/// Subtract one from `x` and report whether the new value is exactly zero.
///
/// When several threads race, exactly one of them observes the transition
/// to zero.
#[inline]
pub fn atomic_decrement_and_test(x: &AtomicI32) -> bool {
    x.fetch_sub(1, Ordering::AcqRel) == 1
}

/// Subtract one from `x` and report whether the new value is nonzero.
#[inline]
pub fn atomic_decrement(x: &AtomicI32) -> bool {
    x.fetch_sub(1, Ordering::AcqRel) != 1
}

/// Replace `x` with `new` if it currently holds `expected`.
#[inline]
pub fn compare_and_swap(x: &AtomicI32, expected: i32, new: i32) -> bool {
    x.compare_exchange(expected, new, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
}

/// Pointer variant of [`compare_and_swap`].
#[inline]
pub fn compare_and_swap_ptr<T>(x: &AtomicPtr<T>, expected: *mut T, new: *mut T) -> bool {
    x.compare_exchange(expected, new, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
}

/// Sequentially consistent load.
#[inline]
pub fn atomic_get(x: &AtomicI32) -> i32 {
    x.load(Ordering::SeqCst)
}

/// Sequentially consistent store.
#[inline]
pub fn atomic_set(x: &AtomicI32, value: i32) {
    x.store(value, Ordering::SeqCst);
}

/// Atomic reference count stored in every block header.
#[repr(transparent)]
#[derive(Debug)]
pub struct RefCount(AtomicI32);

impl RefCount {
    /// Count starting at [`REF_INIT_VALUE`].
    pub const fn new() -> Self {
        Self(AtomicI32::new(REF_INIT_VALUE))
    }

    /// Reset to [`REF_INIT_VALUE`].
    pub fn init(&self) {
        atomic_set(&self.0, REF_INIT_VALUE);
    }

    /// Increment.
    #[inline]
    pub fn inc(&self) {
        atomic_increment(&self.0);
    }

    /// Decrement, returning true when the count reached zero.
    #[inline]
    pub fn dec_and_test(&self) -> bool {
        atomic_decrement_and_test(&self.0)
    }

    /// Current value.
    #[inline]
    pub fn get(&self) -> i32 {
        atomic_get(&self.0)
    }

    /// Overwrite the count.
    pub fn set(&self, value: i32) {
        atomic_set(&self.0, value);
    }

    /// Live and not corrupted: `0 < n < max`.
    pub fn is_valid(&self, max: i32) -> bool {
        let n = self.get();
        n > 0 && n < max
    }

    /// Not corrupted, possibly already released: `0 <= n < max`.
    pub fn check(&self, max: i32) -> bool {
        let n = self.get();
        (0..max).contains(&n)
    }
}

impl Default for RefCount {
    fn default() -> Self {
        Self::new()
    }
}
