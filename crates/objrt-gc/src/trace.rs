//! Reference tracing for managed payloads

use crate::header::Block;

/// Trait for types that can be traced by the GC
pub trait Trace {
    /// Whether this type contains block references that need tracing
    const NEEDS_TRACE: bool;

    /// Report every block this value references
    fn trace(&self, tracer: &mut dyn FnMut(Block));
}

macro_rules! impl_leaf_trace {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Trace for $ty {
                const NEEDS_TRACE: bool = false;
                fn trace(&self, _tracer: &mut dyn FnMut(Block)) {}
            }
        )*
    };
}

impl_leaf_trace!(
    (),
    bool,
    u8,
    u16,
    u32,
    u64,
    usize,
    i8,
    i16,
    i32,
    i64,
    isize,
    f32,
    f64,
    String,
);

impl Trace for Block {
    const NEEDS_TRACE: bool = true;

    fn trace(&self, tracer: &mut dyn FnMut(Block)) {
        tracer(*self);
    }
}

impl<T: Trace> Trace for Option<T> {
    const NEEDS_TRACE: bool = T::NEEDS_TRACE;

    fn trace(&self, tracer: &mut dyn FnMut(Block)) {
        if let Some(value) = self {
            value.trace(tracer);
        }
    }
}

impl<T: Trace> Trace for Vec<T> {
    const NEEDS_TRACE: bool = T::NEEDS_TRACE;

    fn trace(&self, tracer: &mut dyn FnMut(Block)) {
        for value in self {
            value.trace(tracer);
        }
    }
}

impl<T: Trace> Trace for Box<T> {
    const NEEDS_TRACE: bool = T::NEEDS_TRACE;

    fn trace(&self, tracer: &mut dyn FnMut(Block)) {
        (**self).trace(tracer);
    }
}

impl<T: Trace> Trace for parking_lot::Mutex<T> {
    const NEEDS_TRACE: bool = T::NEEDS_TRACE;

    fn trace(&self, tracer: &mut dyn FnMut(Block)) {
        self.lock().trace(tracer);
    }
}

/// Type-erased drop for a payload holding a `T`.
pub(crate) unsafe fn drop_payload<T>(ptr: *mut u8) {
    // SAFETY: ptr is the payload of a block initialized with a T
    unsafe { std::ptr::drop_in_place(ptr as *mut T) }
}

/// Type-erased trace for a payload holding a `T`.
pub(crate) unsafe fn trace_payload<T: Trace>(ptr: *const u8, tracer: &mut dyn FnMut(Block)) {
    // SAFETY: ptr is the payload of a block initialized with a T
    unsafe { (*(ptr as *const T)).trace(tracer) }
}
