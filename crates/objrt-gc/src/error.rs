//! Error types for objrt-gc
//!
//! Only conditions a caller can reasonably act on are errors. Allocation
//! exhaustion and header integrity failures abort instead.

use thiserror::Error;

use crate::gc::Backend;

/// Errors returned by collector setup and block operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GcError {
    /// `gc_setup` called while a collector is already installed
    #[error("collector already initialized ({0} backend)")]
    AlreadyInitialized(Backend),

    /// Collector used before `gc_setup` or after `gc_teardown`
    #[error("collector not initialized")]
    NotInitialized,

    /// Only raw byte blocks can be resized; typed payloads would be torn
    #[error("cannot resize a block holding a typed value")]
    TypedResize,

    /// Resizing a block that other owners still reference
    #[error("cannot resize a shared block (refcount {0})")]
    SharedResize(i32),

    /// Handle does not carry the block magic value
    #[error("invalid block {0:#x}")]
    InvalidBlock(usize),
}

/// Result type alias for collector operations
pub type GcResult<T> = Result<T, GcError>;
