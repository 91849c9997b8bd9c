//! Error types for objrt-type

use thiserror::Error;

use crate::descriptor::TypeKey;

/// Errors raised while defining types or binding interfaces
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    /// A different vtable is already bound for this (type, interface) pair
    #[error("type {type_name} already implements {interface} with a different vtable")]
    ConflictingBinding {
        /// Implementing type
        type_name: String,
        /// Interface name
        interface: &'static str,
    },

    /// Key does not name a registered type
    #[error("unknown type {0:?}")]
    UnknownType(TypeKey),

    /// Block tag does not name a registered type
    #[error("block tag {0} is not a registered type")]
    UntypedBlock(u32),

    /// Type name re-registered under another parent
    #[error("type {name} is already registered with a different parent")]
    ParentMismatch {
        /// Type name
        name: String,
    },

    /// Registration attempted after `freeze`
    #[error("type registry is frozen")]
    Frozen,

    /// Every `u32` key is taken
    #[error("type key space exhausted")]
    Exhausted,
}

/// Result type alias for type-system operations
pub type TypeResult<T> = Result<T, TypeError>;
