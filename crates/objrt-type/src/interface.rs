//! Capability interfaces
//!
//! An interface is a marker type naming a capability plus the vtable type
//! that implements it. Types bind a vtable per interface in the
//! [`TypeRegistry`](crate::TypeRegistry); callers holding an instance look it
//! up by interface.

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A capability a type may implement
///
/// ```
/// use objrt_type::Interface;
///
/// #[derive(Default)]
/// struct ShapeVTable {
///     width: Option<fn() -> i32>,
/// }
///
/// impl PartialEq for ShapeVTable {
///     fn eq(&self, other: &Self) -> bool {
///         match (self.width, other.width) {
///             (Some(a), Some(b)) => std::ptr::fn_addr_eq(a, b),
///             (a, b) => a.is_none() && b.is_none(),
///         }
///     }
/// }
///
/// struct Shape;
///
/// impl Interface for Shape {
///     const NAME: &'static str = "Shape";
///     type VTable = ShapeVTable;
/// }
/// ```
pub trait Interface: 'static {
    /// Name used in errors and logs
    const NAME: &'static str;

    /// Function table a type binds for this interface. Equality decides
    /// whether re-registration is a no-op or a conflict.
    ///
    /// Compare function pointers with [`std::ptr::fn_addr_eq`] in a manual
    /// `PartialEq`. The same function may get distinct addresses in
    /// different codegen units, so a derived comparison can report a
    /// conflict for an identical registration.
    type VTable: PartialEq + Send + Sync + 'static;
}

/// Runtime identity of an [`Interface`]
#[derive(Clone, Copy)]
pub struct InterfaceId {
    type_id: TypeId,
    name: &'static str,
}

impl InterfaceId {
    /// Identity of `I`
    pub fn of<I: Interface>() -> Self {
        Self {
            type_id: TypeId::of::<I>(),
            name: I::NAME,
        }
    }

    /// Interface name
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for InterfaceId {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for InterfaceId {}

impl Hash for InterfaceId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InterfaceId({})", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Readable;
    impl Interface for Readable {
        const NAME: &'static str = "Readable";
        type VTable = ();
    }

    struct Writable;
    impl Interface for Writable {
        const NAME: &'static str = "Writable";
        type VTable = ();
    }

    #[test]
    fn test_interface_identity() {
        assert_eq!(InterfaceId::of::<Readable>(), InterfaceId::of::<Readable>());
        assert_ne!(InterfaceId::of::<Readable>(), InterfaceId::of::<Writable>());
        assert_eq!(InterfaceId::of::<Writable>().name(), "Writable");
    }
}
