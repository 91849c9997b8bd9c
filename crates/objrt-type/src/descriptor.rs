//! Type descriptors

use std::any::Any;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::interface::InterfaceId;

/// Registered type identity, stored as the tag of every instance block
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeKey(NonZeroU32);

impl TypeKey {
    /// Key for a block tag. Tag 0 marks untyped blocks.
    pub fn from_tag(tag: u32) -> Option<Self> {
        NonZeroU32::new(tag).map(Self)
    }

    /// Block tag for instances of this type
    pub fn tag(self) -> u32 {
        self.0.get()
    }

    pub(crate) fn index(self) -> usize {
        self.0.get() as usize - 1
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeKey({})", self.0)
    }
}

pub(crate) type VTableRef = Arc<dyn Any + Send + Sync>;

/// A registered type: name, parent, and interface bindings
pub struct TypeDescriptor {
    key: TypeKey,
    name: String,
    parent: Option<TypeKey>,
    bindings: FxHashMap<InterfaceId, VTableRef>,
}

impl TypeDescriptor {
    pub(crate) fn new(key: TypeKey, name: String, parent: Option<TypeKey>) -> Self {
        Self {
            key,
            name,
            parent,
            bindings: FxHashMap::default(),
        }
    }

    /// Registry key
    pub fn key(&self) -> TypeKey {
        self.key
    }

    /// Type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parent type, if any
    pub fn parent(&self) -> Option<TypeKey> {
        self.parent
    }

    /// Interfaces this type binds, in no particular order
    pub fn interfaces(&self) -> impl Iterator<Item = InterfaceId> + '_ {
        self.bindings.keys().copied()
    }

    pub(crate) fn binding(&self, id: &InterfaceId) -> Option<&VTableRef> {
        self.bindings.get(id)
    }

    pub(crate) fn bind(&mut self, id: InterfaceId, vtable: VTableRef) {
        self.bindings.insert(id, vtable);
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("interfaces", &self.bindings.len())
            .finish()
    }
}
