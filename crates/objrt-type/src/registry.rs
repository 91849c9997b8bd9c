//! Type registry and interface bindings
//!
//! Types are registered by name and receive a [`TypeKey`]. Each type binds
//! at most one vtable per [`Interface`]. Lookup probes the type's own
//! bindings first, then each ancestor's, so the nearest binding wins and a
//! subtype inherits what it does not override.

use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use rustc_hash::FxHashMap;

use crate::descriptor::{TypeDescriptor, TypeKey, VTableRef};
use crate::error::{TypeError, TypeResult};
use crate::interface::{Interface, InterfaceId};

#[derive(Default)]
struct RegistryInner {
    /// Indexed by `TypeKey::index`
    types: Vec<TypeDescriptor>,
    by_name: FxHashMap<String, TypeKey>,
}

impl RegistryInner {
    fn get(&self, ty: TypeKey) -> TypeResult<&TypeDescriptor> {
        self.types.get(ty.index()).ok_or(TypeError::UnknownType(ty))
    }

    fn get_mut(&mut self, ty: TypeKey) -> TypeResult<&mut TypeDescriptor> {
        self.types
            .get_mut(ty.index())
            .ok_or(TypeError::UnknownType(ty))
    }
}

/// Registry of types and their interface bindings
#[derive(Default)]
pub struct TypeRegistry {
    inner: RwLock<RegistryInner>,
    frozen: AtomicBool,
}

impl TypeRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` under `parent`.
    ///
    /// Registering the same name with the same parent again returns the
    /// existing key.
    pub fn register_type(&self, name: &str, parent: Option<TypeKey>) -> TypeResult<TypeKey> {
        self.check_open()?;
        let mut inner = self.inner.write();

        if let Some(parent) = parent {
            inner.get(parent)?;
        }
        if let Some(&existing) = inner.by_name.get(name) {
            if inner.get(existing)?.parent() != parent {
                return Err(TypeError::ParentMismatch {
                    name: name.to_owned(),
                });
            }
            return Ok(existing);
        }

        let key = u32::try_from(inner.types.len() + 1)
            .ok()
            .and_then(TypeKey::from_tag)
            .ok_or(TypeError::Exhausted)?;
        inner
            .types
            .push(TypeDescriptor::new(key, name.to_owned(), parent));
        inner.by_name.insert(name.to_owned(), key);

        tracing::debug!(target: "objrt::type", name, tag = key.tag(), "type registered");
        Ok(key)
    }

    /// Key registered for `name`
    pub fn type_by_name(&self, name: &str) -> Option<TypeKey> {
        self.inner.read().by_name.get(name).copied()
    }

    /// Descriptor of `ty`. Holds a read lock until dropped.
    pub fn descriptor(&self, ty: TypeKey) -> Option<MappedRwLockReadGuard<'_, TypeDescriptor>> {
        RwLockReadGuard::try_map(self.inner.read(), |inner| inner.types.get(ty.index())).ok()
    }

    /// Name of `ty`
    pub fn type_name(&self, ty: TypeKey) -> Option<String> {
        self.descriptor(ty).map(|desc| desc.name().to_owned())
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.inner.read().types.len()
    }

    /// True if no type is registered
    pub fn is_empty(&self) -> bool {
        self.inner.read().types.is_empty()
    }

    /// Whether `ty` is `ancestor` or descends from it
    pub fn is_a(&self, ty: TypeKey, ancestor: TypeKey) -> bool {
        let inner = self.inner.read();
        let mut current = Some(ty);
        while let Some(key) = current {
            if key == ancestor {
                return true;
            }
            current = inner.get(key).ok().and_then(TypeDescriptor::parent);
        }
        false
    }

    /// Bind `vtable` as `ty`'s implementation of `I`.
    ///
    /// Binding an equal vtable again is a no-op; a different one is a
    /// [`TypeError::ConflictingBinding`]. Only `ty`'s own bindings are
    /// checked, so a subtype may override an ancestor's vtable.
    pub fn register_interface<I: Interface>(&self, ty: TypeKey, vtable: I::VTable) -> TypeResult<()> {
        self.check_open()?;
        let id = InterfaceId::of::<I>();
        let mut inner = self.inner.write();
        let desc = inner.get_mut(ty)?;

        if let Some(existing) = desc.binding(&id) {
            return match existing.downcast_ref::<I::VTable>() {
                Some(bound) if *bound == vtable => Ok(()),
                _ => Err(TypeError::ConflictingBinding {
                    type_name: desc.name().to_owned(),
                    interface: I::NAME,
                }),
            };
        }

        desc.bind(id, Arc::new(vtable));
        tracing::debug!(
            target: "objrt::type",
            type_name = desc.name(),
            interface = I::NAME,
            "interface bound"
        );
        Ok(())
    }

    /// Bind `I`'s default vtable for `ty`
    pub fn register_default_interface<I>(&self, ty: TypeKey) -> TypeResult<()>
    where
        I: Interface,
        I::VTable: Default,
    {
        self.register_interface::<I>(ty, I::VTable::default())
    }

    /// Whether `ty` or one of its ancestors binds `I`
    pub fn implements<I: Interface>(&self, ty: TypeKey) -> bool {
        self.lookup(ty, InterfaceId::of::<I>()).is_some()
    }

    /// Nearest vtable for `I` along `ty`'s parent chain, or `None` if no
    /// type on it bound one
    pub fn get_interface<I: Interface>(&self, ty: TypeKey) -> Option<Arc<I::VTable>> {
        self.lookup(ty, InterfaceId::of::<I>())?
            .downcast::<I::VTable>()
            .ok()
    }

    fn lookup(&self, ty: TypeKey, id: InterfaceId) -> Option<VTableRef> {
        let inner = self.inner.read();
        let mut current = Some(ty);
        while let Some(key) = current {
            let desc = inner.get(key).ok()?;
            if let Some(vtable) = desc.binding(&id) {
                return Some(Arc::clone(vtable));
            }
            current = desc.parent();
        }
        None
    }

    /// Reject further registrations
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    /// Whether [`freeze`](Self::freeze) was called
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    fn check_open(&self) -> TypeResult<()> {
        if self.is_frozen() {
            return Err(TypeError::Frozen);
        }
        Ok(())
    }
}

static GLOBAL_TYPES: LazyLock<TypeRegistry> = LazyLock::new(TypeRegistry::new);

/// Process-wide registry
pub fn global_types() -> &'static TypeRegistry {
    &GLOBAL_TYPES
}
