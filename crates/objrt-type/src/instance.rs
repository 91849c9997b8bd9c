//! Instances: blocks tagged with their type

use std::sync::Arc;

use objrt_gc::{Block, Collector, Trace, alloc_value};

use crate::descriptor::TypeKey;
use crate::error::{TypeError, TypeResult};
use crate::interface::Interface;
use crate::registry::TypeRegistry;

impl TypeRegistry {
    /// Allocate an instance of `ty` holding `value` from `collector`
    pub fn instantiate<T>(&self, collector: &dyn Collector, ty: TypeKey, value: T) -> TypeResult<Block>
    where
        T: Trace + Send + Sync + 'static,
    {
        if self.descriptor(ty).is_none() {
            return Err(TypeError::UnknownType(ty));
        }
        Ok(alloc_value(collector, ty.tag(), value))
    }

    /// Registered type of `block`
    ///
    /// # Panics
    /// Panics if `block` fails its integrity check.
    pub fn type_of(&self, block: Block) -> TypeResult<TypeKey> {
        assert!(
            block.is_valid(),
            "block integrity check failed: {:p}",
            block.as_ptr()
        );
        let tag = block.tag();
        TypeKey::from_tag(tag)
            .filter(|&ty| self.descriptor(ty).is_some())
            .ok_or(TypeError::UntypedBlock(tag))
    }

    /// `I` as implemented by the type of `block`, or `None` if it is not
    pub fn instance_interface<I: Interface>(&self, block: Block) -> Option<Arc<I::VTable>> {
        let ty = self.type_of(block).ok()?;
        self.get_interface::<I>(ty)
    }

    /// `I` as implemented by the type of `block`
    ///
    /// # Panics
    /// Panics if the type does not implement `I`. Use
    /// [`instance_interface`](Self::instance_interface) to check first.
    pub fn expect_interface<I: Interface>(&self, block: Block) -> Arc<I::VTable> {
        match self.instance_interface::<I>(block) {
            Some(vtable) => vtable,
            None => {
                let type_name = self
                    .type_of(block)
                    .ok()
                    .and_then(|ty| self.type_name(ty))
                    .unwrap_or_else(|| format!("<tag {}>", block.tag()));
                tracing::error!(
                    target: "objrt::type",
                    type_name = %type_name,
                    interface = I::NAME,
                    "interface not implemented"
                );
                panic!("{type_name} does not implement {}", I::NAME);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objrt_gc::RefCountCollector;

    struct Printable;
    impl Interface for Printable {
        const NAME: &'static str = "Printable";
        type VTable = PrintVTable;
    }

    struct PrintVTable {
        print: fn(Block) -> String,
    }

    impl PartialEq for PrintVTable {
        fn eq(&self, other: &Self) -> bool {
            std::ptr::fn_addr_eq(self.print, other.print)
        }
    }

    fn print_number(block: Block) -> String {
        let value = block.downcast_ptr::<u64>().expect("u64 payload");
        unsafe { value.as_ref().to_string() }
    }

    #[test]
    fn test_instance_dispatch() {
        let types = TypeRegistry::new();
        let number = types.register_type("Number", None).unwrap();
        types
            .register_interface::<Printable>(number, PrintVTable { print: print_number })
            .unwrap();

        let rc = RefCountCollector::default();
        let block = types.instantiate(&rc, number, 42u64).unwrap();

        assert_eq!(types.type_of(block), Ok(number));
        let vtable = types.expect_interface::<Printable>(block);
        assert_eq!((vtable.print)(block), "42");

        rc.release(block);
    }

    #[test]
    fn test_untyped_block() {
        let types = TypeRegistry::new();
        let rc = RefCountCollector::default();
        let block = rc.allocate(8);

        assert_eq!(types.type_of(block), Err(TypeError::UntypedBlock(0)));
        assert!(types.instance_interface::<Printable>(block).is_none());

        rc.release(block);
    }

    #[test]
    fn test_instantiate_unknown_type() {
        let types = TypeRegistry::new();
        let rc = RefCountCollector::default();
        let bogus = TypeKey::from_tag(9).unwrap();
        assert_eq!(
            types.instantiate(&rc, bogus, 1u8),
            Err(TypeError::UnknownType(bogus))
        );
        assert_eq!(rc.live_blocks(), 0);
    }
}
