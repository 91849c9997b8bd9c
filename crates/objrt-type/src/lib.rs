//! # objrt type system
//!
//! Named types with single-parent ancestry, and capability dispatch: each
//! type binds one vtable per [`Interface`], found again from any instance
//! block through its type tag.
//!
//! ```
//! use objrt_gc::RefCountCollector;
//! use objrt_type::{Interface, TypeRegistry};
//!
//! #[derive(Default)]
//! struct AreaVTable {
//!     area: Option<fn(u32) -> u32>,
//! }
//!
//! impl PartialEq for AreaVTable {
//!     fn eq(&self, other: &Self) -> bool {
//!         match (self.area, other.area) {
//!             (Some(a), Some(b)) => std::ptr::fn_addr_eq(a, b),
//!             (a, b) => a.is_none() && b.is_none(),
//!         }
//!     }
//! }
//!
//! struct Area;
//! impl Interface for Area {
//!     const NAME: &'static str = "Area";
//!     type VTable = AreaVTable;
//! }
//!
//! fn square_area(side: u32) -> u32 {
//!     side * side
//! }
//!
//! let types = TypeRegistry::new();
//! let square = types.register_type("Square", None).unwrap();
//! types
//!     .register_interface::<Area>(square, AreaVTable { area: Some(square_area) })
//!     .unwrap();
//!
//! let collector = RefCountCollector::default();
//! let block = types.instantiate(&collector, square, 3u32).unwrap();
//! let area = types.expect_interface::<Area>(block).area.unwrap();
//! assert_eq!(area(3), 9);
//! collector.release(block);
//! ```

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod descriptor;
pub mod error;
pub mod instance;
pub mod interface;
pub mod registry;

pub use descriptor::{TypeDescriptor, TypeKey};
pub use error::{TypeError, TypeResult};
pub use interface::{Interface, InterfaceId};
pub use registry::{TypeRegistry, global_types};
