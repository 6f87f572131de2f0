//! The Lumen type system: canonical type descriptors, values, the
//! per-compilation allocation region, and conversion policy.

pub mod convert;
pub mod system;
pub mod ty;
pub mod value;

pub use convert::{common_numeric_type, is_numeric, numeric_rank, widens_to};
pub use system::TypeSystem;
pub use ty::{Type, TypePtr, TypeTag};
pub use value::{Region, Value, ValueData, ValuePtr};
