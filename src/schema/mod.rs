pub mod builtin;
pub mod grammar;
pub mod registry;

pub use builtin::builtin_registry;
pub use grammar::{AttributeUsage, ObjectClassKind};
pub use registry::{AttributeType, ObjectClass, SchemaRegistry};
