//! Core data model for lunette: values, interned strings, tables and the
//! arena heap they live in.
pub mod gc;
pub mod number;
pub mod string;
pub mod table;
pub mod value;

pub use gc::{CallbackId, GcHeap, GcIdx};
pub use string::{StringId, StringInterner};
pub use table::Table;
pub use value::{LuaType, ThreadId, Value};
