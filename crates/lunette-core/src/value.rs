//! The Lua value type.
//!
//! `Value` is a small `Copy` enum. Strings are interned ids, every other
//! reference type is a typed index into the `GcHeap` arenas, and threads are
//! ids into the VM's thread table.
use crate::gc::{GcIdx, LuaClosure, NativeFunction, UserData};
use crate::string::StringId;
use crate::table::Table;
use std::fmt;

/// Identifies a coroutine (or the main thread) inside a VM.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct ThreadId(pub u32);

impl ThreadId {
    pub const MAIN: ThreadId = ThreadId(0);
}

/// A Lua value.
#[derive(Clone, Copy, Default)]
pub enum Value {
    #[default]
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(StringId),
    Table(GcIdx<Table>),
    Function(GcIdx<LuaClosure>),
    Native(GcIdx<NativeFunction>),
    UserData(GcIdx<UserData>),
    Thread(ThreadId),
}

/// The basic Lua type tags, as reported by `type()`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum LuaType {
    Nil,
    Boolean,
    Number,
    String,
    Table,
    Function,
    UserData,
    Thread,
}

impl LuaType {
    pub fn name(self) -> &'static str {
        match self {
            LuaType::Nil => "nil",
            LuaType::Boolean => "boolean",
            LuaType::Number => "number",
            LuaType::String => "string",
            LuaType::Table => "table",
            LuaType::Function => "function",
            LuaType::UserData => "userdata",
            LuaType::Thread => "thread",
        }
    }
}

impl Value {
    // ---- Constructors ----

    #[inline]
    pub fn nil() -> Self {
        Value::Nil
    }

    #[inline]
    pub fn from_bool(b: bool) -> Self {
        Value::Boolean(b)
    }

    #[inline]
    pub fn from_integer(i: i64) -> Self {
        Value::Integer(i)
    }

    #[inline]
    pub fn from_float(f: f64) -> Self {
        Value::Float(f)
    }

    #[inline]
    pub fn from_string_id(id: StringId) -> Self {
        Value::String(id)
    }

    #[inline]
    pub fn from_table(idx: GcIdx<Table>) -> Self {
        Value::Table(idx)
    }

    // ---- Type checks ----

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    #[inline]
    pub fn is_integer(&self) -> bool {
        matches!(self, Value::Integer(_))
    }

    #[inline]
    pub fn is_float(&self) -> bool {
        matches!(self, Value::Float(_))
    }

    #[inline]
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Float(_))
    }

    #[inline]
    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    #[inline]
    pub fn is_table(&self) -> bool {
        matches!(self, Value::Table(_))
    }

    #[inline]
    pub fn is_function(&self) -> bool {
        matches!(self, Value::Function(_) | Value::Native(_))
    }

    // ---- Extractors ----

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Boolean(b) => Some(b),
            _ => None,
        }
    }

    #[inline]
    pub fn as_integer(&self) -> Option<i64> {
        match *self {
            Value::Integer(i) => Some(i),
            _ => None,
        }
    }

    #[inline]
    pub fn as_float(&self) -> Option<f64> {
        match *self {
            Value::Float(f) => Some(f),
            _ => None,
        }
    }

    /// Numeric value as a float; integers convert.
    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match *self {
            Value::Integer(i) => Some(i as f64),
            Value::Float(f) => Some(f),
            _ => None,
        }
    }

    #[inline]
    pub fn as_string_id(&self) -> Option<StringId> {
        match *self {
            Value::String(id) => Some(id),
            _ => None,
        }
    }

    #[inline]
    pub fn as_table_idx(&self) -> Option<GcIdx<Table>> {
        match *self {
            Value::Table(idx) => Some(idx),
            _ => None,
        }
    }

    #[inline]
    pub fn as_thread(&self) -> Option<ThreadId> {
        match *self {
            Value::Thread(id) => Some(id),
            _ => None,
        }
    }

    // ---- Lua semantics ----

    /// Only nil and false are falsy.
    #[inline]
    pub fn is_falsy(&self) -> bool {
        matches!(self, Value::Nil | Value::Boolean(false))
    }

    #[inline]
    pub fn is_truthy(&self) -> bool {
        !self.is_falsy()
    }

    pub fn lua_type(&self) -> LuaType {
        match self {
            Value::Nil => LuaType::Nil,
            Value::Boolean(_) => LuaType::Boolean,
            Value::Integer(_) | Value::Float(_) => LuaType::Number,
            Value::String(_) => LuaType::String,
            Value::Table(_) => LuaType::Table,
            Value::Function(_) | Value::Native(_) => LuaType::Function,
            Value::UserData(_) => LuaType::UserData,
            Value::Thread(_) => LuaType::Thread,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.lua_type().name()
    }

    /// Primitive equality without metamethods. Integers and floats compare by
    /// mathematical value; reference types compare by identity.
    pub fn raw_equals(&self, other: &Value) -> bool {
        match (*self, *other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Integer(i), Value::Float(f)) | (Value::Float(f), Value::Integer(i)) => {
                crate::number::float_to_integer(f) == Some(i)
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a == b,
            (Value::Native(a), Value::Native(b)) => a == b,
            (Value::UserData(a), Value::UserData(b)) => a == b,
            (Value::Thread(a), Value::Thread(b)) => a == b,
            _ => false,
        }
    }

    /// A stable identity for reference values, used by `tostring` and `%p`.
    pub fn identity(&self) -> Option<(char, u32)> {
        match *self {
            Value::Table(i) => Some(('t', i.index())),
            Value::Function(i) => Some(('f', i.index())),
            Value::Native(i) => Some(('n', i.index())),
            Value::UserData(i) => Some(('u', i.index())),
            Value::Thread(t) => Some(('c', t.0)),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{}", crate::number::format_float(*x)),
            Value::String(id) => write!(f, "string(#{})", id.0),
            Value::Table(i) => write!(f, "table(#{})", i.index()),
            Value::Function(i) => write!(f, "function(#{})", i.index()),
            Value::Native(i) => write!(f, "native(#{})", i.index()),
            Value::UserData(i) => write!(f, "userdata(#{})", i.index()),
            Value::Thread(t) => write!(f, "thread(#{})", t.0),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.raw_equals(other)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<StringId> for Value {
    fn from(id: StringId) -> Self {
        Value::String(id)
    }
}
