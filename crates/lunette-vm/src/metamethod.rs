//! Metamethod names and lookup.

use crate::arith::ArithOp;
use lunette_core::gc::{GcHeap, GcIdx};
use lunette_core::string::{StringId, StringInterner};
use lunette_core::table::Table;
use lunette_core::value::Value;

/// Pre-interned metamethod name StringIds for fast lookup.
pub struct MetamethodNames {
    pub add: StringId,
    pub sub: StringId,
    pub mul: StringId,
    pub mod_: StringId,
    pub pow: StringId,
    pub div: StringId,
    pub idiv: StringId,
    pub band: StringId,
    pub bor: StringId,
    pub bxor: StringId,
    pub shl: StringId,
    pub shr: StringId,
    pub unm: StringId,
    pub bnot: StringId,
    pub eq: StringId,
    pub lt: StringId,
    pub le: StringId,
    pub index: StringId,
    pub newindex: StringId,
    pub call: StringId,
    pub len: StringId,
    pub concat: StringId,
    pub tostring: StringId,
    pub close: StringId,
    pub name: StringId,
    pub metatable: StringId,
    pub pairs: StringId,
}

impl MetamethodNames {
    /// Intern every name and pin it so the collector never frees it.
    pub fn init(strings: &mut StringInterner) -> Self {
        let mut fixed = |name: &[u8]| {
            let id = strings.intern(name);
            strings.fix(id);
            id
        };
        MetamethodNames {
            add: fixed(b"__add"),
            sub: fixed(b"__sub"),
            mul: fixed(b"__mul"),
            mod_: fixed(b"__mod"),
            pow: fixed(b"__pow"),
            div: fixed(b"__div"),
            idiv: fixed(b"__idiv"),
            band: fixed(b"__band"),
            bor: fixed(b"__bor"),
            bxor: fixed(b"__bxor"),
            shl: fixed(b"__shl"),
            shr: fixed(b"__shr"),
            unm: fixed(b"__unm"),
            bnot: fixed(b"__bnot"),
            eq: fixed(b"__eq"),
            lt: fixed(b"__lt"),
            le: fixed(b"__le"),
            index: fixed(b"__index"),
            newindex: fixed(b"__newindex"),
            call: fixed(b"__call"),
            len: fixed(b"__len"),
            concat: fixed(b"__concat"),
            tostring: fixed(b"__tostring"),
            close: fixed(b"__close"),
            name: fixed(b"__name"),
            metatable: fixed(b"__metatable"),
            pairs: fixed(b"__pairs"),
        }
    }

    pub fn for_arith(&self, op: ArithOp) -> StringId {
        match op {
            ArithOp::Add => self.add,
            ArithOp::Sub => self.sub,
            ArithOp::Mul => self.mul,
            ArithOp::Div => self.div,
            ArithOp::IDiv => self.idiv,
            ArithOp::Mod => self.mod_,
            ArithOp::Pow => self.pow,
            ArithOp::BAnd => self.band,
            ArithOp::BOr => self.bor,
            ArithOp::BXor => self.bxor,
            ArithOp::Shl => self.shl,
            ArithOp::Shr => self.shr,
        }
    }
}

/// The metatable of a value, if it has one. Strings share one metatable.
pub fn get_metatable(
    val: Value,
    gc: &GcHeap,
    string_metatable: Option<GcIdx<Table>>,
) -> Option<GcIdx<Table>> {
    match val {
        Value::Table(idx) => gc.get_table(idx).metatable,
        Value::UserData(idx) => gc.get_userdata(idx).metatable,
        Value::String(_) => string_metatable,
        _ => None,
    }
}

/// Look up a metamethod on a value. Returns `None` when absent or nil.
pub fn get_metamethod(
    val: Value,
    mm_name: StringId,
    gc: &GcHeap,
    string_metatable: Option<GcIdx<Table>>,
) -> Option<Value> {
    let mt = get_metatable(val, gc, string_metatable)?;
    let mm = gc.get_table(mt).raw_get_str(mm_name);
    (!mm.is_nil()).then_some(mm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_through_metatable() {
        let mut gc = GcHeap::new();
        let mut strings = StringInterner::new();
        let names = MetamethodNames::init(&mut strings);
        let t = gc.alloc_table(0, 0);
        let mt = gc.alloc_table(0, 0);
        assert!(get_metamethod(Value::Table(t), names.add, &gc, None).is_none());
        gc.get_table_mut(t).metatable = Some(mt);
        gc.get_table_mut(mt).raw_set_str(names.add, Value::Integer(1));
        assert_eq!(
            get_metamethod(Value::Table(t), names.add, &gc, None),
            Some(Value::Integer(1))
        );
        assert!(get_metamethod(Value::Table(t), names.sub, &gc, None).is_none());
    }

    #[test]
    fn test_strings_share_metatable() {
        let mut gc = GcHeap::new();
        let mut strings = StringInterner::new();
        let names = MetamethodNames::init(&mut strings);
        let mt = gc.alloc_table(0, 0);
        gc.get_table_mut(mt).raw_set_str(names.index, Value::Boolean(true));
        let s = Value::String(strings.intern(b"abc"));
        assert_eq!(
            get_metamethod(s, names.index, &gc, Some(mt)),
            Some(Value::Boolean(true))
        );
        assert!(get_metamethod(Value::Integer(1), names.index, &gc, Some(mt)).is_none());
    }
}
