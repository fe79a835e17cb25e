//! Hybrid array+hash table for Lua.

use crate::gc::{GcIdx, LuaClosure, NativeFunction, UserData};
use crate::number::float_to_integer;
use crate::string::StringId;
use crate::value::{ThreadId, Value};
use indexmap::IndexMap;

/// A key in the hash part of a table. Floats with an integral value are
/// normalized to `Integer` so `t[1]` and `t[1.0]` address the same slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TableKey {
    Boolean(bool),
    Integer(i64),
    /// Non-integral float key, stored as raw bits for hashing.
    Float(u64),
    String(StringId),
    Table(GcIdx<Table>),
    Function(GcIdx<LuaClosure>),
    Native(GcIdx<NativeFunction>),
    UserData(GcIdx<UserData>),
    Thread(ThreadId),
}

impl TableKey {
    /// Convert a value to a key; `None` for nil and NaN.
    pub fn from_value(v: Value) -> Option<TableKey> {
        Some(match v {
            Value::Nil => return None,
            Value::Boolean(b) => TableKey::Boolean(b),
            Value::Integer(i) => TableKey::Integer(i),
            Value::Float(f) => {
                if f.is_nan() {
                    return None;
                }
                match float_to_integer(f) {
                    Some(i) => TableKey::Integer(i),
                    None => TableKey::Float(f.to_bits()),
                }
            }
            Value::String(s) => TableKey::String(s),
            Value::Table(t) => TableKey::Table(t),
            Value::Function(f) => TableKey::Function(f),
            Value::Native(n) => TableKey::Native(n),
            Value::UserData(u) => TableKey::UserData(u),
            Value::Thread(t) => TableKey::Thread(t),
        })
    }

    pub fn to_value(self) -> Value {
        match self {
            TableKey::Boolean(b) => Value::Boolean(b),
            TableKey::Integer(i) => Value::Integer(i),
            TableKey::Float(bits) => Value::Float(f64::from_bits(bits)),
            TableKey::String(s) => Value::String(s),
            TableKey::Table(t) => Value::Table(t),
            TableKey::Function(f) => Value::Function(f),
            TableKey::Native(n) => Value::Native(n),
            TableKey::UserData(u) => Value::UserData(u),
            TableKey::Thread(t) => Value::Thread(t),
        }
    }
}

/// Why a raw store was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableError {
    NilIndex,
    NaNIndex,
}

impl TableError {
    pub fn message(self) -> &'static str {
        match self {
            TableError::NilIndex => "table index is nil",
            TableError::NaNIndex => "table index is NaN",
        }
    }
}

/// `next` was handed a key that is not in the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvalidNextKey;

/// A Lua table: hybrid array + hash map.
pub struct Table {
    /// Array part (array[0] holds key 1).
    array: Vec<Value>,
    /// Hash part, insertion-ordered. Entries set to nil stay as tombstones so
    /// `next` keeps working while a traversal clears fields.
    hash: IndexMap<TableKey, Value>,
    tombstones: usize,
    pub metatable: Option<GcIdx<Table>>,
}

impl Table {
    pub fn new(array_hint: usize, hash_hint: usize) -> Self {
        Table {
            array: Vec::with_capacity(array_hint),
            hash: IndexMap::with_capacity(hash_hint),
            tombstones: 0,
            metatable: None,
        }
    }

    pub fn raw_get(&self, key: Value) -> Value {
        match TableKey::from_value(key) {
            Some(TableKey::Integer(i)) => self.raw_geti(i),
            Some(k) => self.hash.get(&k).copied().unwrap_or_default(),
            None => Value::Nil,
        }
    }

    pub fn raw_set(&mut self, key: Value, value: Value) -> Result<(), TableError> {
        match key {
            Value::Nil => return Err(TableError::NilIndex),
            Value::Float(f) if f.is_nan() => return Err(TableError::NaNIndex),
            _ => {}
        }
        match TableKey::from_value(key) {
            Some(TableKey::Integer(i)) => self.raw_seti(i, value),
            Some(k) => self.set_hash(k, value),
            None => return Err(TableError::NilIndex),
        }
        Ok(())
    }

    pub fn raw_geti(&self, key: i64) -> Value {
        if key >= 1 && (key as u64) <= self.array.len() as u64 {
            self.array[(key - 1) as usize]
        } else {
            self.hash
                .get(&TableKey::Integer(key))
                .copied()
                .unwrap_or_default()
        }
    }

    pub fn raw_seti(&mut self, key: i64, value: Value) {
        if key >= 1 {
            let idx = (key - 1) as u64;
            if idx < self.array.len() as u64 {
                self.array[idx as usize] = value;
                return;
            }
            if idx == self.array.len() as u64 && !value.is_nil() {
                self.array.push(value);
                self.migrate_hash_to_array();
                return;
            }
        }
        self.set_hash(TableKey::Integer(key), value);
    }

    pub fn raw_get_str(&self, key: StringId) -> Value {
        self.hash
            .get(&TableKey::String(key))
            .copied()
            .unwrap_or_default()
    }

    pub fn raw_set_str(&mut self, key: StringId, value: Value) {
        self.set_hash(TableKey::String(key), value);
    }

    fn set_hash(&mut self, key: TableKey, value: Value) {
        match self.hash.get_mut(&key) {
            Some(slot) => {
                match (slot.is_nil(), value.is_nil()) {
                    (false, true) => self.tombstones += 1,
                    (true, false) => self.tombstones -= 1,
                    _ => {}
                }
                *slot = value;
            }
            None if value.is_nil() => {}
            None => {
                if self.tombstones > 8 && self.tombstones * 2 > self.hash.len() {
                    self.compact_hash();
                }
                self.hash.insert(key, value);
            }
        }
    }

    /// Border of the table: some `n` with `t[n] ~= nil` and `t[n+1] == nil`.
    pub fn length(&self) -> i64 {
        let Some(last) = self.array.last() else {
            return self.hash_border(0);
        };
        if !last.is_nil() {
            return self.hash_border(self.array.len() as i64);
        }
        let mut lo = 0usize;
        let mut hi = self.array.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.array[mid].is_nil() {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo as i64
    }

    fn hash_border(&self, mut n: i64) -> i64 {
        while !self.raw_geti(n + 1).is_nil() {
            n += 1;
        }
        n
    }

    /// Next key/value after `key` in traversal order; `Ok(None)` at the end.
    pub fn next(&self, key: Value) -> Result<Option<(Value, Value)>, InvalidNextKey> {
        let hash_start = match key {
            Value::Nil => match self.next_in_array(0) {
                Some(pair) => return Ok(Some(pair)),
                None => 0,
            },
            _ => match TableKey::from_value(key) {
                Some(TableKey::Integer(i)) if i >= 1 && (i as u64) <= self.array.len() as u64 => {
                    match self.next_in_array(i as usize) {
                        Some(pair) => return Ok(Some(pair)),
                        None => 0,
                    }
                }
                Some(k) => match self.hash.get_index_of(&k) {
                    Some(pos) => pos + 1,
                    None => return Err(InvalidNextKey),
                },
                None => return Err(InvalidNextKey),
            },
        };
        Ok(self
            .hash
            .iter()
            .skip(hash_start)
            .find(|(_, v)| !v.is_nil())
            .map(|(k, v)| (k.to_value(), *v)))
    }

    fn next_in_array(&self, from: usize) -> Option<(Value, Value)> {
        self.array[from..]
            .iter()
            .position(|v| !v.is_nil())
            .map(|off| {
                let idx = from + off;
                (Value::Integer(idx as i64 + 1), self.array[idx])
            })
    }

    /// Drop tombstones from the hash part.
    pub fn compact_hash(&mut self) {
        self.hash.retain(|_, v| !v.is_nil());
        self.tombstones = 0;
    }

    /// Move consecutive integer entries from hash into array.
    fn migrate_hash_to_array(&mut self) {
        loop {
            let next_key = TableKey::Integer(self.array.len() as i64 + 1);
            match self.hash.shift_remove(&next_key) {
                Some(v) if !v.is_nil() => self.array.push(v),
                Some(_) => {
                    self.tombstones -= 1;
                    break;
                }
                None => break,
            }
        }
    }

    // ---- Sequence helpers used by the table library ----

    /// Insert at 1-based `pos`, shifting the sequence `[pos, len]` up by one.
    pub fn insert(&mut self, pos: i64, value: Value) {
        let len = self.length();
        let mut i = len;
        while i >= pos {
            let v = self.raw_geti(i);
            self.raw_seti(i + 1, v);
            i -= 1;
        }
        self.raw_seti(pos, value);
    }

    /// Remove at 1-based `pos`, shifting `[pos+1, len]` down. Returns the removed value.
    pub fn remove(&mut self, pos: i64) -> Value {
        let len = self.length();
        let removed = self.raw_geti(pos);
        let mut i = pos;
        while i < len {
            let v = self.raw_geti(i + 1);
            self.raw_seti(i, v);
            i += 1;
        }
        if pos <= len {
            self.raw_seti(len, Value::Nil);
        }
        removed
    }

    // ---- Traversal for the collector ----

    pub fn array_values(&self) -> &[Value] {
        &self.array
    }

    pub fn hash_entries(&self) -> impl Iterator<Item = (&TableKey, &Value)> {
        self.hash.iter()
    }

    pub fn hash_len(&self) -> usize {
        self.hash.len() - self.tombstones
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "table(array={}, hash={})",
            self.array.len(),
            self.hash_len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(n: u32) -> Value {
        Value::String(StringId(n))
    }

    #[test]
    fn test_array_append_and_get() {
        let mut t = Table::new(0, 0);
        for i in 1..=10 {
            t.raw_seti(i, Value::Integer(i * 10));
        }
        assert_eq!(t.length(), 10);
        assert_eq!(t.raw_geti(3), Value::Integer(30));
        assert_eq!(t.array_values().len(), 10);
    }

    #[test]
    fn test_out_of_order_integers_migrate() {
        let mut t = Table::new(0, 0);
        t.raw_seti(3, Value::Integer(3));
        t.raw_seti(2, Value::Integer(2));
        assert_eq!(t.length(), 0);
        t.raw_seti(1, Value::Integer(1));
        assert_eq!(t.array_values().len(), 3);
        assert_eq!(t.length(), 3);
    }

    #[test]
    fn test_float_keys_normalize() {
        let mut t = Table::new(0, 0);
        t.raw_set(Value::Float(1.0), Value::Boolean(true)).unwrap();
        assert_eq!(t.raw_geti(1), Value::Boolean(true));
        t.raw_set(Value::Float(2.5), Value::Integer(7)).unwrap();
        assert_eq!(t.raw_get(Value::Float(2.5)), Value::Integer(7));
    }

    #[test]
    fn test_nil_and_nan_keys_rejected() {
        let mut t = Table::new(0, 0);
        assert_eq!(t.raw_set(Value::Nil, Value::Integer(1)), Err(TableError::NilIndex));
        assert_eq!(
            t.raw_set(Value::Float(f64::NAN), Value::Integer(1)),
            Err(TableError::NaNIndex)
        );
        assert_eq!(t.raw_get(Value::Nil), Value::Nil);
    }

    #[test]
    fn test_length_with_holes_is_a_border() {
        let mut t = Table::new(0, 0);
        for i in 1..=8 {
            t.raw_seti(i, Value::Integer(i));
        }
        t.raw_seti(8, Value::Nil);
        t.raw_seti(4, Value::Nil);
        let n = t.length();
        assert!(!t.raw_geti(n).is_nil() || n == 0);
        assert!(t.raw_geti(n + 1).is_nil());
    }

    #[test]
    fn test_next_visits_everything_once() {
        let mut t = Table::new(0, 0);
        t.raw_seti(1, Value::Integer(1));
        t.raw_seti(2, Value::Integer(2));
        t.raw_set(s(5), Value::Integer(5)).unwrap();
        t.raw_set(Value::Boolean(true), Value::Integer(6)).unwrap();

        let mut seen = Vec::new();
        let mut key = Value::Nil;
        while let Some((k, v)) = t.next(key).unwrap() {
            seen.push(v);
            key = k;
        }
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn test_clearing_during_traversal() {
        let mut t = Table::new(0, 0);
        for n in 0..20 {
            t.raw_set(s(n), Value::Integer(n as i64)).unwrap();
        }
        let mut key = Value::Nil;
        let mut count = 0;
        while let Some((k, _)) = t.next(key).unwrap() {
            t.raw_set(k, Value::Nil).unwrap();
            key = k;
            count += 1;
        }
        assert_eq!(count, 20);
        assert_eq!(t.hash_len(), 0);
    }

    #[test]
    fn test_next_invalid_key() {
        let t = Table::new(0, 0);
        assert_eq!(t.next(s(99)), Err(InvalidNextKey));
    }

    #[test]
    fn test_insert_and_remove_shift() {
        let mut t = Table::new(0, 0);
        for i in 1..=3 {
            t.raw_seti(i, Value::Integer(i));
        }
        t.insert(1, Value::Integer(0));
        assert_eq!(t.length(), 4);
        assert_eq!(t.raw_geti(1), Value::Integer(0));
        assert_eq!(t.raw_geti(4), Value::Integer(3));
        assert_eq!(t.remove(2), Value::Integer(1));
        assert_eq!(t.length(), 3);
        assert_eq!(t.raw_geti(3), Value::Integer(3));
    }
}
