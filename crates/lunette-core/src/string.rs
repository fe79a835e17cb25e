//! Lua strings and the interner that owns them.
//!
//! Every string is interned: two `StringId`s are equal exactly when their
//! bytes are equal, so string equality and table-key hashing never touch
//! the bytes. Slots freed by the collector are recycled through a free list.
use std::collections::HashMap;
use std::fmt;

/// An opaque handle to a string in the interner.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct StringId(pub u32);

/// A Lua string with precomputed hash.
#[derive(Clone)]
pub struct LuaString {
    bytes: Box<[u8]>,
    hash: u32,
}

impl LuaString {
    fn new(bytes: &[u8]) -> Self {
        LuaString {
            hash: lua_hash(bytes),
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }

    /// Lossy UTF-8 view, used for diagnostics and identifiers.
    pub fn to_str_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

impl fmt::Debug for LuaString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.bytes) {
            Ok(s) => write!(f, "{s:?}"),
            Err(_) => write!(f, "<binary string len={}>", self.len()),
        }
    }
}

/// PUC Lua compatible hash function (luaS_hash algorithm).
pub fn lua_hash(bytes: &[u8]) -> u32 {
    let len = bytes.len();
    let mut h = len as u32;
    let step = (len >> 5) + 1;
    let mut i = len;
    while i >= step {
        h ^= (h << 5).wrapping_add(h >> 2).wrapping_add(bytes[i - 1] as u32);
        i -= step;
    }
    h
}

#[derive(Debug)]
struct Slot {
    string: Option<LuaString>,
    marked: bool,
    fixed: bool,
}

/// String interner: owns all strings, deduplicates by content.
#[derive(Debug, Default)]
pub struct StringInterner {
    slots: Vec<Slot>,
    lookup: HashMap<u32, Vec<u32>>,
    free: Vec<u32>,
    live: usize,
    allocated_since_sweep: usize,
}

impl StringInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `bytes`, returning the existing id if the content is known.
    pub fn intern(&mut self, bytes: &[u8]) -> StringId {
        let hash = lua_hash(bytes);
        if let Some(ids) = self.lookup.get(&hash) {
            for &id in ids {
                if let Some(s) = &self.slots[id as usize].string {
                    if s.as_bytes() == bytes {
                        return StringId(id);
                    }
                }
            }
        }

        let string = LuaString::new(bytes);
        let id = match self.free.pop() {
            Some(id) => {
                self.slots[id as usize] = Slot {
                    string: Some(string),
                    marked: false,
                    fixed: false,
                };
                id
            }
            None => {
                let id = self.slots.len() as u32;
                self.slots.push(Slot {
                    string: Some(string),
                    marked: false,
                    fixed: false,
                });
                id
            }
        };
        self.lookup.entry(hash).or_default().push(id);
        self.live += 1;
        self.allocated_since_sweep += 1;
        StringId(id)
    }

    pub fn intern_str(&mut self, s: &str) -> StringId {
        self.intern(s.as_bytes())
    }

    /// Look up a string without creating it.
    pub fn find(&self, bytes: &[u8]) -> Option<StringId> {
        let ids = self.lookup.get(&lua_hash(bytes))?;
        ids.iter()
            .copied()
            .find(|&id| {
                self.slots[id as usize]
                    .string
                    .as_ref()
                    .is_some_and(|s| s.as_bytes() == bytes)
            })
            .map(StringId)
    }

    /// Get a string by its id. Panics on a swept id, which is a collector bug.
    pub fn get(&self, id: StringId) -> &LuaString {
        self.slots[id.0 as usize]
            .string
            .as_ref()
            .unwrap_or_else(|| panic!("string {id:?} used after collection"))
    }

    pub fn get_bytes(&self, id: StringId) -> &[u8] {
        self.get(id).as_bytes()
    }

    /// Lossy UTF-8 rendering of a string.
    pub fn get_str(&self, id: StringId) -> std::borrow::Cow<'_, str> {
        self.get(id).to_str_lossy()
    }

    /// Number of live strings.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn allocated_since_sweep(&self) -> usize {
        self.allocated_since_sweep
    }

    // ---- Collection ----

    /// Exempt a string from collection for the rest of the interner's life.
    pub fn fix(&mut self, id: StringId) {
        self.slots[id.0 as usize].fixed = true;
    }

    pub fn mark(&mut self, id: StringId) {
        if let Some(slot) = self.slots.get_mut(id.0 as usize) {
            slot.marked = true;
        }
    }

    /// Free every unmarked, unfixed string and clear marks. Returns the number freed.
    pub fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            let Some(string) = &slot.string else { continue };
            if slot.marked || slot.fixed {
                slot.marked = false;
                continue;
            }
            if let Some(ids) = self.lookup.get_mut(&string.hash()) {
                ids.retain(|&i| i as usize != idx);
                if ids.is_empty() {
                    self.lookup.remove(&string.hash());
                }
            }
            slot.string = None;
            self.free.push(idx as u32);
            freed += 1;
        }
        self.live -= freed;
        self.allocated_since_sweep = 0;
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_any_length() {
        let mut interner = StringInterner::new();
        let long = vec![b'x'; 500];
        assert_eq!(interner.intern(b"hello"), interner.intern(b"hello"));
        assert_eq!(interner.intern(&long), interner.intern(&long));
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn test_different_strings_different_ids() {
        let mut interner = StringInterner::new();
        assert_ne!(interner.intern(b"hello"), interner.intern(b"world"));
    }

    #[test]
    fn test_binary_and_empty() {
        let mut interner = StringInterner::new();
        let id = interner.intern(b"a\0b");
        assert_eq!(interner.get_bytes(id), b"a\0b");
        let empty = interner.intern(b"");
        assert!(interner.get(empty).is_empty());
    }

    #[test]
    fn test_find_does_not_create() {
        let mut interner = StringInterner::new();
        assert!(interner.find(b"nope").is_none());
        let id = interner.intern(b"yes");
        assert_eq!(interner.find(b"yes"), Some(id));
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn test_sweep_frees_unmarked_and_recycles() {
        let mut interner = StringInterner::new();
        let keep = interner.intern(b"keep");
        let fixed = interner.intern(b"fixed");
        let _gone = interner.intern(b"gone");
        interner.fix(fixed);
        interner.mark(keep);
        assert_eq!(interner.sweep(), 1);
        assert_eq!(interner.len(), 2);
        assert!(interner.find(b"gone").is_none());
        assert_eq!(interner.get_bytes(keep), b"keep");

        // The freed slot is reused and the new content is findable.
        let again = interner.intern(b"again");
        assert_eq!(interner.find(b"again"), Some(again));
        assert_eq!(interner.get_bytes(fixed), b"fixed");
    }

    #[test]
    fn test_stress_10k_strings() {
        let mut interner = StringInterner::new();
        let ids: Vec<_> = (0..10_000)
            .map(|i| interner.intern(format!("string_{i}").as_bytes()))
            .collect();
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(interner.get_bytes(*id), format!("string_{i}").as_bytes());
        }
        assert_eq!(interner.len(), 10_000);
    }

    #[test]
    fn test_hash_consistency() {
        assert_eq!(lua_hash(b"hello"), lua_hash(b"hello"));
        assert_ne!(lua_hash(b"hello"), lua_hash(b"world"));
    }
}
