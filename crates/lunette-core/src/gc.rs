//! Arena heap with typed indices and a mark-and-sweep collector.
//!
//! The heap knows how to trace its own objects. Roots live in the VM, so a
//! collection is driven from outside: mark roots, `propagate` until the gray
//! list is empty (handing back any threads reached so the VM can trace their
//! stacks), then `sweep`.

use crate::string::StringInterner;
use crate::table::{Table, TableKey};
use crate::value::{ThreadId, Value};
use std::any::Any;
use std::marker::PhantomData;

/// A typed index into an arena in the GcHeap.
pub struct GcIdx<T>(pub u32, pub PhantomData<T>);

impl<T> GcIdx<T> {
    pub fn new(index: u32) -> Self {
        GcIdx(index, PhantomData)
    }

    pub fn index(self) -> u32 {
        self.0
    }
}

impl<T> Clone for GcIdx<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for GcIdx<T> {}

impl<T> PartialEq for GcIdx<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl<T> Eq for GcIdx<T> {}

impl<T> std::hash::Hash for GcIdx<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl<T> std::fmt::Debug for GcIdx<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifies a host callback in the VM's callback registry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct CallbackId(pub u32);

/// A Lua closure (prototype + captured upvalues).
#[derive(Debug)]
pub struct LuaClosure {
    /// Index of the prototype in the VM's proto store.
    pub proto_idx: usize,
    pub upvalues: Vec<GcIdx<UpVal>>,
}

/// A host function value. The callable itself lives in the VM's registry;
/// the heap only keeps what the collector must see.
#[derive(Debug)]
pub struct NativeFunction {
    pub callback: CallbackId,
    pub name: String,
    /// Values bound to this instance (e.g. the thread behind `coroutine.wrap`).
    pub upvalues: Vec<Value>,
}

/// An upvalue: open while its variable is still on a thread's stack,
/// closed once the variable's scope has been left.
#[derive(Debug)]
pub struct UpVal {
    pub location: UpValLocation,
}

#[derive(Debug, Clone, Copy)]
pub enum UpValLocation {
    Open { thread: ThreadId, slot: usize },
    Closed(Value),
}

/// Opaque host data with an optional metatable.
pub struct UserData {
    pub data: Box<dyn Any>,
    pub metatable: Option<GcIdx<Table>>,
}

impl std::fmt::Debug for UserData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "userdata(metatable={:?})", self.metatable)
    }
}

// ---- Arena ----

/// Slot storage for one object kind, with mark bits and a free list.
pub struct Arena<T> {
    slots: Vec<Option<T>>,
    marks: Vec<bool>,
    free: Vec<u32>,
    live: usize,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Arena {
            slots: Vec::new(),
            marks: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    pub fn alloc(&mut self, value: T) -> GcIdx<T> {
        self.live += 1;
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx as usize] = Some(value);
                self.marks[idx as usize] = false;
                GcIdx::new(idx)
            }
            None => {
                let idx = self.slots.len() as u32;
                self.slots.push(Some(value));
                self.marks.push(false);
                GcIdx::new(idx)
            }
        }
    }

    pub fn get(&self, idx: GcIdx<T>) -> &T {
        self.slots[idx.0 as usize]
            .as_ref()
            .expect("object used after collection")
    }

    pub fn get_mut(&mut self, idx: GcIdx<T>) -> &mut T {
        self.slots[idx.0 as usize]
            .as_mut()
            .expect("object used after collection")
    }

    pub fn try_get(&self, idx: GcIdx<T>) -> Option<&T> {
        self.slots.get(idx.0 as usize).and_then(|s| s.as_ref())
    }

    /// Set the mark bit; returns true if it was not already set.
    fn mark(&mut self, idx: GcIdx<T>) -> bool {
        match self.marks.get_mut(idx.0 as usize) {
            Some(m) if !*m => {
                *m = true;
                true
            }
            _ => false,
        }
    }

    pub fn is_marked(&self, idx: GcIdx<T>) -> bool {
        self.marks.get(idx.0 as usize).copied().unwrap_or(false)
    }

    /// Free unmarked objects and reset marks. Returns how many were freed.
    fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                continue;
            }
            if self.marks[i] {
                self.marks[i] = false;
            } else {
                *slot = None;
                self.free.push(i as u32);
                freed += 1;
            }
        }
        self.live -= freed;
        freed
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Objects freed by one sweep, per kind.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub tables: usize,
    pub closures: usize,
    pub natives: usize,
    pub upvals: usize,
    pub userdata: usize,
    pub strings: usize,
}

impl SweepStats {
    pub fn total(&self) -> usize {
        self.tables + self.closures + self.natives + self.upvals + self.userdata + self.strings
    }
}

// ---- Heap ----

/// Arena-based GC heap.
#[derive(Default)]
pub struct GcHeap {
    pub tables: Arena<Table>,
    pub closures: Arena<LuaClosure>,
    pub natives: Arena<NativeFunction>,
    pub upvals: Arena<UpVal>,
    pub userdata: Arena<UserData>,
    gray: Vec<Value>,
    gray_upvals: Vec<GcIdx<UpVal>>,
    allocated: usize,
}

impl GcHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_table(&mut self, array_hint: usize, hash_hint: usize) -> GcIdx<Table> {
        self.allocated += 1;
        self.tables.alloc(Table::new(array_hint, hash_hint))
    }

    pub fn get_table(&self, idx: GcIdx<Table>) -> &Table {
        self.tables.get(idx)
    }

    pub fn get_table_mut(&mut self, idx: GcIdx<Table>) -> &mut Table {
        self.tables.get_mut(idx)
    }

    pub fn alloc_closure(
        &mut self,
        proto_idx: usize,
        upvalues: Vec<GcIdx<UpVal>>,
    ) -> GcIdx<LuaClosure> {
        self.allocated += 1;
        self.closures.alloc(LuaClosure {
            proto_idx,
            upvalues,
        })
    }

    pub fn get_closure(&self, idx: GcIdx<LuaClosure>) -> &LuaClosure {
        self.closures.get(idx)
    }

    pub fn alloc_native(
        &mut self,
        callback: CallbackId,
        name: impl Into<String>,
        upvalues: Vec<Value>,
    ) -> GcIdx<NativeFunction> {
        self.allocated += 1;
        self.natives.alloc(NativeFunction {
            callback,
            name: name.into(),
            upvalues,
        })
    }

    pub fn get_native(&self, idx: GcIdx<NativeFunction>) -> &NativeFunction {
        self.natives.get(idx)
    }

    pub fn alloc_upval(&mut self, location: UpValLocation) -> GcIdx<UpVal> {
        self.allocated += 1;
        self.upvals.alloc(UpVal { location })
    }

    pub fn get_upval(&self, idx: GcIdx<UpVal>) -> &UpVal {
        self.upvals.get(idx)
    }

    pub fn get_upval_mut(&mut self, idx: GcIdx<UpVal>) -> &mut UpVal {
        self.upvals.get_mut(idx)
    }

    pub fn alloc_userdata(
        &mut self,
        data: Box<dyn Any>,
        metatable: Option<GcIdx<Table>>,
    ) -> GcIdx<UserData> {
        self.allocated += 1;
        self.userdata.alloc(UserData { data, metatable })
    }

    pub fn get_userdata(&self, idx: GcIdx<UserData>) -> &UserData {
        self.userdata.get(idx)
    }

    pub fn get_userdata_mut(&mut self, idx: GcIdx<UserData>) -> &mut UserData {
        self.userdata.get_mut(idx)
    }

    /// Objects allocated since the last sweep.
    pub fn allocated_since_sweep(&self) -> usize {
        self.allocated
    }

    /// Objects currently alive across all arenas.
    pub fn live_objects(&self) -> usize {
        self.tables.len()
            + self.closures.len()
            + self.natives.len()
            + self.upvals.len()
            + self.userdata.len()
    }

    // ---- Marking ----

    /// Queue a root value for tracing.
    pub fn mark_value(&mut self, v: Value) {
        self.gray.push(v);
    }

    pub fn mark_upval(&mut self, idx: GcIdx<UpVal>) {
        self.gray_upvals.push(idx);
    }

    /// Trace everything reachable from the queued roots. Returns the threads
    /// reached along the way; the caller traces their stacks and calls
    /// `propagate` again until no new threads turn up.
    pub fn propagate(&mut self, strings: &mut StringInterner) -> Vec<ThreadId> {
        let mut threads = Vec::new();
        loop {
            if let Some(idx) = self.gray_upvals.pop() {
                if !self.upvals.mark(idx) {
                    continue;
                }
                match self.upvals.get(idx).location {
                    UpValLocation::Closed(v) => self.gray.push(v),
                    UpValLocation::Open { thread, .. } => threads.push(thread),
                }
                continue;
            }
            let Some(v) = self.gray.pop() else { break };
            match v {
                Value::String(id) => strings.mark(id),
                Value::Thread(t) => threads.push(t),
                Value::Table(idx) => {
                    if !self.tables.mark(idx) {
                        continue;
                    }
                    let table = self.tables.get(idx);
                    let mut found: Vec<Value> = table.array_values().to_vec();
                    for (k, val) in table.hash_entries() {
                        if !val.is_nil() {
                            found.push(k.to_value());
                            found.push(*val);
                        } else if let TableKey::String(s) = k {
                            // Dead keys are kept for `next`; their strings must survive too.
                            found.push(Value::String(*s));
                        }
                    }
                    if let Some(mt) = table.metatable {
                        found.push(Value::Table(mt));
                    }
                    self.gray.extend(found);
                }
                Value::Function(idx) => {
                    if !self.closures.mark(idx) {
                        continue;
                    }
                    let upvals = self.closures.get(idx).upvalues.clone();
                    self.gray_upvals.extend(upvals);
                }
                Value::Native(idx) => {
                    if !self.natives.mark(idx) {
                        continue;
                    }
                    let ups = self.natives.get(idx).upvalues.clone();
                    self.gray.extend(ups);
                }
                Value::UserData(idx) => {
                    if !self.userdata.mark(idx) {
                        continue;
                    }
                    if let Some(mt) = self.userdata.get(idx).metatable {
                        self.gray.push(Value::Table(mt));
                    }
                }
                Value::Nil | Value::Boolean(_) | Value::Integer(_) | Value::Float(_) => {}
            }
        }
        threads
    }

    /// Free every unmarked object and clear all marks.
    pub fn sweep(&mut self, strings: &mut StringInterner) -> SweepStats {
        self.allocated = 0;
        SweepStats {
            tables: self.tables.sweep(),
            closures: self.closures.sweep(),
            natives: self.natives.sweep(),
            upvals: self.upvals.sweep(),
            userdata: self.userdata.sweep(),
            strings: strings.sweep(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_reuses_freed_slots() {
        let mut heap = GcHeap::new();
        let mut strings = StringInterner::new();
        let a = heap.alloc_table(0, 0);
        let _b = heap.alloc_table(0, 0);
        heap.mark_value(Value::Table(a));
        heap.propagate(&mut strings);
        let stats = heap.sweep(&mut strings);
        assert_eq!(stats.tables, 1);
        assert_eq!(heap.tables.len(), 1);
        let c = heap.alloc_table(0, 0);
        assert_eq!(c.index(), 1);
    }

    #[test]
    fn test_tracing_through_tables_and_metatables() {
        let mut heap = GcHeap::new();
        let mut strings = StringInterner::new();
        let root = heap.alloc_table(0, 0);
        let child = heap.alloc_table(0, 0);
        let mt = heap.alloc_table(0, 0);
        let key = strings.intern(b"child");
        let orphan = strings.intern(b"orphan");
        heap.get_table_mut(root).raw_set_str(key, Value::Table(child));
        heap.get_table_mut(child).metatable = Some(mt);

        heap.mark_value(Value::Table(root));
        heap.propagate(&mut strings);
        let stats = heap.sweep(&mut strings);
        assert_eq!(stats.tables, 0);
        assert_eq!(stats.strings, 1);
        assert!(strings.find(b"orphan").is_none());
        let _ = orphan;
    }

    #[test]
    fn test_closed_upvalues_keep_values_alive() {
        let mut heap = GcHeap::new();
        let mut strings = StringInterner::new();
        let held = heap.alloc_table(0, 0);
        let uv = heap.alloc_upval(UpValLocation::Closed(Value::Table(held)));
        let f = heap.alloc_closure(0, vec![uv]);
        heap.mark_value(Value::Function(f));
        heap.propagate(&mut strings);
        let stats = heap.sweep(&mut strings);
        assert_eq!(stats.total(), 0);
    }

    #[test]
    fn test_open_upvalue_reports_thread() {
        let mut heap = GcHeap::new();
        let mut strings = StringInterner::new();
        let uv = heap.alloc_upval(UpValLocation::Open {
            thread: ThreadId(3),
            slot: 0,
        });
        let f = heap.alloc_closure(0, vec![uv]);
        heap.mark_value(Value::Function(f));
        let threads = heap.propagate(&mut strings);
        assert_eq!(threads, vec![ThreadId(3)]);
    }

    #[test]
    fn test_native_upvalues_traced() {
        let mut heap = GcHeap::new();
        let mut strings = StringInterner::new();
        let t = heap.alloc_table(0, 0);
        let n = heap.alloc_native(CallbackId(0), "wrap", vec![Value::Table(t)]);
        heap.mark_value(Value::Native(n));
        heap.propagate(&mut strings);
        assert_eq!(heap.sweep(&mut strings).tables, 0);
    }
}
