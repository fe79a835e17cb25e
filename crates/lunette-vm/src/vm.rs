//! Lua VM state.

use crate::binary_chunk;
use crate::callback::{Callback, CallbackFn, CallbackResult, ExecutionContext};
use crate::callinfo::{CallInfo, PendingCall, Protection};
use crate::debugger::{DebugService, FrameInfo, SourceLocation};
use crate::dispatch::{self, Exit};
use crate::error::LuaError;
use crate::metamethod::{self, MetamethodNames};
use crate::options::VmOptions;
use lunette_compiler::{CompileOptions, Proto};
use lunette_core::gc::{CallbackId, GcHeap, GcIdx, UpVal, UpValLocation};
use lunette_core::number;
use lunette_core::string::{StringId, StringInterner};
use lunette_core::table::Table;
use lunette_core::value::{ThreadId, Value};
use std::rc::Rc;

/// A prototype registered with the VM. Children are stored flat; `children`
/// maps a `Closure` operand to the child's index in `Vm::protos`.
#[derive(Debug)]
pub struct LoadedProto {
    pub proto: Proto,
    pub children: Vec<usize>,
}

/// Per-coroutine state (stack, call stack, upvalues).
#[derive(Debug, Default)]
pub struct LuaThread {
    pub stack: Vec<Value>,
    pub call_stack: Vec<CallInfo>,
    /// Open upvalues sorted by stack slot (ascending).
    pub open_upvals: Vec<(usize, GcIdx<UpVal>)>,
    pub status: CoroutineStatus,
    /// Body function, until the first resume.
    pub entry: Option<Value>,
    /// The host call a yield is waiting in.
    pub pending: Option<PendingCall>,
    /// Slot is on the free list.
    pub free: bool,
}

/// Coroutine lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CoroutineStatus {
    /// Created or yielded; ready to be resumed.
    #[default]
    Suspended,
    /// Currently executing.
    Running,
    /// Resumed another coroutine and waits for it.
    Normal,
    /// Finished execution or errored out.
    Dead,
}

impl CoroutineStatus {
    pub fn name(self) -> &'static str {
        match self {
            CoroutineStatus::Suspended => "suspended",
            CoroutineStatus::Running => "running",
            CoroutineStatus::Normal => "normal",
            CoroutineStatus::Dead => "dead",
        }
    }
}

/// How a resume ended.
#[derive(Debug, PartialEq)]
pub enum ResumeOutcome {
    Yielded(Vec<Value>),
    Returned(Vec<Value>),
}

/// The Lua virtual machine.
///
/// The `stack`, `call_stack` and `open_upvals` fields always refer to the
/// **currently running** thread. When a coroutine is resumed, the caller's
/// state is saved into its `LuaThread` slot and the coroutine's state is
/// swapped in. On yield or return, the reverse swap happens.
pub struct Vm {
    /// Value stack: locals of every frame plus their operand stacks.
    pub stack: Vec<Value>,
    /// Lua call frames of the running thread.
    pub call_stack: Vec<CallInfo>,
    /// Open upvalues of the running thread, sorted by slot.
    pub open_upvals: Vec<(usize, GcIdx<UpVal>)>,
    /// GC heap.
    pub gc: GcHeap,
    /// String interner (shared with compiler output).
    pub strings: StringInterner,
    /// All prototypes (flattened from nested trees).
    pub protos: Vec<LoadedProto>,
    /// Thread table, indexed by `ThreadId`. Slot 0 is the main thread.
    pub threads: Vec<LuaThread>,
    free_threads: Vec<u32>,
    /// The running thread.
    pub current: ThreadId,
    /// Threads waiting in `resume` for the running one, innermost last.
    pub resume_chain: Vec<ThreadId>,
    /// The result slot of the yield that suspended the running thread.
    pub(crate) pending_yield: Option<PendingCall>,
    /// Global table (`_ENV` of loaded chunks, `DefaultEnv` of expressions).
    pub globals: GcIdx<Table>,
    /// Host-side anchor table; values stored here are never collected.
    pub registry: GcIdx<Table>,
    /// Shared metatable of all strings.
    pub string_metatable: Option<GcIdx<Table>>,
    /// Pre-interned metamethod names.
    pub mm_names: MetamethodNames,
    /// Registered host functions, indexed by `CallbackId`.
    pub callbacks: Vec<Callback>,
    pub options: VmOptions,
    /// Rust-level re-entries (nested `call_function` / `resume`).
    pub native_depth: usize,
    /// `native_depth` at which the running coroutine's body executes.
    /// A yield is only legal at exactly this depth.
    pub yield_depth: usize,
    /// Automatic collection is suppressed while non-zero (host code may
    /// hold values the collector cannot see).
    pub gc_pause: u32,
    /// Allocation count that triggers the next automatic collection.
    pub gc_threshold: usize,
    /// Attached debugger, if any.
    pub debug: Option<DebugService>,
    next_registry_key: i64,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    pub fn with_options(options: VmOptions) -> Self {
        let mut strings = StringInterner::new();
        let mm_names = MetamethodNames::init(&mut strings);
        let mut gc = GcHeap::new();
        let globals = gc.alloc_table(0, 64);
        let registry = gc.alloc_table(0, 8);
        let main = LuaThread {
            status: CoroutineStatus::Running,
            ..LuaThread::default()
        };
        Vm {
            stack: Vec::with_capacity(256),
            call_stack: Vec::with_capacity(16),
            open_upvals: Vec::new(),
            gc,
            strings,
            protos: Vec::new(),
            threads: vec![main],
            free_threads: Vec::new(),
            current: ThreadId::MAIN,
            resume_chain: Vec::new(),
            pending_yield: None,
            globals,
            registry,
            string_metatable: None,
            mm_names,
            callbacks: Vec::new(),
            gc_threshold: options.gc_step_threshold,
            options,
            native_depth: 0,
            yield_depth: 0,
            gc_pause: 0,
            debug: None,
            next_registry_key: 1,
        }
    }

    // ---- Loading ----

    /// Compile a chunk with the VM's dialect and wrap it in a closure.
    /// Binary chunks (see [`binary_chunk`]) are undumped instead.
    pub fn load(&mut self, source: &[u8], chunk_name: &str) -> Result<Value, LuaError> {
        let proto = self.compile_chunk(source, chunk_name)?;
        Ok(self.load_proto(proto, None))
    }

    /// Compile source text or undump a binary chunk without loading it.
    pub fn compile_chunk(&mut self, source: &[u8], chunk_name: &str) -> Result<Proto, LuaError> {
        let options = CompileOptions::new(chunk_name).with_version(self.options.version);
        if binary_chunk::is_binary_chunk(source) {
            return binary_chunk::undump(source, &mut self.strings).map_err(|e| {
                let msg = format!("{}: {e}", options.display_chunk_name());
                LuaError::runtime(msg, &mut self.strings)
            });
        }
        Ok(lunette_compiler::compile(source, &options, &mut self.strings)?)
    }

    /// Serialize a Lua function to a binary chunk. Its upvalues are not
    /// saved; a loaded copy gets fresh ones.
    pub fn dump_function(&mut self, func: Value, strip: bool) -> Result<Vec<u8>, LuaError> {
        match func {
            Value::Function(idx) => {
                let proto_idx = self.gc.get_closure(idx).proto_idx;
                Ok(binary_chunk::dump(&self.proto_tree(proto_idx), &self.strings, strip))
            }
            _ => Err(self.runtime_error("unable to dump given function")),
        }
    }

    /// Register a compiled prototype tree and create its main closure. The
    /// `_ENV` upvalue is bound to `env` or, by default, the globals.
    #[tracing::instrument(level = "trace", skip_all, fields(source = %proto.source))]
    pub fn load_proto(&mut self, proto: Proto, env: Option<Value>) -> Value {
        let env = env.unwrap_or(Value::Table(self.globals));
        let env_name = self.strings.find(b"_ENV");
        let upvalues = proto
            .upvalues
            .iter()
            .map(|up| {
                let v = if Some(up.name) == env_name { env } else { Value::Nil };
                self.gc.alloc_upval(UpValLocation::Closed(v))
            })
            .collect();
        let idx = self.register_proto(proto);
        Value::Function(self.gc.alloc_closure(idx, upvalues))
    }

    fn register_proto(&mut self, mut proto: Proto) -> usize {
        let children = std::mem::take(&mut proto.protos);
        let idx = self.protos.len();
        self.protos.push(LoadedProto {
            proto,
            children: Vec::new(),
        });
        let child_idxs = children
            .into_iter()
            .map(|c| self.register_proto(c))
            .collect();
        self.protos[idx].children = child_idxs;
        idx
    }

    /// Rebuild the nested prototype tree rooted at `idx`.
    pub fn proto_tree(&self, idx: usize) -> Proto {
        let entry = &self.protos[idx];
        let mut proto = entry.proto.clone();
        proto.protos = entry.children.iter().map(|&c| self.proto_tree(c)).collect();
        proto
    }

    // ---- Calling ----

    /// Call a function from the host. Uncaught errors carry a traceback.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn call_value(&mut self, func: Value, args: &[Value]) -> Result<Vec<Value>, LuaError> {
        dispatch::call_function(self, func, args)
    }

    /// Compile and run a chunk.
    pub fn do_string(&mut self, source: &str, chunk_name: &str) -> Result<Vec<Value>, LuaError> {
        let f = self.load(source.as_bytes(), chunk_name)?;
        self.call_value(f, &[])
    }

    // ---- Host functions ----

    /// Register a host function and return its id.
    pub fn register_callback<F>(&mut self, name: &str, f: F) -> CallbackId
    where
        F: Fn(&mut ExecutionContext<'_>, Vec<Value>) -> Result<CallbackResult, LuaError> + 'static,
    {
        let id = CallbackId(self.callbacks.len() as u32);
        let func: Rc<CallbackFn> = Rc::new(f);
        self.callbacks.push(Callback {
            name: name.to_string(),
            func,
        });
        id
    }

    /// Create a function value for a registered callback, with bound values.
    pub fn create_native(&mut self, callback: CallbackId, name: &str, upvalues: Vec<Value>) -> Value {
        Value::Native(self.gc.alloc_native(callback, name, upvalues))
    }

    /// Register a host function and create a function value for it.
    pub fn create_function<F>(&mut self, name: &str, f: F) -> Value
    where
        F: Fn(&mut ExecutionContext<'_>, Vec<Value>) -> Result<CallbackResult, LuaError> + 'static,
    {
        let id = self.register_callback(name, f);
        self.create_native(id, name, Vec::new())
    }

    /// Bind a host function to a key of `table`.
    pub fn set_function<F>(&mut self, table: GcIdx<Table>, name: &str, f: F) -> Value
    where
        F: Fn(&mut ExecutionContext<'_>, Vec<Value>) -> Result<CallbackResult, LuaError> + 'static,
    {
        let func = self.create_function(name, f);
        let key = self.strings.intern(name.as_bytes());
        self.gc.get_table_mut(table).raw_set_str(key, func);
        func
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        let key = self.strings.intern(name.as_bytes());
        self.gc.get_table_mut(self.globals).raw_set_str(key, value);
    }

    pub fn get_global(&self, name: &str) -> Value {
        match self.strings.find(name.as_bytes()) {
            Some(key) => self.gc.get_table(self.globals).raw_get_str(key),
            None => Value::Nil,
        }
    }

    pub fn new_table(&mut self) -> GcIdx<Table> {
        self.gc.alloc_table(0, 0)
    }

    pub fn intern(&mut self, s: &str) -> Value {
        Value::String(self.strings.intern(s.as_bytes()))
    }

    /// Anchor a value in the registry so the collector keeps it alive.
    /// Returns the key to release it with.
    pub fn pin(&mut self, value: Value) -> i64 {
        let key = self.next_registry_key;
        self.next_registry_key += 1;
        self.gc.get_table_mut(self.registry).raw_seti(key, value);
        key
    }

    pub fn pinned(&self, key: i64) -> Value {
        self.gc.get_table(self.registry).raw_geti(key)
    }

    pub fn unpin(&mut self, key: i64) {
        self.gc.get_table_mut(self.registry).raw_seti(key, Value::Nil);
    }

    // ---- Errors ----

    /// `chunk:line:` of the Lua frame `level` levels up (1 = innermost).
    pub fn where_prefix(&self, level: usize) -> Option<String> {
        if level == 0 || level > self.call_stack.len() {
            return None;
        }
        let ci = &self.call_stack[self.call_stack.len() - level];
        let proto = &self.protos[ci.proto_idx].proto;
        Some(format!("{}:{}:", proto.source, proto.get_line(ci.current_pc())))
    }

    /// A runtime error decorated with the innermost Lua frame's location.
    pub fn runtime_error(&mut self, msg: impl AsRef<str>) -> LuaError {
        let msg = msg.as_ref();
        let text = match self.where_prefix(1) {
            Some(prefix) => format!("{prefix} {msg}"),
            None => msg.to_string(),
        };
        LuaError::runtime(text, &mut self.strings)
    }

    /// Type name for messages, honouring a string `__name` in the metatable.
    pub fn obj_type_name(&self, v: Value) -> String {
        if let Some(mt) = metamethod::get_metatable(v, &self.gc, None) {
            if let Value::String(id) = self.gc.get_table(mt).raw_get_str(self.mm_names.name) {
                return self.strings.get_str(id).into_owned();
            }
        }
        v.type_name().to_string()
    }

    /// `stack traceback:` listing of the running thread's Lua frames.
    pub fn traceback(&self) -> String {
        let mut out = String::from("stack traceback:");
        for ci in self.call_stack.iter().rev() {
            let proto = &self.protos[ci.proto_idx].proto;
            out.push_str(&format!(
                "\n\t{}:{}: in {}",
                proto.source,
                proto.get_line(ci.current_pc()),
                proto.name
            ));
            if ci.is_tail_call {
                out.push_str("\n\t(...tail calls...)");
            }
        }
        out
    }

    // ---- Conversions ----

    /// `tostring` semantics, including `__tostring` and `__name`.
    pub fn tostring(&mut self, v: Value) -> Result<StringId, LuaError> {
        if let Some(mm) = metamethod::get_metamethod(v, self.mm_names.tostring, &self.gc, None) {
            let result = dispatch::call_function(self, mm, &[v])?;
            return match result.first().copied().unwrap_or_default() {
                Value::String(id) => Ok(id),
                n @ (Value::Integer(_) | Value::Float(_)) => {
                    let text = number::number_to_string(n).unwrap_or_default();
                    Ok(self.strings.intern(text.as_bytes()))
                }
                _ => Err(self.runtime_error("'__tostring' must return a string")),
            };
        }
        let text = match v {
            Value::String(id) => return Ok(id),
            Value::Nil => "nil".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Integer(_) | Value::Float(_) => number::number_to_string(v).unwrap_or_default(),
            _ => {
                let (tag, idx) = v.identity().unwrap_or(('?', 0));
                let addr = ((tag as u64) << 32) | u64::from(idx);
                format!("{}: 0x{addr:014x}", self.obj_type_name(v))
            }
        };
        Ok(self.strings.intern(text.as_bytes()))
    }

    /// Display form of a value without metamethods (for hosts and tests).
    pub fn display_value(&self, v: Value) -> String {
        match v {
            Value::String(id) => self.strings.get_str(id).into_owned(),
            Value::Nil => "nil".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Integer(_) | Value::Float(_) => number::number_to_string(v).unwrap_or_default(),
            other => format!("{}: {other:?}", other.type_name()),
        }
    }

    // ---- Upvalues ----

    pub fn get_upval_value(&self, uv: GcIdx<UpVal>) -> Value {
        match self.gc.get_upval(uv).location {
            UpValLocation::Open { thread, slot } => {
                if thread == self.current {
                    self.stack.get(slot).copied().unwrap_or_default()
                } else {
                    self.threads[thread.0 as usize]
                        .stack
                        .get(slot)
                        .copied()
                        .unwrap_or_default()
                }
            }
            UpValLocation::Closed(v) => v,
        }
    }

    pub fn set_upval_value(&mut self, uv: GcIdx<UpVal>, value: Value) {
        match self.gc.get_upval(uv).location {
            UpValLocation::Open { thread, slot } => {
                let stack = if thread == self.current {
                    &mut self.stack
                } else {
                    &mut self.threads[thread.0 as usize].stack
                };
                if let Some(cell) = stack.get_mut(slot) {
                    *cell = value;
                }
            }
            UpValLocation::Closed(_) => {
                self.gc.get_upval_mut(uv).location = UpValLocation::Closed(value);
            }
        }
    }

    /// The open upvalue for `slot`, created on first capture so every
    /// closure capturing the variable shares one cell.
    pub fn find_or_create_upval(&mut self, slot: usize) -> GcIdx<UpVal> {
        match self.open_upvals.binary_search_by_key(&slot, |&(s, _)| s) {
            Ok(pos) => self.open_upvals[pos].1,
            Err(pos) => {
                let uv = self.gc.alloc_upval(UpValLocation::Open {
                    thread: self.current,
                    slot,
                });
                self.open_upvals.insert(pos, (slot, uv));
                uv
            }
        }
    }

    /// Close every open upvalue at or above `level`.
    pub fn close_upvalues(&mut self, level: usize) {
        let split = self.open_upvals.partition_point(|&(s, _)| s < level);
        for (slot, uv) in self.open_upvals.drain(split..) {
            let v = self.stack.get(slot).copied().unwrap_or_default();
            self.gc.get_upval_mut(uv).location = UpValLocation::Closed(v);
        }
    }

    // ---- Coroutines ----

    /// Create a suspended coroutine running `func`.
    pub fn create_thread(&mut self, func: Value) -> ThreadId {
        let thread = LuaThread {
            entry: Some(func),
            ..LuaThread::default()
        };
        match self.free_threads.pop() {
            Some(id) => {
                self.threads[id as usize] = thread;
                ThreadId(id)
            }
            None => {
                self.threads.push(thread);
                ThreadId(self.threads.len() as u32 - 1)
            }
        }
    }

    pub fn thread_status(&self, tid: ThreadId) -> CoroutineStatus {
        if tid == self.current {
            return CoroutineStatus::Running;
        }
        match self.threads.get(tid.0 as usize) {
            Some(t) if !t.free => t.status,
            _ => CoroutineStatus::Dead,
        }
    }

    /// True when the running code may yield.
    pub fn is_yieldable(&self) -> bool {
        self.current != ThreadId::MAIN && self.native_depth == self.yield_depth
    }

    pub(crate) fn yield_error(&mut self) -> LuaError {
        if self.current == ThreadId::MAIN {
            self.runtime_error("attempt to yield from outside a coroutine")
        } else {
            self.runtime_error("attempt to yield across a C-call boundary")
        }
    }

    /// Park the running thread's state in its slot and install `tid`'s.
    fn switch_to(&mut self, tid: ThreadId) {
        let cur = self.current.0 as usize;
        let pending = self.pending_yield.take();
        let slot = &mut self.threads[cur];
        std::mem::swap(&mut self.stack, &mut slot.stack);
        std::mem::swap(&mut self.call_stack, &mut slot.call_stack);
        std::mem::swap(&mut self.open_upvals, &mut slot.open_upvals);
        if pending.is_some() {
            slot.pending = pending;
        }

        let next = &mut self.threads[tid.0 as usize];
        std::mem::swap(&mut self.stack, &mut next.stack);
        std::mem::swap(&mut self.call_stack, &mut next.call_stack);
        std::mem::swap(&mut self.open_upvals, &mut next.open_upvals);
        self.current = tid;
    }

    /// Resume a suspended coroutine, running it until it yields, returns
    /// or fails.
    #[tracing::instrument(level = "trace", skip(self, args), fields(thread = tid.0))]
    pub fn resume(&mut self, tid: ThreadId, args: Vec<Value>) -> Result<ResumeOutcome, LuaError> {
        match self.threads.get(tid.0 as usize) {
            Some(t) if !t.free && tid != self.current => match t.status {
                CoroutineStatus::Suspended => {}
                CoroutineStatus::Dead => {
                    return Err(LuaError::runtime(
                        "cannot resume dead coroutine",
                        &mut self.strings,
                    ))
                }
                _ => {
                    return Err(LuaError::runtime(
                        "cannot resume non-suspended coroutine",
                        &mut self.strings,
                    ))
                }
            },
            Some(_) if tid == self.current => {
                return Err(LuaError::runtime(
                    "cannot resume non-suspended coroutine",
                    &mut self.strings,
                ))
            }
            _ => return Err(LuaError::runtime("cannot resume dead coroutine", &mut self.strings)),
        }
        if self.native_depth >= self.options.max_native_depth {
            return Err(self.runtime_error("C stack overflow"));
        }

        let prev = self.current;
        self.threads[prev.0 as usize].status = CoroutineStatus::Normal;
        self.switch_to(tid);
        self.threads[tid.0 as usize].status = CoroutineStatus::Running;
        self.resume_chain.push(prev);
        tracing::debug!(from = prev.0, to = tid.0, "coroutine resumed");

        self.native_depth += 1;
        let saved_yield_depth = std::mem::replace(&mut self.yield_depth, self.native_depth);
        // The resuming callback holds nothing the collector cannot see.
        let released = self.gc_pause.min(1);
        self.gc_pause -= released;

        let result = self.run_coroutine(tid, args);

        self.gc_pause += released;
        self.yield_depth = saved_yield_depth;
        self.native_depth -= 1;

        let outcome = match result {
            Ok(Exit::Yield(values)) => {
                self.threads[tid.0 as usize].status = CoroutineStatus::Suspended;
                Ok(ResumeOutcome::Yielded(values))
            }
            Ok(Exit::Return(values)) => {
                self.threads[tid.0 as usize].status = CoroutineStatus::Dead;
                Ok(ResumeOutcome::Returned(values))
            }
            Err(err) => {
                self.threads[tid.0 as usize].status = CoroutineStatus::Dead;
                Err(dispatch::unwind_with_error(self, 0, 0, err))
            }
        };
        if !matches!(outcome, Ok(ResumeOutcome::Yielded(_))) {
            self.stack.clear();
            self.call_stack.clear();
            self.open_upvals.clear();
        }

        self.resume_chain.pop();
        self.switch_to(prev);
        self.threads[prev.0 as usize].status = CoroutineStatus::Running;
        tracing::debug!(thread = tid.0, status = self.threads[tid.0 as usize].status.name(), "coroutine left");
        outcome
    }

    fn run_coroutine(&mut self, tid: ThreadId, args: Vec<Value>) -> Result<Exit, LuaError> {
        let thread = &mut self.threads[tid.0 as usize];
        if let Some(entry) = thread.entry.take() {
            self.stack.push(entry);
            let nargs = args.len();
            self.stack.extend(args);
            return dispatch::start_call(self, 0, nargs, 0);
        }
        let pending = thread.pending.take().ok_or_else(|| {
            LuaError::Internal("suspended coroutine has no pending call".into())
        })?;
        let values = dispatch::wrap_success(&pending.protections, args);
        if self.call_stack.is_empty() {
            self.stack.truncate(pending.func_pos);
            return Ok(Exit::Return(values));
        }
        dispatch::deliver(self, pending.func_pos, pending.num_results, values);
        dispatch::execute_from(self, 0)
    }

    /// Close a suspended or dead coroutine, running its pending `__close`
    /// handlers.
    pub fn close_thread(&mut self, tid: ThreadId) -> Result<(), LuaError> {
        match self.thread_status(tid) {
            CoroutineStatus::Running => {
                return Err(self.runtime_error("cannot close a running coroutine"))
            }
            CoroutineStatus::Normal => {
                return Err(self.runtime_error("cannot close a normal coroutine"))
            }
            CoroutineStatus::Dead => return Ok(()),
            CoroutineStatus::Suspended => {}
        }
        let prev = self.current;
        self.switch_to(tid);
        self.pending_yield = None;
        self.threads[tid.0 as usize].pending = None;
        self.threads[tid.0 as usize].entry = None;
        let failure = dispatch::close_frames(self, 0, None);
        self.close_upvalues(0);
        self.stack.clear();
        self.call_stack.clear();
        self.switch_to(prev);
        self.threads[tid.0 as usize].status = CoroutineStatus::Dead;
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    // ---- Debugger ----

    pub fn attach_debugger(&mut self, service: DebugService) {
        self.debug = Some(service);
    }

    pub fn detach_debugger(&mut self) -> Option<DebugService> {
        self.debug.take()
    }

    /// Location of the instruction the innermost Lua frame is executing.
    pub fn current_location(&self) -> Option<SourceLocation> {
        self.call_stack.last().map(|ci| self.frame_location(ci))
    }

    /// Every Lua frame of the running thread, innermost first.
    pub fn call_stack_snapshot(&self) -> Vec<FrameInfo> {
        self.call_stack
            .iter()
            .rev()
            .map(|ci| FrameInfo {
                function: self.protos[ci.proto_idx].proto.name.clone(),
                location: self.frame_location(ci),
            })
            .collect()
    }

    fn frame_location(&self, ci: &CallInfo) -> SourceLocation {
        let proto = &self.protos[ci.proto_idx].proto;
        let pc = ci.current_pc();
        SourceLocation {
            chunk: proto.source.clone(),
            line: proto.get_line(pc),
            pc,
        }
    }

    // ---- Garbage collection ----

    /// Run a full mark-and-sweep cycle. Returns the number of objects freed.
    pub fn collect_garbage(&mut self) -> usize {
        let mut traced = vec![false; self.threads.len()];
        let mut pending: Vec<ThreadId> = vec![ThreadId::MAIN, self.current];
        pending.extend(self.resume_chain.iter().copied());

        self.gc.mark_value(Value::Table(self.globals));
        self.gc.mark_value(Value::Table(self.registry));
        if let Some(mt) = self.string_metatable {
            self.gc.mark_value(Value::Table(mt));
        }
        for entry in &self.protos {
            let strings = &mut self.strings;
            entry.proto.for_each_string(&mut |id| strings.mark(id));
        }
        if let Some(p) = &self.pending_yield {
            mark_protections(&mut self.gc, &p.protections);
        }

        loop {
            while let Some(tid) = pending.pop() {
                let i = tid.0 as usize;
                if i >= traced.len() || traced[i] {
                    continue;
                }
                traced[i] = true;
                if tid == self.current {
                    mark_thread(&mut self.gc, &self.stack, &self.call_stack, &self.open_upvals);
                }
                let t = &self.threads[i];
                mark_thread(&mut self.gc, &t.stack, &t.call_stack, &t.open_upvals);
                if let Some(entry) = t.entry {
                    self.gc.mark_value(entry);
                }
                if let Some(p) = &t.pending {
                    mark_protections(&mut self.gc, &p.protections);
                }
            }
            let reached = self.gc.propagate(&mut self.strings);
            pending.extend(reached.into_iter().filter(|t| !traced.get(t.0 as usize).copied().unwrap_or(true)));
            if pending.is_empty() {
                break;
            }
        }

        let stats = self.gc.sweep(&mut self.strings);
        let mut freed_threads = 0;
        for (i, was_traced) in traced.iter().enumerate() {
            let t = &mut self.threads[i];
            if !was_traced && !t.free {
                *t = LuaThread {
                    free: true,
                    status: CoroutineStatus::Dead,
                    ..LuaThread::default()
                };
                self.free_threads.push(i as u32);
                freed_threads += 1;
            }
        }

        let live = self.gc.live_objects() + self.strings.len();
        self.gc_threshold = self.options.gc_step_threshold.max(live);
        tracing::debug!(
            freed = stats.total(),
            threads = freed_threads,
            live,
            "garbage collected"
        );
        stats.total() + freed_threads
    }

    /// Kilobytes in use, estimated from live object counts.
    pub fn memory_kb(&self) -> f64 {
        let objects = self.gc.live_objects() as f64 * 64.0;
        let strings = self.strings.len() as f64 * 32.0;
        let stack = (self.stack.len() * std::mem::size_of::<Value>()) as f64;
        (objects + strings + stack) / 1024.0
    }
}

fn mark_thread(
    gc: &mut GcHeap,
    stack: &[Value],
    frames: &[CallInfo],
    open_upvals: &[(usize, GcIdx<UpVal>)],
) {
    for &v in stack {
        gc.mark_value(v);
    }
    for ci in frames {
        gc.mark_value(Value::Function(ci.closure));
        mark_protections(gc, &ci.protections);
    }
    for &(_, uv) in open_upvals {
        gc.mark_upval(uv);
    }
}

fn mark_protections(gc: &mut GcHeap, protections: &[Protection]) {
    for p in protections {
        if let Protection::Xpcall { handler } = p {
            gc.mark_value(*handler);
        }
    }
}
