//! Debugger attachment.
//!
//! A [`Debugger`] is driven from the dispatch loop whenever execution
//! reaches a new source line. It pauses on breakpoints (keyed by chunk name
//! and line) and while stepping, and answers each pause with the next
//! [`DebuggerAction`].

use crate::error::LuaError;
use crate::vm::Vm;
use std::collections::HashSet;

/// Host-side debugger front end.
pub trait Debugger {
    /// Called with the VM stopped before the first instruction of a line.
    fn on_pause(&mut self, vm: &Vm, pause: &PauseInfo) -> DebuggerAction;

    /// Whether uncaught runtime errors should be reported to `on_error`.
    fn pause_on_error(&self) -> bool {
        false
    }

    /// Called with the failing frames still in place.
    fn on_error(&mut self, _vm: &Vm, _error: &LuaError) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebuggerAction {
    /// Run until the next breakpoint.
    Run,
    /// Stop at the next line, entering calls.
    StepIn,
    /// Stop at the next line of this function or a caller.
    StepOver,
    /// Stop once this function has returned.
    StepOut,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PauseReason {
    Breakpoint,
    Step,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceLocation {
    /// Display chunk name (`=name` and `@file` prefixes stripped).
    pub chunk: String,
    pub line: u32,
    pub pc: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameInfo {
    pub function: String,
    pub location: SourceLocation,
}

#[derive(Clone, Debug)]
pub struct PauseInfo {
    pub reason: PauseReason,
    pub location: SourceLocation,
    /// Innermost frame first.
    pub call_stack: Vec<FrameInfo>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StepMode {
    Run,
    StepIn,
    StepOver { depth: usize },
    StepOut { depth: usize },
}

/// Last position the hook saw in one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Cursor {
    proto: usize,
    line: u32,
    pc: usize,
}

/// A debugger attached to a VM, with its breakpoints and stepping state.
pub struct DebugService {
    debugger: Box<dyn Debugger>,
    breakpoints: HashSet<(String, u32)>,
    mode: StepMode,
    /// One entry per active frame, outermost first.
    frames: Vec<Option<Cursor>>,
}

impl DebugService {
    pub fn new(debugger: Box<dyn Debugger>) -> Self {
        DebugService {
            debugger,
            breakpoints: HashSet::new(),
            mode: StepMode::Run,
            frames: Vec::new(),
        }
    }

    pub fn set_breakpoint(&mut self, chunk: &str, line: u32) {
        self.breakpoints.insert((chunk.to_string(), line));
    }

    /// Returns whether a breakpoint was removed.
    pub fn clear_breakpoint(&mut self, chunk: &str, line: u32) -> bool {
        self.breakpoints.remove(&(chunk.to_string(), line))
    }

    /// Returns whether the breakpoint is now set.
    pub fn toggle_breakpoint(&mut self, chunk: &str, line: u32) -> bool {
        if self.clear_breakpoint(chunk, line) {
            false
        } else {
            self.set_breakpoint(chunk, line);
            true
        }
    }

    pub fn has_breakpoint(&self, chunk: &str, line: u32) -> bool {
        self.breakpoints.contains(&(chunk.to_string(), line))
    }

    pub fn clear_all_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    /// Pause at the next line executed.
    pub fn pause_next(&mut self) {
        self.mode = StepMode::StepIn;
    }

    pub(crate) fn on_error(&mut self, vm: &Vm, err: &LuaError) {
        if self.debugger.pause_on_error() {
            self.debugger.on_error(vm, err);
        }
    }

    /// Hook run before every instruction while a debugger is attached.
    pub(crate) fn on_instruction(&mut self, vm: &Vm) {
        let Some(ci) = vm.call_stack.last() else {
            return;
        };
        let proto = &vm.protos[ci.proto_idx].proto;
        let depth = vm.call_stack.len();
        let here = Cursor {
            proto: ci.proto_idx,
            line: proto.get_line(ci.pc),
            pc: ci.pc,
        };
        // Returning into a caller mid-line does not start a new line.
        self.frames.resize(depth, None);
        let new_line = match self.frames[depth - 1] {
            None => true,
            Some(prev) => prev.proto != here.proto || prev.line != here.line || here.pc <= prev.pc,
        };
        self.frames[depth - 1] = Some(here);
        if !new_line {
            return;
        }

        let at_breakpoint = !self.breakpoints.is_empty()
            && self.breakpoints.contains(&(proto.source.clone(), here.line));
        let step_done = match self.mode {
            StepMode::Run => false,
            StepMode::StepIn => true,
            StepMode::StepOver { depth: d } => depth <= d,
            StepMode::StepOut { depth: d } => depth < d,
        };
        if !at_breakpoint && !step_done {
            return;
        }

        let pause = PauseInfo {
            reason: if at_breakpoint {
                PauseReason::Breakpoint
            } else {
                PauseReason::Step
            },
            location: SourceLocation {
                chunk: proto.source.clone(),
                line: here.line,
                pc: here.pc,
            },
            call_stack: vm.call_stack_snapshot(),
        };
        tracing::debug!(chunk = %pause.location.chunk, line = here.line, reason = ?pause.reason, "debugger paused");
        self.mode = match self.debugger.on_pause(vm, &pause) {
            DebuggerAction::Run => StepMode::Run,
            DebuggerAction::StepIn => StepMode::StepIn,
            DebuggerAction::StepOver => StepMode::StepOver { depth },
            DebuggerAction::StepOut => StepMode::StepOut { depth },
        };
    }
}
