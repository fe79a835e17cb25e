//! Call frame information for the VM.

use lunette_core::gc::{GcIdx, LuaClosure};
use lunette_core::value::Value;

/// How a protected call handles an error that reaches its frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Protection {
    /// `pcall`: results become `(false, err)`.
    Pcall,
    /// `xpcall`: the handler sees the error before the stack unwinds.
    Xpcall { handler: Value },
}

/// Where the results of a suspended call go once the thread resumes.
#[derive(Clone, Debug)]
pub struct PendingCall {
    pub func_pos: usize,
    pub num_results: i32,
    pub protections: Vec<Protection>,
}

/// A Lua call frame. Host functions run without a frame of their own.
#[derive(Clone, Debug)]
pub struct CallInfo {
    pub closure: GcIdx<LuaClosure>,
    /// Index into `vm.protos`.
    pub proto_idx: usize,
    /// Next instruction to execute.
    pub pc: usize,
    /// Stack position of the function value; results are written from here.
    pub func_pos: usize,
    /// First local slot.
    pub base: usize,
    /// Extra arguments of a vararg function, stored below `base`.
    pub varargs_start: usize,
    pub num_varargs: usize,
    /// Expected number of results (-1 = open).
    pub num_results: i32,
    /// Absolute stack slots of live to-be-closed variables, in declaration
    /// order.
    pub tbc_slots: Vec<usize>,
    /// Protected-call layers wrapped around this frame, outermost first.
    pub protections: Vec<Protection>,
    /// Entered through a tail call; tracebacks show the elided frames.
    pub is_tail_call: bool,
}

impl CallInfo {
    pub fn new(closure: GcIdx<LuaClosure>, proto_idx: usize, func_pos: usize, base: usize) -> Self {
        CallInfo {
            closure,
            proto_idx,
            pc: 0,
            func_pos,
            base,
            varargs_start: base,
            num_varargs: 0,
            num_results: -1,
            tbc_slots: Vec::new(),
            protections: Vec::new(),
            is_tail_call: false,
        }
    }

    #[inline]
    pub fn is_protected(&self) -> bool {
        !self.protections.is_empty()
    }

    /// Index of the instruction currently executing (the one before `pc`).
    pub fn current_pc(&self) -> usize {
        self.pc.saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_frame_defaults() {
        let ci = CallInfo::new(GcIdx::new(0), 3, 10, 11);
        assert_eq!(ci.pc, 0);
        assert_eq!(ci.num_results, -1);
        assert_eq!(ci.varargs_start, 11);
        assert!(!ci.is_protected());
        assert_eq!(ci.current_pc(), 0);
    }
}
