//! Lowers a resolved syntax tree to stack-machine bytecode.
//!
//! Each function body gets its own [`Emitter`]. Expression lowering leaves
//! exactly one value on the stack (or a counted run of values when asked for
//! an open result); statements are stack-neutral.

mod expr;
mod stat;

use crate::ast::{FunctionDef, GotoId, RuntimeScopeBlock};
use crate::error::CompileError;
use crate::opcode::{Instruction, OpCode};
use crate::proto::Proto;

/// Break-target tracking. A function body starts with a `Boundary` so a
/// `break` can never be lowered against a loop of an enclosing function.
enum LoopFrame {
    Loop { breaks: Vec<usize> },
    Boundary,
}

pub(crate) struct Emitter<'d> {
    def: &'d FunctionDef,
    proto: Proto,
    label_pcs: Vec<Option<usize>>,
    goto_jumps: Vec<(GotoId, usize)>,
    loops: Vec<LoopFrame>,
}

/// Compile one function (and, recursively, its nested functions).
pub(crate) fn emit_function(def: &FunctionDef, source: &str) -> Result<Proto, CompileError> {
    let mut proto = Proto::new(source);
    proto.name = def.name.clone();
    proto.num_params = def.num_params;
    proto.is_vararg = def.is_vararg;
    proto.max_slots = def.max_slots;
    proto.upvalues = def.upvalues.clone();
    proto.line_defined = def.line;
    proto.last_line = def.end_line;

    let mut emitter = Emitter {
        def,
        proto,
        label_pcs: vec![None; def.labels.len()],
        goto_jumps: Vec::new(),
        loops: vec![LoopFrame::Boundary],
    };
    emitter.block(&def.body)?;
    emitter.emit(Instruction::with_num(OpCode::Ret, 0), def.end_line);
    emitter.patch_gotos()?;
    Ok(emitter.proto)
}

impl<'d> Emitter<'d> {
    fn emit(&mut self, inst: Instruction, line: u32) -> usize {
        self.proto.emit(inst, line)
    }

    fn pc(&self) -> usize {
        self.proto.code_len()
    }

    /// Emit a jump-family instruction with an unpatched target.
    fn emit_jump(&mut self, op: OpCode, line: u32) -> usize {
        self.emit(Instruction::with_num(op, -1), line)
    }

    fn patch_to(&mut self, jump_pc: usize, target: usize) {
        self.proto.get_mut(jump_pc).num_val = target as i32;
    }

    fn patch_here(&mut self, jump_pc: usize) {
        let here = self.pc();
        self.patch_to(jump_pc, here);
    }

    fn emit_clean(&mut self, from: u16, to: u16, line: u32) {
        self.emit(
            Instruction::with_nums(OpCode::Clean, i32::from(from), i32::from(to)),
            line,
        );
    }

    /// Close a block's captured and to-be-closed locals on normal exit.
    fn close_scope(&mut self, scope: &RuntimeScopeBlock, line: u32) {
        if let (true, Some(to)) = (scope.needs_close, scope.to_inclusive) {
            self.emit_clean(scope.from, to, line);
        }
    }

    fn patch_gotos(&mut self) -> Result<(), CompileError> {
        for (id, pc) in std::mem::take(&mut self.goto_jumps) {
            let label = self.def.gotos[id as usize].target.ok_or_else(|| {
                CompileError::Internal(format!("goto {id} reached the emitter unresolved"))
            })?;
            let target = self.label_pcs[label as usize].ok_or_else(|| {
                CompileError::Internal(format!("label {label} was never emitted"))
            })?;
            self.patch_to(pc, target);
        }
        Ok(())
    }

    fn enter_loop(&mut self) {
        self.loops.push(LoopFrame::Loop { breaks: Vec::new() });
    }

    /// Pop the innermost loop and point its breaks at the current pc.
    fn leave_loop(&mut self) -> Result<(), CompileError> {
        match self.loops.pop() {
            Some(LoopFrame::Loop { breaks }) => {
                for pc in breaks {
                    self.patch_here(pc);
                }
                Ok(())
            }
            _ => Err(CompileError::Internal("loop stack misaligned".into())),
        }
    }
}
