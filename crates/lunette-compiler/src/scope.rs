//! Build-time scope tracking: locals, upvalue capture chains, labels and gotos.
//!
//! The resolver keeps one frame per function being parsed. Each frame owns a
//! stack of lexical blocks. A local's stack slot is its position in the
//! frame's active-locals stack, so hidden loop state takes slots like any
//! other local.

use crate::ast::{
    GotoId, GotoInfo, LabelId, LabelInfo, LocalAttrib, LocalId, LocalVarInfo, RuntimeScopeBlock,
    SymbolRef,
};
use crate::proto::UpvalDesc;
use lunette_core::string::{StringId, StringInterner};
use thiserror::Error;

/// Maximum number of active locals per function.
pub const MAX_LOCALS: usize = 200;
/// Maximum number of upvalues per function.
pub const MAX_UPVALUES: usize = 255;

/// Name given to hidden loop-control locals. Contains a space, so scripts
/// can never refer to it.
pub const FOR_STATE: &str = "(for state)";

#[derive(Clone, Debug, PartialEq, Error)]
pub enum ScopeError {
    /// A user-facing semantic error (bad goto, stray break, ...).
    #[error("{0}")]
    Semantic(String),
    #[error("{0}")]
    Internal(String),
}

type ScopeResult<T> = Result<T, ScopeError>;

#[derive(Debug)]
struct PendingGoto {
    id: GotoId,
    name: StringId,
    line: u32,
    /// Locals active at the goto, clamped as the goto leaves blocks.
    active_count: usize,
}

#[derive(Debug)]
struct BlockLabel {
    id: LabelId,
    name: StringId,
    active: Vec<LocalId>,
}

#[derive(Debug)]
struct BlockBuilder {
    entry_active: usize,
    is_loop: bool,
    pending: Vec<PendingGoto>,
    labels: Vec<BlockLabel>,
    /// Labels not yet followed by a non-void statement.
    trailing_labels: Vec<LabelId>,
}

#[derive(Debug, Default)]
struct FrameBuilder {
    locals: Vec<LocalVarInfo>,
    active: Vec<LocalId>,
    upvalues: Vec<UpvalDesc>,
    blocks: Vec<BlockBuilder>,
    gotos: Vec<GotoInfo>,
    labels: Vec<LabelInfo>,
    max_slots: usize,
    is_vararg: bool,
}

/// Everything the resolver learned about a function once it is closed.
#[derive(Debug)]
pub struct FrameResult {
    pub locals: Vec<LocalVarInfo>,
    pub upvalues: Vec<UpvalDesc>,
    pub gotos: Vec<GotoInfo>,
    pub labels: Vec<LabelInfo>,
    pub max_slots: u16,
}

pub struct ScopeResolver {
    frames: Vec<FrameBuilder>,
    env_name: StringId,
    /// No `_ENV` upvalue: free names resolve against the VM's globals.
    dynamic: bool,
}

impl ScopeResolver {
    /// Create a resolver whose root function has `_ENV` as upvalue 0.
    pub fn new(strings: &mut StringInterner) -> Self {
        let env_name = strings.intern(b"_ENV");
        let root = FrameBuilder {
            upvalues: vec![UpvalDesc {
                name: env_name,
                in_stack: true,
                index: 0,
            }],
            is_vararg: true,
            ..FrameBuilder::default()
        };
        ScopeResolver {
            frames: vec![root],
            env_name,
            dynamic: false,
        }
    }

    /// Create a resolver for a dynamic expression: no `_ENV` upvalue.
    pub fn new_dynamic(strings: &mut StringInterner) -> Self {
        let env_name = strings.intern(b"_ENV");
        ScopeResolver {
            frames: vec![FrameBuilder::default()],
            env_name,
            dynamic: true,
        }
    }

    fn frame(&self) -> &FrameBuilder {
        self.frames.last().expect("resolver has no function frame")
    }

    fn frame_mut(&mut self) -> &mut FrameBuilder {
        self.frames.last_mut().expect("resolver has no function frame")
    }

    // ---- Functions and blocks ----

    pub fn enter_function(&mut self, is_vararg: bool) {
        self.frames.push(FrameBuilder {
            is_vararg,
            ..FrameBuilder::default()
        });
    }

    /// Close the innermost function. Its root block must already be left.
    pub fn leave_function(&mut self) -> ScopeResult<FrameResult> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| ScopeError::Internal("function frame underflow".into()))?;
        if !frame.blocks.is_empty() {
            return Err(ScopeError::Internal(format!(
                "{} block(s) still open at end of function",
                frame.blocks.len()
            )));
        }
        Ok(FrameResult {
            locals: frame.locals,
            upvalues: frame.upvalues,
            gotos: frame.gotos,
            labels: frame.labels,
            max_slots: frame.max_slots as u16,
        })
    }

    pub fn is_vararg(&self) -> bool {
        self.frame().is_vararg
    }

    pub fn enter_block(&mut self, is_loop: bool) {
        let entry_active = self.frame().active.len();
        self.frame_mut().blocks.push(BlockBuilder {
            entry_active,
            is_loop,
            pending: Vec::new(),
            labels: Vec::new(),
            trailing_labels: Vec::new(),
        });
    }

    /// Leave the innermost block: settle its gotos, deactivate its locals
    /// and describe the slot range it owned.
    pub fn leave_block(&mut self, strings: &StringInterner) -> ScopeResult<RuntimeScopeBlock> {
        let frame = self.frame_mut();
        let mut block = frame
            .blocks
            .pop()
            .ok_or_else(|| ScopeError::Internal("block stack underflow".into()))?;

        // A label with nothing but void statements after it sits outside
        // the block's locals.
        for id in block.trailing_labels.drain(..) {
            frame.labels[id as usize].active_count = block.entry_active as u16;
        }

        let mut unresolved = Vec::new();
        for goto in block.pending.drain(..) {
            match block.labels.iter().find(|l| l.name == goto.name) {
                Some(label) => {
                    let label_count = frame.labels[label.id as usize].active_count as usize;
                    if label_count > goto.active_count {
                        let local = label.active[goto.active_count];
                        let local_name = strings.get_str(frame.locals[local as usize].name);
                        return Err(ScopeError::Semantic(format!(
                            "<goto {}> at line {} jumps into the scope of local '{}'",
                            strings.get_str(goto.name),
                            goto.line,
                            local_name
                        )));
                    }
                    frame.gotos[goto.id as usize].target = Some(label.id);
                }
                None => unresolved.push(goto),
            }
        }

        if !unresolved.is_empty() {
            match frame.blocks.last_mut() {
                Some(parent) => {
                    for mut goto in unresolved {
                        goto.active_count = goto.active_count.min(block.entry_active);
                        parent.pending.push(goto);
                    }
                }
                None => {
                    let goto = &unresolved[0];
                    return Err(ScopeError::Semantic(format!(
                        "no visible label '{}' for <goto> at line {}",
                        strings.get_str(goto.name),
                        goto.line
                    )));
                }
            }
        }

        let mut scope = RuntimeScopeBlock {
            from: block.entry_active as u16,
            ..RuntimeScopeBlock::default()
        };
        if frame.active.len() > block.entry_active {
            scope.to_inclusive = Some((frame.active.len() - 1) as u16);
        }
        for &id in &frame.active[block.entry_active..] {
            let info = &frame.locals[id as usize];
            if info.attrib == LocalAttrib::Close {
                scope.to_be_closed.push(info.slot);
            }
            if info.needs_close() {
                scope.needs_close = true;
            }
        }
        frame.active.truncate(block.entry_active);
        Ok(scope)
    }

    // ---- Locals ----

    /// Declare and activate a local in the innermost block.
    pub fn declare_local(
        &mut self,
        name: StringId,
        attrib: LocalAttrib,
        line: u32,
    ) -> ScopeResult<LocalId> {
        let frame = self.frame_mut();
        if frame.active.len() >= MAX_LOCALS {
            return Err(ScopeError::Semantic(format!(
                "too many local variables (limit is {MAX_LOCALS})"
            )));
        }
        let id = frame.locals.len() as LocalId;
        let slot = frame.active.len() as u16;
        frame.locals.push(LocalVarInfo {
            name,
            slot,
            attrib,
            captured: false,
            line,
        });
        frame.active.push(id);
        frame.max_slots = frame.max_slots.max(frame.active.len());
        Ok(id)
    }

    pub fn local_info(&self, id: LocalId) -> &LocalVarInfo {
        &self.frame().locals[id as usize]
    }

    /// Number of locals active in the innermost function.
    pub fn active_count(&self) -> usize {
        self.frame().active.len()
    }

    /// A to-be-closed local is in scope, so `return f()` cannot be a tail call.
    pub fn has_active_tbc(&self) -> bool {
        let frame = self.frame();
        frame
            .active
            .iter()
            .any(|&id| frame.locals[id as usize].attrib == LocalAttrib::Close)
    }

    // ---- Name lookup ----

    /// Resolve `name`: innermost local, then upvalue (creating the capture
    /// chain through every enclosing function), then global through `_ENV`.
    pub fn find(&mut self, name: StringId) -> ScopeResult<SymbolRef> {
        let top = self.frames.len() - 1;
        if let Some(sym) = self.find_in_frame(top, name)? {
            return Ok(sym);
        }
        if name == self.env_name {
            if self.dynamic {
                return Ok(SymbolRef::DefaultEnv);
            }
            return Err(ScopeError::Internal(
                "'_ENV' resolved as a global variable".into(),
            ));
        }
        let env = self.find(self.env_name)?;
        Ok(SymbolRef::Global {
            name,
            env: Box::new(env),
        })
    }

    fn find_in_frame(&mut self, level: usize, name: StringId) -> ScopeResult<Option<SymbolRef>> {
        let frame = &self.frames[level];
        if let Some(&id) = frame
            .active
            .iter()
            .rev()
            .find(|&&id| frame.locals[id as usize].name == name)
        {
            let slot = frame.locals[id as usize].slot;
            return Ok(Some(SymbolRef::Local { slot, id, name }));
        }
        Ok(self
            .resolve_upvalue(level, name)?
            .map(|index| SymbolRef::Upvalue { index, name }))
    }

    fn resolve_upvalue(&mut self, level: usize, name: StringId) -> ScopeResult<Option<u16>> {
        if let Some(index) = self.frames[level]
            .upvalues
            .iter()
            .position(|u| u.name == name)
        {
            return Ok(Some(index as u16));
        }
        if level == 0 {
            return Ok(None);
        }

        let parent = &mut self.frames[level - 1];
        let found = parent
            .active
            .iter()
            .rev()
            .copied()
            .find(|&id| parent.locals[id as usize].name == name);
        let desc = match found {
            Some(id) => {
                let info = &mut parent.locals[id as usize];
                info.captured = true;
                UpvalDesc {
                    name,
                    in_stack: true,
                    index: info.slot,
                }
            }
            None => match self.resolve_upvalue(level - 1, name)? {
                Some(index) => UpvalDesc {
                    name,
                    in_stack: false,
                    index,
                },
                None => return Ok(None),
            },
        };

        let frame = &mut self.frames[level];
        if frame.upvalues.len() >= MAX_UPVALUES {
            return Err(ScopeError::Semantic(format!(
                "too many upvalues (limit is {MAX_UPVALUES})"
            )));
        }
        frame.upvalues.push(desc);
        Ok(Some((frame.upvalues.len() - 1) as u16))
    }

    /// Attribute of the local a symbol ultimately refers to, following
    /// upvalue chains back to the declaring function.
    pub fn symbol_attrib(&self, sym: &SymbolRef) -> LocalAttrib {
        match sym {
            SymbolRef::Local { id, .. } => self.frame().locals[*id as usize].attrib,
            SymbolRef::Upvalue { index, .. } => self.upvalue_attrib(self.frames.len() - 1, *index),
            SymbolRef::Global { .. } | SymbolRef::DefaultEnv => LocalAttrib::None,
        }
    }

    fn upvalue_attrib(&self, level: usize, index: u16) -> LocalAttrib {
        let Some(desc) = self.frames[level].upvalues.get(index as usize) else {
            return LocalAttrib::None;
        };
        if level == 0 {
            return LocalAttrib::None;
        }
        let parent = &self.frames[level - 1];
        if desc.in_stack {
            parent
                .active
                .get(desc.index as usize)
                .map(|&id| parent.locals[id as usize].attrib)
                .unwrap_or_default()
        } else {
            self.upvalue_attrib(level - 1, desc.index)
        }
    }

    // ---- Control flow ----

    pub fn in_loop(&self) -> bool {
        self.frame().blocks.iter().any(|b| b.is_loop)
    }

    /// Locals left by a `break` from the innermost loop of this function.
    pub fn break_exits(&self, line: u32) -> ScopeResult<Vec<LocalId>> {
        let frame = self.frame();
        let block = frame
            .blocks
            .iter()
            .rev()
            .find(|b| b.is_loop)
            .ok_or_else(|| {
                ScopeError::Semantic(format!("<break> at line {line} not inside a loop"))
            })?;
        Ok(frame.active[block.entry_active..].to_vec())
    }

    /// Register a goto. A label already visible resolves it immediately;
    /// otherwise it waits for a label later in an enclosing block.
    pub fn add_goto(&mut self, name: StringId, line: u32) -> ScopeResult<GotoId> {
        let frame = self.frame_mut();
        let id = frame.gotos.len() as GotoId;
        let target = frame
            .blocks
            .iter()
            .rev()
            .flat_map(|b| b.labels.iter())
            .find(|l| l.name == name)
            .map(|l| l.id);
        frame.gotos.push(GotoInfo {
            name,
            line,
            active: frame.active.clone(),
            target,
        });
        if target.is_none() {
            let active_count = frame.active.len();
            let block = frame
                .blocks
                .last_mut()
                .ok_or_else(|| ScopeError::Internal("goto outside any block".into()))?;
            block.pending.push(PendingGoto {
                id,
                name,
                line,
                active_count,
            });
        }
        Ok(id)
    }

    pub fn add_label(
        &mut self,
        name: StringId,
        line: u32,
        strings: &StringInterner,
    ) -> ScopeResult<LabelId> {
        let frame = self.frame_mut();
        if let Some(prev) = frame
            .blocks
            .iter()
            .flat_map(|b| b.labels.iter())
            .find(|l| l.name == name)
        {
            return Err(ScopeError::Semantic(format!(
                "label '{}' already defined on line {}",
                strings.get_str(name),
                frame.labels[prev.id as usize].line
            )));
        }
        let id = frame.labels.len() as LabelId;
        frame.labels.push(LabelInfo {
            name,
            line,
            active_count: frame.active.len() as u16,
        });
        let active = frame.active.clone();
        let block = frame
            .blocks
            .last_mut()
            .ok_or_else(|| ScopeError::Internal("label outside any block".into()))?;
        block.labels.push(BlockLabel { id, name, active });
        block.trailing_labels.push(id);
        Ok(id)
    }

    /// A statement other than a label or `;` was parsed in the innermost block.
    pub fn mark_non_void_statement(&mut self) {
        if let Some(block) = self.frame_mut().blocks.last_mut() {
            block.trailing_labels.clear();
        }
    }
}
