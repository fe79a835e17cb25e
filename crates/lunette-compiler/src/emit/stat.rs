use super::{Emitter, LoopFrame};
use crate::ast::{Block, Expr, ExprKind, GotoId, LocalAttrib, LocalId, Stat, StatKind, SymbolRef};
use crate::error::CompileError;
use crate::opcode::{open_count, Instruction, OpCode, SymbolKind};
use crate::proto::Constant;

/// Stack values a store target pushes before the right-hand side.
#[derive(Clone, Copy)]
enum Prefix {
    None,
    /// Table only; the key is a constant string.
    Table,
    TableAndKey,
}

impl Prefix {
    fn size(self) -> usize {
        match self {
            Prefix::None => 0,
            Prefix::Table => 1,
            Prefix::TableAndKey => 2,
        }
    }
}

impl<'d> Emitter<'d> {
    pub(super) fn block(&mut self, block: &Block) -> Result<(), CompileError> {
        for stat in &block.stats {
            self.statement(stat)?;
        }
        let line = block.stats.last().map_or(self.def.end_line, |s| s.line);
        self.close_scope(&block.scope, line);
        Ok(())
    }

    fn statement(&mut self, stat: &Stat) -> Result<(), CompileError> {
        let line = stat.line;
        match &stat.kind {
            StatKind::Local { locals, exprs } => self.stat_local(locals, exprs, line),
            StatKind::Assign { targets, exprs } => self.stat_assign(targets, exprs, line),
            StatKind::Call(expr) => match &expr.kind {
                ExprKind::Call(call) => self.emit_call(call, 0, false, expr.line()),
                _ => Err(CompileError::Internal("call statement without a call".into())),
            },
            StatKind::Do(body) => self.block(body),
            StatKind::While { cond, body } => {
                let top = self.pc();
                self.expr(cond)?;
                let exit = self.emit_jump(OpCode::Jf, line);
                self.enter_loop();
                self.block(body)?;
                let back = self.emit_jump(OpCode::Jump, line);
                self.patch_to(back, top);
                self.patch_here(exit);
                self.leave_loop()
            }
            StatKind::Repeat { body, cond } => self.stat_repeat(body, cond, line),
            StatKind::If {
                clauses,
                else_block,
            } => self.stat_if(clauses, else_block.as_ref(), line),
            StatKind::NumericFor {
                base,
                start,
                limit,
                step,
                body,
                ..
            } => self.stat_numeric_for(*base, start, limit, step.as_ref(), body, line),
            StatKind::GenericFor {
                base,
                num_vars,
                exprs,
                body,
                ..
            } => self.stat_generic_for(*base, *num_vars, exprs, body, line),
            StatKind::LocalFunction { local, func } => {
                let slot = self.def.locals[*local as usize].slot;
                self.closure(func, line)?;
                self.store_local(*local, slot, line);
                Ok(())
            }
            StatKind::Return { exprs, tail_call } => self.stat_return(exprs, *tail_call, line),
            StatKind::Break { exits } => self.stat_break(exits, line),
            StatKind::Goto(id) => {
                self.stat_goto(*id, line);
                Ok(())
            }
            StatKind::Label(id) => {
                let pc = self.pc();
                self.label_pcs[*id as usize] = Some(pc);
                Ok(())
            }
        }
    }

    fn store_local(&mut self, local: LocalId, slot: u16, line: u32) {
        let name = self.def.locals[local as usize].name;
        self.emit(
            Instruction::with_num(OpCode::StoreLcl, i32::from(slot)).symbol(SymbolKind::Local, name),
            line,
        );
    }

    /// Push exactly `want` values from an expression list (Lua adjustment).
    pub(super) fn expr_list_adjusted(
        &mut self,
        exprs: &[Expr],
        want: usize,
        line: u32,
    ) -> Result<(), CompileError> {
        let Some((last, init)) = exprs.split_last() else {
            for _ in 0..want {
                self.emit(Instruction::new(OpCode::Literal), line);
            }
            return Ok(());
        };
        for e in init {
            self.expr(e)?;
        }
        let fixed = init.len();
        if last.is_multi() {
            let rest = want.saturating_sub(fixed);
            self.multi(last, rest as i32)?;
            if fixed > want {
                self.emit(Instruction::with_num(OpCode::Pop, (fixed - want) as i32), line);
            }
        } else {
            self.expr(last)?;
            let pushed = fixed + 1;
            if pushed > want {
                self.emit(Instruction::with_num(OpCode::Pop, (pushed - want) as i32), line);
            }
            for _ in pushed..want {
                self.emit(Instruction::new(OpCode::Literal), line);
            }
        }
        Ok(())
    }

    // ---- Declarations and assignment ----

    fn stat_local(&mut self, locals: &[LocalId], exprs: &[Expr], line: u32) -> Result<(), CompileError> {
        self.expr_list_adjusted(exprs, locals.len(), line)?;
        for &id in locals.iter().rev() {
            let slot = self.def.locals[id as usize].slot;
            self.store_local(id, slot, line);
        }
        for &id in locals {
            let info = &self.def.locals[id as usize];
            if info.attrib == LocalAttrib::Close {
                let inst = Instruction::with_num(OpCode::Tbc, i32::from(info.slot))
                    .symbol(SymbolKind::Local, info.name);
                self.emit(inst, line);
            }
        }
        Ok(())
    }

    /// Multiple assignment: push every target's table/key, then the values,
    /// then store right to left and drop the prefixes.
    fn stat_assign(&mut self, targets: &[Expr], exprs: &[Expr], line: u32) -> Result<(), CompileError> {
        let mut prefixes = Vec::with_capacity(targets.len());
        for target in targets {
            prefixes.push(self.store_prefix(target)?);
        }
        self.expr_list_adjusted(exprs, targets.len(), line)?;

        for i in (0..targets.len()).rev() {
            let above: usize = prefixes[i + 1..].iter().map(|p| p.size()).sum();
            let depth = (i + above) as i32;
            self.store_target(&targets[i], depth, line)?;
        }
        let total: usize = prefixes.iter().map(|p| p.size()).sum();
        if total > 0 {
            self.emit(Instruction::with_num(OpCode::Pop, total as i32), line);
        }
        Ok(())
    }

    fn store_prefix(&mut self, target: &Expr) -> Result<Prefix, CompileError> {
        match &target.kind {
            ExprKind::Symbol(SymbolRef::Local { .. } | SymbolRef::Upvalue { .. }) => Ok(Prefix::None),
            ExprKind::Symbol(SymbolRef::Global { env, .. }) => {
                self.load_symbol(env, target.line())?;
                Ok(Prefix::Table)
            }
            ExprKind::Index { obj, key } => {
                self.expr(obj)?;
                if matches!(key.kind, ExprKind::Str(_)) {
                    Ok(Prefix::Table)
                } else {
                    self.expr(key)?;
                    Ok(Prefix::TableAndKey)
                }
            }
            _ => Err(CompileError::Internal("assignment to a non-variable".into())),
        }
    }

    fn store_target(&mut self, target: &Expr, depth: i32, line: u32) -> Result<(), CompileError> {
        let inst = match &target.kind {
            ExprKind::Symbol(SymbolRef::Local { slot, name, .. }) => {
                Instruction::with_num(OpCode::StoreLcl, i32::from(*slot)).symbol(SymbolKind::Local, *name)
            }
            ExprKind::Symbol(SymbolRef::Upvalue { index, name }) => {
                Instruction::with_num(OpCode::StoreUpv, i32::from(*index))
                    .symbol(SymbolKind::Upvalue, *name)
            }
            ExprKind::Symbol(SymbolRef::Global { name, env }) => Instruction {
                num_val: depth,
                value: Constant::String(*name),
                symbol: self.describe_symbol(env),
                ..Instruction::new(OpCode::IndexSetN)
            },
            ExprKind::Index { obj, key } => {
                let mut inst = match key.kind {
                    ExprKind::Str(k) => Instruction {
                        num_val: depth,
                        value: Constant::String(k),
                        ..Instruction::new(OpCode::IndexSetN)
                    },
                    _ => Instruction::with_num(OpCode::IndexSet, depth),
                };
                inst.symbol = self.describe(obj);
                inst
            }
            _ => return Err(CompileError::Internal("assignment to a non-variable".into())),
        };
        self.emit(inst, line);
        Ok(())
    }

    // ---- Control flow ----

    fn stat_if(
        &mut self,
        clauses: &[(Expr, Block)],
        else_block: Option<&Block>,
        line: u32,
    ) -> Result<(), CompileError> {
        let mut ends = Vec::new();
        for (i, (cond, body)) in clauses.iter().enumerate() {
            self.expr(cond)?;
            let next = self.emit_jump(OpCode::Jf, cond.line());
            self.block(body)?;
            if i + 1 < clauses.len() || else_block.is_some() {
                ends.push(self.emit_jump(OpCode::Jump, line));
            }
            self.patch_here(next);
        }
        if let Some(body) = else_block {
            self.block(body)?;
        }
        for pc in ends {
            self.patch_here(pc);
        }
        Ok(())
    }

    fn stat_repeat(&mut self, body: &Block, cond: &Expr, line: u32) -> Result<(), CompileError> {
        let top = self.pc();
        self.enter_loop();
        for stat in &body.stats {
            self.statement(stat)?;
        }
        self.expr(cond)?;
        match (body.scope.needs_close, body.scope.to_inclusive) {
            (true, Some(to)) => {
                let again = self.emit_jump(OpCode::Jf, line);
                self.emit_clean(body.scope.from, to, line);
                let exit = self.emit_jump(OpCode::Jump, line);
                self.patch_here(again);
                self.emit_clean(body.scope.from, to, line);
                let back = self.emit_jump(OpCode::Jump, line);
                self.patch_to(back, top);
                self.patch_here(exit);
            }
            _ => {
                let back = self.emit_jump(OpCode::Jf, line);
                self.patch_to(back, top);
            }
        }
        self.leave_loop()
    }

    fn stat_numeric_for(
        &mut self,
        base: u16,
        start: &Expr,
        limit: &Expr,
        step: Option<&Expr>,
        body: &Block,
        line: u32,
    ) -> Result<(), CompileError> {
        self.expr(start)?;
        self.expr(limit)?;
        match step {
            Some(step) => self.expr(step)?,
            None => {
                self.emit(Instruction::with_value(OpCode::Literal, Constant::Integer(1)), line);
            }
        }
        let prep = self.emit(Instruction::with_nums(OpCode::ForPrep, i32::from(base), -1), line);
        let body_start = self.pc();
        self.enter_loop();
        self.block(body)?;
        self.emit(
            Instruction::with_nums(OpCode::ForLoop, i32::from(base), body_start as i32),
            line,
        );
        let exit = self.pc();
        self.proto.get_mut(prep).num_val2 = exit as i32;
        self.leave_loop()
    }

    /// Slots: `base` iterator, `base+1` state, `base+2` control,
    /// `base+3` closing value, `base+4..` loop variables.
    fn stat_generic_for(
        &mut self,
        base: u16,
        num_vars: u16,
        exprs: &[Expr],
        body: &Block,
        line: u32,
    ) -> Result<(), CompileError> {
        self.expr_list_adjusted(exprs, 4, line)?;
        for slot in (base..base + 4).rev() {
            self.emit(Instruction::with_num(OpCode::StoreLcl, i32::from(slot)), line);
        }
        self.emit(Instruction::with_num(OpCode::Tbc, i32::from(base + 3)), line);

        let top = self.pc();
        for slot in base..base + 3 {
            self.emit(Instruction::with_num(OpCode::Local, i32::from(slot)), line);
        }
        self.emit(Instruction::with_nums(OpCode::Call, 2, i32::from(num_vars)), line);
        let first_var = base + 4;
        for slot in (first_var..first_var + num_vars).rev() {
            self.emit(Instruction::with_num(OpCode::StoreLcl, i32::from(slot)), line);
        }
        self.emit(Instruction::with_num(OpCode::Local, i32::from(first_var)), line);
        let exit = self.emit_jump(OpCode::JNil, line);
        self.emit(Instruction::with_num(OpCode::Local, i32::from(first_var)), line);
        self.emit(Instruction::with_num(OpCode::StoreLcl, i32::from(base + 2)), line);

        self.enter_loop();
        self.block(body)?;
        let back = self.emit_jump(OpCode::Jump, line);
        self.patch_to(back, top);
        self.patch_here(exit);
        self.leave_loop()?;
        self.emit_clean(base, base + 3 + num_vars, line);
        Ok(())
    }

    fn stat_return(&mut self, exprs: &[Expr], tail_call: bool, line: u32) -> Result<(), CompileError> {
        if tail_call {
            if let Some(Expr {
                kind: ExprKind::Call(call),
                ..
            }) = exprs.first()
            {
                return self.emit_call(call, 0, true, line);
            }
        }
        match exprs.split_last() {
            Some((last, init)) if last.is_multi() => {
                for e in init {
                    self.expr(e)?;
                }
                self.multi(last, -1)?;
                self.emit(Instruction::with_num(OpCode::Ret, open_count(init.len())), line);
            }
            _ => {
                for e in exprs {
                    self.expr(e)?;
                }
                self.emit(Instruction::with_num(OpCode::Ret, exprs.len() as i32), line);
            }
        }
        Ok(())
    }

    fn stat_break(&mut self, exits: &[LocalId], line: u32) -> Result<(), CompileError> {
        if !matches!(self.loops.last(), Some(LoopFrame::Loop { .. })) {
            return Err(CompileError::Internal(
                "break lowered against a function boundary".into(),
            ));
        }
        self.close_exits(exits, line);
        let pc = self.emit_jump(OpCode::Jump, line);
        if let Some(LoopFrame::Loop { breaks }) = self.loops.last_mut() {
            breaks.push(pc);
        }
        Ok(())
    }

    fn stat_goto(&mut self, id: GotoId, line: u32) {
        let info = &self.def.gotos[id as usize];
        let keep = info
            .target
            .map(|l| self.def.labels[l as usize].active_count as usize)
            .unwrap_or(info.active.len());
        let exits: Vec<LocalId> = info.active.get(keep..).unwrap_or(&[]).to_vec();
        self.close_exits(&exits, line);
        let pc = self.emit_jump(OpCode::Jump, line);
        self.goto_jumps.push((id, pc));
    }

    /// Emit a `Clean` over the slots of `exits` if any of them needs closing.
    fn close_exits(&mut self, exits: &[LocalId], line: u32) {
        let infos: Vec<_> = exits.iter().map(|&id| &self.def.locals[id as usize]).collect();
        if !infos.iter().any(|l| l.needs_close()) {
            return;
        }
        let from = infos.iter().map(|l| l.slot).min().unwrap_or(0);
        let to = infos.iter().map(|l| l.slot).max().unwrap_or(0);
        self.emit_clean(from, to, line);
    }
}
