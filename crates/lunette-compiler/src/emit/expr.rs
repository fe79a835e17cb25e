use super::{emit_function, Emitter};
use crate::ast::{BinOp, CallExpr, Expr, ExprKind, FunctionDef, SymbolRef, TableField, UnOp};
use crate::error::CompileError;
use crate::opcode::{open_count, Instruction, OpCode, SymbolKind, SymbolName};
use crate::proto::Constant;

/// Positional constructor values buffered on the stack before a flush.
const FIELDS_PER_FLUSH: usize = 50;

impl<'d> Emitter<'d> {
    /// Push exactly one value.
    pub(super) fn expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        let line = expr.line();
        match &expr.kind {
            ExprKind::Nil => self.literal(Constant::Nil, line),
            ExprKind::True => self.literal(Constant::Boolean(true), line),
            ExprKind::False => self.literal(Constant::Boolean(false), line),
            ExprKind::Integer(i) => self.literal(Constant::Integer(*i), line),
            ExprKind::Float(f) => self.literal(Constant::Float(*f), line),
            ExprKind::Str(s) => self.literal(Constant::String(*s), line),
            ExprKind::VarArgs | ExprKind::Call(_) => self.multi(expr, 1)?,
            ExprKind::Symbol(sym) => self.load_symbol(sym, line)?,
            ExprKind::Index { obj, key } => {
                self.expr(obj)?;
                let mut inst = match key.kind {
                    ExprKind::Str(k) => Instruction::with_value(OpCode::IndexN, Constant::String(k)),
                    _ => {
                        self.expr(key)?;
                        Instruction::new(OpCode::Index)
                    }
                };
                inst.symbol = self.describe(obj);
                self.emit(inst, line);
            }
            ExprKind::Function(def) => self.closure(def, line)?,
            ExprKind::Table(fields) => self.table(fields, line)?,
            ExprKind::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs, line)?,
            ExprKind::Unary { op, operand } => {
                self.expr(operand)?;
                let opcode = match op {
                    UnOp::Neg => OpCode::Neg,
                    UnOp::BNot => OpCode::BitNot,
                    UnOp::Not => OpCode::Not,
                    UnOp::Len => OpCode::Len,
                };
                let mut inst = Instruction::with_num(opcode, 1);
                if *op != UnOp::Not {
                    inst.symbol = self.describe(operand);
                }
                self.emit(inst, line);
            }
            ExprKind::Paren(inner) => self.expr(inner)?,
        }
        Ok(())
    }

    /// Push the values of a call or `...`: exactly `want` of them, or all of
    /// them followed by their count when `want` is `-1`.
    pub(super) fn multi(&mut self, expr: &Expr, want: i32) -> Result<(), CompileError> {
        match &expr.kind {
            ExprKind::Call(call) => self.emit_call(call, want, false, expr.line()),
            ExprKind::VarArgs => {
                self.emit(Instruction::with_num(OpCode::VarArgs, want), expr.line());
                Ok(())
            }
            _ => Err(CompileError::Internal(
                "multi-value lowering of a single-value expression".into(),
            )),
        }
    }

    fn literal(&mut self, value: Constant, line: u32) {
        self.emit(Instruction::with_value(OpCode::Literal, value), line);
    }

    /// Lower a call. `results` is the number of values wanted (`-1` open);
    /// tail calls always forward every result.
    pub(super) fn emit_call(
        &mut self,
        call: &CallExpr,
        results: i32,
        tail: bool,
        line: u32,
    ) -> Result<(), CompileError> {
        self.expr(&call.func)?;
        let (self_arg, symbol) = match call.method {
            Some(name) => {
                let mut inst = Instruction::with_value(OpCode::Method, Constant::String(name));
                inst.symbol = self.describe(&call.func);
                self.emit(inst, line);
                (1, Some(SymbolName { kind: SymbolKind::Method, name }))
            }
            None => (0, self.describe(&call.func)),
        };

        let argc = match call.args.split_last() {
            Some((last, init)) if last.is_multi() => {
                for arg in init {
                    self.expr(arg)?;
                }
                self.multi(last, -1)?;
                open_count(init.len() + self_arg)
            }
            _ => {
                for arg in &call.args {
                    self.expr(arg)?;
                }
                (call.args.len() + self_arg) as i32
            }
        };

        let op = match (tail, call.method.is_some()) {
            (true, _) => OpCode::TailCall,
            (false, true) => OpCode::ThisCall,
            (false, false) => OpCode::Call,
        };
        let results = if tail { -1 } else { results };
        let mut inst = Instruction::with_nums(op, argc, results);
        inst.symbol = symbol;
        self.emit(inst, line);
        Ok(())
    }

    pub(super) fn load_symbol(&mut self, sym: &SymbolRef, line: u32) -> Result<(), CompileError> {
        let inst = match sym {
            SymbolRef::Local { slot, name, .. } => {
                Instruction::with_num(OpCode::Local, i32::from(*slot)).symbol(SymbolKind::Local, *name)
            }
            SymbolRef::Upvalue { index, name } => {
                Instruction::with_num(OpCode::UpValue, i32::from(*index))
                    .symbol(SymbolKind::Upvalue, *name)
            }
            SymbolRef::Global { name, env } => {
                self.load_symbol(env, line)?;
                let mut inst = Instruction::with_value(OpCode::IndexN, Constant::String(*name));
                inst.symbol = self.describe_symbol(env);
                inst
            }
            SymbolRef::DefaultEnv => Instruction::new(OpCode::Env),
        };
        self.emit(inst, line);
        Ok(())
    }

    pub(super) fn closure(&mut self, def: &FunctionDef, line: u32) -> Result<(), CompileError> {
        let child = emit_function(def, &self.proto.source)?;
        let index = self.proto.protos.len();
        self.proto.protos.push(child);
        self.emit(Instruction::with_num(OpCode::Closure, index as i32), line);
        Ok(())
    }

    // ---- Constructors ----

    fn table(&mut self, fields: &[TableField], line: u32) -> Result<(), CompileError> {
        let positional = fields
            .iter()
            .filter(|f| matches!(f, TableField::Positional(_)))
            .count();
        let hashed = fields.len() - positional;
        self.emit(
            Instruction::with_nums(OpCode::NewTable, positional as i32, hashed as i32),
            line,
        );

        let mut next_index = 1i32;
        let mut pending = 0usize;
        let last = fields.len().saturating_sub(1);
        for (i, field) in fields.iter().enumerate() {
            match field {
                TableField::Positional(value) if i == last && value.is_multi() => {
                    self.multi(value, -1)?;
                    self.emit(
                        Instruction::with_nums(OpCode::TblInitI, next_index, open_count(pending)),
                        line,
                    );
                    pending = 0;
                }
                TableField::Positional(value) => {
                    self.expr(value)?;
                    pending += 1;
                    if pending == FIELDS_PER_FLUSH {
                        self.flush_positional(&mut next_index, &mut pending, line);
                    }
                }
                TableField::Named(name, value) => {
                    self.literal(Constant::String(*name), value.line());
                    self.expr(value)?;
                    self.emit(Instruction::with_num(OpCode::TblInitN, pending as i32), value.line());
                }
                TableField::Keyed(key, value) => {
                    self.expr(key)?;
                    self.expr(value)?;
                    self.emit(Instruction::with_num(OpCode::TblInitN, pending as i32), value.line());
                }
            }
        }
        if pending > 0 {
            self.flush_positional(&mut next_index, &mut pending, line);
        }
        Ok(())
    }

    fn flush_positional(&mut self, next_index: &mut i32, pending: &mut usize, line: u32) {
        self.emit(
            Instruction::with_nums(OpCode::TblInitI, *next_index, *pending as i32),
            line,
        );
        *next_index += *pending as i32;
        *pending = 0;
    }

    // ---- Operators ----

    fn binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr, line: u32) -> Result<(), CompileError> {
        if matches!(op, BinOp::And | BinOp::Or) {
            self.expr(lhs)?;
            let jump_op = if op == BinOp::And {
                OpCode::JfOrPop
            } else {
                OpCode::JtOrPop
            };
            let skip = self.emit_jump(jump_op, line);
            self.expr(rhs)?;
            self.patch_here(skip);
            return Ok(());
        }

        self.expr(lhs)?;
        self.expr(rhs)?;
        let opcode = match op {
            BinOp::Add => OpCode::Add,
            BinOp::Sub => OpCode::Sub,
            BinOp::Mul => OpCode::Mul,
            BinOp::Div => OpCode::Div,
            BinOp::IDiv => OpCode::FloorDiv,
            BinOp::Mod => OpCode::Mod,
            BinOp::Pow => OpCode::Power,
            BinOp::Concat => OpCode::Concat,
            BinOp::Shl => OpCode::ShiftLeft,
            BinOp::Shr => OpCode::ShiftRight,
            BinOp::BAnd => OpCode::BitAnd,
            BinOp::BOr => OpCode::BitOr,
            BinOp::BXor => OpCode::BitXor,
            BinOp::Eq | BinOp::NotEq => OpCode::Eq,
            BinOp::Lt => OpCode::Less,
            BinOp::LtEq => OpCode::LessEq,
            BinOp::Gt => {
                self.emit(Instruction::new(OpCode::Swap), line);
                OpCode::Less
            }
            BinOp::GtEq => {
                self.emit(Instruction::new(OpCode::Swap), line);
                OpCode::LessEq
            }
            BinOp::And | BinOp::Or => unreachable!("short-circuit handled above"),
        };

        let mut inst = Instruction::new(opcode);
        if !matches!(opcode, OpCode::Eq | OpCode::Less | OpCode::LessEq) {
            // Name one operand; the VM only uses it if that side is the bad one.
            if let Some(sym) = self.describe(lhs) {
                inst.num_val = 1;
                inst.symbol = Some(sym);
            } else if let Some(sym) = self.describe(rhs) {
                inst.num_val = 2;
                inst.symbol = Some(sym);
            }
        }
        self.emit(inst, line);
        if op == BinOp::NotEq {
            self.emit(Instruction::new(OpCode::Not), line);
        }
        Ok(())
    }

    // ---- Operand naming ----

    pub(super) fn describe_symbol(&self, sym: &SymbolRef) -> Option<SymbolName> {
        let kind = match sym {
            SymbolRef::Local { .. } => SymbolKind::Local,
            SymbolRef::Upvalue { .. } => SymbolKind::Upvalue,
            SymbolRef::Global { .. } => SymbolKind::Global,
            SymbolRef::DefaultEnv => return None,
        };
        sym.name().map(|name| SymbolName { kind, name })
    }

    /// How runtime errors should name the value of `expr`, if at all.
    pub(super) fn describe(&self, expr: &Expr) -> Option<SymbolName> {
        match &expr.kind {
            ExprKind::Symbol(sym) => self.describe_symbol(sym),
            ExprKind::Index { key, .. } => match key.kind {
                ExprKind::Str(name) => Some(SymbolName {
                    kind: SymbolKind::Field,
                    name,
                }),
                _ => None,
            },
            ExprKind::Str(name) => Some(SymbolName {
                kind: SymbolKind::Constant,
                name: *name,
            }),
            ExprKind::Call(call) => call.method.map(|name| SymbolName {
                kind: SymbolKind::Method,
                name,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::opcode::{OpCode, SymbolKind};
    use crate::options::CompileOptions;
    use crate::proto::{Constant, Proto};
    use lunette_core::string::StringInterner;

    fn compile_ok(src: &str) -> (Proto, StringInterner) {
        let mut strings = StringInterner::new();
        let p = crate::compile(src.as_bytes(), &CompileOptions::new("=test"), &mut strings)
            .unwrap_or_else(|e| panic!("compile failed for {src:?}: {e}"));
        (p, strings)
    }

    fn ops(proto: &Proto) -> Vec<OpCode> {
        proto.code.iter().map(|i| i.op).collect()
    }

    #[test]
    fn test_global_read_goes_through_env() {
        let (p, strings) = compile_ok("return x");
        assert_eq!(ops(&p)[..2], [OpCode::UpValue, OpCode::IndexN]);
        let Constant::String(id) = p.code[1].value else {
            panic!("expected a string key");
        };
        assert_eq!(strings.get_bytes(id), b"x");
        let sym = p.code[1].symbol.unwrap();
        assert_eq!(sym.kind, SymbolKind::Upvalue);
    }

    #[test]
    fn test_call_names_global_callee() {
        let (p, strings) = compile_ok("f()");
        let call = p.code.iter().find(|i| i.op == OpCode::Call).unwrap();
        let sym = call.symbol.unwrap();
        assert_eq!(sym.kind, SymbolKind::Global);
        assert_eq!(strings.get_bytes(sym.name), b"f");
    }

    #[test]
    fn test_method_call_uses_this_call() {
        let (p, _) = compile_ok("local o = {} o:m(1)");
        let call = p.code.iter().find(|i| i.op == OpCode::ThisCall).unwrap();
        assert_eq!(call.num_val, 2);
        assert_eq!(call.symbol.unwrap().kind, SymbolKind::Method);
        assert!(p.code.iter().any(|i| i.op == OpCode::Method));
    }

    #[test]
    fn test_short_circuit_jumps() {
        let (p, _) = compile_ok("local a, b; local c = a and b or 1");
        assert!(p.code.iter().any(|i| i.op == OpCode::JfOrPop));
        assert!(p.code.iter().any(|i| i.op == OpCode::JtOrPop));
    }

    #[test]
    fn test_greater_swaps_operands() {
        let (p, _) = compile_ok("local a, b; local c = a > b");
        let ops = ops(&p);
        let i = ops.iter().position(|&o| o == OpCode::Less).unwrap();
        assert_eq!(ops[i - 1], OpCode::Swap);
    }

    #[test]
    fn test_not_equal_is_eq_not() {
        let (p, _) = compile_ok("local a, b; local c = a ~= b");
        let ops = ops(&p);
        let i = ops.iter().position(|&o| o == OpCode::Eq).unwrap();
        assert_eq!(ops[i + 1], OpCode::Not);
    }

    #[test]
    fn test_table_constructor_flushes() {
        let items: Vec<String> = (1..=120).map(|i| i.to_string()).collect();
        let src = format!("local t = {{{}}}", items.join(", "));
        let (p, _) = compile_ok(&src);
        let inits: Vec<(i32, i32)> = p
            .code
            .iter()
            .filter(|i| i.op == OpCode::TblInitI)
            .map(|i| (i.num_val, i.num_val2))
            .collect();
        assert_eq!(inits, vec![(1, 50), (51, 50), (101, 20)]);
    }

    #[test]
    fn test_table_constructor_open_tail() {
        let (p, _) = compile_ok("local t = {1, 2, ...}");
        let init = p.code.iter().find(|i| i.op == OpCode::TblInitI).unwrap();
        assert_eq!(init.num_val, 1);
        assert_eq!(init.num_val2, crate::opcode::open_count(2));
    }

    #[test]
    fn test_named_field_records_pending_depth() {
        let (p, _) = compile_ok("local t = {1, x = 2, 3}");
        let init_n = p.code.iter().find(|i| i.op == OpCode::TblInitN).unwrap();
        assert_eq!(init_n.num_val, 1);
    }

    #[test]
    fn test_arith_names_string_constant() {
        let (p, strings) = compile_ok("local x = 'abc' + 1");
        let add = p.code.iter().find(|i| i.op == OpCode::Add).unwrap();
        let sym = add.symbol.unwrap();
        assert_eq!(add.num_val, 1);
        assert_eq!(sym.kind, SymbolKind::Constant);
        assert_eq!(strings.get_bytes(sym.name), b"abc");
    }

    #[test]
    fn test_closure_child_protos() {
        let (p, _) = compile_ok("local f = function() return function() end end");
        assert_eq!(p.protos.len(), 1);
        assert_eq!(p.protos[0].protos.len(), 1);
        assert_eq!(p.count_protos(), 3);
    }
}
