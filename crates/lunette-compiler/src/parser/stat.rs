/// Statement parsing.
use super::Parser;
use crate::ast::{Block, Expr, ExprKind, LocalAttrib, LocalId, Stat, StatKind, SymbolRef};
use crate::error::CompileError;
use crate::options::LuaVersion;
use crate::scope::FOR_STATE;
use crate::token::Token;
use lunette_core::string::StringId;

impl<'a, 's> Parser<'a, 's> {
    /// Parse statements up to the token closing the current block.
    pub(crate) fn block(&mut self) -> Result<Vec<Stat>, CompileError> {
        let mut stats = Vec::new();
        loop {
            if self.current_token()?.closes_block() {
                break;
            }
            if self.check(&Token::Return) {
                stats.push(self.stat_return()?);
                break;
            }
            if let Some(stat) = self.statement()? {
                if !matches!(stat.kind, StatKind::Label(_)) {
                    self.scope.mark_non_void_statement();
                }
                stats.push(stat);
            }
        }
        Ok(stats)
    }

    /// One statement; `None` for an empty statement.
    fn statement(&mut self) -> Result<Option<Stat>, CompileError> {
        self.enter_level()?;
        let line = self.line();
        let kind = match self.current_token()?.clone() {
            Token::Semi => {
                self.advance()?;
                self.leave_level(1);
                return Ok(None);
            }
            Token::If => self.stat_if(line)?,
            Token::While => self.stat_while(line)?,
            Token::Do => {
                self.advance()?;
                let body = self.scoped_block(false)?;
                self.check_match(&Token::End, &Token::Do, line)?;
                StatKind::Do(body)
            }
            Token::For => self.stat_for(line)?,
            Token::Repeat => self.stat_repeat(line)?,
            Token::Function => self.stat_function(line)?,
            Token::Local => {
                self.advance()?;
                if self.test_next(&Token::Function)? {
                    self.stat_local_function(line)?
                } else {
                    self.stat_local(line)?
                }
            }
            Token::DoubleColon => {
                self.advance()?;
                let name = self.expect_name()?;
                self.expect(&Token::DoubleColon)?;
                let id = self
                    .scope
                    .add_label(name, line, &*self.lexer.strings)
                    .map_err(|e| self.scope_error(e))?;
                StatKind::Label(id)
            }
            Token::Break => {
                self.advance()?;
                let exits = self
                    .scope
                    .break_exits(line)
                    .map_err(|e| self.scope_error(e))?;
                StatKind::Break { exits }
            }
            Token::Goto => {
                self.advance()?;
                let name = self.expect_name()?;
                let id = self
                    .scope
                    .add_goto(name, line)
                    .map_err(|e| self.scope_error(e))?;
                StatKind::Goto(id)
            }
            _ => self.stat_expression()?,
        };
        self.leave_level(1);
        Ok(Some(Stat { kind, line }))
    }

    /// A block with its own scope. The caller consumes the closing token.
    fn scoped_block(&mut self, is_loop: bool) -> Result<Block, CompileError> {
        self.scope.enter_block(is_loop);
        let stats = self.block()?;
        let scope = self.leave_block()?;
        Ok(Block { stats, scope })
    }

    // ---- Control structures ----

    /// `if exp then block {elseif exp then block} [else block] end`
    fn stat_if(&mut self, line: u32) -> Result<StatKind, CompileError> {
        self.advance()?;
        let mut clauses = Vec::new();
        let cond = self.expression()?;
        self.expect(&Token::Then)?;
        clauses.push((cond, self.scoped_block(false)?));
        let mut else_block = None;
        loop {
            if self.test_next(&Token::ElseIf)? {
                let cond = self.expression()?;
                self.expect(&Token::Then)?;
                clauses.push((cond, self.scoped_block(false)?));
            } else if self.test_next(&Token::Else)? {
                else_block = Some(self.scoped_block(false)?);
                break;
            } else {
                break;
            }
        }
        self.check_match(&Token::End, &Token::If, line)?;
        Ok(StatKind::If {
            clauses,
            else_block,
        })
    }

    /// `while exp do block end`
    fn stat_while(&mut self, line: u32) -> Result<StatKind, CompileError> {
        self.advance()?;
        let cond = self.expression()?;
        self.expect(&Token::Do)?;
        let body = self.scoped_block(true)?;
        self.check_match(&Token::End, &Token::While, line)?;
        Ok(StatKind::While { cond, body })
    }

    /// `repeat block until exp`; the condition sees the body's locals.
    fn stat_repeat(&mut self, line: u32) -> Result<StatKind, CompileError> {
        self.advance()?;
        self.scope.enter_block(true);
        self.scope.enter_block(false);
        let stats = self.block()?;
        self.check_match(&Token::Until, &Token::Repeat, line)?;
        self.scope.mark_non_void_statement();
        let cond = self.expression()?;
        let scope = self.leave_block()?;
        self.leave_block()?;
        Ok(StatKind::Repeat {
            body: Block { stats, scope },
            cond,
        })
    }

    fn stat_for(&mut self, line: u32) -> Result<StatKind, CompileError> {
        self.advance()?;
        let first = self.expect_name()?;
        match self.current_token()?.clone() {
            Token::Assign => self.stat_numeric_for(first, line),
            Token::Comma | Token::In => self.stat_generic_for(first, line),
            _ => Err(self.error("'=' or 'in' expected")),
        }
    }

    /// `for v = e1, e2 [, e3] do block end`
    fn stat_numeric_for(
        &mut self,
        var: StringId,
        line: u32,
    ) -> Result<StatKind, CompileError> {
        self.advance()?;
        let start = self.expression()?;
        self.expect(&Token::Comma)?;
        let limit = self.expression()?;
        let step = if self.test_next(&Token::Comma)? {
            Some(self.expression()?)
        } else {
            None
        };
        self.expect(&Token::Do)?;

        self.scope.enter_block(true);
        let base = self.declare_hidden(3, line)?;
        self.scope.enter_block(false);
        self.declare(var, LocalAttrib::None, line)?;
        let stats = self.block()?;
        self.check_match(&Token::End, &Token::For, line)?;
        let body_scope = self.leave_block()?;
        let scope = self.leave_block()?;
        Ok(StatKind::NumericFor {
            base,
            start,
            limit,
            step,
            body: Block {
                stats,
                scope: body_scope,
            },
            scope,
        })
    }

    /// `for n1, n2 in explist do block end`
    fn stat_generic_for(
        &mut self,
        first: StringId,
        line: u32,
    ) -> Result<StatKind, CompileError> {
        let mut names = vec![first];
        while self.test_next(&Token::Comma)? {
            names.push(self.expect_name()?);
        }
        self.expect(&Token::In)?;
        let exprs = self.expression_list()?;
        self.expect(&Token::Do)?;

        self.scope.enter_block(true);
        let base = self.declare_hidden(3, line)?;
        // The fourth hidden slot holds the closing value.
        let for_state = self.lexer.strings.intern(FOR_STATE.as_bytes());
        self.declare(for_state, LocalAttrib::Close, line)?;
        self.scope.enter_block(false);
        for name in &names {
            self.declare(*name, LocalAttrib::None, line)?;
        }
        let stats = self.block()?;
        self.check_match(&Token::End, &Token::For, line)?;
        let body_scope = self.leave_block()?;
        let scope = self.leave_block()?;
        Ok(StatKind::GenericFor {
            base,
            num_vars: names.len() as u16,
            exprs,
            body: Block {
                stats,
                scope: body_scope,
            },
            scope,
        })
    }

    /// Declare `count` hidden loop-control locals, returning the first slot.
    fn declare_hidden(&mut self, count: usize, line: u32) -> Result<u16, CompileError> {
        let for_state = self.lexer.strings.intern(FOR_STATE.as_bytes());
        let first = self.declare(for_state, LocalAttrib::None, line)?;
        for _ in 1..count {
            self.declare(for_state, LocalAttrib::None, line)?;
        }
        Ok(self.scope.local_info(first).slot)
    }

    fn declare(
        &mut self,
        name: StringId,
        attrib: LocalAttrib,
        line: u32,
    ) -> Result<LocalId, CompileError> {
        self.scope
            .declare_local(name, attrib, line)
            .map_err(|e| self.scope_error(e))
    }

    // ---- Declarations ----

    /// `function name{.name}[:name] body`
    fn stat_function(&mut self, line: u32) -> Result<StatKind, CompileError> {
        self.advance()?;
        let span = self.current_span();
        let first = self.expect_name()?;
        let mut full_name = self.name_str(first);
        let sym = self.scope.find(first).map_err(|e| self.scope_error(e))?;
        let mut target = self.expr(ExprKind::Symbol(sym), span);
        let mut is_method = false;
        loop {
            let sep = if self.check(&Token::Dot) {
                '.'
            } else if self.check(&Token::Colon) {
                ':'
            } else {
                break;
            };
            self.advance()?;
            let key_span = self.current_span();
            let key = self.expect_name()?;
            full_name.push(sep);
            full_name.push_str(&self.name_str(key));
            let key = self.expr(ExprKind::Str(key), key_span);
            let span = target.span.to(key_span);
            target = self.expr(
                ExprKind::Index {
                    obj: Box::new(target),
                    key: Box::new(key),
                },
                span,
            );
            if sep == ':' {
                is_method = true;
                break;
            }
        }
        self.check_assignable(&target)?;
        let def = self.function_body(is_method, full_name, line)?;
        let func = self.expr(ExprKind::Function(Box::new(def)), span);
        Ok(StatKind::Assign {
            targets: vec![target],
            exprs: vec![func],
        })
    }

    /// `local function name body`; the name is in scope inside the body.
    fn stat_local_function(&mut self, line: u32) -> Result<StatKind, CompileError> {
        let name = self.expect_name()?;
        let local = self.declare(name, LocalAttrib::None, line)?;
        let def = self.function_body(false, self.name_str(name), line)?;
        Ok(StatKind::LocalFunction {
            local,
            func: Box::new(def),
        })
    }

    /// `local name attrib {, name attrib} [= explist]`
    fn stat_local(&mut self, line: u32) -> Result<StatKind, CompileError> {
        let mut decls = Vec::new();
        let mut has_close = false;
        loop {
            let name = self.expect_name()?;
            let attrib = self.local_attribute(name)?;
            if attrib == LocalAttrib::Close {
                if has_close {
                    return Err(self.semantic_error("multiple to-be-closed variables in local list"));
                }
                has_close = true;
            }
            decls.push((name, attrib));
            if !self.test_next(&Token::Comma)? {
                break;
            }
        }
        let exprs = if self.test_next(&Token::Assign)? {
            self.expression_list()?
        } else {
            Vec::new()
        };
        let mut locals = Vec::with_capacity(decls.len());
        for (name, attrib) in decls {
            locals.push(self.declare(name, attrib, line)?);
        }
        Ok(StatKind::Local { locals, exprs })
    }

    /// Optional `<const>` / `<close>` after a local name.
    fn local_attribute(
        &mut self,
        local: StringId,
    ) -> Result<LocalAttrib, CompileError> {
        let mut found: Option<(LocalAttrib, String)> = None;
        while self.test_next(&Token::Less)? {
            let name = self.expect_name()?;
            let text = self.name_str(name);
            let attrib = match text.as_str() {
                "const" => LocalAttrib::Const,
                "close" => LocalAttrib::Close,
                _ => return Err(self.semantic_error(format!("unknown attribute '{text}'"))),
            };
            self.expect(&Token::Greater)?;
            if let Some((_, prev)) = &found {
                if *prev == text {
                    return Err(self.semantic_error(format!("duplicate attribute '{text}'")));
                }
                return Err(self.semantic_error(format!(
                    "multiple attributes for local '{}'",
                    self.name_str(local)
                )));
            }
            self.require_version(LuaVersion::Lua54, &format!("attribute '<{text}>'"))?;
            found = Some((attrib, text));
        }
        Ok(found.map(|(a, _)| a).unwrap_or_default())
    }

    /// `return [explist] [';']`
    fn stat_return(&mut self) -> Result<Stat, CompileError> {
        let line = self.line();
        self.advance()?;
        let exprs = if self.current_token()?.closes_block() || self.check(&Token::Semi) {
            Vec::new()
        } else {
            self.expression_list()?
        };
        self.test_next(&Token::Semi)?;
        let tail_call = exprs.len() == 1
            && matches!(exprs[0].kind, ExprKind::Call(_))
            && !self.scope.has_active_tbc();
        Ok(Stat {
            kind: StatKind::Return { exprs, tail_call },
            line,
        })
    }

    // ---- Expression statements ----

    /// A call, or an assignment `var {, var} = explist`.
    fn stat_expression(&mut self) -> Result<StatKind, CompileError> {
        let first = self.suffixed_expression()?;
        if self.check(&Token::Assign) || self.check(&Token::Comma) {
            let mut targets = vec![first];
            while self.test_next(&Token::Comma)? {
                targets.push(self.suffixed_expression()?);
            }
            for target in &targets {
                self.check_assignable(target)?;
            }
            self.expect(&Token::Assign)?;
            let exprs = self.expression_list()?;
            return Ok(StatKind::Assign { targets, exprs });
        }
        if matches!(first.kind, ExprKind::Call(_)) {
            Ok(StatKind::Call(first))
        } else {
            Err(self.error("syntax error"))
        }
    }

    fn check_assignable(&self, target: &Expr) -> Result<(), CompileError> {
        match &target.kind {
            ExprKind::Index { .. } => Ok(()),
            ExprKind::Symbol(SymbolRef::DefaultEnv) => Err(self.error("syntax error")),
            ExprKind::Symbol(sym) => {
                if self.scope.symbol_attrib(sym) == LocalAttrib::None {
                    return Ok(());
                }
                let name = sym.name().map(|n| self.name_str(n)).unwrap_or_default();
                Err(self.semantic_error(format!(
                    "attempt to assign to const variable '{name}'"
                )))
            }
            _ => Err(self.error("syntax error")),
        }
    }
}
