/// Expression parsing: precedence climbing, primaries, suffixes, constructors
/// and function bodies.
use super::Parser;
use crate::ast::{
    BinOp, Block, CallExpr, Expr, ExprKind, FunctionDef, LocalAttrib, TableField, UnOp,
    UNARY_PRIORITY,
};
use crate::error::CompileError;
use crate::options::LuaVersion;
use crate::token::{Span, Token};
use lunette_core::string::StringId;

impl<'a, 's> Parser<'a, 's> {
    pub(crate) fn expression(&mut self) -> Result<Expr, CompileError> {
        self.sub_expression(0)
    }

    /// Precedence climbing: parse operators binding tighter than `limit`.
    fn sub_expression(&mut self, limit: u8) -> Result<Expr, CompileError> {
        self.enter_level()?;
        let start = self.current_span();
        let mut expr = if let Some(op) = self.check_unary_op()? {
            self.advance()?;
            let operand = self.sub_expression(UNARY_PRIORITY)?;
            let span = start.to(operand.span);
            fold_unary(op, operand, span)
        } else {
            self.simple_expression()?
        };

        // Each operator in a left-leaning chain deepens the tree by one.
        let mut chained = 0;
        while let Some(op) = self.check_binary_op()? {
            let (left, right) = op.priority();
            if left <= limit {
                break;
            }
            if op.needs_53() {
                self.require_version(LuaVersion::Lua53, &format!("'{}' operator", op.symbol()))?;
            }
            self.advance()?;
            self.enter_level()?;
            chained += 1;
            let rhs = self.sub_expression(right)?;
            let span = expr.span.to(rhs.span);
            expr = self.expr(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(expr),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
        self.leave_level(1 + chained);
        Ok(expr)
    }

    fn check_unary_op(&self) -> Result<Option<UnOp>, CompileError> {
        Ok(match self.current_token()? {
            Token::Not => Some(UnOp::Not),
            Token::Minus => Some(UnOp::Neg),
            Token::Hash => Some(UnOp::Len),
            Token::Tilde => {
                self.require_version(LuaVersion::Lua53, "'~' operator")?;
                Some(UnOp::BNot)
            }
            _ => None,
        })
    }

    fn check_binary_op(&self) -> Result<Option<BinOp>, CompileError> {
        Ok(match self.current_token()? {
            Token::Plus => Some(BinOp::Add),
            Token::Minus => Some(BinOp::Sub),
            Token::Star => Some(BinOp::Mul),
            Token::Slash => Some(BinOp::Div),
            Token::FloorDiv => Some(BinOp::IDiv),
            Token::Percent => Some(BinOp::Mod),
            Token::Caret => Some(BinOp::Pow),
            Token::DotDot => Some(BinOp::Concat),
            Token::ShiftLeft => Some(BinOp::Shl),
            Token::ShiftRight => Some(BinOp::Shr),
            Token::Ampersand => Some(BinOp::BAnd),
            Token::Pipe => Some(BinOp::BOr),
            Token::Tilde => Some(BinOp::BXor),
            Token::Equal => Some(BinOp::Eq),
            Token::NotEqual => Some(BinOp::NotEq),
            Token::Less => Some(BinOp::Lt),
            Token::LessEq => Some(BinOp::LtEq),
            Token::Greater => Some(BinOp::Gt),
            Token::GreaterEq => Some(BinOp::GtEq),
            Token::And => Some(BinOp::And),
            Token::Or => Some(BinOp::Or),
            _ => None,
        })
    }

    /// Literals, `...`, constructors, function literals, or a suffixed expression.
    fn simple_expression(&mut self) -> Result<Expr, CompileError> {
        let span = self.current_span();
        let kind = match self.current_token()?.clone() {
            Token::Integer(i) => ExprKind::Integer(i),
            Token::Float(f) => ExprKind::Float(f),
            Token::String(id) => ExprKind::Str(id),
            Token::Nil => ExprKind::Nil,
            Token::True => ExprKind::True,
            Token::False => ExprKind::False,
            Token::DotDotDot => {
                if !self.scope.is_vararg() {
                    return Err(self.error("cannot use '...' outside a vararg function"));
                }
                ExprKind::VarArgs
            }
            Token::LBrace => return self.table_constructor(),
            Token::Function => {
                self.advance()?;
                let def = self.function_body(false, "anonymous".into(), span.line)?;
                let end = self.current_span();
                return Ok(self.expr(ExprKind::Function(Box::new(def)), span.to(end)));
            }
            _ => return self.suffixed_expression(),
        };
        self.advance()?;
        Ok(self.expr(kind, span))
    }

    /// A name or parenthesized expression.
    fn primary_expression(&mut self) -> Result<Expr, CompileError> {
        let span = self.current_span();
        match self.current_token()?.clone() {
            Token::Name(name) => {
                self.advance()?;
                let sym = self.scope.find(name).map_err(|e| self.scope_error(e))?;
                Ok(self.expr(ExprKind::Symbol(sym), span))
            }
            Token::LParen => {
                let line = span.line;
                self.advance()?;
                let inner = self.expression()?;
                let end = self.current_span();
                self.check_match(&Token::RParen, &Token::LParen, line)?;
                Ok(self.expr(ExprKind::Paren(Box::new(inner)), span.to(end)))
            }
            _ => Err(self.error("unexpected symbol")),
        }
    }

    /// primary { '.' NAME | '[' exp ']' | ':' NAME args | args }
    pub(crate) fn suffixed_expression(&mut self) -> Result<Expr, CompileError> {
        let mut expr = self.primary_expression()?;
        let mut chained = 0;
        loop {
            if matches!(
                self.current_token()?,
                Token::Dot
                    | Token::LBracket
                    | Token::Colon
                    | Token::LParen
                    | Token::String(_)
                    | Token::LBrace
            ) {
                self.enter_level()?;
                chained += 1;
            }
            match self.current_token()?.clone() {
                Token::Dot => {
                    self.advance()?;
                    let key_span = self.current_span();
                    let name = self.expect_name()?;
                    let key = self.expr(ExprKind::Str(name), key_span);
                    let span = expr.span.to(key_span);
                    expr = self.expr(
                        ExprKind::Index {
                            obj: Box::new(expr),
                            key: Box::new(key),
                        },
                        span,
                    );
                }
                Token::LBracket => {
                    self.advance()?;
                    let key = self.expression()?;
                    let end = self.current_span();
                    self.expect(&Token::RBracket)?;
                    let span = expr.span.to(end);
                    expr = self.expr(
                        ExprKind::Index {
                            obj: Box::new(expr),
                            key: Box::new(key),
                        },
                        span,
                    );
                }
                Token::Colon => {
                    self.advance()?;
                    let name = self.expect_name()?;
                    let line = self.line();
                    let args = self.call_args(line)?;
                    let span = expr.span.to(self.current_span());
                    expr = self.expr(
                        ExprKind::Call(Box::new(CallExpr {
                            func: expr,
                            method: Some(name),
                            args,
                        })),
                        span,
                    );
                }
                Token::LParen | Token::String(_) | Token::LBrace => {
                    let line = self.line();
                    let args = self.call_args(line)?;
                    let span = expr.span.to(self.current_span());
                    expr = self.expr(
                        ExprKind::Call(Box::new(CallExpr {
                            func: expr,
                            method: None,
                            args,
                        })),
                        span,
                    );
                }
                _ => break,
            }
        }
        self.leave_level(chained);
        Ok(expr)
    }

    /// `(explist)`, a table constructor or a string literal.
    fn call_args(&mut self, line: u32) -> Result<Vec<Expr>, CompileError> {
        let span = self.current_span();
        match self.current_token()?.clone() {
            Token::String(id) => {
                self.advance()?;
                Ok(vec![self.expr(ExprKind::Str(id), span)])
            }
            Token::LBrace => Ok(vec![self.table_constructor()?]),
            Token::LParen => {
                self.advance()?;
                let args = if self.check(&Token::RParen) {
                    Vec::new()
                } else {
                    self.expression_list()?
                };
                self.check_match(&Token::RParen, &Token::LParen, line)?;
                Ok(args)
            }
            _ => Err(self.error("function arguments expected")),
        }
    }

    pub(crate) fn expression_list(&mut self) -> Result<Vec<Expr>, CompileError> {
        let mut exprs = vec![self.expression()?];
        while self.test_next(&Token::Comma)? {
            exprs.push(self.expression()?);
        }
        Ok(exprs)
    }

    fn table_constructor(&mut self) -> Result<Expr, CompileError> {
        let start = self.current_span();
        let line = start.line;
        self.expect(&Token::LBrace)?;
        let mut fields = Vec::new();
        loop {
            if self.check(&Token::RBrace) {
                break;
            }
            let field = match self.current_token()?.clone() {
                Token::Name(name) if self.peek_is_assign() => {
                    self.advance()?;
                    self.advance()?;
                    TableField::Named(name, self.expression()?)
                }
                Token::LBracket => {
                    self.advance()?;
                    let key = self.expression()?;
                    self.expect(&Token::RBracket)?;
                    self.expect(&Token::Assign)?;
                    TableField::Keyed(key, self.expression()?)
                }
                _ => TableField::Positional(self.expression()?),
            };
            fields.push(field);
            if !self.test_next(&Token::Comma)? && !self.test_next(&Token::Semi)? {
                break;
            }
        }
        let end = self.current_span();
        self.check_match(&Token::RBrace, &Token::LBrace, line)?;
        Ok(self.expr(ExprKind::Table(fields), start.to(end)))
    }

    // ---- Function bodies ----

    /// `(params) block end`, after the `function` keyword and name.
    pub(crate) fn function_body(
        &mut self,
        is_method: bool,
        name: String,
        line: u32,
    ) -> Result<FunctionDef, CompileError> {
        self.expect(&Token::LParen)?;
        let mut params: Vec<(StringId, u32)> = Vec::new();
        let mut is_vararg = false;
        if !self.check(&Token::RParen) {
            loop {
                match self.current_token()?.clone() {
                    Token::Name(id) => {
                        let l = self.line();
                        self.advance()?;
                        params.push((id, l));
                    }
                    Token::DotDotDot => {
                        self.advance()?;
                        is_vararg = true;
                    }
                    _ => return Err(self.error("<name> expected")),
                }
                if is_vararg || !self.test_next(&Token::Comma)? {
                    break;
                }
            }
        }
        self.expect(&Token::RParen)?;

        self.scope.enter_function(is_vararg);
        self.scope.enter_block(false);
        if is_method {
            let self_name = self.lexer.strings.intern(b"self");
            self.scope
                .declare_local(self_name, LocalAttrib::None, line)
                .map_err(|e| self.scope_error(e))?;
        }
        for (param, l) in &params {
            self.scope
                .declare_local(*param, LocalAttrib::None, *l)
                .map_err(|e| self.scope_error(e))?;
        }
        let stats = self.block()?;
        let end_line = self.line();
        self.check_match(&Token::End, &Token::Function, line)?;
        let scope = self.leave_block()?;
        let frame = self.scope.leave_function().map_err(|e| self.scope_error(e))?;

        Ok(FunctionDef {
            name,
            line,
            end_line,
            num_params: params.len() as u16 + u16::from(is_method),
            is_vararg,
            body: Block { stats, scope },
            locals: frame.locals,
            upvalues: frame.upvalues,
            max_slots: frame.max_slots,
            gotos: frame.gotos,
            labels: frame.labels,
        })
    }
}

/// Apply a unary operator, folding `-` into numeric literals.
fn fold_unary(op: UnOp, operand: Expr, span: Span) -> Expr {
    match (op, &operand.kind) {
        (UnOp::Neg, ExprKind::Integer(i)) => Expr::new(ExprKind::Integer(i.wrapping_neg()), span),
        (UnOp::Neg, ExprKind::Float(f)) => Expr::new(ExprKind::Float(-f), span),
        _ => Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        ),
    }
}
