//! Recursive-descent parser producing a resolved syntax tree.
//!
//! Names are bound while parsing: every identifier goes through the
//! [`ScopeResolver`] and lands in the tree as a [`SymbolRef`].

mod expr;
mod stat;

use crate::ast::{Block, Expr, ExprKind, FunctionDef, RuntimeScopeBlock, Stat, StatKind};
use crate::error::{CompileError, SyntaxError};
use crate::lexer::Lexer;
use crate::options::{CompileOptions, LuaVersion};
use crate::scope::{ScopeError, ScopeResolver};
use crate::token::{Span, SpannedToken, Token};
use lunette_core::string::{StringId, StringInterner};

/// Deepest nesting of expressions, suffixes and statements a chunk may use.
/// Bounds the recursion of both the parser and the emitter.
pub(crate) const MAX_LEVELS: u32 = 200;

pub(crate) struct Parser<'a, 's> {
    lexer: Lexer<'a, 's>,
    scope: ScopeResolver,
    version: LuaVersion,
    chunk: String,
    levels: u32,
}

impl<'a, 's> Parser<'a, 's> {
    pub(crate) fn new(
        source: &'a [u8],
        options: &CompileOptions,
        strings: &'s mut StringInterner,
    ) -> Self {
        let scope = if options.dynamic_expression {
            ScopeResolver::new_dynamic(strings)
        } else {
            ScopeResolver::new(strings)
        };
        Parser {
            lexer: Lexer::new(source, strings),
            scope,
            version: options.version,
            chunk: options.display_chunk_name(),
            levels: 0,
        }
    }

    /// Parse a whole chunk into the main function.
    pub(crate) fn parse_chunk(mut self) -> Result<FunctionDef, CompileError> {
        self.scope.enter_block(false);
        let stats = self.block()?;
        if !self.check(&Token::Eof) {
            return Err(self.error("'<eof>' expected"));
        }
        let end_line = self.line();
        let scope = self.leave_block()?;
        let frame = self.scope.leave_function().map_err(|e| self.scope_error(e))?;
        Ok(FunctionDef {
            name: "main chunk".into(),
            line: 0,
            end_line,
            num_params: 0,
            is_vararg: true,
            body: Block { stats, scope },
            locals: frame.locals,
            upvalues: frame.upvalues,
            max_slots: frame.max_slots,
            gotos: frame.gotos,
            labels: frame.labels,
        })
    }

    /// Parse a single expression, wrapped as a function returning it.
    pub(crate) fn parse_expression_chunk(mut self) -> Result<FunctionDef, CompileError> {
        self.scope.enter_block(false);
        let line = self.line();
        let expr = self.expression()?;
        if !self.check(&Token::Eof) {
            return Err(self.error("'<eof>' expected"));
        }
        let tail_call = matches!(expr.kind, ExprKind::Call(_));
        let stats = vec![Stat {
            kind: StatKind::Return {
                exprs: vec![expr],
                tail_call,
            },
            line,
        }];
        let scope = self.leave_block()?;
        let frame = self.scope.leave_function().map_err(|e| self.scope_error(e))?;
        Ok(FunctionDef {
            name: "dynamic expression".into(),
            line: 0,
            end_line: line,
            num_params: 0,
            is_vararg: true,
            body: Block { stats, scope },
            locals: frame.locals,
            upvalues: frame.upvalues,
            max_slots: frame.max_slots,
            gotos: frame.gotos,
            labels: frame.labels,
        })
    }

    // ---- Errors ----

    fn strings(&self) -> &StringInterner {
        &*self.lexer.strings
    }

    fn name_str(&self, id: StringId) -> String {
        self.strings().get_str(id).into_owned()
    }

    fn current_span(&self) -> Span {
        match self.lexer.current() {
            Ok(tok) => tok.span,
            Err(e) => e.span,
        }
    }

    fn line(&self) -> u32 {
        self.current_span().line
    }

    fn at_eof(&self) -> bool {
        matches!(self.lexer.current(), Ok(tok) if tok.token == Token::Eof)
    }

    /// Error at the current token, with Lua's "near" suffix.
    fn error(&self, msg: impl Into<String>) -> CompileError {
        let span = self.current_span();
        if self.at_eof() {
            SyntaxError::premature(format!("{} near <eof>", msg.into()), span)
                .with_chunk(&self.chunk)
                .into()
        } else {
            SyntaxError::new(
                format!("{} near '{}'", msg.into(), self.lexer.token_text),
                span,
            )
            .with_chunk(&self.chunk)
            .into()
        }
    }

    /// Error not tied to the current token (scoping rules, limits).
    fn semantic_error(&self, msg: impl Into<String>) -> CompileError {
        SyntaxError::new(msg, self.current_span())
            .with_chunk(&self.chunk)
            .into()
    }

    fn scope_error(&self, err: ScopeError) -> CompileError {
        match err {
            ScopeError::Semantic(msg) => self.semantic_error(msg),
            ScopeError::Internal(msg) => CompileError::Internal(msg),
        }
    }

    /// Count one more nesting level, failing past [`MAX_LEVELS`].
    fn enter_level(&mut self) -> Result<(), CompileError> {
        self.levels += 1;
        if self.levels > MAX_LEVELS {
            return Err(self.error("chunk has too many C levels"));
        }
        Ok(())
    }

    fn leave_level(&mut self, count: u32) {
        self.levels -= count;
    }

    fn leave_block(&mut self) -> Result<RuntimeScopeBlock, CompileError> {
        let result = self.scope.leave_block(&*self.lexer.strings);
        result.map_err(|e| self.scope_error(e))
    }

    // ---- Token helpers ----

    fn current_token(&self) -> Result<&Token, CompileError> {
        self.lexer
            .current()
            .map(|st| &st.token)
            .map_err(|e| e.clone().with_chunk(&self.chunk).into())
    }

    fn check(&self, expected: &Token) -> bool {
        self.current_token().map(|t| t == expected).unwrap_or(false)
    }

    /// The token after the current one is `=`.
    fn peek_is_assign(&mut self) -> bool {
        matches!(self.lexer.peek_next(), Ok(Token::Assign))
    }

    fn advance(&mut self) -> Result<SpannedToken, CompileError> {
        self.lexer
            .advance()
            .map_err(|e| e.with_chunk(&self.chunk).into())
    }

    fn test_next(&mut self, expected: &Token) -> Result<bool, CompileError> {
        if self.check(expected) {
            self.advance()?;
            Ok(true)
        } else {
            self.current_token()?;
            Ok(false)
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), CompileError> {
        self.current_token()?;
        if self.check(expected) {
            self.advance()?;
            Ok(())
        } else {
            Err(self.error(format!("'{expected}' expected")))
        }
    }

    /// Expect the token closing a construct opened by `who` at `line`.
    fn check_match(&mut self, what: &Token, who: &Token, line: u32) -> Result<(), CompileError> {
        self.current_token()?;
        if self.check(what) {
            self.advance()?;
            return Ok(());
        }
        if line == self.line() {
            Err(self.error(format!("'{what}' expected")))
        } else {
            Err(self.error(format!(
                "'{what}' expected (to close '{who}' at line {line})"
            )))
        }
    }

    fn expect_name(&mut self) -> Result<StringId, CompileError> {
        match self.current_token()? {
            Token::Name(id) => {
                let id = *id;
                self.advance()?;
                Ok(id)
            }
            _ => Err(self.error("<name> expected")),
        }
    }

    fn require_version(&self, needed: LuaVersion, what: &str) -> Result<(), CompileError> {
        if self.version.at_least(needed) {
            Ok(())
        } else {
            Err(self.semantic_error(format!(
                "{what} requires {needed}+ compatibility (current: {})",
                self.version
            )))
        }
    }

    fn expr(&self, kind: ExprKind, span: Span) -> Expr {
        Expr::new(kind, span)
    }
}
