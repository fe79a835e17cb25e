//! Lua runtime error types.

use lunette_compiler::{CompileError, SyntaxError};
use lunette_core::string::StringInterner;
use lunette_core::value::Value;
use thiserror::Error;

/// An error raised while loading or running Lua code.
#[derive(Clone, Debug, Error)]
pub enum LuaError {
    /// A script-level error. `message` is the display text (already carrying
    /// its `chunk:line:` prefix when one applies); `value` is the raw Lua
    /// error value as seen by `pcall`.
    #[error("{message}")]
    Runtime {
        message: String,
        value: Value,
        traceback: Option<String>,
    },
    /// A chunk passed to `load` failed to compile.
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    /// A VM invariant was broken. Always a bug.
    #[error("internal error: {0}")]
    Internal(String),
    /// Too many nested Lua calls.
    #[error("stack overflow")]
    StackOverflow,
    /// Failure while evaluating a dynamic expression.
    #[error("<dynamic>: {0}")]
    Dynamic(String),
}

impl LuaError {
    /// A runtime error whose value is a plain string.
    pub fn runtime(message: impl Into<String>, strings: &mut StringInterner) -> Self {
        let message = message.into();
        let id = strings.intern(message.as_bytes());
        LuaError::Runtime {
            message,
            value: Value::String(id),
            traceback: None,
        }
    }

    /// A runtime error carrying an arbitrary Lua value (`error({})`).
    pub fn from_value(value: Value, strings: &StringInterner) -> Self {
        let message = match value {
            Value::String(id) => strings.get_str(id).into_owned(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => lunette_core::number::format_float(f),
            Value::Nil => "nil".to_string(),
            other => format!("(error object is a {} value)", other.type_name()),
        };
        LuaError::Runtime {
            message,
            value,
            traceback: None,
        }
    }

    /// The value a protected call hands back as its second result.
    pub fn to_value(&self, strings: &mut StringInterner) -> Value {
        match self {
            LuaError::Runtime { value, .. } => *value,
            LuaError::Syntax(e) => Value::String(strings.intern(e.to_string().as_bytes())),
            LuaError::Internal(msg) => {
                Value::String(strings.intern(format!("internal error: {msg}").as_bytes()))
            }
            LuaError::StackOverflow => Value::String(strings.intern(b"stack overflow")),
            LuaError::Dynamic(msg) => Value::String(strings.intern(msg.as_bytes())),
        }
    }

    pub fn traceback(&self) -> Option<&str> {
        match self {
            LuaError::Runtime { traceback, .. } => traceback.as_deref(),
            _ => None,
        }
    }

    pub(crate) fn with_traceback(mut self, text: String) -> Self {
        if let LuaError::Runtime { traceback, .. } = &mut self {
            if traceback.is_none() {
                *traceback = Some(text);
            }
        }
        self
    }

    /// True for errors a protected call may intercept.
    pub fn is_catchable(&self) -> bool {
        !matches!(self, LuaError::Internal(_))
    }
}

impl From<CompileError> for LuaError {
    fn from(e: CompileError) -> Self {
        match e {
            CompileError::Syntax(s) => LuaError::Syntax(s),
            CompileError::Internal(msg) => LuaError::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_value_is_string() {
        let mut strings = StringInterner::new();
        let e = LuaError::runtime("test:1: boom", &mut strings);
        assert_eq!(e.to_string(), "test:1: boom");
        let v = e.to_value(&mut strings);
        assert_eq!(strings.get_str(v.as_string_id().unwrap()), "test:1: boom");
    }

    #[test]
    fn test_non_string_value_message() {
        let mut strings = StringInterner::new();
        let e = LuaError::from_value(Value::Boolean(true), &strings);
        assert_eq!(e.to_string(), "(error object is a boolean value)");
        assert_eq!(e.to_value(&mut strings), Value::Boolean(true));
    }

    #[test]
    fn test_stack_overflow_value() {
        let mut strings = StringInterner::new();
        let v = LuaError::StackOverflow.to_value(&mut strings);
        assert_eq!(strings.get_str(v.as_string_id().unwrap()), "stack overflow");
    }

    #[test]
    fn test_dynamic_prefix() {
        assert_eq!(
            LuaError::Dynamic("attempt to index a nil value".into()).to_string(),
            "<dynamic>: attempt to index a nil value"
        );
    }
}
