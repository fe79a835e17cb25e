//! Lunette compiler: lexer, scope resolver, parser and stack-machine bytecode
//! emitter for Lua 5.2 to 5.4 source.
//!
//! [`compile`] is the entry point. Compilation happens in two passes: the
//! parser builds a syntax tree with every name already resolved, then the
//! emitter lowers it to a [`proto::Proto`] tree.

pub mod ast;
pub mod disasm;
mod emit;
pub mod error;
pub mod lexer;
pub mod opcode;
pub mod options;
mod parser;
pub mod proto;
pub mod scope;
pub mod token;

pub use error::{CompileError, SyntaxError};
pub use options::{CompileOptions, LuaVersion};
pub use proto::Proto;

use lunette_core::string::StringInterner;
use parser::Parser;

/// Compile a chunk (or a dynamic expression, per `options`) to a prototype.
///
/// Strings are interned into `strings`, which must be the interner of the
/// VM that will run the result.
#[tracing::instrument(level = "debug", skip_all, fields(chunk = %options.chunk_name))]
pub fn compile(
    source: &[u8],
    options: &CompileOptions,
    strings: &mut StringInterner,
) -> Result<Proto, CompileError> {
    let chunk = options.display_chunk_name();
    let parser = Parser::new(source, options, strings);
    let def = if options.dynamic_expression {
        parser.parse_expression_chunk()?
    } else {
        parser.parse_chunk()?
    };
    let proto = emit::emit_function(&def, &chunk)?;
    tracing::debug!(
        instructions = proto.code.len(),
        functions = proto.count_protos(),
        "compiled"
    );
    Ok(proto)
}
