#![no_main]

use libfuzzer_sys::fuzz_target;
use lunette_compiler::lexer::Lexer;
use lunette_compiler::token::Token;
use lunette_core::string::StringInterner;

// Errors are fine; panics are bugs.
fuzz_target!(|data: &[u8]| {
    let mut strings = StringInterner::new();
    let mut lexer = Lexer::new(data, &mut strings);
    while let Ok(tok) = lexer.advance() {
        if tok.token == Token::Eof {
            break;
        }
    }
});
