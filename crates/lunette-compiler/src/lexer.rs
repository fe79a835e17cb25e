use crate::error::SyntaxError;
use crate::token::{Span, SpannedToken, Token};
use lunette_core::number::{parse_decimal, parse_hex};
use lunette_core::string::StringInterner;
use lunette_core::value::Value;

/// Pull-based lexer. Interns names and string literals into the shared interner.
pub struct Lexer<'a, 's> {
    source: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
    current: Result<SpannedToken, SyntaxError>,
    /// One token of lookahead with its source text.
    lookahead: Option<(Result<SpannedToken, SyntaxError>, String)>,
    pub strings: &'s mut StringInterner,
    /// Source text of the current token, for "near '...'" messages.
    pub token_text: String,
    /// Line of the last consumed token.
    pub last_line: u32,
}

impl<'a, 's> Lexer<'a, 's> {
    pub fn new(source: &'a [u8], strings: &'s mut StringInterner) -> Self {
        let mut lexer = Lexer {
            source,
            pos: 0,
            line: 1,
            column: 1,
            current: Ok(SpannedToken {
                token: Token::Eof,
                span: Span::point(1, 1),
            }),
            lookahead: None,
            strings,
            token_text: String::new(),
            last_line: 1,
        };
        lexer.skip_shebang();
        lexer.current = lexer.scan_token();
        lexer
    }

    /// Peek at the current token without consuming.
    pub fn current(&self) -> Result<&SpannedToken, &SyntaxError> {
        self.current.as_ref()
    }

    /// Consume the current token and advance to the next one.
    pub fn advance(&mut self) -> Result<SpannedToken, SyntaxError> {
        if let Ok(tok) = &self.current {
            self.last_line = tok.span.end_line;
            if tok.token == Token::Eof {
                return Ok(tok.clone());
            }
        }
        let next = match self.lookahead.take() {
            Some((tok, text)) => {
                self.token_text = text;
                tok
            }
            None => self.scan_token(),
        };
        std::mem::replace(&mut self.current, next)
    }

    /// Peek at the token after the current one.
    pub fn peek_next(&mut self) -> Result<&Token, &SyntaxError> {
        if self.lookahead.is_none() {
            let saved = std::mem::take(&mut self.token_text);
            let tok = self.scan_token();
            let text = std::mem::replace(&mut self.token_text, saved);
            self.lookahead = Some((tok, text));
        }
        match &self.lookahead {
            Some((tok, _)) => tok.as_ref().map(|t| &t.token),
            None => Ok(&Token::Eof),
        }
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    // ---- Character handling ----

    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.source.get(self.pos + offset).copied()
    }

    fn advance_char(&mut self) -> Option<u8> {
        let ch = self.peek()?;
        self.pos += 1;
        match ch {
            // "\n\r" and "\r\n" each count as a single line break.
            b'\n' | b'\r' => {
                let other = if ch == b'\n' { b'\r' } else { b'\n' };
                if self.peek() == Some(other) {
                    self.pos += 1;
                }
                self.line += 1;
                self.column = 1;
            }
            _ => self.column += 1,
        }
        Some(ch)
    }

    fn here(&self) -> Span {
        Span::point(self.line, self.column)
    }

    /// Span from `start` up to (and including) the last consumed character.
    fn span_from(&self, start: Span) -> Span {
        Span {
            end_line: self.line,
            end_column: self.column.saturating_sub(1).max(start.column),
            ..start
        }
    }

    fn skip_shebang(&mut self) {
        if self.source.first() == Some(&b'#') {
            while let Some(ch) = self.peek() {
                if ch == b'\n' || ch == b'\r' {
                    break;
                }
                self.advance_char();
            }
        }
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), SyntaxError> {
        loop {
            while self.peek().is_some_and(is_space) {
                self.advance_char();
            }
            if self.peek() != Some(b'-') || self.peek_at(1) != Some(b'-') {
                return Ok(());
            }
            let start = self.here();
            self.advance_char();
            self.advance_char();
            if let Some(level) = self.check_long_bracket() {
                self.skip_long_bracket_open(level);
                self.scan_long_string_content(level, start, "comment")?;
                continue;
            }
            while let Some(ch) = self.peek() {
                if ch == b'\n' || ch == b'\r' {
                    break;
                }
                self.advance_char();
            }
        }
    }

    /// If the input is at `[=*[`, return its level.
    fn check_long_bracket(&self) -> Option<usize> {
        if self.peek() != Some(b'[') {
            return None;
        }
        let mut level = 0;
        while self.peek_at(level + 1) == Some(b'=') {
            level += 1;
        }
        (self.peek_at(level + 1) == Some(b'[')).then_some(level)
    }

    fn skip_long_bracket_open(&mut self, level: usize) {
        for _ in 0..level + 2 {
            self.advance_char();
        }
    }

    // ---- Tokens ----

    fn scan_token(&mut self) -> Result<SpannedToken, SyntaxError> {
        self.skip_whitespace_and_comments()?;
        let start_pos = self.pos;
        let result = self.scan_token_inner();
        self.token_text = if self.pos > start_pos {
            String::from_utf8_lossy(&self.source[start_pos..self.pos]).into_owned()
        } else {
            "<eof>".to_string()
        };
        result
    }

    fn single(&mut self, token: Token, start: Span) -> Result<SpannedToken, SyntaxError> {
        self.advance_char();
        Ok(SpannedToken {
            token,
            span: self.span_from(start),
        })
    }

    /// One- or two-character operator: `first` alone, or `second` if followed by `next`.
    fn pair(
        &mut self,
        next: u8,
        second: Token,
        first: Token,
        start: Span,
    ) -> Result<SpannedToken, SyntaxError> {
        self.advance_char();
        let token = if self.peek() == Some(next) {
            self.advance_char();
            second
        } else {
            first
        };
        Ok(SpannedToken {
            token,
            span: self.span_from(start),
        })
    }

    fn scan_token_inner(&mut self) -> Result<SpannedToken, SyntaxError> {
        let start = self.here();
        let Some(ch) = self.peek() else {
            return Ok(SpannedToken {
                token: Token::Eof,
                span: start,
            });
        };

        match ch {
            b'+' => self.single(Token::Plus, start),
            b'-' => self.single(Token::Minus, start),
            b'*' => self.single(Token::Star, start),
            b'^' => self.single(Token::Caret, start),
            b'%' => self.single(Token::Percent, start),
            b'&' => self.single(Token::Ampersand, start),
            b'|' => self.single(Token::Pipe, start),
            b'#' => self.single(Token::Hash, start),
            b'(' => self.single(Token::LParen, start),
            b')' => self.single(Token::RParen, start),
            b'{' => self.single(Token::LBrace, start),
            b'}' => self.single(Token::RBrace, start),
            b']' => self.single(Token::RBracket, start),
            b';' => self.single(Token::Semi, start),
            b',' => self.single(Token::Comma, start),
            b'/' => self.pair(b'/', Token::FloorDiv, Token::Slash, start),
            b'=' => self.pair(b'=', Token::Equal, Token::Assign, start),
            b'~' => self.pair(b'=', Token::NotEqual, Token::Tilde, start),
            b':' => self.pair(b':', Token::DoubleColon, Token::Colon, start),
            b'<' => match self.peek_at(1) {
                Some(b'<') => self.pair(b'<', Token::ShiftLeft, Token::Less, start),
                _ => self.pair(b'=', Token::LessEq, Token::Less, start),
            },
            b'>' => match self.peek_at(1) {
                Some(b'>') => self.pair(b'>', Token::ShiftRight, Token::Greater, start),
                _ => self.pair(b'=', Token::GreaterEq, Token::Greater, start),
            },
            b'.' => {
                if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
                    return self.scan_number(start);
                }
                self.advance_char();
                let token = if self.peek() == Some(b'.') {
                    self.advance_char();
                    if self.peek() == Some(b'.') {
                        self.advance_char();
                        Token::DotDotDot
                    } else {
                        Token::DotDot
                    }
                } else {
                    Token::Dot
                };
                Ok(SpannedToken {
                    token,
                    span: self.span_from(start),
                })
            }
            b'[' => match self.check_long_bracket() {
                Some(level) => {
                    self.skip_long_bracket_open(level);
                    let content = self.scan_long_string_content(level, start, "string")?;
                    let id = self.strings.intern(&content);
                    Ok(SpannedToken {
                        token: Token::String(id),
                        span: self.span_from(start),
                    })
                }
                None => self.single(Token::LBracket, start),
            },
            b'"' | b'\'' => self.scan_short_string(start),
            b'0'..=b'9' => self.scan_number(start),
            _ if is_ident_start(ch) => self.scan_name(start),
            _ => {
                self.advance_char();
                let near = if ch.is_ascii_graphic() {
                    format!("'{}'", ch as char)
                } else {
                    format!("'<\\{ch}>'")
                };
                Err(SyntaxError::new(
                    format!("unexpected symbol near {near}"),
                    start,
                ))
            }
        }
    }

    fn scan_name(&mut self, start: Span) -> Result<SpannedToken, SyntaxError> {
        let begin = self.pos;
        while self.peek().is_some_and(is_ident_continue) {
            self.advance_char();
        }
        let name = &self.source[begin..self.pos];
        let token = match Token::keyword_from_str(name) {
            Some(keyword) => keyword,
            None => Token::Name(self.strings.intern(name)),
        };
        Ok(SpannedToken {
            token,
            span: self.span_from(start),
        })
    }

    /// Read a numeral the way Lua does: greedily take hex digits, dots and
    /// signed exponents, plus one touching letter to force an error, then
    /// convert the whole text.
    fn scan_number(&mut self, start: Span) -> Result<SpannedToken, SyntaxError> {
        let begin = self.pos;
        let is_hex = self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X'));
        let exponent: &[u8] = if is_hex { b"Pp" } else { b"Ee" };
        if is_hex {
            self.advance_char();
            self.advance_char();
        }
        loop {
            match self.peek() {
                Some(c) if exponent.contains(&c) => {
                    self.advance_char();
                    if matches!(self.peek(), Some(b'+' | b'-')) {
                        self.advance_char();
                    }
                }
                Some(c) if c.is_ascii_hexdigit() || c == b'.' => {
                    self.advance_char();
                }
                _ => break,
            }
        }
        if self.peek().is_some_and(|c| c.is_ascii_alphabetic() || c == b'_') {
            self.advance_char();
        }

        let text = &self.source[begin..self.pos];
        let value = if is_hex {
            parse_hex(&text[2..])
        } else {
            parse_decimal(text)
        };
        let span = self.span_from(start);
        match value {
            Some(Value::Integer(i)) => Ok(SpannedToken {
                token: Token::Integer(i),
                span,
            }),
            Some(Value::Float(f)) => Ok(SpannedToken {
                token: Token::Float(f),
                span,
            }),
            _ => {
                let offset = valid_numeral_prefix(text, is_hex);
                let bad_column = start.column + offset as u32;
                let text = String::from_utf8_lossy(text);
                Err(SyntaxError::new(
                    format!("malformed number near '{text}'"),
                    Span {
                        line: start.line,
                        column: bad_column,
                        end_line: start.line,
                        end_column: bad_column,
                    },
                ))
            }
        }
    }

    /// The quoted prefix of the string being scanned, for error messages.
    fn string_near(&self, begin: usize, include_current: bool) -> String {
        let end = if include_current {
            (self.pos + 1).min(self.source.len())
        } else {
            self.pos
        };
        let raw = &self.source[begin..end];
        let raw = &raw[..raw.len().min(60)];
        format!("'{}'", String::from_utf8_lossy(raw))
    }

    fn escape_error(&self, message: &str, begin: usize, start: Span) -> SyntaxError {
        SyntaxError::new(
            format!("{message} near {}", self.string_near(begin, true)),
            self.span_from(start),
        )
    }

    fn scan_short_string(&mut self, start: Span) -> Result<SpannedToken, SyntaxError> {
        let begin = self.pos;
        let quote = self.peek().unwrap_or(b'"');
        self.advance_char();
        let mut buf = Vec::new();

        loop {
            let Some(ch) = self.peek() else {
                return Err(SyntaxError::premature(
                    "unfinished string near <eof>",
                    self.span_from(start),
                ));
            };
            match ch {
                b'\n' | b'\r' => {
                    return Err(SyntaxError::new(
                        format!("unfinished string near {}", self.string_near(begin, false)),
                        self.span_from(start),
                    ));
                }
                _ if ch == quote => {
                    self.advance_char();
                    break;
                }
                b'\\' => {
                    self.advance_char();
                    self.scan_escape(&mut buf, begin, start)?;
                }
                _ => {
                    self.advance_char();
                    buf.push(ch);
                }
            }
        }

        let id = self.strings.intern(&buf);
        Ok(SpannedToken {
            token: Token::String(id),
            span: self.span_from(start),
        })
    }

    fn scan_escape(&mut self, buf: &mut Vec<u8>, begin: usize, start: Span) -> Result<(), SyntaxError> {
        let Some(ch) = self.peek() else {
            return Err(SyntaxError::premature(
                "unfinished string near <eof>",
                self.span_from(start),
            ));
        };
        let simple = match ch {
            b'a' => Some(0x07),
            b'b' => Some(0x08),
            b'f' => Some(0x0C),
            b'n' => Some(b'\n'),
            b'r' => Some(b'\r'),
            b't' => Some(b'\t'),
            b'v' => Some(0x0B),
            b'\\' => Some(b'\\'),
            b'\'' => Some(b'\''),
            b'"' => Some(b'"'),
            b'\n' | b'\r' => Some(b'\n'),
            _ => None,
        };
        if let Some(byte) = simple {
            self.advance_char();
            buf.push(byte);
            return Ok(());
        }

        match ch {
            b'x' => {
                self.advance_char();
                let mut byte = 0u8;
                for _ in 0..2 {
                    match self.peek() {
                        Some(d) if d.is_ascii_hexdigit() => {
                            self.advance_char();
                            byte = (byte << 4) | hex_value(d);
                        }
                        _ => return Err(self.escape_error("hexadecimal digit expected", begin, start)),
                    }
                }
                buf.push(byte);
            }
            b'u' => {
                self.advance_char();
                if self.peek() != Some(b'{') {
                    return Err(self.escape_error("missing '{' in \\u{xxxx}", begin, start));
                }
                self.advance_char();
                let mut code: u64 = 0;
                let mut digits = 0;
                loop {
                    match self.peek() {
                        Some(b'}') if digits > 0 => {
                            self.advance_char();
                            break;
                        }
                        Some(d) if d.is_ascii_hexdigit() => {
                            self.advance_char();
                            code = code * 16 + hex_value(d) as u64;
                            digits += 1;
                            if code > 0x7FFF_FFFF {
                                return Err(self.escape_error("UTF-8 value too large", begin, start));
                            }
                        }
                        _ if digits == 0 => {
                            return Err(self.escape_error("hexadecimal digit expected", begin, start))
                        }
                        _ => return Err(self.escape_error("missing '}' in \\u{xxxx}", begin, start)),
                    }
                }
                encode_utf8_lua(code as u32, buf);
            }
            b'z' => {
                self.advance_char();
                while self.peek().is_some_and(is_space) {
                    self.advance_char();
                }
            }
            b'0'..=b'9' => {
                let mut value: u32 = 0;
                for _ in 0..3 {
                    match self.peek() {
                        Some(d) if d.is_ascii_digit() => {
                            self.advance_char();
                            value = value * 10 + (d - b'0') as u32;
                        }
                        _ => break,
                    }
                }
                if value > 255 {
                    return Err(SyntaxError::new(
                        format!("decimal escape too large near {}", self.string_near(begin, false)),
                        self.span_from(start),
                    ));
                }
                buf.push(value as u8);
            }
            _ => return Err(self.escape_error("invalid escape sequence", begin, start)),
        }
        Ok(())
    }

    /// Content of a long bracket after its opening `[=*[`, up to the matching close.
    fn scan_long_string_content(
        &mut self,
        level: usize,
        start: Span,
        what: &str,
    ) -> Result<Vec<u8>, SyntaxError> {
        let mut buf = Vec::new();
        // A newline right after the opening bracket is skipped.
        if matches!(self.peek(), Some(b'\n' | b'\r')) {
            self.advance_char();
        }
        loop {
            match self.peek() {
                None => {
                    return Err(SyntaxError::premature(
                        format!("unfinished long {what} near <eof>"),
                        self.span_from(start),
                    ));
                }
                Some(b']') if self.check_closing_long_bracket(level) => {
                    for _ in 0..level + 2 {
                        self.advance_char();
                    }
                    return Ok(buf);
                }
                Some(b'\n' | b'\r') => {
                    self.advance_char();
                    buf.push(b'\n');
                }
                Some(ch) => {
                    self.advance_char();
                    buf.push(ch);
                }
            }
        }
    }

    fn check_closing_long_bracket(&self, level: usize) -> bool {
        (1..=level).all(|i| self.peek_at(i) == Some(b'=')) && self.peek_at(level + 1) == Some(b']')
    }
}

fn is_space(ch: u8) -> bool {
    matches!(ch, b' ' | b'\t' | b'\n' | b'\r' | 0x0B | 0x0C)
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_continue(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_'
}

fn hex_value(ch: u8) -> u8 {
    (ch as char).to_digit(16).unwrap_or(0) as u8
}

/// Length of the longest well-formed prefix of a numeral; the byte after it
/// is the one reported as offending.
fn valid_numeral_prefix(text: &[u8], is_hex: bool) -> usize {
    let digit = |c: u8| if is_hex { c.is_ascii_hexdigit() } else { c.is_ascii_digit() };
    let exponent: &[u8] = if is_hex { b"Pp" } else { b"Ee" };
    let mut i = if is_hex { 2 } else { 0 };
    let mut digits = 0;
    while i < text.len() && digit(text[i]) {
        i += 1;
        digits += 1;
    }
    if i < text.len() && text[i] == b'.' {
        i += 1;
        while i < text.len() && digit(text[i]) {
            i += 1;
            digits += 1;
        }
    }
    if digits == 0 {
        return i.min(text.len());
    }
    if i < text.len() && exponent.contains(&text[i]) {
        let mut j = i + 1;
        if j < text.len() && (text[j] == b'+' || text[j] == b'-') {
            j += 1;
        }
        let exp_digits = text[j..].iter().take_while(|c| c.is_ascii_digit()).count();
        if exp_digits > 0 {
            i = j + exp_digits;
        } else {
            return j.min(text.len());
        }
    }
    i
}

/// UTF-8 encoding extended to 6 bytes for values up to 0x7FFFFFFF, as Lua allows.
fn encode_utf8_lua(code: u32, buf: &mut Vec<u8>) {
    if code < 0x80 {
        buf.push(code as u8);
        return;
    }
    let mut tail = Vec::with_capacity(5);
    let mut rest = code;
    let mut first_max = 0x3Fu32;
    while rest > first_max {
        tail.push(0x80 | (rest & 0x3F) as u8);
        rest >>= 6;
        first_max >>= 1;
    }
    let lead_mask = !((first_max << 1) | 1) & 0xFF;
    buf.push((lead_mask as u8) | rest as u8);
    buf.extend(tail.iter().rev());
}
