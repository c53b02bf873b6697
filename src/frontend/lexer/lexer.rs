//! The lexer.
//!
//! Consumes the preprocessed translation unit and maintains a single
//! look-ahead token plus a one-token push-back queue for the parser.
//! Whitespace and `#line`/`#pragma` directives are skipped between tokens;
//! `#line` updates the current filename and line counter. Comments never
//! appear here, the preprocessor already stripped them.

use crate::common::error::{Category, CResult, Diagnostic, Location};
use crate::common::intern::{Name, StringPool};
use super::token::{Token, TokenKind, TokenRef};

const PUNCTUATION: &[u8] = b"+-*/%&|^!~<>=()[]{}.?:,;";

pub struct Lexer {
    input: Vec<u8>,
    pos: usize,
    /// The look-ahead character; -1 at end of input.
    cur: i32,
    /// True when only whitespace has been seen since the last newline.
    /// Directives are only legal in that position.
    at_line_start: bool,
    pub pool: StringPool,
    filename: Name,
    line: u32,
    buffer: Vec<u8>,
    /// The look-ahead token.
    token: TokenRef,
    /// A single pushed-back token, served before lexing continues.
    queued: Option<TokenRef>,
}

impl Lexer {
    /// Creates a lexer over the raw bytes of a `.i` file and primes the
    /// first look-ahead token.
    pub fn new(input: Vec<u8>, filename: &str) -> CResult<Self> {
        let mut pool = StringPool::new();
        let filename = pool.intern(filename);
        let empty = pool.intern("");
        let token = Token::new(TokenKind::End, empty, filename.clone(), 1);
        let mut lexer = Self {
            input,
            pos: 0,
            cur: 0,
            at_line_start: true,
            pool,
            filename,
            line: 1,
            buffer: Vec::new(),
            token,
            queued: None,
        };
        lexer.read_char();
        lexer.consume()?;
        Ok(lexer)
    }

    fn read_char(&mut self) -> i32 {
        if self.pos < self.input.len() {
            self.cur = self.input[self.pos] as i32;
            self.pos += 1;
        } else {
            self.cur = -1;
        }
        self.cur
    }

    fn fatal(&self, message: impl Into<String>) -> Box<Diagnostic> {
        Box::new(Diagnostic::new(Category::Lex, message).with_location(Location {
            file: self.filename.as_str().to_string(),
            line: self.line,
            token: None,
        }))
    }

    // === Token access ===

    /// The current look-ahead token.
    pub fn token(&self) -> &TokenRef {
        &self.token
    }

    /// Returns the current token and advances to the next one.
    pub fn take(&mut self) -> CResult<TokenRef> {
        let token = self.token.clone();
        self.consume()?;
        Ok(token)
    }

    /// Pushes a token back. At most one token can be queued.
    pub fn push(&mut self, token: TokenRef) -> CResult<()> {
        if self.queued.is_some() {
            return Err(Box::new(Diagnostic::new(
                Category::Internal,
                "at most one token can be queued in the lexer",
            )));
        }
        self.queued = Some(std::mem::replace(&mut self.token, token));
        Ok(())
    }

    /// True if the current token is the given alphanumeric or punctuation.
    pub fn is(&self, text: &str) -> bool {
        matches!(
            self.token.kind,
            TokenKind::Alphanumeric | TokenKind::Punctuation
        ) && self.token.value.as_str() == text
    }

    /// Consumes the current token and returns true if it matches.
    pub fn accept(&mut self, text: &str) -> CResult<bool> {
        if !self.is(text) {
            return Ok(false);
        }
        self.consume()?;
        Ok(true)
    }

    /// Fails with `message` unless the current token matches, then consumes.
    pub fn expect(&mut self, text: &str, message: &str) -> CResult<()> {
        if !self.is(text) {
            return Err(Box::new(
                Diagnostic::new(Category::Parse, message).with_location(self.token.location()),
            ));
        }
        self.consume()
    }

    /// Prints the remaining token stream, for `--dump-tokens`.
    pub fn dump_tokens(&mut self) -> CResult<()> {
        while !self.token.is_end() {
            let kind = match self.token.kind {
                TokenKind::Alphanumeric => "alnum",
                TokenKind::Number => "number",
                TokenKind::Character => "char",
                TokenKind::String => "string",
                TokenKind::Punctuation => "punct",
                TokenKind::End => "end",
            };
            println!("    token {:<6} {}", kind, self.token.value);
            self.consume()?;
        }
        Ok(())
    }

    // === Lexing ===

    /// Advances to the next token.
    pub fn consume(&mut self) -> CResult<()> {
        if let Some(queued) = self.queued.take() {
            self.token = queued;
            return Ok(());
        }

        self.skip_whitespace_and_directives()?;

        let line = self.line;
        if self.cur == -1 {
            let empty = self.pool.intern("");
            self.token = Token::new(TokenKind::End, empty, self.filename.clone(), line);
            return Ok(());
        }

        let c = self.cur as u8;
        self.buffer.clear();

        if is_alphanumeric(self.cur, true) {
            while is_alphanumeric(self.cur, false) {
                self.buffer.push(self.cur as u8);
                self.read_char();
            }
            if self.cur == '"' as i32 || self.cur == '\'' as i32 {
                return Err(self.fatal(
                    "string and character literal prefixes are not supported",
                ));
            }
            self.finish_token(TokenKind::Alphanumeric, line);
            return Ok(());
        }

        if c == b'"' {
            self.consume_string_literal()?;
            self.finish_token(TokenKind::String, line);
            return Ok(());
        }

        if c == b'\'' {
            self.consume_char_literal()?;
            self.finish_token(TokenKind::Character, line);
            return Ok(());
        }

        if c.is_ascii_digit() {
            self.consume_number();
            self.finish_token(TokenKind::Number, line);
            return Ok(());
        }

        if PUNCTUATION.contains(&c) {
            self.consume_punctuation()?;
            self.finish_token(TokenKind::Punctuation, line);
            return Ok(());
        }

        Err(self.fatal(format!("unexpected character: `{}`", c as char)))
    }

    fn finish_token(&mut self, kind: TokenKind, line: u32) {
        let text = String::from_utf8_lossy(&self.buffer).into_owned();
        let value = self.pool.intern(&text);
        self.token = Token::new(kind, value, self.filename.clone(), line);
    }

    fn is_end_of_line(&self) -> bool {
        self.cur == '\n' as i32 || self.cur == '\r' as i32 || self.cur == -1
    }

    fn consume_end_of_line(&mut self) -> CResult<()> {
        if self.cur == '\n' as i32 {
            self.line += 1;
            self.read_char();
            return Ok(());
        }
        if self.cur == '\r' as i32 {
            if self.read_char() != '\n' as i32 {
                return Err(self.fatal("lone carriage return in input"));
            }
            self.line += 1;
            self.read_char();
            return Ok(());
        }
        if self.cur == -1 {
            return Ok(());
        }
        Err(self.fatal("expected end of line"))
    }

    fn skip_whitespace(&mut self) -> CResult<()> {
        while self.cur != -1 && (self.cur as u8 as char).is_ascii_whitespace() {
            if self.cur == '\n' as i32 || self.cur == '\r' as i32 {
                self.consume_end_of_line()?;
                self.at_line_start = true;
            } else {
                self.read_char();
            }
        }
        Ok(())
    }

    fn skip_whitespace_and_directives(&mut self) -> CResult<()> {
        loop {
            self.skip_whitespace()?;
            if self.cur != '#' as i32 {
                break;
            }
            if !self.at_line_start {
                return Err(self.fatal(
                    "a `#` preprocessor directive can only appear at the start of a line",
                ));
            }
            self.parse_directive()?;
        }
        self.at_line_start = false;
        Ok(())
    }

    fn skip_horizontal_whitespace(&mut self) {
        while self.cur == ' ' as i32 || self.cur == '\t' as i32 {
            self.read_char();
        }
    }

    fn expect_horizontal_whitespace(&mut self) -> CResult<()> {
        if self.cur != ' ' as i32 && self.cur != '\t' as i32 {
            return Err(self.fatal("expected whitespace in directive"));
        }
        self.skip_horizontal_whitespace();
        Ok(())
    }

    fn parse_directive(&mut self) -> CResult<()> {
        debug_assert_eq!(self.cur, '#' as i32);
        self.read_char();
        self.skip_horizontal_whitespace();

        let mut command = String::new();
        while self.cur != -1 && (self.cur as u8).is_ascii_alphabetic() {
            command.push(self.cur as u8 as char);
            self.read_char();
        }

        if command == "line" {
            return self.handle_line_directive();
        }

        // #pragma and anything unknown is skipped to the end of the line.
        while !self.is_end_of_line() {
            self.read_char();
        }
        Ok(())
    }

    fn handle_line_directive(&mut self) -> CResult<()> {
        self.expect_horizontal_whitespace()?;

        if self.cur == -1 || !(self.cur as u8).is_ascii_digit() {
            return Err(self.fatal("expected line number after #line"));
        }
        let mut line: u64 = 0;
        while self.cur != -1 && (self.cur as u8).is_ascii_digit() {
            line = line * 10 + (self.cur as u64 - '0' as u64);
            if line > u32::MAX as u64 {
                return Err(self.fatal("line number in #line directive is out of range"));
            }
            self.read_char();
        }
        // Off by one: the newline ending the directive increments it.
        self.line = (line as u32).wrapping_sub(1);

        if self.is_end_of_line() {
            return Ok(());
        }
        self.expect_horizontal_whitespace()?;
        if self.is_end_of_line() {
            return Ok(());
        }

        if self.cur != '"' as i32 {
            return Err(self.fatal("filename in #line directive must be double-quoted"));
        }
        self.consume_string_literal()?;
        let text = String::from_utf8_lossy(&self.buffer).into_owned();
        self.filename = self.pool.intern(&text);

        self.skip_horizontal_whitespace();
        if !self.is_end_of_line() {
            return Err(self.fatal("expected end of line after filename in #line directive"));
        }
        Ok(())
    }

    fn consume_escape_sequence(&mut self) -> CResult<u8> {
        let c = self.read_char();
        let byte = match c {
            c if c == 'a' as i32 => 0x07,
            c if c == 'b' as i32 => 0x08,
            c if c == 't' as i32 => b'\t',
            c if c == 'n' as i32 => b'\n',
            c if c == 'v' as i32 => 0x0b,
            c if c == 'f' as i32 => 0x0c,
            c if c == 'r' as i32 => b'\r',
            c if c == 'e' as i32 => 0x1b, // extension, not standard C
            c if c == '"' as i32 => b'"',
            c if c == '\'' as i32 => b'\'',
            c if c == '?' as i32 => b'?',
            c if c == '\\' as i32 => b'\\',
            c if c >= '0' as i32 && c <= '7' as i32 => {
                // Octal escape: up to three digits.
                let mut value = (c - '0' as i32) as u32;
                for _ in 0..2 {
                    let next = self.peek();
                    if !(next >= '0' as i32 && next <= '7' as i32) {
                        break;
                    }
                    self.read_char();
                    value = value * 8 + (self.cur as u32 - '0' as u32);
                }
                if value > 0xFF {
                    return Err(self.fatal("octal escape sequence out of range"));
                }
                value as u8
            }
            c if c == 'x' as i32 || c == 'X' as i32 => {
                return Err(self.fatal("hexadecimal escape sequences are not supported"));
            }
            c if c == 'u' as i32 || c == 'U' as i32 => {
                return Err(self.fatal("unicode escape sequences are not supported"));
            }
            _ => return Err(self.fatal("unrecognized escape sequence")),
        };
        Ok(byte)
    }

    fn peek(&self) -> i32 {
        if self.pos < self.input.len() {
            self.input[self.pos] as i32
        } else {
            -1
        }
    }

    fn consume_string_literal(&mut self) -> CResult<()> {
        debug_assert_eq!(self.cur, '"' as i32);
        self.buffer.clear();
        loop {
            let c = self.read_char();
            if c == '"' as i32 {
                self.read_char();
                return Ok(());
            }
            if self.is_end_of_line() {
                return Err(self.fatal("unclosed string literal"));
            }
            if c == '\\' as i32 {
                let byte = self.consume_escape_sequence()?;
                self.buffer.push(byte);
            } else {
                self.buffer.push(c as u8);
            }
        }
    }

    fn consume_char_literal(&mut self) -> CResult<()> {
        debug_assert_eq!(self.cur, '\'' as i32);
        let c = self.read_char();
        if c == '\'' as i32 {
            return Err(self.fatal("empty character literal is not allowed"));
        }
        if self.is_end_of_line() {
            return Err(self.fatal("unclosed character literal"));
        }
        let byte = if c == '\\' as i32 {
            self.consume_escape_sequence()?
        } else {
            c as u8
        };
        self.buffer.clear();
        self.buffer.push(byte);
        let closing = self.read_char();
        if self.is_end_of_line() {
            return Err(self.fatal("unclosed character literal"));
        }
        if closing != '\'' as i32 {
            return Err(self.fatal("only a single character is supported in a character literal"));
        }
        self.read_char();
        Ok(())
    }

    fn consume_number(&mut self) {
        // Glob digits, letters and dots. A sign directly after an exponent
        // letter also belongs to the number (1e+5, 0x1p-3).
        loop {
            let c = self.cur;
            if c != -1 && ((c as u8).is_ascii_alphanumeric() || c == '.' as i32) {
                self.buffer.push(c as u8);
                self.read_char();
                continue;
            }
            if (c == '+' as i32 || c == '-' as i32)
                && matches!(self.buffer.last(), Some(b'e' | b'E' | b'p' | b'P'))
            {
                self.buffer.push(c as u8);
                self.read_char();
                continue;
            }
            break;
        }
    }

    fn consume_punctuation(&mut self) -> CResult<()> {
        let c0 = self.cur as u8;
        self.buffer.push(c0);
        let c1 = self.read_char() as u8;

        let is_assign = self.cur != -1 && c1 == b'=' && b"+-*/%&|^!<>=".contains(&c0);
        let is_double = self.cur != -1 && c0 == c1 && b"+-&|<>".contains(&c0);
        let is_arrow = c0 == b'-' && c1 == b'>';
        let is_variadic = c0 == b'.' && c1 == b'.';

        if is_assign || is_double || is_arrow || is_variadic {
            self.buffer.push(c1);
            let c2 = self.read_char() as u8;

            // Three-character operators: <<=, >>= and ...
            let is_shift_assign = self.cur != -1 && c2 == b'=' && (c1 == b'<' || c1 == b'>');
            let is_ellipsis = self.cur != -1 && c2 == b'.' && c0 == b'.';
            if is_shift_assign || is_ellipsis {
                self.buffer.push(c2);
                self.read_char();
            }

            if self.buffer == b".." {
                return Err(self.fatal("`..` is not a valid token"));
            }
        }
        Ok(())
    }
}

fn is_alphanumeric(c: i32, first: bool) -> bool {
    if c < 0 {
        return false;
    }
    let c = c as u8;
    if first && c.is_ascii_digit() {
        return false;
    }
    // `$` is allowed as an extension for compatibility with GNU C.
    c.is_ascii_alphanumeric() || c == b'_' || c == b'$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_all(source: &str) -> Vec<(TokenKind, String)> {
        let mut lexer = Lexer::new(source.as_bytes().to_vec(), "test.i").unwrap();
        let mut tokens = Vec::new();
        while !lexer.token().is_end() {
            let token = lexer.take().unwrap();
            tokens.push((token.kind, token.value.as_str().to_string()));
        }
        tokens
    }

    #[test]
    fn basic_tokens() {
        let tokens = lex_all("int main(void) { return 42; }");
        let kinds: Vec<&str> = tokens.iter().map(|(_, v)| v.as_str()).collect();
        assert_eq!(
            kinds,
            ["int", "main", "(", "void", ")", "{", "return", "42", ";", "}"]
        );
        assert_eq!(tokens[0].0, TokenKind::Alphanumeric);
        assert_eq!(tokens[7].0, TokenKind::Number);
    }

    #[test]
    fn three_character_operators() {
        let tokens = lex_all("a <<= b >>= c ... d -> e");
        let values: Vec<&str> = tokens.iter().map(|(_, v)| v.as_str()).collect();
        assert_eq!(values, ["a", "<<=", "b", ">>=", "c", "...", "d", "->", "e"]);
    }

    #[test]
    fn compound_operators() {
        let tokens = lex_all("++ -- && || == != <= >= << >> += -=");
        for (kind, _) in &tokens {
            assert_eq!(*kind, TokenKind::Punctuation);
        }
        let values: Vec<&str> = tokens.iter().map(|(_, v)| v.as_str()).collect();
        assert_eq!(
            values,
            ["++", "--", "&&", "||", "==", "!=", "<=", ">=", "<<", ">>", "+=", "-="]
        );
    }

    #[test]
    fn string_escapes() {
        let tokens = lex_all(r#""a\tb\n\\\"\e\101""#);
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].0, TokenKind::String);
        assert_eq!(tokens[0].1, "a\tb\n\\\"\x1bA");
    }

    #[test]
    fn char_literal_is_one_byte() {
        let tokens = lex_all(r"'\n' 'x' '\0'");
        assert_eq!(tokens[0].1, "\n");
        assert_eq!(tokens[1].1, "x");
        assert_eq!(tokens[2].1, "\0");
    }

    #[test]
    fn line_directive_updates_location() {
        let source = "#line 10 \"other.c\"\nx";
        let mut lexer = Lexer::new(source.as_bytes().to_vec(), "test.i").unwrap();
        let token = lexer.take().unwrap();
        assert_eq!(token.value.as_str(), "x");
        assert_eq!(token.filename.as_str(), "other.c");
        assert_eq!(token.line, 10);
    }

    #[test]
    fn pragma_is_skipped() {
        let tokens = lex_all("#pragma once\n1");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].1, "1");
    }

    #[test]
    fn number_glob_includes_exponent_sign() {
        let tokens = lex_all("1e+5 0x1F 1.5 100ul");
        let values: Vec<&str> = tokens.iter().map(|(_, v)| v.as_str()).collect();
        assert_eq!(values, ["1e+5", "0x1F", "1.5", "100ul"]);
    }

    #[test]
    fn dot_dot_is_rejected() {
        let mut lexer = Lexer::new(b"a .. b".to_vec(), "test.i").unwrap();
        let mut result = Ok(());
        while !lexer.token().is_end() {
            result = lexer.consume();
            if result.is_err() {
                break;
            }
        }
        assert!(result.is_err());
    }

    #[test]
    fn pushback_restores_order() {
        let mut lexer = Lexer::new(b"a b c".to_vec(), "test.i").unwrap();
        let a = lexer.take().unwrap();
        assert!(lexer.is("b"));
        lexer.push(a).unwrap();
        assert!(lexer.is("a"));
        lexer.consume().unwrap();
        assert!(lexer.is("b"));
    }

    #[test]
    fn crlf_is_accepted() {
        let tokens = lex_all("a\r\nb");
        assert_eq!(tokens.len(), 2);
    }

    #[test]
    fn unterminated_string_is_fatal() {
        assert!(Lexer::new(b"\"abc".to_vec(), "t.i").is_err());
    }
}
