//! Tokens produced by the lexer.

use std::fmt;
use std::rc::Rc;

use crate::common::error::Location;
use crate::common::intern::Name;

/// The lexical class of a token.
///
/// The lexer does not distinguish keywords from identifiers, nor does it
/// parse numbers; both happen in the parser against the interned body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Keyword, identifier or type name: `[A-Za-z_$][A-Za-z0-9_$]*`.
    Alphanumeric,
    /// A number glob; digits, letters, `.`, and sign characters after an
    /// exponent letter. Interpreted by the parser.
    Number,
    /// A character literal, reduced to exactly one byte.
    Character,
    /// A string literal body with escapes already substituted.
    String,
    /// One- to three-character punctuation.
    Punctuation,
    /// End of input.
    End,
}

/// Literal prefixes (`L"..."`, `u8"..."`, ...). Parsed but unsupported;
/// kept so the diagnostic can name what it saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPrefix {
    None,
}

/// One token. Shared by reference between the lexer, the AST, symbols and
/// diagnostics, so source positions survive as long as anything needs them.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub value: Name,
    pub prefix: TokenPrefix,
    pub filename: Name,
    pub line: u32,
}

pub type TokenRef = Rc<Token>;

impl Token {
    pub fn new(kind: TokenKind, value: Name, filename: Name, line: u32) -> TokenRef {
        Rc::new(Token {
            kind,
            value,
            prefix: TokenPrefix::None,
            filename,
            line,
        })
    }

    pub fn is_end(&self) -> bool {
        self.kind == TokenKind::End
    }

    /// The diagnostic location of this token.
    pub fn location(&self) -> Location {
        Location {
            file: self.filename.as_str().to_string(),
            line: self.line,
            token: if self.is_end() {
                None
            } else {
                Some(self.value.as_str().to_string())
            },
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value.as_str())
    }
}
