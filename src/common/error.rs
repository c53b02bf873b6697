//! Diagnostics and warning control.
//!
//! All errors in the compiler are fatal: they propagate as
//! `Result<_, Diagnostic>` up to the driver, which prints the one message
//! and exits non-zero. Warnings print immediately and compilation
//! continues, unless promoted to errors by `-Werror`.

use std::collections::HashSet;
use std::fmt;

use thiserror::Error;

/// Where in the pipeline a fatal diagnostic originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Impossible state; indicates a compiler bug.
    Internal,
    /// Malformed byte sequence, unterminated literal, malformed directive.
    Lex,
    /// Unexpected token, disallowed construct.
    Parse,
    /// Type mismatch, duplicate declaration, missing symbol.
    Semantic,
    /// A recognised construct the compiler deliberately does not support.
    Unsupported,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Internal => write!(f, "internal error"),
            Category::Lex | Category::Parse | Category::Semantic | Category::Unsupported => {
                write!(f, "error")
            }
        }
    }
}

/// Source position carried by a diagnostic: file, 1-based line, and the
/// text of the offending token when one was available.
#[derive(Debug, Clone)]
pub struct Location {
    pub file: String,
    pub line: u32,
    pub token: Option<String>,
}

/// A fatal compiler diagnostic, rendered as
/// `file:line: error: message (at `token`)`.
#[derive(Debug, Clone, Error)]
#[error("{}", render(.category, .message, .location))]
pub struct Diagnostic {
    pub category: Category,
    pub message: String,
    pub location: Option<Location>,
}

fn render(category: &Category, message: &str, location: &Option<Location>) -> String {
    let mut out = String::new();
    if let Some(loc) = location {
        out.push_str(&format!("{}:{}: ", loc.file, loc.line));
    }
    out.push_str(&format!("{}: {}", category, message));
    if let Some(tok) = location.as_ref().and_then(|l| l.token.as_ref()) {
        out.push_str(&format!(" (at `{}`)", tok));
    }
    out
}

impl Diagnostic {
    pub fn new(category: Category, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            location: None,
        }
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }
}

/// Shorthand for fallible compiler operations.
pub type CResult<T> = Result<T, Box<Diagnostic>>;

/// Warning categories, matching the `-W<name>` flag names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningKind {
    /// Declaration with no type specifiers (implicit int was removed in C99).
    ImplicitInt,
    /// `({ ... })` statement expressions are a GNU extension.
    StatementExpressions,
    /// Anonymous members with tag names are a Microsoft/Plan9 extension.
    AnonymousTags,
    /// Zero-length flexible array members are a GNU extension.
    ZeroLengthArray,
    /// `asm` and friends without underscores are GNU extensions.
    ExtraKeywords,
    /// A base-10 literal too large for signed long long became unsigned.
    ImplicitlyUnsignedLiteral,
    /// sizeof(void) and other pointer-arithmetic extensions.
    PointerArith,
}

impl WarningKind {
    pub fn flag_name(self) -> &'static str {
        match self {
            WarningKind::ImplicitInt => "implicit-int",
            WarningKind::StatementExpressions => "statement-expressions",
            WarningKind::AnonymousTags => "anonymous-tags",
            WarningKind::ZeroLengthArray => "zero-length-array",
            WarningKind::ExtraKeywords => "extra-keywords",
            WarningKind::ImplicitlyUnsignedLiteral => "implicitly-unsigned-literal",
            WarningKind::PointerArith => "pointer-arith",
        }
    }

    pub fn from_flag_name(name: &str) -> Option<Self> {
        match name {
            "implicit-int" => Some(WarningKind::ImplicitInt),
            "statement-expressions" => Some(WarningKind::StatementExpressions),
            "anonymous-tags" => Some(WarningKind::AnonymousTags),
            "zero-length-array" => Some(WarningKind::ZeroLengthArray),
            "extra-keywords" => Some(WarningKind::ExtraKeywords),
            "implicitly-unsigned-literal" => Some(WarningKind::ImplicitlyUnsignedLiteral),
            "pointer-arith" => Some(WarningKind::PointerArith),
            _ => None,
        }
    }

    fn all() -> &'static [WarningKind] {
        &[
            WarningKind::ImplicitInt,
            WarningKind::StatementExpressions,
            WarningKind::AnonymousTags,
            WarningKind::ZeroLengthArray,
            WarningKind::ExtraKeywords,
            WarningKind::ImplicitlyUnsignedLiteral,
            WarningKind::PointerArith,
        ]
    }
}

/// Which warnings are enabled and which are promoted to errors.
///
/// Flags are processed left-to-right, so `-Wno-extra-keywords` after
/// `-Werror` still disables that one warning.
#[derive(Debug, Clone)]
pub struct WarningConfig {
    enabled: HashSet<WarningKind>,
    errors: HashSet<WarningKind>,
    pub werror_all: bool,
}

impl WarningConfig {
    pub fn new() -> Self {
        let mut enabled = HashSet::new();
        for &kind in WarningKind::all() {
            enabled.insert(kind);
        }
        Self {
            enabled,
            errors: HashSet::new(),
            werror_all: false,
        }
    }

    /// A GNU dialect (`-std=gnu*`) silences the extension warnings.
    pub fn set_gnu_dialect(&mut self) {
        self.enabled.remove(&WarningKind::StatementExpressions);
        self.enabled.remove(&WarningKind::ExtraKeywords);
        self.enabled.remove(&WarningKind::ZeroLengthArray);
    }

    pub fn is_enabled(&self, kind: WarningKind) -> bool {
        self.enabled.contains(&kind)
    }

    pub fn is_error(&self, kind: WarningKind) -> bool {
        self.werror_all || self.errors.contains(&kind)
    }

    /// Processes one `-W...` argument (everything after the `-W`).
    /// Returns false for unknown names, which are ignored like GCC does.
    pub fn process_flag(&mut self, flag: &str) -> bool {
        match flag {
            "error" => {
                self.werror_all = true;
                true
            }
            _ if flag.starts_with("error=") => match WarningKind::from_flag_name(&flag[6..]) {
                Some(kind) => {
                    self.errors.insert(kind);
                    self.enabled.insert(kind);
                    true
                }
                None => false,
            },
            _ if flag.starts_with("no-error=") => {
                match WarningKind::from_flag_name(&flag[9..]) {
                    Some(kind) => {
                        self.errors.remove(&kind);
                        true
                    }
                    None => false,
                }
            }
            _ if flag.starts_with("no-") => match WarningKind::from_flag_name(&flag[3..]) {
                Some(kind) => {
                    self.enabled.remove(&kind);
                    true
                }
                None => false,
            },
            _ => match WarningKind::from_flag_name(flag) {
                Some(kind) => {
                    self.enabled.insert(kind);
                    true
                }
                None => false,
            },
        }
    }
}

impl Default for WarningConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Warning sink: filters by config, prints to stderr, and promotes to a
/// fatal [`Diagnostic`] under `-Werror`.
pub struct Warnings {
    pub config: WarningConfig,
    count: usize,
}

impl Warnings {
    pub fn new(config: WarningConfig) -> Self {
        Self { config, count: 0 }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Emits a warning. Returns Err when the warning is promoted to an
    /// error, so call sites bubble it with `?`.
    pub fn warn(
        &mut self,
        kind: WarningKind,
        location: Option<Location>,
        message: &str,
    ) -> CResult<()> {
        if !self.config.is_enabled(kind) {
            return Ok(());
        }
        if self.config.is_error(kind) {
            let message = format!("{} [-Werror={}]", message, kind.flag_name());
            let mut diag = Diagnostic::new(Category::Semantic, message);
            diag.location = location;
            return Err(Box::new(diag));
        }
        self.count += 1;
        match &location {
            Some(loc) => eprintln!(
                "{}:{}: warning: {} [-W{}]",
                loc.file,
                loc.line,
                message,
                kind.flag_name()
            ),
            None => eprintln!("warning: {} [-W{}]", message, kind.flag_name()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_process_left_to_right() {
        let mut config = WarningConfig::new();
        assert!(config.process_flag("error"));
        assert!(config.process_flag("no-extra-keywords"));
        assert!(config.werror_all);
        assert!(!config.is_enabled(WarningKind::ExtraKeywords));
        assert!(config.is_enabled(WarningKind::ImplicitInt));
    }

    #[test]
    fn unknown_flags_are_ignored() {
        let mut config = WarningConfig::new();
        assert!(!config.process_flag("definitely-not-a-warning"));
    }

    #[test]
    fn werror_promotes_to_diagnostic() {
        let mut warnings = Warnings::new(WarningConfig::new());
        warnings.config.werror_all = true;
        let result = warnings.warn(WarningKind::ImplicitInt, None, "no type");
        assert!(result.is_err());
        assert_eq!(warnings.count(), 0);
    }
}
