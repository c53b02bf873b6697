//! Core parser state and the translation unit loop.

use crate::backend::emit::Emitter;
use crate::common::error::{Category, CResult, Diagnostic, Warnings};
use crate::common::intern::Name;
use crate::common::Options;
use crate::frontend::lexer::{Lexer, TokenKind, TokenRef};
use crate::frontend::scope::Scopes;
use crate::frontend::symbol::{Builtin, Linkage, Symbol, SymbolKind, SymbolRef};
use crate::frontend::types::{Base, Type, TypeRef};

/// Parse-time state of the function definition currently being read.
pub struct CurrentFunction {
    pub name: TokenRef,
    pub symbol: SymbolRef,
    /// The `__S_` label of this function's name, once `__func__` has been
    /// used.
    pub name_label: Option<u32>,
}

/// Recursive-descent parser over the lexer's token stream.
///
/// The parser drives the whole compilation: it resolves scopes and types
/// while building each declaration's tree, and hands every finished
/// function definition straight to the code generator.
pub struct Parser<'a> {
    pub lexer: Lexer,
    pub scopes: Scopes,
    pub warnings: &'a mut Warnings,
    pub emitter: &'a mut Emitter,
    pub options: &'a Options,
    pub current_function: Option<CurrentFunction>,
}

impl<'a> Parser<'a> {
    pub fn new(
        lexer: Lexer,
        warnings: &'a mut Warnings,
        emitter: &'a mut Emitter,
        options: &'a Options,
    ) -> CResult<Self> {
        let mut parser = Self {
            lexer,
            scopes: Scopes::new(),
            warnings,
            emitter,
            options,
            current_function: None,
        };
        parser.register_builtins()?;
        Ok(parser)
    }

    /// Parses and compiles the whole translation unit.
    pub fn parse_translation_unit(&mut self) -> CResult<()> {
        while !self.lexer.token().is_end() {
            self.parse_global()?;
        }
        self.flush_tentative_definitions()?;
        Ok(())
    }

    fn parse_global(&mut self) -> CResult<()> {
        if !self.try_parse_declaration(None)? {
            return Err(self.fatal(Category::Parse, "expected a declaration at file scope"));
        }
        Ok(())
    }

    /// The variadic builtins and `__func__` live in the global scope as
    /// symbols of kind builtin; `__builtin_va_list` is a typedef for
    /// `char*`.
    fn register_builtins(&mut self) -> CResult<()> {
        let char_ptr = Type::new_pointer(Type::new_base(Base::Char), false, false, false);
        let builtins = [
            ("__builtin_va_arg", Builtin::VaArg),
            ("__builtin_va_start", Builtin::VaStart),
            ("__builtin_va_end", Builtin::VaEnd),
            ("__builtin_va_copy", Builtin::VaCopy),
            ("__func__", Builtin::Func),
        ];
        for (name, builtin) in builtins {
            let name = self.lexer.pool.intern(name);
            let symbol = Symbol::new(
                SymbolKind::Builtin(builtin),
                Type::new_base(Base::Void),
                name.clone(),
                None,
                name.as_str().to_string(),
            );
            self.scopes.add_symbol(symbol)?;
        }
        let va_list = self.lexer.pool.intern("__builtin_va_list");
        self.scopes.add_typedef(va_list, char_ptr)?;
        Ok(())
    }

    /// Emits zero-filled storage for every file-scope variable that is
    /// still a tentative definition at the end of the translation unit.
    fn flush_tentative_definitions(&mut self) -> CResult<()> {
        for symbol in self.scopes.global_symbols() {
            let needs_storage = {
                let sym = symbol.borrow();
                sym.kind == SymbolKind::Variable
                    && sym.is_tentative
                    && !sym.is_defined
                    && !sym.is_hidden
                    && sym.linkage != Linkage::None
            };
            if !needs_storage {
                continue;
            }
            // An uncompleted tentative array gets one element.
            {
                let mut sym = symbol.borrow_mut();
                if let Type::IndeterminateArray { element } = &*sym.ty.clone() {
                    sym.ty = Type::new_array(element.clone(), 1);
                }
            }
            let sym = symbol.borrow();
            let size = sym.ty.size().ok_or_else(|| {
                self.fatal_with(
                    Category::Semantic,
                    format!("tentative definition of `{}` has incomplete type", sym.name),
                    sym.token.as_ref(),
                )
            })?;
            let data = crate::backend::emit::GlobalData {
                bytes: vec![0; size as usize],
                relocs: Vec::new(),
            };
            self.emitter
                .emit_global(&sym.asm_name, sym.linkage == Linkage::External, &data, sym.token.as_ref());
        }
        Ok(())
    }

    // === Token helpers ===

    pub(super) fn token(&self) -> &TokenRef {
        self.lexer.token()
    }

    pub(super) fn is_alphanumeric(&self) -> bool {
        self.token().kind == TokenKind::Alphanumeric
    }

    /// The current token's interned value.
    pub(super) fn value(&self) -> Name {
        self.token().value.clone()
    }

    // === Diagnostics ===

    pub(super) fn fatal(&self, category: Category, message: impl Into<String>) -> Box<Diagnostic> {
        Box::new(Diagnostic::new(category, message).with_location(self.token().location()))
    }

    pub(super) fn fatal_with(
        &self,
        category: Category,
        message: impl Into<String>,
        token: Option<&TokenRef>,
    ) -> Box<Diagnostic> {
        let mut diag = Diagnostic::new(category, message);
        diag.location = Some(
            token
                .map(|t| t.location())
                .unwrap_or_else(|| self.token().location()),
        );
        Box::new(diag)
    }

    pub(super) fn fatal_token(
        &self,
        token: &TokenRef,
        category: Category,
        message: impl Into<String>,
    ) -> Box<Diagnostic> {
        Box::new(Diagnostic::new(category, message).with_location(token.location()))
    }

    // === Shared type utilities ===

    /// Whether `ty` is addressed indirectly in a register: records and
    /// 8-byte scalars live in storage, the register holds their address.
    pub(super) fn is_wide(ty: &TypeRef) -> bool {
        ty.is_record() || ty.size() == Some(8)
    }
}
