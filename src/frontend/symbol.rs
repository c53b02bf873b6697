//! Symbols: variables, functions, enum constants and builtins.

use std::cell::RefCell;
use std::rc::Rc;

use crate::common::intern::Name;
use crate::frontend::lexer::TokenRef;
use crate::frontend::types::TypeRef;

/// The builtins registered in the global scope at startup and parsed with
/// bespoke logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    VaArg,
    VaStart,
    VaEnd,
    VaCopy,
    Func,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Variable,
    Function,
    /// An enum constant; the value lives in `enum_value`.
    Constant,
    Builtin(Builtin),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    /// Block-scope objects.
    None,
    /// `static` at file scope.
    Internal,
    /// Everything else at file scope.
    External,
}

#[derive(Debug)]
pub struct Symbol {
    pub kind: SymbolKind,
    pub name: Name,
    pub ty: TypeRef,
    pub token: Option<TokenRef>,
    /// The label this symbol gets in the assembly. Usually the C name, but
    /// static locals are renamed unique and `__asm__("...")` overrides it.
    pub asm_name: String,
    pub linkage: Linkage,
    pub is_defined: bool,
    pub is_tentative: bool,
    /// Hidden symbols exist for redeclaration checking only (block-scope
    /// extern leaves one at file scope) and are not found by name lookup
    /// in expressions.
    pub is_hidden: bool,
    pub enum_value: i32,
    /// For locals and parameters: the rfp-relative offset assigned by the
    /// code generator. None for globals and statics.
    pub frame_offset: Option<i32>,
    /// Parameters of record or 8-byte type arrive as the address of the
    /// caller's copy rather than as a value.
    pub indirect: bool,
}

pub type SymbolRef = Rc<RefCell<Symbol>>;

impl Symbol {
    pub fn new(
        kind: SymbolKind,
        ty: TypeRef,
        name: Name,
        token: Option<TokenRef>,
        asm_name: String,
    ) -> SymbolRef {
        Rc::new(RefCell::new(Symbol {
            kind,
            name,
            ty,
            token,
            asm_name,
            linkage: Linkage::None,
            is_defined: false,
            is_tentative: false,
            is_hidden: false,
            enum_value: 0,
            frame_offset: None,
            indirect: false,
        }))
    }

    /// A hidden file-scope clone, used to remember the type and linkage of
    /// a block-scope extern after it goes out of scope.
    pub fn clone_hidden(&self) -> SymbolRef {
        Rc::new(RefCell::new(Symbol {
            kind: self.kind,
            name: self.name.clone(),
            ty: self.ty.clone(),
            token: self.token.clone(),
            asm_name: self.asm_name.clone(),
            linkage: self.linkage,
            is_defined: false,
            is_tentative: false,
            is_hidden: true,
            enum_value: self.enum_value,
            frame_offset: None,
            indirect: false,
        }))
    }

    /// Whether values of this symbol's type are addressed indirectly in a
    /// register (records and 8-byte scalars).
    pub fn is_wide(&self) -> bool {
        self.ty.is_record() || self.ty.size() == Some(8)
    }
}
