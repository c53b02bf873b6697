//! Declaration parsing: specifier sequences, struct/union/enum
//! definitions, declarator chains, and file-scope and block-scope
//! declarations including function definitions.

use std::rc::Rc;

use crate::backend::codegen;
use crate::common::error::{Category, CResult, WarningKind};
use crate::frontend::ast::{Node, NodeKind};
use crate::frontend::lexer::{TokenKind, TokenRef};
use crate::frontend::parser::const_eval;
use crate::frontend::parser::parser::{CurrentFunction, Parser};
use crate::frontend::record::{EnumDef, Record};
use crate::frontend::scope::ScopeRef;
use crate::frontend::symbol::{Linkage, Symbol, SymbolKind, SymbolRef};
use crate::frontend::types::{Base, Param, Type, TypeRef};

// Type specifier bits, validated as a set against C17 6.7.2.2.
const SPEC_VOID: u32 = 1 << 0;
const SPEC_CHAR: u32 = 1 << 1;
const SPEC_SHORT: u32 = 1 << 2;
const SPEC_INT: u32 = 1 << 3;
const SPEC_LONG: u32 = 1 << 4;
const SPEC_LONG_LONG: u32 = 1 << 5;
const SPEC_SIGNED: u32 = 1 << 6;
const SPEC_UNSIGNED: u32 = 1 << 7;
const SPEC_RECORD: u32 = 1 << 8;
const SPEC_ENUM: u32 = 1 << 9;
const SPEC_TYPEDEF_NAME: u32 = 1 << 10;
const SPEC_BOOL: u32 = 1 << 11;
const SPEC_FLOAT: u32 = 1 << 12;
const SPEC_DOUBLE: u32 = 1 << 13;

const QUAL_CONST: u32 = 1 << 0;
const QUAL_VOLATILE: u32 = 1 << 1;
const QUAL_RESTRICT: u32 = 1 << 2;

const FUNC_INLINE: u32 = 1 << 0;
const FUNC_NORETURN: u32 = 1 << 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum StorageSpecifier {
    None,
    Typedef,
    Extern,
    Static,
    Auto,
    Register,
}

/// The accumulated specifier sequence of one declaration.
pub(super) struct Specifiers {
    pub storage: StorageSpecifier,
    type_specifiers: u32,
    type_qualifiers: u32,
    function_specifiers: u32,
    /// Set when the type is user-declared (struct/union/enum/typedef).
    pub ty: Option<TypeRef>,
}

impl Specifiers {
    fn new() -> Self {
        Self {
            storage: StorageSpecifier::None,
            type_specifiers: 0,
            type_qualifiers: 0,
            function_specifiers: 0,
            ty: None,
        }
    }

    pub fn has_record_or_enum(&self) -> bool {
        self.type_specifiers & (SPEC_RECORD | SPEC_ENUM) != 0
    }
}

/// The shape of a parsed declarator, mirroring its source nesting. The
/// type is built by folding this tree over the base type.
enum Declarator {
    Name(Option<TokenRef>),
    Pointer {
        inner: Box<Declarator>,
        is_const: bool,
        is_volatile: bool,
        is_restrict: bool,
    },
    Array {
        inner: Box<Declarator>,
        count: Option<u32>,
    },
    Function {
        inner: Box<Declarator>,
        params: Vec<Param>,
        variadic: bool,
        scope: ScopeRef,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum DeclaratorKind {
    /// A name is required (ordinary declarations).
    Named,
    /// No name allowed (casts, sizeof).
    Abstract,
    /// Either (function parameters).
    Either,
}

impl<'a> Parser<'a> {
    // === Specifier sequences ===

    fn try_parse_storage(&mut self, specifiers: &mut Specifiers) -> CResult<bool> {
        let storage = match self.token().value.as_str() {
            "typedef" => StorageSpecifier::Typedef,
            "extern" => StorageSpecifier::Extern,
            "static" => StorageSpecifier::Static,
            "auto" => StorageSpecifier::Auto,
            "register" => StorageSpecifier::Register,
            "_Thread_local" | "__thread" => {
                return Err(self.fatal(Category::Unsupported, "_Thread_local is not supported"))
            }
            _ => return Ok(false),
        };
        if specifiers.storage != StorageSpecifier::None {
            return Err(self.fatal(
                Category::Parse,
                "at most one storage specifier can be provided for a declaration",
            ));
        }
        specifiers.storage = storage;
        self.lexer.consume()?;
        Ok(true)
    }

    fn add_type_specifier(&mut self, specifiers: &mut Specifiers, bit: u32) -> CResult<()> {
        if specifiers.type_specifiers & bit != 0 {
            return Err(self.fatal(
                Category::Parse,
                format!("redundant type specifier: `{}`", self.token().value),
            ));
        }
        specifiers.type_specifiers |= bit;
        self.check_specifiers(specifiers)?;
        self.lexer.consume()
    }

    fn try_parse_specifier_keyword(&mut self, specifiers: &mut Specifiers) -> CResult<bool> {
        if self.try_parse_storage(specifiers)? {
            return Ok(true);
        }

        let bit = match self.token().value.as_str() {
            "void" => Some(SPEC_VOID),
            "char" => Some(SPEC_CHAR),
            "short" => Some(SPEC_SHORT),
            "int" => Some(SPEC_INT),
            "signed" | "__signed__" => Some(SPEC_SIGNED),
            "unsigned" => Some(SPEC_UNSIGNED),
            "float" => Some(SPEC_FLOAT),
            "double" => Some(SPEC_DOUBLE),
            "_Bool" => Some(SPEC_BOOL),
            _ => None,
        };
        if let Some(bit) = bit {
            self.add_type_specifier(specifiers, bit)?;
            return Ok(true);
        }

        let qual = match self.token().value.as_str() {
            "const" | "__const" | "__const__" => Some(QUAL_CONST),
            "volatile" | "__volatile" | "__volatile__" => Some(QUAL_VOLATILE),
            "restrict" | "__restrict" | "__restrict__" => Some(QUAL_RESTRICT),
            _ => None,
        };
        if let Some(qual) = qual {
            // Qualifiers may legally repeat (C17 6.7.3p5).
            specifiers.type_qualifiers |= qual;
            self.lexer.consume()?;
            return Ok(true);
        }

        let func = match self.token().value.as_str() {
            "inline" | "__inline" | "__inline__" => Some(FUNC_INLINE),
            "_Noreturn" | "__noreturn__" => Some(FUNC_NORETURN),
            _ => None,
        };
        if let Some(func) = func {
            specifiers.function_specifiers |= func;
            self.lexer.consume()?;
            return Ok(true);
        }

        // `long` may appear at most twice.
        if self.is_alphanumeric() && self.token().value.as_str() == "long" {
            if specifiers.type_specifiers & SPEC_LONG_LONG != 0 {
                return Err(self.fatal(Category::Parse, "`long long long` is invalid"));
            }
            if specifiers.type_specifiers & SPEC_LONG != 0 {
                specifiers.type_specifiers &= !SPEC_LONG;
                specifiers.type_specifiers |= SPEC_LONG_LONG;
            } else {
                specifiers.type_specifiers |= SPEC_LONG;
            }
            self.check_specifiers(specifiers)?;
            self.lexer.consume()?;
            return Ok(true);
        }

        match self.token().value.as_str() {
            "_Atomic" => Err(self.fatal(Category::Unsupported, "_Atomic is not supported")),
            "_Alignas" => Err(self.fatal(Category::Unsupported, "_Alignas is not supported")),
            "_Complex" | "__complex__" => {
                Err(self.fatal(Category::Unsupported, "_Complex is not supported"))
            }
            _ => Ok(false),
        }
    }

    /// Converts the accumulated type-specifier set to a primitive base.
    /// The combinations follow the table in C17 6.7.2.2.
    fn convert_specifiers(&mut self, specifiers: &Specifiers, quiet: bool) -> CResult<Base> {
        debug_assert!(specifiers.ty.is_none());
        let base = match specifiers.type_specifiers {
            0 => {
                if !quiet {
                    self.warnings.warn(
                        WarningKind::ImplicitInt,
                        Some(self.token().location()),
                        "no type specifiers for this declaration",
                    )?;
                }
                Base::SignedInt
            }
            s if s == SPEC_VOID => Base::Void,
            s if s == SPEC_CHAR => Base::Char,
            s if s == SPEC_SIGNED | SPEC_CHAR => Base::SignedChar,
            s if s == SPEC_UNSIGNED | SPEC_CHAR => Base::UnsignedChar,
            s if s == SPEC_SHORT
                || s == SPEC_SIGNED | SPEC_SHORT
                || s == SPEC_SHORT | SPEC_INT
                || s == SPEC_SIGNED | SPEC_SHORT | SPEC_INT =>
            {
                Base::SignedShort
            }
            s if s == SPEC_UNSIGNED | SPEC_SHORT || s == SPEC_UNSIGNED | SPEC_SHORT | SPEC_INT => {
                Base::UnsignedShort
            }
            s if s == SPEC_INT || s == SPEC_SIGNED || s == SPEC_SIGNED | SPEC_INT => {
                Base::SignedInt
            }
            s if s == SPEC_UNSIGNED || s == SPEC_UNSIGNED | SPEC_INT => Base::UnsignedInt,
            s if s == SPEC_LONG
                || s == SPEC_SIGNED | SPEC_LONG
                || s == SPEC_LONG | SPEC_INT
                || s == SPEC_SIGNED | SPEC_LONG | SPEC_INT =>
            {
                Base::SignedLong
            }
            s if s == SPEC_UNSIGNED | SPEC_LONG || s == SPEC_UNSIGNED | SPEC_LONG | SPEC_INT => {
                Base::UnsignedLong
            }
            s if s == SPEC_LONG_LONG
                || s == SPEC_SIGNED | SPEC_LONG_LONG
                || s == SPEC_LONG_LONG | SPEC_INT
                || s == SPEC_SIGNED | SPEC_LONG_LONG | SPEC_INT =>
            {
                Base::SignedLongLong
            }
            s if s == SPEC_UNSIGNED | SPEC_LONG_LONG
                || s == SPEC_UNSIGNED | SPEC_LONG_LONG | SPEC_INT =>
            {
                Base::UnsignedLongLong
            }
            s if s == SPEC_FLOAT => Base::Float,
            s if s == SPEC_DOUBLE => Base::Double,
            s if s == SPEC_LONG | SPEC_DOUBLE => Base::LongDouble,
            s if s == SPEC_BOOL => Base::Bool,
            _ => {
                return Err(self.fatal(
                    Category::Parse,
                    "invalid combination of type specifiers",
                ))
            }
        };
        Ok(base)
    }

    /// Validates the specifier set accumulated so far, so the error lands
    /// on the first wrong token.
    fn check_specifiers(&mut self, specifiers: &Specifiers) -> CResult<()> {
        if specifiers.ty.is_some() {
            if specifiers.type_specifiers & !(SPEC_RECORD | SPEC_ENUM | SPEC_TYPEDEF_NAME) != 0 {
                return Err(self.fatal(
                    Category::Parse,
                    "user-declared types cannot be combined with other type specifiers",
                ));
            }
            return Ok(());
        }
        self.convert_specifiers(specifiers, true)?;
        Ok(())
    }

    pub(super) fn try_parse_declaration_specifiers(
        &mut self,
    ) -> CResult<Option<Specifiers>> {
        let mut specifiers = Specifiers::new();
        let mut found = false;

        // All declaration specifiers are alphanumeric, so short-circuit.
        while self.is_alphanumeric() {
            if self.try_parse_specifier_keyword(&mut specifiers)? {
                found = true;
                continue;
            }

            if self.lexer.is("struct") || self.lexer.is("union") {
                found = true;
                self.parse_record(&mut specifiers)?;
                continue;
            }

            if self.lexer.is("enum") {
                found = true;
                self.parse_enum(&mut specifiers)?;
                continue;
            }

            // A typedef name, but only when no type specifier was seen yet.
            if specifiers.type_specifiers == 0 && specifiers.ty.is_none() {
                if let Some(ty) = self.scopes.find_typedef(&self.value(), true) {
                    found = true;
                    specifiers.type_specifiers |= SPEC_TYPEDEF_NAME;
                    specifiers.ty = Some(ty);
                    self.lexer.consume()?;
                    continue;
                }
            }

            break;
        }

        Ok(if found { Some(specifiers) } else { None })
    }

    pub(super) fn make_specifier_type(&mut self, specifiers: &Specifiers) -> CResult<TypeRef> {
        let ty = match &specifiers.ty {
            Some(ty) => ty.clone(),
            None => Type::new_base(self.convert_specifiers(specifiers, false)?),
        };
        Ok(Type::qualify(
            &ty,
            specifiers.type_qualifiers & QUAL_CONST != 0,
            specifiers.type_qualifiers & QUAL_VOLATILE != 0,
        ))
    }

    /// Whether the current token can begin a declaration (specifier
    /// keyword or typedef name). Used for declarator disambiguation and
    /// block-item dispatch.
    pub(super) fn at_declaration_start(&self) -> bool {
        if !self.is_alphanumeric() {
            return false;
        }
        matches!(
            self.token().value.as_str(),
            "typedef"
                | "extern"
                | "static"
                | "auto"
                | "register"
                | "_Thread_local"
                | "__thread"
                | "void"
                | "char"
                | "short"
                | "int"
                | "long"
                | "signed"
                | "__signed__"
                | "unsigned"
                | "float"
                | "double"
                | "_Bool"
                | "const"
                | "__const"
                | "__const__"
                | "volatile"
                | "__volatile"
                | "__volatile__"
                | "restrict"
                | "__restrict"
                | "__restrict__"
                | "inline"
                | "__inline"
                | "__inline__"
                | "_Noreturn"
                | "__noreturn__"
                | "struct"
                | "union"
                | "enum"
                | "_Atomic"
                | "_Alignas"
                | "_Complex"
        ) || self.scopes.find_typedef(&self.token().value, true).is_some()
    }

    // === Records ===

    fn parse_record(&mut self, specifiers: &mut Specifiers) -> CResult<()> {
        if specifiers.type_specifiers & SPEC_RECORD != 0 {
            return Err(self.fatal(Category::Parse, "redundant struct/union specifier"));
        }
        specifiers.type_specifiers |= SPEC_RECORD;
        let is_struct = self.lexer.is("struct");
        self.lexer.consume()?;

        let tag = if self.is_alphanumeric() {
            Some(self.lexer.take()?)
        } else if !self.lexer.is("{") {
            return Err(self.fatal(
                Category::Parse,
                format!(
                    "expected tag or `{{` after `{}`",
                    if is_struct { "struct" } else { "union" }
                ),
            ));
        } else {
            None
        };

        // A definition or forward declaration declares the tag in the
        // current scope; a mere reference searches enclosing scopes too.
        let is_definition = self.lexer.is("{");
        let is_forward = self.lexer.is(";")
            && specifiers.type_qualifiers == 0
            && specifiers.storage == StorageSpecifier::None;
        let find_recursive = !is_definition && !is_forward;

        let mut ty = None;
        if let Some(tag) = &tag {
            if let Some(found) = self.scopes.find_tag(&tag.value, find_recursive) {
                match found.record() {
                    Some(record) if record.borrow().is_struct == is_struct => {}
                    _ => {
                        return Err(self.fatal_token(
                            tag,
                            Category::Semantic,
                            if is_struct {
                                "tag does not name a struct in this scope"
                            } else {
                                "tag does not name a union in this scope"
                            },
                        ))
                    }
                }
                ty = Some(found);
            }
        }

        let ty = match ty {
            Some(ty) => ty,
            None => {
                let record = Record::new(tag.clone(), is_struct);
                let ty = Type::new_record(record);
                if let Some(tag) = &tag {
                    self.scopes.add_tag(tag.value.clone(), ty.clone())?;
                }
                ty
            }
        };
        specifiers.ty = Some(ty.clone());

        if self.lexer.is("{") {
            let record = ty.record().unwrap_or_else(|| unreachable!()).clone();
            if record.borrow().is_defined {
                return Err(self.fatal(
                    Category::Semantic,
                    "duplicate definition of struct/union",
                ));
            }
            self.lexer.consume()?;

            while !self.lexer.accept("}")? {
                self.parse_record_member(&record)?;
            }
            record.borrow_mut().is_defined = true;

            if record.borrow().members.is_empty() {
                return Err(self.fatal(
                    Category::Unsupported,
                    "empty struct/union definitions are not supported",
                ));
            }

            // Warn on a zero-length trailing array, the GNU spelling of a
            // flexible array member.
            let warn_zero_length = {
                let record = record.borrow();
                record
                    .members
                    .last()
                    .map(|m| matches!(&*m.ty, Type::Array { count: 0, .. }))
                    .unwrap_or(false)
            };
            if warn_zero_length {
                self.warnings.warn(
                    WarningKind::ZeroLengthArray,
                    Some(self.token().location()),
                    "a zero-length array as a flexible array member is a GNU extension",
                )?;
            }
        }
        Ok(())
    }

    fn parse_record_member(&mut self, record: &crate::frontend::record::RecordRef) -> CResult<()> {
        let error_token = self.token().clone();

        let specifiers = self
            .try_parse_declaration_specifiers()?
            .ok_or_else(|| self.fatal(Category::Parse, "expected a member declaration"))?;
        if specifiers.storage != StorageSpecifier::None {
            return Err(self.fatal(
                Category::Parse,
                "storage specifiers are not allowed in a struct or union definition",
            ));
        }
        if specifiers.function_specifiers != 0 {
            return Err(self.fatal(
                Category::Parse,
                "function specifiers are not allowed in a struct or union definition",
            ));
        }
        let base_type = self.make_specifier_type(&specifiers)?;

        loop {
            let (ty, name) = match self.parse_declarator(&base_type, DeclaratorKind::Either)? {
                Some(result) => result,
                None => (base_type.clone(), None),
            };

            // A bit-field width is parsed and validated, but carries no
            // storage semantics in this compiler.
            let mut has_bitfield = false;
            if self.lexer.is(":") {
                if !ty.is_integer() && !ty.is_enum() {
                    return Err(self.fatal(
                        Category::Semantic,
                        "only integer types may have a bit-field width",
                    ));
                }
                self.lexer.consume()?;
                has_bitfield = true;
                let width_node = self.parse_constant_expression()?;
                let width = const_eval::eval_int(&width_node)?;
                if width == 0 && name.is_some() {
                    return Err(self.fatal_token(
                        &error_token,
                        Category::Semantic,
                        "only unnamed members may have a bit-field width of zero",
                    ));
                }
                if !(0..=64).contains(&width) {
                    return Err(self.fatal(
                        Category::Semantic,
                        "a bit-field width must be from 0 to 64 bits",
                    ));
                }
            }

            if name.is_none() {
                if let Some(inner) = ty.record() {
                    if inner.borrow().tag.is_some() {
                        self.warnings.warn(
                            WarningKind::AnonymousTags,
                            Some(error_token.location()),
                            "anonymous struct/union members with tag names are a Microsoft/Plan9 extension",
                        )?;
                    }
                } else if !has_bitfield {
                    return Err(self.fatal_token(
                        &error_token,
                        Category::Parse,
                        "this struct/union member needs a name (only struct/union types and zero-width bit-fields may be anonymous)",
                    ));
                }
            }

            // Unnamed bit-fields take no storage here.
            if name.is_some() || !has_bitfield {
                record
                    .borrow_mut()
                    .add(name, ty, Some(&error_token))?;
            }

            if self.lexer.is("=") {
                return Err(self.fatal(
                    Category::Parse,
                    "an initializer is not allowed in a struct or union member declaration",
                ));
            }
            if self.lexer.accept(",")? {
                continue;
            }
            self.lexer.expect(";", "expected `;` or `,` at end of member declaration")?;
            break;
        }
        Ok(())
    }

    // === Enums ===

    fn parse_enum(&mut self, specifiers: &mut Specifiers) -> CResult<()> {
        if specifiers.type_specifiers & SPEC_ENUM != 0 {
            return Err(self.fatal(
                Category::Parse,
                "redundant enum specifier (missing `;` between enums?)",
            ));
        }
        specifiers.type_specifiers |= SPEC_ENUM;
        let keyword = self.lexer.take()?;

        let tag = if self.is_alphanumeric() {
            Some(self.lexer.take()?)
        } else {
            None
        };

        // Without a definition the enum must already exist; there are no
        // forward declarations of enums.
        if !self.lexer.accept("{")? {
            let tag = tag.ok_or_else(|| {
                self.fatal_token(&keyword, Category::Parse, "expected `{` or a tag after `enum`")
            })?;
            let ty = self.scopes.find_tag(&tag.value, true).ok_or_else(|| {
                if self.lexer.is(";") {
                    self.fatal_token(
                        &tag,
                        Category::Semantic,
                        "forward declarations of enums are not allowed",
                    )
                } else {
                    self.fatal_token(&tag, Category::Semantic, "no enum defined with this tag")
                }
            })?;
            if !ty.is_enum() {
                return Err(self.fatal_token(
                    &tag,
                    Category::Semantic,
                    "this tag names a struct or union, it cannot be referred to as `enum`",
                ));
            }
            specifiers.ty = Some(ty);
            return Ok(());
        }

        if let Some(tag) = &tag {
            if self.scopes.find_tag(&tag.value, false).is_some() {
                return Err(self.fatal_token(
                    &tag.clone(),
                    Category::Semantic,
                    "a struct, union or enum with this tag is already defined in this scope",
                ));
            }
        }

        let ty = Type::new_enum(EnumDef::new(tag.clone()));
        specifiers.ty = Some(ty.clone());
        if let Some(tag) = &tag {
            self.scopes.add_tag(tag.value.clone(), ty.clone())?;
        }

        // Enumerators auto-increment from zero and land in the enclosing
        // scope as constant symbols of the enum type.
        let mut value: i32 = 0;
        let mut found = false;
        while !self.lexer.is("}") {
            if !self.is_alphanumeric() {
                return Err(self.fatal(Category::Parse, "expected an identifier for this enum value"));
            }
            let name = self.lexer.take()?;

            if self.lexer.accept("=")? {
                let node = self.parse_constant_expression()?;
                value = const_eval::eval_int(&node)? as i32;
            }

            let symbol = Symbol::new(
                SymbolKind::Constant,
                ty.clone(),
                name.value.clone(),
                Some(name.clone()),
                name.value.as_str().to_string(),
            );
            symbol.borrow_mut().enum_value = value;
            value = value.wrapping_add(1);
            self.scopes.add_symbol(symbol)?;

            found = true;
            if self.lexer.is("}") {
                break;
            }
            self.lexer.expect(",", "expected `,` or `}` after this enum value")?;
        }
        if !found {
            return Err(self.fatal(Category::Parse, "an empty enum is not allowed"));
        }
        self.lexer.consume()?;
        Ok(())
    }

    // === Declarators ===

    /// Parses a (possibly abstract) declarator and folds it over the base
    /// type. Returns None when there is no declarator at all.
    pub(super) fn parse_declarator(
        &mut self,
        base: &TypeRef,
        kind: DeclaratorKind,
    ) -> CResult<Option<(TypeRef, Option<TokenRef>)>> {
        let tree = match self.parse_declarator_tree(kind)? {
            Some(tree) => tree,
            None => return Ok(None),
        };
        let (ty, name) = self.fold_declarator(tree, base.clone())?;
        if kind == DeclaratorKind::Named && name.is_none() {
            return Ok(None);
        }
        Ok(Some((ty, name)))
    }

    fn parse_declarator_tree(&mut self, kind: DeclaratorKind) -> CResult<Option<Declarator>> {
        // Pointer prefix.
        if self.lexer.accept("*")? {
            let mut quals = 0u32;
            loop {
                let qual = match self.token().value.as_str() {
                    "const" | "__const" | "__const__" => QUAL_CONST,
                    "volatile" | "__volatile" | "__volatile__" => QUAL_VOLATILE,
                    "restrict" | "__restrict" | "__restrict__" => QUAL_RESTRICT,
                    _ => break,
                };
                quals |= qual;
                self.lexer.consume()?;
            }
            let inner = match self.parse_declarator_tree(kind)? {
                Some(inner) => inner,
                None => Declarator::Name(None),
            };
            return Ok(Some(Declarator::Pointer {
                inner: Box::new(inner),
                is_const: quals & QUAL_CONST != 0,
                is_volatile: quals & QUAL_VOLATILE != 0,
                is_restrict: quals & QUAL_RESTRICT != 0,
            }));
        }

        let mut found = false;
        let mut tree;

        if self.lexer.is("(") && !self.paren_starts_parameter_list()? {
            // A parenthesized declarator. Postfix operators parsed below
            // associate with whatever the parentheses wrap.
            self.lexer.consume()?;
            tree = self
                .parse_declarator_tree(kind)?
                .ok_or_else(|| self.fatal(Category::Parse, "expected declarator after `(`"))?;
            self.lexer.expect(")", "expected `)` after parenthesized declarator")?;
            found = true;
        } else if kind != DeclaratorKind::Abstract
            && self.is_alphanumeric()
            && !self.at_declaration_start()
        {
            tree = Declarator::Name(Some(self.lexer.take()?));
            found = true;
        } else {
            tree = Declarator::Name(None);
        }

        // Array and function postfixes, left to right.
        loop {
            if self.lexer.accept("[")? {
                found = true;
                let count = if self.lexer.accept("]")? {
                    None
                } else {
                    let node = self.parse_constant_expression()?;
                    let count = const_eval::eval_int(&node)?;
                    if count < 0 {
                        return Err(self.fatal(Category::Semantic, "array length cannot be negative"));
                    }
                    self.lexer.expect("]", "expected `]` after array length")?;
                    Some(count as u32)
                };
                tree = Declarator::Array {
                    inner: Box::new(tree),
                    count,
                };
                continue;
            }

            if self.lexer.is("(") {
                self.lexer.consume()?;
                found = true;
                let (params, variadic, scope) = self.parse_function_parameters()?;
                tree = Declarator::Function {
                    inner: Box::new(tree),
                    params,
                    variadic,
                    scope,
                };
                continue;
            }

            break;
        }

        Ok(if found || kind != DeclaratorKind::Named {
            Some(tree)
        } else {
            None
        })
    }

    /// After a `(` in direct-declarator position: a type-starting token or
    /// `)` means a parameter list of an abstract function declarator; a
    /// `*`, `(` or identifier means a parenthesized declarator.
    fn paren_starts_parameter_list(&mut self) -> CResult<bool> {
        debug_assert!(self.lexer.is("("));
        let paren = self.lexer.take()?;
        let starts_params = self.lexer.is(")") || self.at_declaration_start();
        self.lexer.push(paren)?;
        Ok(starts_params)
    }

    fn fold_declarator(
        &mut self,
        tree: Declarator,
        base: TypeRef,
    ) -> CResult<(TypeRef, Option<TokenRef>)> {
        match tree {
            Declarator::Name(name) => Ok((base, name)),
            Declarator::Pointer {
                inner,
                is_const,
                is_volatile,
                is_restrict,
            } => {
                let ty = Type::new_pointer(base, is_const, is_volatile, is_restrict);
                self.fold_declarator(*inner, ty)
            }
            Declarator::Array { inner, count } => {
                if base.is_function() {
                    return Err(self.fatal(
                        Category::Semantic,
                        "an array of functions is not allowed (use pointers to functions)",
                    ));
                }
                let ty = match count {
                    Some(count) => Type::new_array(base, count),
                    None => Type::new_indeterminate(base),
                };
                self.fold_declarator(*inner, ty)
            }
            Declarator::Function {
                inner,
                params,
                variadic,
                scope,
            } => {
                if base.is_function() {
                    return Err(self.fatal(Category::Semantic, "a function cannot return a function"));
                }
                if base.is_array() {
                    return Err(self.fatal(Category::Semantic, "a function cannot return an array"));
                }
                let ty = Type::new_function(base, params, variadic);
                if let Some(sig) = ty.function() {
                    *sig.scope.borrow_mut() = Some(scope);
                }
                self.fold_declarator(*inner, ty)
            }
        }
    }

    /// Parses the parameter list after `(`. The scope the parameters and
    /// their tags are declared in is taken from the stack and adopted by
    /// the function type.
    fn parse_function_parameters(&mut self) -> CResult<(Vec<Param>, bool, ScopeRef)> {
        self.scopes.push();
        let mut params = Vec::new();
        let mut variadic = false;

        if !self.lexer.accept(")")? {
            loop {
                if self.lexer.accept("...")? {
                    if params.is_empty() {
                        return Err(self.fatal(
                            Category::Parse,
                            "at least one named argument is required before `...`",
                        ));
                    }
                    self.lexer.expect(")", "expected `)` after `...`")?;
                    variadic = true;
                    break;
                }

                let specifiers = self.try_parse_declaration_specifiers()?.ok_or_else(|| {
                    self.fatal(
                        Category::Parse,
                        "expected a type for this function parameter",
                    )
                })?;
                if specifiers.storage != StorageSpecifier::None
                    && specifiers.storage != StorageSpecifier::Register
                {
                    return Err(self.fatal(
                        Category::Parse,
                        "storage specifiers are not allowed on function parameters",
                    ));
                }
                let base = self.make_specifier_type(&specifiers)?;

                let (ty, name) = match self.parse_declarator(&base, DeclaratorKind::Either)? {
                    Some(result) => result,
                    None => (base, None),
                };

                // `(void)` means no parameters.
                if params.is_empty() && ty.is_void() && name.is_none() && self.lexer.is(")") {
                    self.lexer.consume()?;
                    break;
                }
                if ty.is_void() {
                    return Err(self.fatal(Category::Semantic, "a parameter cannot have type void"));
                }

                params.push(Param { ty, name });

                if self.lexer.accept(",")? {
                    continue;
                }
                self.lexer.expect(")", "expected `,` or `)` after function parameter")?;
                break;
            }
        }

        let scope = self.scopes.take();
        Ok((params, variadic, scope))
    }

    /// Parses a type name (specifiers plus abstract declarator), as used
    /// in casts, sizeof and va_arg. Returns None when the tokens do not
    /// begin a type.
    pub(super) fn try_parse_type(&mut self) -> CResult<Option<TypeRef>> {
        if !self.at_declaration_start() {
            return Ok(None);
        }
        let specifiers = match self.try_parse_declaration_specifiers()? {
            Some(specifiers) => specifiers,
            None => return Ok(None),
        };
        if specifiers.storage != StorageSpecifier::None {
            return Err(self.fatal(
                Category::Parse,
                "storage specifiers are not allowed on this type name",
            ));
        }
        let base = self.make_specifier_type(&specifiers)?;
        let ty = match self.parse_declarator(&base, DeclaratorKind::Abstract)? {
            Some((ty, _)) => ty,
            None => base,
        };
        Ok(Some(ty))
    }

    // === asm names ===

    /// `__asm__("label")` after a declarator renames the symbol in the
    /// assembly. Adjacent string fragments concatenate.
    fn parse_asm_name(
        &mut self,
        specifiers: &Specifiers,
        name: &TokenRef,
        ty: &TypeRef,
        is_local: bool,
    ) -> CResult<String> {
        let is_plain_asm = self.lexer.is("asm");
        if !is_plain_asm && !self.lexer.is("__asm__") && !self.lexer.is("__asm") {
            return Ok(name.value.as_str().to_string());
        }
        if is_plain_asm {
            self.warnings.warn(
                WarningKind::ExtraKeywords,
                Some(self.token().location()),
                "`asm` is a GNU extension (use `__asm__`)",
            )?;
        }
        if is_local
            && specifiers.storage != StorageSpecifier::Extern
            && (!ty.is_function() || specifiers.storage != StorageSpecifier::None)
        {
            return Err(self.fatal(
                Category::Semantic,
                "cannot provide an asm name for a local symbol",
            ));
        }

        self.lexer.consume()?;
        self.lexer.expect("(", "expected `(` in asm name declaration")?;
        if self.token().kind != TokenKind::String {
            return Err(self.fatal(Category::Parse, "expected a string in this asm name declaration"));
        }
        let mut asm_name = String::new();
        while self.token().kind == TokenKind::String {
            asm_name.push_str(self.token().value.as_str());
            self.lexer.consume()?;
        }
        self.lexer.expect(")", "expected `)` after asm name declaration")?;
        Ok(asm_name)
    }

    // === Declarations ===

    /// Parses one declaration. At file scope `parent` is None and an
    /// empty specifier list falls back to implicit int; in block scope
    /// returns false when the tokens do not start a declaration.
    pub(super) fn try_parse_declaration(&mut self, mut parent: Option<&mut Node>) -> CResult<bool> {
        let specifiers = match self.try_parse_declaration_specifiers()? {
            Some(specifiers) => specifiers,
            None => {
                if parent.is_some() {
                    return Ok(false);
                }
                // File scope tolerates implicit int; the declarator parse
                // below will fail if this is not a declaration at all.
                Specifiers::new()
            }
        };
        let base_type = self.make_specifier_type(&specifiers)?;

        let mut first_declarator = true;
        loop {
            let declarator = self.parse_declarator(&base_type, DeclaratorKind::Named)?;
            let (ty, name) = match declarator {
                Some((ty, Some(name))) => (ty, name),
                _ => {
                    // No declarator: fine for a struct/union/enum
                    // declaration, an error otherwise.
                    if !specifiers.has_record_or_enum() {
                        return Err(self.fatal(
                            Category::Parse,
                            "expected a declarator for this declaration",
                        ));
                    }
                    if self.lexer.accept(",")? {
                        first_declarator = false;
                        continue;
                    }
                    self.lexer.expect(";", "expected `;` at end of declaration")?;
                    break;
                }
            };

            if specifiers.storage == StorageSpecifier::Typedef {
                if self.lexer.is("=") || self.lexer.is("{") {
                    return Err(self.fatal_token(
                        &name,
                        Category::Parse,
                        "a definition cannot be provided for a typedef declaration",
                    ));
                }
                self.scopes.add_typedef(name.value.clone(), ty)?;
            } else {
                let asm_name =
                    self.parse_asm_name(&specifiers, &name, &ty, parent.is_some())?;

                if ty.is_function() {
                    if !first_declarator && self.lexer.is("{") {
                        return Err(self.fatal(
                            Category::Parse,
                            "a function definition cannot appear on a declaration with multiple declarators",
                        ));
                    }
                    let was_definition = self.parse_function_declaration(
                        &specifiers,
                        ty,
                        name,
                        asm_name,
                        parent.is_none(),
                    )?;
                    if was_definition {
                        // The body consumed everything; no `;` follows.
                        break;
                    }
                } else {
                    let parent = parent.as_deref_mut();
                    self.parse_variable_declaration(parent, &specifiers, ty, name, asm_name)?;
                }
            }

            if self.lexer.accept(",")? {
                first_declarator = false;
                continue;
            }
            self.lexer.expect(";", "expected `;` or `,` at end of declarator")?;
            break;
        }
        Ok(true)
    }

    // === Functions ===

    /// Returns true when a definition (with body) was parsed.
    fn parse_function_declaration(
        &mut self,
        specifiers: &Specifiers,
        ty: TypeRef,
        name: TokenRef,
        asm_name: String,
        is_file_scope: bool,
    ) -> CResult<bool> {
        let linkage = if specifiers.storage == StorageSpecifier::Static {
            Linkage::Internal
        } else {
            Linkage::External
        };

        // Merge with any previous declaration: the types must match
        // exactly, and internal linkage cannot appear after external.
        let symbol = match self.scopes.find_symbol(&name.value, false) {
            Some(previous) => {
                {
                    let prev = previous.borrow();
                    if prev.kind != SymbolKind::Function {
                        return Err(self.fatal_token(
                            &name,
                            Category::Semantic,
                            "redeclared as a different kind of symbol",
                        ));
                    }
                    if !Type::equal(&prev.ty, &ty) {
                        return Err(self.fatal_token(
                            &name,
                            Category::Semantic,
                            "function re-declared with a different type",
                        ));
                    }
                    if linkage == Linkage::Internal && prev.linkage == Linkage::External {
                        return Err(self.fatal_token(
                            &name,
                            Category::Semantic,
                            "static declaration follows non-static declaration",
                        ));
                    }
                }
                previous
            }
            None => {
                let symbol = Symbol::new(
                    SymbolKind::Function,
                    ty.clone(),
                    name.value.clone(),
                    Some(name.clone()),
                    asm_name,
                );
                symbol.borrow_mut().linkage = linkage;
                self.scopes.add_symbol(symbol.clone())?;
                symbol
            }
        };

        if !self.lexer.is("{") {
            // Just a prototype; the caller consumes `;` or `,`.
            if !self.lexer.is(";") && !self.lexer.is(",") {
                return Err(self.fatal(
                    Category::Parse,
                    "expected `;` or `{` after function declaration",
                ));
            }
            return Ok(false);
        }

        if !is_file_scope {
            return Err(self.fatal(
                Category::Semantic,
                "function definitions can only appear at file scope",
            ));
        }
        if symbol.borrow().is_defined {
            return Err(self.fatal_token(&name, Category::Semantic, "function re-defined"));
        }
        symbol.borrow_mut().is_defined = true;
        self.parse_function_definition(symbol, ty, name)?;
        Ok(true)
    }

    fn parse_function_definition(
        &mut self,
        symbol: SymbolRef,
        ty: TypeRef,
        name: TokenRef,
    ) -> CResult<()> {
        let sig = ty.function().unwrap_or_else(|| unreachable!()).clone();

        // Re-enter the prototype scope so tags declared among the
        // parameters stay visible, then push a fresh scope for the
        // parameters themselves.
        let proto_scope = sig
            .scope
            .borrow()
            .clone()
            .ok_or_else(|| self.fatal(Category::Internal, "function type has no prototype scope"))?;
        self.scopes.apply(proto_scope);
        self.scopes.push();

        let mut root = Node::new(NodeKind::Function, name.clone(), sig.ret.clone());
        root.symbol = Some(symbol.clone());

        for param in &sig.params {
            let param_name = match &param.name {
                Some(param_name) => param_name,
                None => {
                    // Unnamed parameters still occupy an argument slot.
                    let mut node =
                        Node::new(NodeKind::Parameter, name.clone(), param.ty.clone());
                    node.symbol = None;
                    root.append(node);
                    continue;
                }
            };

            // Arrays and functions decay to pointers in parameter lists.
            let param_ty = if param.ty.is_array() {
                let element = param.ty.pointed_to().unwrap_or_else(|| unreachable!());
                Type::new_pointer(element.clone(), false, false, false)
            } else if param.ty.is_function() {
                Type::new_pointer(param.ty.clone(), false, false, false)
            } else {
                param.ty.clone()
            };

            let param_symbol = Symbol::new(
                SymbolKind::Variable,
                param_ty.clone(),
                param_name.value.clone(),
                Some(param_name.clone()),
                param_name.value.as_str().to_string(),
            );
            param_symbol.borrow_mut().is_defined = true;
            param_symbol.borrow_mut().indirect = Self::is_wide(&param_ty);
            self.scopes.add_symbol(param_symbol.clone())?;

            let mut node = Node::new(NodeKind::Parameter, param_name.clone(), param_ty);
            node.symbol = Some(param_symbol);
            root.append(node);
        }

        self.current_function = Some(CurrentFunction {
            name: name.clone(),
            symbol: symbol.clone(),
            name_label: None,
        });

        self.lexer.consume()?; // the `{`
        let mut body = Node::new(
            NodeKind::Sequence,
            name.clone(),
            Type::new_base(Base::Void),
        );
        self.parse_block_items(&mut body)?;
        root.append(body);

        if self.options.dump_ast {
            println!();
            root.print_tree(0);
            println!();
        }

        let code = codegen::generate_function(&root, &symbol, self.emitter)?;
        self.emitter.emit_function(&code);

        self.scopes.pop();
        self.scopes.pop();
        self.current_function = None;
        Ok(())
    }

    // === Variables ===

    /// Checks a re-declaration and completes indeterminate array types in
    /// whichever direction has the size.
    fn merge_redeclaration_types(&mut self, old: &SymbolRef, new: &SymbolRef) -> CResult<()> {
        let old_ty = old.borrow().ty.clone();
        let new_ty = new.borrow().ty.clone();

        if let (Type::Array { element: oe, .. }, Type::IndeterminateArray { element: ne }) =
            (&*old_ty, &*new_ty)
        {
            if !Type::equal(oe, ne) {
                return Err(self.redeclaration_mismatch(new));
            }
            new.borrow_mut().ty = old_ty;
            return Ok(());
        }
        if let (Type::IndeterminateArray { element: oe }, Type::Array { element: ne, .. }) =
            (&*old_ty, &*new_ty)
        {
            if !Type::equal(oe, ne) {
                return Err(self.redeclaration_mismatch(new));
            }
            old.borrow_mut().ty = new_ty;
            return Ok(());
        }

        if !Type::equal(&old_ty, &new_ty) {
            return Err(self.redeclaration_mismatch(new));
        }
        Ok(())
    }

    fn redeclaration_mismatch(&self, symbol: &SymbolRef) -> Box<crate::common::error::Diagnostic> {
        self.fatal_with(
            Category::Semantic,
            format!(
                "`{}` re-declared with a different type",
                symbol.borrow().name
            ),
            symbol.borrow().token.as_ref(),
        )
    }

    fn parse_variable_declaration(
        &mut self,
        parent: Option<&mut Node>,
        specifiers: &Specifiers,
        ty: TypeRef,
        name: TokenRef,
        asm_name: String,
    ) -> CResult<()> {
        // Collect the initializer first.
        let mut initializer = None;
        if self.lexer.is("=") {
            if specifiers.storage == StorageSpecifier::Extern {
                return Err(self.fatal(
                    Category::Semantic,
                    "cannot initialize a variable declared `extern`",
                ));
            }
            self.lexer.consume()?;
            initializer = Some(self.parse_initializer(&ty)?);
        }

        let symbol = Symbol::new(
            SymbolKind::Variable,
            ty,
            name.value.clone(),
            Some(name.clone()),
            asm_name,
        );

        match parent {
            Some(parent) => {
                if specifiers.storage == StorageSpecifier::Extern {
                    self.parse_local_extern_declaration(symbol)?;
                } else {
                    self.parse_local_declaration(parent, specifiers, symbol, initializer)?;
                }
            }
            None => self.parse_global_declaration(specifiers, symbol, initializer)?,
        }
        Ok(())
    }

    fn parse_local_extern_declaration(&mut self, symbol: SymbolRef) -> CResult<()> {
        if let Some(previous) = self.scopes.find_symbol(&symbol.borrow().name.clone(), false) {
            if previous.borrow().linkage == Linkage::None {
                return Err(self.redeclaration_mismatch(&symbol));
            }
            self.merge_redeclaration_types(&previous, &symbol)?;
            return Ok(());
        }
        self.scopes.add_symbol(symbol.clone())?;

        let symbol_name = symbol.borrow().name.clone();
        match self.scopes.find_symbol_global(&symbol_name) {
            Some(global) => {
                if !Type::equal(&symbol.borrow().ty, &global.borrow().ty) {
                    return Err(self.redeclaration_mismatch(&symbol));
                }
                let linkage = global.borrow().linkage;
                symbol.borrow_mut().linkage = linkage;
            }
            None => {
                symbol.borrow_mut().linkage = Linkage::External;
                // Leave a hidden file-scope clone so later declarations
                // are checked after this one goes out of scope.
                let hidden = symbol.borrow().clone_hidden();
                self.scopes.add_symbol_global(hidden);
            }
        }
        Ok(())
    }

    fn parse_local_declaration(
        &mut self,
        parent: &mut Node,
        specifiers: &Specifiers,
        symbol: SymbolRef,
        initializer: Option<Node>,
    ) -> CResult<()> {
        let name = symbol.borrow().name.clone();
        if self.scopes.find_symbol(&name, false).is_some() {
            return Err(self.fatal_with(
                Category::Semantic,
                format!("`{}` re-declared in block scope", name),
                symbol.borrow().token.as_ref(),
            ));
        }

        // Complete an indeterminate array from its initializer before the
        // size is needed.
        if let Some(init) = &initializer {
            let is_indeterminate =
                matches!(&*symbol.borrow().ty, Type::IndeterminateArray { .. });
            if is_indeterminate {
                symbol.borrow_mut().ty = init.ty.clone();
            }
        }

        self.scopes.add_symbol(symbol.clone())?;

        match specifiers.storage {
            StorageSpecifier::None | StorageSpecifier::Auto | StorageSpecifier::Register => {
                symbol.borrow_mut().is_defined = true;
                if symbol.borrow().ty.size().is_none() {
                    return Err(self.fatal_with(
                        Category::Semantic,
                        format!("`{}` has incomplete type", name),
                        symbol.borrow().token.as_ref(),
                    ));
                }
                let token = symbol.borrow().token.clone().unwrap_or_else(|| self.token().clone());
                let ty = symbol.borrow().ty.clone();
                let mut node = Node::new(NodeKind::Variable, token, ty);
                node.symbol = Some(symbol.clone());
                if let Some(init) = initializer {
                    node.append(init);
                }
                parent.append(node);
            }
            StorageSpecifier::Static => {
                // Static locals get a unique asm label and are emitted
                // with the globals.
                symbol.borrow_mut().is_defined = true;
                symbol.borrow_mut().linkage = Linkage::Internal;
                let unique = {
                    let sym = symbol.borrow();
                    self.emitter.alloc_static_name(&sym.asm_name)
                };
                symbol.borrow_mut().asm_name = unique;
                self.emit_variable_data(&symbol, initializer.as_ref())?;
            }
            StorageSpecifier::Typedef | StorageSpecifier::Extern => {
                return Err(self.fatal(
                    Category::Internal,
                    "invalid storage specifier for a local variable declaration",
                ))
            }
        }
        Ok(())
    }

    fn parse_global_declaration(
        &mut self,
        specifiers: &Specifiers,
        symbol: SymbolRef,
        initializer: Option<Node>,
    ) -> CResult<()> {
        {
            let mut sym = symbol.borrow_mut();
            sym.linkage = if specifiers.storage == StorageSpecifier::Static {
                Linkage::Internal
            } else {
                Linkage::External
            };
            sym.is_tentative =
                initializer.is_none() && specifiers.storage != StorageSpecifier::Extern;
            sym.is_defined = initializer.is_some();
        }

        let name = symbol.borrow().name.clone();
        if let Some(previous) = self.scopes.find_symbol(&name, false) {
            if previous.borrow().kind != SymbolKind::Variable {
                return Err(self.redeclaration_mismatch(&symbol));
            }
            self.merge_redeclaration_types(&previous, &symbol)?;

            if specifiers.storage == StorageSpecifier::Extern {
                let linkage = previous.borrow().linkage;
                symbol.borrow_mut().linkage = linkage;
            } else if previous.borrow().linkage != symbol.borrow().linkage {
                return Err(self.fatal_with(
                    Category::Semantic,
                    format!("`{}` re-declared with a different linkage", name),
                    symbol.borrow().token.as_ref(),
                ));
            }

            if previous.borrow().is_defined && symbol.borrow().is_defined {
                return Err(self.fatal_with(
                    Category::Semantic,
                    format!("`{}` re-defined at file scope", name),
                    symbol.borrow().token.as_ref(),
                ));
            }

            // The new declaration replaces the old if it defines, or if
            // it is tentative and the old one was a pure extern.
            let replaces = symbol.borrow().is_defined
                || (symbol.borrow().is_tentative
                    && !previous.borrow().is_defined
                    && !previous.borrow().is_tentative);
            if replaces {
                self.scopes.replace_symbol(symbol.clone());
            } else {
                return Ok(());
            }
        } else {
            self.scopes.add_symbol(symbol.clone())?;
        }

        // Complete an indeterminate array from its initializer.
        if let Some(init) = &initializer {
            let is_indeterminate =
                matches!(&*symbol.borrow().ty, Type::IndeterminateArray { .. });
            if is_indeterminate {
                symbol.borrow_mut().ty = init.ty.clone();
            }
        }

        if symbol.borrow().is_defined && symbol.borrow().linkage != Linkage::None {
            self.emit_variable_data(&symbol, initializer.as_ref())?;
        }
        Ok(())
    }

    /// Emits the storage of a defined global or static local.
    fn emit_variable_data(&mut self, symbol: &SymbolRef, initializer: Option<&Node>) -> CResult<()> {
        let sym = symbol.borrow();
        let data = codegen::global_data(&sym.ty, initializer)?;
        self.emitter.emit_global(
            &sym.asm_name,
            sym.linkage == Linkage::External,
            &data,
            sym.token.as_ref(),
        );
        Ok(())
    }

    // === Initializers ===

    /// Parses an initializer for `ty`. The returned node's type completes
    /// indeterminate arrays (its `ty` carries the deduced length).
    pub(super) fn parse_initializer(&mut self, ty: &TypeRef) -> CResult<Node> {
        // A string literal may initialize a character array directly.
        if self.token().kind == TokenKind::String {
            if let Some(element) = ty.pointed_to() {
                if ty.is_array() && element.size() == Some(1) {
                    let string = self.parse_string()?;
                    return self.check_string_initializer(string, ty);
                }
            }
        }

        if !self.lexer.is("{") {
            let expr = self.parse_assignment_expression()?;
            let expr = expr.decay();
            if ty.is_record() {
                if !Type::compatible_unqual(&expr.ty, ty) {
                    return Err(self.fatal(
                        Category::Semantic,
                        "struct/union initializer has the wrong type",
                    ));
                }
                return Ok(expr);
            }
            if ty.is_array() {
                return Err(self.fatal(
                    Category::Semantic,
                    "an array initializer must be a brace list or a string literal",
                ));
            }
            return Ok(expr.cast(ty, None));
        }

        let brace = self.lexer.take()?;
        let mut list = Node::new(NodeKind::InitializerList, brace, ty.clone());

        if self.lexer.is("[") || self.lexer.is(".") {
            return Err(self.fatal(
                Category::Unsupported,
                "designated initializers are not supported",
            ));
        }

        match &**ty {
            Type::Array { element, count } => {
                let mut index = 0u32;
                while !self.lexer.accept("}")? {
                    if index >= *count {
                        return Err(self.fatal(Category::Semantic, "too many initializers for array"));
                    }
                    list.append(self.parse_initializer(element)?);
                    index += 1;
                    if !self.lexer.is("}") {
                        self.lexer.expect(",", "expected `,` or `}` in initializer list")?;
                    }
                }
            }
            Type::IndeterminateArray { element } => {
                let mut count = 0u32;
                while !self.lexer.accept("}")? {
                    list.append(self.parse_initializer(element)?);
                    count += 1;
                    if !self.lexer.is("}") {
                        self.lexer.expect(",", "expected `,` or `}` in initializer list")?;
                    }
                }
                list.ty = Type::new_array(element.clone(), count);
            }
            Type::Record { record, .. } => {
                if !record.borrow().is_defined {
                    return Err(self.fatal(
                        Category::Semantic,
                        "cannot initialize a struct/union of incomplete type",
                    ));
                }
                let members: Vec<TypeRef> = {
                    let record = record.borrow();
                    let list = if record.is_struct {
                        record.members.iter().map(|m| m.ty.clone()).collect()
                    } else {
                        // Union: only the first member is initialized.
                        record.members.first().map(|m| m.ty.clone()).into_iter().collect()
                    };
                    list
                };
                let mut index = 0usize;
                while !self.lexer.accept("}")? {
                    if index >= members.len() {
                        return Err(self.fatal(
                            Category::Semantic,
                            "too many initializers for struct/union",
                        ));
                    }
                    list.append(self.parse_initializer(&members[index])?);
                    index += 1;
                    if !self.lexer.is("}") {
                        self.lexer.expect(",", "expected `,` or `}` in initializer list")?;
                    }
                }
            }
            _ => {
                // A braced scalar: exactly one element.
                list.append(self.parse_initializer(ty)?);
                self.lexer.expect("}", "expected `}` after scalar initializer")?;
            }
        }
        Ok(list)
    }

    fn check_string_initializer(&mut self, string: Node, ty: &TypeRef) -> CResult<Node> {
        let len = string.ty.size().unwrap_or(0);
        match &**ty {
            Type::Array { count, .. } => {
                // The terminating null may be dropped when the array is
                // exactly the string length.
                if len.saturating_sub(1) > *count {
                    return Err(self.fatal(
                        Category::Semantic,
                        "string literal is too long for this array",
                    ));
                }
                let mut string = string;
                string.ty = ty.clone();
                Ok(string)
            }
            Type::IndeterminateArray { .. } => Ok(string),
            _ => Err(self.fatal(Category::Internal, "string initializer for a non-array")),
        }
    }
}

impl<'a> Parser<'a> {
    /// The function type of the function currently being defined.
    pub(super) fn current_function_sig(&self) -> Option<Rc<crate::frontend::types::FunctionSig>> {
        self.current_function
            .as_ref()
            .and_then(|f| f.symbol.borrow().ty.function().cloned())
    }
}
