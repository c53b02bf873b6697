//! The typed abstract syntax tree.
//!
//! Nodes carry their final type: the parser applies integer promotions,
//! usual arithmetic conversions and array decay as it builds the tree, so
//! the generator never re-derives types. Children are owned in order.

use crate::frontend::lexer::TokenRef;
use crate::frontend::symbol::{Builtin, SymbolRef};
use crate::frontend::types::{Base, Type, TypeRef};
use crate::common::intern::Name;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    // Expressions
    Number,
    Character,
    String,
    /// Use of a variable, function or enum constant.
    Access,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    BitNot,
    LogicalNot,
    LogicalAnd,
    LogicalOr,
    Equal,
    NotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    UnaryPlus,
    UnaryMinus,
    Dereference,
    AddressOf,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    ModAssign,
    AndAssign,
    OrAssign,
    XorAssign,
    ShlAssign,
    ShrAssign,
    /// `base.member`; the base child is a location.
    MemberVal,
    /// `base->member`; the base child is a pointer value.
    MemberPtr,
    ArraySubscript,
    Call,
    Cast,
    Sizeof,
    /// Conditional expression and if statement both: children are the
    /// predicate, the then branch, and optionally the else branch.
    If,
    /// Ordered evaluation; the last non-void child provides the value
    /// (comma operator and statement expressions).
    Sequence,
    /// A type name operand (sizeof, va_arg).
    TypeName,

    // Statements
    While,
    DoWhile,
    For,
    Switch,
    Case,
    Default,
    Break,
    Continue,
    Goto,
    Return,
    Label,
    /// A local variable declaration; optional initializer child.
    Variable,
    InitializerList,
    Parameter,
    /// Function root: parameter nodes followed by the body sequence.
    Function,
    BuiltinCall,
}

#[derive(Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub token: TokenRef,
    pub ty: TypeRef,
    pub children: Vec<Node>,
    /// Number and character literal value (bit pattern; may be a float's
    /// bits for floating literals).
    pub value: i64,
    /// The `__S_<hex>` label of a string literal.
    pub string_label: Option<u32>,
    /// A string literal's bytes (without the terminating null), kept for
    /// array initializers.
    pub bytes: Option<Vec<u8>>,
    pub symbol: Option<SymbolRef>,
    /// Member access: resolved name and byte offset.
    pub member: Option<Name>,
    pub member_offset: u32,
    /// Goto and label statements: the target name.
    pub label: Option<Name>,
    pub builtin: Option<Builtin>,
}

impl Node {
    pub fn new(kind: NodeKind, token: TokenRef, ty: TypeRef) -> Node {
        Node {
            kind,
            token,
            ty,
            children: Vec::new(),
            value: 0,
            string_label: None,
            bytes: None,
            symbol: None,
            member: None,
            member_offset: 0,
            label: None,
            builtin: None,
        }
    }

    pub fn append(&mut self, child: Node) {
        self.children.push(child);
    }

    pub fn first(&self) -> &Node {
        &self.children[0]
    }

    pub fn last(&self) -> &Node {
        self.children.last().unwrap_or_else(|| unreachable!())
    }

    /// Wraps this node in a cast to `ty` unless the types already match.
    pub fn cast(self, ty: &TypeRef, token: Option<&TokenRef>) -> Node {
        if Type::equal(&self.ty, ty) {
            return self;
        }
        let token = token.cloned().unwrap_or_else(|| self.token.clone());
        let mut cast = Node::new(NodeKind::Cast, token, ty.clone());
        cast.append(self);
        cast
    }

    pub fn cast_base(self, base: Base, token: Option<&TokenRef>) -> Node {
        if self.ty.matches_base(base) {
            return self;
        }
        self.cast(&Type::new_base(base), token)
    }

    /// Integer promotion: integer and enum operands narrower than int
    /// become int. Everything else is unchanged.
    pub fn promote(self) -> Node {
        if self.ty.is_enum() {
            return self.cast_base(Base::SignedInt, None);
        }
        match self.ty.integer_rank() {
            Some(rank) if rank < 4 => self.cast_base(Base::SignedInt, None),
            _ => self,
        }
    }

    /// Array-to-pointer and function-to-pointer decay.
    pub fn decay(self) -> Node {
        if let Some(element) = self.ty.pointed_to() {
            if self.ty.is_array() {
                let ptr = Type::new_pointer(element.clone(), false, false, false);
                return self.cast(&ptr, None);
            }
        }
        if self.ty.is_function() {
            let ptr = Type::new_pointer(self.ty.clone(), false, false, false);
            return self.cast(&ptr, None);
        }
        self
    }

    /// The condition of if/while/for/?: and of `!`: decays and casts to
    /// bool so the generated value is exactly 0 or 1.
    pub fn make_predicate(self) -> Node {
        self.decay().cast_base(Base::Bool, None)
    }

    /// A literal integer zero, valid as a null pointer constant.
    pub fn is_null(&self) -> bool {
        self.kind == NodeKind::Number && self.value == 0 && self.ty.is_integer()
    }

    /// Whether this expression designates a storage location.
    pub fn is_location(&self) -> bool {
        match self.kind {
            NodeKind::Access => self
                .symbol
                .as_ref()
                .map(|s| {
                    matches!(
                        s.borrow().kind,
                        crate::frontend::symbol::SymbolKind::Variable
                    )
                })
                .unwrap_or(false),
            NodeKind::Dereference | NodeKind::MemberPtr | NodeKind::ArraySubscript => true,
            NodeKind::MemberVal => self.first().is_location(),
            _ => false,
        }
    }

    /// Debug dump for `--dump-ast`.
    pub fn print_tree(&self, depth: usize) {
        let indent = "  ".repeat(depth);
        let mut extra = String::new();
        match self.kind {
            NodeKind::Number | NodeKind::Character => extra = format!(" value={}", self.value),
            NodeKind::String => {
                if let Some(label) = self.string_label {
                    extra = format!(" label=__S_{:x}", label);
                }
            }
            NodeKind::Access => {
                if let Some(symbol) = &self.symbol {
                    extra = format!(" `{}`", symbol.borrow().name);
                }
            }
            NodeKind::MemberVal | NodeKind::MemberPtr => {
                if let Some(member) = &self.member {
                    extra = format!(" .{} +{}", member, self.member_offset);
                }
            }
            NodeKind::Goto | NodeKind::Label => {
                if let Some(label) = &self.label {
                    extra = format!(" `{}`", label);
                }
            }
            _ => {}
        }
        println!("{}{:?}{}", indent, self.kind, extra);
        for child in &self.children {
            child.print_tree(depth + 1);
        }
    }
}
