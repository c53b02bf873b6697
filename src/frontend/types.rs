//! The type system.
//!
//! A type is either a base type (possibly qualified) or a declarator node
//! wrapping a referenced type, forming a singly-linked chain from the
//! outermost declarator inward. Types are reference counted; each
//! declaration constructs fresh chains, only the records and enums behind
//! them are shared.
//!
//! Sizes are for the 32-bit target: pointers are 4 bytes and `long` is the
//! same width as `int` (but keeps its own rank).

use std::cell::RefCell;
use std::rc::Rc;

use crate::frontend::record::{EnumRef, RecordRef};
use crate::frontend::scope::ScopeRef;
use crate::frontend::lexer::TokenRef;

/// Primitive base types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Base {
    Void,
    Bool,
    /// Plain `char`: signed on this target but a distinct type.
    Char,
    SignedChar,
    UnsignedChar,
    SignedShort,
    UnsignedShort,
    SignedInt,
    UnsignedInt,
    SignedLong,
    UnsignedLong,
    SignedLongLong,
    UnsignedLongLong,
    Float,
    Double,
    /// `long double` has the same representation as `double` here.
    LongDouble,
}

/// A function parameter: type plus the declared name (if any).
#[derive(Debug, Clone)]
pub struct Param {
    pub ty: TypeRef,
    pub name: Option<TokenRef>,
}

/// A function signature, shared by the function type that introduced it.
#[derive(Debug)]
pub struct FunctionSig {
    pub ret: TypeRef,
    pub params: Vec<Param>,
    pub variadic: bool,
    /// The prototype scope, so tags declared among the parameters stay
    /// visible inside the function body.
    pub scope: RefCell<Option<ScopeRef>>,
}

#[derive(Debug)]
pub enum Type {
    Base {
        base: Base,
        is_const: bool,
        is_volatile: bool,
    },
    Record {
        record: RecordRef,
        is_const: bool,
        is_volatile: bool,
    },
    Enum {
        def: EnumRef,
        is_const: bool,
        is_volatile: bool,
    },
    Pointer {
        target: TypeRef,
        is_const: bool,
        is_volatile: bool,
        is_restrict: bool,
    },
    Array {
        element: TypeRef,
        count: u32,
    },
    /// `T x[]`: an array whose length is not yet known. Legal only as a
    /// function parameter, a flexible struct member, or a variable later
    /// completed by its initializer or another declaration.
    IndeterminateArray {
        element: TypeRef,
    },
    Function(Rc<FunctionSig>),
}

pub type TypeRef = Rc<Type>;

impl Type {
    // === Construction ===

    pub fn new_base(base: Base) -> TypeRef {
        Rc::new(Type::Base {
            base,
            is_const: false,
            is_volatile: false,
        })
    }

    pub fn new_record(record: RecordRef) -> TypeRef {
        Rc::new(Type::Record {
            record,
            is_const: false,
            is_volatile: false,
        })
    }

    pub fn new_enum(def: EnumRef) -> TypeRef {
        Rc::new(Type::Enum {
            def,
            is_const: false,
            is_volatile: false,
        })
    }

    pub fn new_pointer(target: TypeRef, is_const: bool, is_volatile: bool, is_restrict: bool) -> TypeRef {
        Rc::new(Type::Pointer {
            target,
            is_const,
            is_volatile,
            is_restrict,
        })
    }

    pub fn new_array(element: TypeRef, count: u32) -> TypeRef {
        Rc::new(Type::Array { element, count })
    }

    pub fn new_indeterminate(element: TypeRef) -> TypeRef {
        Rc::new(Type::IndeterminateArray { element })
    }

    pub fn new_function(ret: TypeRef, params: Vec<Param>, variadic: bool) -> TypeRef {
        Rc::new(Type::Function(Rc::new(FunctionSig {
            ret,
            params,
            variadic,
            scope: RefCell::new(None),
        })))
    }

    /// Returns a copy of this type with const/volatile set on the
    /// outermost node. Arrays forward qualifiers to their element type.
    pub fn qualify(ty: &TypeRef, add_const: bool, add_volatile: bool) -> TypeRef {
        if !add_const && !add_volatile {
            return ty.clone();
        }
        match &**ty {
            Type::Base { base, is_const, is_volatile } => Rc::new(Type::Base {
                base: *base,
                is_const: *is_const || add_const,
                is_volatile: *is_volatile || add_volatile,
            }),
            Type::Record { record, is_const, is_volatile } => Rc::new(Type::Record {
                record: record.clone(),
                is_const: *is_const || add_const,
                is_volatile: *is_volatile || add_volatile,
            }),
            Type::Enum { def, is_const, is_volatile } => Rc::new(Type::Enum {
                def: def.clone(),
                is_const: *is_const || add_const,
                is_volatile: *is_volatile || add_volatile,
            }),
            Type::Pointer { target, is_const, is_volatile, is_restrict } => {
                Rc::new(Type::Pointer {
                    target: target.clone(),
                    is_const: *is_const || add_const,
                    is_volatile: *is_volatile || add_volatile,
                    is_restrict: *is_restrict,
                })
            }
            Type::Array { element, count } => Rc::new(Type::Array {
                element: Type::qualify(element, add_const, add_volatile),
                count: *count,
            }),
            Type::IndeterminateArray { element } => Rc::new(Type::IndeterminateArray {
                element: Type::qualify(element, add_const, add_volatile),
            }),
            Type::Function(_) => ty.clone(),
        }
    }

    // === Queries ===

    pub fn base(&self) -> Option<Base> {
        match self {
            Type::Base { base, .. } => Some(*base),
            _ => None,
        }
    }

    pub fn matches_base(&self, base: Base) -> bool {
        self.base() == Some(base)
    }

    pub fn is_void(&self) -> bool {
        self.matches_base(Base::Void)
    }

    pub fn is_record(&self) -> bool {
        matches!(self, Type::Record { .. })
    }

    pub fn record(&self) -> Option<&RecordRef> {
        match self {
            Type::Record { record, .. } => Some(record),
            _ => None,
        }
    }

    pub fn is_enum(&self) -> bool {
        matches!(self, Type::Enum { .. })
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer { .. })
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Type::Array { .. } | Type::IndeterminateArray { .. })
    }

    /// Pointer or array.
    pub fn is_indirection(&self) -> bool {
        self.is_pointer() || self.is_array()
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Type::Function(_))
    }

    pub fn function(&self) -> Option<&Rc<FunctionSig>> {
        match self {
            Type::Function(sig) => Some(sig),
            _ => None,
        }
    }

    /// The type a pointer or array refers to.
    pub fn pointed_to(&self) -> Option<&TypeRef> {
        match self {
            Type::Pointer { target, .. } => Some(target),
            Type::Array { element, .. } | Type::IndeterminateArray { element } => Some(element),
            _ => None,
        }
    }

    /// True for indeterminate arrays and zero-length arrays, the two forms
    /// a flexible array member can take.
    pub fn is_flexible_array(&self) -> bool {
        matches!(
            self,
            Type::IndeterminateArray { .. } | Type::Array { count: 0, .. }
        )
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self.base(),
            Some(
                Base::Bool
                    | Base::Char
                    | Base::SignedChar
                    | Base::UnsignedChar
                    | Base::SignedShort
                    | Base::UnsignedShort
                    | Base::SignedInt
                    | Base::UnsignedInt
                    | Base::SignedLong
                    | Base::UnsignedLong
                    | Base::SignedLongLong
                    | Base::UnsignedLongLong
            )
        )
    }

    pub fn is_floating(&self) -> bool {
        matches!(
            self.base(),
            Some(Base::Float | Base::Double | Base::LongDouble)
        )
    }

    /// Integer, floating, or enum.
    pub fn is_arithmetic(&self) -> bool {
        self.is_integer() || self.is_floating() || self.is_enum()
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self.base(),
            Some(
                Base::Char
                    | Base::SignedChar
                    | Base::SignedShort
                    | Base::SignedInt
                    | Base::SignedLong
                    | Base::SignedLongLong
            )
        ) || self.is_enum()
    }

    pub fn is_long_long(&self) -> bool {
        matches!(
            self.base(),
            Some(Base::SignedLongLong | Base::UnsignedLongLong)
        )
    }

    /// Integer conversion rank, low to high:
    /// bool < char < short < int < long < long long.
    pub fn integer_rank(&self) -> Option<u32> {
        if self.is_enum() {
            return Some(4);
        }
        match self.base()? {
            Base::Bool => Some(1),
            Base::Char | Base::SignedChar | Base::UnsignedChar => Some(2),
            Base::SignedShort | Base::UnsignedShort => Some(3),
            Base::SignedInt | Base::UnsignedInt => Some(4),
            Base::SignedLong | Base::UnsignedLong => Some(5),
            Base::SignedLongLong | Base::UnsignedLongLong => Some(6),
            _ => None,
        }
    }

    /// The unsigned base of the same rank as the given signed base.
    pub fn unsigned_of_signed(base: Base) -> Base {
        match base {
            Base::Char | Base::SignedChar => Base::UnsignedChar,
            Base::SignedShort => Base::UnsignedShort,
            Base::SignedInt => Base::UnsignedInt,
            Base::SignedLong => Base::UnsignedLong,
            Base::SignedLongLong => Base::UnsignedLongLong,
            other => other,
        }
    }

    /// Size in bytes. None for incomplete types (void, undefined records,
    /// indeterminate arrays) and functions.
    pub fn size(&self) -> Option<u32> {
        match self {
            Type::Base { base, .. } => match base {
                Base::Void => None,
                Base::Bool | Base::Char | Base::SignedChar | Base::UnsignedChar => Some(1),
                Base::SignedShort | Base::UnsignedShort => Some(2),
                Base::SignedInt | Base::UnsignedInt | Base::SignedLong | Base::UnsignedLong => {
                    Some(4)
                }
                Base::SignedLongLong | Base::UnsignedLongLong => Some(8),
                Base::Float => Some(4),
                Base::Double | Base::LongDouble => Some(8),
            },
            Type::Record { record, .. } => {
                let record = record.borrow();
                if record.is_defined {
                    Some(record.size)
                } else {
                    None
                }
            }
            Type::Enum { .. } => Some(4),
            Type::Pointer { .. } => Some(4),
            Type::Array { element, count } => Some(element.size()?.checked_mul(*count)?),
            Type::IndeterminateArray { .. } => None,
            Type::Function(_) => None,
        }
    }

    /// Alignment in bytes. Scalars align to their size, records to their
    /// computed alignment, arrays to their element alignment.
    pub fn alignment(&self) -> u32 {
        match self {
            Type::Base { base, .. } => match base {
                Base::Void => 1,
                Base::Bool | Base::Char | Base::SignedChar | Base::UnsignedChar => 1,
                Base::SignedShort | Base::UnsignedShort => 2,
                Base::SignedLongLong | Base::UnsignedLongLong => 4,
                Base::Double | Base::LongDouble => 4,
                _ => 4,
            },
            Type::Record { record, .. } => record.borrow().alignment.max(1),
            Type::Enum { .. } => 4,
            Type::Pointer { .. } => 4,
            Type::Array { element, .. } | Type::IndeterminateArray { element } => {
                element.alignment()
            }
            Type::Function(_) => 4,
        }
    }

    /// A type is complete when its size is known.
    pub fn is_complete(&self) -> bool {
        self.size().is_some()
    }

    /// Structural equality, qualifiers included. Records and enums compare
    /// by identity.
    pub fn equal(a: &TypeRef, b: &TypeRef) -> bool {
        if Rc::ptr_eq(a, b) {
            return true;
        }
        match (&**a, &**b) {
            (
                Type::Base { base: ba, is_const: ca, is_volatile: va },
                Type::Base { base: bb, is_const: cb, is_volatile: vb },
            ) => ba == bb && ca == cb && va == vb,
            (
                Type::Record { record: ra, is_const: ca, is_volatile: va },
                Type::Record { record: rb, is_const: cb, is_volatile: vb },
            ) => Rc::ptr_eq(ra, rb) && ca == cb && va == vb,
            (
                Type::Enum { def: ea, is_const: ca, is_volatile: va },
                Type::Enum { def: eb, is_const: cb, is_volatile: vb },
            ) => Rc::ptr_eq(ea, eb) && ca == cb && va == vb,
            (
                Type::Pointer { target: ta, is_const: ca, is_volatile: va, is_restrict: ra },
                Type::Pointer { target: tb, is_const: cb, is_volatile: vb, is_restrict: rb },
            ) => ca == cb && va == vb && ra == rb && Type::equal(ta, tb),
            (Type::Array { element: ea, count: na }, Type::Array { element: eb, count: nb }) => {
                na == nb && Type::equal(ea, eb)
            }
            (
                Type::IndeterminateArray { element: ea },
                Type::IndeterminateArray { element: eb },
            ) => Type::equal(ea, eb),
            (Type::Function(fa), Type::Function(fb)) => {
                fa.variadic == fb.variadic
                    && fa.params.len() == fb.params.len()
                    && Type::equal(&fa.ret, &fb.ret)
                    && fa
                        .params
                        .iter()
                        .zip(fb.params.iter())
                        .all(|(pa, pb)| Type::equal(&pa.ty, &pb.ty))
            }
            _ => false,
        }
    }

    /// Equality ignoring top-level qualifiers.
    pub fn compatible_unqual(a: &TypeRef, b: &TypeRef) -> bool {
        match (&**a, &**b) {
            (Type::Base { base: ba, .. }, Type::Base { base: bb, .. }) => ba == bb,
            (Type::Record { record: ra, .. }, Type::Record { record: rb, .. }) => {
                Rc::ptr_eq(ra, rb)
            }
            (Type::Enum { def: ea, .. }, Type::Enum { def: eb, .. }) => Rc::ptr_eq(ea, eb),
            (Type::Pointer { target: ta, .. }, Type::Pointer { target: tb, .. }) => {
                Type::equal(ta, tb)
            }
            _ => Type::equal(a, b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_sizes() {
        assert_eq!(Type::new_base(Base::Char).size(), Some(1));
        assert_eq!(Type::new_base(Base::SignedShort).size(), Some(2));
        assert_eq!(Type::new_base(Base::SignedInt).size(), Some(4));
        assert_eq!(Type::new_base(Base::SignedLong).size(), Some(4));
        assert_eq!(Type::new_base(Base::SignedLongLong).size(), Some(8));
        assert_eq!(Type::new_base(Base::Double).size(), Some(8));
        assert_eq!(Type::new_base(Base::Void).size(), None);
        let ptr = Type::new_pointer(Type::new_base(Base::Void), false, false, false);
        assert_eq!(ptr.size(), Some(4));
    }

    #[test]
    fn array_size_multiplies() {
        let a = Type::new_array(Type::new_base(Base::SignedInt), 4);
        assert_eq!(a.size(), Some(16));
        assert_eq!(a.alignment(), 4);
        let indeterminate = Type::new_indeterminate(Type::new_base(Base::Char));
        assert_eq!(indeterminate.size(), None);
        assert!(indeterminate.is_flexible_array());
    }

    #[test]
    fn rank_ordering() {
        let ranks: Vec<u32> = [
            Base::Bool,
            Base::Char,
            Base::SignedShort,
            Base::SignedInt,
            Base::SignedLong,
            Base::SignedLongLong,
        ]
        .iter()
        .map(|&b| Type::new_base(b).integer_rank().unwrap())
        .collect();
        for pair in ranks.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn equality_includes_qualifiers() {
        let a = Type::new_base(Base::SignedInt);
        let b = Type::qualify(&Type::new_base(Base::SignedInt), true, false);
        assert!(!Type::equal(&a, &b));
        assert!(Type::compatible_unqual(&a, &b));
    }

    #[test]
    fn pointer_chains_compare_structurally() {
        let a = Type::new_pointer(Type::new_base(Base::Char), false, false, false);
        let b = Type::new_pointer(Type::new_base(Base::Char), false, false, false);
        assert!(Type::equal(&a, &b));
        let c = Type::new_pointer(Type::new_base(Base::SignedInt), false, false, false);
        assert!(!Type::equal(&a, &c));
    }

    #[test]
    fn plain_char_is_distinct_but_signed() {
        let c = Type::new_base(Base::Char);
        let sc = Type::new_base(Base::SignedChar);
        assert!(!Type::equal(&c, &sc));
        assert!(c.is_signed());
    }
}
