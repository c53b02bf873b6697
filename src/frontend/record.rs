//! Struct/union layout and enums.
//!
//! A record accumulates members one at a time as the parser reads them;
//! offsets, alignment and total size are maintained incrementally. Members
//! of anonymous struct/union members are flattened into the parent's name
//! map with their offsets shifted, so lookup never has to recurse.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::common::error::{Category, CResult, Diagnostic};
use crate::common::intern::Name;
use crate::frontend::lexer::TokenRef;
use crate::frontend::types::TypeRef;

/// One member in declaration order. Anonymous members have no name.
#[derive(Debug, Clone)]
pub struct Member {
    pub name: Option<TokenRef>,
    pub ty: TypeRef,
    pub offset: u32,
}

#[derive(Debug)]
pub struct Record {
    pub tag: Option<TokenRef>,
    pub is_struct: bool,
    pub members: Vec<Member>,
    /// Flattened name map: direct members plus the members of anonymous
    /// record members, with offsets relative to this record.
    map: FxHashMap<Name, (TypeRef, u32)>,
    pub size: u32,
    pub alignment: u32,
    pub is_defined: bool,
}

pub type RecordRef = Rc<RefCell<Record>>;

fn align_up(offset: u32, alignment: u32) -> u32 {
    debug_assert!(alignment.is_power_of_two());
    (offset + alignment - 1) & !(alignment - 1)
}

impl Record {
    pub fn new(tag: Option<TokenRef>, is_struct: bool) -> RecordRef {
        Rc::new(RefCell::new(Record {
            tag,
            is_struct,
            members: Vec::new(),
            map: FxHashMap::default(),
            size: 0,
            alignment: 0,
            is_defined: false,
        }))
    }

    fn err(token: Option<&TokenRef>, message: impl Into<String>) -> Box<Diagnostic> {
        let mut diag = Diagnostic::new(Category::Semantic, message);
        if let Some(token) = token {
            diag.location = Some(token.location());
        }
        Box::new(diag)
    }

    fn add_to_map(
        &mut self,
        name: &Name,
        token: Option<&TokenRef>,
        ty: &TypeRef,
        offset: u32,
    ) -> CResult<()> {
        if self.map.contains_key(name) {
            return Err(Self::err(
                token,
                format!("struct/union member `{}` duplicates a previous member", name),
            ));
        }
        self.map.insert(name.clone(), (ty.clone(), offset));
        Ok(())
    }

    /// Appends a member, computing its offset and updating the record's
    /// alignment and size. A None name with a record type is an anonymous
    /// member whose own members become visible here.
    pub fn add(&mut self, name: Option<TokenRef>, ty: TypeRef, err_token: Option<&TokenRef>) -> CResult<()> {
        // A flexible array member must be the last member, and structs only.
        if let Some(last) = self.members.last() {
            if last.ty.is_flexible_array() {
                return Err(Self::err(
                    err_token,
                    "only the last member of a struct may be an array of zero or indeterminate length",
                ));
            }
        }
        if ty.is_flexible_array() && !self.is_struct {
            return Err(Self::err(
                err_token,
                "unions cannot contain flexible array members",
            ));
        }

        let flexible = ty.is_flexible_array();
        let member_size = if flexible {
            0
        } else {
            ty.size().ok_or_else(|| {
                Self::err(err_token, "struct/union member has incomplete type")
            })?
        };

        // Offset: past the previous member for structs, zero for unions.
        let mut offset = 0;
        if self.is_struct {
            if let Some(last) = self.members.last() {
                let last_size = if last.ty.is_flexible_array() {
                    0
                } else {
                    last.ty.size().unwrap_or(0)
                };
                offset = last.offset + last_size;
            }
        }

        let alignment = ty.alignment();
        if self.alignment < alignment {
            self.alignment = alignment;
        }
        offset = align_up(offset, alignment);

        if let Some(name_token) = &name {
            self.add_to_map(&name_token.value, Some(name_token), &ty, offset)?;
        } else if let Some(child) = ty.record() {
            // Flatten the anonymous member's map into ours, shifted.
            let child = child.borrow();
            let mut entries: Vec<(Name, TypeRef, u32)> = child
                .map
                .iter()
                .map(|(n, (t, o))| (n.clone(), t.clone(), *o))
                .collect();
            entries.sort_by_key(|(_, _, o)| *o);
            for (child_name, child_ty, child_offset) in entries {
                self.add_to_map(&child_name, err_token, &child_ty, offset + child_offset)?;
            }
        }

        self.members.push(Member {
            name,
            ty,
            offset,
        });

        let end = align_up(offset + member_size, self.alignment.max(1));
        if end > self.size {
            self.size = end;
        }
        Ok(())
    }

    /// Looks up a member (including flattened anonymous members) by name.
    pub fn find(&self, name: &Name) -> Option<(TypeRef, u32)> {
        self.map.get(name).cloned()
    }
}

/// An enumeration. The enumerators themselves are registered as constant
/// symbols in the enclosing scope, not stored here.
#[derive(Debug)]
pub struct EnumDef {
    pub tag: Option<TokenRef>,
}

pub type EnumRef = Rc<EnumDef>;

impl EnumDef {
    pub fn new(tag: Option<TokenRef>) -> EnumRef {
        Rc::new(EnumDef { tag })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::intern::StringPool;
    use crate::frontend::lexer::{Token, TokenKind};
    use crate::frontend::types::{Base, Type};

    fn token(pool: &mut StringPool, name: &str) -> TokenRef {
        let value = pool.intern(name);
        let file = pool.intern("test.i");
        Token::new(TokenKind::Alphanumeric, value, file, 1)
    }

    #[test]
    fn struct_offsets_are_aligned_and_increasing() {
        let mut pool = StringPool::new();
        let record = Record::new(None, true);
        {
            let mut r = record.borrow_mut();
            r.add(Some(token(&mut pool, "c")), Type::new_base(Base::Char), None)
                .unwrap();
            r.add(Some(token(&mut pool, "i")), Type::new_base(Base::SignedInt), None)
                .unwrap();
            r.add(Some(token(&mut pool, "s")), Type::new_base(Base::SignedShort), None)
                .unwrap();
            r.is_defined = true;
        }
        let r = record.borrow();
        let c = r.find(&pool.intern("c")).unwrap();
        let i = r.find(&pool.intern("i")).unwrap();
        let s = r.find(&pool.intern("s")).unwrap();
        assert_eq!(c.1, 0);
        assert_eq!(i.1, 4);
        assert_eq!(s.1, 8);
        assert_eq!(r.alignment, 4);
        // Total size is padded to the record alignment.
        assert_eq!(r.size, 12);
        assert_eq!(r.size % r.alignment, 0);
        // Offsets strictly increase in declaration order.
        let offsets: Vec<u32> = r.members.iter().map(|m| m.offset).collect();
        for pair in offsets.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn union_members_all_at_zero() {
        let mut pool = StringPool::new();
        let record = Record::new(None, false);
        {
            let mut r = record.borrow_mut();
            r.add(Some(token(&mut pool, "i")), Type::new_base(Base::SignedInt), None)
                .unwrap();
            r.add(Some(token(&mut pool, "d")), Type::new_base(Base::Double), None)
                .unwrap();
            r.is_defined = true;
        }
        let r = record.borrow();
        assert_eq!(r.find(&pool.intern("i")).unwrap().1, 0);
        assert_eq!(r.find(&pool.intern("d")).unwrap().1, 0);
        assert_eq!(r.size, 8);
    }

    #[test]
    fn duplicate_member_is_rejected() {
        let mut pool = StringPool::new();
        let record = Record::new(None, true);
        let mut r = record.borrow_mut();
        r.add(Some(token(&mut pool, "x")), Type::new_base(Base::SignedInt), None)
            .unwrap();
        let result = r.add(Some(token(&mut pool, "x")), Type::new_base(Base::Char), None);
        assert!(result.is_err());
    }

    #[test]
    fn anonymous_members_are_flattened_with_offset() {
        let mut pool = StringPool::new();
        let inner = Record::new(None, true);
        {
            let mut r = inner.borrow_mut();
            r.add(Some(token(&mut pool, "a")), Type::new_base(Base::SignedInt), None)
                .unwrap();
            r.add(Some(token(&mut pool, "b")), Type::new_base(Base::SignedInt), None)
                .unwrap();
            r.is_defined = true;
        }
        let outer = Record::new(None, true);
        {
            let mut r = outer.borrow_mut();
            r.add(Some(token(&mut pool, "head")), Type::new_base(Base::SignedInt), None)
                .unwrap();
            r.add(None, Type::new_record(inner), None).unwrap();
            r.is_defined = true;
        }
        let r = outer.borrow();
        assert_eq!(r.find(&pool.intern("a")).unwrap().1, 4);
        assert_eq!(r.find(&pool.intern("b")).unwrap().1, 8);
        assert_eq!(r.size, 12);
    }

    #[test]
    fn flexible_array_contributes_nothing() {
        let mut pool = StringPool::new();
        let record = Record::new(None, true);
        {
            let mut r = record.borrow_mut();
            r.add(Some(token(&mut pool, "len")), Type::new_base(Base::SignedInt), None)
                .unwrap();
            r.add(
                Some(token(&mut pool, "data")),
                Type::new_indeterminate(Type::new_base(Base::Char)),
                None,
            )
            .unwrap();
            r.is_defined = true;
        }
        assert_eq!(record.borrow().size, 4);
    }

    #[test]
    fn nothing_after_flexible_array() {
        let mut pool = StringPool::new();
        let record = Record::new(None, true);
        let mut r = record.borrow_mut();
        r.add(
            Some(token(&mut pool, "data")),
            Type::new_indeterminate(Type::new_base(Base::Char)),
            None,
        )
        .unwrap();
        let result = r.add(Some(token(&mut pool, "x")), Type::new_base(Base::SignedInt), None);
        assert!(result.is_err());
    }
}
