//! String interning.
//!
//! Every identifier, keyword and literal body that survives lexing is
//! canonicalised through a [`StringPool`]. The pool hands out [`Name`]
//! handles; two handles compare equal iff they point at the same pooled
//! allocation, which the pool guarantees happens exactly when the bytes
//! are equal.

use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use rustc_hash::FxHashMap;

/// A handle to an interned string.
///
/// Equality is pointer equality on the pooled allocation. Hashing is by
/// content, which agrees with equality because the pool never creates two
/// allocations with the same bytes.
#[derive(Clone)]
pub struct Name(Rc<str>);

impl Name {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Name {}

impl std::hash::Hash for Name {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.as_bytes().hash(state);
    }
}

impl Deref for Name {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

/// Owns all interned bytes for the duration of a translation unit.
#[derive(Default)]
pub struct StringPool {
    map: FxHashMap<Box<str>, Rc<str>>,
}

impl StringPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a string, returning the canonical handle for its bytes.
    pub fn intern(&mut self, s: &str) -> Name {
        if let Some(rc) = self.map.get(s) {
            return Name(Rc::clone(rc));
        }
        let rc: Rc<str> = Rc::from(s);
        self.map.insert(Box::from(s), Rc::clone(&rc));
        Name(rc)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_bytes_share_a_handle() {
        let mut pool = StringPool::new();
        let a = pool.intern("main");
        let b = pool.intern("main");
        assert_eq!(a, b);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn distinct_bytes_get_distinct_handles() {
        let mut pool = StringPool::new();
        let a = pool.intern("x");
        let b = pool.intern("y");
        assert_ne!(a, b);
        assert_eq!(a.as_str(), "x");
        assert_eq!(b.as_str(), "y");
    }

    #[test]
    fn handle_equality_matches_byte_equality() {
        let mut pool = StringPool::new();
        let names: Vec<Name> = ["a", "b", "a", "ab", "b"]
            .iter()
            .map(|s| pool.intern(s))
            .collect();
        for i in 0..names.len() {
            for j in 0..names.len() {
                assert_eq!(
                    names[i] == names[j],
                    names[i].as_str() == names[j].as_str()
                );
            }
        }
    }
}
