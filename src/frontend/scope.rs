//! Lexical scopes.
//!
//! Scopes form a stack and carry three name maps: ordinary symbols, tag
//! names (struct/union/enum), and typedef names. Shadowing across scopes
//! is allowed; duplicates within one scope and namespace are not.
//!
//! A function type adopts the scope its parameters were declared in (the
//! prototype scope) so that tags declared inside the prototype survive
//! into the function body.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::common::error::{Category, CResult, Diagnostic};
use crate::common::intern::Name;
use crate::frontend::symbol::SymbolRef;
use crate::frontend::types::TypeRef;

#[derive(Debug, Default)]
pub struct Scope {
    parent: Option<ScopeRef>,
    symbols: FxHashMap<Name, SymbolRef>,
    /// File-scope symbols in declaration order, for the end-of-unit
    /// tentative definition pass.
    order: Vec<SymbolRef>,
    tags: FxHashMap<Name, TypeRef>,
    typedefs: FxHashMap<Name, TypeRef>,
}

pub type ScopeRef = Rc<RefCell<Scope>>;

/// The scope stack. The bottom entry is the global scope and is never
/// popped.
pub struct Scopes {
    stack: Vec<ScopeRef>,
}

impl Scopes {
    pub fn new() -> Self {
        Self {
            stack: vec![Rc::new(RefCell::new(Scope::default()))],
        }
    }

    pub fn current(&self) -> &ScopeRef {
        self.stack.last().unwrap_or_else(|| unreachable!())
    }

    pub fn global(&self) -> &ScopeRef {
        &self.stack[0]
    }

    pub fn at_global(&self) -> bool {
        self.stack.len() == 1
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn push(&mut self) {
        let child = Rc::new(RefCell::new(Scope {
            parent: Some(self.current().clone()),
            ..Scope::default()
        }));
        self.stack.push(child);
    }

    pub fn pop(&mut self) {
        debug_assert!(self.stack.len() > 1);
        self.stack.pop();
    }

    /// Pops the current scope and returns it, for adoption as a prototype
    /// scope.
    pub fn take(&mut self) -> ScopeRef {
        debug_assert!(self.stack.len() > 1);
        self.stack.pop().unwrap_or_else(|| unreachable!())
    }

    /// Re-enters a previously taken scope.
    pub fn apply(&mut self, scope: ScopeRef) {
        self.stack.push(scope);
    }

    /// Finds an ordinary symbol, optionally walking parent scopes up to
    /// and including the global scope.
    pub fn find_symbol(&self, name: &Name, recursive: bool) -> Option<SymbolRef> {
        let mut scope = self.current().clone();
        loop {
            if let Some(symbol) = scope.borrow().symbols.get(name) {
                return Some(symbol.clone());
            }
            if !recursive {
                return None;
            }
            let parent = scope.borrow().parent.clone();
            match parent {
                Some(parent) => scope = parent,
                None => return None,
            }
        }
    }

    /// Adds a symbol to the current scope, rejecting same-scope duplicates.
    pub fn add_symbol(&mut self, symbol: SymbolRef) -> CResult<()> {
        let scope = self.current();
        let name = symbol.borrow().name.clone();
        let mut scope = scope.borrow_mut();
        if scope.symbols.contains_key(&name) {
            let mut diag = Diagnostic::new(
                Category::Semantic,
                format!("`{}` is already declared in this scope", name),
            );
            if let Some(token) = &symbol.borrow().token {
                diag.location = Some(token.location());
            }
            return Err(Box::new(diag));
        }
        scope.symbols.insert(name, symbol.clone());
        scope.order.push(symbol);
        Ok(())
    }

    /// Replaces a symbol in the current scope without a duplicate check.
    /// Used when a definition supersedes a tentative declaration.
    pub fn replace_symbol(&mut self, symbol: SymbolRef) {
        let scope = self.current();
        let name = symbol.borrow().name.clone();
        let mut scope = scope.borrow_mut();
        if let Some(old) = scope.symbols.insert(name, symbol.clone()) {
            scope.order.retain(|s| !Rc::ptr_eq(s, &old));
        }
        scope.order.push(symbol);
    }

    /// Adds a symbol directly to the global scope (hidden clones for
    /// block-scope extern declarations).
    pub fn add_symbol_global(&mut self, symbol: SymbolRef) {
        let name = symbol.borrow().name.clone();
        let mut global = self.global().borrow_mut();
        global.symbols.insert(name, symbol.clone());
        global.order.push(symbol);
    }

    pub fn find_symbol_global(&self, name: &Name) -> Option<SymbolRef> {
        self.global().borrow().symbols.get(name).cloned()
    }

    /// File-scope symbols in declaration order.
    pub fn global_symbols(&self) -> Vec<SymbolRef> {
        self.global().borrow().order.clone()
    }

    pub fn find_tag(&self, name: &Name, recursive: bool) -> Option<TypeRef> {
        self.find_type(name, recursive, false)
    }

    pub fn find_typedef(&self, name: &Name, recursive: bool) -> Option<TypeRef> {
        self.find_type(name, recursive, true)
    }

    fn find_type(&self, name: &Name, recursive: bool, typedefs: bool) -> Option<TypeRef> {
        let mut scope = self.current().clone();
        loop {
            {
                let borrowed = scope.borrow();
                let map = if typedefs { &borrowed.typedefs } else { &borrowed.tags };
                if let Some(ty) = map.get(name) {
                    return Some(ty.clone());
                }
            }
            if !recursive {
                return None;
            }
            let parent = scope.borrow().parent.clone();
            match parent {
                Some(parent) => scope = parent,
                None => return None,
            }
        }
    }

    pub fn add_tag(&mut self, name: Name, ty: TypeRef) -> CResult<()> {
        let mut scope = self.current().borrow_mut();
        if scope.tags.contains_key(&name) {
            return Err(Box::new(Diagnostic::new(
                Category::Semantic,
                format!("tag `{}` is already declared in this scope", name),
            )));
        }
        scope.tags.insert(name, ty);
        Ok(())
    }

    pub fn add_typedef(&mut self, name: Name, ty: TypeRef) -> CResult<()> {
        let mut scope = self.current().borrow_mut();
        if scope.typedefs.contains_key(&name) {
            return Err(Box::new(Diagnostic::new(
                Category::Semantic,
                format!("typedef `{}` is already declared in this scope", name),
            )));
        }
        scope.typedefs.insert(name, ty);
        Ok(())
    }
}

impl Default for Scopes {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::intern::StringPool;
    use crate::frontend::symbol::{Symbol, SymbolKind};
    use crate::frontend::types::{Base, Type};

    fn symbol(pool: &mut StringPool, name: &str) -> SymbolRef {
        Symbol::new(
            SymbolKind::Variable,
            Type::new_base(Base::SignedInt),
            pool.intern(name),
            None,
            name.to_string(),
        )
    }

    #[test]
    fn push_pop_balance_restores_scope() {
        let mut scopes = Scopes::new();
        let global = scopes.current().clone();
        for _ in 0..5 {
            scopes.push();
        }
        for _ in 0..5 {
            scopes.pop();
        }
        assert!(Rc::ptr_eq(scopes.current(), &global));
        assert_eq!(scopes.depth(), 1);
    }

    #[test]
    fn shadowing_across_scopes_is_allowed() {
        let mut pool = StringPool::new();
        let mut scopes = Scopes::new();
        scopes.add_symbol(symbol(&mut pool, "x")).unwrap();
        scopes.push();
        scopes.add_symbol(symbol(&mut pool, "x")).unwrap();
        let name = pool.intern("x");
        let inner = scopes.find_symbol(&name, true).unwrap();
        scopes.pop();
        let outer = scopes.find_symbol(&name, true).unwrap();
        assert!(!Rc::ptr_eq(&inner, &outer));
    }

    #[test]
    fn duplicates_in_one_scope_are_rejected() {
        let mut pool = StringPool::new();
        let mut scopes = Scopes::new();
        scopes.add_symbol(symbol(&mut pool, "x")).unwrap();
        assert!(scopes.add_symbol(symbol(&mut pool, "x")).is_err());
    }

    #[test]
    fn non_recursive_lookup_stays_local() {
        let mut pool = StringPool::new();
        let mut scopes = Scopes::new();
        scopes.add_symbol(symbol(&mut pool, "x")).unwrap();
        scopes.push();
        let name = pool.intern("x");
        assert!(scopes.find_symbol(&name, false).is_none());
        assert!(scopes.find_symbol(&name, true).is_some());
    }

    #[test]
    fn namespaces_are_independent() {
        let mut pool = StringPool::new();
        let mut scopes = Scopes::new();
        let name = pool.intern("T");
        scopes.add_tag(name.clone(), Type::new_base(Base::SignedInt)).unwrap();
        scopes
            .add_typedef(name.clone(), Type::new_base(Base::Char))
            .unwrap();
        assert!(scopes.find_tag(&name, false).is_some());
        assert!(scopes.find_typedef(&name, false).is_some());
        assert!(scopes.find_symbol(&name, false).is_none());
    }

    #[test]
    fn prototype_scope_can_be_taken_and_reapplied() {
        let mut pool = StringPool::new();
        let mut scopes = Scopes::new();
        scopes.push();
        scopes.add_symbol(symbol(&mut pool, "param")).unwrap();
        let proto = scopes.take();
        assert_eq!(scopes.depth(), 1);
        scopes.apply(proto);
        let name = pool.intern("param");
        assert!(scopes.find_symbol(&name, false).is_some());
        scopes.pop();
    }
}
