use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Global,
    Local,
    Free,
    Builtin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub scope: Scope,
    pub index: usize,
}

/// A lexical scope: the root table (no outer) is `Global`, every enclosed
/// table is `Local`. Resolving a name bound in some outer non-global,
/// non-builtin scope promotes it to `Free` here and in every intermediate
/// scope between its definition and this use.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    outer: Option<Box<SymbolTable>>,
    store: FxHashMap<String, Symbol>,
    pub free_symbols: Vec<Symbol>,
    num_definitions: usize,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            outer: None,
            store: FxHashMap::default(),
            free_symbols: Vec::new(),
            num_definitions: 0,
        }
    }

    /// Pushes a new enclosed scope, taking ownership of the current one as
    /// its outer link.
    pub fn enclose(self) -> Self {
        SymbolTable {
            outer: Some(Box::new(self)),
            store: FxHashMap::default(),
            free_symbols: Vec::new(),
            num_definitions: 0,
        }
    }

    /// Pops back to the outer scope. Panics if called on the root table.
    pub fn leave(self) -> Self {
        *self.outer.expect("leave called on the root symbol table")
    }

    pub fn is_global(&self) -> bool {
        self.outer.is_none()
    }

    pub fn local_count(&self) -> usize {
        self.num_definitions
    }

    pub fn define(&mut self, name: &str) -> Symbol {
        let scope = if self.is_global() { Scope::Global } else { Scope::Local };
        let symbol = Symbol { name: name.to_string(), scope, index: self.num_definitions };
        self.store.insert(name.to_string(), symbol.clone());
        self.num_definitions += 1;
        symbol
    }

    pub fn define_builtin(&mut self, index: usize, name: &str) -> Symbol {
        let symbol = Symbol { name: name.to_string(), scope: Scope::Builtin, index };
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    fn define_free(&mut self, original: Symbol) -> Symbol {
        self.free_symbols.push(original.clone());
        let symbol = Symbol {
            name: original.name.clone(),
            scope: Scope::Free,
            index: self.free_symbols.len() - 1,
        };
        self.store.insert(original.name, symbol.clone());
        symbol
    }

    pub fn resolve(&mut self, name: &str) -> Option<Symbol> {
        if let Some(symbol) = self.store.get(name) {
            return Some(symbol.clone());
        }
        let outer = self.outer.as_mut()?;
        let resolved = outer.resolve(name)?;
        match resolved.scope {
            Scope::Global | Scope::Builtin => Some(resolved),
            Scope::Local | Scope::Free => Some(self.define_free(resolved)),
        }
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_in_global_scope() {
        let mut global = SymbolTable::new();
        let a = global.define("a");
        let b = global.define("b");
        assert_eq!(a, Symbol { name: "a".into(), scope: Scope::Global, index: 0 });
        assert_eq!(b, Symbol { name: "b".into(), scope: Scope::Global, index: 1 });
    }

    #[test]
    fn test_resolve_global() {
        let mut global = SymbolTable::new();
        global.define("a");
        global.define("b");
        assert_eq!(global.resolve("a").unwrap().scope, Scope::Global);
        assert_eq!(global.resolve("b").unwrap().index, 1);
        assert!(global.resolve("c").is_none());
    }

    #[test]
    fn test_resolve_local() {
        let mut global = SymbolTable::new();
        global.define("a");
        let mut local = global.enclose();
        local.define("b");
        local.define("c");
        assert_eq!(local.resolve("a").unwrap().scope, Scope::Global);
        assert_eq!(local.resolve("b").unwrap(), Symbol { name: "b".into(), scope: Scope::Local, index: 0 });
        assert_eq!(local.resolve("c").unwrap(), Symbol { name: "c".into(), scope: Scope::Local, index: 1 });
    }

    #[test]
    fn test_resolve_nested_local() {
        let mut global = SymbolTable::new();
        global.define("a");
        let mut first = global.enclose();
        first.define("b");
        let mut second = first.enclose();
        second.define("c");
        assert_eq!(second.resolve("a").unwrap().scope, Scope::Global);
        assert_eq!(second.resolve("c").unwrap().scope, Scope::Local);
    }

    #[test]
    fn test_define_resolve_builtins() {
        let mut global = SymbolTable::new();
        global.define_builtin(0, "len");
        let mut first = global.clone().enclose();
        let mut second = first.clone().enclose();
        for table in [&mut global, &mut first, &mut second] {
            assert_eq!(table.resolve("len").unwrap(), Symbol { name: "len".into(), scope: Scope::Builtin, index: 0 });
        }
    }

    #[test]
    fn test_resolve_free_one_level_deep() {
        let mut global = SymbolTable::new();
        global.define("a");
        let mut first = global.enclose();
        first.define("b");
        let mut second = first.enclose();
        second.define("c");
        second.define("d");

        assert_eq!(second.resolve("a").unwrap().scope, Scope::Global);
        assert_eq!(second.resolve("b").unwrap(), Symbol { name: "b".into(), scope: Scope::Free, index: 0 });
        assert_eq!(second.resolve("c").unwrap(), Symbol { name: "c".into(), scope: Scope::Local, index: 0 });
        assert_eq!(second.free_symbols, vec![Symbol { name: "b".into(), scope: Scope::Local, index: 0 }]);
    }

    #[test]
    fn test_resolve_free_promotes_through_intermediate_scopes() {
        // "a" is bound two function-scopes out; resolving it from the
        // innermost scope must promote it to Free in every scope between
        // its definition and this use, not just the innermost one.
        let global = SymbolTable::new();
        let mut first = global.enclose();
        first.define("a");
        let mut second = first.enclose();
        second.define("c");
        let mut third = second.enclose();

        assert_eq!(third.resolve("a").unwrap(), Symbol { name: "a".into(), scope: Scope::Free, index: 0 });

        let second = third.leave();
        assert_eq!(second.free_symbols, vec![Symbol { name: "a".into(), scope: Scope::Local, index: 0 }]);
    }

    #[test]
    fn test_unresolvable_free_variable() {
        let global = SymbolTable::new();
        let mut first = global.enclose();
        first.define("a");
        let mut second = first.enclose();
        second.define("b");
        assert!(second.resolve("c").is_none());
    }
}
