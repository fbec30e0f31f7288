use ahash::AHashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Interned string used for metric names and tag keys/values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl Symbol {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Default)]
struct Table {
    lookup: AHashMap<Arc<str>, Symbol>,
    names: Vec<Arc<str>>,
}

/// Append-only string table. Symbols are never reused, so a `Symbol` stays
/// valid for the lifetime of the table.
#[derive(Debug, Default)]
pub struct SymbolTable {
    inner: RwLock<Table>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&self, s: &str) -> Symbol {
        if let Some(sym) = self.get(s) {
            return sym;
        }

        let mut table = self.inner.write();
        if let Some(&sym) = table.lookup.get(s) {
            return sym;
        }

        let sym = Symbol(table.names.len() as u32);
        let name: Arc<str> = Arc::from(s);
        table.names.push(name.clone());
        table.lookup.insert(name, sym);
        sym
    }

    /// Looks a string up without interning it.
    pub fn get(&self, s: &str) -> Option<Symbol> {
        self.inner.read().lookup.get(s).copied()
    }

    pub fn name(&self, sym: Symbol) -> Option<Arc<str>> {
        self.inner.read().names.get(sym.index()).cloned()
    }

    pub fn name_or_empty(&self, sym: Symbol) -> String {
        self.name(sym).map(|s| s.to_string()).unwrap_or_default()
    }
}
