use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sym(u32);

impl Sym {
    #[inline]
    pub const fn id(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Default)]
struct SymbolTable {
    names: Vec<Arc<str>>,
    mappings: HashMap<Arc<str>, Sym>,
}

impl SymbolTable {
    fn get_or_add(&mut self, name: &str) -> Sym {
        if let Some(&sym) = self.mappings.get(name) {
            return sym;
        }
        let sym = Sym(self.names.len() as u32);
        let interned = Arc::<str>::from(name);
        self.names.push(interned.clone());
        self.mappings.insert(interned, sym);
        sym
    }

    fn get(&self, sym: Sym) -> Option<Arc<str>> {
        self.names.get(sym.0 as usize).cloned()
    }

    fn lookup(&self, name: &str) -> Option<Sym> {
        self.mappings.get(name).copied()
    }
}

/// Symbol interner shared between a state and the parsers it spawns.
///
/// Cloning is cheap and yields a handle to the same table, so code compiled
/// ahead of time (see [`crate::State::compile`]) agrees with the state on
/// every symbol id.
#[derive(Debug, Clone, Default)]
pub struct Symbols(Arc<RwLock<SymbolTable>>);

impl Symbols {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&self, name: &str) -> Sym {
        if let Some(sym) = self.0.read().lookup(name) {
            return sym;
        }
        self.0.write().get_or_add(name)
    }

    /// Looks a name up without interning it.
    pub fn lookup(&self, name: &str) -> Option<Sym> {
        self.0.read().lookup(name)
    }

    pub fn name(&self, sym: Sym) -> Arc<str> {
        self.0.read().get(sym).unwrap_or_else(|| Arc::from("<unknown>"))
    }

    pub fn len(&self) -> usize {
        self.0.read().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
