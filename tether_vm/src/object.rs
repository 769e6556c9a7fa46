use std::{cell::RefCell, collections::HashMap, rc::Rc};

use crate::{
    Aspec, Float, NativeFn, ObjRef, PrimitiveFn, RawValue, Sym,
    ast::{BlockBody, MethodDef},
};

/// A heap object.
#[derive(Debug)]
pub enum Object {
    String(String),
    Array(Vec<RawValue>),
    Hash(HashTable),
    Instance(Instance),
    Class(ClassData),
    Proc(ProcData),
    Exception(ExceptionData),
}

#[derive(Debug)]
pub struct Instance {
    pub class: ObjRef,
    pub ivars: HashMap<Sym, RawValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    Class,
    Module,
    Singleton,
}

#[derive(Debug)]
pub struct ClassData {
    pub kind: ClassKind,
    pub name: Option<String>,
    pub superclass: Option<ObjRef>,
    /// Metaclass for classes and modules, the object for singleton classes
    /// is recorded in `attached`.
    pub singleton: Option<ObjRef>,
    pub attached: Option<RawValue>,
    /// Modules mixed in with `include`, searched after `methods`, last
    /// included first.
    pub includes: Vec<ObjRef>,
    pub methods: HashMap<Sym, Method>,
    pub consts: HashMap<Sym, RawValue>,
    pub ivars: HashMap<Sym, RawValue>,
}

impl ClassData {
    pub fn new(kind: ClassKind, name: Option<String>, superclass: Option<ObjRef>) -> Self {
        Self {
            kind,
            name,
            superclass,
            singleton: None,
            attached: None,
            includes: Vec::new(),
            methods: HashMap::new(),
            consts: HashMap::new(),
            ivars: HashMap::new(),
        }
    }
}

/// Method body stored in a class method table.
#[derive(Clone)]
pub enum Method {
    /// Built into the interpreter core library.
    Primitive { func: PrimitiveFn, aspec: Aspec },
    /// Provided by an embedder through the C-style native interface. Arguments
    /// are reachable through the active call frame only.
    Native { func: NativeFn, aspec: Aspec },
    /// Defined in script code with `def`. `nesting` is the lexical module
    /// nesting at the definition, used for constant lookup in the body.
    Script {
        def: Rc<MethodDef>,
        nesting: Rc<[ObjRef]>,
    },
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Primitive { aspec, .. } => write!(f, "Primitive({aspec:?})"),
            Method::Native { aspec, .. } => write!(f, "Native({aspec:?})"),
            Method::Script { def, .. } => write!(f, "Script({:?})", def.name),
        }
    }
}

#[derive(Debug)]
pub struct ProcData {
    pub body: Rc<BlockBody>,
    pub scope: Rc<RefCell<Scope>>,
    pub receiver: RawValue,
    /// Class that `def` inside the block defines into, and where constant
    /// lookup starts.
    pub target_class: ObjRef,
    pub nesting: Rc<[ObjRef]>,
    /// Block of the method the proc was created in, for `yield` inside it.
    pub outer_block: Option<RawValue>,
    /// Activation of the method the proc was created in; `return` inside
    /// the proc returns from it.
    pub home: u64,
}

#[derive(Debug)]
pub struct ExceptionData {
    pub class: ObjRef,
    pub message: RawValue,
}

/// Local variable scope. Blocks chain to the scope they were created in.
#[derive(Debug, Default)]
pub struct Scope {
    pub vars: HashMap<Sym, RawValue>,
    pub parent: Option<Rc<RefCell<Scope>>>,
}

impl Scope {
    pub fn new_root() -> Rc<RefCell<Scope>> {
        Rc::new(RefCell::new(Scope::default()))
    }

    pub fn new_child(parent: &Rc<RefCell<Scope>>) -> Rc<RefCell<Scope>> {
        Rc::new(RefCell::new(Scope {
            vars: HashMap::new(),
            parent: Some(parent.clone()),
        }))
    }

    pub fn get(scope: &Rc<RefCell<Scope>>, name: Sym) -> Option<RawValue> {
        let current = scope.borrow();
        if let Some(&v) = current.vars.get(&name) {
            return Some(v);
        }
        current.parent.as_ref().and_then(|p| Scope::get(p, name))
    }

    /// Assigns to the innermost scope that already defines `name`, or
    /// defines it in `scope` itself.
    pub fn set(scope: &Rc<RefCell<Scope>>, name: Sym, value: RawValue) {
        if !Scope::assign_existing(scope, name, value) {
            scope.borrow_mut().vars.insert(name, value);
        }
    }

    fn assign_existing(scope: &Rc<RefCell<Scope>>, name: Sym, value: RawValue) -> bool {
        let mut current = scope.borrow_mut();
        if let Some(slot) = current.vars.get_mut(&name) {
            *slot = value;
            return true;
        }
        match current.parent.clone() {
            Some(parent) => {
                drop(current);
                Scope::assign_existing(&parent, name, value)
            }
            None => false,
        }
    }

    pub fn visit_values(scope: &Rc<RefCell<Scope>>, visitor: &mut dyn FnMut(RawValue)) {
        let current = scope.borrow();
        for &v in current.vars.values() {
            visitor(v);
        }
        if let Some(parent) = &current.parent {
            Scope::visit_values(parent, visitor);
        }
    }
}

/// Key used to index a [`HashTable`]. Strings hash by content, other heap
/// objects by identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    Nil,
    False,
    True,
    Fixnum(i64),
    Float(u32),
    Symbol(Sym),
    String(String),
    Object(ObjRef),
}

impl HashKey {
    pub fn float(f: Float) -> Self {
        HashKey::Float(f.to_bits())
    }
}

/// Insertion-ordered hash table backing Ruby hashes.
#[derive(Debug, Default)]
pub struct HashTable {
    entries: Vec<(RawValue, RawValue)>,
    index: HashMap<HashKey, usize>,
    /// Returned by `[]` for missing keys (`Hash.new(0)`).
    pub default: RawValue,
}

impl HashTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &HashKey) -> Option<RawValue> {
        self.index.get(key).map(|&i| self.entries[i].1)
    }

    pub fn insert(&mut self, key: HashKey, raw_key: RawValue, value: RawValue) {
        match self.index.get(&key) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(key, self.entries.len());
                self.entries.push((raw_key, value));
            }
        }
    }

    pub fn remove(&mut self, key: &HashKey) -> Option<RawValue> {
        let i = self.index.remove(key)?;
        let (_, value) = self.entries.remove(i);
        for slot in self.index.values_mut() {
            if *slot > i {
                *slot -= 1;
            }
        }
        Some(value)
    }

    pub fn entries(&self) -> &[(RawValue, RawValue)] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }
}

impl Object {
    /// Calls `visitor` for every value directly referenced by this object.
    pub fn visit_edges(&self, visitor: &mut dyn FnMut(RawValue)) {
        match self {
            Object::String(_) => {}
            Object::Array(items) => items.iter().for_each(|&v| visitor(v)),
            Object::Hash(table) => {
                for &(k, v) in table.entries() {
                    visitor(k);
                    visitor(v);
                }
                visitor(table.default);
            }
            Object::Instance(instance) => {
                visitor(instance.class.into());
                instance.ivars.values().for_each(|&v| visitor(v));
            }
            Object::Class(class) => {
                if let Some(superclass) = class.superclass {
                    visitor(superclass.into());
                }
                if let Some(singleton) = class.singleton {
                    visitor(singleton.into());
                }
                if let Some(attached) = class.attached {
                    visitor(attached);
                }
                class.includes.iter().for_each(|&m| visitor(m.into()));
                class.consts.values().for_each(|&v| visitor(v));
                class.ivars.values().for_each(|&v| visitor(v));
                for method in class.methods.values() {
                    if let Method::Script { nesting, .. } = method {
                        nesting.iter().for_each(|&c| visitor(c.into()));
                    }
                }
            }
            Object::Proc(proc) => {
                visitor(proc.receiver);
                visitor(proc.target_class.into());
                proc.nesting.iter().for_each(|&c| visitor(c.into()));
                if let Some(block) = proc.outer_block {
                    visitor(block);
                }
                Scope::visit_values(&proc.scope, visitor);
            }
            Object::Exception(exc) => {
                visitor(exc.class.into());
                visitor(exc.message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_table_keeps_insertion_order() {
        let mut table = HashTable::new();
        table.insert(HashKey::Fixnum(3), RawValue::Fixnum(3), RawValue::True);
        table.insert(HashKey::Fixnum(1), RawValue::Fixnum(1), RawValue::False);
        table.insert(HashKey::Fixnum(3), RawValue::Fixnum(3), RawValue::Nil);
        let keys: Vec<_> = table.entries().iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![RawValue::Fixnum(3), RawValue::Fixnum(1)]);
        assert_eq!(table.get(&HashKey::Fixnum(3)), Some(RawValue::Nil));
    }

    #[test]
    fn hash_table_remove_reindexes() {
        let mut table = HashTable::new();
        for i in 0..4 {
            table.insert(HashKey::Fixnum(i), RawValue::Fixnum(i), RawValue::Fixnum(i * 10));
        }
        assert_eq!(table.remove(&HashKey::Fixnum(1)), Some(RawValue::Fixnum(10)));
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(&HashKey::Fixnum(3)), Some(RawValue::Fixnum(30)));
        assert_eq!(table.get(&HashKey::Fixnum(1)), None);
    }

    #[test]
    fn scope_assignment_walks_parents() {
        let root = Scope::new_root();
        let x = crate::Symbols::new().intern("x");
        Scope::set(&root, x, RawValue::Fixnum(1));
        let child = Scope::new_child(&root);
        Scope::set(&child, x, RawValue::Fixnum(2));
        assert_eq!(Scope::get(&root, x), Some(RawValue::Fixnum(2)));
        assert!(child.borrow().vars.is_empty());
    }
}
