use std::{any::Any, cell::RefCell, collections::HashMap, rc::Rc, sync::Arc};

use log::{debug, trace};

use crate::{
    Aspec, ClassData, ClassKind, Exc, GarbageCollectionStats, HashKey, HashTable, Heap, Method,
    ObjRef, Object, ProcData, RawValue, Scope, Sym, Symbols,
    ast::{BlockBody, Params},
    object::ExceptionData,
    parser::parse_program,
    primitives,
};

/// Signature of embedder-provided methods. Arguments and the block are not
/// passed directly; they are reachable through [`State::current_call`] and
/// [`State::each_arg`]. To raise, store an exception in [`State::exc`] and
/// return any value.
pub type NativeFn = fn(&mut State, RawValue) -> RawValue;

/// Nested calls deeper than this raise `SystemStackError`.
pub const MAX_CALL_DEPTH: usize = 256;

/// One active method invocation.
#[derive(Debug, Clone)]
pub struct CallInfo {
    pub mid: Sym,
    /// Class or module the invoked method was found in. For class methods
    /// this is the singleton class.
    pub target_class: ObjRef,
    pub receiver: RawValue,
    pub argv: Vec<RawValue>,
    pub block: Option<RawValue>,
}

/// Classes the interpreter itself needs to reach.
#[derive(Debug, Clone, Copy)]
pub struct CoreClasses {
    pub object: ObjRef,
    pub module: ObjRef,
    pub class: ObjRef,
    pub kernel: ObjRef,
    pub comparable: ObjRef,
    pub nil_class: ObjRef,
    pub true_class: ObjRef,
    pub false_class: ObjRef,
    pub numeric: ObjRef,
    pub integer: ObjRef,
    pub float: ObjRef,
    pub string: ObjRef,
    pub symbol: ObjRef,
    pub array: ObjRef,
    pub hash: ObjRef,
    pub proc_class: ObjRef,
    pub gc: ObjRef,
    pub exception: ObjRef,
    pub script_error: ObjRef,
    pub syntax_error: ObjRef,
    pub standard_error: ObjRef,
    pub runtime_error: ObjRef,
    pub argument_error: ObjRef,
    pub type_error: ObjRef,
    pub name_error: ObjRef,
    pub no_method_error: ObjRef,
    pub index_error: ObjRef,
    pub key_error: ObjRef,
    pub range_error: ObjRef,
    pub zero_division_error: ObjRef,
    pub local_jump_error: ObjRef,
    pub system_stack_error: ObjRef,
}

impl CoreClasses {
    fn seed(object: ObjRef, module: ObjRef, class: ObjRef) -> Self {
        Self {
            object,
            module,
            class,
            kernel: object,
            comparable: object,
            nil_class: object,
            true_class: object,
            false_class: object,
            numeric: object,
            integer: object,
            float: object,
            string: object,
            symbol: object,
            array: object,
            hash: object,
            proc_class: object,
            gc: object,
            exception: object,
            script_error: object,
            syntax_error: object,
            standard_error: object,
            runtime_error: object,
            argument_error: object,
            type_error: object,
            name_error: object,
            no_method_error: object,
            index_error: object,
            key_error: object,
            range_error: object,
            zero_division_error: object,
            local_jump_error: object,
            system_stack_error: object,
        }
    }

    fn visit(&self, visitor: &mut dyn FnMut(RawValue)) {
        for class in [
            self.object,
            self.module,
            self.class,
            self.kernel,
            self.comparable,
            self.nil_class,
            self.true_class,
            self.false_class,
            self.numeric,
            self.integer,
            self.float,
            self.string,
            self.symbol,
            self.array,
            self.hash,
            self.proc_class,
            self.gc,
            self.exception,
            self.script_error,
            self.syntax_error,
            self.standard_error,
            self.runtime_error,
            self.argument_error,
            self.type_error,
            self.name_error,
            self.no_method_error,
            self.index_error,
            self.key_error,
            self.range_error,
            self.zero_division_error,
            self.local_jump_error,
            self.system_stack_error,
        ] {
            visitor(class.into());
        }
    }
}

/// Roots of a body that is currently being evaluated.
pub(crate) struct LiveFrame {
    pub self_value: RawValue,
    pub scope: Rc<RefCell<Scope>>,
    pub block: Option<RawValue>,
}

/// An interpreter instance.
///
/// The API follows the shape of an embeddable C interpreter: entry points
/// return a plain value and report failure by storing the raised exception
/// in [`State::exc`].
pub struct State {
    pub(crate) heap: Heap,
    pub(crate) symbols: Symbols,
    pub(crate) core: CoreClasses,
    pub(crate) globals: HashMap<Sym, RawValue>,
    pub(crate) frames: Vec<CallInfo>,
    pub(crate) live: Vec<LiveFrame>,
    /// Exception raised by the last entry point, or to be raised by the
    /// native method currently running.
    pub exc: Option<ObjRef>,
    /// Non-local exit (`break`, `return`) that crossed a native method and
    /// resumes once it returns.
    pub(crate) pending_jump: Option<Exc>,
    user_data: Option<Box<dyn Any>>,
    pub(crate) top_self: RawValue,
    next_activation: u64,
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("live_objects", &self.heap.live_objects())
            .field("frames", &self.frames.len())
            .field("exc", &self.exc)
            .finish_non_exhaustive()
    }
}

impl State {
    pub fn new() -> Self {
        let mut heap = Heap::new();
        let object = heap.allocate(Object::Class(ClassData::new(
            ClassKind::Class,
            Some("Object".to_owned()),
            None,
        )));
        let module = heap.allocate(Object::Class(ClassData::new(
            ClassKind::Class,
            Some("Module".to_owned()),
            Some(object),
        )));
        let class = heap.allocate(Object::Class(ClassData::new(
            ClassKind::Class,
            Some("Class".to_owned()),
            Some(module),
        )));
        let top_self = heap.allocate(Object::Instance(crate::object::Instance {
            class: object,
            ivars: HashMap::new(),
        }));

        let mut state = State {
            heap,
            symbols: Symbols::new(),
            core: CoreClasses::seed(object, module, class),
            globals: HashMap::new(),
            frames: Vec::new(),
            live: Vec::new(),
            exc: None,
            pending_jump: None,
            user_data: None,
            top_self: top_self.into(),
            next_activation: 1,
        };
        state.bootstrap(object, module, class);
        primitives::install(&mut state);
        debug!("interpreter ready, {} objects", state.heap.live_objects());
        state
    }

    fn bootstrap(&mut self, object: ObjRef, module: ObjRef, class: ObjRef) {
        let meta_object = self.new_metaclass(object, class);
        let meta_module = self.new_metaclass(module, meta_object);
        self.new_metaclass(class, meta_module);
        for (name, value) in [("Object", object), ("Module", module), ("Class", class)] {
            let sym = self.intern(name);
            self.const_set(object, sym, value.into());
        }

        let kernel = self.new_module(object, "Kernel");
        if let Some(data) = self.class_data_mut(object) {
            data.includes.push(kernel);
        }
        let comparable = self.new_module(object, "Comparable");
        let gc = self.new_module(object, "GC");

        let c = |state: &mut State, name: &str, superclass: ObjRef| {
            state.new_class(object, name, superclass)
        };
        let nil_class = c(self, "NilClass", object);
        let true_class = c(self, "TrueClass", object);
        let false_class = c(self, "FalseClass", object);
        let numeric = c(self, "Numeric", object);
        let integer = c(self, "Integer", numeric);
        let float = c(self, "Float", numeric);
        let string = c(self, "String", object);
        let symbol = c(self, "Symbol", object);
        let array = c(self, "Array", object);
        let hash = c(self, "Hash", object);
        let proc_class = c(self, "Proc", object);
        for class in [numeric, string] {
            if let Some(data) = self.class_data_mut(class) {
                data.includes.push(comparable);
            }
        }

        let exception = c(self, "Exception", object);
        let script_error = c(self, "ScriptError", exception);
        let syntax_error = c(self, "SyntaxError", script_error);
        let standard_error = c(self, "StandardError", exception);
        let runtime_error = c(self, "RuntimeError", standard_error);
        let argument_error = c(self, "ArgumentError", standard_error);
        let type_error = c(self, "TypeError", standard_error);
        let name_error = c(self, "NameError", standard_error);
        let no_method_error = c(self, "NoMethodError", name_error);
        let index_error = c(self, "IndexError", standard_error);
        let key_error = c(self, "KeyError", index_error);
        let range_error = c(self, "RangeError", standard_error);
        let zero_division_error = c(self, "ZeroDivisionError", standard_error);
        let local_jump_error = c(self, "LocalJumpError", standard_error);
        let system_stack_error = c(self, "SystemStackError", exception);

        self.core = CoreClasses {
            object,
            module,
            class,
            kernel,
            comparable,
            nil_class,
            true_class,
            false_class,
            numeric,
            integer,
            float,
            string,
            symbol,
            array,
            hash,
            proc_class,
            gc,
            exception,
            script_error,
            syntax_error,
            standard_error,
            runtime_error,
            argument_error,
            type_error,
            name_error,
            no_method_error,
            index_error,
            key_error,
            range_error,
            zero_division_error,
            local_jump_error,
            system_stack_error,
        };
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn symbols(&self) -> &Symbols {
        &self.symbols
    }

    pub fn intern(&self, name: &str) -> Sym {
        self.symbols.intern(name)
    }

    pub fn sym_name(&self, sym: Sym) -> Arc<str> {
        self.symbols.name(sym)
    }

    pub fn core(&self) -> &CoreClasses {
        &self.core
    }

    pub fn object_class(&self) -> ObjRef {
        self.core.object
    }

    pub fn top_self(&self) -> RawValue {
        self.top_self
    }

    pub fn object(&self, obj: ObjRef) -> Option<&Object> {
        self.heap.get(obj)
    }

    pub fn is_live(&self, obj: ObjRef) -> bool {
        self.heap.is_live(obj)
    }

    pub fn live_objects(&self) -> usize {
        self.heap.live_objects()
    }

    pub(crate) fn next_activation(&mut self) -> u64 {
        let id = self.next_activation;
        self.next_activation += 1;
        id
    }

    // ── User data ─────────────────────────────────────────────

    pub fn user_data(&self) -> Option<&dyn Any> {
        self.user_data.as_deref()
    }

    pub fn user_data_mut(&mut self) -> Option<&mut dyn Any> {
        self.user_data.as_deref_mut()
    }

    pub fn set_user_data(&mut self, data: Box<dyn Any>) -> Option<Box<dyn Any>> {
        self.user_data.replace(data)
    }

    pub fn take_user_data(&mut self) -> Option<Box<dyn Any>> {
        self.user_data.take()
    }

    // ── Call frames ───────────────────────────────────────────

    /// The innermost active call.
    pub fn current_call(&self) -> Option<&CallInfo> {
        self.frames.last()
    }

    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }

    pub fn call_info(&self, depth: usize) -> Option<&CallInfo> {
        self.frames.get(depth)
    }

    /// Walks the arguments of the call at `depth` (0 is the outermost),
    /// positional arguments first, then the block if one was given. Returns
    /// how many values were visited.
    pub fn each_arg(&self, depth: usize, hook: &mut dyn FnMut(RawValue)) -> usize {
        let Some(call) = self.frames.get(depth) else {
            return 0;
        };
        call.argv.iter().for_each(|&v| hook(v));
        if let Some(block) = call.block {
            hook(block);
        }
        trace!("each_arg depth {depth}: {} values", call.argv.len() + call.block.is_some() as usize);
        call.argv.len() + call.block.is_some() as usize
    }

    // ── Arena and collection ──────────────────────────────────

    pub fn arena_save(&self) -> usize {
        self.heap.arena_save()
    }

    pub fn arena_restore(&mut self, index: usize) {
        self.heap.arena_restore(index);
    }

    pub fn protect(&mut self, value: RawValue) {
        if let Some(obj) = value.as_object() {
            self.heap.protect(obj);
        }
    }

    /// Collects everything unreachable from the arena, globals, constants,
    /// active frames and the pending exception.
    pub fn full_gc(&mut self) -> GarbageCollectionStats {
        let mut roots = vec![self.top_self];
        self.core.visit(&mut |v| roots.push(v));
        roots.extend(self.globals.values().copied());
        for call in &self.frames {
            roots.push(call.receiver);
            roots.extend(call.argv.iter().copied());
            roots.extend(call.block);
        }
        for frame in &self.live {
            roots.push(frame.self_value);
            roots.extend(frame.block);
            Scope::visit_values(&frame.scope, &mut |v| roots.push(v));
        }
        roots.extend(self.exc.map(RawValue::from));
        if let Some(jump) = &self.pending_jump {
            roots.push(jump.value());
        }
        let stats = self.heap.collect(&roots);
        debug!("full_gc: {} live, {} freed", stats.live, stats.freed);
        stats
    }

    // ── Classes ───────────────────────────────────────────────

    pub(crate) fn class_data(&self, class: ObjRef) -> Option<&ClassData> {
        match self.heap.get(class) {
            Some(Object::Class(data)) => Some(data),
            _ => None,
        }
    }

    pub(crate) fn class_data_mut(&mut self, class: ObjRef) -> Option<&mut ClassData> {
        match self.heap.get_mut(class) {
            Some(Object::Class(data)) => Some(data),
            _ => None,
        }
    }

    pub fn class_kind(&self, class: ObjRef) -> Option<ClassKind> {
        self.class_data(class).map(|data| data.kind)
    }

    fn new_metaclass(&mut self, attached: ObjRef, superclass: ObjRef) -> ObjRef {
        let mut data = ClassData::new(ClassKind::Singleton, None, Some(superclass));
        data.attached = Some(attached.into());
        let meta = self.heap.allocate(Object::Class(data));
        if let Some(class) = self.class_data_mut(attached) {
            class.singleton = Some(meta);
        }
        meta
    }

    fn qualified_name(&self, outer: ObjRef, name: &str) -> String {
        if outer == self.core.object {
            return name.to_owned();
        }
        format!("{}::{}", self.class_name(outer), name)
    }

    /// Creates a class named `name` under `outer` without checking for an
    /// existing constant.
    pub(crate) fn new_class(&mut self, outer: ObjRef, name: &str, superclass: ObjRef) -> ObjRef {
        let full_name = self.qualified_name(outer, name);
        let class = self.new_anonymous_class(superclass);
        if let Some(data) = self.class_data_mut(class) {
            data.name = Some(full_name);
        }
        let sym = self.intern(name);
        self.const_set(outer, sym, class.into());
        class
    }

    pub(crate) fn new_anonymous_class(&mut self, superclass: ObjRef) -> ObjRef {
        let meta_super = self
            .class_data(superclass)
            .and_then(|data| data.singleton)
            .unwrap_or(self.core.class);
        let class = self.heap.allocate(Object::Class(ClassData::new(
            ClassKind::Class,
            None,
            Some(superclass),
        )));
        self.new_metaclass(class, meta_super);
        class
    }

    pub(crate) fn new_module(&mut self, outer: ObjRef, name: &str) -> ObjRef {
        let full_name = self.qualified_name(outer, name);
        let module = self.new_anonymous_module();
        if let Some(data) = self.class_data_mut(module) {
            data.name = Some(full_name);
        }
        let sym = self.intern(name);
        self.const_set(outer, sym, module.into());
        module
    }

    pub(crate) fn new_anonymous_module(&mut self) -> ObjRef {
        let module = self
            .heap
            .allocate(Object::Class(ClassData::new(ClassKind::Module, None, None)));
        let meta_super = self.core.module;
        self.new_metaclass(module, meta_super);
        module
    }

    /// Opens class `name` under `outer`, creating it when missing. Fails
    /// when the constant holds something else or the superclass differs.
    pub(crate) fn open_class(
        &mut self,
        outer: ObjRef,
        name: Sym,
        superclass: Option<ObjRef>,
    ) -> Result<ObjRef, Exc> {
        let name_str = self.sym_name(name);
        if let Some(existing) = self.const_get(outer, name) {
            let Some(existing) = existing.as_object() else {
                return Err(self.type_error(format!("{name_str} is not a class")));
            };
            return match self.class_data(existing) {
                Some(data) if data.kind == ClassKind::Class => {
                    if let Some(superclass) = superclass
                        && data.superclass != Some(superclass)
                    {
                        return Err(self.type_error(format!("superclass mismatch for class {name_str}")));
                    }
                    Ok(existing)
                }
                _ => Err(self.type_error(format!("{name_str} is not a class"))),
            };
        }
        let superclass = superclass.unwrap_or(self.core.object);
        trace!("define class {name_str}");
        Ok(self.new_class(outer, &name_str, superclass))
    }

    pub(crate) fn open_module(&mut self, outer: ObjRef, name: Sym) -> Result<ObjRef, Exc> {
        let name_str = self.sym_name(name);
        if let Some(existing) = self.const_get(outer, name) {
            return match existing.as_object().and_then(|obj| Some((obj, self.class_data(obj)?.kind))) {
                Some((module, ClassKind::Module)) => Ok(module),
                _ => Err(self.type_error(format!("{name_str} is not a module"))),
            };
        }
        trace!("define module {name_str}");
        Ok(self.new_module(outer, &name_str))
    }

    /// Defines (or reopens) a class. `outer` defaults to `Object`,
    /// `superclass` to `Object`. The error is the raised exception.
    pub fn define_class_under(
        &mut self,
        outer: Option<ObjRef>,
        name: &str,
        superclass: Option<ObjRef>,
    ) -> Result<ObjRef, ObjRef> {
        let outer = outer.unwrap_or(self.core.object);
        let sym = self.intern(name);
        self.open_class(outer, sym, superclass).map_err(|exc| self.exc_object(exc))
    }

    pub fn define_module_under(&mut self, outer: Option<ObjRef>, name: &str) -> Result<ObjRef, ObjRef> {
        let outer = outer.unwrap_or(self.core.object);
        let sym = self.intern(name);
        self.open_module(outer, sym).map_err(|exc| self.exc_object(exc))
    }

    /// Looks up a class or module constant directly under `outer`.
    pub fn class_get_under(&self, outer: Option<ObjRef>, name: &str) -> Option<ObjRef> {
        let outer = outer.unwrap_or(self.core.object);
        let sym = self.symbols.lookup(name)?;
        let class = self.const_get(outer, sym)?.as_object()?;
        self.class_data(class).map(|_| class)
    }

    pub fn const_defined(&self, outer: Option<ObjRef>, name: &str) -> bool {
        let outer = outer.unwrap_or(self.core.object);
        self.symbols
            .lookup(name)
            .is_some_and(|sym| self.const_get(outer, sym).is_some())
    }

    pub(crate) fn const_get(&self, class: ObjRef, name: Sym) -> Option<RawValue> {
        self.class_data(class)?.consts.get(&name).copied()
    }

    /// Constant lookup through `class` and its ancestors.
    pub(crate) fn const_get_inherited(&self, class: ObjRef, name: Sym) -> Option<RawValue> {
        self.ancestors(class)
            .into_iter()
            .find_map(|c| self.const_get(c, name))
    }

    pub(crate) fn const_set(&mut self, class: ObjRef, name: Sym, value: RawValue) {
        // Naming an anonymous class by assigning it to a constant.
        if let Some(obj) = value.as_object()
            && self.class_data(obj).is_some_and(|d| d.name.is_none() && d.kind != ClassKind::Singleton)
        {
            let full = self.qualified_name(class, &self.sym_name(name));
            if let Some(data) = self.class_data_mut(obj) {
                data.name = Some(full);
            }
        }
        if let Some(data) = self.class_data_mut(class) {
            data.consts.insert(name, value);
        }
    }

    pub fn class_name(&self, class: ObjRef) -> String {
        match self.class_data(class) {
            Some(data) => match (&data.name, data.kind) {
                (Some(name), _) => name.clone(),
                (None, ClassKind::Singleton) => match data.attached.and_then(RawValue::as_object) {
                    Some(attached) if self.class_data(attached).is_some() => {
                        format!("#<Class:{}>", self.class_name(attached))
                    }
                    _ => "#<Class:?>".to_owned(),
                },
                (None, ClassKind::Module) => format!("#<Module:0x{:04x}>", class.index()),
                (None, ClassKind::Class) => format!("#<Class:0x{:04x}>", class.index()),
            },
            None => "?".to_owned(),
        }
    }

    /// The class used for method dispatch, including singleton classes.
    pub fn class_of(&self, value: RawValue) -> ObjRef {
        let core = &self.core;
        match value {
            RawValue::Nil => core.nil_class,
            RawValue::True => core.true_class,
            RawValue::False => core.false_class,
            RawValue::Fixnum(_) => core.integer,
            RawValue::Float(_) => core.float,
            RawValue::Symbol(_) => core.symbol,
            RawValue::Object(obj) => match self.heap.get(obj) {
                Some(Object::String(_)) => core.string,
                Some(Object::Array(_)) => core.array,
                Some(Object::Hash(_)) => core.hash,
                Some(Object::Proc(_)) => core.proc_class,
                Some(Object::Instance(instance)) => instance.class,
                Some(Object::Exception(exc)) => exc.class,
                Some(Object::Class(data)) => match (data.singleton, data.kind) {
                    (Some(meta), _) => meta,
                    (None, ClassKind::Module) => core.module,
                    (None, _) => core.class,
                },
                None => core.object,
            },
        }
    }

    /// The class reported by `obj.class`, skipping singleton classes.
    pub fn real_class(&self, value: RawValue) -> ObjRef {
        if let RawValue::Object(obj) = value
            && let Some(data) = self.class_data(obj)
        {
            return match data.kind {
                ClassKind::Module => self.core.module,
                _ => self.core.class,
            };
        }
        self.class_of(value)
    }

    /// Method resolution order: each class followed by the modules it
    /// includes, most recent first.
    pub fn ancestors(&self, class: ObjRef) -> Vec<ObjRef> {
        let mut out = Vec::new();
        let mut current = Some(class);
        while let Some(c) = current {
            let Some(data) = self.class_data(c) else {
                break;
            };
            out.push(c);
            for &module in data.includes.iter().rev() {
                if !out.contains(&module) {
                    out.push(module);
                }
            }
            current = data.superclass;
        }
        out
    }

    pub fn is_a(&self, value: RawValue, class: ObjRef) -> bool {
        self.ancestors(self.class_of(value)).contains(&class)
    }

    pub fn find_method(&self, class: ObjRef, mid: Sym) -> Option<(Method, ObjRef)> {
        self.ancestors(class).into_iter().find_map(|c| {
            let method = self.class_data(c)?.methods.get(&mid)?;
            Some((method.clone(), c))
        })
    }

    pub(crate) fn define_method_raw(&mut self, class: ObjRef, mid: Sym, method: Method) {
        if let Some(data) = self.class_data_mut(class) {
            data.methods.insert(mid, method);
        }
    }

    /// Installs an embedder method. Arity is checked against `aspec` before
    /// `func` runs.
    pub fn define_native_method(&mut self, class: ObjRef, name: &str, func: NativeFn, aspec: Aspec) {
        let mid = self.intern(name);
        trace!("define native method {}#{name} {aspec:?}", self.class_name(class));
        self.define_method_raw(class, mid, Method::Native { func, aspec });
    }

    /// The singleton class of a class or module, where class methods live.
    pub fn singleton_class(&self, class: ObjRef) -> Option<ObjRef> {
        self.class_data(class)?.singleton
    }

    // ── Globals ───────────────────────────────────────────────

    pub fn gv_get(&self, name: &str) -> RawValue {
        self.symbols
            .lookup(name.trim_start_matches('$'))
            .and_then(|sym| self.globals.get(&sym).copied())
            .unwrap_or_default()
    }

    pub fn gv_set(&mut self, name: &str, value: RawValue) {
        let sym = self.intern(name.trim_start_matches('$'));
        self.globals.insert(sym, value);
    }

    // ── Object construction and access ────────────────────────

    pub fn new_string(&mut self, s: &str) -> RawValue {
        self.heap.allocate(Object::String(s.to_owned())).into()
    }

    pub fn new_array(&mut self, items: Vec<RawValue>) -> RawValue {
        self.heap.allocate(Object::Array(items)).into()
    }

    pub fn new_hash(&mut self) -> RawValue {
        self.heap.allocate(Object::Hash(HashTable::new())).into()
    }

    pub fn symbol_value(&self, name: &str) -> RawValue {
        RawValue::Symbol(self.intern(name))
    }

    pub fn string_content(&self, value: RawValue) -> Option<&str> {
        match self.heap.get(value.as_object()?) {
            Some(Object::String(s)) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn array_items(&self, value: RawValue) -> Option<&Vec<RawValue>> {
        match self.heap.get(value.as_object()?) {
            Some(Object::Array(items)) => Some(items),
            _ => None,
        }
    }

    pub(crate) fn array_items_mut(&mut self, value: RawValue) -> Option<&mut Vec<RawValue>> {
        match self.heap.get_mut(value.as_object()?) {
            Some(Object::Array(items)) => Some(items),
            _ => None,
        }
    }

    pub(crate) fn hash_table(&self, value: RawValue) -> Option<&HashTable> {
        match self.heap.get(value.as_object()?) {
            Some(Object::Hash(table)) => Some(table),
            _ => None,
        }
    }

    pub(crate) fn hash_table_mut(&mut self, value: RawValue) -> Option<&mut HashTable> {
        match self.heap.get_mut(value.as_object()?) {
            Some(Object::Hash(table)) => Some(table),
            _ => None,
        }
    }

    pub fn array_len(&self, array: RawValue) -> Option<usize> {
        self.array_items(array).map(Vec::len)
    }

    /// Element at `index`; negative indexes count from the end. Nil when out
    /// of range.
    pub fn array_get(&self, array: RawValue, index: i64) -> RawValue {
        let Some(items) = self.array_items(array) else {
            return RawValue::Nil;
        };
        let index = if index < 0 { items.len() as i64 + index } else { index };
        usize::try_from(index)
            .ok()
            .and_then(|i| items.get(i).copied())
            .unwrap_or_default()
    }

    pub fn array_push(&mut self, array: RawValue, item: RawValue) -> bool {
        match self.array_items_mut(array) {
            Some(items) => {
                items.push(item);
                true
            }
            None => false,
        }
    }

    pub fn hash_key(&self, key: RawValue) -> HashKey {
        match key {
            RawValue::Nil => HashKey::Nil,
            RawValue::False => HashKey::False,
            RawValue::True => HashKey::True,
            RawValue::Fixnum(n) => HashKey::Fixnum(n),
            RawValue::Float(f) => HashKey::float(f),
            RawValue::Symbol(s) => HashKey::Symbol(s),
            RawValue::Object(obj) => match self.heap.get(obj) {
                Some(Object::String(s)) => HashKey::String(s.clone()),
                _ => HashKey::Object(obj),
            },
        }
    }

    /// Value stored under `key`, or the hash default when missing.
    pub fn hash_get(&self, hash: RawValue, key: RawValue) -> RawValue {
        let hash_key = self.hash_key(key);
        self.hash_table(hash)
            .map(|table| table.get(&hash_key).unwrap_or(table.default))
            .unwrap_or_default()
    }

    pub fn hash_fetch(&self, hash: RawValue, key: RawValue) -> Option<RawValue> {
        let hash_key = self.hash_key(key);
        self.hash_table(hash)?.get(&hash_key)
    }

    pub fn hash_set(&mut self, hash: RawValue, key: RawValue, value: RawValue) -> bool {
        let hash_key = self.hash_key(key);
        match self.hash_table_mut(hash) {
            Some(table) => {
                table.insert(hash_key, key, value);
                true
            }
            None => false,
        }
    }

    pub fn hash_delete(&mut self, hash: RawValue, key: RawValue) -> Option<RawValue> {
        let hash_key = self.hash_key(key);
        self.hash_table_mut(hash)?.remove(&hash_key)
    }

    /// New array holding the keys of `hash` in insertion order.
    pub fn hash_keys(&mut self, hash: RawValue) -> RawValue {
        let keys = self
            .hash_table(hash)
            .map(|table| table.entries().iter().map(|&(k, _)| k).collect())
            .unwrap_or_default();
        self.new_array(keys)
    }

    pub fn hash_len(&self, hash: RawValue) -> Option<usize> {
        self.hash_table(hash).map(HashTable::len)
    }

    pub(crate) fn ivar_get(&self, target: RawValue, name: Sym) -> RawValue {
        let Some(obj) = target.as_object() else {
            return RawValue::Nil;
        };
        let ivars = match self.heap.get(obj) {
            Some(Object::Instance(instance)) => &instance.ivars,
            Some(Object::Class(data)) => &data.ivars,
            _ => return RawValue::Nil,
        };
        ivars.get(&name).copied().unwrap_or_default()
    }

    pub(crate) fn ivar_set(&mut self, target: RawValue, name: Sym, value: RawValue) -> Result<(), Exc> {
        let ivars = match target.as_object().and_then(|obj| self.heap.get_mut(obj)) {
            Some(Object::Instance(instance)) => &mut instance.ivars,
            Some(Object::Class(data)) => &mut data.ivars,
            _ => {
                let class = self.class_name(self.class_of(target));
                return Err(self.runtime_error(format!("can't set instance variables on {class}")));
            }
        };
        ivars.insert(name, value);
        Ok(())
    }

    // ── Procs ─────────────────────────────────────────────────

    pub(crate) fn proc_data(&self, value: RawValue) -> Option<&ProcData> {
        match self.heap.get(value.as_object()?) {
            Some(Object::Proc(data)) => Some(data),
            _ => None,
        }
    }

    /// Changes the class that `def` inside the proc defines into.
    pub fn proc_set_target_class(&mut self, proc: ObjRef, class: ObjRef) -> bool {
        match self.heap.get_mut(proc) {
            Some(Object::Proc(data)) => {
                data.target_class = class;
                true
            }
            _ => false,
        }
    }

    fn toplevel_proc(&mut self, body: crate::ast::Node) -> ObjRef {
        self.heap.allocate(Object::Proc(ProcData {
            body: Rc::new(BlockBody {
                params: Params::default(),
                body,
            }),
            scope: Scope::new_root(),
            receiver: self.top_self,
            target_class: self.core.object,
            nesting: Rc::from(Vec::new()),
            outer_block: None,
            home: 0,
        }))
    }

    // ── Exceptions ────────────────────────────────────────────

    pub fn new_exception(&mut self, class: ObjRef, message: &str) -> ObjRef {
        let message = self.new_string(message);
        self.heap
            .allocate(Object::Exception(ExceptionData { class, message }))
    }

    /// Message of an exception object. Falls back to the class name when no
    /// message was given.
    pub fn exception_message(&self, exc: ObjRef) -> String {
        match self.heap.get(exc) {
            Some(Object::Exception(data)) => match self.string_content(data.message) {
                Some(message) => message.to_owned(),
                None => self.class_name(data.class),
            },
            _ => String::new(),
        }
    }

    pub fn take_exception(&mut self) -> Option<ObjRef> {
        self.exc.take()
    }

    pub(crate) fn error(&mut self, class: ObjRef, message: impl AsRef<str>) -> Exc {
        Exc::Raise(self.new_exception(class, message.as_ref()))
    }

    pub(crate) fn type_error(&mut self, message: impl AsRef<str>) -> Exc {
        self.error(self.core.type_error, message)
    }

    pub(crate) fn argument_error(&mut self, message: impl AsRef<str>) -> Exc {
        self.error(self.core.argument_error, message)
    }

    pub(crate) fn runtime_error(&mut self, message: impl AsRef<str>) -> Exc {
        self.error(self.core.runtime_error, message)
    }

    pub(crate) fn name_error(&mut self, message: impl AsRef<str>) -> Exc {
        self.error(self.core.name_error, message)
    }

    /// Turns a control-flow exit that escaped to an entry point into the
    /// exception object it amounts to.
    fn exc_object(&mut self, exc: Exc) -> ObjRef {
        match exc {
            Exc::Raise(obj) => obj,
            Exc::Break { .. } => self.new_exception(self.core.local_jump_error, "break from proc-closure"),
            Exc::Next(_) => self.new_exception(self.core.local_jump_error, "unexpected next"),
            Exc::Return { .. } => self.new_exception(self.core.local_jump_error, "unexpected return"),
        }
    }

    /// Converts an evaluation result into the entry-point convention.
    fn settle(&mut self, result: crate::EvalResult, resumable: bool) -> RawValue {
        match result {
            Ok(value) => value,
            Err(Exc::Raise(exc)) => {
                self.exc = Some(exc);
                RawValue::Nil
            }
            Err(jump) if resumable => {
                self.pending_jump = Some(jump);
                RawValue::Nil
            }
            Err(jump) => {
                let exc = self.exc_object(jump);
                self.exc = Some(exc);
                RawValue::Nil
            }
        }
    }

    // ── Entry points ──────────────────────────────────────────

    /// Parses and runs `code` at top level. Any previous exception is
    /// cleared first.
    pub fn load_string(&mut self, code: &str) -> RawValue {
        self.load_string_with(code, None)
    }

    pub fn load_string_with(&mut self, code: &str, filename: Option<&str>) -> RawValue {
        self.exc = None;
        let Some(proc) = self.compile(code, filename) else {
            return RawValue::Nil;
        };
        let top = self.top_self;
        self.run(proc, top)
    }

    /// Parses `code` into a proc that [`State::run`] can execute any number
    /// of times. On a syntax error `exc` holds a `SyntaxError`.
    pub fn compile(&mut self, code: &str, filename: Option<&str>) -> Option<ObjRef> {
        debug!("compiling {} bytes from {}", code.len(), filename.unwrap_or("(eval)"));
        match parse_program(code, &self.symbols) {
            Ok(node) => Some(self.toplevel_proc(node)),
            Err(err) => {
                let message = format!("{}:{}: {}", filename.unwrap_or("(eval)"), err.pos, err.message);
                debug!("syntax error: {message}");
                self.exc = Some(self.new_exception(self.core.syntax_error, &message));
                None
            }
        }
    }

    /// Runs a proc produced by [`State::compile`] with `receiver` as `self`.
    pub fn run(&mut self, proc: ObjRef, receiver: RawValue) -> RawValue {
        let result = match self.call_block(proc.into(), Vec::new(), None, Some(receiver)) {
            Err(Exc::Return { value, home: 0 }) => Ok(value),
            other => other,
        };
        self.settle(result, false)
    }

    /// True while a `break` or `return` out of a block is waiting for the
    /// running native method to return. Calls back into the interpreter
    /// are skipped until then.
    pub fn unwinding(&self) -> bool {
        self.pending_jump.is_some()
    }

    /// Calls `name` on `receiver`.
    pub fn funcall(
        &mut self,
        receiver: RawValue,
        name: &str,
        args: &[RawValue],
        block: Option<RawValue>,
    ) -> RawValue {
        if self.unwinding() {
            return RawValue::Nil;
        }
        let mid = self.intern(name);
        let result = self.send(receiver, mid, args.to_vec(), block);
        let resumable = !self.frames.is_empty();
        self.settle(result, resumable)
    }

    /// Calls a proc with `args`.
    pub fn yield_argv(&mut self, block: RawValue, args: &[RawValue]) -> RawValue {
        if self.unwinding() {
            return RawValue::Nil;
        }
        let result = self.call_block(block, args.to_vec(), None, None);
        let resumable = !self.frames.is_empty();
        self.settle(result, resumable)
    }

    /// `inspect` of a value. Errors raised by user-defined `inspect` methods
    /// are swallowed.
    pub fn inspect(&mut self, value: RawValue) -> String {
        self.inspect_value(value)
            .unwrap_or_else(|_| format!("#<{}>", self.class_name(self.real_class(value))))
    }

    /// `to_s` of a value, with the same error handling as [`State::inspect`].
    pub fn to_s(&mut self, value: RawValue) -> String {
        self.stringify(value)
            .unwrap_or_else(|_| format!("#<{}>", self.class_name(self.real_class(value))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(state: &mut State, code: &str) -> RawValue {
        let value = state.load_string(code);
        if let Some(exc) = state.exc {
            panic!("{code}: {}", state.exception_message(exc));
        }
        value
    }

    fn eval_err(state: &mut State, code: &str) -> (String, String) {
        state.load_string(code);
        let exc = state.take_exception().expect("expected an exception");
        let class = match state.object(exc) {
            Some(Object::Exception(data)) => state.class_name(data.class),
            other => panic!("not an exception: {other:?}"),
        };
        (class, state.exception_message(exc))
    }

    // ── Bootstrap ─────────────────────────────────────────────

    #[test]
    fn core_hierarchy() {
        let state = State::new();
        let core = *state.core();
        assert!(state.ancestors(core.integer).contains(&core.comparable));
        assert!(state.ancestors(core.no_method_error).contains(&core.standard_error));
        assert_eq!(state.class_name(core.syntax_error), "SyntaxError");
        assert!(state.const_defined(None, "Object"));
        assert!(state.const_defined(None, "Kernel"));
        assert!(!state.const_defined(None, "Missing"));
    }

    #[test]
    fn metaclass_chain_reaches_class() {
        let state = State::new();
        let core = *state.core();
        let meta = state.class_of(core.string.into());
        let chain = state.ancestors(meta);
        assert!(chain.contains(&core.class));
        assert!(chain.contains(&core.module));
        assert_eq!(state.real_class(core.string.into()), core.class);
    }

    // ── Entry points ──────────────────────────────────────────

    #[test]
    fn load_string_clears_previous_exception() {
        let mut state = State::new();
        let (class, message) = eval_err(&mut state, "raise 'boom'");
        assert_eq!((class.as_str(), message.as_str()), ("RuntimeError", "boom"));
        state.load_string("raise 'again'");
        assert!(state.exc.is_some());
        assert_eq!(eval(&mut state, "1 + 1"), RawValue::Fixnum(2));
    }

    #[test]
    fn syntax_errors_name_the_file() {
        let mut state = State::new();
        state.load_string_with("1 +", Some("demo.rb"));
        let exc = state.take_exception().expect("syntax error");
        let message = state.exception_message(exc);
        assert!(message.starts_with("demo.rb:1:"), "{message}");
        assert!(state.is_a(exc.into(), state.core().syntax_error));
    }

    #[test]
    fn compile_once_run_many() {
        let mut state = State::new();
        let proc = state
            .compile("if $do_raise\n raise 'exception'\nelse\n 'rval'\nend", None)
            .expect("compiles");
        state.protect(proc.into());
        state.gv_set("$do_raise", RawValue::True);
        let top = state.top_self();
        state.run(proc, top);
        assert!(state.take_exception().is_some());
        state.gv_set("$do_raise", RawValue::False);
        let value = state.run(proc, top);
        assert!(state.exc.is_none());
        assert_eq!(state.string_content(value), Some("rval"));
    }

    #[test]
    fn funcall_reports_errors_through_exc() {
        let mut state = State::new();
        let s = state.new_string("foo");
        let other = state.new_string("foo");
        let eq = state.funcall(s, "==", &[other], None);
        assert_eq!(eq, RawValue::True);
        state.funcall(s, "no_such_method", &[], None);
        let exc = state.take_exception().expect("NoMethodError");
        assert!(state.exception_message(exc).contains("no_such_method"));
    }

    // ── Frames and natives ────────────────────────────────────

    fn count_args(state: &mut State, _recv: RawValue) -> RawValue {
        let depth = state.call_depth() - 1;
        let mut seen = 0;
        state.each_arg(depth, &mut |_| seen += 1);
        RawValue::Fixnum(seen)
    }

    fn raise_from_native(state: &mut State, _recv: RawValue) -> RawValue {
        let class = state.core().argument_error;
        state.exc = Some(state.new_exception(class, "ouch"));
        RawValue::Nil
    }

    #[test]
    fn native_methods_see_their_frame() {
        let mut state = State::new();
        let object = state.object_class();
        state.define_native_method(object, "count_args", count_args, Aspec::ANY);
        assert_eq!(eval(&mut state, "count_args(1, 2, 3)"), RawValue::Fixnum(3));
        assert_eq!(eval(&mut state, "count_args(1) { }"), RawValue::Fixnum(2));
        assert_eq!(eval(&mut state, "count_args"), RawValue::Fixnum(0));
    }

    #[test]
    fn native_arity_is_checked() {
        let mut state = State::new();
        let object = state.object_class();
        state.define_native_method(object, "two", count_args, Aspec::req(2));
        state.define_native_method(object, "blocky", count_args, Aspec::BLOCK);
        let (class, message) = eval_err(&mut state, "two(1)");
        assert_eq!(class, "ArgumentError");
        assert_eq!(message, "wrong number of arguments (given 1, expected 2)");
        let (class, _) = eval_err(&mut state, "blocky");
        assert_eq!(class, "LocalJumpError");
    }

    #[test]
    fn native_exceptions_are_rescuable() {
        let mut state = State::new();
        let object = state.object_class();
        state.define_native_method(object, "fail", raise_from_native, Aspec::NONE);
        let value = eval(&mut state, "begin\n fail\nrescue ArgumentError => e\n e.message\nend");
        assert_eq!(state.string_content(value), Some("ouch"));
    }

    // ── Collection ────────────────────────────────────────────

    #[test]
    fn full_gc_keeps_globals_and_frees_unpinned() {
        let mut state = State::new();
        eval(&mut state, "$kept = 'kept'");
        let idx = state.arena_save();
        let temp = state.new_string("temp");
        state.arena_restore(idx);
        state.full_gc();
        assert!(!state.is_live(temp.as_object().expect("object")));
        let kept = state.gv_get("$kept");
        assert_eq!(state.string_content(kept), Some("kept"));
    }

    #[test]
    fn user_data_round_trip() {
        let mut state = State::new();
        assert!(state.set_user_data(Box::new(7u32)).is_none());
        assert_eq!(state.user_data().and_then(|d| d.downcast_ref::<u32>()), Some(&7));
        assert!(state.take_user_data().is_some());
        assert!(state.user_data().is_none());
    }
}
