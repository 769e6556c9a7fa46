use std::marker::PhantomData;
use std::ptr::NonNull;

use log::{debug, trace};
use tether_vm::{ClassKind, GarbageCollectionStats, ObjRef, RawValue, State};

use crate::{
    ArgSpec, Args, Class, CompileContext, ScriptException, ToValue, Value,
    registry::{self, Callback, DispatchInvariantViolation, Registry},
};

/// One interpreter instance.
///
/// The instance owns the interpreter state and every method registered
/// through it. Values borrow the instance, so none of them can outlive
/// [`Mrb::close`]. An instance is pinned to the thread that opened it.
pub struct Mrb {
    state: NonNull<State>,
    owned: bool,
    _not_send: PhantomData<*mut ()>,
}

impl Mrb {
    pub fn open() -> Self {
        let mut state = Box::new(State::new());
        state.set_user_data(Box::new(Registry::default()));
        debug!("opened interpreter instance");
        Mrb {
            state: NonNull::from(Box::leak(state)),
            owned: true,
            _not_send: PhantomData,
        }
    }

    /// A non-owning view of a state the interpreter is currently executing.
    /// Used by the trampoline; dropping the view leaves the state alone.
    pub(crate) fn borrowed(state: &mut State) -> Self {
        Mrb {
            state: NonNull::from(state),
            owned: false,
            _not_send: PhantomData,
        }
    }

    /// Removes every registration and releases the interpreter.
    pub fn close(self) {
        drop(self);
    }

    #[allow(clippy::mut_from_ref)]
    pub(crate) fn state(&self) -> &mut State {
        // SAFETY: the state lives as long as any handle to it (the owning
        // handle frees it on drop, borrowed views only exist inside a native
        // call on it) and an instance never leaves its thread. Callers keep
        // the returned borrow to a single expression or call.
        unsafe { &mut *self.state.as_ptr() }
    }

    pub(crate) fn same_instance(&self, other: &Mrb) -> bool {
        self.state == other.state
    }

    pub(crate) fn wrap(&self, raw: RawValue) -> Value<'_> {
        Value::new(self, raw)
    }

    /// The raw form of `value`, which must come from this instance.
    pub(crate) fn unwrap_value(&self, value: &Value<'_>) -> RawValue {
        assert!(value.belongs_to(self), "value moved between interpreter instances");
        value.raw()
    }

    fn unwrap_values(&self, values: &[Value<'_>]) -> Vec<RawValue> {
        values.iter().map(|value| self.unwrap_value(value)).collect()
    }

    /// Takes the pending interpreter exception, if any.
    pub(crate) fn take_exception(&self) -> Option<ScriptException<'_>> {
        let exc = self.state().take_exception()?;
        Some(ScriptException::new(self, exc))
    }

    /// Result of an entry point that reports failures through the
    /// exception slot.
    pub(crate) fn settle(&self, raw: RawValue) -> Result<Value<'_>, ScriptException<'_>> {
        match self.take_exception() {
            Some(exc) => Err(exc),
            None => Ok(self.wrap(raw)),
        }
    }

    // ── Evaluation ────────────────────────────────────────────

    /// Runs `code` at top level and returns its last value.
    ///
    /// Temporaries are unpinned statement by statement and on every loop
    /// iteration. The result stays in the arena until the caller restores it.
    pub fn evaluate(&self, code: &str) -> Result<Value<'_>, ScriptException<'_>> {
        self.evaluate_with(code, &CompileContext::default())
    }

    pub fn evaluate_with(&self, code: &str, context: &CompileContext) -> Result<Value<'_>, ScriptException<'_>> {
        debug!("evaluate {} bytes from {}", code.len(), context.display_name());
        let raw = self.state().load_string_with(code, context.filename());
        self.settle(raw)
    }

    /// Parses `code` into a proc that can be [`run`](Mrb::run) repeatedly.
    pub fn compile(&self, code: &str, context: &CompileContext) -> Result<Value<'_>, ScriptException<'_>> {
        self.state().exc = None;
        match self.state().compile(code, context.filename()) {
            Some(proc) => Ok(self.wrap(proc.into())),
            None => match self.take_exception() {
                Some(exc) => Err(exc),
                None => Ok(self.nil_value()),
            },
        }
    }

    /// Runs a compiled proc with `receiver` as `self`.
    pub fn run<'m>(&'m self, proc: Value<'m>, receiver: Value<'m>) -> Result<Value<'m>, ScriptException<'m>> {
        let receiver = self.unwrap_value(&receiver);
        let Some(obj) = self.unwrap_value(&proc).as_object() else {
            return Err(self.type_error(format!("{} is not a proc", proc.inspect())));
        };
        self.state().exc = None;
        let raw = self.state().run(obj, receiver);
        self.settle(raw)
    }

    /// Calls `block` with `args`.
    pub fn yield_block<'m>(&'m self, block: Value<'m>, args: &[Value<'m>]) -> Result<Value<'m>, ScriptException<'m>> {
        let block = self.unwrap_value(&block);
        let argv = self.unwrap_values(args);
        self.state().exc = None;
        let raw = self.state().yield_argv(block, &argv);
        self.settle(raw)
    }

    fn type_error(&self, message: String) -> ScriptException<'_> {
        let class = self.state().core().type_error;
        let exc = self.state().new_exception(class, &message);
        ScriptException::new(self, exc)
    }

    // ── Registration ──────────────────────────────────────────

    /// Makes `callback` reachable as `class#name`. A second registration of
    /// the same name on the same class replaces the first.
    pub fn register<F>(&self, class: &Class<'_>, name: &str, spec: ArgSpec, callback: F)
    where
        F: for<'m> Fn(&'m Mrb, Value<'m>, &mut Args<'m>) -> Result<Option<Value<'m>>, Value<'m>> + 'static,
    {
        if !class.value().belongs_to(self) {
            panic!(
                "{}",
                DispatchInvariantViolation {
                    class: class.name(),
                    method: name.to_owned(),
                    reason: "class belongs to another instance",
                }
            );
        }
        self.register_callback(class.obj(), name, spec, Box::new(callback));
    }

    pub(crate) fn register_callback(&self, class: ObjRef, name: &str, spec: ArgSpec, callback: Box<Callback>) {
        let state = self.state();
        let mid = state.intern(name);
        registry::insert(state, class, mid, callback);
        state.define_native_method(class, name, crate::trampoline::trampoline, spec.into());
    }

    // ── Classes and modules ───────────────────────────────────

    pub fn object_class(&self) -> Class<'_> {
        let object = self.state().object_class();
        Class::new(self.wrap(object.into()))
    }

    /// Looks up an existing class or module constant under `outer`
    /// (`Object` when `None`).
    pub fn class(&self, name: &str, outer: Option<&Class<'_>>) -> Option<Class<'_>> {
        self.lookup_class(name, outer, false)
    }

    pub fn module(&self, name: &str, outer: Option<&Class<'_>>) -> Option<Class<'_>> {
        self.lookup_class(name, outer, true)
    }

    fn lookup_class(&self, name: &str, outer: Option<&Class<'_>>, module: bool) -> Option<Class<'_>> {
        let state = self.state();
        let class = state.class_get_under(outer.map(Class::obj), name)?;
        let is_module = state.class_kind(class) == Some(ClassKind::Module);
        (is_module == module).then(|| Class::new(self.wrap(class.into())))
    }

    pub fn define_class(&self, name: &str, superclass: Option<&Class<'_>>) -> Result<Class<'_>, ScriptException<'_>> {
        self.define_class_under(name, superclass, None)
    }

    pub fn define_class_under(
        &self,
        name: &str,
        superclass: Option<&Class<'_>>,
        outer: Option<&Class<'_>>,
    ) -> Result<Class<'_>, ScriptException<'_>> {
        trace!("define class {name}");
        self.state()
            .define_class_under(outer.map(Class::obj), name, superclass.map(Class::obj))
            .map(|class| Class::new(self.wrap(class.into())))
            .map_err(|exc| ScriptException::new(self, exc))
    }

    pub fn define_module(&self, name: &str) -> Result<Class<'_>, ScriptException<'_>> {
        self.define_module_under(name, None)
    }

    pub fn define_module_under(&self, name: &str, outer: Option<&Class<'_>>) -> Result<Class<'_>, ScriptException<'_>> {
        trace!("define module {name}");
        self.state()
            .define_module_under(outer.map(Class::obj), name)
            .map(|module| Class::new(self.wrap(module.into())))
            .map_err(|exc| ScriptException::new(self, exc))
    }

    pub fn const_defined(&self, name: &str, outer: Option<&Class<'_>>) -> bool {
        self.state().const_defined(outer.map(Class::obj), name)
    }

    // ── Globals ───────────────────────────────────────────────

    pub fn global(&self, name: &str) -> Value<'_> {
        self.wrap(self.state().gv_get(name))
    }

    pub fn set_global(&self, name: &str, value: impl ToValue) {
        let raw = value.to_value(self).raw();
        self.state().gv_set(name, raw);
    }

    // ── Value constructors ────────────────────────────────────

    pub fn nil_value(&self) -> Value<'_> {
        self.wrap(RawValue::Nil)
    }

    pub fn true_value(&self) -> Value<'_> {
        self.wrap(RawValue::True)
    }

    pub fn false_value(&self) -> Value<'_> {
        self.wrap(RawValue::False)
    }

    pub fn bool_value(&self, b: bool) -> Value<'_> {
        self.wrap(RawValue::from_bool(b))
    }

    pub fn fixnum_value(&self, n: i64) -> Value<'_> {
        self.wrap(RawValue::Fixnum(n))
    }

    /// Interpreter floats are single precision.
    pub fn float_value(&self, f: f64) -> Value<'_> {
        self.wrap(RawValue::Float(f as tether_vm::Float))
    }

    pub fn string_value(&self, s: &str) -> Value<'_> {
        self.wrap(self.state().new_string(s))
    }

    pub fn symbol_value(&self, name: &str) -> Value<'_> {
        self.wrap(self.state().symbol_value(name))
    }

    pub fn array_value<'m>(&'m self, items: &[Value<'m>]) -> Value<'m> {
        let items = self.unwrap_values(items);
        self.wrap(self.state().new_array(items))
    }

    pub fn hash_value(&self) -> Value<'_> {
        self.wrap(self.state().new_hash())
    }

    /// A new exception of `class`, ready to be returned as a callback error.
    pub fn exception_value<'m>(&'m self, class: &Class<'m>, message: &str) -> Value<'m> {
        self.unwrap_value(&class.value());
        let exc = self.state().new_exception(class.obj(), message);
        self.wrap(exc.into())
    }

    pub fn runtime_error(&self, message: &str) -> Value<'_> {
        let class = self.state().core().runtime_error;
        self.wrap(self.state().new_exception(class, message).into())
    }

    pub fn argument_error(&self, message: &str) -> Value<'_> {
        let class = self.state().core().argument_error;
        self.wrap(self.state().new_exception(class, message).into())
    }

    // ── Memory ────────────────────────────────────────────────

    pub fn arena_save(&self) -> ArenaIndex {
        let index = self.state().arena_save();
        trace!("arena save {index}");
        ArenaIndex(index)
    }

    /// Unpins every object allocated since `index` was saved.
    pub fn arena_restore(&self, index: ArenaIndex) {
        trace!("arena restore {}", index.0);
        self.state().arena_restore(index.0);
    }

    /// Saves the arena and restores it when the guard is dropped.
    pub fn arena_guard(&self) -> ArenaGuard<'_> {
        ArenaGuard {
            mrb: self,
            index: self.arena_save(),
        }
    }

    pub fn full_gc(&self) -> GarbageCollectionStats {
        let stats = self.state().full_gc();
        debug!("full gc: {} live, {} freed", stats.live, stats.freed);
        stats
    }

    pub fn live_objects(&self) -> usize {
        self.state().live_objects()
    }
}

impl Drop for Mrb {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        registry::teardown(self.state());
        // SAFETY: owned handles come from `Box::leak` in `open` and are
        // dropped exactly once.
        drop(unsafe { Box::from_raw(self.state.as_ptr()) });
        debug!("closed interpreter instance");
    }
}

impl std::fmt::Debug for Mrb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mrb")
            .field("state", &self.state)
            .field("owned", &self.owned)
            .finish()
    }
}

/// Checkpoint of the arena of newly allocated objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaIndex(usize);

impl ArenaIndex {
    pub fn get(self) -> usize {
        self.0
    }
}

#[must_use]
pub struct ArenaGuard<'m> {
    mrb: &'m Mrb,
    index: ArenaIndex,
}

impl ArenaGuard<'_> {
    pub fn index(&self) -> ArenaIndex {
        self.index
    }
}

impl Drop for ArenaGuard<'_> {
    fn drop(&mut self) {
        self.mrb.arena_restore(self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluate_returns_last_value() {
        let mrb = Mrb::open();
        let value = mrb.evaluate("x = 20\nx * 2 + 2").unwrap();
        assert_eq!(value.as_fixnum(), Some(42));
    }

    #[test]
    fn exception_does_not_block_next_evaluation() {
        let mrb = Mrb::open();
        let err = mrb.evaluate("raise ArgumentError, 'nope'").unwrap_err();
        assert_eq!(err.class_name(), "ArgumentError");
        assert_eq!(err.to_string(), "nope");
        assert_eq!(mrb.evaluate("1 + 1").unwrap().as_fixnum(), Some(2));
    }

    #[test]
    fn syntax_errors_name_the_file() {
        let mrb = Mrb::open();
        let context = CompileContext::new().with_filename("boot.rb");
        let err = mrb.evaluate_with("puts(1, ", &context).unwrap_err();
        assert_eq!(err.class_name(), "SyntaxError");
        assert!(err.message().starts_with("boot.rb:"), "{}", err.message());
    }

    #[test]
    fn compile_once_run_many() {
        let mrb = Mrb::open();
        let proc = mrb.compile("$runs = ($runs || 0) + 1", &CompileContext::default()).unwrap();
        let top = mrb.evaluate("self").unwrap();
        for _ in 0..3 {
            mrb.run(proc, top).unwrap();
        }
        assert_eq!(mrb.global("$runs").as_fixnum(), Some(3));
    }

    #[test]
    fn yield_block() {
        let mrb = Mrb::open();
        let block = mrb.evaluate("proc { |a, b| a * b }").unwrap();
        let result = mrb
            .yield_block(block, &[mrb.fixnum_value(6), mrb.fixnum_value(7)])
            .unwrap();
        assert_eq!(result.as_fixnum(), Some(42));

        let failing = mrb.evaluate("proc { raise 'inside' }").unwrap();
        let err = mrb.yield_block(failing, &[]).unwrap_err();
        assert_eq!(err.message(), "inside");
    }

    #[test]
    fn classes_and_modules() {
        let mrb = Mrb::open();
        let outer = mrb.define_module("Outer").unwrap();
        let inner = mrb.define_class_under("Inner", None, Some(&outer)).unwrap();
        assert_eq!(inner.name(), "Outer::Inner");
        assert!(mrb.const_defined("Inner", Some(&outer)));
        assert!(!mrb.const_defined("Inner", None));
        assert!(mrb.module("Outer", None).is_some());
        assert!(mrb.class("Outer", None).is_none());
        assert!(mrb.class("Inner", Some(&outer)).is_some());
        assert!(mrb.module("Missing", None).is_none());

        let err = mrb.define_class("Outer", None).unwrap_err();
        assert_eq!(err.class_name(), "TypeError");
    }

    #[test]
    fn globals() {
        let mrb = Mrb::open();
        mrb.set_global("$greeting", "hi");
        assert_eq!(mrb.evaluate("$greeting + '!'").unwrap().as_string().as_deref(), Some("hi!"));
        assert!(mrb.global("$unset").is_nil());
    }

    #[test]
    fn arena_restore_lets_gc_collect() {
        let mrb = Mrb::open();
        let index = mrb.arena_save();
        let value = mrb.string_value("temporary");
        mrb.full_gc();
        assert!(!value.is_dead());

        mrb.arena_restore(index);
        mrb.full_gc();
        assert!(value.is_dead());
        assert_eq!(value.ty(), crate::ValueType::Free);
    }

    #[test]
    fn registering_on_a_foreign_class_panics() {
        let a = Mrb::open();
        let b = Mrb::open();
        a.define_class("Alpha", None).unwrap();
        let beta = b.define_class("Beta", None).unwrap();

        let attempt = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            a.register(&beta, "leak", ArgSpec::NONE, |mrb, _, _| Ok(Some(mrb.fixnum_value(7))));
        }));
        let payload = attempt.unwrap_err();
        let message = payload.downcast_ref::<String>().unwrap();
        assert!(message.contains("Beta#leak"), "{message}");
        assert!(message.contains("another instance"), "{message}");

        assert_eq!(registry::registered(a.state()), 0);
        assert_eq!(a.evaluate("Alpha.new.leak").unwrap_err().class_name(), "NoMethodError");
        assert_eq!(b.evaluate("Beta.new.leak").unwrap_err().class_name(), "NoMethodError");
    }

    #[test]
    #[should_panic(expected = "value moved between interpreter instances")]
    fn foreign_array_items_panic() {
        let a = Mrb::open();
        let b = Mrb::open();
        a.array_value(&[b.fixnum_value(1)]);
    }

    #[test]
    #[should_panic(expected = "value moved between interpreter instances")]
    fn foreign_block_panics() {
        let a = Mrb::open();
        let b = Mrb::open();
        let block = b.evaluate("proc { 1 }").unwrap();
        let _ = a.yield_block(block, &[]);
    }

    #[test]
    #[should_panic(expected = "value moved between interpreter instances")]
    fn foreign_exception_class_panics() {
        let a = Mrb::open();
        let b = Mrb::open();
        let class = b.define_class("Oops", None).unwrap();
        a.exception_value(&class, "nope");
    }

    #[test]
    fn loop_temporaries_are_collectable() {
        let mrb = Mrb::open();
        mrb.evaluate("$seen = 0").unwrap();
        mrb.full_gc();
        let baseline = mrb.live_objects();

        mrb.object_class().define_method("sweep", ArgSpec::NONE, |mrb, _, _| {
            mrb.full_gc();
            Ok(Some(mrb.fixnum_value(mrb.live_objects() as i64)))
        });
        let code = "i = 0\nwhile i < 500\n  s = 'tmp' + i.to_s\n  i += 1\nend\n$seen = sweep";
        mrb.evaluate(code).unwrap();
        let during = mrb.global("$seen").as_fixnum().unwrap() as usize;
        assert!(during < baseline + 20, "{during} live objects after the loop, {baseline} before");
    }

    #[test]
    fn arena_guard_restores_on_drop() {
        let mrb = Mrb::open();
        let before = mrb.arena_save();
        {
            let _guard = mrb.arena_guard();
            for i in 0..10 {
                mrb.string_value(&i.to_string());
            }
        }
        assert_eq!(mrb.arena_save(), before);
    }
}
