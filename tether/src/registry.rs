//! Host callbacks reachable from interpreted code.
//!
//! Every bridged method is installed in the interpreter with the same
//! native function, the trampoline. The table here tells the trampoline
//! which callback a call means: it is keyed by the class that owns the
//! method and the method name, and it lives in the user-data slot of the
//! interpreter state it serves. Closing the instance drops the table with
//! it, so a later instance can never see stale entries.

use std::collections::HashMap;
use std::rc::Rc;

use log::{trace, warn};
use tether_vm::{ObjRef, State, Sym};

use crate::{Args, Mrb, Value};

pub(crate) type Callback =
    dyn for<'m> Fn(&'m Mrb, Value<'m>, &mut Args<'m>) -> Result<Option<Value<'m>>, Value<'m>>;

#[derive(Default)]
pub(crate) struct Registry {
    methods: HashMap<(ObjRef, Sym), Rc<Callback>>,
}

impl Registry {
    fn insert(&mut self, class: ObjRef, mid: Sym, callback: Rc<Callback>) -> bool {
        self.methods.insert((class, mid), callback).is_some()
    }

    fn lookup(&self, class: ObjRef, mid: Sym) -> Option<Rc<Callback>> {
        self.methods.get(&(class, mid)).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.methods.len()
    }
}

/// Fatal inconsistency between the interpreter's method tables and the
/// bridge's registry. Raised as a panic, never returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchInvariantViolation {
    pub class: String,
    pub method: String,
    pub reason: &'static str,
}

impl std::fmt::Display for DispatchInvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "dispatch invariant violated for {}#{}: {}",
            self.class, self.method, self.reason
        )
    }
}

impl std::error::Error for DispatchInvariantViolation {}

fn registry(state: &State) -> Option<&Registry> {
    state.user_data()?.downcast_ref()
}

fn registry_mut(state: &mut State) -> Option<&mut Registry> {
    state.user_data_mut()?.downcast_mut()
}

pub(crate) fn insert(state: &mut State, class: ObjRef, mid: Sym, callback: Box<Callback>) {
    let class_name = state.class_name(class);
    let method = state.sym_name(mid);
    let Some(registry) = registry_mut(state) else {
        panic!(
            "{}",
            DispatchInvariantViolation {
                class: class_name,
                method: method.to_string(),
                reason: "interpreter state has no method registry",
            }
        );
    };
    if registry.insert(class, mid, Rc::from(callback)) {
        warn!("replacing host method {class_name}#{method}");
    } else {
        trace!("register host method {class_name}#{method}");
    }
}

/// The callback registered for `mid` on `class`. The returned handle is a
/// clone, so the callback may register further methods while it runs.
pub(crate) fn lookup(state: &State, class: ObjRef, mid: Sym) -> Option<Rc<Callback>> {
    registry(state)?.lookup(class, mid)
}

pub(crate) fn registered(state: &State) -> usize {
    registry(state).map_or(0, Registry::len)
}

/// Removes every registration of the instance. Runs once, while closing.
pub(crate) fn teardown(state: &mut State) {
    if let Some(data) = state.take_user_data()
        && let Ok(registry) = data.downcast::<Registry>()
    {
        trace!("teardown: dropping {} host methods", registry.len());
    }
}

#[cfg(test)]
mod tests {
    use crate::{ArgSpec, Mrb};

    #[test]
    fn replacing_a_method_keeps_one_entry() {
        let mrb = Mrb::open();
        let object = mrb.object_class();
        object.define_method("answer", ArgSpec::NONE, |mrb, _, _| Ok(Some(mrb.fixnum_value(1))));
        object.define_method("answer", ArgSpec::NONE, |mrb, _, _| Ok(Some(mrb.fixnum_value(2))));
        assert_eq!(super::registered(mrb.state()), 1);
        assert_eq!(mrb.evaluate("answer").unwrap().as_fixnum(), Some(2));
    }

    #[test]
    fn same_name_on_different_classes() {
        let mrb = Mrb::open();
        let a = mrb.define_class("A", None).unwrap();
        let b = mrb.define_class("B", None).unwrap();
        a.define_method("who", ArgSpec::NONE, |mrb, _, _| Ok(Some(mrb.string_value("a"))));
        b.define_method("who", ArgSpec::NONE, |mrb, _, _| Ok(Some(mrb.string_value("b"))));
        a.define_class_method("who", ArgSpec::NONE, |mrb, _, _| Ok(Some(mrb.string_value("A"))));
        assert_eq!(super::registered(mrb.state()), 3);
        let value = mrb.evaluate("[A.new.who, B.new.who, A.who]").unwrap();
        assert_eq!(value.inspect(), r#"["a", "b", "A"]"#);
    }

    #[test]
    fn close_isolates_instances() {
        let a = Mrb::open();
        a.object_class()
            .define_method("only_in_a", ArgSpec::NONE, |mrb, _, _| Ok(Some(mrb.true_value())));
        assert!(a.evaluate("only_in_a").unwrap().is_truthy());
        a.close();

        let b = Mrb::open();
        assert_eq!(super::registered(b.state()), 0);
        let err = b.evaluate("only_in_a").unwrap_err();
        assert_eq!(err.class_name(), "NameError");
    }

    #[test]
    fn instances_on_separate_threads() {
        let handles: Vec<_> = (0..4i64)
            .map(|n| {
                std::thread::spawn(move || {
                    let mrb = Mrb::open();
                    mrb.object_class()
                        .define_method("id", ArgSpec::NONE, move |mrb, _, _| Ok(Some(mrb.fixnum_value(n))));
                    mrb.evaluate("id * 10").unwrap().as_fixnum()
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results, vec![Some(0), Some(10), Some(20), Some(30)]);
    }
}
