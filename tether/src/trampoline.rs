use log::trace;
use tether_vm::{RawValue, State};

use crate::{Args, Mrb, registry, registry::DispatchInvariantViolation};

/// The native function behind every bridged method.
///
/// Finds the callback for the active call, hands it the receiver and a
/// fresh argument buffer bound to this frame, and converts its result back:
/// `Ok(None)` is nil, `Err(value)` becomes the pending exception.
pub(crate) fn trampoline(state: &mut State, receiver: RawValue) -> RawValue {
    let Some(call) = state.current_call() else {
        violation(state, None, "native call without an active frame");
    };
    let (class, mid) = (call.target_class, call.mid);
    let depth = state.call_depth() - 1;
    let Some(callback) = registry::lookup(state, class, mid) else {
        violation(state, Some((class, mid)), "no host method registered");
    };
    trace!("trampoline enter {}#{} at depth {depth}", state.class_name(class), state.sym_name(mid));

    let mrb = Mrb::borrowed(state);
    let mut args = Args::new(&mrb, depth);
    let result = (*callback)(&mrb, mrb.wrap(receiver), &mut args);
    let raw = match result {
        Ok(Some(value)) => {
            if !value.belongs_to(&mrb) {
                violation(mrb.state(), Some((class, mid)), "callback returned a value of another instance");
            }
            value.raw()
        }
        Ok(None) => RawValue::Nil,
        Err(exc) => {
            if !exc.belongs_to(&mrb) {
                violation(mrb.state(), Some((class, mid)), "callback raised a value of another instance");
            }
            raise(mrb.state(), exc.raw());
            RawValue::Nil
        }
    };
    trace!("trampoline leave depth {depth}");
    raw
}

/// Installs `value` as the pending exception. Anything that is not an
/// exception object is wrapped in a `TypeError`, the way `raise` treats it.
fn raise(state: &mut State, value: RawValue) {
    let exc = match value.as_object() {
        Some(obj) if state.is_a(value, state.core().exception) => obj,
        _ => {
            let message = format!("exception class/object expected, got {}", state.inspect(value));
            state.new_exception(state.core().type_error, &message)
        }
    };
    state.exc = Some(exc);
}

fn violation(state: &State, method: Option<(tether_vm::ObjRef, tether_vm::Sym)>, reason: &'static str) -> ! {
    let (class, method) = match method {
        Some((class, mid)) => (state.class_name(class), state.sym_name(mid).to_string()),
        None => ("?".to_owned(), "?".to_owned()),
    };
    panic!("{}", DispatchInvariantViolation { class, method, reason });
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use std::sync::Arc;

    use crate::{ArgSpec, Mrb, ToValue};

    #[test]
    fn callback_result_reaches_script() {
        let mrb = Mrb::open();
        mrb.object_class()
            .define_method("answer", ArgSpec::NONE, |mrb, _, _| Ok(Some(mrb.fixnum_value(42))));
        let value = mrb.evaluate("answer").unwrap();
        assert_eq!(value.ty(), crate::ValueType::Fixnum);
        assert_eq!(value.as_fixnum(), Some(42));
    }

    #[test]
    fn none_is_nil() {
        let mrb = Mrb::open();
        mrb.object_class()
            .define_method("nothing", ArgSpec::NONE, |_, _, _| Ok(None));
        assert!(mrb.evaluate("nothing").unwrap().is_nil());
    }

    #[test]
    fn receiver_is_self() {
        let mrb = Mrb::open();
        let class = mrb.define_class("Greeter", None).unwrap();
        class.define_method("greet", ArgSpec::req(1), |mrb, this, args| {
            let name = args.get(0).to_s();
            let prefix = this.call("prefix", &[])?.to_s();
            Ok(Some(format!("{prefix}, {name}").to_value(mrb)))
        });
        let code = "class Greeter\n def prefix\n  'Hello'\n end\nend\nGreeter.new.greet('Ruby')";
        assert_eq!(mrb.evaluate(code).unwrap().as_string().as_deref(), Some("Hello, Ruby"));
    }

    #[test]
    fn error_fails_evaluation_once() {
        let mrb = Mrb::open();
        mrb.object_class()
            .define_method("explode", ArgSpec::NONE, |mrb, _, _| Err(mrb.runtime_error("kaboom")));
        let err = mrb.evaluate("explode").unwrap_err();
        assert_eq!(err.class_name(), "RuntimeError");
        assert_eq!(err.to_string(), "kaboom");
        assert_eq!(mrb.evaluate("1").unwrap().as_fixnum(), Some(1));
    }

    #[test]
    fn errors_are_rescuable() {
        let mrb = Mrb::open();
        mrb.object_class()
            .define_method("explode", ArgSpec::NONE, |mrb, _, _| Err(mrb.argument_error("bad input")));
        let value = mrb
            .evaluate("begin\n explode\nrescue ArgumentError => e\n 'rescued ' + e.message\nend")
            .unwrap();
        assert_eq!(value.as_string().as_deref(), Some("rescued bad input"));
    }

    #[test]
    fn raising_a_non_exception_is_a_type_error() {
        let mrb = Mrb::open();
        mrb.object_class()
            .define_method("odd", ArgSpec::NONE, |mrb, _, _| Err(mrb.fixnum_value(3)));
        let err = mrb.evaluate("odd").unwrap_err();
        assert_eq!(err.class_name(), "TypeError");
    }

    #[test]
    fn script_errors_propagate_through_callbacks() {
        let mrb = Mrb::open();
        mrb.object_class().define_method("relay", ArgSpec::BLOCK, |mrb, _, args| {
            let block = args.block().unwrap_or_else(|| mrb.nil_value());
            let value = mrb.yield_block(block, &[])?;
            Ok(Some(value))
        });
        let err = mrb.evaluate("relay { raise IndexError, 'deep' }").unwrap_err();
        assert_eq!(err.class_name(), "IndexError");
        assert_eq!(err.message(), "deep");
    }

    #[test]
    fn arity_is_enforced_by_the_interpreter() {
        let mrb = Mrb::open();
        mrb.object_class()
            .define_method("pair", ArgSpec::req(2), |mrb, _, _| Ok(Some(mrb.true_value())));
        let err = mrb.evaluate("pair(1)").unwrap_err();
        assert_eq!(err.class_name(), "ArgumentError");
        assert!(mrb.evaluate("pair(1, 2)").unwrap().is_truthy());
    }

    #[test]
    fn break_out_of_a_yielded_block() {
        let mrb = Mrb::open();
        mrb.object_class().define_method("twice", ArgSpec::BLOCK, |mrb, _, args| {
            let Some(block) = args.block() else {
                return Ok(None);
            };
            mrb.yield_block(block, &[mrb.fixnum_value(1)])?;
            mrb.yield_block(block, &[mrb.fixnum_value(2)])?;
            Ok(Some(mrb.fixnum_value(0)))
        });
        let value = mrb.evaluate("seen = []\nr = twice { |n| seen << n\n break 99 }\n[r, seen]").unwrap();
        assert_eq!(value.inspect(), "[99, [1]]");
    }

    #[test]
    fn callbacks_can_register_methods() {
        let mrb = Mrb::open();
        mrb.object_class().define_method("install", ArgSpec::req(1), |mrb, _, args| {
            let name = args.get(0).to_s();
            mrb.object_class()
                .define_method(&name, ArgSpec::NONE, |mrb, _, _| Ok(Some(mrb.string_value("installed"))));
            Ok(None)
        });
        let value = mrb.evaluate("install('fresh')\nfresh").unwrap();
        assert_eq!(value.as_string().as_deref(), Some("installed"));
    }

    #[test]
    fn reentrant_calls() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mrb = Mrb::open();
        let seen = Arc::clone(&log);
        mrb.object_class().define_method("depth", ArgSpec::req(1), move |mrb, _, args| {
            let n = args.get(0).as_fixnum().unwrap_or(0);
            seen.lock().push(n);
            if n == 0 {
                return Ok(Some(mrb.fixnum_value(0)));
            }
            let inner = mrb.evaluate(&format!("depth({})", n - 1))?;
            Ok(Some(mrb.fixnum_value(inner.as_fixnum().unwrap_or(0) + 1)))
        });
        assert_eq!(mrb.evaluate("depth(3)").unwrap().as_fixnum(), Some(3));
        assert_eq!(*log.lock(), vec![3, 2, 1, 0]);
    }

    #[test]
    #[should_panic(expected = "no host method registered")]
    fn registry_miss_panics() {
        let mrb = Mrb::open();
        let object = mrb.object_class();
        mrb.state()
            .define_native_method(object.obj(), "orphan", super::trampoline, ArgSpec::NONE.into());
        let _ = mrb.evaluate("orphan");
    }
}
