use std::fmt;

use tether_vm::ObjRef;

use crate::{Mrb, Value};

/// An exception raised by interpreted code.
///
/// The class name and message are captured when the exception is taken out
/// of the interpreter, so they stay readable after the exception value has
/// been collected.
#[derive(Clone)]
pub struct ScriptException<'m> {
    value: Value<'m>,
    class_name: String,
    message: String,
}

impl<'m> ScriptException<'m> {
    pub(crate) fn new(mrb: &'m Mrb, exc: ObjRef) -> Self {
        let state = mrb.state();
        let class_name = state.class_name(state.real_class(exc.into()));
        let message = state.exception_message(exc);
        ScriptException {
            value: mrb.wrap(exc.into()),
            class_name,
            message,
        }
    }

    pub fn value(&self) -> Value<'m> {
        self.value
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ScriptException<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl fmt::Debug for ScriptException<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptException")
            .field("class", &self.class_name)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for ScriptException<'_> {}

/// Re-raise from a callback with `?`.
impl<'m> From<ScriptException<'m>> for Value<'m> {
    fn from(exc: ScriptException<'m>) -> Self {
        exc.value
    }
}

#[cfg(test)]
mod tests {
    use crate::Mrb;

    #[test]
    fn message_and_class() {
        let mrb = Mrb::open();
        let err = mrb.evaluate("class AppError < StandardError\nend\nraise AppError, 'broken'").unwrap_err();
        assert_eq!(err.class_name(), "AppError");
        assert_eq!(err.message(), "broken");
        assert_eq!(err.to_string(), "broken");
        assert_eq!(err.value().ty(), crate::ValueType::Exception);
    }

    #[test]
    fn message_defaults_to_class_name() {
        let mrb = Mrb::open();
        let err = mrb.evaluate("raise ArgumentError").unwrap_err();
        assert_eq!(err.message(), "ArgumentError");
    }

    #[test]
    fn message_outlives_the_instance() {
        let mrb = Mrb::open();
        let message = mrb.evaluate("1 / 0").unwrap_err().to_string();
        mrb.close();
        assert_eq!(message, "divided by 0");
    }

    #[test]
    fn runtime_errors_have_classes() {
        let mrb = Mrb::open();
        let cases = [
            ("undefined_thing", "NameError"),
            ("nil.upcase", "NoMethodError"),
            ("1 + 'a'", "TypeError"),
            ("1 / 0", "ZeroDivisionError"),
            ("'a'.upcase(1)", "ArgumentError"),
        ];
        for (code, class) in cases {
            assert_eq!(mrb.evaluate(code).unwrap_err().class_name(), class, "{code}");
        }
    }
}
