use std::fmt;

use log::trace;
use tether_vm::{ClassKind, Object, RawValue};

use crate::{Array, Class, Hash, Mrb, ScriptException};

/// Type tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Nil,
    False,
    True,
    Fixnum,
    Float,
    Symbol,
    String,
    Array,
    Hash,
    Object,
    Class,
    Module,
    SingletonClass,
    Proc,
    Exception,
    /// The object was collected.
    Free,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Nil => "nil",
            ValueType::False => "false",
            ValueType::True => "true",
            ValueType::Fixnum => "fixnum",
            ValueType::Float => "float",
            ValueType::Symbol => "symbol",
            ValueType::String => "string",
            ValueType::Array => "array",
            ValueType::Hash => "hash",
            ValueType::Object => "object",
            ValueType::Class => "class",
            ValueType::Module => "module",
            ValueType::SingletonClass => "singleton class",
            ValueType::Proc => "proc",
            ValueType::Exception => "exception",
            ValueType::Free => "free",
        };
        f.write_str(name)
    }
}

/// A value living in an interpreter instance.
///
/// Immediates are copied in; everything else refers into the interpreter
/// heap and stays valid while reachable or pinned by the arena.
#[derive(Clone, Copy)]
pub struct Value<'m> {
    raw: RawValue,
    mrb: &'m Mrb,
}

impl<'m> Value<'m> {
    pub(crate) fn new(mrb: &'m Mrb, raw: RawValue) -> Self {
        Value { raw, mrb }
    }

    pub fn raw(&self) -> RawValue {
        self.raw
    }

    pub fn mrb(&self) -> &'m Mrb {
        self.mrb
    }

    pub(crate) fn belongs_to(&self, mrb: &Mrb) -> bool {
        self.mrb.same_instance(mrb)
    }

    pub fn ty(&self) -> ValueType {
        let obj = match self.raw {
            RawValue::Nil => return ValueType::Nil,
            RawValue::False => return ValueType::False,
            RawValue::True => return ValueType::True,
            RawValue::Fixnum(_) => return ValueType::Fixnum,
            RawValue::Float(_) => return ValueType::Float,
            RawValue::Symbol(_) => return ValueType::Symbol,
            RawValue::Object(obj) => obj,
        };
        match self.mrb.state().object(obj) {
            None => ValueType::Free,
            Some(Object::String(_)) => ValueType::String,
            Some(Object::Array(_)) => ValueType::Array,
            Some(Object::Hash(_)) => ValueType::Hash,
            Some(Object::Instance(_)) => ValueType::Object,
            Some(Object::Proc(_)) => ValueType::Proc,
            Some(Object::Exception(_)) => ValueType::Exception,
            Some(Object::Class(data)) => match data.kind {
                ClassKind::Class => ValueType::Class,
                ClassKind::Module => ValueType::Module,
                ClassKind::Singleton => ValueType::SingletonClass,
            },
        }
    }

    pub fn is_nil(&self) -> bool {
        self.raw.is_nil()
    }

    pub fn is_truthy(&self) -> bool {
        self.raw.is_truthy()
    }

    /// True once the garbage collector has freed the object.
    pub fn is_dead(&self) -> bool {
        self.raw
            .as_object()
            .is_some_and(|obj| !self.mrb.state().is_live(obj))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.raw {
            RawValue::True => Some(true),
            RawValue::False => Some(false),
            _ => None,
        }
    }

    pub fn as_fixnum(&self) -> Option<i64> {
        self.raw.as_fixnum()
    }

    /// Widened from the interpreter's single precision.
    pub fn as_float(&self) -> Option<f64> {
        match self.raw {
            RawValue::Float(f) => Some(f64::from(f)),
            _ => None,
        }
    }

    /// Contents of a string value.
    pub fn as_string(&self) -> Option<String> {
        self.mrb.state().string_content(self.raw).map(str::to_owned)
    }

    pub fn symbol_name(&self) -> Option<String> {
        match self.raw {
            RawValue::Symbol(sym) => Some(self.mrb.state().sym_name(sym).to_string()),
            _ => None,
        }
    }

    /// `to_s` of the value.
    pub fn to_s(&self) -> String {
        self.mrb.state().to_s(self.raw)
    }

    pub fn inspect(&self) -> String {
        self.mrb.state().inspect(self.raw)
    }

    pub fn array(&self) -> Option<Array<'m>> {
        (self.ty() == ValueType::Array).then(|| Array::new(*self))
    }

    pub fn hash(&self) -> Option<Hash<'m>> {
        (self.ty() == ValueType::Hash).then(|| Hash::new(*self))
    }

    pub fn class(&self) -> Class<'m> {
        let class = self.mrb.state().real_class(self.raw);
        Class::new(self.mrb.wrap(class.into()))
    }

    /// Calls `method` on this value.
    pub fn call(&self, method: &str, args: &[Value<'m>]) -> Result<Value<'m>, ScriptException<'m>> {
        self.send(method, args, None)
    }

    /// Calls `method` on this value, passing `block`.
    pub fn call_block(
        &self,
        method: &str,
        args: &[Value<'m>],
        block: Value<'m>,
    ) -> Result<Value<'m>, ScriptException<'m>> {
        self.send(method, args, Some(block))
    }

    fn send(&self, method: &str, args: &[Value<'m>], block: Option<Value<'m>>) -> Result<Value<'m>, ScriptException<'m>> {
        trace!("call {method} with {} arguments", args.len());
        let argv: Vec<RawValue> = args.iter().map(|arg| self.mrb.unwrap_value(arg)).collect();
        let block = block.map(|b| self.mrb.unwrap_value(&b));
        let state = self.mrb.state();
        state.exc = None;
        let raw = state.funcall(self.raw, method, &argv, block);
        self.mrb.settle(raw)
    }

    /// Makes `def` inside this proc define methods on `class`. False when
    /// the value is not a proc.
    pub fn set_proc_target_class(&self, class: &Class<'_>) -> bool {
        match self.raw.as_object() {
            Some(proc) if self.ty() == ValueType::Proc => {
                self.mrb.unwrap_value(&class.value());
                self.mrb.state().proc_set_target_class(proc, class.obj())
            }
            _ => false,
        }
    }
}

impl fmt::Display for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_s())
    }
}

impl fmt::Debug for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({:?})", self.raw)
    }
}

impl PartialEq for Value<'_> {
    /// Identity of immediates and heap references, not Ruby `==`.
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw && self.belongs_to(other.mrb)
    }
}

/// Conversion of host values into interpreter values.
pub trait ToValue {
    fn to_value<'m>(&self, mrb: &'m Mrb) -> Value<'m>;
}

impl ToValue for Value<'_> {
    fn to_value<'m>(&self, mrb: &'m Mrb) -> Value<'m> {
        mrb.wrap(mrb.unwrap_value(self))
    }
}

impl ToValue for i64 {
    fn to_value<'m>(&self, mrb: &'m Mrb) -> Value<'m> {
        mrb.fixnum_value(*self)
    }
}

impl ToValue for i32 {
    fn to_value<'m>(&self, mrb: &'m Mrb) -> Value<'m> {
        mrb.fixnum_value(i64::from(*self))
    }
}

impl ToValue for usize {
    fn to_value<'m>(&self, mrb: &'m Mrb) -> Value<'m> {
        mrb.fixnum_value(*self as i64)
    }
}

impl ToValue for f64 {
    fn to_value<'m>(&self, mrb: &'m Mrb) -> Value<'m> {
        mrb.float_value(*self)
    }
}

impl ToValue for f32 {
    fn to_value<'m>(&self, mrb: &'m Mrb) -> Value<'m> {
        mrb.float_value(f64::from(*self))
    }
}

impl ToValue for bool {
    fn to_value<'m>(&self, mrb: &'m Mrb) -> Value<'m> {
        mrb.bool_value(*self)
    }
}

impl ToValue for str {
    fn to_value<'m>(&self, mrb: &'m Mrb) -> Value<'m> {
        mrb.string_value(self)
    }
}

impl ToValue for &str {
    fn to_value<'m>(&self, mrb: &'m Mrb) -> Value<'m> {
        mrb.string_value(self)
    }
}

impl ToValue for String {
    fn to_value<'m>(&self, mrb: &'m Mrb) -> Value<'m> {
        mrb.string_value(self)
    }
}

impl ToValue for () {
    fn to_value<'m>(&self, mrb: &'m Mrb) -> Value<'m> {
        mrb.nil_value()
    }
}

impl<T: ToValue> ToValue for Option<T> {
    fn to_value<'m>(&self, mrb: &'m Mrb) -> Value<'m> {
        match self {
            Some(value) => value.to_value(mrb),
            None => mrb.nil_value(),
        }
    }
}

impl<T: ToValue> ToValue for [T] {
    fn to_value<'m>(&self, mrb: &'m Mrb) -> Value<'m> {
        let items: Vec<_> = self.iter().map(|item| item.to_value(mrb)).collect();
        mrb.array_value(&items)
    }
}

impl<T: ToValue> ToValue for Vec<T> {
    fn to_value<'m>(&self, mrb: &'m Mrb) -> Value<'m> {
        self.as_slice().to_value(mrb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_tags() {
        let mrb = Mrb::open();
        let cases = [
            ("nil", ValueType::Nil),
            ("false", ValueType::False),
            ("true", ValueType::True),
            ("1", ValueType::Fixnum),
            ("1.5", ValueType::Float),
            (":sym", ValueType::Symbol),
            ("'s'", ValueType::String),
            ("[]", ValueType::Array),
            ("{}", ValueType::Hash),
            ("Object.new", ValueType::Object),
            ("String", ValueType::Class),
            ("Kernel", ValueType::Module),
            ("proc { }", ValueType::Proc),
            ("RuntimeError.new('x')", ValueType::Exception),
        ];
        for (code, expected) in cases {
            assert_eq!(mrb.evaluate(code).unwrap().ty(), expected, "{code}");
        }
        let singleton = mrb.object_class().singleton_class().unwrap();
        assert_eq!(singleton.value().ty(), ValueType::SingletonClass);
    }

    #[test]
    fn conversions() {
        let mrb = Mrb::open();
        assert_eq!(mrb.evaluate("1.2").unwrap().as_float(), Some(1.2000000476837158));
        assert_eq!(mrb.evaluate("'abc'").unwrap().as_string().as_deref(), Some("abc"));
        assert_eq!(mrb.evaluate(":abc").unwrap().symbol_name().as_deref(), Some("abc"));
        assert_eq!(mrb.evaluate("true").unwrap().as_bool(), Some(true));
        assert_eq!(mrb.evaluate("nil").unwrap().as_bool(), None);
        assert_eq!(mrb.evaluate("[1, :a]").unwrap().to_s(), "[1, :a]");
        assert_eq!(mrb.evaluate("'x'").unwrap().inspect(), "\"x\"");
    }

    #[test]
    fn to_value_round_trip_through_script() {
        let mrb = Mrb::open();
        let array = vec![1i64, 2, 3].to_value(&mrb);
        assert_eq!(array.call("sum", &[]).unwrap().as_fixnum(), Some(6));
        let names = vec!["a".to_owned(), "b".to_owned()].to_value(&mrb);
        assert_eq!(names.inspect(), r#"["a", "b"]"#);
        assert_eq!(Some(7usize).to_value(&mrb).as_fixnum(), Some(7));
        assert!(None::<i64>.to_value(&mrb).is_nil());
        assert!(().to_value(&mrb).is_nil());
        assert_eq!("hi".to_value(&mrb).inspect(), "\"hi\"");
        assert_eq!(2.5f32.to_value(&mrb).as_float(), Some(2.5));
    }

    #[test]
    fn calling_methods() {
        let mrb = Mrb::open();
        let s = mrb.string_value("hello");
        assert_eq!(s.call("upcase", &[]).unwrap().to_s(), "HELLO");
        let joined = s.call("+", &[mrb.string_value(" world")]).unwrap();
        assert_eq!(joined.to_s(), "hello world");

        let err = s.call("no_such_method", &[]).unwrap_err();
        assert_eq!(err.class_name(), "NoMethodError");

        let numbers = mrb.evaluate("[1, 2, 3]").unwrap();
        let block = mrb.evaluate("proc { |x| x * 10 }").unwrap();
        assert_eq!(numbers.call_block("map", &[], block).unwrap().inspect(), "[10, 20, 30]");
    }

    #[test]
    fn proc_target_class() {
        let mrb = Mrb::open();
        let class = mrb.define_class("Target", None).unwrap();
        let body = mrb.evaluate("proc { def marker\n :defined\n end }").unwrap();
        assert!(body.set_proc_target_class(&class));
        assert!(!mrb.fixnum_value(1).set_proc_target_class(&class));
        mrb.yield_block(body, &[]).unwrap();
        let marker = mrb.evaluate("Target.new.marker").unwrap();
        assert_eq!(marker.symbol_name().as_deref(), Some("defined"));
    }

    #[test]
    fn values_belong_to_their_instance() {
        let a = Mrb::open();
        let b = Mrb::open();
        let one = a.fixnum_value(1);
        assert_eq!(one, a.fixnum_value(1));
        assert_ne!(one, b.fixnum_value(1));
    }
}
