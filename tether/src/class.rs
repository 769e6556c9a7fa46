use tether_vm::ObjRef;

use crate::{ArgSpec, Args, Mrb, ScriptException, Value};

/// A class or module of an interpreter instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Class<'m> {
    value: Value<'m>,
}

impl<'m> Class<'m> {
    pub(crate) fn new(value: Value<'m>) -> Self {
        Class { value }
    }

    pub(crate) fn obj(&self) -> ObjRef {
        match self.value.raw().as_object() {
            Some(obj) => obj,
            None => unreachable!("class handle without an object"),
        }
    }

    pub fn value(&self) -> Value<'m> {
        self.value
    }

    pub fn name(&self) -> String {
        self.value.mrb().state().class_name(self.obj())
    }

    /// Where class methods of this class are defined.
    pub fn singleton_class(&self) -> Option<Class<'m>> {
        let mrb = self.value.mrb();
        let singleton = mrb.state().singleton_class(self.obj())?;
        Some(Class::new(mrb.wrap(singleton.into())))
    }

    /// Defines an instance method backed by `callback`.
    pub fn define_method<F>(&self, name: &str, spec: ArgSpec, callback: F)
    where
        F: for<'a> Fn(&'a Mrb, Value<'a>, &mut Args<'a>) -> Result<Option<Value<'a>>, Value<'a>> + 'static,
    {
        self.value.mrb().register(self, name, spec, callback);
    }

    /// Defines a method on the class itself, `Class.name`.
    pub fn define_class_method<F>(&self, name: &str, spec: ArgSpec, callback: F)
    where
        F: for<'a> Fn(&'a Mrb, Value<'a>, &mut Args<'a>) -> Result<Option<Value<'a>>, Value<'a>> + 'static,
    {
        match self.singleton_class() {
            Some(singleton) => self.value.mrb().register(&singleton, name, spec, callback),
            None => unreachable!("{} has no singleton class", self.name()),
        }
    }

    /// `Class#new` with `args`.
    pub fn new_instance(&self, args: &[Value<'m>]) -> Result<Value<'m>, ScriptException<'m>> {
        self.value.call("new", args)
    }
}

#[cfg(test)]
mod tests {
    use crate::{ArgSpec, Mrb, ValueType};

    #[test]
    fn define_and_instantiate() {
        let mrb = Mrb::open();
        let base = mrb.define_class("Shape", None).unwrap();
        let square = mrb.define_class("Square", Some(&base)).unwrap();
        base.define_method("sides", ArgSpec::NONE, |mrb, _, _| Ok(Some(mrb.fixnum_value(0))));
        square.define_method("sides", ArgSpec::NONE, |mrb, _, _| Ok(Some(mrb.fixnum_value(4))));

        let instance = square.new_instance(&[]).unwrap();
        assert_eq!(instance.ty(), ValueType::Object);
        assert_eq!(instance.class().name(), "Square");
        assert_eq!(instance.call("sides", &[]).unwrap().as_fixnum(), Some(4));
        assert_eq!(mrb.evaluate("Shape.new.sides").unwrap().as_fixnum(), Some(0));
        assert!(mrb.evaluate("Square.new.is_a?(Shape)").unwrap().is_truthy());
    }

    #[test]
    fn inherited_host_methods() {
        let mrb = Mrb::open();
        let base = mrb.define_class("Base", None).unwrap();
        base.define_method("kind", ArgSpec::NONE, |_, this, _| {
            let name = this.class().name();
            Ok(Some(this.mrb().string_value(&name)))
        });
        let value = mrb.evaluate("class Derived < Base\nend\nDerived.new.kind").unwrap();
        assert_eq!(value.as_string().as_deref(), Some("Derived"));
    }

    #[test]
    fn class_methods() {
        let mrb = Mrb::open();
        let config = mrb.define_module("Config").unwrap();
        config.define_class_method("version", ArgSpec::NONE, |mrb, _, _| Ok(Some(mrb.string_value("1.0"))));
        assert_eq!(mrb.evaluate("Config.version").unwrap().to_s(), "1.0");
        let err = mrb.evaluate("Object.version").unwrap_err();
        assert_eq!(err.class_name(), "NoMethodError");
    }

    #[test]
    fn initialize_from_the_host() {
        let mrb = Mrb::open();
        let point = mrb.define_class("Point", None).unwrap();
        point.define_method("initialize", ArgSpec::req(2), |_, this, args| {
            this.call("instance_variable_set", &[this.mrb().symbol_value("@x"), args.get(0)])?;
            this.call("instance_variable_set", &[this.mrb().symbol_value("@y"), args.get(1)])?;
            Ok(None)
        });
        let value = mrb
            .evaluate("pt = Point.new(3, 4)\n[pt.instance_variable_get(:@x), pt.instance_variable_get(:@y)]")
            .unwrap();
        assert_eq!(value.inspect(), "[3, 4]");
    }
}
