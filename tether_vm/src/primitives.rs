//! Core library methods implemented in Rust.
//!
//! Each class gets a table of [`PrimitiveMessage`]s that is installed into
//! its method table at startup. Primitives receive their arguments already
//! evaluated and arity-checked against the message's [`Aspec`].
use crate::{Aspec, EvalResult, Exc, Float, ObjRef, RawValue, State};

mod array;
mod class;
mod exception;
mod hash;
mod kernel;
mod numeric;
mod proc;
mod string;

pub use string::parse_integer_literal;

pub type PrimitiveFn = fn(&mut PrimitiveContext<'_>) -> EvalResult;

#[derive(Debug, Clone, Copy)]
pub struct PrimitiveMessage {
    pub name: &'static str,
    pub aspec: Aspec,
    pub func: PrimitiveFn,
}

impl PrimitiveMessage {
    pub const fn new(name: &'static str, aspec: Aspec, func: PrimitiveFn) -> Self {
        Self { name, aspec, func }
    }
}

pub struct PrimitiveContext<'s> {
    pub state: &'s mut State,
    pub receiver: RawValue,
    pub arguments: Vec<RawValue>,
    pub block: Option<RawValue>,
}

impl PrimitiveContext<'_> {
    /// Argument `index`, or `nil` when an optional argument was omitted.
    pub fn arg(&self, index: usize) -> RawValue {
        self.arguments.get(index).copied().unwrap_or_default()
    }

    pub fn int_arg(&mut self, index: usize) -> Result<i64, Exc> {
        let value = self.arg(index);
        match value {
            RawValue::Fixnum(n) => Ok(n),
            RawValue::Float(f) => Ok(f as i64),
            _ => Err(self.conversion_error(value, "Integer")),
        }
    }

    pub fn float_arg(&mut self, index: usize) -> Result<Float, Exc> {
        let value = self.arg(index);
        match value {
            RawValue::Fixnum(n) => Ok(n as Float),
            RawValue::Float(f) => Ok(f),
            _ => Err(self.conversion_error(value, "Float")),
        }
    }

    pub fn str_arg(&mut self, index: usize) -> Result<String, Exc> {
        let value = self.arg(index);
        match self.state.string_content(value) {
            Some(s) => Ok(s.to_owned()),
            None => Err(self.conversion_error(value, "String")),
        }
    }

    /// A symbol or string argument naming a method, variable or constant.
    pub fn name_arg(&mut self, index: usize) -> Result<String, Exc> {
        let value = self.arg(index);
        match value {
            RawValue::Symbol(sym) => Ok(self.state.sym_name(sym).to_string()),
            _ => match self.state.string_content(value) {
                Some(s) => Ok(s.to_owned()),
                None => {
                    let description = self.state.inspect(value);
                    Err(self.state.type_error(format!("{description} is not a symbol nor a string")))
                }
            },
        }
    }

    pub fn class_arg(&mut self, index: usize) -> Result<ObjRef, Exc> {
        let value = self.arg(index);
        match value.as_object() {
            Some(obj) if self.state.class_kind(obj).is_some() => Ok(obj),
            _ => Err(self.state.type_error("class or module required")),
        }
    }

    fn conversion_error(&mut self, value: RawValue, expected: &str) -> Exc {
        let class = match value {
            RawValue::Nil => "nil".to_owned(),
            _ => self.state.class_name(self.state.real_class(value)),
        };
        self.state.type_error(format!("{class} cannot be converted to {expected}"))
    }

    pub fn block(&mut self) -> Result<RawValue, Exc> {
        match self.block {
            Some(block) => Ok(block),
            None => {
                let class = self.state.core.local_jump_error;
                Err(self.state.error(class, "no block given"))
            }
        }
    }

    /// Calls the block passed to the primitive.
    pub fn yield_values(&mut self, args: Vec<RawValue>) -> EvalResult {
        let block = self.block()?;
        self.state.call_block(block, args, None, None)
    }

    pub fn send(&mut self, receiver: RawValue, name: &str, args: Vec<RawValue>) -> EvalResult {
        let mid = self.state.intern(name);
        self.state.send(receiver, mid, args, None)
    }

    pub fn string(&mut self, s: &str) -> EvalResult {
        Ok(self.state.new_string(s))
    }
}

impl State {
    pub(crate) fn install_primitives(&mut self, class: ObjRef, table: &[PrimitiveMessage]) {
        for message in table {
            let mid = self.intern(message.name);
            self.define_method_raw(
                class,
                mid,
                crate::Method::Primitive {
                    func: message.func,
                    aspec: message.aspec,
                },
            );
        }
    }

    /// Installs a table on the singleton class of `class`.
    pub(crate) fn install_class_primitives(&mut self, class: ObjRef, table: &[PrimitiveMessage]) {
        if let Some(meta) = self.singleton_class(class) {
            self.install_primitives(meta, table);
        }
    }

    /// Ruby equality through `==`, short-circuiting identical values.
    pub(crate) fn values_equal(&mut self, a: RawValue, b: RawValue) -> Result<bool, Exc> {
        if a == b {
            return Ok(true);
        }
        let eq = self.intern("==");
        Ok(self.send(a, eq, vec![b], None)?.is_truthy())
    }

    /// `<=>` as an ordering, failing when the values are not comparable.
    pub(crate) fn compare(&mut self, a: RawValue, b: RawValue) -> Result<std::cmp::Ordering, Exc> {
        let cmp = self.intern("<=>");
        match self.send(a, cmp, vec![b], None)? {
            RawValue::Fixnum(n) => Ok(n.cmp(&0)),
            _ => {
                let left = self.class_name(self.real_class(a));
                let right = self.inspect(b);
                Err(self.argument_error(format!("comparison of {left} with {right} failed")))
            }
        }
    }
}

pub(crate) fn install(state: &mut State) {
    let core = *state.core();
    state.install_primitives(core.kernel, kernel::KERNEL);
    state.install_primitives(core.nil_class, kernel::NIL_CLASS);
    state.install_primitives(core.true_class, kernel::TRUE_CLASS);
    state.install_primitives(core.false_class, kernel::FALSE_CLASS);
    state.install_primitives(core.comparable, kernel::COMPARABLE);
    state.install_class_primitives(core.gc, kernel::GC);
    state.install_primitives(core.numeric, numeric::NUMERIC);
    state.install_primitives(core.integer, numeric::INTEGER);
    state.install_primitives(core.float, numeric::FLOAT);
    state.install_primitives(core.string, string::STRING);
    state.install_primitives(core.symbol, string::SYMBOL);
    state.install_primitives(core.array, array::ARRAY);
    state.install_primitives(core.hash, hash::HASH);
    state.install_primitives(core.exception, exception::EXCEPTION);
    state.install_class_primitives(core.exception, exception::EXCEPTION_CLASS);
    state.install_primitives(core.module, class::MODULE);
    state.install_primitives(core.class, class::CLASS);
    state.install_primitives(core.proc_class, proc::PROC);
    state.install_class_primitives(core.proc_class, proc::PROC_CLASS);
}

pub(crate) fn bool_value(b: bool) -> EvalResult {
    Ok(RawValue::from_bool(b))
}
