use std::ops::BitOr;

use log::trace;
use tether_vm::{Aspec, RawValue};

use crate::{Mrb, Value};

/// Arity contract of a host method, enforced by the interpreter before the
/// callback runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArgSpec(Aspec);

impl ArgSpec {
    /// No arguments.
    pub const NONE: ArgSpec = ArgSpec(Aspec::NONE);
    /// Any number of arguments.
    pub const ANY: ArgSpec = ArgSpec(Aspec::ANY);
    /// A block is required.
    pub const BLOCK: ArgSpec = ArgSpec(Aspec::BLOCK);

    pub const fn req(n: u32) -> Self {
        ArgSpec(Aspec::req(n))
    }

    pub const fn opt(n: u32) -> Self {
        ArgSpec(Aspec::opt(n))
    }

    /// `req` required arguments followed by `opt` optional ones.
    pub const fn arg(req: u32, opt: u32) -> Self {
        ArgSpec(Aspec::arg(req, opt))
    }

    pub const fn required(self) -> usize {
        self.0.required()
    }

    pub const fn optional(self) -> usize {
        self.0.optional()
    }
}

impl BitOr for ArgSpec {
    type Output = ArgSpec;

    fn bitor(self, rhs: ArgSpec) -> ArgSpec {
        ArgSpec(self.0 | rhs.0)
    }
}

impl From<ArgSpec> for Aspec {
    fn from(spec: ArgSpec) -> Aspec {
        spec.0
    }
}

/// Arguments of one host method invocation.
///
/// Bound to the call frame the trampoline observed, so a callback that
/// re-enters the interpreter and triggers further host methods still reads
/// its own arguments afterwards.
pub struct Args<'m> {
    mrb: &'m Mrb,
    depth: usize,
    buffer: Vec<RawValue>,
}

impl<'m> Args<'m> {
    pub(crate) fn new(mrb: &'m Mrb, depth: usize) -> Self {
        Args {
            mrb,
            depth,
            buffer: Vec::new(),
        }
    }

    /// Positional arguments in order, followed by the block if the call
    /// passed one.
    pub fn values(&mut self) -> Vec<Value<'m>> {
        self.buffer.clear();
        let buffer = &mut self.buffer;
        let count = self.mrb.state().each_arg(self.depth, &mut |value| buffer.push(value));
        trace!("extracted {count} arguments at depth {}", self.depth);
        let values = self.buffer.iter().map(|&raw| self.mrb.wrap(raw)).collect();
        self.buffer.clear();
        values
    }

    /// Positional argument `index`, nil when absent.
    pub fn get(&self, index: usize) -> Value<'m> {
        let raw = self
            .mrb
            .state()
            .call_info(self.depth)
            .and_then(|call| call.argv.get(index).copied())
            .unwrap_or_default();
        self.mrb.wrap(raw)
    }

    /// Number of positional arguments.
    pub fn len(&self) -> usize {
        self.mrb.state().call_info(self.depth).map_or(0, |call| call.argv.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn block(&self) -> Option<Value<'m>> {
        let block = self.mrb.state().call_info(self.depth)?.block?;
        Some(self.mrb.wrap(block))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::{ArgSpec, Mrb};

    #[test]
    fn spec_combinators() {
        let spec = ArgSpec::req(1) | ArgSpec::opt(2);
        assert_eq!(spec, ArgSpec::arg(1, 2));
        assert_eq!(spec.required(), 1);
        assert_eq!(spec.optional(), 2);
        assert_eq!(ArgSpec::default(), ArgSpec::NONE);
    }

    #[test]
    fn values_in_order_with_block_last() {
        let mrb = Mrb::open();
        mrb.object_class()
            .define_method("collect", ArgSpec::ANY, |mrb, _, args| {
                let values = args.values();
                Ok(Some(mrb.array_value(&values)))
            });
        let value = mrb.evaluate("collect(1, 'two', :three)").unwrap();
        assert_eq!(value.inspect(), r#"[1, "two", :three]"#);

        let with_block = mrb.evaluate("collect(1) { }").unwrap();
        let array = with_block.array().unwrap();
        assert_eq!(array.len(), 2);
        assert_eq!(array.get(1).ty(), crate::ValueType::Proc);
    }

    #[test]
    fn optional_arguments() {
        let mrb = Mrb::open();
        mrb.object_class()
            .define_method("greet", ArgSpec::arg(1, 1), |mrb, _, args| {
                let name = args.get(0).to_s();
                let greeting = match args.len() {
                    2 => args.get(1).to_s(),
                    _ => "hello".to_owned(),
                };
                Ok(Some(mrb.string_value(&format!("{greeting} {name}"))))
            });
        assert_eq!(mrb.evaluate("greet('bob')").unwrap().to_s(), "hello bob");
        assert_eq!(mrb.evaluate("greet('bob', 'hi')").unwrap().to_s(), "hi bob");
    }

    #[test]
    fn nested_extractions_stay_separate() {
        let mrb = Mrb::open();
        let object = mrb.object_class();
        object.define_method("inner", ArgSpec::ANY, |mrb, _, args| {
            let values = args.values();
            Ok(Some(mrb.array_value(&values)))
        });
        object.define_method("outer", ArgSpec::ANY, |mrb, _, args| {
            let before = args.values();
            let inner = mrb.evaluate("inner(:x, :y, :z)")?;
            let after = args.values();
            Ok(Some(mrb.array_value(&[mrb.array_value(&before), inner, mrb.array_value(&after)])))
        });
        let value = mrb.evaluate("outer(1, 2)").unwrap();
        assert_eq!(value.inspect(), "[[1, 2], [:x, :y, :z], [1, 2]]");
    }

    #[test]
    fn inner_call_inside_argument_list() {
        let mrb = Mrb::open();
        mrb.object_class().define_method("count", ArgSpec::ANY, |mrb, _, args| {
            let n = args.values().len() as i64;
            Ok(Some(mrb.fixnum_value(n)))
        });
        let value = mrb.evaluate("count(count(1, 2, 3), count, count(1))").unwrap();
        assert_eq!(value.as_fixnum(), Some(3));
    }

    #[test]
    fn extractions_on_many_threads() {
        let record = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..4i64)
            .map(|t| {
                let record = Arc::clone(&record);
                std::thread::spawn(move || {
                    let mrb = Mrb::open();
                    let seen = Arc::clone(&record);
                    mrb.object_class().define_method("sum", ArgSpec::ANY, move |mrb, _, args| {
                        let values = args.values();
                        let total: i64 = values.iter().filter_map(|v| v.as_fixnum()).sum();
                        seen.lock().push((t, values.len()));
                        Ok(Some(mrb.fixnum_value(total)))
                    });
                    let code = format!("sum({t}, sum(1, 1), {t})");
                    mrb.evaluate(&code).unwrap().as_fixnum()
                })
            })
            .collect();
        let totals: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(totals, vec![Some(2), Some(4), Some(6), Some(8)]);

        let record = record.lock();
        assert_eq!(record.len(), 8);
        for t in 0..4 {
            let calls: Vec<_> = record.iter().filter(|(id, _)| *id == t).map(|&(_, n)| n).collect();
            assert_eq!(calls, vec![2, 3]);
        }
    }
}
