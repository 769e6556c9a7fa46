use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    io::Write,
};

use log::debug;

use super::{PrimitiveContext, PrimitiveMessage, bool_value};
use crate::{Aspec, EvalResult, Exc, Object, RawValue, format::format_float};

pub const KERNEL: &[PrimitiveMessage] = &[
    PrimitiveMessage::new("initialize", Aspec::NONE, |_| Ok(RawValue::Nil)),
    PrimitiveMessage::new("puts", Aspec::ANY, puts),
    PrimitiveMessage::new("print", Aspec::ANY, print),
    PrimitiveMessage::new("p", Aspec::ANY, p),
    PrimitiveMessage::new("raise", Aspec::opt(2), raise),
    PrimitiveMessage::new("loop", Aspec::BLOCK, loop_forever),
    PrimitiveMessage::new("proc", Aspec::BLOCK, proc_from_block),
    PrimitiveMessage::new("lambda", Aspec::BLOCK, proc_from_block),
    PrimitiveMessage::new("==", Aspec::req(1), identical),
    PrimitiveMessage::new("equal?", Aspec::req(1), identical),
    PrimitiveMessage::new("eql?", Aspec::req(1), identical),
    PrimitiveMessage::new("===", Aspec::req(1), case_equal),
    PrimitiveMessage::new("!=", Aspec::req(1), not_equal),
    PrimitiveMessage::new("!", Aspec::NONE, not),
    PrimitiveMessage::new("nil?", Aspec::NONE, |_| bool_value(false)),
    PrimitiveMessage::new("class", Aspec::NONE, class),
    PrimitiveMessage::new("is_a?", Aspec::req(1), is_a),
    PrimitiveMessage::new("kind_of?", Aspec::req(1), is_a),
    PrimitiveMessage::new("instance_of?", Aspec::req(1), instance_of),
    PrimitiveMessage::new("respond_to?", Aspec::req(1), respond_to),
    PrimitiveMessage::new("send", Aspec::req(1).with(Aspec::ANY), send),
    PrimitiveMessage::new("__send__", Aspec::req(1).with(Aspec::ANY), send),
    PrimitiveMessage::new("public_send", Aspec::req(1).with(Aspec::ANY), send),
    PrimitiveMessage::new("to_s", Aspec::NONE, to_s),
    PrimitiveMessage::new("inspect", Aspec::NONE, inspect),
    PrimitiveMessage::new("object_id", Aspec::NONE, object_id),
    PrimitiveMessage::new("hash", Aspec::NONE, hash),
    PrimitiveMessage::new("freeze", Aspec::NONE, itself),
    PrimitiveMessage::new("frozen?", Aspec::NONE, |_| bool_value(false)),
    PrimitiveMessage::new("itself", Aspec::NONE, itself),
    PrimitiveMessage::new("dup", Aspec::NONE, dup),
    PrimitiveMessage::new("clone", Aspec::NONE, dup),
    PrimitiveMessage::new("tap", Aspec::BLOCK, tap),
    PrimitiveMessage::new("then", Aspec::BLOCK, then),
    PrimitiveMessage::new("instance_eval", Aspec::BLOCK, |ctx| {
        let block = ctx.block()?;
        let receiver = ctx.receiver;
        ctx.state.call_block(block, vec![receiver], None, Some(receiver))
    }),
    PrimitiveMessage::new("instance_variable_get", Aspec::req(1), ivar_get),
    PrimitiveMessage::new("instance_variable_set", Aspec::req(2), ivar_set),
    PrimitiveMessage::new("instance_variable_defined?", Aspec::req(1), ivar_defined),
    PrimitiveMessage::new("instance_variables", Aspec::NONE, instance_variables),
    PrimitiveMessage::new("Integer", Aspec::req(1), integer_conversion),
    PrimitiveMessage::new("Float", Aspec::req(1), float_conversion),
    PrimitiveMessage::new("String", Aspec::req(1), string_conversion),
    PrimitiveMessage::new("Array", Aspec::req(1), array_conversion),
];

pub const NIL_CLASS: &[PrimitiveMessage] = &[
    PrimitiveMessage::new("nil?", Aspec::NONE, |_| bool_value(true)),
    PrimitiveMessage::new("to_s", Aspec::NONE, |ctx| ctx.string("")),
    PrimitiveMessage::new("inspect", Aspec::NONE, |ctx| ctx.string("nil")),
    PrimitiveMessage::new("to_a", Aspec::NONE, |ctx| Ok(ctx.state.new_array(Vec::new()))),
    PrimitiveMessage::new("to_i", Aspec::NONE, |_| Ok(RawValue::Fixnum(0))),
    PrimitiveMessage::new("to_f", Aspec::NONE, |_| Ok(RawValue::Float(0.0))),
    PrimitiveMessage::new("&", Aspec::req(1), |_| bool_value(false)),
    PrimitiveMessage::new("|", Aspec::req(1), |ctx| bool_value(ctx.arg(0).is_truthy())),
];

pub const TRUE_CLASS: &[PrimitiveMessage] = &[
    PrimitiveMessage::new("to_s", Aspec::NONE, |ctx| ctx.string("true")),
    PrimitiveMessage::new("inspect", Aspec::NONE, |ctx| ctx.string("true")),
    PrimitiveMessage::new("&", Aspec::req(1), |ctx| bool_value(ctx.arg(0).is_truthy())),
    PrimitiveMessage::new("|", Aspec::req(1), |_| bool_value(true)),
    PrimitiveMessage::new("^", Aspec::req(1), |ctx| bool_value(!ctx.arg(0).is_truthy())),
];

pub const FALSE_CLASS: &[PrimitiveMessage] = &[
    PrimitiveMessage::new("to_s", Aspec::NONE, |ctx| ctx.string("false")),
    PrimitiveMessage::new("inspect", Aspec::NONE, |ctx| ctx.string("false")),
    PrimitiveMessage::new("&", Aspec::req(1), |_| bool_value(false)),
    PrimitiveMessage::new("|", Aspec::req(1), |ctx| bool_value(ctx.arg(0).is_truthy())),
    PrimitiveMessage::new("^", Aspec::req(1), |ctx| bool_value(ctx.arg(0).is_truthy())),
];

pub const COMPARABLE: &[PrimitiveMessage] = &[
    PrimitiveMessage::new("<", Aspec::req(1), |ctx| compare_with(ctx, |o| o.is_lt())),
    PrimitiveMessage::new("<=", Aspec::req(1), |ctx| compare_with(ctx, |o| o.is_le())),
    PrimitiveMessage::new(">", Aspec::req(1), |ctx| compare_with(ctx, |o| o.is_gt())),
    PrimitiveMessage::new(">=", Aspec::req(1), |ctx| compare_with(ctx, |o| o.is_ge())),
    PrimitiveMessage::new("between?", Aspec::req(2), between),
    PrimitiveMessage::new("clamp", Aspec::req(2), clamp),
];

pub const GC: &[PrimitiveMessage] = &[PrimitiveMessage::new("start", Aspec::NONE, gc_start)];

// ── Output ────────────────────────────────────────────────────

fn write_stdout(text: &str) {
    let mut out = std::io::stdout().lock();
    // A closed stdout is not an error the script can act on.
    let _ = out.write_all(text.as_bytes());
    let _ = out.flush();
}

/// Lines `puts` prints for one value; arrays print one line per element.
fn puts_lines(ctx: &mut PrimitiveContext, value: RawValue, out: &mut String) -> Result<(), Exc> {
    if let Some(items) = ctx.state.array_items(value).cloned() {
        for item in items {
            puts_lines(ctx, item, out)?;
        }
        return Ok(());
    }
    let text = ctx.state.stringify(value)?;
    out.push_str(&text);
    if !text.ends_with('\n') {
        out.push('\n');
    }
    Ok(())
}

fn puts(ctx: &mut PrimitiveContext) -> EvalResult {
    let mut out = String::new();
    if ctx.arguments.is_empty() {
        out.push('\n');
    }
    for value in ctx.arguments.clone() {
        puts_lines(ctx, value, &mut out)?;
    }
    write_stdout(&out);
    Ok(RawValue::Nil)
}

fn print(ctx: &mut PrimitiveContext) -> EvalResult {
    let mut out = String::new();
    for value in ctx.arguments.clone() {
        out.push_str(&ctx.state.stringify(value)?);
    }
    write_stdout(&out);
    Ok(RawValue::Nil)
}

fn p(ctx: &mut PrimitiveContext) -> EvalResult {
    let mut out = String::new();
    for value in ctx.arguments.clone() {
        out.push_str(&ctx.state.inspect_value(value)?);
        out.push('\n');
    }
    write_stdout(&out);
    Ok(match ctx.arguments.as_slice() {
        [] => RawValue::Nil,
        [single] => *single,
        many => {
            let many = many.to_vec();
            ctx.state.new_array(many)
        }
    })
}

// ── Control ───────────────────────────────────────────────────

fn raise(ctx: &mut PrimitiveContext) -> EvalResult {
    let core = *ctx.state.core();
    let arguments = ctx.arguments.clone();
    let exc = match arguments.as_slice() {
        [] => {
            let current = ctx.state.gv_get("$!");
            match current.as_object() {
                Some(exc) if ctx.state.is_a(current, core.exception) => exc,
                _ => ctx.state.new_exception(core.runtime_error, "unhandled exception"),
            }
        }
        &[message] if ctx.state.string_content(message).is_some() => {
            let message = ctx.str_arg(0)?;
            ctx.state.new_exception(core.runtime_error, &message)
        }
        &[first, ..] => {
            let rest = arguments[1..].to_vec();
            let exc = match first.as_object() {
                Some(obj) if ctx.state.class_kind(obj).is_some() => ctx.send(first, "new", rest)?,
                _ if rest.is_empty() => first,
                _ => ctx.send(first, "exception", rest)?,
            };
            match exc.as_object() {
                Some(obj) if ctx.state.is_a(exc, core.exception) => obj,
                _ => return Err(ctx.state.type_error("exception class/object expected")),
            }
        }
    };
    debug!("raise {}", ctx.state.exception_message(exc));
    Err(Exc::Raise(exc))
}

fn loop_forever(ctx: &mut PrimitiveContext) -> EvalResult {
    let arena = ctx.state.arena_save();
    loop {
        ctx.state.arena_restore(arena);
        ctx.yield_values(Vec::new())?;
    }
}

fn proc_from_block(ctx: &mut PrimitiveContext) -> EvalResult {
    ctx.block()
}

fn tap(ctx: &mut PrimitiveContext) -> EvalResult {
    ctx.yield_values(vec![ctx.receiver])?;
    Ok(ctx.receiver)
}

fn then(ctx: &mut PrimitiveContext) -> EvalResult {
    ctx.yield_values(vec![ctx.receiver])
}

// ── Identity and equality ─────────────────────────────────────

fn identical(ctx: &mut PrimitiveContext) -> EvalResult {
    bool_value(ctx.receiver == ctx.arg(0))
}

fn case_equal(ctx: &mut PrimitiveContext) -> EvalResult {
    let equal = ctx.state.values_equal(ctx.receiver, ctx.arg(0))?;
    bool_value(equal)
}

fn not_equal(ctx: &mut PrimitiveContext) -> EvalResult {
    let equal = ctx.send(ctx.receiver, "==", vec![ctx.arg(0)])?;
    bool_value(!equal.is_truthy())
}

fn not(ctx: &mut PrimitiveContext) -> EvalResult {
    bool_value(!ctx.receiver.is_truthy())
}

fn itself(ctx: &mut PrimitiveContext) -> EvalResult {
    Ok(ctx.receiver)
}

fn object_id(ctx: &mut PrimitiveContext) -> EvalResult {
    Ok(RawValue::Fixnum(match ctx.receiver {
        RawValue::False => 0,
        RawValue::Nil => 8,
        RawValue::True => 20,
        RawValue::Fixnum(n) => n.wrapping_mul(2).wrapping_add(1),
        RawValue::Float(f) => i64::from(f.to_bits()) * 4 + 2,
        RawValue::Symbol(sym) => i64::from(sym.id()) * 256 + 12,
        RawValue::Object(obj) => i64::from(obj.index()) * 8 + 16,
    }))
}

fn hash(ctx: &mut PrimitiveContext) -> EvalResult {
    let key = ctx.state.hash_key(ctx.receiver);
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    Ok(RawValue::Fixnum((hasher.finish() >> 2) as i64))
}

// ── Classes ───────────────────────────────────────────────────

fn class(ctx: &mut PrimitiveContext) -> EvalResult {
    Ok(ctx.state.real_class(ctx.receiver).into())
}

fn is_a(ctx: &mut PrimitiveContext) -> EvalResult {
    let class = ctx.class_arg(0)?;
    bool_value(ctx.state.is_a(ctx.receiver, class))
}

fn instance_of(ctx: &mut PrimitiveContext) -> EvalResult {
    let class = ctx.class_arg(0)?;
    bool_value(ctx.state.real_class(ctx.receiver) == class)
}

fn respond_to(ctx: &mut PrimitiveContext) -> EvalResult {
    let name = ctx.name_arg(0)?;
    let class = ctx.state.class_of(ctx.receiver);
    let found = ctx
        .state
        .symbols()
        .lookup(&name)
        .is_some_and(|mid| ctx.state.find_method(class, mid).is_some());
    bool_value(found)
}

fn send(ctx: &mut PrimitiveContext) -> EvalResult {
    let name = ctx.name_arg(0)?;
    let mid = ctx.state.intern(&name);
    let args = ctx.arguments[1..].to_vec();
    ctx.state.send(ctx.receiver, mid, args, ctx.block)
}

// ── Rendering ─────────────────────────────────────────────────

fn to_s(ctx: &mut PrimitiveContext) -> EvalResult {
    let text = ctx.state.default_to_s(ctx.receiver);
    ctx.string(&text)
}

fn inspect(ctx: &mut PrimitiveContext) -> EvalResult {
    ctx.state.default_inspect(ctx.receiver)
}

// ── Copies and instance variables ─────────────────────────────

fn dup(ctx: &mut PrimitiveContext) -> EvalResult {
    let receiver = ctx.receiver;
    let Some(obj) = receiver.as_object() else {
        return Ok(receiver);
    };
    let copy = match ctx.state.object(obj) {
        Some(Object::String(s)) => Object::String(s.clone()),
        Some(Object::Array(items)) => Object::Array(items.clone()),
        Some(Object::Hash(table)) => {
            let mut copy = crate::HashTable::new();
            for &(key, value) in table.entries() {
                copy.insert(ctx.state.hash_key(key), key, value);
            }
            copy.default = table.default;
            Object::Hash(copy)
        }
        Some(Object::Instance(instance)) => Object::Instance(crate::Instance {
            class: instance.class,
            ivars: instance.ivars.clone(),
        }),
        Some(Object::Exception(exc)) => Object::Exception(crate::ExceptionData {
            class: exc.class,
            message: exc.message,
        }),
        _ => {
            let class = ctx.state.class_name(ctx.state.real_class(receiver));
            return Err(ctx.state.type_error(format!("can't dup {class}")));
        }
    };
    Ok(ctx.state.heap.allocate(copy).into())
}

fn ivar_name(ctx: &mut PrimitiveContext) -> Result<crate::Sym, Exc> {
    let name = ctx.name_arg(0)?;
    match name.strip_prefix('@') {
        Some(bare) if !bare.is_empty() => Ok(ctx.state.intern(bare)),
        _ => Err(ctx
            .state
            .name_error(format!("'{name}' is not allowed as an instance variable name"))),
    }
}

fn ivar_get(ctx: &mut PrimitiveContext) -> EvalResult {
    let name = ivar_name(ctx)?;
    Ok(ctx.state.ivar_get(ctx.receiver, name))
}

fn ivar_set(ctx: &mut PrimitiveContext) -> EvalResult {
    let name = ivar_name(ctx)?;
    let value = ctx.arg(1);
    ctx.state.ivar_set(ctx.receiver, name, value)?;
    Ok(value)
}

fn ivar_defined(ctx: &mut PrimitiveContext) -> EvalResult {
    let name = ivar_name(ctx)?;
    let defined = match ctx.receiver.as_object().and_then(|obj| ctx.state.object(obj)) {
        Some(Object::Instance(instance)) => instance.ivars.contains_key(&name),
        Some(Object::Class(data)) => data.ivars.contains_key(&name),
        _ => false,
    };
    bool_value(defined)
}

fn instance_variables(ctx: &mut PrimitiveContext) -> EvalResult {
    let mut names: Vec<_> = match ctx.receiver.as_object().and_then(|obj| ctx.state.object(obj)) {
        Some(Object::Instance(instance)) => instance.ivars.keys().copied().collect(),
        Some(Object::Class(data)) => data.ivars.keys().copied().collect(),
        _ => Vec::new(),
    };
    names.sort();
    let symbols = names
        .into_iter()
        .map(|name| {
            let name = format!("@{}", ctx.state.sym_name(name));
            ctx.state.symbol_value(&name)
        })
        .collect();
    Ok(ctx.state.new_array(symbols))
}

// ── Conversions ───────────────────────────────────────────────

fn integer_conversion(ctx: &mut PrimitiveContext) -> EvalResult {
    let value = ctx.arg(0);
    if let Some(text) = ctx.state.string_content(value) {
        return match super::string::parse_integer_literal(text.trim()) {
            Some(n) => Ok(RawValue::Fixnum(n)),
            None => {
                let quoted = crate::format::quote(text);
                Err(ctx.state.argument_error(format!("invalid value for Integer(): {quoted}")))
            }
        };
    }
    match value {
        RawValue::Fixnum(_) => Ok(value),
        RawValue::Float(f) if f.is_finite() => Ok(RawValue::Fixnum(f as i64)),
        RawValue::Float(f) => {
            let class = ctx.state.core.range_error;
            Err(ctx.state.error(class, format_float(f)))
        }
        _ => Ok(RawValue::Fixnum(ctx.int_arg(0)?)),
    }
}

fn float_conversion(ctx: &mut PrimitiveContext) -> EvalResult {
    let value = ctx.arg(0);
    if let Some(text) = ctx.state.string_content(value) {
        return match text.trim().replace('_', "").parse::<crate::Float>() {
            Ok(f) => Ok(RawValue::Float(f)),
            Err(_) => {
                let quoted = crate::format::quote(text);
                Err(ctx.state.argument_error(format!("invalid value for Float(): {quoted}")))
            }
        };
    }
    Ok(RawValue::Float(ctx.float_arg(0)?))
}

fn string_conversion(ctx: &mut PrimitiveContext) -> EvalResult {
    let text = ctx.state.stringify(ctx.arg(0))?;
    ctx.string(&text)
}

fn array_conversion(ctx: &mut PrimitiveContext) -> EvalResult {
    let value = ctx.arg(0);
    if ctx.state.array_items(value).is_some() {
        return Ok(value);
    }
    let items = match value {
        RawValue::Nil => Vec::new(),
        _ => vec![value],
    };
    Ok(ctx.state.new_array(items))
}

// ── Comparable ────────────────────────────────────────────────

fn compare_with(ctx: &mut PrimitiveContext, test: fn(std::cmp::Ordering) -> bool) -> EvalResult {
    let ordering = ctx.state.compare(ctx.receiver, ctx.arg(0))?;
    bool_value(test(ordering))
}

fn between(ctx: &mut PrimitiveContext) -> EvalResult {
    let above = ctx.state.compare(ctx.receiver, ctx.arg(0))?.is_ge();
    let below = ctx.state.compare(ctx.receiver, ctx.arg(1))?.is_le();
    bool_value(above && below)
}

fn clamp(ctx: &mut PrimitiveContext) -> EvalResult {
    if ctx.state.compare(ctx.receiver, ctx.arg(0))?.is_lt() {
        return Ok(ctx.arg(0));
    }
    if ctx.state.compare(ctx.receiver, ctx.arg(1))?.is_gt() {
        return Ok(ctx.arg(1));
    }
    Ok(ctx.receiver)
}

// ── GC ────────────────────────────────────────────────────────

fn gc_start(ctx: &mut PrimitiveContext) -> EvalResult {
    ctx.state.full_gc();
    Ok(RawValue::Nil)
}

#[cfg(test)]
mod tests {
    use crate::{RawValue, State};

    fn eval_inspect(code: &str) -> String {
        let mut state = State::new();
        let value = state.load_string(code);
        if let Some(exc) = state.exc {
            panic!("{code}: {}", state.exception_message(exc));
        }
        state.inspect(value)
    }

    #[test]
    fn equality_and_identity() {
        assert_eq!(eval_inspect("o = Object.new\n[o == o, o == Object.new, o != o]"), "[true, false, false]");
        assert_eq!(eval_inspect("[nil.nil?, 1.nil?, !nil, !1]"), "[true, false, true, false]");
    }

    #[test]
    fn reflection() {
        assert_eq!(
            eval_inspect("[1.is_a?(Integer), 1.is_a?(Comparable), 'x'.instance_of?(Object), 1.respond_to?(:+)]"),
            "[true, true, false, true]"
        );
        assert_eq!(eval_inspect("1.send(:+, 2)"), "3");
        assert_eq!(eval_inspect("[nil.class, 1.5.class, :a.class, Integer.class]"), "[NilClass, Float, Symbol, Class]");
    }

    #[test]
    fn raise_forms() {
        let mut state = State::new();
        for (code, expected) in [
            ("raise", "RuntimeError: unhandled exception"),
            ("raise 'plain'", "RuntimeError: plain"),
            ("raise TypeError", "TypeError: TypeError"),
            ("raise TypeError, 'typed'", "TypeError: typed"),
            ("raise ArgumentError.new('built')", "ArgumentError: built"),
            ("raise 42", "TypeError: exception class/object expected"),
        ] {
            state.load_string(code);
            let exc = state.take_exception().expect(code);
            let class = state.class_name(state.real_class(exc.into()));
            assert_eq!(format!("{class}: {}", state.exception_message(exc)), expected, "{code}");
        }
    }

    #[test]
    fn loop_and_break() {
        assert_eq!(eval_inspect("i = 0\nloop do\n i += 1\n break i * 2 if i == 5\nend"), "10");
    }

    #[test]
    fn instance_variable_access() {
        let code = "o = Object.new\no.instance_variable_set(:@x, 1)\n[o.instance_variable_get(:@x), o.instance_variables, o.instance_variable_defined?(:@y)]";
        assert_eq!(eval_inspect(code), "[1, [:@x], false]");
    }

    #[test]
    fn conversions() {
        assert_eq!(eval_inspect("Integer(' 7 ')"), "7");
        assert_eq!(eval_inspect("[Integer('0x1f'), Integer(2.9), Float('1.5'), String(3), Array(nil), Array(1)]"), "[31, 2, 1.5, \"3\", [], [1]]");
    }

    #[test]
    fn comparable_for_user_classes() {
        let code = "class V\n include Comparable\n attr_reader :n\n def initialize(n); @n = n; end\n def <=>(o); n <=> o.n; end\nend\n[V.new(1) < V.new(2), V.new(3).between?(V.new(1), V.new(2))]";
        assert_eq!(eval_inspect(code), "[true, false]");
    }

    #[test]
    fn gc_start_keeps_reachable_values() {
        let mut state = State::new();
        let value = state.load_string("keep = 'kept'\nGC.start\nkeep");
        assert!(state.exc.is_none());
        assert_eq!(state.string_content(value), Some("kept"));
        assert_eq!(state.load_string("GC.start"), RawValue::Nil);
    }
}
