use super::{PrimitiveContext, PrimitiveMessage, bool_value};
use crate::{Aspec, EvalResult, Object, RawValue};

pub const EXCEPTION: &[PrimitiveMessage] = &[
    PrimitiveMessage::new("initialize", Aspec::opt(1), initialize),
    PrimitiveMessage::new("message", Aspec::NONE, |ctx| {
        let receiver = ctx.receiver;
        ctx.send(receiver, "to_s", Vec::new())
    }),
    PrimitiveMessage::new("to_s", Aspec::NONE, to_s),
    PrimitiveMessage::new("inspect", Aspec::NONE, inspect),
    PrimitiveMessage::new("full_message", Aspec::NONE, full_message),
    PrimitiveMessage::new("backtrace", Aspec::NONE, |_| Ok(RawValue::Nil)),
    PrimitiveMessage::new("exception", Aspec::opt(1), exception),
    PrimitiveMessage::new("==", Aspec::req(1), equal),
];

pub const EXCEPTION_CLASS: &[PrimitiveMessage] = &[PrimitiveMessage::new("exception", Aspec::ANY, |ctx| {
    let (receiver, args) = (ctx.receiver, ctx.arguments.clone());
    ctx.send(receiver, "new", args)
})];

fn raw_message(ctx: &PrimitiveContext, exc: RawValue) -> RawValue {
    match exc.as_object().and_then(|obj| ctx.state.object(obj)) {
        Some(Object::Exception(data)) => data.message,
        _ => RawValue::Nil,
    }
}

fn set_message(ctx: &mut PrimitiveContext, exc: RawValue, message: RawValue) {
    if let Some(obj) = exc.as_object()
        && let Some(Object::Exception(data)) = ctx.state.heap.get_mut(obj)
    {
        data.message = message;
    }
}

fn initialize(ctx: &mut PrimitiveContext) -> EvalResult {
    let (receiver, message) = (ctx.receiver, ctx.arg(0));
    set_message(ctx, receiver, message);
    Ok(RawValue::Nil)
}

/// The message given at construction, or the class name without one.
fn to_s(ctx: &mut PrimitiveContext) -> EvalResult {
    match raw_message(ctx, ctx.receiver) {
        RawValue::Nil => {
            let name = ctx.state.class_name(ctx.state.real_class(ctx.receiver));
            ctx.string(&name)
        }
        message => {
            let text = ctx.state.stringify(message)?;
            ctx.string(&text)
        }
    }
}

fn message_text(ctx: &mut PrimitiveContext) -> Result<String, crate::Exc> {
    let receiver = ctx.receiver;
    let message = ctx.send(receiver, "message", Vec::new())?;
    ctx.state.stringify(message)
}

fn inspect(ctx: &mut PrimitiveContext) -> EvalResult {
    let class = ctx.state.class_name(ctx.state.real_class(ctx.receiver));
    let message = message_text(ctx)?;
    let text = if message.is_empty() || message == class {
        class
    } else {
        format!("#<{class}: {message}>")
    };
    ctx.string(&text)
}

fn full_message(ctx: &mut PrimitiveContext) -> EvalResult {
    let class = ctx.state.class_name(ctx.state.real_class(ctx.receiver));
    let message = message_text(ctx)?;
    ctx.string(&format!("{message} ({class})"))
}

/// `exc.exception(msg)`: a copy carrying a new message, or the receiver
/// itself without an argument.
fn exception(ctx: &mut PrimitiveContext) -> EvalResult {
    let receiver = ctx.receiver;
    if ctx.arguments.is_empty() {
        return Ok(receiver);
    }
    let copy = ctx.send(receiver, "dup", Vec::new())?;
    let message = ctx.arg(0);
    set_message(ctx, copy, message);
    Ok(copy)
}

fn equal(ctx: &mut PrimitiveContext) -> EvalResult {
    let other = ctx.arg(0);
    if other == ctx.receiver {
        return bool_value(true);
    }
    if ctx.state.real_class(other) != ctx.state.real_class(ctx.receiver) {
        return bool_value(false);
    }
    let mine = message_text(ctx)?;
    let theirs = ctx.send(other, "message", Vec::new())?;
    let theirs = ctx.state.stringify(theirs)?;
    bool_value(mine == theirs)
}

#[cfg(test)]
mod tests {
    use crate::State;

    fn eval_inspect(code: &str) -> String {
        let mut state = State::new();
        let value = state.load_string(code);
        if let Some(exc) = state.exc {
            panic!("{code}: {}", state.exception_message(exc));
        }
        state.inspect(value)
    }

    #[test]
    fn messages() {
        assert_eq!(
            eval_inspect("[RuntimeError.new('boom').message, ArgumentError.new.message, TypeError.new('x').inspect]"),
            "[\"boom\", \"ArgumentError\", \"#<TypeError: x>\"]"
        );
    }

    #[test]
    fn user_defined_errors() {
        let code = "class AppError < StandardError\n def message\n  'custom'\n end\nend\nbegin\n raise AppError\nrescue StandardError => e\n [e.class, e.message, e.is_a?(AppError)]\nend";
        assert_eq!(eval_inspect(code), "[AppError, \"custom\", true]");
    }

    #[test]
    fn raise_with_class_and_message() {
        let mut state = State::new();
        state.load_string("class Oops < RuntimeError\nend\nraise Oops, 'bad'");
        let exc = state.exc.expect("Oops");
        assert_eq!(state.exception_message(exc), "bad");
        assert_eq!(state.class_name(state.real_class(exc.into())), "Oops");
    }

    #[test]
    fn exception_copies() {
        assert_eq!(
            eval_inspect("e = RuntimeError.new('a')\n[e.exception.equal?(e), e.exception('b').message, e == RuntimeError.new('a')]"),
            "[true, \"b\", true]"
        );
    }
}
