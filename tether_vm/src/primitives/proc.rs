use super::{PrimitiveContext, PrimitiveMessage, bool_value};
use crate::{Aspec, EvalResult, RawValue};

pub const PROC: &[PrimitiveMessage] = &[
    PrimitiveMessage::new("call", Aspec::ANY, call),
    PrimitiveMessage::new("[]", Aspec::ANY, call),
    PrimitiveMessage::new("yield", Aspec::ANY, call),
    PrimitiveMessage::new("===", Aspec::ANY, call),
    PrimitiveMessage::new("to_proc", Aspec::NONE, |ctx| Ok(ctx.receiver)),
    PrimitiveMessage::new("arity", Aspec::NONE, arity),
    PrimitiveMessage::new("lambda?", Aspec::NONE, |_| bool_value(false)),
];

pub const PROC_CLASS: &[PrimitiveMessage] = &[PrimitiveMessage::new("new", Aspec::BLOCK, |ctx| ctx.block())];

fn call(ctx: &mut PrimitiveContext) -> EvalResult {
    let args = ctx.arguments.clone();
    ctx.state.call_block(ctx.receiver, args, ctx.block, None)
}

/// Number of required parameters, negated and offset by one when optional
/// or rest parameters make the count open-ended.
fn arity(ctx: &mut PrimitiveContext) -> EvalResult {
    let Some(proc) = ctx.state.proc_data(ctx.receiver) else {
        return Ok(RawValue::Nil);
    };
    let params = &proc.body.params;
    let required = params.required.len() as i64;
    Ok(RawValue::Fixnum(if params.optional.is_empty() && params.rest.is_none() {
        required
    } else {
        -(required + 1)
    }))
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
    fn calling() {
        assert_eq!(eval_inspect("add = proc { |a, b| a + b }\n[add.call(1, 2), add[3, 4], add.yield(5, 6)]"), "[3, 7, 11]");
        assert_eq!(eval_inspect("counter = 0\ninc = lambda { counter += 1 }\ninc.call\ninc.call\ncounter"), "2");
        assert_eq!(eval_inspect("Proc.new { |x| x * 3 }.call(2)"), "6");
    }

    #[test]
    fn arity() {
        assert_eq!(eval_inspect("[proc { }.arity, proc { |a, b| }.arity, proc { |a, *r| }.arity]"), "[0, 2, -2]");
    }

    #[test]
    fn block_parameter_captures_the_block() {
        let code = "def capture(&blk)\n blk\nend\nb = capture { |x| x + 1 }\nb.call(41)";
        assert_eq!(eval_inspect(code), "42");
    }

    #[test]
    fn break_from_orphan_proc_is_a_local_jump() {
        let mut state = State::new();
        state.load_string("pr = proc { break 1 }\npr.call");
        let exc = state.exc.expect("LocalJumpError");
        assert_eq!(state.class_name(state.real_class(exc.into())), "LocalJumpError");
    }
}
