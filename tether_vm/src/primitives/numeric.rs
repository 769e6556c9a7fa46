use std::cmp::Ordering;

use super::{PrimitiveContext, PrimitiveMessage, bool_value};
use crate::{Aspec, EvalResult, Exc, Float, RawValue, format::format_float};

pub const NUMERIC: &[PrimitiveMessage] = &[
    PrimitiveMessage::new("+", Aspec::req(1), add),
    PrimitiveMessage::new("-", Aspec::req(1), sub),
    PrimitiveMessage::new("*", Aspec::req(1), mul),
    PrimitiveMessage::new("/", Aspec::req(1), div),
    PrimitiveMessage::new("%", Aspec::req(1), modulo),
    PrimitiveMessage::new("modulo", Aspec::req(1), modulo),
    PrimitiveMessage::new("**", Aspec::req(1), pow),
    PrimitiveMessage::new("-@", Aspec::NONE, negate),
    PrimitiveMessage::new("+@", Aspec::NONE, |ctx| Ok(ctx.receiver)),
    PrimitiveMessage::new("abs", Aspec::NONE, abs),
    PrimitiveMessage::new("divmod", Aspec::req(1), divmod),
    PrimitiveMessage::new("==", Aspec::req(1), equal),
    PrimitiveMessage::new("<=>", Aspec::req(1), spaceship),
    PrimitiveMessage::new("<", Aspec::req(1), |ctx| compare_with(ctx, Ordering::is_lt)),
    PrimitiveMessage::new("<=", Aspec::req(1), |ctx| compare_with(ctx, Ordering::is_le)),
    PrimitiveMessage::new(">", Aspec::req(1), |ctx| compare_with(ctx, Ordering::is_gt)),
    PrimitiveMessage::new(">=", Aspec::req(1), |ctx| compare_with(ctx, Ordering::is_ge)),
    PrimitiveMessage::new("zero?", Aspec::NONE, |ctx| sign_test(ctx, Ordering::is_eq)),
    PrimitiveMessage::new("positive?", Aspec::NONE, |ctx| sign_test(ctx, Ordering::is_gt)),
    PrimitiveMessage::new("negative?", Aspec::NONE, |ctx| sign_test(ctx, Ordering::is_lt)),
    PrimitiveMessage::new("to_i", Aspec::NONE, to_i),
    PrimitiveMessage::new("to_int", Aspec::NONE, to_i),
    PrimitiveMessage::new("truncate", Aspec::NONE, to_i),
    PrimitiveMessage::new("to_f", Aspec::NONE, to_f),
    PrimitiveMessage::new("integer?", Aspec::NONE, |ctx| bool_value(matches!(ctx.receiver, RawValue::Fixnum(_)))),
];

pub const INTEGER: &[PrimitiveMessage] = &[
    PrimitiveMessage::new("to_s", Aspec::opt(1), integer_to_s),
    PrimitiveMessage::new("inspect", Aspec::NONE, integer_to_s),
    PrimitiveMessage::new("times", Aspec::BLOCK, times),
    PrimitiveMessage::new("upto", Aspec::req(1).with(Aspec::BLOCK), upto),
    PrimitiveMessage::new("downto", Aspec::req(1).with(Aspec::BLOCK), downto),
    PrimitiveMessage::new("succ", Aspec::NONE, |ctx| integer_step(ctx, 1)),
    PrimitiveMessage::new("next", Aspec::NONE, |ctx| integer_step(ctx, 1)),
    PrimitiveMessage::new("pred", Aspec::NONE, |ctx| integer_step(ctx, -1)),
    PrimitiveMessage::new("even?", Aspec::NONE, |ctx| bool_value(receiver_int(ctx) % 2 == 0)),
    PrimitiveMessage::new("odd?", Aspec::NONE, |ctx| bool_value(receiver_int(ctx) % 2 != 0)),
    PrimitiveMessage::new("chr", Aspec::NONE, chr),
    PrimitiveMessage::new("&", Aspec::req(1), |ctx| bitwise(ctx, |a, b| a & b)),
    PrimitiveMessage::new("|", Aspec::req(1), |ctx| bitwise(ctx, |a, b| a | b)),
    PrimitiveMessage::new("^", Aspec::req(1), |ctx| bitwise(ctx, |a, b| a ^ b)),
    PrimitiveMessage::new("<<", Aspec::req(1), |ctx| shift(ctx, false)),
    PrimitiveMessage::new(">>", Aspec::req(1), |ctx| shift(ctx, true)),
    PrimitiveMessage::new("~", Aspec::NONE, |ctx| Ok(RawValue::Fixnum(!receiver_int(ctx)))),
    PrimitiveMessage::new("floor", Aspec::NONE, |ctx| Ok(ctx.receiver)),
    PrimitiveMessage::new("ceil", Aspec::NONE, |ctx| Ok(ctx.receiver)),
    PrimitiveMessage::new("round", Aspec::NONE, |ctx| Ok(ctx.receiver)),
];

pub const FLOAT: &[PrimitiveMessage] = &[
    PrimitiveMessage::new("to_s", Aspec::NONE, float_to_s),
    PrimitiveMessage::new("inspect", Aspec::NONE, float_to_s),
    PrimitiveMessage::new("nan?", Aspec::NONE, |ctx| bool_value(receiver_float(ctx).is_nan())),
    PrimitiveMessage::new("finite?", Aspec::NONE, |ctx| bool_value(receiver_float(ctx).is_finite())),
    PrimitiveMessage::new("infinite?", Aspec::NONE, infinite),
    PrimitiveMessage::new("floor", Aspec::NONE, |ctx| float_to_int(ctx, Float::floor)),
    PrimitiveMessage::new("ceil", Aspec::NONE, |ctx| float_to_int(ctx, Float::ceil)),
    PrimitiveMessage::new("round", Aspec::opt(1), round),
];

/// A numeric operand.
#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(Float),
}

impl Num {
    fn of(value: RawValue) -> Option<Num> {
        match value {
            RawValue::Fixnum(n) => Some(Num::Int(n)),
            RawValue::Float(f) => Some(Num::Float(f)),
            _ => None,
        }
    }

    fn to_float(self) -> Float {
        match self {
            Num::Int(n) => n as Float,
            Num::Float(f) => f,
        }
    }
}

fn receiver_int(ctx: &PrimitiveContext) -> i64 {
    ctx.receiver.as_fixnum().unwrap_or_default()
}

fn receiver_float(ctx: &PrimitiveContext) -> Float {
    match ctx.receiver {
        RawValue::Float(f) => f,
        RawValue::Fixnum(n) => n as Float,
        _ => 0.0,
    }
}

fn operands(ctx: &mut PrimitiveContext) -> Result<(Num, Num), Exc> {
    let Some(a) = Num::of(ctx.receiver) else {
        return Err(ctx.state.type_error("receiver is not a number"));
    };
    let arg = ctx.arg(0);
    match Num::of(arg) {
        Some(b) => Ok((a, b)),
        None => {
            let class = match arg {
                RawValue::Nil => "nil".to_owned(),
                _ => ctx.state.class_name(ctx.state.real_class(arg)),
            };
            Err(ctx.state.type_error(format!("{class} can't be coerced into {}", number_class(a))))
        }
    }
}

fn number_class(n: Num) -> &'static str {
    match n {
        Num::Int(_) => "Integer",
        Num::Float(_) => "Float",
    }
}

fn zero_division(ctx: &mut PrimitiveContext) -> Exc {
    let class = ctx.state.core.zero_division_error;
    ctx.state.error(class, "divided by 0")
}

/// Integer arithmetic falls back to floats on overflow.
fn arithmetic(
    ctx: &mut PrimitiveContext,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(Float, Float) -> Float,
) -> EvalResult {
    Ok(match operands(ctx)? {
        (Num::Int(a), Num::Int(b)) => match int_op(a, b) {
            Some(n) => RawValue::Fixnum(n),
            None => RawValue::Float(float_op(a as Float, b as Float)),
        },
        (a, b) => RawValue::Float(float_op(a.to_float(), b.to_float())),
    })
}

fn add(ctx: &mut PrimitiveContext) -> EvalResult {
    arithmetic(ctx, i64::checked_add, |a, b| a + b)
}

fn sub(ctx: &mut PrimitiveContext) -> EvalResult {
    arithmetic(ctx, i64::checked_sub, |a, b| a - b)
}

fn mul(ctx: &mut PrimitiveContext) -> EvalResult {
    arithmetic(ctx, i64::checked_mul, |a, b| a * b)
}

fn floor_div(a: i64, b: i64) -> i64 {
    let q = a.wrapping_div(b);
    if a.wrapping_rem(b) != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q }
}

fn floor_mod(a: i64, b: i64) -> i64 {
    let r = a.wrapping_rem(b);
    if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r }
}

fn float_mod(a: Float, b: Float) -> Float {
    let r = a % b;
    if r != 0.0 && ((r < 0.0) != (b < 0.0)) { r + b } else { r }
}

fn div(ctx: &mut PrimitiveContext) -> EvalResult {
    match operands(ctx)? {
        (Num::Int(_), Num::Int(0)) => Err(zero_division(ctx)),
        (Num::Int(a), Num::Int(b)) => Ok(RawValue::Fixnum(floor_div(a, b))),
        (a, b) => Ok(RawValue::Float(a.to_float() / b.to_float())),
    }
}

fn modulo(ctx: &mut PrimitiveContext) -> EvalResult {
    match operands(ctx)? {
        (Num::Int(_), Num::Int(0)) => Err(zero_division(ctx)),
        (Num::Int(a), Num::Int(b)) => Ok(RawValue::Fixnum(floor_mod(a, b))),
        (a, b) => Ok(RawValue::Float(float_mod(a.to_float(), b.to_float()))),
    }
}

fn divmod(ctx: &mut PrimitiveContext) -> EvalResult {
    let pair = match operands(ctx)? {
        (Num::Int(_), Num::Int(0)) => return Err(zero_division(ctx)),
        (Num::Int(a), Num::Int(b)) => [RawValue::Fixnum(floor_div(a, b)), RawValue::Fixnum(floor_mod(a, b))],
        (a, b) => {
            let (a, b) = (a.to_float(), b.to_float());
            [RawValue::Float((a / b).floor()), RawValue::Float(float_mod(a, b))]
        }
    };
    Ok(ctx.state.new_array(pair.to_vec()))
}

fn pow(ctx: &mut PrimitiveContext) -> EvalResult {
    Ok(match operands(ctx)? {
        (Num::Int(a), Num::Int(b)) if b >= 0 => match u32::try_from(b).ok().and_then(|b| a.checked_pow(b)) {
            Some(n) => RawValue::Fixnum(n),
            None => RawValue::Float((a as Float).powf(b as Float)),
        },
        (a, b) => RawValue::Float(a.to_float().powf(b.to_float())),
    })
}

fn negate(ctx: &mut PrimitiveContext) -> EvalResult {
    Ok(match ctx.receiver {
        RawValue::Fixnum(n) => match n.checked_neg() {
            Some(n) => RawValue::Fixnum(n),
            None => RawValue::Float(-(n as Float)),
        },
        RawValue::Float(f) => RawValue::Float(-f),
        other => other,
    })
}

fn abs(ctx: &mut PrimitiveContext) -> EvalResult {
    Ok(match ctx.receiver {
        RawValue::Fixnum(n) => match n.checked_abs() {
            Some(n) => RawValue::Fixnum(n),
            None => RawValue::Float((n as Float).abs()),
        },
        RawValue::Float(f) => RawValue::Float(f.abs()),
        other => other,
    })
}

// ── Comparison ────────────────────────────────────────────────

fn ordering(a: Num, b: Num) -> Option<Ordering> {
    match (a, b) {
        (Num::Int(a), Num::Int(b)) => Some(a.cmp(&b)),
        (a, b) => a.to_float().partial_cmp(&b.to_float()),
    }
}

fn equal(ctx: &mut PrimitiveContext) -> EvalResult {
    let equal = match (Num::of(ctx.receiver), Num::of(ctx.arg(0))) {
        (Some(a), Some(b)) => ordering(a, b) == Some(Ordering::Equal),
        _ => false,
    };
    bool_value(equal)
}

fn spaceship(ctx: &mut PrimitiveContext) -> EvalResult {
    Ok(match (Num::of(ctx.receiver), Num::of(ctx.arg(0))) {
        (Some(a), Some(b)) => match ordering(a, b) {
            Some(order) => RawValue::Fixnum(order as i64),
            None => RawValue::Nil,
        },
        _ => RawValue::Nil,
    })
}

fn compare_with(ctx: &mut PrimitiveContext, test: fn(Ordering) -> bool) -> EvalResult {
    let arg = ctx.arg(0);
    match (Num::of(ctx.receiver), Num::of(arg)) {
        (Some(a), Some(b)) => bool_value(ordering(a, b).is_some_and(test)),
        (Some(a), None) => {
            let other = ctx.state.inspect(arg);
            Err(ctx
                .state
                .argument_error(format!("comparison of {} with {other} failed", number_class(a))))
        }
        _ => Err(ctx.state.type_error("receiver is not a number")),
    }
}

fn sign_test(ctx: &mut PrimitiveContext, test: fn(Ordering) -> bool) -> EvalResult {
    let sign = Num::of(ctx.receiver).and_then(|n| ordering(n, Num::Int(0)));
    bool_value(sign.is_some_and(test))
}

// ── Conversion ────────────────────────────────────────────────

fn to_i(ctx: &mut PrimitiveContext) -> EvalResult {
    match ctx.receiver {
        RawValue::Float(f) if !f.is_finite() => {
            let class = ctx.state.core.range_error;
            Err(ctx.state.error(class, format_float(f)))
        }
        RawValue::Float(f) => Ok(RawValue::Fixnum(f.trunc() as i64)),
        other => Ok(other),
    }
}

fn to_f(ctx: &mut PrimitiveContext) -> EvalResult {
    Ok(RawValue::Float(receiver_float(ctx)))
}

fn float_to_int(ctx: &mut PrimitiveContext, round: fn(Float) -> Float) -> EvalResult {
    let f = round(receiver_float(ctx));
    if !f.is_finite() {
        let class = ctx.state.core.range_error;
        return Err(ctx.state.error(class, format_float(f)));
    }
    Ok(RawValue::Fixnum(f as i64))
}

fn round(ctx: &mut PrimitiveContext) -> EvalResult {
    let digits = match ctx.arg(0) {
        RawValue::Nil => 0,
        _ => ctx.int_arg(0)?,
    };
    if digits <= 0 {
        return float_to_int(ctx, Float::round);
    }
    let scale = (10.0 as Float).powi(digits.min(30) as i32);
    Ok(RawValue::Float((receiver_float(ctx) * scale).round() / scale))
}

fn infinite(ctx: &mut PrimitiveContext) -> EvalResult {
    let f = receiver_float(ctx);
    Ok(match (f.is_infinite(), f > 0.0) {
        (false, _) => RawValue::Nil,
        (true, true) => RawValue::Fixnum(1),
        (true, false) => RawValue::Fixnum(-1),
    })
}

fn float_to_s(ctx: &mut PrimitiveContext) -> EvalResult {
    let text = format_float(receiver_float(ctx));
    ctx.string(&text)
}

fn integer_to_s(ctx: &mut PrimitiveContext) -> EvalResult {
    let n = receiver_int(ctx);
    let base = match ctx.arg(0) {
        RawValue::Nil => 10,
        _ => ctx.int_arg(0)?,
    };
    if !(2..=36).contains(&base) {
        return Err(ctx.state.argument_error(format!("invalid radix {base}")));
    }
    let text = to_radix(n, base as u32);
    ctx.string(&text)
}

fn to_radix(n: i64, base: u32) -> String {
    if base == 10 {
        return n.to_string();
    }
    let mut magnitude = n.unsigned_abs();
    let mut digits = Vec::new();
    loop {
        let digit = (magnitude % u64::from(base)) as u32;
        digits.push(char::from_digit(digit, base).unwrap_or('?'));
        magnitude /= u64::from(base);
        if magnitude == 0 {
            break;
        }
    }
    if n < 0 {
        digits.push('-');
    }
    digits.iter().rev().collect()
}

fn chr(ctx: &mut PrimitiveContext) -> EvalResult {
    let n = receiver_int(ctx);
    match u32::try_from(n).ok().and_then(char::from_u32) {
        Some(c) => ctx.string(c.encode_utf8(&mut [0; 4])),
        None => {
            let class = ctx.state.core.range_error;
            Err(ctx.state.error(class, format!("{n} out of char range")))
        }
    }
}

// ── Integer iteration and bits ────────────────────────────────

fn times(ctx: &mut PrimitiveContext) -> EvalResult {
    let count = receiver_int(ctx);
    let arena = ctx.state.arena_save();
    for i in 0..count {
        ctx.state.arena_restore(arena);
        ctx.yield_values(vec![RawValue::Fixnum(i)])?;
    }
    Ok(ctx.receiver)
}

fn upto(ctx: &mut PrimitiveContext) -> EvalResult {
    let (from, to) = (receiver_int(ctx), ctx.int_arg(0)?);
    let arena = ctx.state.arena_save();
    for i in from..=to {
        ctx.state.arena_restore(arena);
        ctx.yield_values(vec![RawValue::Fixnum(i)])?;
    }
    Ok(ctx.receiver)
}

fn downto(ctx: &mut PrimitiveContext) -> EvalResult {
    let (from, to) = (receiver_int(ctx), ctx.int_arg(0)?);
    let arena = ctx.state.arena_save();
    for i in (to..=from).rev() {
        ctx.state.arena_restore(arena);
        ctx.yield_values(vec![RawValue::Fixnum(i)])?;
    }
    Ok(ctx.receiver)
}

fn integer_step(ctx: &mut PrimitiveContext, delta: i64) -> EvalResult {
    let n = receiver_int(ctx);
    Ok(match n.checked_add(delta) {
        Some(n) => RawValue::Fixnum(n),
        None => RawValue::Float(n as Float + delta as Float),
    })
}

fn bitwise(ctx: &mut PrimitiveContext, op: fn(i64, i64) -> i64) -> EvalResult {
    let (a, b) = (receiver_int(ctx), ctx.int_arg(0)?);
    Ok(RawValue::Fixnum(op(a, b)))
}

fn shift(ctx: &mut PrimitiveContext, right: bool) -> EvalResult {
    let (a, b) = (receiver_int(ctx), ctx.int_arg(0)?);
    let left_by = if right { b.wrapping_neg() } else { b };
    Ok(RawValue::Fixnum(match left_by {
        n if n >= 64 => 0,
        n if n >= 0 => a.wrapping_shl(n as u32),
        n if n <= -64 => {
            if a < 0 { -1 } else { 0 }
        }
        n => a >> (-n),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn floor_semantics() {
        assert_eq!(floor_div(-7, 2), -4);
        assert_eq!(floor_mod(-7, 2), 1);
        assert_eq!(floor_mod(7, -2), -1);
        assert_eq!(eval_inspect("[7 / 2, -7 / 2, 7 % 3, -7 % 3, 7.0 / 2]"), "[3, -4, 1, 2, 3.5]");
    }

    #[test]
    fn mixed_arithmetic() {
        assert_eq!(eval_inspect("[1 + 2.5, 2 * 3, 2 ** 10, 2 ** -1, 10.divmod(3)]"), "[3.5, 6, 1024, 0.5, [3, 1]]");
        assert_eq!(eval_inspect("[1 == 1.0, 1 <=> 2, 3.0 <=> 1, 1 <=> 'a']"), "[true, -1, 1, nil]");
    }

    #[test]
    fn overflow_promotes_to_float() {
        assert_eq!(eval_inspect("(9223372036854775807 + 1).class"), "Float");
    }

    #[test]
    fn integer_helpers() {
        assert_eq!(eval_inspect("[255.to_s(16), (-5).to_s(2), 3.even?, 3.odd?, 65.chr, 5.pred]"), "[\"ff\", \"-101\", false, true, \"A\", 4]");
        assert_eq!(eval_inspect("acc = []\n3.times { |i| acc << i }\n1.upto(2) { |i| acc << i }\nacc"), "[0, 1, 2, 1, 2]");
        assert_eq!(eval_inspect("[6 & 3, 6 | 3, 6 ^ 3, 1 << 4, -16 >> 2]"), "[2, 7, 5, 16, -4]");
    }

    #[test]
    fn float_helpers() {
        assert_eq!(eval_inspect("[1.5.floor, 1.5.ceil, 2.5.round, 1.25.round(1), 0.1.nan?]"), "[1, 2, 3, 1.3, false]");
        assert_eq!(eval_inspect("[1.0 / 0, -1.0 / 0, (1.0 / 0).infinite?]"), "[Infinity, -Infinity, 1]");
    }

    #[test]
    fn comparison_errors() {
        let mut state = State::new();
        state.load_string("1 < 'a'");
        let exc = state.take_exception().expect("ArgumentError");
        assert_eq!(state.exception_message(exc), "comparison of Integer with \"a\" failed");
        state.load_string("1 + nil");
        let exc = state.take_exception().expect("TypeError");
        assert_eq!(state.exception_message(exc), "nil can't be coerced into Integer");
    }
}
