use super::{PrimitiveContext, PrimitiveMessage, bool_value};
use crate::{Aspec, EvalResult, Exc, Float, Object, RawValue, format::quote};

pub const STRING: &[PrimitiveMessage] = &[
    PrimitiveMessage::new("==", Aspec::req(1), equal),
    PrimitiveMessage::new("eql?", Aspec::req(1), equal),
    PrimitiveMessage::new("<=>", Aspec::req(1), spaceship),
    PrimitiveMessage::new("+", Aspec::req(1), concat_new),
    PrimitiveMessage::new("*", Aspec::req(1), repeat),
    PrimitiveMessage::new("<<", Aspec::req(1), append),
    PrimitiveMessage::new("concat", Aspec::req(1), append),
    PrimitiveMessage::new("replace", Aspec::req(1), replace),
    PrimitiveMessage::new("length", Aspec::NONE, length),
    PrimitiveMessage::new("size", Aspec::NONE, length),
    PrimitiveMessage::new("bytesize", Aspec::NONE, |ctx| Ok(RawValue::Fixnum(content(ctx).len() as i64))),
    PrimitiveMessage::new("empty?", Aspec::NONE, |ctx| bool_value(content(ctx).is_empty())),
    PrimitiveMessage::new("upcase", Aspec::NONE, |ctx| map_content(ctx, |s| s.to_uppercase())),
    PrimitiveMessage::new("downcase", Aspec::NONE, |ctx| map_content(ctx, |s| s.to_lowercase())),
    PrimitiveMessage::new("capitalize", Aspec::NONE, |ctx| map_content(ctx, capitalize)),
    PrimitiveMessage::new("swapcase", Aspec::NONE, |ctx| map_content(ctx, swapcase)),
    PrimitiveMessage::new("reverse", Aspec::NONE, |ctx| map_content(ctx, |s| s.chars().rev().collect())),
    PrimitiveMessage::new("strip", Aspec::NONE, |ctx| map_content(ctx, |s| s.trim().to_owned())),
    PrimitiveMessage::new("lstrip", Aspec::NONE, |ctx| map_content(ctx, |s| s.trim_start().to_owned())),
    PrimitiveMessage::new("rstrip", Aspec::NONE, |ctx| map_content(ctx, |s| s.trim_end().to_owned())),
    PrimitiveMessage::new("chomp", Aspec::NONE, |ctx| map_content(ctx, chomp)),
    PrimitiveMessage::new("chop", Aspec::NONE, |ctx| map_content(ctx, chop)),
    PrimitiveMessage::new("include?", Aspec::req(1), |ctx| test_with(ctx, |s, arg| s.contains(arg))),
    PrimitiveMessage::new("start_with?", Aspec::req(1), |ctx| test_with(ctx, |s, arg| s.starts_with(arg))),
    PrimitiveMessage::new("end_with?", Aspec::req(1), |ctx| test_with(ctx, |s, arg| s.ends_with(arg))),
    PrimitiveMessage::new("index", Aspec::req(1), index),
    PrimitiveMessage::new("[]", Aspec::arg(1, 1), slice),
    PrimitiveMessage::new("slice", Aspec::arg(1, 1), slice),
    PrimitiveMessage::new("split", Aspec::opt(1), split),
    PrimitiveMessage::new("lines", Aspec::NONE, lines),
    PrimitiveMessage::new("chars", Aspec::NONE, chars),
    PrimitiveMessage::new("bytes", Aspec::NONE, bytes),
    PrimitiveMessage::new("each_char", Aspec::BLOCK, each_char),
    PrimitiveMessage::new("ord", Aspec::NONE, ord),
    PrimitiveMessage::new("sub", Aspec::arg(1, 1), |ctx| substitute(ctx, false)),
    PrimitiveMessage::new("gsub", Aspec::arg(1, 1), |ctx| substitute(ctx, true)),
    PrimitiveMessage::new("center", Aspec::arg(1, 1), |ctx| justify(ctx, Justify::Center)),
    PrimitiveMessage::new("ljust", Aspec::arg(1, 1), |ctx| justify(ctx, Justify::Left)),
    PrimitiveMessage::new("rjust", Aspec::arg(1, 1), |ctx| justify(ctx, Justify::Right)),
    PrimitiveMessage::new("to_s", Aspec::NONE, |ctx| Ok(ctx.receiver)),
    PrimitiveMessage::new("to_str", Aspec::NONE, |ctx| Ok(ctx.receiver)),
    PrimitiveMessage::new("inspect", Aspec::NONE, |ctx| {
        let text = quote(&content(ctx));
        ctx.string(&text)
    }),
    PrimitiveMessage::new("to_sym", Aspec::NONE, to_sym),
    PrimitiveMessage::new("intern", Aspec::NONE, to_sym),
    PrimitiveMessage::new("to_i", Aspec::opt(1), to_i),
    PrimitiveMessage::new("to_f", Aspec::NONE, to_f),
];

pub const SYMBOL: &[PrimitiveMessage] = &[
    PrimitiveMessage::new("to_s", Aspec::NONE, symbol_to_s),
    PrimitiveMessage::new("id2name", Aspec::NONE, symbol_to_s),
    PrimitiveMessage::new("name", Aspec::NONE, symbol_to_s),
    PrimitiveMessage::new("to_sym", Aspec::NONE, |ctx| Ok(ctx.receiver)),
    PrimitiveMessage::new("to_proc", Aspec::NONE, symbol_to_proc),
    PrimitiveMessage::new("length", Aspec::NONE, symbol_length),
    PrimitiveMessage::new("size", Aspec::NONE, symbol_length),
    PrimitiveMessage::new("<=>", Aspec::req(1), symbol_spaceship),
];

/// Parses an integer literal: one optional sign, `0x`/`0b`/`0o`/leading-zero
/// radix prefixes and `_` separators. The whole string must be consumed, so
/// surrounding whitespace is rejected.
pub fn parse_integer_literal(text: &str) -> Option<i64> {
    let (negative, body) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };
    let lower = body.to_ascii_lowercase();
    let (radix, digits) = if let Some(rest) = lower.strip_prefix("0x") {
        (16, rest)
    } else if let Some(rest) = lower.strip_prefix("0b") {
        (2, rest)
    } else if let Some(rest) = lower.strip_prefix("0o") {
        (8, rest)
    } else if lower.len() > 1 && lower.starts_with('0') {
        (8, &lower[1..])
    } else {
        (10, lower.as_str())
    };
    // from_str_radix takes its own sign
    if digits.is_empty()
        || digits.starts_with(['+', '-', '_'])
        || digits.ends_with('_')
        || digits.contains("__")
    {
        return None;
    }
    let magnitude = u64::from_str_radix(&digits.replace('_', ""), radix).ok()?;
    if negative {
        0i64.checked_sub_unsigned(magnitude)
    } else {
        i64::try_from(magnitude).ok()
    }
}

/// `String#to_i`: the longest valid prefix, zero when there is none.
fn lenient_integer(text: &str, radix: u32) -> i64 {
    let text = text.trim_start();
    let (negative, body) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let mut value: i64 = 0;
    for c in body.chars() {
        if c == '_' {
            continue;
        }
        let Some(digit) = c.to_digit(radix) else {
            break;
        };
        value = value.saturating_mul(i64::from(radix)).saturating_add(i64::from(digit));
    }
    if negative { -value } else { value }
}

fn lenient_float(text: &str) -> Float {
    let text = text.trim_start();
    let mut end = 0;
    let mut seen_dot = false;
    let mut seen_exp = false;
    for (i, c) in text.char_indices() {
        let accept = match c {
            '0'..='9' | '_' => true,
            '+' | '-' => i == 0 || text[..i].ends_with(['e', 'E']),
            '.' if !seen_dot && !seen_exp => {
                seen_dot = true;
                true
            }
            'e' | 'E' if !seen_exp && i > 0 => {
                seen_exp = true;
                true
            }
            _ => false,
        };
        if !accept {
            break;
        }
        end = i + c.len_utf8();
    }
    let candidate = text[..end].replace('_', "");
    let candidate = candidate.trim_end_matches(['e', 'E', '+', '-', '.']);
    candidate.parse().unwrap_or(0.0)
}

fn content(ctx: &PrimitiveContext) -> String {
    ctx.state.string_content(ctx.receiver).unwrap_or_default().to_owned()
}

fn set_content(ctx: &mut PrimitiveContext, text: String) {
    if let Some(obj) = ctx.receiver.as_object()
        && let Some(Object::String(s)) = ctx.state.heap.get_mut(obj)
    {
        *s = text;
    }
}

fn map_content(ctx: &mut PrimitiveContext, f: fn(&str) -> String) -> EvalResult {
    let text = f(&content(ctx));
    ctx.string(&text)
}

fn test_with(ctx: &mut PrimitiveContext, test: fn(&str, &str) -> bool) -> EvalResult {
    let arg = ctx.str_arg(0)?;
    bool_value(test(&content(ctx), &arg))
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
        None => String::new(),
    }
}

fn swapcase(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_uppercase() { c.to_ascii_lowercase() } else { c.to_ascii_uppercase() })
        .collect()
}

fn chomp(s: &str) -> String {
    s.strip_suffix("\r\n")
        .or_else(|| s.strip_suffix('\n'))
        .or_else(|| s.strip_suffix('\r'))
        .unwrap_or(s)
        .to_owned()
}

fn chop(s: &str) -> String {
    if let Some(rest) = s.strip_suffix("\r\n") {
        return rest.to_owned();
    }
    let mut chars = s.chars();
    chars.next_back();
    chars.as_str().to_owned()
}

// ── Comparison and building ───────────────────────────────────

fn equal(ctx: &mut PrimitiveContext) -> EvalResult {
    let other = ctx.state.string_content(ctx.arg(0));
    bool_value(other.is_some_and(|other| Some(other) == ctx.state.string_content(ctx.receiver)))
}

fn spaceship(ctx: &mut PrimitiveContext) -> EvalResult {
    let Some(other) = ctx.state.string_content(ctx.arg(0)) else {
        return Ok(RawValue::Nil);
    };
    let own = ctx.state.string_content(ctx.receiver).unwrap_or_default();
    Ok(RawValue::Fixnum(own.cmp(other) as i64))
}

fn concat_new(ctx: &mut PrimitiveContext) -> EvalResult {
    let other = ctx.str_arg(0)?;
    let text = content(ctx) + &other;
    ctx.string(&text)
}

fn repeat(ctx: &mut PrimitiveContext) -> EvalResult {
    let count = ctx.int_arg(0)?;
    let Ok(count) = usize::try_from(count) else {
        return Err(ctx.state.argument_error("negative argument"));
    };
    let text = content(ctx).repeat(count);
    ctx.string(&text)
}

fn append(ctx: &mut PrimitiveContext) -> EvalResult {
    let addition = match ctx.arg(0) {
        RawValue::Fixnum(n) => match u32::try_from(n).ok().and_then(char::from_u32) {
            Some(c) => c.to_string(),
            None => return Err(ctx.state.argument_error(format!("{n} out of char range"))),
        },
        _ => ctx.str_arg(0)?,
    };
    let text = content(ctx) + &addition;
    set_content(ctx, text);
    Ok(ctx.receiver)
}

fn replace(ctx: &mut PrimitiveContext) -> EvalResult {
    let text = ctx.str_arg(0)?;
    set_content(ctx, text);
    Ok(ctx.receiver)
}

fn length(ctx: &mut PrimitiveContext) -> EvalResult {
    Ok(RawValue::Fixnum(content(ctx).chars().count() as i64))
}

// ── Searching and slicing ─────────────────────────────────────

fn index(ctx: &mut PrimitiveContext) -> EvalResult {
    let needle = ctx.str_arg(0)?;
    let haystack = content(ctx);
    Ok(match haystack.find(&needle) {
        Some(byte) => RawValue::Fixnum(haystack[..byte].chars().count() as i64),
        None => RawValue::Nil,
    })
}

fn slice(ctx: &mut PrimitiveContext) -> EvalResult {
    let text = content(ctx);
    if let Some(needle) = ctx.state.string_content(ctx.arg(0)) {
        return Ok(if text.contains(needle) {
            let needle = needle.to_owned();
            ctx.state.new_string(&needle)
        } else {
            RawValue::Nil
        });
    }
    let chars: Vec<char> = text.chars().collect();
    let start = ctx.int_arg(0)?;
    let start = if start < 0 { chars.len() as i64 + start } else { start };
    let single = ctx.arguments.len() == 1;
    let count = if single { 1 } else { ctx.int_arg(1)? };
    if start < 0 || start as usize > chars.len() || count < 0 || (single && start as usize == chars.len()) {
        return Ok(RawValue::Nil);
    }
    let start = start as usize;
    let end = start.saturating_add(count as usize).min(chars.len());
    let piece: String = chars[start..end].iter().collect();
    ctx.string(&piece)
}

fn split(ctx: &mut PrimitiveContext) -> EvalResult {
    let text = content(ctx);
    let separator = match ctx.arg(0) {
        RawValue::Nil => None,
        _ => Some(ctx.str_arg(0)?),
    };
    let mut parts: Vec<String> = match separator.as_deref() {
        None | Some(" ") => text.split_whitespace().map(str::to_owned).collect(),
        Some("") => text.chars().map(String::from).collect(),
        Some(separator) => text.split(separator).map(str::to_owned).collect(),
    };
    while parts.last().is_some_and(String::is_empty) {
        parts.pop();
    }
    let values = parts.iter().map(|part| ctx.state.new_string(part)).collect();
    Ok(ctx.state.new_array(values))
}

fn lines(ctx: &mut PrimitiveContext) -> EvalResult {
    let text = content(ctx);
    let values = text.split_inclusive('\n').map(|line| ctx.state.new_string(line)).collect();
    Ok(ctx.state.new_array(values))
}

fn chars(ctx: &mut PrimitiveContext) -> EvalResult {
    let text = content(ctx);
    let values = text
        .chars()
        .map(|c| ctx.state.new_string(c.encode_utf8(&mut [0; 4])))
        .collect();
    Ok(ctx.state.new_array(values))
}

fn bytes(ctx: &mut PrimitiveContext) -> EvalResult {
    let values = content(ctx).bytes().map(|b| RawValue::Fixnum(i64::from(b))).collect();
    Ok(ctx.state.new_array(values))
}

fn each_char(ctx: &mut PrimitiveContext) -> EvalResult {
    let text = content(ctx);
    for c in text.chars() {
        let value = ctx.state.new_string(c.encode_utf8(&mut [0; 4]));
        ctx.yield_values(vec![value])?;
    }
    Ok(ctx.receiver)
}

fn ord(ctx: &mut PrimitiveContext) -> EvalResult {
    match content(ctx).chars().next() {
        Some(c) => Ok(RawValue::Fixnum(i64::from(u32::from(c)))),
        None => Err(ctx.state.argument_error("empty string")),
    }
}

/// `sub`/`gsub` with a literal pattern and either a replacement string or
/// a block computing one from the match.
fn substitute(ctx: &mut PrimitiveContext, global: bool) -> EvalResult {
    let pattern = ctx.str_arg(0)?;
    let replacement = match (ctx.arguments.len(), ctx.block) {
        (2, _) => Some(ctx.str_arg(1)?),
        (_, Some(_)) => None,
        _ => return Err(ctx.state.argument_error("wrong number of arguments (given 1, expected 2)")),
    };
    let text = content(ctx);
    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_str();
    while let Some(at) = rest.find(&pattern).filter(|_| !pattern.is_empty()) {
        out.push_str(&rest[..at]);
        match &replacement {
            Some(replacement) => out.push_str(replacement),
            None => {
                let matched = ctx.state.new_string(&pattern);
                let result = ctx.yield_values(vec![matched])?;
                out.push_str(&ctx.state.stringify(result)?);
            }
        }
        rest = &rest[at + pattern.len()..];
        if !global {
            break;
        }
    }
    out.push_str(rest);
    ctx.string(&out)
}

enum Justify {
    Left,
    Right,
    Center,
}

fn justify(ctx: &mut PrimitiveContext, how: Justify) -> EvalResult {
    let width = ctx.int_arg(0)?.max(0) as usize;
    let pad = match ctx.arg(1) {
        RawValue::Nil => " ".to_owned(),
        _ => ctx.str_arg(1)?,
    };
    if pad.is_empty() {
        return Err(ctx.state.argument_error("zero width padding"));
    }
    let text = content(ctx);
    let len = text.chars().count();
    if width <= len {
        return ctx.string(&text);
    }
    let fill = |n: usize| pad.chars().cycle().take(n).collect::<String>();
    let total = width - len;
    let padded = match how {
        Justify::Left => text + &fill(total),
        Justify::Right => fill(total) + &text,
        Justify::Center => {
            let left = total / 2;
            fill(left) + &text + &fill(total - left)
        }
    };
    ctx.string(&padded)
}

// ── Conversion ────────────────────────────────────────────────

fn to_sym(ctx: &mut PrimitiveContext) -> EvalResult {
    let text = content(ctx);
    Ok(ctx.state.symbol_value(&text))
}

fn to_i(ctx: &mut PrimitiveContext) -> EvalResult {
    let radix = match ctx.arg(0) {
        RawValue::Nil => 10,
        _ => ctx.int_arg(0)?,
    };
    if !(2..=36).contains(&radix) {
        return Err(ctx.state.argument_error(format!("invalid radix {radix}")));
    }
    Ok(RawValue::Fixnum(lenient_integer(&content(ctx), radix as u32)))
}

fn to_f(ctx: &mut PrimitiveContext) -> EvalResult {
    Ok(RawValue::Float(lenient_float(&content(ctx))))
}

// ── Symbol ────────────────────────────────────────────────────

fn symbol_name(ctx: &mut PrimitiveContext) -> Result<std::sync::Arc<str>, Exc> {
    match ctx.receiver {
        RawValue::Symbol(sym) => Ok(ctx.state.sym_name(sym)),
        _ => Err(ctx.state.type_error("not a symbol")),
    }
}

fn symbol_to_s(ctx: &mut PrimitiveContext) -> EvalResult {
    let name = symbol_name(ctx)?;
    ctx.string(&name)
}

fn symbol_length(ctx: &mut PrimitiveContext) -> EvalResult {
    let name = symbol_name(ctx)?;
    Ok(RawValue::Fixnum(name.chars().count() as i64))
}

fn symbol_to_proc(ctx: &mut PrimitiveContext) -> EvalResult {
    match ctx.receiver {
        RawValue::Symbol(sym) => Ok(ctx.state.symbol_proc(sym).into()),
        _ => Err(ctx.state.type_error("not a symbol")),
    }
}

fn symbol_spaceship(ctx: &mut PrimitiveContext) -> EvalResult {
    let RawValue::Symbol(other) = ctx.arg(0) else {
        return Ok(RawValue::Nil);
    };
    let own = symbol_name(ctx)?;
    let other = ctx.state.sym_name(other);
    Ok(RawValue::Fixnum(own.cmp(&other) as i64))
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
    fn integer_literals() {
        assert_eq!(parse_integer_literal("42"), Some(42));
        assert_eq!(parse_integer_literal("-0x1F"), Some(-31));
        assert_eq!(parse_integer_literal("0b101"), Some(5));
        assert_eq!(parse_integer_literal("0o17"), Some(15));
        assert_eq!(parse_integer_literal("017"), Some(15));
        assert_eq!(parse_integer_literal("1_000"), Some(1000));
        assert_eq!(parse_integer_literal("-9223372036854775808"), Some(i64::MIN));
        assert_eq!(parse_integer_literal("9223372036854775808"), None);
        assert_eq!(parse_integer_literal("12abc"), None);
        assert_eq!(parse_integer_literal("1__0"), None);
        assert_eq!(parse_integer_literal(""), None);
        assert_eq!(parse_integer_literal("0"), Some(0));
        assert_eq!(parse_integer_literal("0x+5"), None);
        assert_eq!(parse_integer_literal("0b+1"), None);
        assert_eq!(parse_integer_literal("-+5"), None);
        assert_eq!(parse_integer_literal("+-5"), None);
        assert_eq!(parse_integer_literal(" 7 "), None);
        assert_eq!(parse_integer_literal("+7"), Some(7));
    }

    #[test]
    fn lenient_conversions() {
        assert_eq!(lenient_integer("  12abc", 10), 12);
        assert_eq!(lenient_integer("ff", 16), 255);
        assert_eq!(lenient_integer("abc", 10), 0);
        assert_eq!(lenient_float("1.5e2x"), 150.0);
        assert_eq!(lenient_float("3."), 3.0);
        assert_eq!(lenient_float("nope"), 0.0);
    }

    #[test]
    fn building_and_mutation() {
        assert_eq!(eval_inspect("s = 'ab'\ns << 'c' << 100\n[s, s + '!', 'x' * 3, s.length]"), "[\"abcd\", \"abcd!\", \"xxx\", 4]");
        assert_eq!(eval_inspect("['a' == 'a', 'a' == :a, 'a' <=> 'b', 'b' < 'a']"), "[true, false, -1, false]");
    }

    #[test]
    fn case_and_whitespace() {
        assert_eq!(
            eval_inspect("['hello'.capitalize, 'MiX'.swapcase, '  x '.strip, \"line\\n\".chomp, 'abc'.reverse]"),
            "[\"Hello\", \"mIx\", \"x\", \"line\", \"cba\"]"
        );
    }

    #[test]
    fn slicing() {
        assert_eq!(eval_inspect("s = 'hello'\n[s[0], s[-1], s[1, 3], s[5], s[9], s['ell'], s['z']]"), "[\"h\", \"o\", \"ell\", nil, nil, \"ell\", nil]");
        assert_eq!(eval_inspect("'a,b,,c,,'.split(',')"), "[\"a\", \"b\", \"\", \"c\"]");
        assert_eq!(eval_inspect("' a  b '.split"), "[\"a\", \"b\"]");
    }

    #[test]
    fn substitution() {
        assert_eq!(eval_inspect("'foo bar foo'.sub('foo', 'baz')"), "\"baz bar foo\"");
        assert_eq!(eval_inspect("'foo bar foo'.gsub('foo', 'baz')"), "\"baz bar baz\"");
        assert_eq!(eval_inspect("'a-b-c'.gsub('-') { |m| m * 2 }"), "\"a--b--c\"");
    }

    #[test]
    fn justification() {
        assert_eq!(eval_inspect("['ab'.center(6, '*'), 'ab'.ljust(4), 'ab'.rjust(4, '0')]"), "[\"**ab**\", \"ab  \", \"00ab\"]");
    }

    #[test]
    fn symbols() {
        assert_eq!(eval_inspect("[:abc.to_s, 'abc'.to_sym, :abc.length, :a <=> :b, :upcase.to_proc.call('x')]"), "[\"abc\", :abc, 3, -1, \"X\"]");
    }
}
