use super::{PrimitiveContext, PrimitiveMessage, bool_value};
use crate::{Aspec, EvalResult, Exc, RawValue};

pub const HASH: &[PrimitiveMessage] = &[
    PrimitiveMessage::new("initialize", Aspec::opt(1), initialize),
    PrimitiveMessage::new("[]", Aspec::req(1), |ctx| Ok(ctx.state.hash_get(ctx.receiver, ctx.arg(0)))),
    PrimitiveMessage::new("[]=", Aspec::req(2), store),
    PrimitiveMessage::new("store", Aspec::req(2), store),
    PrimitiveMessage::new("fetch", Aspec::arg(1, 1), fetch),
    PrimitiveMessage::new("dig", Aspec::req(1).with(Aspec::ANY), dig),
    PrimitiveMessage::new("key?", Aspec::req(1), has_key),
    PrimitiveMessage::new("has_key?", Aspec::req(1), has_key),
    PrimitiveMessage::new("include?", Aspec::req(1), has_key),
    PrimitiveMessage::new("member?", Aspec::req(1), has_key),
    PrimitiveMessage::new("value?", Aspec::req(1), has_value),
    PrimitiveMessage::new("has_value?", Aspec::req(1), has_value),
    PrimitiveMessage::new("key", Aspec::req(1), key_of),
    PrimitiveMessage::new("delete", Aspec::req(1), delete),
    PrimitiveMessage::new("keys", Aspec::NONE, |ctx| Ok(ctx.state.hash_keys(ctx.receiver))),
    PrimitiveMessage::new("values", Aspec::NONE, values),
    PrimitiveMessage::new("length", Aspec::NONE, length),
    PrimitiveMessage::new("size", Aspec::NONE, length),
    PrimitiveMessage::new("count", Aspec::NONE, length),
    PrimitiveMessage::new("empty?", Aspec::NONE, |ctx| bool_value(entries(ctx).is_empty())),
    PrimitiveMessage::new("clear", Aspec::NONE, clear),
    PrimitiveMessage::new("default", Aspec::NONE, |ctx| {
        Ok(ctx.state.hash_table(ctx.receiver).map(|table| table.default).unwrap_or_default())
    }),
    PrimitiveMessage::new("default=", Aspec::req(1), set_default),
    PrimitiveMessage::new("to_a", Aspec::NONE, to_a),
    PrimitiveMessage::new("to_h", Aspec::NONE, |ctx| Ok(ctx.receiver)),
    PrimitiveMessage::new("to_s", Aspec::NONE, inspect),
    PrimitiveMessage::new("inspect", Aspec::NONE, inspect),
    PrimitiveMessage::new("==", Aspec::req(1), equal),
    PrimitiveMessage::new("merge", Aspec::ANY, merge),
    PrimitiveMessage::new("update", Aspec::ANY, update),
    PrimitiveMessage::new("merge!", Aspec::ANY, update),
    PrimitiveMessage::new("invert", Aspec::NONE, invert),
    PrimitiveMessage::new("first", Aspec::NONE, first),
    // Iteration
    PrimitiveMessage::new("each", Aspec::BLOCK, each),
    PrimitiveMessage::new("each_pair", Aspec::BLOCK, each),
    PrimitiveMessage::new("each_key", Aspec::BLOCK, |ctx| each_part(ctx, true)),
    PrimitiveMessage::new("each_value", Aspec::BLOCK, |ctx| each_part(ctx, false)),
    PrimitiveMessage::new("each_with_index", Aspec::BLOCK, each_with_index),
    PrimitiveMessage::new("map", Aspec::BLOCK, map),
    PrimitiveMessage::new("collect", Aspec::BLOCK, map),
    PrimitiveMessage::new("select", Aspec::BLOCK, |ctx| filter(ctx, true)),
    PrimitiveMessage::new("filter", Aspec::BLOCK, |ctx| filter(ctx, true)),
    PrimitiveMessage::new("reject", Aspec::BLOCK, |ctx| filter(ctx, false)),
    PrimitiveMessage::new("any?", Aspec::NONE, any),
    PrimitiveMessage::new("transform_values", Aspec::BLOCK, |ctx| transform(ctx, false)),
    PrimitiveMessage::new("transform_keys", Aspec::BLOCK, |ctx| transform(ctx, true)),
    PrimitiveMessage::new("sort_by", Aspec::BLOCK, sort_by),
];

fn entries(ctx: &PrimitiveContext) -> Vec<(RawValue, RawValue)> {
    ctx.state
        .hash_table(ctx.receiver)
        .map(|table| table.entries().to_vec())
        .unwrap_or_default()
}

fn hash_arg(ctx: &mut PrimitiveContext, index: usize) -> Result<Vec<(RawValue, RawValue)>, Exc> {
    let value = ctx.arg(index);
    match ctx.state.hash_table(value) {
        Some(table) => Ok(table.entries().to_vec()),
        None => {
            let class = ctx.state.class_name(ctx.state.real_class(value));
            Err(ctx.state.type_error(format!("no implicit conversion of {class} into Hash")))
        }
    }
}

/// Yields one entry. Blocks declaring two parameters receive key and value
/// separately through block argument splatting.
fn yield_pair(ctx: &mut PrimitiveContext, key: RawValue, value: RawValue) -> EvalResult {
    let pair = ctx.state.new_array(vec![key, value]);
    ctx.yield_values(vec![pair])
}

fn initialize(ctx: &mut PrimitiveContext) -> EvalResult {
    let default = ctx.arg(0);
    if let Some(table) = ctx.state.hash_table_mut(ctx.receiver) {
        table.default = default;
    }
    Ok(ctx.receiver)
}

fn store(ctx: &mut PrimitiveContext) -> EvalResult {
    let (key, value) = (ctx.arg(0), ctx.arg(1));
    // String keys are copied so later mutation of the caller's string does
    // not change the key.
    let key = match ctx.state.string_content(key) {
        Some(text) => {
            let text = text.to_owned();
            ctx.state.new_string(&text)
        }
        None => key,
    };
    ctx.state.hash_set(ctx.receiver, key, value);
    Ok(value)
}

fn fetch(ctx: &mut PrimitiveContext) -> EvalResult {
    let key = ctx.arg(0);
    if let Some(value) = ctx.state.hash_fetch(ctx.receiver, key) {
        return Ok(value);
    }
    if ctx.block.is_some() {
        return ctx.yield_values(vec![key]);
    }
    if ctx.arguments.len() == 2 {
        return Ok(ctx.arg(1));
    }
    let shown = ctx.state.inspect_value(key)?;
    let class = ctx.state.core.key_error;
    Err(ctx.state.error(class, format!("key not found: {shown}")))
}

fn dig(ctx: &mut PrimitiveContext) -> EvalResult {
    let value = ctx.state.hash_get(ctx.receiver, ctx.arg(0));
    let rest = ctx.arguments[1..].to_vec();
    if rest.is_empty() || value.is_nil() {
        return Ok(value);
    }
    ctx.send(value, "dig", rest)
}

fn has_key(ctx: &mut PrimitiveContext) -> EvalResult {
    bool_value(ctx.state.hash_fetch(ctx.receiver, ctx.arg(0)).is_some())
}

fn has_value(ctx: &mut PrimitiveContext) -> EvalResult {
    let needle = ctx.arg(0);
    for (_, value) in entries(ctx) {
        if ctx.state.values_equal(value, needle)? {
            return bool_value(true);
        }
    }
    bool_value(false)
}

fn key_of(ctx: &mut PrimitiveContext) -> EvalResult {
    let needle = ctx.arg(0);
    for (key, value) in entries(ctx) {
        if ctx.state.values_equal(value, needle)? {
            return Ok(key);
        }
    }
    Ok(RawValue::Nil)
}

fn delete(ctx: &mut PrimitiveContext) -> EvalResult {
    let key = ctx.arg(0);
    match ctx.state.hash_delete(ctx.receiver, key) {
        Some(value) => Ok(value),
        None if ctx.block.is_some() => ctx.yield_values(vec![key]),
        None => Ok(RawValue::Nil),
    }
}

fn values(ctx: &mut PrimitiveContext) -> EvalResult {
    let values = entries(ctx).into_iter().map(|(_, v)| v).collect();
    Ok(ctx.state.new_array(values))
}

fn length(ctx: &mut PrimitiveContext) -> EvalResult {
    Ok(RawValue::Fixnum(ctx.state.hash_len(ctx.receiver).unwrap_or(0) as i64))
}

fn clear(ctx: &mut PrimitiveContext) -> EvalResult {
    if let Some(table) = ctx.state.hash_table_mut(ctx.receiver) {
        table.clear();
    }
    Ok(ctx.receiver)
}

fn set_default(ctx: &mut PrimitiveContext) -> EvalResult {
    let default = ctx.arg(0);
    if let Some(table) = ctx.state.hash_table_mut(ctx.receiver) {
        table.default = default;
    }
    Ok(default)
}

fn to_a(ctx: &mut PrimitiveContext) -> EvalResult {
    let pairs = entries(ctx)
        .into_iter()
        .map(|(k, v)| ctx.state.new_array(vec![k, v]))
        .collect();
    Ok(ctx.state.new_array(pairs))
}

fn inspect(ctx: &mut PrimitiveContext) -> EvalResult {
    let text = ctx.state.inspect_hash(ctx.receiver)?;
    ctx.string(&text)
}

fn equal(ctx: &mut PrimitiveContext) -> EvalResult {
    let other = ctx.arg(0);
    let Some(other_len) = ctx.state.hash_len(other) else {
        return bool_value(false);
    };
    let own = entries(ctx);
    if own.len() != other_len {
        return bool_value(false);
    }
    for (key, value) in own {
        let Some(theirs) = ctx.state.hash_fetch(other, key) else {
            return bool_value(false);
        };
        if !ctx.state.values_equal(value, theirs)? {
            return bool_value(false);
        }
    }
    bool_value(true)
}

fn merge_into(ctx: &mut PrimitiveContext, target: RawValue) -> Result<(), Exc> {
    for i in 0..ctx.arguments.len() {
        for (key, value) in hash_arg(ctx, i)? {
            let value = match ctx.state.hash_fetch(target, key) {
                Some(old) if ctx.block.is_some() => ctx.yield_values(vec![key, old, value])?,
                _ => value,
            };
            ctx.state.hash_set(target, key, value);
        }
    }
    Ok(())
}

fn merge(ctx: &mut PrimitiveContext) -> EvalResult {
    let merged = ctx.state.new_hash();
    for (key, value) in entries(ctx) {
        ctx.state.hash_set(merged, key, value);
    }
    merge_into(ctx, merged)?;
    Ok(merged)
}

fn update(ctx: &mut PrimitiveContext) -> EvalResult {
    let receiver = ctx.receiver;
    merge_into(ctx, receiver)?;
    Ok(receiver)
}

fn invert(ctx: &mut PrimitiveContext) -> EvalResult {
    let inverted = ctx.state.new_hash();
    for (key, value) in entries(ctx) {
        ctx.state.hash_set(inverted, value, key);
    }
    Ok(inverted)
}

fn first(ctx: &mut PrimitiveContext) -> EvalResult {
    match entries(ctx).first() {
        Some(&(k, v)) => Ok(ctx.state.new_array(vec![k, v])),
        None => Ok(RawValue::Nil),
    }
}

// ── Iteration ─────────────────────────────────────────────────

fn each(ctx: &mut PrimitiveContext) -> EvalResult {
    let arena = ctx.state.arena_save();
    for (key, value) in entries(ctx) {
        yield_pair(ctx, key, value)?;
        ctx.state.arena_restore(arena);
    }
    Ok(ctx.receiver)
}

fn each_part(ctx: &mut PrimitiveContext, keys: bool) -> EvalResult {
    for (key, value) in entries(ctx) {
        ctx.yield_values(vec![if keys { key } else { value }])?;
    }
    Ok(ctx.receiver)
}

fn each_with_index(ctx: &mut PrimitiveContext) -> EvalResult {
    for (i, (key, value)) in entries(ctx).into_iter().enumerate() {
        let pair = ctx.state.new_array(vec![key, value]);
        ctx.yield_values(vec![pair, RawValue::Fixnum(i as i64)])?;
    }
    Ok(ctx.receiver)
}

fn map(ctx: &mut PrimitiveContext) -> EvalResult {
    let mut out = Vec::new();
    for (key, value) in entries(ctx) {
        out.push(yield_pair(ctx, key, value)?);
    }
    Ok(ctx.state.new_array(out))
}

fn filter(ctx: &mut PrimitiveContext, keep: bool) -> EvalResult {
    let result = ctx.state.new_hash();
    for (key, value) in entries(ctx) {
        if yield_pair(ctx, key, value)?.is_truthy() == keep {
            ctx.state.hash_set(result, key, value);
        }
    }
    Ok(result)
}

fn any(ctx: &mut PrimitiveContext) -> EvalResult {
    let all = entries(ctx);
    if ctx.block.is_none() {
        return bool_value(!all.is_empty());
    }
    for (key, value) in all {
        if yield_pair(ctx, key, value)?.is_truthy() {
            return bool_value(true);
        }
    }
    bool_value(false)
}

fn transform(ctx: &mut PrimitiveContext, keys: bool) -> EvalResult {
    let result = ctx.state.new_hash();
    for (key, value) in entries(ctx) {
        if keys {
            let key = ctx.yield_values(vec![key])?;
            ctx.state.hash_set(result, key, value);
        } else {
            let value = ctx.yield_values(vec![value])?;
            ctx.state.hash_set(result, key, value);
        }
    }
    Ok(result)
}

fn sort_by(ctx: &mut PrimitiveContext) -> EvalResult {
    let pairs = to_a(ctx)?;
    let block = ctx.block;
    let mid = ctx.state.intern("sort_by");
    ctx.state.send(pairs, mid, Vec::new(), block)
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
    fn access_and_defaults() {
        assert_eq!(eval_inspect("h = {a: 1}\nh[:b] = 2\n[h[:a], h[:c], h.fetch(:c, 0), h.key?(:b), h.size]"), "[1, nil, 0, true, 2]");
        assert_eq!(eval_inspect("h = Hash.new(0)\n'abca'.each_char { |c| h[c] += 1 }\nh"), "{\"a\"=>2, \"b\"=>1, \"c\"=>1}");
    }

    #[test]
    fn fetch_missing_raises_key_error() {
        let mut state = State::new();
        state.load_string("{}.fetch(:nope)");
        let exc = state.exc.expect("KeyError");
        assert_eq!(state.exception_message(exc), "key not found: :nope");
    }

    #[test]
    fn keeps_insertion_order() {
        assert_eq!(eval_inspect("h = {}\nh[3] = :c\nh[1] = :a\nh[2] = :b\nh.delete(1)\nh[1] = :z\nh.keys"), "[3, 2, 1]");
    }

    #[test]
    fn string_keys_are_copied() {
        assert_eq!(eval_inspect("k = 'a'\nh = {}\nh[k] = 1\nk << 'b'\n[h['a'], h['ab']]"), "[1, nil]");
    }

    #[test]
    fn iteration() {
        assert_eq!(eval_inspect("r = []\n{a: 1, b: 2}.each { |k, v| r << k << v }\nr"), "[:a, 1, :b, 2]");
        assert_eq!(eval_inspect("{a: 1, b: 2}.map { |k, v| v * 10 }"), "[10, 20]");
        assert_eq!(eval_inspect("{a: 1, b: 2}.select { |k, v| v > 1 }"), "{:b=>2}");
        assert_eq!(eval_inspect("{a: 1}.transform_values { |v| v + 1 }"), "{:a=>2}");
        assert_eq!(eval_inspect("{a: 1, b: 1}.merge({b: 2}) { |k, a, b| a + b }"), "{:a=>1, :b=>3}");
        assert_eq!(eval_inspect("{b: 2, a: 1}.sort_by { |k, v| v }"), "[[:a, 1], [:b, 2]]");
    }

    #[test]
    fn equality() {
        assert_eq!(eval_inspect("[{a: 1} == {a: 1}, {a: 1} == {a: 2}, {} == []]"), "[true, false, false]");
    }
}
