use std::cmp::Ordering;

use super::{PrimitiveContext, PrimitiveMessage, bool_value};
use crate::{Aspec, EvalResult, Exc, RawValue};

pub const ARRAY: &[PrimitiveMessage] = &[
    PrimitiveMessage::new("initialize", Aspec::opt(2), initialize),
    PrimitiveMessage::new("[]", Aspec::arg(1, 1), index),
    PrimitiveMessage::new("slice", Aspec::arg(1, 1), index),
    PrimitiveMessage::new("[]=", Aspec::req(2), index_set),
    PrimitiveMessage::new("at", Aspec::req(1), |ctx| {
        let i = ctx.int_arg(0)?;
        Ok(ctx.state.array_get(ctx.receiver, i))
    }),
    PrimitiveMessage::new("dig", Aspec::req(1).with(Aspec::ANY), dig),
    PrimitiveMessage::new("<<", Aspec::req(1), push),
    PrimitiveMessage::new("push", Aspec::ANY, push),
    PrimitiveMessage::new("append", Aspec::ANY, push),
    PrimitiveMessage::new("pop", Aspec::NONE, |ctx| Ok(modify(ctx, Vec::pop).flatten().unwrap_or_default())),
    PrimitiveMessage::new("shift", Aspec::NONE, shift),
    PrimitiveMessage::new("unshift", Aspec::ANY, unshift),
    PrimitiveMessage::new("prepend", Aspec::ANY, unshift),
    PrimitiveMessage::new("insert", Aspec::req(1).with(Aspec::ANY), insert),
    PrimitiveMessage::new("concat", Aspec::ANY, concat),
    PrimitiveMessage::new("delete", Aspec::req(1), delete),
    PrimitiveMessage::new("delete_at", Aspec::req(1), delete_at),
    PrimitiveMessage::new("clear", Aspec::NONE, |ctx| {
        modify(ctx, Vec::clear);
        Ok(ctx.receiver)
    }),
    PrimitiveMessage::new("replace", Aspec::req(1), replace),
    PrimitiveMessage::new("length", Aspec::NONE, length),
    PrimitiveMessage::new("size", Aspec::NONE, length),
    PrimitiveMessage::new("empty?", Aspec::NONE, |ctx| bool_value(items(ctx).is_empty())),
    PrimitiveMessage::new("first", Aspec::opt(1), |ctx| take_end(ctx, true)),
    PrimitiveMessage::new("last", Aspec::opt(1), |ctx| take_end(ctx, false)),
    PrimitiveMessage::new("==", Aspec::req(1), equal),
    PrimitiveMessage::new("eql?", Aspec::req(1), equal),
    PrimitiveMessage::new("<=>", Aspec::req(1), spaceship),
    PrimitiveMessage::new("+", Aspec::req(1), plus),
    PrimitiveMessage::new("-", Aspec::req(1), minus),
    PrimitiveMessage::new("*", Aspec::req(1), times),
    PrimitiveMessage::new("&", Aspec::req(1), intersection),
    PrimitiveMessage::new("|", Aspec::req(1), union),
    PrimitiveMessage::new("include?", Aspec::req(1), include),
    PrimitiveMessage::new("member?", Aspec::req(1), include),
    PrimitiveMessage::new("index", Aspec::opt(1), find_index),
    PrimitiveMessage::new("find_index", Aspec::opt(1), find_index),
    PrimitiveMessage::new("count", Aspec::opt(1), count),
    PrimitiveMessage::new("join", Aspec::opt(1), join),
    PrimitiveMessage::new("to_s", Aspec::NONE, inspect),
    PrimitiveMessage::new("inspect", Aspec::NONE, inspect),
    PrimitiveMessage::new("to_a", Aspec::NONE, |ctx| Ok(ctx.receiver)),
    PrimitiveMessage::new("entries", Aspec::NONE, |ctx| Ok(ctx.receiver)),
    PrimitiveMessage::new("to_h", Aspec::NONE, to_h),
    PrimitiveMessage::new("reverse", Aspec::NONE, |ctx| rebuild(ctx, |mut v| {
        v.reverse();
        v
    })),
    PrimitiveMessage::new("compact", Aspec::NONE, |ctx| rebuild(ctx, |mut v| {
        v.retain(|item| !item.is_nil());
        v
    })),
    PrimitiveMessage::new("flatten", Aspec::opt(1), flatten),
    PrimitiveMessage::new("uniq", Aspec::NONE, uniq),
    PrimitiveMessage::new("rotate", Aspec::opt(1), rotate),
    PrimitiveMessage::new("take", Aspec::req(1), |ctx| slice_by_count(ctx, true)),
    PrimitiveMessage::new("drop", Aspec::req(1), |ctx| slice_by_count(ctx, false)),
    PrimitiveMessage::new("sort", Aspec::NONE, sort),
    PrimitiveMessage::new("sort_by", Aspec::BLOCK, sort_by),
    PrimitiveMessage::new("min", Aspec::NONE, |ctx| extreme(ctx, Ordering::Less)),
    PrimitiveMessage::new("max", Aspec::NONE, |ctx| extreme(ctx, Ordering::Greater)),
    PrimitiveMessage::new("sum", Aspec::opt(1), sum),
    // Iteration
    PrimitiveMessage::new("each", Aspec::BLOCK, each),
    PrimitiveMessage::new("each_with_index", Aspec::BLOCK, each_with_index),
    PrimitiveMessage::new("each_index", Aspec::BLOCK, each_index),
    PrimitiveMessage::new("reverse_each", Aspec::BLOCK, reverse_each),
    PrimitiveMessage::new("map", Aspec::BLOCK, map),
    PrimitiveMessage::new("collect", Aspec::BLOCK, map),
    PrimitiveMessage::new("flat_map", Aspec::BLOCK, flat_map),
    PrimitiveMessage::new("map!", Aspec::BLOCK, map_in_place),
    PrimitiveMessage::new("each_with_object", Aspec::req(1).with(Aspec::BLOCK), each_with_object),
    PrimitiveMessage::new("select", Aspec::BLOCK, |ctx| filter(ctx, true)),
    PrimitiveMessage::new("filter", Aspec::BLOCK, |ctx| filter(ctx, true)),
    PrimitiveMessage::new("reject", Aspec::BLOCK, |ctx| filter(ctx, false)),
    PrimitiveMessage::new("partition", Aspec::BLOCK, partition),
    PrimitiveMessage::new("group_by", Aspec::BLOCK, group_by),
    PrimitiveMessage::new("find", Aspec::BLOCK, find),
    PrimitiveMessage::new("detect", Aspec::BLOCK, find),
    PrimitiveMessage::new("any?", Aspec::NONE, |ctx| quantify(ctx, Quantifier::Any)),
    PrimitiveMessage::new("all?", Aspec::NONE, |ctx| quantify(ctx, Quantifier::All)),
    PrimitiveMessage::new("none?", Aspec::NONE, |ctx| quantify(ctx, Quantifier::None)),
    PrimitiveMessage::new("inject", Aspec::opt(2), inject),
    PrimitiveMessage::new("reduce", Aspec::opt(2), inject),
    PrimitiveMessage::new("zip", Aspec::ANY, zip),
    PrimitiveMessage::new("each_slice", Aspec::req(1).with(Aspec::BLOCK), each_slice),
];

fn items(ctx: &PrimitiveContext) -> Vec<RawValue> {
    ctx.state.array_items(ctx.receiver).cloned().unwrap_or_default()
}

/// Applies `f` to the receiver's storage. `None` when the receiver is not
/// an array.
fn modify<T>(ctx: &mut PrimitiveContext, f: impl FnOnce(&mut Vec<RawValue>) -> T) -> Option<T> {
    ctx.state.array_items_mut(ctx.receiver).map(f)
}

fn rebuild(ctx: &mut PrimitiveContext, f: fn(Vec<RawValue>) -> Vec<RawValue>) -> EvalResult {
    let result = f(items(ctx));
    Ok(ctx.state.new_array(result))
}

fn array_arg(ctx: &mut PrimitiveContext, index: usize) -> Result<Vec<RawValue>, Exc> {
    let value = ctx.arg(index);
    match ctx.state.array_items(value) {
        Some(items) => Ok(items.clone()),
        None => {
            let class = ctx.state.class_name(ctx.state.real_class(value));
            Err(ctx.state.type_error(format!("no implicit conversion of {class} into Array")))
        }
    }
}

/// Resolves a possibly negative index against `len`.
fn normalize(index: i64, len: usize) -> Option<usize> {
    let index = if index < 0 { len as i64 + index } else { index };
    usize::try_from(index).ok()
}

fn contains(ctx: &mut PrimitiveContext, haystack: &[RawValue], needle: RawValue) -> Result<bool, Exc> {
    for &item in haystack {
        if ctx.state.values_equal(item, needle)? {
            return Ok(true);
        }
    }
    Ok(false)
}

// ── Construction and access ───────────────────────────────────

fn initialize(ctx: &mut PrimitiveContext) -> EvalResult {
    let size = match ctx.arg(0) {
        RawValue::Nil => 0,
        _ => ctx.int_arg(0)?,
    };
    let Ok(size) = usize::try_from(size) else {
        return Err(ctx.state.argument_error("negative array size"));
    };
    let fill = ctx.arg(1);
    let mut values = Vec::with_capacity(size);
    for i in 0..size {
        values.push(match ctx.block {
            Some(_) => ctx.yield_values(vec![RawValue::Fixnum(i as i64)])?,
            None => fill,
        });
    }
    modify(ctx, |storage| *storage = values);
    Ok(ctx.receiver)
}

fn index(ctx: &mut PrimitiveContext) -> EvalResult {
    let start = ctx.int_arg(0)?;
    if ctx.arguments.len() == 1 {
        return Ok(ctx.state.array_get(ctx.receiver, start));
    }
    let count = ctx.int_arg(1)?;
    let all = items(ctx);
    match normalize(start, all.len()) {
        Some(start) if start <= all.len() && count >= 0 => {
            let end = start.saturating_add(count as usize).min(all.len());
            let piece = all[start..end].to_vec();
            Ok(ctx.state.new_array(piece))
        }
        _ => Ok(RawValue::Nil),
    }
}

fn index_set(ctx: &mut PrimitiveContext) -> EvalResult {
    let raw = ctx.int_arg(0)?;
    let value = ctx.arg(1);
    let len = items(ctx).len();
    let Some(i) = normalize(raw, len) else {
        let class = ctx.state.core.index_error;
        return Err(ctx.state.error(class, format!("index {raw} too small for array; minimum: -{len}")));
    };
    modify(ctx, |storage| {
        if i >= storage.len() {
            storage.resize(i + 1, RawValue::Nil);
        }
        storage[i] = value;
    });
    Ok(value)
}

fn dig(ctx: &mut PrimitiveContext) -> EvalResult {
    let first = ctx.int_arg(0)?;
    let value = ctx.state.array_get(ctx.receiver, first);
    let rest = ctx.arguments[1..].to_vec();
    if rest.is_empty() || value.is_nil() {
        return Ok(value);
    }
    ctx.send(value, "dig", rest)
}

fn push(ctx: &mut PrimitiveContext) -> EvalResult {
    let added = ctx.arguments.clone();
    modify(ctx, |storage| storage.extend(added));
    Ok(ctx.receiver)
}

fn shift(ctx: &mut PrimitiveContext) -> EvalResult {
    let first = modify(ctx, |storage| (!storage.is_empty()).then(|| storage.remove(0)));
    Ok(first.flatten().unwrap_or_default())
}

fn unshift(ctx: &mut PrimitiveContext) -> EvalResult {
    let added = ctx.arguments.clone();
    modify(ctx, |storage| {
        storage.splice(0..0, added);
    });
    Ok(ctx.receiver)
}

fn insert(ctx: &mut PrimitiveContext) -> EvalResult {
    let raw = ctx.int_arg(0)?;
    let added = ctx.arguments[1..].to_vec();
    let len = items(ctx).len();
    // Negative positions count from after the last element.
    let position = if raw < 0 { normalize(raw + 1, len) } else { normalize(raw, len) };
    let Some(position) = position else {
        let class = ctx.state.core.index_error;
        return Err(ctx.state.error(class, format!("index {raw} too small for array; minimum: -{}", len + 1)));
    };
    modify(ctx, |storage| {
        if position > storage.len() {
            storage.resize(position, RawValue::Nil);
        }
        storage.splice(position..position, added);
    });
    Ok(ctx.receiver)
}

fn concat(ctx: &mut PrimitiveContext) -> EvalResult {
    let mut added = Vec::new();
    for i in 0..ctx.arguments.len() {
        added.extend(array_arg(ctx, i)?);
    }
    modify(ctx, |storage| storage.extend(added));
    Ok(ctx.receiver)
}

fn delete(ctx: &mut PrimitiveContext) -> EvalResult {
    let needle = ctx.arg(0);
    let mut kept = Vec::new();
    let mut found = false;
    for item in items(ctx) {
        if ctx.state.values_equal(item, needle)? {
            found = true;
        } else {
            kept.push(item);
        }
    }
    modify(ctx, |storage| *storage = kept);
    Ok(if found { needle } else { RawValue::Nil })
}

fn delete_at(ctx: &mut PrimitiveContext) -> EvalResult {
    let raw = ctx.int_arg(0)?;
    let removed = modify(ctx, |storage| {
        normalize(raw, storage.len())
            .filter(|&i| i < storage.len())
            .map(|i| storage.remove(i))
    });
    Ok(removed.flatten().unwrap_or_default())
}

fn replace(ctx: &mut PrimitiveContext) -> EvalResult {
    let values = array_arg(ctx, 0)?;
    modify(ctx, |storage| *storage = values);
    Ok(ctx.receiver)
}

fn length(ctx: &mut PrimitiveContext) -> EvalResult {
    Ok(RawValue::Fixnum(items(ctx).len() as i64))
}

fn take_end(ctx: &mut PrimitiveContext, front: bool) -> EvalResult {
    let all = items(ctx);
    if ctx.arg(0).is_nil() {
        let item = if front { all.first() } else { all.last() };
        return Ok(item.copied().unwrap_or_default());
    }
    let n = ctx.int_arg(0)?;
    let Ok(n) = usize::try_from(n) else {
        return Err(ctx.state.argument_error("negative array size"));
    };
    let n = n.min(all.len());
    let piece = if front { all[..n].to_vec() } else { all[all.len() - n..].to_vec() };
    Ok(ctx.state.new_array(piece))
}

fn slice_by_count(ctx: &mut PrimitiveContext, take: bool) -> EvalResult {
    let n = ctx.int_arg(0)?;
    let Ok(n) = usize::try_from(n) else {
        let what = if take { "take" } else { "drop" };
        return Err(ctx.state.argument_error(format!("attempt to {what} negative size")));
    };
    let all = items(ctx);
    let n = n.min(all.len());
    let piece = if take { all[..n].to_vec() } else { all[n..].to_vec() };
    Ok(ctx.state.new_array(piece))
}

// ── Comparison and set operations ─────────────────────────────

fn equal(ctx: &mut PrimitiveContext) -> EvalResult {
    let Some(other) = ctx.state.array_items(ctx.arg(0)).cloned() else {
        return bool_value(false);
    };
    let own = items(ctx);
    if own.len() != other.len() {
        return bool_value(false);
    }
    for (a, b) in own.into_iter().zip(other) {
        if !ctx.state.values_equal(a, b)? {
            return bool_value(false);
        }
    }
    bool_value(true)
}

fn spaceship(ctx: &mut PrimitiveContext) -> EvalResult {
    let Some(other) = ctx.state.array_items(ctx.arg(0)).cloned() else {
        return Ok(RawValue::Nil);
    };
    let own = items(ctx);
    for (&a, &b) in own.iter().zip(&other) {
        match ctx.state.compare(a, b)? {
            Ordering::Equal => continue,
            ordering => return Ok(RawValue::Fixnum(ordering as i64)),
        }
    }
    Ok(RawValue::Fixnum(own.len().cmp(&other.len()) as i64))
}

fn plus(ctx: &mut PrimitiveContext) -> EvalResult {
    let mut all = items(ctx);
    all.extend(array_arg(ctx, 0)?);
    Ok(ctx.state.new_array(all))
}

fn minus(ctx: &mut PrimitiveContext) -> EvalResult {
    let removed = array_arg(ctx, 0)?;
    let mut kept = Vec::new();
    for item in items(ctx) {
        if !contains(ctx, &removed, item)? {
            kept.push(item);
        }
    }
    Ok(ctx.state.new_array(kept))
}

fn times(ctx: &mut PrimitiveContext) -> EvalResult {
    if let Some(separator) = ctx.state.string_content(ctx.arg(0)) {
        let separator = separator.to_owned();
        let separator = ctx.state.new_string(&separator);
        return ctx.send(ctx.receiver, "join", vec![separator]);
    }
    let n = ctx.int_arg(0)?;
    let Ok(n) = usize::try_from(n) else {
        return Err(ctx.state.argument_error("negative argument"));
    };
    let repeated = items(ctx).repeat(n);
    Ok(ctx.state.new_array(repeated))
}

fn unique(ctx: &mut PrimitiveContext, values: Vec<RawValue>) -> Result<Vec<RawValue>, Exc> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for value in values {
        if seen.insert(ctx.state.hash_key(value)) {
            out.push(value);
        }
    }
    Ok(out)
}

fn uniq(ctx: &mut PrimitiveContext) -> EvalResult {
    let all = items(ctx);
    let unique = unique(ctx, all)?;
    Ok(ctx.state.new_array(unique))
}

fn intersection(ctx: &mut PrimitiveContext) -> EvalResult {
    let other = array_arg(ctx, 0)?;
    let mut common = Vec::new();
    for item in items(ctx) {
        if contains(ctx, &other, item)? {
            common.push(item);
        }
    }
    let common = unique(ctx, common)?;
    Ok(ctx.state.new_array(common))
}

fn union(ctx: &mut PrimitiveContext) -> EvalResult {
    let mut all = items(ctx);
    all.extend(array_arg(ctx, 0)?);
    let all = unique(ctx, all)?;
    Ok(ctx.state.new_array(all))
}

fn include(ctx: &mut PrimitiveContext) -> EvalResult {
    let all = items(ctx);
    let needle = ctx.arg(0);
    let found = contains(ctx, &all, needle)?;
    bool_value(found)
}

fn find_index(ctx: &mut PrimitiveContext) -> EvalResult {
    let by_value = !ctx.arguments.is_empty();
    for (i, item) in items(ctx).into_iter().enumerate() {
        let hit = if by_value {
            ctx.state.values_equal(item, ctx.arg(0))?
        } else {
            ctx.yield_values(vec![item])?.is_truthy()
        };
        if hit {
            return Ok(RawValue::Fixnum(i as i64));
        }
    }
    Ok(RawValue::Nil)
}

fn count(ctx: &mut PrimitiveContext) -> EvalResult {
    let mut n = 0;
    for item in items(ctx) {
        let hit = if !ctx.arguments.is_empty() {
            ctx.state.values_equal(item, ctx.arg(0))?
        } else if ctx.block.is_some() {
            ctx.yield_values(vec![item])?.is_truthy()
        } else {
            true
        };
        n += i64::from(hit);
    }
    Ok(RawValue::Fixnum(n))
}

// ── Rendering and conversion ──────────────────────────────────

fn join_into(ctx: &mut PrimitiveContext, array: RawValue, separator: &str, out: &mut String, depth: usize) -> Result<(), Exc> {
    if depth > 64 {
        return Err(ctx.state.argument_error("recursive array join"));
    }
    let values = ctx.state.array_items(array).cloned().unwrap_or_default();
    for (i, item) in values.into_iter().enumerate() {
        if i > 0 {
            out.push_str(separator);
        }
        if ctx.state.array_items(item).is_some() {
            join_into(ctx, item, separator, out, depth + 1)?;
        } else {
            out.push_str(&ctx.state.stringify(item)?);
        }
    }
    Ok(())
}

fn join(ctx: &mut PrimitiveContext) -> EvalResult {
    let separator = match ctx.arg(0) {
        RawValue::Nil => String::new(),
        _ => ctx.str_arg(0)?,
    };
    let receiver = ctx.receiver;
    let mut out = String::new();
    join_into(ctx, receiver, &separator, &mut out, 0)?;
    ctx.string(&out)
}

fn inspect(ctx: &mut PrimitiveContext) -> EvalResult {
    let text = ctx.state.inspect_array(ctx.receiver)?;
    ctx.string(&text)
}

fn to_h(ctx: &mut PrimitiveContext) -> EvalResult {
    let hash = ctx.state.new_hash();
    for item in items(ctx) {
        let pair = if ctx.block.is_some() { ctx.yield_values(vec![item])? } else { item };
        match ctx.state.array_items(pair).map(Vec::as_slice) {
            Some(&[key, value]) => {
                ctx.state.hash_set(hash, key, value);
            }
            _ => {
                let shown = ctx.state.inspect_value(pair)?;
                return Err(ctx.state.type_error(format!("wrong element type {shown} (expected array of 2 elements)")));
            }
        }
    }
    Ok(hash)
}

fn flatten_into(ctx: &mut PrimitiveContext, values: Vec<RawValue>, depth: Option<i64>, out: &mut Vec<RawValue>) {
    for value in values {
        match ctx.state.array_items(value).cloned() {
            Some(inner) if depth.is_none_or(|d| d > 0) => flatten_into(ctx, inner, depth.map(|d| d - 1), out),
            _ => out.push(value),
        }
    }
}

fn flatten(ctx: &mut PrimitiveContext) -> EvalResult {
    let depth = match ctx.arg(0) {
        RawValue::Nil => None,
        _ => Some(ctx.int_arg(0)?),
    };
    let all = items(ctx);
    let mut out = Vec::new();
    flatten_into(ctx, all, depth, &mut out);
    Ok(ctx.state.new_array(out))
}

fn rotate(ctx: &mut PrimitiveContext) -> EvalResult {
    let by = match ctx.arg(0) {
        RawValue::Nil => 1,
        _ => ctx.int_arg(0)?,
    };
    let mut all = items(ctx);
    if !all.is_empty() {
        let shift = by.rem_euclid(all.len() as i64) as usize;
        all.rotate_left(shift);
    }
    Ok(ctx.state.new_array(all))
}

// ── Ordering ──────────────────────────────────────────────────

/// Merge sort driven by a fallible comparison, so a raising `<=>` or block
/// aborts the sort with its exception.
fn sort_values(
    values: Vec<RawValue>,
    cmp: &mut dyn FnMut(RawValue, RawValue) -> Result<Ordering, Exc>,
) -> Result<Vec<RawValue>, Exc> {
    if values.len() <= 1 {
        return Ok(values);
    }
    let mut left = values;
    let right = left.split_off(left.len() / 2);
    let left = sort_values(left, cmp)?;
    let right = sort_values(right, cmp)?;
    let mut merged = Vec::with_capacity(left.len() + right.len());
    let (mut l, mut r) = (left.into_iter().peekable(), right.into_iter().peekable());
    while let (Some(&a), Some(&b)) = (l.peek(), r.peek()) {
        if cmp(a, b)? == Ordering::Greater {
            merged.push(b);
            r.next();
        } else {
            merged.push(a);
            l.next();
        }
    }
    merged.extend(l);
    merged.extend(r);
    Ok(merged)
}

fn sort(ctx: &mut PrimitiveContext) -> EvalResult {
    let block = ctx.block;
    let state = &mut *ctx.state;
    let sorted = sort_values(items_of(state, ctx.receiver), &mut |a, b| match block {
        Some(block) => match state.call_block(block, vec![a, b], None, None)? {
            RawValue::Fixnum(n) => Ok(n.cmp(&0)),
            _ => Err(state.argument_error("comparison failed")),
        },
        None => state.compare(a, b),
    })?;
    Ok(ctx.state.new_array(sorted))
}

fn items_of(state: &crate::State, array: RawValue) -> Vec<RawValue> {
    state.array_items(array).cloned().unwrap_or_default()
}

fn sort_by(ctx: &mut PrimitiveContext) -> EvalResult {
    let all = items(ctx);
    let mut keyed = Vec::with_capacity(all.len());
    for item in all {
        let key = ctx.yield_values(vec![item])?;
        keyed.push(ctx.state.new_array(vec![key, item]));
    }
    let state = &mut *ctx.state;
    let sorted = sort_values(keyed, &mut |a, b| {
        let (ka, kb) = (state.array_get(a, 0), state.array_get(b, 0));
        state.compare(ka, kb)
    })?;
    let values = sorted.into_iter().map(|pair| ctx.state.array_get(pair, 1)).collect();
    Ok(ctx.state.new_array(values))
}

fn extreme(ctx: &mut PrimitiveContext, wanted: Ordering) -> EvalResult {
    let mut best: Option<RawValue> = None;
    for item in items(ctx) {
        best = Some(match best {
            None => item,
            Some(current) => {
                let ordering = match ctx.block {
                    Some(_) => match ctx.yield_values(vec![item, current])? {
                        RawValue::Fixnum(n) => n.cmp(&0),
                        _ => return Err(ctx.state.argument_error("comparison failed")),
                    },
                    None => ctx.state.compare(item, current)?,
                };
                if ordering == wanted { item } else { current }
            }
        });
    }
    Ok(best.unwrap_or_default())
}

fn sum(ctx: &mut PrimitiveContext) -> EvalResult {
    let mut total = match ctx.arg(0) {
        RawValue::Nil => RawValue::Fixnum(0),
        init => init,
    };
    for item in items(ctx) {
        let item = if ctx.block.is_some() { ctx.yield_values(vec![item])? } else { item };
        total = ctx.send(total, "+", vec![item])?;
    }
    Ok(total)
}

// ── Iteration ─────────────────────────────────────────────────

fn each(ctx: &mut PrimitiveContext) -> EvalResult {
    let arena = ctx.state.arena_save();
    // Re-read the length each step so elements pushed by the block are
    // visited too.
    let mut i = 0;
    while let Some(item) = ctx.state.array_items(ctx.receiver).and_then(|v| v.get(i).copied()) {
        ctx.yield_values(vec![item])?;
        ctx.state.arena_restore(arena);
        i += 1;
    }
    Ok(ctx.receiver)
}

fn each_with_index(ctx: &mut PrimitiveContext) -> EvalResult {
    let arena = ctx.state.arena_save();
    for (i, item) in items(ctx).into_iter().enumerate() {
        ctx.yield_values(vec![item, RawValue::Fixnum(i as i64)])?;
        ctx.state.arena_restore(arena);
    }
    Ok(ctx.receiver)
}

fn each_index(ctx: &mut PrimitiveContext) -> EvalResult {
    for i in 0..items(ctx).len() {
        ctx.yield_values(vec![RawValue::Fixnum(i as i64)])?;
    }
    Ok(ctx.receiver)
}

fn reverse_each(ctx: &mut PrimitiveContext) -> EvalResult {
    for item in items(ctx).into_iter().rev() {
        ctx.yield_values(vec![item])?;
    }
    Ok(ctx.receiver)
}

fn map(ctx: &mut PrimitiveContext) -> EvalResult {
    let mut out = Vec::new();
    for item in items(ctx) {
        out.push(ctx.yield_values(vec![item])?);
    }
    Ok(ctx.state.new_array(out))
}

fn flat_map(ctx: &mut PrimitiveContext) -> EvalResult {
    let mut out = Vec::new();
    for item in items(ctx) {
        let mapped = ctx.yield_values(vec![item])?;
        match ctx.state.array_items(mapped) {
            Some(inner) => out.extend(inner.iter().copied()),
            None => out.push(mapped),
        }
    }
    Ok(ctx.state.new_array(out))
}

fn map_in_place(ctx: &mut PrimitiveContext) -> EvalResult {
    let mut out = Vec::new();
    for item in items(ctx) {
        out.push(ctx.yield_values(vec![item])?);
    }
    modify(ctx, |storage| *storage = out);
    Ok(ctx.receiver)
}

fn each_with_object(ctx: &mut PrimitiveContext) -> EvalResult {
    let memo = ctx.arg(0);
    for item in items(ctx) {
        ctx.yield_values(vec![item, memo])?;
    }
    Ok(memo)
}

fn filter(ctx: &mut PrimitiveContext, keep: bool) -> EvalResult {
    let mut out = Vec::new();
    for item in items(ctx) {
        if ctx.yield_values(vec![item])?.is_truthy() == keep {
            out.push(item);
        }
    }
    Ok(ctx.state.new_array(out))
}

fn partition(ctx: &mut PrimitiveContext) -> EvalResult {
    let (mut yes, mut no) = (Vec::new(), Vec::new());
    for item in items(ctx) {
        if ctx.yield_values(vec![item])?.is_truthy() {
            yes.push(item);
        } else {
            no.push(item);
        }
    }
    let yes = ctx.state.new_array(yes);
    let no = ctx.state.new_array(no);
    Ok(ctx.state.new_array(vec![yes, no]))
}

fn group_by(ctx: &mut PrimitiveContext) -> EvalResult {
    let groups = ctx.state.new_hash();
    for item in items(ctx) {
        let key = ctx.yield_values(vec![item])?;
        match ctx.state.hash_fetch(groups, key) {
            Some(group) => {
                ctx.state.array_push(group, item);
            }
            None => {
                let group = ctx.state.new_array(vec![item]);
                ctx.state.hash_set(groups, key, group);
            }
        }
    }
    Ok(groups)
}

fn find(ctx: &mut PrimitiveContext) -> EvalResult {
    for item in items(ctx) {
        if ctx.yield_values(vec![item])?.is_truthy() {
            return Ok(item);
        }
    }
    Ok(RawValue::Nil)
}

enum Quantifier {
    Any,
    All,
    None,
}

fn quantify(ctx: &mut PrimitiveContext, quantifier: Quantifier) -> EvalResult {
    let mut hits = 0;
    let all = items(ctx);
    for &item in &all {
        let truthy = match ctx.block {
            Some(_) => ctx.yield_values(vec![item])?.is_truthy(),
            None => item.is_truthy(),
        };
        hits += usize::from(truthy);
    }
    bool_value(match quantifier {
        Quantifier::Any => hits > 0,
        Quantifier::All => hits == all.len(),
        Quantifier::None => hits == 0,
    })
}

fn inject(ctx: &mut PrimitiveContext) -> EvalResult {
    let mut all = items(ctx).into_iter();
    // `inject(:+)` and `inject(init, :+)` fold with a method instead of a block.
    let (init, operator) = match (ctx.arguments.as_slice(), ctx.block) {
        (&[RawValue::Symbol(op)], None) => (None, Some(op)),
        (&[init, RawValue::Symbol(op)], _) => (Some(init), Some(op)),
        (&[init], Some(_)) => (Some(init), None),
        ([], Some(_)) => (None, None),
        _ => return Err(ctx.state.argument_error("inject needs a block or an operator")),
    };
    let Some(mut memo) = init.or_else(|| all.next()) else {
        return Ok(RawValue::Nil);
    };
    for item in all {
        memo = match operator {
            Some(op) => ctx.state.send(memo, op, vec![item], None)?,
            None => ctx.yield_values(vec![memo, item])?,
        };
    }
    Ok(memo)
}

fn zip(ctx: &mut PrimitiveContext) -> EvalResult {
    let mut others = Vec::new();
    for i in 0..ctx.arguments.len() {
        others.push(array_arg(ctx, i)?);
    }
    let mut rows = Vec::new();
    for (i, item) in items(ctx).into_iter().enumerate() {
        let mut row = vec![item];
        row.extend(others.iter().map(|other| other.get(i).copied().unwrap_or_default()));
        rows.push(ctx.state.new_array(row));
    }
    Ok(ctx.state.new_array(rows))
}

fn each_slice(ctx: &mut PrimitiveContext) -> EvalResult {
    let size = ctx.int_arg(0)?;
    let Some(size) = usize::try_from(size).ok().filter(|&n| n > 0) else {
        return Err(ctx.state.argument_error("invalid slice size"));
    };
    for chunk in items(ctx).chunks(size) {
        let chunk = ctx.state.new_array(chunk.to_vec());
        ctx.yield_values(vec![chunk])?;
    }
    Ok(RawValue::Nil)
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

    fn eval_error(code: &str) -> String {
        let mut state = State::new();
        state.load_string(code);
        let exc = state.exc.expect("expected an exception");
        let class = state.class_name(state.real_class(exc.into()));
        format!("{class}: {}", state.exception_message(exc))
    }

    #[test]
    fn access() {
        assert_eq!(eval_inspect("a = [1, 2, 3, 4]\n[a[0], a[-1], a[9], a[1, 2], a.first, a.last(2)]"), "[1, 4, nil, [2, 3], 1, [3, 4]]");
        assert_eq!(eval_inspect("a = []\na[2] = :x\na"), "[nil, nil, :x]");
        assert_eq!(eval_inspect("[[1, [2]], 3].dig(0, 1, 0)"), "2");
    }

    #[test]
    fn mutation() {
        assert_eq!(
            eval_inspect("a = [1]\na << 2\na.push(3, 4)\na.unshift(0)\n[a.pop, a.shift, a]"),
            "[4, 0, [1, 2, 3]]"
        );
        assert_eq!(eval_inspect("a = [1, 2, 1, 3]\na.delete(1)\na.insert(1, :x)\na"), "[2, :x, 3]");
    }

    #[test]
    fn set_operations() {
        assert_eq!(eval_inspect("[[1, 2] + [3], [1, 2, 2, 3] - [2], [1, 1, 2].uniq, [1, 2] & [2, 3], [1] | [1, 2]]"), "[[1, 2, 3], [1, 3], [1, 2], [2], [1, 2]]");
        assert_eq!(eval_inspect("[[1, 2] == [1, 2], [1, 2] == [2, 1], [1, 2] <=> [1, 3]]"), "[true, false, -1]");
    }

    #[test]
    fn iteration() {
        assert_eq!(eval_inspect("sum = 0\n[1, 2, 3].each { |x| sum += x }\nsum"), "6");
        assert_eq!(eval_inspect("[1, 2, 3].map { |x| x * 2 }"), "[2, 4, 6]");
        assert_eq!(eval_inspect("[1, 2, 3, 4].select(&:even?)"), "[2, 4]");
        assert_eq!(eval_inspect("[[1, :a], [2, :b]].map { |n, s| s }"), "[:a, :b]");
        assert_eq!(eval_inspect("r = []\n[:a, :b].each_with_index { |x, i| r << i }\nr"), "[0, 1]");
        assert_eq!(eval_inspect("[1, 2, 3].inject(:+)"), "6");
        assert_eq!(eval_inspect("[1, 2, 3].reduce(10) { |m, x| m + x }"), "16");
        assert_eq!(eval_inspect("[1, 2, 3].find { |x| x > 1 }"), "2");
        assert_eq!(eval_inspect("[[1, 2, 3].any? { |x| x > 2 }, [].all?, [nil].none?]"), "[true, true, true]");
    }

    #[test]
    fn break_out_of_each() {
        assert_eq!(eval_inspect("[1, 2, 3].each { |x| break x * 10 if x == 2 }"), "20");
    }

    #[test]
    fn ordering() {
        assert_eq!(eval_inspect("[3, 1, 2].sort"), "[1, 2, 3]");
        assert_eq!(eval_inspect("[3, 1, 2].sort { |a, b| b <=> a }"), "[3, 2, 1]");
        assert_eq!(eval_inspect("['ccc', 'a', 'bb'].sort_by(&:length)"), "[\"a\", \"bb\", \"ccc\"]");
        assert_eq!(eval_inspect("[[3, 1, 2].min, [3, 1, 2].max, [].max, [1, 2.5].sum]"), "[1, 3, nil, 3.5]");
        assert_eq!(eval_error("[1, 'a'].sort"), "ArgumentError: comparison of Integer with \"a\" failed");
    }

    #[test]
    fn conversion() {
        assert_eq!(eval_inspect("[1, [2, [3]]].flatten"), "[1, 2, 3]");
        assert_eq!(eval_inspect("[1, [2, [3]]].flatten(1)"), "[1, 2, [3]]");
        assert_eq!(eval_inspect("[1, [2, 3]].join('-')"), "\"1-2-3\"");
        assert_eq!(eval_inspect("[[:a, 1]].to_h"), "{:a=>1}");
        assert_eq!(eval_inspect("Array.new(3) { |i| i * i }"), "[0, 1, 4]");
        assert_eq!(eval_inspect("Array.new(2, :x)"), "[:x, :x]");
    }
}
