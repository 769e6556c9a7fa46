//! Decoding interpreter values into typed host storage.
//!
//! A destination describes where a decoded value goes and what shape it
//! has ([`Destination`]). Every decodable type hands out one through
//! [`Decode`], and the decoder walks the value and the destination
//! together:
//!
//! ```text
//!  Value ──▶ decode_into(Destination) ──▶ bool / integer / float / string
//!                    │
//!                    ├─▶ mapping  ─▶ per entry: key, value (recursive)
//!                    ├─▶ sequence ─▶ per element (recursive)
//!                    ├─▶ optional ─▶ fresh pointee (recursive)
//!                    ├─▶ record   ─▶ per bound field (recursive)
//!                    └─▶ dynamic  ─▶ whatever the slot currently holds
//! ```
//!
//! Failures carry the path of the offending value (`root`, `root.name`,
//! `root[2]`, `root.<entry 0>`). A failed decode leaves the destination
//! untouched.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{BuildHasher, Hash};

use log::trace;
use tether_vm::parse_integer_literal;

use crate::{Value, ValueType};

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// The destination cannot receive a value.
    InvalidDestination,
    /// The value has the wrong type for the destination.
    TypeMismatch,
    /// A string could not be parsed as the destination type.
    ParseFailure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    pub path: String,
    pub message: String,
}

impl DecodeError {
    fn new(kind: DecodeErrorKind, path: &str, message: impl Into<String>) -> Self {
        DecodeError {
            kind,
            path: path.to_owned(),
            message: message.into(),
        }
    }

    fn mismatch(path: &str, expected: &str, value: Value<'_>) -> Self {
        Self::new(
            DecodeErrorKind::TypeMismatch,
            path,
            format!("expected {expected}, got {}", value.ty()),
        )
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

impl std::error::Error for DecodeError {}

// ── Destinations ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationKind {
    Bool,
    Integer,
    Float,
    String,
    Mapping,
    Sequence,
    Optional,
    Record,
    Dynamic,
}

impl fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DestinationKind::Bool => "bool",
            DestinationKind::Integer => "integer",
            DestinationKind::Float => "float",
            DestinationKind::String => "string",
            DestinationKind::Mapping => "mapping",
            DestinationKind::Sequence => "sequence",
            DestinationKind::Optional => "optional",
            DestinationKind::Record => "record",
            DestinationKind::Dynamic => "dynamic",
        };
        f.write_str(name)
    }
}

/// A place to decode into, tagged with its shape.
pub enum Destination<'a> {
    Bool(&'a mut bool),
    Integer(&'a mut dyn IntegerTarget),
    Float(&'a mut dyn FloatTarget),
    String(&'a mut String),
    Mapping(&'a mut dyn MappingTarget),
    Sequence(&'a mut dyn SequenceTarget),
    Optional(&'a mut dyn OptionalTarget),
    Record(&'a mut dyn RecordTarget),
    Dynamic(&'a mut Dynamic),
}

impl Destination<'_> {
    pub fn kind(&self) -> DestinationKind {
        match self {
            Destination::Bool(_) => DestinationKind::Bool,
            Destination::Integer(_) => DestinationKind::Integer,
            Destination::Float(_) => DestinationKind::Float,
            Destination::String(_) => DestinationKind::String,
            Destination::Mapping(_) => DestinationKind::Mapping,
            Destination::Sequence(_) => DestinationKind::Sequence,
            Destination::Optional(_) => DestinationKind::Optional,
            Destination::Record(_) => DestinationKind::Record,
            Destination::Dynamic(_) => DestinationKind::Dynamic,
        }
    }
}

/// Types that interpreter values can be decoded into.
pub trait Decode {
    fn destination(&mut self) -> Destination<'_>;
}

fn kind_of<T: Decode + Default>() -> DestinationKind {
    T::default().destination().kind()
}

pub trait IntegerTarget {
    /// False when `n` does not fit.
    fn assign(&mut self, n: i64) -> bool;
}

pub trait FloatTarget {
    fn assign(&mut self, f: f64);
}

pub trait MappingTarget {
    fn key_kind(&self) -> DestinationKind;
    fn decode_entry(&mut self, path: &str, key: Value<'_>, value: Value<'_>) -> Result<(), DecodeError>;
}

pub trait SequenceTarget {
    fn decode_element(&mut self, path: &str, value: Value<'_>) -> Result<(), DecodeError>;
}

pub trait OptionalTarget {
    /// Decodes into a newly allocated pointee and binds it on success.
    fn decode_fresh(&mut self, path: &str, value: Value<'_>) -> Result<(), DecodeError>;
}

/// Structs declared with [`decode_record!`](crate::decode_record).
pub trait RecordTarget {
    fn field_names(&self) -> &'static [&'static str];
    fn field(&mut self, name: &str) -> Option<Destination<'_>>;
}

// ── Entry point ───────────────────────────────────────────────

/// Decodes `value` into `dest`. On error `dest` keeps its previous value.
pub fn decode<T: Decode + Clone>(dest: &mut T, value: &Value<'_>) -> Result<(), DecodeError> {
    let mut staged = dest.clone();
    decode_into(staged.destination(), "root", *value)?;
    *dest = staged;
    Ok(())
}

fn decode_into(dest: Destination<'_>, path: &str, value: Value<'_>) -> Result<(), DecodeError> {
    trace!("decode {path}: {} into {}", value.ty(), dest.kind());
    match dest {
        Destination::Bool(slot) => match value.as_bool() {
            Some(b) => {
                *slot = b;
                Ok(())
            }
            None => Err(DecodeError::mismatch(path, "true or false", value)),
        },
        Destination::Integer(slot) => decode_integer(slot, path, value),
        Destination::Float(slot) => match value.as_float() {
            Some(f) => {
                slot.assign(f);
                Ok(())
            }
            None => Err(DecodeError::mismatch(path, "float", value)),
        },
        Destination::String(slot) => decode_string(slot, path, value),
        Destination::Mapping(target) => decode_mapping(target, path, value),
        Destination::Sequence(target) => decode_sequence(target, path, value),
        Destination::Optional(target) => target.decode_fresh(path, value),
        Destination::Record(target) => decode_record(target, path, value),
        Destination::Dynamic(slot) => decode_dynamic(slot, path, value),
    }
}

fn decode_integer(slot: &mut dyn IntegerTarget, path: &str, value: Value<'_>) -> Result<(), DecodeError> {
    match value.ty() {
        ValueType::Fixnum => {
            let n = value.as_fixnum().unwrap_or_default();
            if slot.assign(n) {
                Ok(())
            } else {
                Err(DecodeError::new(DecodeErrorKind::TypeMismatch, path, format!("{n} is out of range")))
            }
        }
        ValueType::String => {
            let text = value.as_string().unwrap_or_default();
            match parse_integer_literal(&text) {
                Some(n) if slot.assign(n) => Ok(()),
                Some(n) => Err(DecodeError::new(DecodeErrorKind::ParseFailure, path, format!("{n} is out of range"))),
                None => Err(DecodeError::new(
                    DecodeErrorKind::ParseFailure,
                    path,
                    format!("invalid integer literal {text:?}"),
                )),
            }
        }
        _ => Err(DecodeError::mismatch(path, "fixnum or string", value)),
    }
}

fn decode_string(slot: &mut String, path: &str, value: Value<'_>) -> Result<(), DecodeError> {
    match value.ty() {
        ValueType::String => *slot = value.as_string().unwrap_or_default(),
        ValueType::Fixnum => *slot = value.as_fixnum().unwrap_or_default().to_string(),
        _ => return Err(DecodeError::mismatch(path, "string or fixnum", value)),
    }
    Ok(())
}

fn decode_mapping(target: &mut dyn MappingTarget, path: &str, value: Value<'_>) -> Result<(), DecodeError> {
    let Some(hash) = value.hash() else {
        return Err(DecodeError::mismatch(path, "hash", value));
    };
    if target.key_kind() != DestinationKind::String {
        return Err(DecodeError::new(
            DecodeErrorKind::TypeMismatch,
            path,
            format!("map must have string keys, not {}", target.key_kind()),
        ));
    }
    // The key array is garbage once the entries are decoded.
    let _arena = value.mrb().arena_guard();
    let keys = hash.keys();
    let Some(keys) = keys.array() else {
        return Ok(());
    };
    for (i, key) in keys.iter().enumerate() {
        let entry = hash.get(key);
        target.decode_entry(&format!("{path}.<entry {i}>"), key, entry)?;
    }
    Ok(())
}

fn decode_sequence(target: &mut dyn SequenceTarget, path: &str, value: Value<'_>) -> Result<(), DecodeError> {
    let Some(array) = value.array() else {
        return Err(DecodeError::mismatch(path, "array", value));
    };
    for (i, element) in array.iter().enumerate() {
        target.decode_element(&format!("{path}[{i}]"), element)?;
    }
    Ok(())
}

/// Hash keys bind to field names exactly, then ignoring ASCII case. Keys
/// that name no field are skipped.
fn decode_record(target: &mut dyn RecordTarget, path: &str, value: Value<'_>) -> Result<(), DecodeError> {
    let Some(hash) = value.hash() else {
        return Err(DecodeError::mismatch(path, "hash", value));
    };
    let names = target.field_names();
    let _arena = value.mrb().arena_guard();
    let keys = hash.keys();
    let Some(keys) = keys.array() else {
        return Ok(());
    };
    for key in keys.iter() {
        let Some(key_name) = key.as_string().or_else(|| key.symbol_name()) else {
            continue;
        };
        let bound = names
            .iter()
            .find(|name| **name == key_name)
            .or_else(|| names.iter().find(|name| name.eq_ignore_ascii_case(&key_name)));
        let Some(&field) = bound else {
            trace!("{path}: no field for key {key_name:?}");
            continue;
        };
        let field_path = format!("{path}.{field}");
        let Some(dest) = target.field(field) else {
            return Err(DecodeError::new(DecodeErrorKind::InvalidDestination, &field_path, "field is not bound"));
        };
        decode_into(dest, &field_path, hash.get(key))?;
    }
    Ok(())
}

fn decode_dynamic(slot: &mut Dynamic, path: &str, value: Value<'_>) -> Result<(), DecodeError> {
    let dest = match slot {
        Dynamic::Empty => {
            return Err(DecodeError::new(
                DecodeErrorKind::InvalidDestination,
                path,
                "dynamic destination holds no value to decode by",
            ));
        }
        Dynamic::Bool(b) => Destination::Bool(b),
        Dynamic::Integer(n) => Destination::Integer(n),
        Dynamic::Float(f) => Destination::Float(f),
        Dynamic::String(s) => Destination::String(s),
        Dynamic::Sequence(items) => Destination::Sequence(items),
        Dynamic::Mapping(map) => Destination::Mapping(map),
    };
    decode_into(dest, path, value)
}

// ── Implementations ───────────────────────────────────────────

impl Decode for bool {
    fn destination(&mut self) -> Destination<'_> {
        Destination::Bool(self)
    }
}

impl Decode for String {
    fn destination(&mut self) -> Destination<'_> {
        Destination::String(self)
    }
}

macro_rules! integer_destinations {
    ($($ty:ty),*) => {$(
        impl IntegerTarget for $ty {
            fn assign(&mut self, n: i64) -> bool {
                match <$ty>::try_from(n).ok() {
                    Some(v) => {
                        *self = v;
                        true
                    }
                    None => false,
                }
            }
        }

        impl Decode for $ty {
            fn destination(&mut self) -> Destination<'_> {
                Destination::Integer(self)
            }
        }
    )*};
}

integer_destinations!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl FloatTarget for f64 {
    fn assign(&mut self, f: f64) {
        *self = f;
    }
}

impl FloatTarget for f32 {
    fn assign(&mut self, f: f64) {
        *self = f as f32;
    }
}

impl Decode for f64 {
    fn destination(&mut self) -> Destination<'_> {
        Destination::Float(self)
    }
}

impl Decode for f32 {
    fn destination(&mut self) -> Destination<'_> {
        Destination::Float(self)
    }
}

impl<T: Decode + Default> SequenceTarget for Vec<T> {
    fn decode_element(&mut self, path: &str, value: Value<'_>) -> Result<(), DecodeError> {
        let mut element = T::default();
        decode_into(element.destination(), path, value)?;
        self.push(element);
        Ok(())
    }
}

impl<T: Decode + Default> Decode for Vec<T> {
    fn destination(&mut self) -> Destination<'_> {
        Destination::Sequence(self)
    }
}

fn decode_entry<K: Decode + Default, V: Decode + Default>(
    path: &str,
    key: Value<'_>,
    value: Value<'_>,
) -> Result<(K, V), DecodeError> {
    let mut k = K::default();
    decode_into(k.destination(), path, key)?;
    let mut v = V::default();
    decode_into(v.destination(), path, value)?;
    Ok((k, v))
}

impl<K, V, S> MappingTarget for HashMap<K, V, S>
where
    K: Decode + Default + Eq + Hash,
    V: Decode + Default,
    S: BuildHasher,
{
    fn key_kind(&self) -> DestinationKind {
        kind_of::<K>()
    }

    fn decode_entry(&mut self, path: &str, key: Value<'_>, value: Value<'_>) -> Result<(), DecodeError> {
        let (k, v) = decode_entry::<K, V>(path, key, value)?;
        self.insert(k, v);
        Ok(())
    }
}

impl<K, V, S> Decode for HashMap<K, V, S>
where
    K: Decode + Default + Eq + Hash,
    V: Decode + Default,
    S: BuildHasher,
{
    fn destination(&mut self) -> Destination<'_> {
        Destination::Mapping(self)
    }
}

impl<K: Decode + Default + Ord, V: Decode + Default> MappingTarget for BTreeMap<K, V> {
    fn key_kind(&self) -> DestinationKind {
        kind_of::<K>()
    }

    fn decode_entry(&mut self, path: &str, key: Value<'_>, value: Value<'_>) -> Result<(), DecodeError> {
        let (k, v) = decode_entry::<K, V>(path, key, value)?;
        self.insert(k, v);
        Ok(())
    }
}

impl<K: Decode + Default + Ord, V: Decode + Default> Decode for BTreeMap<K, V> {
    fn destination(&mut self) -> Destination<'_> {
        Destination::Mapping(self)
    }
}

impl<T: Decode + Default> OptionalTarget for Option<T> {
    fn decode_fresh(&mut self, path: &str, value: Value<'_>) -> Result<(), DecodeError> {
        let mut fresh = T::default();
        decode_into(fresh.destination(), path, value)?;
        *self = Some(fresh);
        Ok(())
    }
}

impl<T: Decode + Default> Decode for Option<T> {
    fn destination(&mut self) -> Destination<'_> {
        Destination::Optional(self)
    }
}

impl<T: Decode + Default> OptionalTarget for Box<T> {
    fn decode_fresh(&mut self, path: &str, value: Value<'_>) -> Result<(), DecodeError> {
        let mut fresh = Box::<T>::default();
        decode_into((*fresh).destination(), path, value)?;
        *self = fresh;
        Ok(())
    }
}

impl<T: Decode + Default> Decode for Box<T> {
    fn destination(&mut self) -> Destination<'_> {
        Destination::Optional(self)
    }
}

/// A destination whose shape is chosen at run time by the variant it
/// currently holds.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Dynamic {
    #[default]
    Empty,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Sequence(Vec<Dynamic>),
    Mapping(HashMap<String, Dynamic>),
}

impl Decode for Dynamic {
    fn destination(&mut self) -> Destination<'_> {
        Destination::Dynamic(self)
    }
}

/// Declares a struct that decodes from a hash, binding keys (strings or
/// symbols) to fields by name.
///
/// ```
/// tether::decode_record! {
///     #[derive(Debug, Clone, Default)]
///     pub struct Server {
///         pub host: String,
///         pub port: u16,
///     }
/// }
/// ```
#[macro_export]
macro_rules! decode_record {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $($(#[$field_meta:meta])* $field_vis:vis $field:ident : $ty:ty),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $($(#[$field_meta])* $field_vis $field: $ty),*
        }

        impl $crate::decode::RecordTarget for $name {
            fn field_names(&self) -> &'static [&'static str] {
                &[$(stringify!($field)),*]
            }

            fn field(&mut self, name: &str) -> Option<$crate::Destination<'_>> {
                $(
                    if name == stringify!($field) {
                        return Some($crate::Decode::destination(&mut self.$field));
                    }
                )*
                None
            }
        }

        impl $crate::Decode for $name {
            fn destination(&mut self) -> $crate::Destination<'_> {
                $crate::Destination::Record(self)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use super::*;
    use crate::Mrb;

    fn decoded<T: Decode + Clone + Default>(code: &str) -> Result<T, DecodeError> {
        let mrb = Mrb::open();
        let value = mrb.evaluate(code).unwrap();
        let mut out = T::default();
        decode(&mut out, &value)?;
        Ok(out)
    }

    #[test]
    fn booleans() {
        assert_eq!(decoded::<bool>("true"), Ok(true));
        assert_eq!(decoded::<bool>("false"), Ok(false));
        let err = decoded::<bool>("nil").unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::TypeMismatch);
        assert_eq!(err.to_string(), "root: expected true or false, got nil");
    }

    #[test]
    fn floats_are_single_precision() {
        assert_eq!(decoded::<f64>("1.2"), Ok(1.2000000476837158));
        assert_eq!(decoded::<f32>("1.2"), Ok(1.2));
        assert_eq!(decoded::<f64>("1").unwrap_err().kind, DecodeErrorKind::TypeMismatch);
    }

    #[test]
    fn integers() {
        assert_eq!(decoded::<i64>("42"), Ok(42));
        assert_eq!(decoded::<i32>("-7"), Ok(-7));
        assert_eq!(decoded::<i64>("'0x1F'"), Ok(31));
        assert_eq!(decoded::<i64>("'0b101'"), Ok(5));
        assert_eq!(decoded::<i64>("'0o17'"), Ok(15));
        assert_eq!(decoded::<i64>("'017'"), Ok(15));
        assert_eq!(decoded::<i64>("'-1_000'"), Ok(-1000));

        let err = decoded::<i64>("'12abc'").unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::ParseFailure);
        assert_eq!(err.message, "invalid integer literal \"12abc\"");
        assert_eq!(decoded::<u8>("300").unwrap_err().kind, DecodeErrorKind::TypeMismatch);
        assert_eq!(decoded::<u8>("'300'").unwrap_err().kind, DecodeErrorKind::ParseFailure);
        assert_eq!(decoded::<i64>("1.5").unwrap_err().kind, DecodeErrorKind::TypeMismatch);

        for malformed in ["'0x+5'", "'0b+1'", "'-+5'", "' 7 '"] {
            let err = decoded::<i64>(malformed).unwrap_err();
            assert_eq!(err.kind, DecodeErrorKind::ParseFailure, "{malformed}");
        }
    }

    #[test]
    fn strings() {
        assert_eq!(decoded::<String>("'foo'").as_deref(), Ok("foo"));
        assert_eq!(decoded::<String>("32").as_deref(), Ok("32"));
        let err = decoded::<String>(":sym").unwrap_err();
        assert_eq!(err.to_string(), "root: expected string or fixnum, got symbol");
    }

    #[test]
    fn maps() {
        let map = decoded::<HashMap<String, String>>(r#"{"foo" => "bar"}"#).unwrap();
        assert_eq!(map, HashMap::from([("foo".to_owned(), "bar".to_owned())]));

        let map = decoded::<HashMap<String, String>>(r#"{32 => "bar"}"#).unwrap();
        assert_eq!(map, HashMap::from([("32".to_owned(), "bar".to_owned())]));

        let sorted = decoded::<BTreeMap<String, i64>>(r#"{"b" => 2, "a" => 1}"#).unwrap();
        assert_eq!(sorted.into_iter().collect::<Vec<_>>(), vec![("a".to_owned(), 1), ("b".to_owned(), 2)]);
    }

    #[test]
    fn map_keys_must_be_strings() {
        let err = decoded::<HashMap<i64, String>>(r#"{1 => "a"}"#).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::TypeMismatch);
        assert_eq!(err.message, "map must have string keys, not integer");

        let err = decoded::<HashMap<String, String>>("[1]").unwrap_err();
        assert_eq!(err.message, "expected hash, got array");
    }

    #[test]
    fn maps_keep_existing_entries() {
        let mrb = Mrb::open();
        let value = mrb.evaluate(r#"{"foo" => "bar"}"#).unwrap();
        let mut map = HashMap::from([("keep".to_owned(), "me".to_owned())]);
        decode(&mut map, &value).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["keep"], "me");
    }

    #[test]
    fn sequences() {
        assert_eq!(decoded::<Vec<String>>(r#"["foo", "bar"]"#).unwrap(), vec!["foo", "bar"]);
        assert_eq!(decoded::<Vec<Vec<i64>>>("[[1], [], [2, 3]]").unwrap(), vec![vec![1], vec![], vec![2, 3]]);
        let err = decoded::<Vec<i64>>("[1, 2, nil]").unwrap_err();
        assert_eq!(err.path, "root[2]");
    }

    #[test]
    fn nested_error_paths() {
        let err = decoded::<HashMap<String, Vec<i64>>>(r#"{"ok" => [1], "bad" => [1, "x"]}"#).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::ParseFailure);
        assert_eq!(err.path, "root.<entry 1>[1]");
    }

    #[test]
    fn failed_decode_leaves_destination_untouched() {
        let mrb = Mrb::open();
        let value = mrb.evaluate("[1, 2, :three]").unwrap();
        let mut numbers = vec![9i64];
        assert!(decode(&mut numbers, &value).is_err());
        assert_eq!(numbers, vec![9]);

        let good = mrb.evaluate("[1, 2]").unwrap();
        decode(&mut numbers, &good).unwrap();
        assert_eq!(numbers, vec![9, 1, 2]);
    }

    #[test]
    fn optionals_allocate_fresh() {
        assert_eq!(decoded::<Option<i64>>("5"), Ok(Some(5)));
        assert_eq!(decoded::<Box<String>>("'boxed'").map(|b| *b).as_deref(), Ok("boxed"));
        assert_eq!(decoded::<Option<Vec<i64>>>("[1]"), Ok(Some(vec![1])));

        let mrb = Mrb::open();
        let value = mrb.evaluate("[3]").unwrap();
        let mut previous = Some(vec![1i64, 2]);
        decode(&mut previous, &value).unwrap();
        assert_eq!(previous, Some(vec![3]));
    }

    #[test]
    fn map_decode_restores_the_arena() {
        let mrb = Mrb::open();
        let value = mrb.evaluate(r#"{"a" => "1", "b" => "2", "c" => "3"}"#).unwrap();
        let before = mrb.arena_save();
        let mut map: HashMap<String, String> = HashMap::new();
        decode(&mut map, &value).unwrap();
        assert_eq!(mrb.arena_save(), before);
        assert_eq!(map.len(), 3);

        let mut numbers: HashMap<String, i64> = HashMap::new();
        assert!(decode(&mut numbers, &value).is_ok());
        let bad = mrb.evaluate(r#"{"x" => :y}"#).unwrap();
        let before = mrb.arena_save();
        assert!(decode(&mut numbers, &bad).is_err());
        assert_eq!(mrb.arena_save(), before);
    }

    decode_record! {
        #[derive(Debug, Clone, Default, PartialEq)]
        struct Server {
            name: String,
            port: u16,
            tags: Vec<String>,
            tls: Option<bool>,
            weight: f64,
        }
    }

    #[test]
    fn records() {
        let code = r#"{"name" => "web", :PORT => 8080, "tags" => ["a", "b"], "unknown" => 1}"#;
        let server = decoded::<Server>(code).unwrap();
        assert_eq!(
            server,
            Server {
                name: "web".to_owned(),
                port: 8080,
                tags: vec!["a".to_owned(), "b".to_owned()],
                tls: None,
                weight: 0.0,
            }
        );

        let err = decoded::<Server>(r#"{"port" => "http"}"#).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::ParseFailure);
        assert_eq!(err.path, "root.port");

        let err = decoded::<Server>("[]").unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::TypeMismatch);
    }

    #[test]
    #[allow(non_snake_case)]
    fn exact_field_match_wins() {
        decode_record! {
            #[derive(Debug, Clone, Default)]
            struct Pair {
                value: i64,
                Value: i64,
            }
        }
        let pair = decoded::<Pair>(r#"{"Value" => 2, "value" => 1}"#).unwrap();
        assert_eq!((pair.value, pair.Value), (1, 2));
    }

    #[test]
    fn records_nest() {
        decode_record! {
            #[derive(Debug, Clone, Default)]
            struct Cluster {
                servers: Vec<Server>,
                primary: Option<Server>,
            }
        }
        let code = r#"{"servers" => [{"name" => "a"}, {"name" => "b", "port" => "0x50"}], "primary" => {"name" => "a"}}"#;
        let cluster = decoded::<Cluster>(code).unwrap();
        assert_eq!(cluster.servers.len(), 2);
        assert_eq!(cluster.servers[1].port, 80);
        assert_eq!(cluster.primary.map(|s| s.name).as_deref(), Some("a"));

        let err = decoded::<Cluster>(r#"{"servers" => [{"tls" => 1}]}"#).unwrap_err();
        assert_eq!(err.path, "root.servers[0].tls");
    }

    #[test]
    fn dynamic_destinations() {
        let err = decoded::<Dynamic>("1").unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::InvalidDestination);

        let mrb = Mrb::open();
        let mut slot = Dynamic::Integer(0);
        decode(&mut slot, &mrb.evaluate("'0b101'").unwrap()).unwrap();
        assert_eq!(slot, Dynamic::Integer(5));

        let mut slot = Dynamic::Float(0.0);
        decode(&mut slot, &mrb.evaluate("2.5").unwrap()).unwrap();
        assert_eq!(slot, Dynamic::Float(2.5));

        let mut slot = Dynamic::Mapping(HashMap::new());
        decode(&mut slot, &mrb.evaluate("{}").unwrap()).unwrap();
        assert_eq!(slot, Dynamic::Mapping(HashMap::new()));

        let mut slot = Dynamic::Sequence(Vec::new());
        let err = decode(&mut slot, &mrb.evaluate("[1]").unwrap()).unwrap_err();
        assert_eq!((err.kind, err.path.as_str()), (DecodeErrorKind::InvalidDestination, "root[0]"));
    }
}
