//! `to_s` and `inspect` renderings.
use crate::{EvalResult, Exc, Float, Object, RawValue, State};

/// Float rendering used by `Float#to_s`: integral values keep a `.0`,
/// everything else uses the shortest representation that round-trips at
/// interpreter precision.
pub fn format_float(f: Float) -> String {
    if f.is_nan() {
        return "NaN".to_owned();
    }
    if f.is_infinite() {
        return if f > 0.0 { "Infinity" } else { "-Infinity" }.to_owned();
    }
    if f == f.trunc() && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

/// Double-quoted literal form of a string, as `String#inspect` prints it.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\u{1b}' => out.push_str("\\e"),
            c if c.is_control() => out.push_str(&format!("\\x{:02X}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn symbol_needs_quotes(name: &str) -> bool {
    const OPERATORS: &[&str] = &[
        "+", "-", "*", "/", "%", "**", "==", "!=", "<", ">", "<=", ">=", "<=>", "===", "<<",
        ">>", "!", "&", "|", "^", "~", "[]", "[]=", "-@", "+@", "=~",
    ];
    if OPERATORS.contains(&name) {
        return false;
    }
    let body = name.strip_suffix(['?', '!', '=']).unwrap_or(name);
    let mut chars = body.chars();
    !matches!(chars.next(), Some(c) if c == '_' || c.is_alphabetic())
        || !chars.all(|c| c == '_' || c.is_alphanumeric())
}

impl State {
    /// `to_s` of a value. Immediates and strings are rendered directly,
    /// everything else goes through a `to_s` call.
    pub(crate) fn stringify(&mut self, value: RawValue) -> Result<String, Exc> {
        if let Some(s) = self.render_immediate(value, false) {
            return Ok(s);
        }
        if let Some(s) = self.string_content(value) {
            return Ok(s.to_owned());
        }
        let to_s = self.intern("to_s");
        let result = self.send(value, to_s, Vec::new(), None)?;
        Ok(match self.string_content(result) {
            Some(s) => s.to_owned(),
            None => self.default_to_s(value),
        })
    }

    /// `inspect` of a value.
    pub(crate) fn inspect_value(&mut self, value: RawValue) -> Result<String, Exc> {
        if let Some(s) = self.render_immediate(value, true) {
            return Ok(s);
        }
        let inspect = self.intern("inspect");
        let result = self.send(value, inspect, Vec::new(), None)?;
        Ok(match self.string_content(result) {
            Some(s) => s.to_owned(),
            None => self.default_to_s(value),
        })
    }

    fn render_immediate(&self, value: RawValue, inspect: bool) -> Option<String> {
        Some(match value {
            RawValue::Nil if inspect => "nil".to_owned(),
            RawValue::Nil => String::new(),
            RawValue::True => "true".to_owned(),
            RawValue::False => "false".to_owned(),
            RawValue::Fixnum(n) => n.to_string(),
            RawValue::Float(f) => format_float(f),
            RawValue::Symbol(sym) => {
                let name = self.sym_name(sym);
                match (inspect, symbol_needs_quotes(&name)) {
                    (false, _) => name.to_string(),
                    (true, false) => format!(":{name}"),
                    (true, true) => format!(":{}", quote(&name)),
                }
            }
            RawValue::Object(_) => return None,
        })
    }

    /// `#<Foo>`, or `main` for the top-level object.
    pub(crate) fn default_to_s(&self, value: RawValue) -> String {
        if value == self.top_self {
            return "main".to_owned();
        }
        format!("#<{}>", self.class_name(self.real_class(value)))
    }

    /// `Kernel#inspect`: class name followed by instance variables in
    /// definition order of their names.
    pub(crate) fn default_inspect(&mut self, value: RawValue) -> EvalResult {
        if value == self.top_self {
            return Ok(self.new_string("main"));
        }
        let mut ivars: Vec<_> = match value.as_object().and_then(|obj| self.object(obj)) {
            Some(Object::Instance(instance)) => instance.ivars.iter().map(|(&k, &v)| (k, v)).collect(),
            _ => Vec::new(),
        };
        ivars.sort_by_key(|(sym, _)| *sym);
        let class = self.class_name(self.real_class(value));
        let mut out = format!("#<{class}");
        for (i, (name, ivar)) in ivars.into_iter().enumerate() {
            out.push_str(if i == 0 { " " } else { ", " });
            let rendered = self.inspect_value(ivar)?;
            out.push_str(&format!("@{}={rendered}", self.sym_name(name)));
        }
        out.push('>');
        Ok(self.new_string(&out))
    }

    pub(crate) fn inspect_array(&mut self, array: RawValue) -> Result<String, Exc> {
        let items = self.array_items(array).cloned().unwrap_or_default();
        let mut parts = Vec::with_capacity(items.len());
        for item in items {
            parts.push(if item == array { "[...]".to_owned() } else { self.inspect_value(item)? });
        }
        Ok(format!("[{}]", parts.join(", ")))
    }

    pub(crate) fn inspect_hash(&mut self, hash: RawValue) -> Result<String, Exc> {
        let entries = self
            .hash_table(hash)
            .map(|table| table.entries().to_vec())
            .unwrap_or_default();
        let mut parts = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let key = self.inspect_value(key)?;
            let value = if value == hash { "{...}".to_owned() } else { self.inspect_value(value)? };
            parts.push(format!("{key}=>{value}"));
        }
        Ok(format!("{{{}}}", parts.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floats() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(-3.0), "-3.0");
        assert_eq!(format_float(1.5), "1.5");
        assert_eq!(format_float(1.2), "1.2");
        assert_eq!(format_float(Float::INFINITY), "Infinity");
        assert_eq!(format_float(Float::NEG_INFINITY), "-Infinity");
        assert_eq!(format_float(Float::NAN), "NaN");
    }

    #[test]
    fn quoting() {
        assert_eq!(quote("a\"b\n"), "\"a\\\"b\\n\"");
        assert_eq!(quote("plain"), "\"plain\"");
    }

    #[test]
    fn symbols() {
        let mut state = State::new();
        let plain = state.symbol_value("foo?");
        let spaced = state.symbol_value("with space");
        let op = state.symbol_value("<=>");
        assert_eq!(state.inspect(plain), ":foo?");
        assert_eq!(state.inspect(spaced), ":\"with space\"");
        assert_eq!(state.inspect(op), ":<=>");
        assert_eq!(state.to_s(spaced), "with space");
    }

    #[test]
    fn containers() {
        let mut state = State::new();
        let value = state.load_string("{\"foo\" => [1, 2.5, nil, :sym], 3 => {}}");
        assert_eq!(state.inspect(value), "{\"foo\"=>[1, 2.5, nil, :sym], 3=>{}}");
        let top = state.top_self();
        assert_eq!(state.inspect(top), "main");
    }
}
