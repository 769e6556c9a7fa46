use crate::{ToValue, Value};

/// View of an interpreter hash.
#[derive(Debug, Clone, Copy)]
pub struct Hash<'m> {
    value: Value<'m>,
}

impl<'m> Hash<'m> {
    pub(crate) fn new(value: Value<'m>) -> Self {
        Hash { value }
    }

    pub fn value(&self) -> Value<'m> {
        self.value
    }

    /// Value under `key`, or the hash default.
    pub fn get(&self, key: impl ToValue) -> Value<'m> {
        let mrb = self.value.mrb();
        let key = key.to_value(mrb);
        mrb.wrap(mrb.state().hash_get(self.value.raw(), key.raw()))
    }

    pub fn set(&self, key: impl ToValue, value: impl ToValue) {
        let mrb = self.value.mrb();
        let (key, value) = (key.to_value(mrb), value.to_value(mrb));
        mrb.state().hash_set(self.value.raw(), key.raw(), value.raw());
    }

    pub fn delete(&self, key: impl ToValue) -> Option<Value<'m>> {
        let mrb = self.value.mrb();
        let key = key.to_value(mrb);
        let removed = mrb.state().hash_delete(self.value.raw(), key.raw())?;
        Some(mrb.wrap(removed))
    }

    /// A new array of the keys, in insertion order.
    pub fn keys(&self) -> Value<'m> {
        let mrb = self.value.mrb();
        mrb.wrap(mrb.state().hash_keys(self.value.raw()))
    }

    pub fn len(&self) -> usize {
        self.value.mrb().state().hash_len(self.value.raw()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use crate::Mrb;

    #[test]
    fn get_set_delete() {
        let mrb = Mrb::open();
        let value = mrb.evaluate(r#"{"foo" => "bar", :n => 1}"#).unwrap();
        let hash = value.hash().unwrap();
        assert_eq!(hash.len(), 2);
        assert_eq!(hash.get("foo").to_s(), "bar");
        assert_eq!(hash.get(mrb.symbol_value("n")).as_fixnum(), Some(1));
        assert!(hash.get("missing").is_nil());

        hash.set("baz", 42i64);
        assert_eq!(hash.get("baz").as_fixnum(), Some(42));
        assert_eq!(hash.delete("foo").map(|v| v.to_s()).as_deref(), Some("bar"));
        assert!(hash.delete("foo").is_none());
        assert_eq!(hash.keys().inspect(), r#"[:n, "baz"]"#);
    }

    #[test]
    fn keys_keep_insertion_order() {
        let mrb = Mrb::open();
        let hash = mrb.hash_value();
        let view = hash.hash().unwrap();
        for key in ["zeta", "alpha", "mid"] {
            view.set(key, true);
        }
        assert_eq!(view.keys().inspect(), r#"["zeta", "alpha", "mid"]"#);
        assert!(!view.is_empty());
    }
}
