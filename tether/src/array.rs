use crate::Value;

/// View of an interpreter array.
#[derive(Debug, Clone, Copy)]
pub struct Array<'m> {
    value: Value<'m>,
}

impl<'m> Array<'m> {
    pub(crate) fn new(value: Value<'m>) -> Self {
        Array { value }
    }

    pub fn value(&self) -> Value<'m> {
        self.value
    }

    pub fn len(&self) -> usize {
        self.value.mrb().state().array_len(self.value.raw()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `index`, nil past the end. Does not allocate.
    pub fn get(&self, index: usize) -> Value<'m> {
        let mrb = self.value.mrb();
        let raw = mrb.state().array_get(self.value.raw(), index as i64);
        mrb.wrap(raw)
    }

    pub fn push(&self, item: Value<'m>) {
        let mrb = self.value.mrb();
        let item = mrb.unwrap_value(&item);
        mrb.state().array_push(self.value.raw(), item);
    }

    pub fn iter(&self) -> impl Iterator<Item = Value<'m>> + '_ {
        (0..self.len()).map(|i| self.get(i))
    }
}

#[cfg(test)]
mod tests {
    use crate::Mrb;

    #[test]
    fn access_and_push() {
        let mrb = Mrb::open();
        let value = mrb.evaluate(r#"["foo", "bar", 3]"#).unwrap();
        let array = value.array().unwrap();
        assert_eq!(array.len(), 3);
        assert_eq!(array.get(0).to_s(), "foo");
        assert_eq!(array.get(2).as_fixnum(), Some(3));
        assert!(array.get(9).is_nil());

        array.push(mrb.symbol_value("baz"));
        assert_eq!(value.inspect(), r#"["foo", "bar", 3, :baz]"#);
        let names: Vec<_> = array.iter().map(|v| v.to_s()).collect();
        assert_eq!(names, vec!["foo", "bar", "3", "baz"]);
    }

    #[test]
    fn only_arrays_have_a_view() {
        let mrb = Mrb::open();
        assert!(mrb.evaluate("{}").unwrap().array().is_none());
        assert!(mrb.array_value(&[]).array().unwrap().is_empty());
    }
}
