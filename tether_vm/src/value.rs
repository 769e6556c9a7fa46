use crate::Sym;

/// Floating point width of the interpreter. Single precision, so values
/// read back into an `f64` show the rounding (`1.2` is `1.2000000476837158`).
pub type Float = f32;

/// Reference to a heap slot.
///
/// The generation makes stale references detectable: once the slot is swept
/// and reused the generation no longer matches and lookups return `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl ObjRef {
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

/// An interpreter value. Immediates are stored inline, everything else is a
/// reference into the heap of the state that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum RawValue {
    #[default]
    Nil,
    False,
    True,
    Fixnum(i64),
    Float(Float),
    Symbol(Sym),
    Object(ObjRef),
}

impl RawValue {
    #[inline]
    pub const fn from_bool(b: bool) -> Self {
        if b { RawValue::True } else { RawValue::False }
    }

    #[inline]
    pub const fn is_nil(self) -> bool {
        matches!(self, RawValue::Nil)
    }

    /// Ruby truthiness: everything except `nil` and `false`.
    #[inline]
    pub const fn is_truthy(self) -> bool {
        !matches!(self, RawValue::Nil | RawValue::False)
    }

    #[inline]
    pub const fn as_object(self) -> Option<ObjRef> {
        match self {
            RawValue::Object(obj) => Some(obj),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_fixnum(self) -> Option<i64> {
        match self {
            RawValue::Fixnum(n) => Some(n),
            _ => None,
        }
    }
}

impl From<ObjRef> for RawValue {
    fn from(obj: ObjRef) -> Self {
        RawValue::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!RawValue::Nil.is_truthy());
        assert!(!RawValue::False.is_truthy());
        assert!(RawValue::True.is_truthy());
        assert!(RawValue::Fixnum(0).is_truthy());
        assert!(RawValue::Float(0.0).is_truthy());
    }

    #[test]
    fn object_accessors() {
        let obj = ObjRef {
            index: 3,
            generation: 1,
        };
        let v = RawValue::from(obj);
        assert_eq!(v.as_object(), Some(obj));
        assert_eq!(v.as_fixnum(), None);
        assert_eq!(RawValue::Fixnum(7).as_fixnum(), Some(7));
    }
}
