use std::ops::BitOr;

/// Argument specification of a native method, packed the same way mruby
/// packs `mrb_aspec`:
///
/// | bits    | meaning              |
/// |---------|----------------------|
/// | 18..23  | required arguments   |
/// | 13..18  | optional arguments   |
/// | 12      | rest (`*args`)       |
/// | 0       | block                |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Aspec(u32);

const REQ_SHIFT: u32 = 18;
const OPT_SHIFT: u32 = 13;
const COUNT_MASK: u32 = 0x1f;
const REST: u32 = 1 << 12;
const BLOCK: u32 = 1;

impl Aspec {
    pub const NONE: Aspec = Aspec(0);
    pub const ANY: Aspec = Aspec(REST);
    pub const BLOCK: Aspec = Aspec(BLOCK);

    pub const fn req(n: u32) -> Self {
        Aspec((n & COUNT_MASK) << REQ_SHIFT)
    }

    pub const fn opt(n: u32) -> Self {
        Aspec((n & COUNT_MASK) << OPT_SHIFT)
    }

    pub const fn arg(req: u32, opt: u32) -> Self {
        Aspec(Self::req(req).0 | Self::opt(opt).0)
    }

    /// `const` counterpart of `|`.
    pub const fn with(self, other: Aspec) -> Self {
        Aspec(self.0 | other.0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Aspec(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn required(self) -> usize {
        ((self.0 >> REQ_SHIFT) & COUNT_MASK) as usize
    }

    pub const fn optional(self) -> usize {
        ((self.0 >> OPT_SHIFT) & COUNT_MASK) as usize
    }

    pub const fn has_rest(self) -> bool {
        self.0 & REST != 0
    }

    pub const fn takes_block(self) -> bool {
        self.0 & BLOCK != 0
    }

    /// Validates a call against this spec. Returns the message for the
    /// exception to raise on mismatch.
    pub fn check(self, argc: usize, has_block: bool) -> Result<(), ArityMismatch> {
        let required = self.required();
        let max = required + self.optional();
        if argc < required || (!self.has_rest() && argc > max) {
            return Err(ArityMismatch::Count {
                given: argc,
                required,
                max: (!self.has_rest()).then_some(max),
            });
        }
        if self.takes_block() && !has_block {
            return Err(ArityMismatch::MissingBlock);
        }
        Ok(())
    }
}

impl BitOr for Aspec {
    type Output = Aspec;

    fn bitor(self, rhs: Aspec) -> Aspec {
        Aspec(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArityMismatch {
    Count {
        given: usize,
        required: usize,
        max: Option<usize>,
    },
    MissingBlock,
}

impl std::fmt::Display for ArityMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            ArityMismatch::Count {
                given,
                required,
                max: Some(max),
            } if max == required => {
                write!(f, "wrong number of arguments (given {given}, expected {required})")
            }
            ArityMismatch::Count {
                given,
                required,
                max: Some(max),
            } => write!(
                f,
                "wrong number of arguments (given {given}, expected {required}..{max})"
            ),
            ArityMismatch::Count {
                given,
                required,
                max: None,
            } => write!(
                f,
                "wrong number of arguments (given {given}, expected {required}+)"
            ),
            ArityMismatch::MissingBlock => write!(f, "no block given"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packing() {
        let spec = Aspec::arg(2, 3) | Aspec::BLOCK;
        assert_eq!(spec.required(), 2);
        assert_eq!(spec.optional(), 3);
        assert!(spec.takes_block());
        assert!(!spec.has_rest());
        assert!(Aspec::ANY.has_rest());
        assert_eq!(Aspec::NONE.bits(), 0);
    }

    #[test]
    fn none_rejects_arguments() {
        assert!(Aspec::NONE.check(0, false).is_ok());
        assert_eq!(
            Aspec::NONE.check(1, false),
            Err(ArityMismatch::Count {
                given: 1,
                required: 0,
                max: Some(0)
            })
        );
    }

    #[test]
    fn any_accepts_everything() {
        for argc in 0..8 {
            assert!(Aspec::ANY.check(argc, argc % 2 == 0).is_ok());
        }
    }

    #[test]
    fn required_and_optional_bounds() {
        let spec = Aspec::arg(1, 1);
        assert!(spec.check(0, false).is_err());
        assert!(spec.check(1, false).is_ok());
        assert!(spec.check(2, false).is_ok());
        assert!(spec.check(3, false).is_err());
    }

    #[test]
    fn block_flag_requires_block() {
        assert_eq!(
            Aspec::BLOCK.check(0, false),
            Err(ArityMismatch::MissingBlock)
        );
        assert!(Aspec::BLOCK.check(0, true).is_ok());
    }

    #[test]
    fn messages() {
        let err = Aspec::req(2).check(1, false).unwrap_err();
        assert_eq!(
            err.to_string(),
            "wrong number of arguments (given 1, expected 2)"
        );
        let err = (Aspec::req(1) | Aspec::ANY).check(0, false).unwrap_err();
        assert_eq!(
            err.to_string(),
            "wrong number of arguments (given 0, expected 1+)"
        );
    }
}
