use bytemuck::{Pod, Zeroable};
use std::fmt::{self, Display, Formatter};

/// Address of a word in the managed heap.
///
/// Objects are 8-byte aligned, so the low three bits of an
/// object address are always clear.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable,
)]
#[repr(transparent)]
pub struct Address(pub usize);

impl Address {
    pub const NULL: Address = Address(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn offset(self, bytes: usize) -> Address {
        Address(self.0 + bytes)
    }

    pub fn is_aligned(self, align: usize) -> bool {
        self.0 % align == 0
    }

    pub fn align_up(self, align: usize) -> Address {
        Address(round_up(self.0, align))
    }

    /// Bytes from `base` up to this address.
    pub fn distance_from(self, base: Address) -> usize {
        debug_assert!(self >= base);
        self.0 - base.0
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

pub fn round_up(x: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (x + align - 1) & !(align - 1)
}
