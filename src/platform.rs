/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Fixed-width platform types shared by every other module: virtual and
//! physical address wrappers, the raw table-entry word, and the sentinel
//! that stands in for "no address".

use bit_field::BitField;
use core::fmt;
use core::ops::{Add, AddAssign, Sub, SubAssign};

/// Raw bit pattern of a 64-bit translation-table descriptor.
pub type TtEntry = u64;

/// Sentinel returned by primitives and walker/relocator operations to mean
/// "no address" or "operation failed". All ones, matching the host
/// primitives contract in the external-interfaces section.
pub const INVALID_ADDR: u64 = u64::MAX;

macro_rules! addr_newtype {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Wraps a raw 64-bit value, including the `INVALID_ADDR` sentinel.
            ///
            /// Unlike an on-target physical address, this type must also be able
            /// to carry the all-ones sentinel used throughout the primitives
            /// contract, so construction never panics on out-of-range bits.
            pub const fn new(addr: u64) -> Self {
                $name(addr)
            }

            /// The `INVALID_ADDR` sentinel value of this address kind.
            pub const fn invalid() -> Self {
                $name(INVALID_ADDR)
            }

            /// True if this address equals the `INVALID_ADDR` sentinel.
            pub const fn is_invalid(self) -> bool {
                self.0 == INVALID_ADDR
            }

            /// Converts to the raw 64-bit representation.
            pub const fn as_u64(self) -> u64 {
                self.0
            }

            /// Checks whether this address has the demanded alignment.
            pub fn is_aligned(self, align: u64) -> bool {
                self.0 & (align - 1) == 0
            }

            /// Rounds this address down to the given alignment.
            pub fn aligned_down(self, align: u64) -> Self {
                $name(self.0 & !(align - 1))
            }

            /// Extracts an inclusive-exclusive bit range, as used when decoding
            /// descriptor output-address fields.
            pub fn get_bits(self, range: core::ops::Range<usize>) -> u64 {
                self.0.get_bits(range)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }

        impl fmt::LowerHex for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                $name::new(value)
            }
        }

        impl From<$name> for u64 {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl Add<u64> for $name {
            type Output = Self;
            fn add(self, rhs: u64) -> Self::Output {
                $name(self.0.wrapping_add(rhs))
            }
        }

        impl AddAssign<u64> for $name {
            fn add_assign(&mut self, rhs: u64) {
                *self = *self + rhs;
            }
        }

        impl Sub<u64> for $name {
            type Output = Self;
            fn sub(self, rhs: u64) -> Self::Output {
                $name(self.0.wrapping_sub(rhs))
            }
        }

        impl SubAssign<u64> for $name {
            fn sub_assign(&mut self, rhs: u64) {
                *self = *self - rhs;
            }
        }
    };
}

addr_newtype!(PhysAddr, "A 64-bit physical address in the target's address space.");
addr_newtype!(VirtAddr, "A 64-bit virtual address in the target's address space.");

static_assertions::assert_eq_size!(PhysAddr, u64);
static_assertions::assert_eq_size!(VirtAddr, u64);
static_assertions::assert_eq_align!(PhysAddr, u64);
static_assertions::assert_eq_align!(VirtAddr, u64);

/// ARMv8 Exception Level; selects which TCR/TTBR fields a config applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionLevel {
    EL0,
    EL1,
    EL2,
    EL3,
}

/// Translation-table level, L0 (coarsest) through L3 (leaf-page level).
///
/// `next()`/`prev()` saturate at the endpoints rather than wrapping, which
/// keeps walker loops simple: descending past L3 or ascending past L0 just
/// stays put instead of needing a checked variant at every call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TTLevel {
    L0,
    L1,
    L2,
    L3,
}

impl TTLevel {
    pub const fn next(self) -> Self {
        match self {
            TTLevel::L0 => TTLevel::L1,
            TTLevel::L1 => TTLevel::L2,
            TTLevel::L2 => TTLevel::L3,
            TTLevel::L3 => TTLevel::L3,
        }
    }

    pub const fn prev(self) -> Self {
        match self {
            TTLevel::L0 => TTLevel::L0,
            TTLevel::L1 => TTLevel::L0,
            TTLevel::L2 => TTLevel::L1,
            TTLevel::L3 => TTLevel::L2,
        }
    }

    pub const fn as_usize(self) -> usize {
        match self {
            TTLevel::L0 => 0,
            TTLevel::L1 => 1,
            TTLevel::L2 => 2,
            TTLevel::L3 => 3,
        }
    }
}

/// Translation granule: the page size, and the size of a single-level table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TTGranule {
    Granule4K,
    Granule16K,
    Granule64K,
}

impl TTGranule {
    /// Page / table size in bytes.
    pub const fn size(self) -> u64 {
        match self {
            TTGranule::Granule4K => 4096,
            TTGranule::Granule16K => 16384,
            TTGranule::Granule64K => 65536,
        }
    }

    /// Width in bits of the level-index field at the given level, per the
    /// ARM ARM table referenced by the level-index width matrix. `None`
    /// means the (granule, level) pair is not defined (L0 under 64K).
    pub const fn index_width(self, level: TTLevel) -> Option<u32> {
        use TTGranule::*;
        use TTLevel::*;
        match (self, level) {
            (Granule4K, L0) => Some(9),
            (Granule4K, L1) => Some(9),
            (Granule4K, L2) => Some(9),
            (Granule4K, L3) => Some(9),
            (Granule16K, L0) => Some(1),
            (Granule16K, L1) => Some(11),
            (Granule16K, L2) => Some(11),
            (Granule16K, L3) => Some(11),
            (Granule64K, L0) => None,
            (Granule64K, L1) => Some(6),
            (Granule64K, L2) => Some(13),
            (Granule64K, L3) => Some(13),
        }
    }
}
