/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! The VMSAv8-64 descriptor model: classification, output-address
//! encode/decode, and attribute accessors for the 3-granule by 4-level
//! format matrix.
//!
//! Address-field location varies per (granule, level, kind) and is looked
//! up at runtime via `bit_field`, the way `PhysAddr::new` pulls a dynamic
//! bit range out of a raw word. The attribute and type/valid bits, which sit
//! at the same position in every format, are modeled as two fixed
//! `tock_registers` bitfield sets shared by all twelve formats.

use crate::error::PreconditionViolation;
use crate::platform::{PhysAddr, TTGranule, TTLevel, TtEntry};
use bit_field::BitField;
use tock_registers::interfaces::{ReadWriteable, Readable};
use tock_registers::register_bitfields;
use tock_registers::registers::InMemoryRegister;

register_bitfields! [u64,
    pub TABLE_DESC [
        NSTABLE OFFSET(63) NUMBITS(1) [],
        APTABLE OFFSET(61) NUMBITS(2) [],
        XNTABLE OFFSET(60) NUMBITS(1) [],
        PXNTABLE OFFSET(59) NUMBITS(1) [],
        TYPE OFFSET(1) NUMBITS(1) [
            Block = 0,
            Table = 1
        ],
        VALID OFFSET(0) NUMBITS(1) []
    ],
    pub LEAF_DESC [
        XN OFFSET(54) NUMBITS(1) [],
        PXN OFFSET(53) NUMBITS(1) [],
        CONTIGUOUS OFFSET(52) NUMBITS(1) [],
        NG OFFSET(11) NUMBITS(1) [],
        AF OFFSET(10) NUMBITS(1) [],
        SH OFFSET(8) NUMBITS(2) [],
        AP OFFSET(6) NUMBITS(2) [],
        NS OFFSET(5) NUMBITS(1) [],
        ATTRINDX OFFSET(2) NUMBITS(3) [],
        TYPE OFFSET(1) NUMBITS(1) [
            Reserved = 0,
            Page = 1
        ],
        VALID OFFSET(0) NUMBITS(1) []
    ]
];

/// What a descriptor resolves to, under its (granule, level).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Invalid,
    Reserved,
    Table,
    Block,
    Page,
}

/// A 64-bit translation-table entry, bound to the (granule, level) it was
/// read from. Deliberately `Copy`: a `Descriptor` is a value, not a handle
/// into shared state, so snapshotting one for later comparison is just a
/// move of 24 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    granule: TTGranule,
    level: TTLevel,
    value: TtEntry,
}

impl Descriptor {
    pub fn new(granule: TTGranule, level: TTLevel, value: TtEntry) -> Self {
        Descriptor {
            granule,
            level,
            value,
        }
    }

    pub fn granule(&self) -> TTGranule {
        self.granule
    }

    pub fn level(&self) -> TTLevel {
        self.level
    }

    pub fn get_descriptor(&self) -> TtEntry {
        self.value
    }

    pub fn set_descriptor(&mut self, value: TtEntry) {
        self.value = value;
    }

    /// Produces a heap-independent copy carrying the same (granule, level,
    /// value) triple, for presenting a pre-mutation snapshot alongside a
    /// post-mutation descriptor during relocation.
    pub fn snapshot(&self) -> Descriptor {
        *self
    }

    fn table_reg(&self) -> InMemoryRegister<u64, TABLE_DESC::Register> {
        InMemoryRegister::new(self.value)
    }

    fn leaf_reg(&self) -> InMemoryRegister<u64, LEAF_DESC::Register> {
        InMemoryRegister::new(self.value)
    }

    pub fn is_valid(&self) -> bool {
        self.value.get_bit(0)
    }

    pub fn kind(&self) -> Kind {
        if !self.is_valid() {
            return Kind::Invalid;
        }
        let type_bit = self.value.get_bit(1);
        match self.level {
            // L0 valid descriptors are architecturally always tables; there
            // is no block encoding at L0 for any granule.
            TTLevel::L0 => Kind::Table,
            TTLevel::L1 => {
                if self.granule == TTGranule::Granule64K {
                    // L1 under 64K has no block encoding either.
                    Kind::Table
                } else if type_bit {
                    Kind::Table
                } else {
                    Kind::Block
                }
            }
            TTLevel::L2 => {
                if type_bit {
                    Kind::Table
                } else {
                    Kind::Block
                }
            }
            TTLevel::L3 => {
                if type_bit {
                    Kind::Page
                } else {
                    Kind::Reserved
                }
            }
        }
    }

    pub fn is_table(&self) -> bool {
        self.kind() == Kind::Table
    }

    pub fn is_block(&self) -> bool {
        self.kind() == Kind::Block
    }

    pub fn is_page(&self) -> bool {
        self.kind() == Kind::Page
    }

    pub fn is_reserved(&self) -> bool {
        self.kind() == Kind::Reserved
    }

    /// Low bit of the [47:low] output-address field for this descriptor's
    /// (granule, level, kind), or `None` when the format does not define an
    /// address field here (invalid/reserved descriptors, or an
    /// architecturally-undefined block encoding).
    fn address_low_bit(&self) -> Option<u32> {
        use Kind::*;
        use TTGranule::*;
        use TTLevel::*;
        let table_low = match self.granule {
            Granule4K => 12,
            Granule16K => 14,
            Granule64K => 16,
        };
        match (self.kind(), self.level, self.granule) {
            (Table, _, _) => Some(table_low),
            (Page, L3, _) => Some(table_low),
            (Block, L1, Granule4K) => Some(30),
            (Block, L2, Granule4K) => Some(21),
            (Block, L2, Granule16K) => Some(25),
            (Block, L2, Granule64K) => Some(29),
            _ => None,
        }
    }

    /// Decodes the output address. Returns a zero address if the descriptor
    /// is invalid, reserved, or the (granule, level) pair has no defined
    /// address field for this kind.
    pub fn get_output_address(&self) -> PhysAddr {
        match self.address_low_bit() {
            Some(low) => PhysAddr::new(self.value.get_bits(low as usize..48) << low),
            None => PhysAddr::new(0),
        }
    }

    /// Writes only the format's address bit range, leaving every other bit
    /// (attributes, type, valid) untouched. Addresses must already be
    /// aligned to the field's granularity; misaligned addresses are
    /// silently truncated by the bit-range write, matching the descriptor
    /// model's documented behavior.
    pub fn set_output_address(&mut self, addr: PhysAddr) {
        if let Some(low) = self.address_low_bit() {
            let field = addr.as_u64() >> low;
            self.value.set_bits(low as usize..48, field);
        }
    }

    fn require_table(&self) -> Result<(), PreconditionViolation> {
        if self.is_table() {
            Ok(())
        } else {
            Err(PreconditionViolation::DescriptorKindMismatch {
                expected: "Table",
                actual: kind_name(self.kind()),
            })
        }
    }

    fn require_leaf(&self) -> Result<(), PreconditionViolation> {
        if self.is_block() || self.is_page() {
            Ok(())
        } else {
            Err(PreconditionViolation::DescriptorKindMismatch {
                expected: "Block/Page",
                actual: kind_name(self.kind()),
            })
        }
    }

    pub fn pxn_table(&self) -> bool {
        self.require_table().unwrap_or_else(|e| e.abort());
        self.table_reg().is_set(TABLE_DESC::PXNTABLE)
    }

    pub fn xn_table(&self) -> bool {
        self.require_table().unwrap_or_else(|e| e.abort());
        self.table_reg().is_set(TABLE_DESC::XNTABLE)
    }

    pub fn ap_table(&self) -> u8 {
        self.require_table().unwrap_or_else(|e| e.abort());
        self.table_reg().read(TABLE_DESC::APTABLE) as u8
    }

    pub fn ns_table(&self) -> bool {
        self.require_table().unwrap_or_else(|e| e.abort());
        self.table_reg().is_set(TABLE_DESC::NSTABLE)
    }

    pub fn attr_indx(&self) -> u8 {
        self.require_leaf().unwrap_or_else(|e| e.abort());
        self.leaf_reg().read(LEAF_DESC::ATTRINDX) as u8
    }

    pub fn ns(&self) -> bool {
        self.require_leaf().unwrap_or_else(|e| e.abort());
        self.leaf_reg().is_set(LEAF_DESC::NS)
    }

    pub fn ap(&self) -> u8 {
        self.require_leaf().unwrap_or_else(|e| e.abort());
        self.leaf_reg().read(LEAF_DESC::AP) as u8
    }

    pub fn sh(&self) -> u8 {
        self.require_leaf().unwrap_or_else(|e| e.abort());
        self.leaf_reg().read(LEAF_DESC::SH) as u8
    }

    pub fn af(&self) -> bool {
        self.require_leaf().unwrap_or_else(|e| e.abort());
        self.leaf_reg().is_set(LEAF_DESC::AF)
    }

    pub fn ng(&self) -> bool {
        self.require_leaf().unwrap_or_else(|e| e.abort());
        self.leaf_reg().is_set(LEAF_DESC::NG)
    }

    pub fn contiguous(&self) -> bool {
        self.require_leaf().unwrap_or_else(|e| e.abort());
        self.leaf_reg().is_set(LEAF_DESC::CONTIGUOUS)
    }

    pub fn pxn(&self) -> bool {
        self.require_leaf().unwrap_or_else(|e| e.abort());
        self.leaf_reg().is_set(LEAF_DESC::PXN)
    }

    pub fn xn(&self) -> bool {
        self.require_leaf().unwrap_or_else(|e| e.abort());
        self.leaf_reg().is_set(LEAF_DESC::XN)
    }

    pub fn set_xn(&mut self, value: bool) {
        self.require_leaf().unwrap_or_else(|e| e.abort());
        let reg = self.leaf_reg();
        reg.modify(if value { LEAF_DESC::XN::SET } else { LEAF_DESC::XN::CLEAR });
        self.value = reg.get();
    }

    pub fn set_pxn(&mut self, value: bool) {
        self.require_leaf().unwrap_or_else(|e| e.abort());
        let reg = self.leaf_reg();
        reg.modify(if value { LEAF_DESC::PXN::SET } else { LEAF_DESC::PXN::CLEAR });
        self.value = reg.get();
    }
}

fn kind_name(kind: Kind) -> &'static str {
    match kind {
        Kind::Invalid => "Invalid",
        Kind::Reserved => "Reserved",
        Kind::Table => "Table",
        Kind::Block => "Block",
        Kind::Page => "Page",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l0_valid_is_always_table() {
        let d = Descriptor::new(TTGranule::Granule4K, TTLevel::L0, 0b11);
        assert_eq!(d.kind(), Kind::Table);
    }

    #[test]
    fn l1_64k_valid_is_always_table() {
        let d = Descriptor::new(TTGranule::Granule64K, TTLevel::L1, 0b01);
        assert_eq!(d.kind(), Kind::Table);
    }

    #[test]
    fn l3_reserved_vs_page() {
        let reserved = Descriptor::new(TTGranule::Granule4K, TTLevel::L3, 0b01);
        assert_eq!(reserved.kind(), Kind::Reserved);
        let page = Descriptor::new(TTGranule::Granule4K, TTLevel::L3, 0b11);
        assert_eq!(page.kind(), Kind::Page);
    }

    #[test]
    fn invalid_descriptor_has_zero_output_address() {
        let d = Descriptor::new(TTGranule::Granule4K, TTLevel::L3, 0);
        assert_eq!(d.get_output_address().as_u64(), 0);
    }

    #[test]
    fn output_address_round_trips_masked_to_field() {
        let mut d = Descriptor::new(TTGranule::Granule4K, TTLevel::L3, 0b11);
        d.set_output_address(PhysAddr::new(0x1_2345_6000));
        assert_eq!(d.get_output_address().as_u64(), 0x1_2345_6000);
    }

    #[test]
    fn l2_block_address_field_varies_by_granule() {
        let mut d4k = Descriptor::new(TTGranule::Granule4K, TTLevel::L2, 0b01);
        d4k.set_output_address(PhysAddr::new(1 << 21));
        assert_eq!(d4k.get_output_address().as_u64(), 1 << 21);

        let mut d64k = Descriptor::new(TTGranule::Granule64K, TTLevel::L2, 0b01);
        d64k.set_output_address(PhysAddr::new(1 << 29));
        assert_eq!(d64k.get_output_address().as_u64(), 1 << 29);
    }

    #[test]
    #[should_panic]
    fn leaf_accessor_on_table_descriptor_aborts() {
        let d = Descriptor::new(TTGranule::Granule4K, TTLevel::L1, 0b11);
        let _ = d.xn();
    }

    fn any_granule() -> impl proptest::strategy::Strategy<Value = TTGranule> {
        proptest::prop_oneof![
            proptest::strategy::Just(TTGranule::Granule4K),
            proptest::strategy::Just(TTGranule::Granule16K),
            proptest::strategy::Just(TTGranule::Granule64K),
        ]
    }

    fn any_level() -> impl proptest::strategy::Strategy<Value = TTLevel> {
        proptest::prop_oneof![
            proptest::strategy::Just(TTLevel::L0),
            proptest::strategy::Just(TTLevel::L1),
            proptest::strategy::Just(TTLevel::L2),
            proptest::strategy::Just(TTLevel::L3),
        ]
    }

    proptest::proptest! {
        /// Exactly one of `Kind`'s five variants holds for any (granule,
        /// level, raw value) triple; classification never panics and never
        /// yields more than one true predicate.
        #[test]
        fn classification_is_exclusive_and_exhaustive(
            granule in any_granule(),
            level in any_level(),
            raw in proptest::num::u64::ANY,
        ) {
            let d = Descriptor::new(granule, level, raw);
            let predicates = [
                d.kind() == Kind::Invalid,
                d.is_table(),
                d.is_block(),
                d.is_page(),
                d.is_reserved(),
            ];
            let true_count = predicates.iter().filter(|p| **p).count();
            proptest::prop_assert_eq!(true_count, 1);
        }

        /// A table or leaf descriptor's output address round-trips through
        /// `set_output_address`/`get_output_address` once masked down to the
        /// bits the format's address field actually covers.
        #[test]
        fn output_address_round_trips_when_field_is_defined(
            granule in any_granule(),
            level in any_level(),
            raw in proptest::num::u64::ANY,
            addr in proptest::num::u64::ANY,
        ) {
            let mut d = Descriptor::new(granule, level, raw | 1);
            let low = match (d.kind(), d.level(), d.granule()) {
                (Kind::Table, _, TTGranule::Granule4K) => Some(12),
                (Kind::Table, _, TTGranule::Granule16K) => Some(14),
                (Kind::Table, _, TTGranule::Granule64K) => Some(16),
                (Kind::Page, TTLevel::L3, TTGranule::Granule4K) => Some(12),
                (Kind::Page, TTLevel::L3, TTGranule::Granule16K) => Some(14),
                (Kind::Page, TTLevel::L3, TTGranule::Granule64K) => Some(16),
                (Kind::Block, TTLevel::L1, TTGranule::Granule4K) => Some(30),
                (Kind::Block, TTLevel::L2, TTGranule::Granule4K) => Some(21),
                (Kind::Block, TTLevel::L2, TTGranule::Granule16K) => Some(25),
                (Kind::Block, TTLevel::L2, TTGranule::Granule64K) => Some(29),
                _ => None,
            };
            d.set_output_address(PhysAddr::new(addr));
            if let Some(low) = low {
                let mask = (1u64 << low) - 1;
                proptest::prop_assert_eq!(d.get_output_address().as_u64(), addr & !mask);
            }
        }
    }
}
