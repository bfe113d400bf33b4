/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Virtual-address decomposition: given a granule and a region-size offset,
//! compute the byte offset of the descriptor for a given translation level
//! within that level's table.

use crate::error::PreconditionViolation;
use crate::platform::{TTGranule, TTLevel, VirtAddr};

const ENTRY_SIZE: u32 = 8;

/// A virtual address interpreted under a fixed (granule, region_size_offset)
/// translation regime.
#[derive(Debug, Clone, Copy)]
pub struct VirtualAddress {
    addr: VirtAddr,
    granule: TTGranule,
    region_size_offset: u32,
}

impl VirtualAddress {
    pub fn new(addr: VirtAddr, granule: TTGranule, region_size_offset: u32) -> Self {
        VirtualAddress {
            addr,
            granule,
            region_size_offset,
        }
    }

    /// The input address with the high, excluded bits masked off.
    fn masked(&self) -> u64 {
        let keep_bits = 64 - self.region_size_offset;
        if keep_bits >= 64 {
            self.addr.as_u64()
        } else {
            self.addr.as_u64() & ((1u64 << keep_bits) - 1)
        }
    }

    fn page_offset_bits(&self) -> u32 {
        self.granule.size().trailing_zeros()
    }

    /// Bit position of the level-index field's least-significant bit.
    fn shift_for_level(&self, level: TTLevel) -> Result<u32, PreconditionViolation> {
        let mut shift = self.page_offset_bits();
        let mut probe = TTLevel::L3;
        loop {
            if probe == level {
                return Ok(shift);
            }
            let width = self
                .granule
                .index_width(probe)
                .ok_or(PreconditionViolation::UnsupportedLevel {
                    granule: self.granule,
                    level: probe,
                })?;
            shift += width;
            if probe == TTLevel::L0 {
                return Err(PreconditionViolation::UnsupportedLevel {
                    granule: self.granule,
                    level,
                });
            }
            probe = probe.prev();
        }
    }

    /// Byte offset of this address's descriptor within the given level's
    /// table (i.e. the level-index multiplied by the 8-byte entry size).
    pub fn offset_for_level(&self, level: TTLevel) -> Result<u64, PreconditionViolation> {
        let width = self
            .granule
            .index_width(level)
            .ok_or(PreconditionViolation::UnsupportedLevel {
                granule: self.granule,
                level,
            })?;
        let shift = self.shift_for_level(level)?;
        let index = (self.masked() >> shift) & ((1u64 << width) - 1);
        Ok(index * u64::from(ENTRY_SIZE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_widths_4k_are_nine_bits_each() {
        let va = VirtualAddress::new(VirtAddr::new(0), TTGranule::Granule4K, 25);
        for level in [TTLevel::L0, TTLevel::L1, TTLevel::L2, TTLevel::L3] {
            assert!(va.offset_for_level(level).is_ok());
        }
    }

    #[test]
    fn l0_under_64k_is_unsupported() {
        let va = VirtualAddress::new(VirtAddr::new(0), TTGranule::Granule64K, 16);
        assert!(va.offset_for_level(TTLevel::L0).is_err());
    }

    #[test]
    fn offset_is_entry_size_multiple_of_index() {
        // index 1 at L3 under 4K granule: bits [20:12].
        let addr = VirtAddr::new(1u64 << 12);
        let va = VirtualAddress::new(addr, TTGranule::Granule4K, 25);
        assert_eq!(va.offset_for_level(TTLevel::L3).unwrap(), 8);
    }
}
