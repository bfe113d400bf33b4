/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Translation Control Register parsing and the per-Exception-Level MMU
//! configuration store.

use crate::error::PreconditionViolation;
use crate::platform::{ExceptionLevel, TTGranule, TTLevel};
use tock_registers::interfaces::Readable;
use tock_registers::register_bitfields;
use tock_registers::registers::InMemoryRegister;

register_bitfields! [u64,
    pub TCR_EL1 [
        TG1 OFFSET(30) NUMBITS(2) [
            Reserved = 0b00,
            Granule16K = 0b01,
            Granule4K = 0b10,
            Granule64K = 0b11
        ],
        T1SZ OFFSET(16) NUMBITS(6) [],
        TG0 OFFSET(14) NUMBITS(2) [
            Granule4K = 0b00,
            Granule64K = 0b01,
            Granule16K = 0b10,
            Reserved = 0b11
        ],
        T0SZ OFFSET(0) NUMBITS(6) []
    ]
];

register_bitfields! [u32,
    pub TCR_EL23 [
        TG0 OFFSET(14) NUMBITS(2) [
            Granule4K = 0b00,
            Granule64K = 0b01,
            Granule16K = 0b10,
            Reserved = 0b11
        ],
        T0SZ OFFSET(0) NUMBITS(6) []
    ]
];

/// Effective translation parameters for one Exception Level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MMUConfig {
    pub granule: TTGranule,
    pub initial_level: Option<TTLevel>,
    pub region_size_offset: u32,
}

impl MMUConfig {
    const fn undefined() -> Self {
        MMUConfig {
            granule: TTGranule::Granule4K,
            initial_level: None,
            region_size_offset: 0,
        }
    }
}

/// `deriveInitialLevel` from ARM ARM tables D4-11/14/17.
pub fn derive_initial_level(
    granule: TTGranule,
    rso: u32,
) -> Result<TTLevel, PreconditionViolation> {
    use TTGranule::*;
    use TTLevel::*;
    let level = match granule {
        Granule4K => match rso {
            16..=24 => L0,
            25..=33 => L1,
            34..=39 => L2,
            _ => return Err(PreconditionViolation::RegionSizeOffsetOutOfRange { offset: rso }),
        },
        Granule16K => match rso {
            16 => L0,
            17..=27 => L1,
            28..=38 => L2,
            39 => L3,
            _ => return Err(PreconditionViolation::RegionSizeOffsetOutOfRange { offset: rso }),
        },
        Granule64K => match rso {
            16..=21 => L1,
            22..=34 => L2,
            35..=39 => L3,
            _ => return Err(PreconditionViolation::RegionSizeOffsetOutOfRange { offset: rso }),
        },
    };
    Ok(level)
}

fn config_from(granule: TTGranule, rso: u32) -> MMUConfig {
    if rso == 0 {
        return MMUConfig::undefined();
    }
    match derive_initial_level(granule, rso) {
        Ok(level) => MMUConfig {
            granule,
            initial_level: Some(level),
            region_size_offset: rso,
        },
        Err(violation) => violation.abort(),
    }
}

/// Parses TCR register values into per-Exception-Level `MMUConfig`s.
///
/// EL1 is special: its single TCR carries two independent regimes, TTBR0
/// (used for EL0) and TTBR1 (used for EL1 itself), with TG1 encoded
/// differently from TG0.
pub struct MMUConfigParser {
    configs: [MMUConfig; 4],
}

impl MMUConfigParser {
    pub fn new() -> Self {
        MMUConfigParser {
            configs: [MMUConfig::undefined(); 4],
        }
    }

    pub fn set_tcr_el1(&mut self, value: u64) {
        let reg: InMemoryRegister<u64, TCR_EL1::Register> = InMemoryRegister::new(value);

        let tg0 = match reg.read(TCR_EL1::TG0) {
            0b00 => TTGranule::Granule4K,
            0b01 => TTGranule::Granule64K,
            0b10 => TTGranule::Granule16K,
            _ => TTGranule::Granule4K,
        };
        let t0sz = reg.read(TCR_EL1::T0SZ) as u32;
        self.configs[ExceptionLevel::EL0 as usize] = config_from(tg0, t0sz);

        let tg1 = match reg.read(TCR_EL1::TG1) {
            0b01 => TTGranule::Granule16K,
            0b10 => TTGranule::Granule4K,
            0b11 => TTGranule::Granule64K,
            _ => TTGranule::Granule4K,
        };
        let t1sz = reg.read(TCR_EL1::T1SZ) as u32;
        self.configs[ExceptionLevel::EL1 as usize] = config_from(tg1, t1sz);
    }

    pub fn set_tcr_el2(&mut self, value: u32) {
        let reg: InMemoryRegister<u32, TCR_EL23::Register> = InMemoryRegister::new(value);
        let tg0 = match reg.read(TCR_EL23::TG0) {
            0b00 => TTGranule::Granule4K,
            0b01 => TTGranule::Granule64K,
            0b10 => TTGranule::Granule16K,
            _ => TTGranule::Granule4K,
        };
        let t0sz = reg.read(TCR_EL23::T0SZ);
        self.configs[ExceptionLevel::EL2 as usize] = config_from(tg0, t0sz);
    }

    pub fn set_tcr_el3(&mut self, value: u32) {
        let reg: InMemoryRegister<u32, TCR_EL23::Register> = InMemoryRegister::new(value);
        let tg0 = match reg.read(TCR_EL23::TG0) {
            0b00 => TTGranule::Granule4K,
            0b01 => TTGranule::Granule64K,
            0b10 => TTGranule::Granule16K,
            _ => TTGranule::Granule4K,
        };
        let t0sz = reg.read(TCR_EL23::T0SZ);
        self.configs[ExceptionLevel::EL3 as usize] = config_from(tg0, t0sz);
    }

    pub fn get_config_for(&self, el: ExceptionLevel) -> MMUConfig {
        self.configs[el as usize]
    }

    pub fn clear(&mut self) {
        self.configs = [MMUConfig::undefined(); 4];
    }
}

impl Default for MMUConfigParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_initial_level_matches_table() {
        assert_eq!(
            derive_initial_level(TTGranule::Granule4K, 28).unwrap(),
            TTLevel::L1
        );
        assert_eq!(
            derive_initial_level(TTGranule::Granule16K, 16).unwrap(),
            TTLevel::L0
        );
        assert_eq!(
            derive_initial_level(TTGranule::Granule64K, 35).unwrap(),
            TTLevel::L3
        );
        assert!(derive_initial_level(TTGranule::Granule4K, 15).is_err());
    }

    #[test]
    fn scenario_tcr_el1_yields_4k_l1_rso_28() {
        let mut parser = MMUConfigParser::new();
        parser.set_tcr_el1(0x2A51C251C);
        let el1 = parser.get_config_for(ExceptionLevel::EL1);
        assert_eq!(el1.granule, TTGranule::Granule4K);
        assert_eq!(el1.initial_level, Some(TTLevel::L1));
        assert_eq!(el1.region_size_offset, 28);
    }

    #[test]
    fn clear_resets_all_slots_to_undefined() {
        let mut parser = MMUConfigParser::new();
        parser.set_tcr_el1(0x2A51C251C);
        parser.clear();
        assert_eq!(parser.get_config_for(ExceptionLevel::EL1).initial_level, None);
    }
}
