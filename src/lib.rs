/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! AArch64 VMSAv8-64 stage-1 translation-table inspection and relocation.
//!
//! The crate is split the way the translation hardware itself is layered:
//! [`tcr`] turns a raw Translation Control Register value into a per-level
//! [`tcr::MMUConfig`], [`descriptor`] models the 64-bit table entry format
//! across all granule/level combinations, [`walker`] walks a chain of
//! tables built from those entries, and [`relocator`] uses the walker to
//! stage, commit, cancel, and restore a relocation of that chain onto fresh
//! physical pages.
//!
//! None of this talks to real target memory: every operation goes through
//! host-supplied primitives ([`walker::TranslationPrimitives`] and
//! [`relocator::RelocationPrimitives`]), so the same code drives a live
//! debug probe, a memory snapshot, or an emulator.

pub mod descriptor;
pub mod error;
pub mod platform;
pub mod relocator;
pub mod tcr;
pub mod va;
pub mod walker;

pub use descriptor::{Descriptor, Kind};
pub use error::PreconditionViolation;
pub use platform::{ExceptionLevel, PhysAddr, TTGranule, TTLevel, VirtAddr, INVALID_ADDR};
pub use relocator::{PageRelocator, RelocationPrimitives};
pub use tcr::{MMUConfig, MMUConfigParser};
pub use walker::{ControlFlow, Position, TTWalker, TranslationPrimitives, WalkOutcome, WalkResult};
