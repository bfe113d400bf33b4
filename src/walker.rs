/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Forward and reverse walks of a translation-table chain, and physical
//! address resolution built on top of them.

use crate::descriptor::Descriptor;
use crate::platform::{PhysAddr, TTLevel, VirtAddr};
use crate::tcr::MMUConfig;
use crate::va::VirtualAddress;

/// The host-supplied capabilities the walker needs: reading a raw
/// descriptor word out of target memory, and mapping a physical
/// next-table address back to a virtual one the host can dereference.
///
/// Implementations must be synchronous and must not call back into this
/// crate; see the concurrency model for the full primitives contract.
pub trait TranslationPrimitives {
    fn read_address(&self, va: VirtAddr) -> u64;
    fn physical_to_virtual(&self, pa: PhysAddr) -> VirtAddr;
}

/// What a callback wants the walk to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlow {
    Continue,
    Stop,
}

/// Walker position at the start of one loop iteration.
#[derive(Debug, Clone, Copy)]
pub struct Position {
    pub level: TTLevel,
    pub table_address: VirtAddr,
    pub entry_offset: u64,
}

/// Outcome discriminant of a `walk_to` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkOutcome {
    Complete,
    Stopped,
    Failed,
    Undefined,
}

#[derive(Debug, Clone, Copy)]
pub struct WalkResult {
    pub outcome: WalkOutcome,
    pub level_reached: Option<TTLevel>,
    pub descriptor_observed: Option<Descriptor>,
    pub output_address: PhysAddr,
}

impl WalkResult {
    fn undefined() -> Self {
        WalkResult {
            outcome: WalkOutcome::Undefined,
            level_reached: None,
            descriptor_observed: None,
            output_address: PhysAddr::invalid(),
        }
    }

    fn failed(level: TTLevel, descriptor: Option<Descriptor>) -> Self {
        WalkResult {
            outcome: WalkOutcome::Failed,
            level_reached: Some(level),
            descriptor_observed: descriptor,
            output_address: PhysAddr::invalid(),
        }
    }

    fn stopped(level: TTLevel, descriptor: Descriptor, output_address: PhysAddr) -> Self {
        WalkResult {
            outcome: WalkOutcome::Stopped,
            level_reached: Some(level),
            descriptor_observed: Some(descriptor),
            output_address,
        }
    }

    fn complete(level: TTLevel, descriptor: Descriptor, output_address: PhysAddr) -> Self {
        WalkResult {
            outcome: WalkOutcome::Complete,
            level_reached: Some(level),
            descriptor_observed: Some(descriptor),
            output_address,
        }
    }
}

/// Walks translation tables rooted at a fixed base, under a fixed MMU
/// config, using host-supplied primitives for memory access.
pub struct TTWalker<'p> {
    config: MMUConfig,
    table_base: VirtAddr,
    primitives: &'p dyn TranslationPrimitives,
}

impl<'p> TTWalker<'p> {
    pub fn new(config: MMUConfig, table_base: VirtAddr, primitives: &'p dyn TranslationPrimitives) -> Self {
        TTWalker {
            config,
            table_base,
            primitives,
        }
    }

    fn read_descriptor(&self, table_address: VirtAddr, entry_offset: u64, level: TTLevel) -> Descriptor {
        let raw = self.primitives.read_address(table_address + entry_offset);
        Descriptor::new(self.config.granule, level, raw)
    }

    /// Walks from the translation-table base to the descriptor backing
    /// `target_va`, invoking `callback` at every level visited.
    ///
    /// `callback` receives a mutable handle to the descriptor just read. Any
    /// change it makes (e.g. repointing the output address at a freshly
    /// cloned page) is what this walk itself then descends through — the
    /// same descriptor instance drives both this loop's own next-level
    /// lookup and whatever the caller does with it, so a callback that
    /// relocates a level transparently redirects the rest of the walk onto
    /// the clone instead of the original.
    pub fn walk_to(
        &self,
        target_va: VirtAddr,
        mut callback: impl FnMut(&Position, &mut Descriptor) -> ControlFlow,
    ) -> WalkResult {
        let Some(mut level) = self.config.initial_level else {
            log::debug!("walk_to: config has no initial level");
            return WalkResult::undefined();
        };

        let mut table_address = self.table_base;
        let va = VirtualAddress::new(target_va, self.config.granule, self.config.region_size_offset);

        loop {
            let entry_offset = match va.offset_for_level(level) {
                Ok(offset) => offset,
                Err(_) => return WalkResult::undefined(),
            };
            let mut descriptor = self.read_descriptor(table_address, entry_offset, level);
            log::trace!(
                "walk_to: level={level:?} table={table_address:x} offset={entry_offset:#x} raw={:#018x}",
                descriptor.get_descriptor()
            );
            let position = Position {
                level,
                table_address,
                entry_offset,
            };

            match level {
                TTLevel::L0 => {
                    if !descriptor.is_table() {
                        log::debug!("walk_to: L0 entry is not a valid table descriptor");
                        return WalkResult::failed(level, Some(descriptor));
                    }
                    if callback(&position, &mut descriptor) == ControlFlow::Stop {
                        return WalkResult::stopped(level, descriptor, descriptor.get_output_address());
                    }
                    table_address = self.primitives.physical_to_virtual(descriptor.get_output_address());
                }
                TTLevel::L1 | TTLevel::L2 => {
                    if !descriptor.is_valid() {
                        log::debug!("walk_to: {level:?} entry is not valid");
                        return WalkResult::failed(level, Some(descriptor));
                    }
                    if callback(&position, &mut descriptor) == ControlFlow::Stop {
                        return WalkResult::stopped(level, descriptor, descriptor.get_output_address());
                    }
                    if descriptor.is_block() {
                        return WalkResult::complete(level, descriptor, descriptor.get_output_address());
                    }
                    table_address = self.primitives.physical_to_virtual(descriptor.get_output_address());
                }
                TTLevel::L3 => {
                    if !descriptor.is_page() {
                        log::debug!("walk_to: L3 entry is not a valid page descriptor");
                        return WalkResult::failed(level, Some(descriptor));
                    }
                    if callback(&position, &mut descriptor) == ControlFlow::Stop {
                        return WalkResult::stopped(level, descriptor, descriptor.get_output_address());
                    }
                    return WalkResult::complete(level, descriptor, descriptor.get_output_address());
                }
            }

            if table_address.is_invalid() {
                return WalkResult::failed(level, None);
            }
            level = level.next();
        }
    }

    /// Resolves `va` to its physical mapping, masking in the within-granule
    /// byte offset. When the walk terminates at a block, the intra-block
    /// offset beyond `granule - 1` is not reconstructed; this mirrors a
    /// known limitation rather than a bug, see the design notes.
    pub fn find_physical_address(&self, va: VirtAddr) -> PhysAddr {
        let result = self.walk_to(va, |_, _| ControlFlow::Continue);
        if result.outcome != WalkOutcome::Complete {
            return PhysAddr::invalid();
        }
        let granule_mask = self.config.granule.size() - 1;
        PhysAddr::new(result.output_address.as_u64() | (va.as_u64() & granule_mask))
    }

    /// Runs a forward `walk_to` with a collecting callback, then replays the
    /// recorded `(position, descriptor)` pairs to `callback` from the
    /// deepest level visited back up to the shallowest.
    pub fn reverse_walk_from(
        &self,
        va: VirtAddr,
        mut callback: impl FnMut(&Position, &Descriptor) -> ControlFlow,
    ) -> bool {
        let mut visited: Vec<(Position, Descriptor)> = Vec::new();
        let result = self.walk_to(va, |position, descriptor| {
            visited.push((*position, *descriptor));
            ControlFlow::Continue
        });
        if result.outcome != WalkOutcome::Complete {
            return false;
        }
        for (position, descriptor) in visited.iter().rev() {
            if callback(position, descriptor) == ControlFlow::Stop {
                return false;
            }
        }
        true
    }
}
