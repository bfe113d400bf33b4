/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Two-phase relocation of a translation-table chain onto freshly allocated
//! clone pages, with commit/cancel and a ref-counted restore.

use crate::descriptor::Descriptor;
use crate::platform::{PhysAddr, TTLevel, VirtAddr};
use crate::tcr::MMUConfig;
use crate::walker::{ControlFlow, Position, TTWalker, TranslationPrimitives};
use std::collections::HashMap;

/// Capabilities `PageRelocator` needs beyond plain table walking: writing a
/// descriptor back, bulk-copying a sub-table or leaf page, and managing
/// physical-memory clones.
pub trait RelocationPrimitives: TranslationPrimitives {
    fn write_address(&self, va: VirtAddr, value: u64);
    fn copy_in_kernel(&self, dst: VirtAddr, src: VirtAddr, size: u64);
    /// Allocates a granule-sized physical page and returns a virtual alias
    /// usable for an immediate host-side copy.
    fn alloc_in_physical_memory(&self, size: u64) -> VirtAddr;
    /// Returns `false` if the clone could not be freed.
    fn dealloc_in_physical_memory(&self, clone_virt: VirtAddr, size: u64) -> bool;
    fn virtual_to_physical(&self, va: VirtAddr) -> PhysAddr;
}

/// Adapts a `&dyn RelocationPrimitives` into the narrower
/// `TranslationPrimitives` the walker needs, without relying on trait-object
/// upcasting.
struct Forwarding<'a>(&'a dyn RelocationPrimitives);

impl<'a> TranslationPrimitives for Forwarding<'a> {
    fn read_address(&self, va: VirtAddr) -> u64 {
        self.0.read_address(va)
    }

    fn physical_to_virtual(&self, pa: PhysAddr) -> VirtAddr {
        self.0.physical_to_virtual(pa)
    }
}

#[derive(Debug, Clone, Copy)]
struct CloneRecord {
    original_descriptor: u64,
    allocated_clone_virt: VirtAddr,
    ref_count: u32,
}

#[derive(Debug, Clone, Copy)]
struct StagingRecord {
    target_page_va: VirtAddr,
    clone_phys_for_leaf: PhysAddr,
    clone_virt_for_leaf: VirtAddr,
    pending_descriptor: Descriptor,
    walk_position_of_leaf: Position,
    original_leaf_descriptor: Descriptor,
}

enum UnwindAction {
    Reused {
        clone_phys: PhysAddr,
    },
    Created {
        position: Position,
        original_raw: u64,
        clone_phys: PhysAddr,
        clone_virt: VirtAddr,
    },
}

/// Drives a `TTWalker` to relocate the table chain backing a virtual
/// address onto freshly allocated clones, one relocation staged at a time.
pub struct PageRelocator<'p> {
    config: MMUConfig,
    table_base: VirtAddr,
    primitives: &'p dyn RelocationPrimitives,
    relocated_pages: Vec<VirtAddr>,
    relocation_map: HashMap<PhysAddr, CloneRecord>,
    pending: bool,
    staging: Option<StagingRecord>,
}

impl<'p> PageRelocator<'p> {
    pub fn new(config: MMUConfig, table_base: VirtAddr, primitives: &'p dyn RelocationPrimitives) -> Self {
        PageRelocator {
            config,
            table_base,
            primitives,
            relocated_pages: Vec::new(),
            relocation_map: HashMap::new(),
            pending: false,
            staging: None,
        }
    }

    fn target_page_va(&self, va: VirtAddr) -> VirtAddr {
        let granule_size = self.config.granule.size();
        VirtAddr::new(va.as_u64() & !(granule_size - 1))
    }

    /// Stages a relocation of the table chain backing `va`. Returns the
    /// virtual address of the newly allocated leaf clone, or
    /// `VirtAddr::invalid()` on failure. `callback` is invoked once per
    /// freshly cloned level (not on reused intermediate clones) with the
    /// pre-mutation snapshot and a mutable handle to the post-mutation
    /// descriptor, so attribute bits (e.g. XN/PXN) can be patched before the
    /// descriptor is written back.
    pub fn prepare_page_relocation_for(
        &mut self,
        va: VirtAddr,
        mut callback: impl FnMut(TTLevel, Descriptor, &mut Descriptor),
    ) -> VirtAddr {
        let target_page_va = self.target_page_va(va);

        if self.relocated_pages.contains(&target_page_va) {
            log::debug!("prepare_page_relocation_for: {target_page_va:x} is already relocated");
            return VirtAddr::invalid();
        }
        if self.pending {
            self.cancel_relocation();
        }

        let config = self.config;
        let table_base = self.table_base;
        let primitives = self.primitives;
        let granule_size = config.granule.size();

        let forwarding = Forwarding(primitives);
        let walker = TTWalker::new(config, table_base, &forwarding);

        let mut actions: Vec<UnwindAction> = Vec::new();
        let mut new_staging: Option<StagingRecord> = None;
        let relocation_map = &mut self.relocation_map;

        // Delegate the descent itself to the walker, handing it a mutable
        // descriptor at every level. Once a level's child is cloned, setting
        // the descriptor's output address to the clone is enough: the walker
        // reads that same descriptor back to find the next level's table, so
        // the rest of this walk transparently follows the clone chain rather
        // than the untouched original.
        walker.walk_to(va, |position, descriptor| {
            let is_leaf_level = match position.level {
                TTLevel::L0 => false,
                TTLevel::L1 | TTLevel::L2 => descriptor.is_block(),
                TTLevel::L3 => true,
            };
            let output = descriptor.get_output_address();

            if let Some(record) = relocation_map.get_mut(&output) {
                record.ref_count += 1;
                log::trace!(
                    "prepare_page_relocation_for: reusing clone at {output:x}, ref_count now {}",
                    record.ref_count
                );
                actions.push(UnwindAction::Reused { clone_phys: output });
                // The real entry already points at this clone from whatever
                // earlier call created it, so no mutation is needed here.
            } else {
                let clone_virt = primitives.alloc_in_physical_memory(granule_size);
                assert!(
                    clone_virt.is_aligned(granule_size),
                    "alloc_in_physical_memory returned a misaligned clone"
                );
                let source = primitives.physical_to_virtual(output);
                primitives.copy_in_kernel(clone_virt, source, granule_size);
                let clone_phys = primitives.virtual_to_physical(clone_virt);

                let original_snapshot = descriptor.snapshot();
                descriptor.set_output_address(clone_phys);
                callback(position.level, original_snapshot, descriptor);

                if is_leaf_level {
                    log::trace!("prepare_page_relocation_for: staged leaf clone at {clone_phys:x}");
                    new_staging = Some(StagingRecord {
                        target_page_va,
                        clone_phys_for_leaf: clone_phys,
                        clone_virt_for_leaf: clone_virt,
                        pending_descriptor: descriptor.snapshot(),
                        walk_position_of_leaf: *position,
                        original_leaf_descriptor: original_snapshot,
                    });
                } else {
                    primitives.write_address(position.table_address + position.entry_offset, descriptor.get_descriptor());
                    relocation_map.insert(
                        clone_phys,
                        CloneRecord {
                            original_descriptor: original_snapshot.get_descriptor(),
                            allocated_clone_virt: clone_virt,
                            ref_count: 1,
                        },
                    );
                    actions.push(UnwindAction::Created {
                        position: *position,
                        original_raw: original_snapshot.get_descriptor(),
                        clone_phys,
                        clone_virt,
                    });
                    log::trace!("prepare_page_relocation_for: cloned intermediate table at level {:?}", position.level);
                }
            }

            if is_leaf_level {
                ControlFlow::Stop
            } else {
                ControlFlow::Continue
            }
        });

        if new_staging.is_none() {
            log::debug!(
                "prepare_page_relocation_for: walk did not reach a leaf, unwinding {} action(s)",
                actions.len()
            );
            for action in actions.into_iter().rev() {
                match action {
                    UnwindAction::Reused { clone_phys } => {
                        if let Some(record) = self.relocation_map.get_mut(&clone_phys) {
                            record.ref_count = record.ref_count.saturating_sub(1);
                        }
                    }
                    UnwindAction::Created {
                        position,
                        original_raw,
                        clone_phys,
                        clone_virt,
                    } => {
                        self.primitives
                            .write_address(position.table_address + position.entry_offset, original_raw);
                        self.relocation_map.remove(&clone_phys);
                        self.primitives.dealloc_in_physical_memory(clone_virt, granule_size);
                    }
                }
            }
            return VirtAddr::invalid();
        }

        let staging = new_staging.expect("checked above");
        let leaf_virt = staging.clone_virt_for_leaf;
        self.staging = Some(staging);
        self.pending = true;
        leaf_virt
    }

    /// Writes the staged leaf descriptor back and records the relocation as
    /// committed. Returns false if nothing was pending.
    pub fn complete_relocation(&mut self) -> bool {
        let Some(staging) = self.staging.take() else {
            return false;
        };
        self.primitives.write_address(
            staging.walk_position_of_leaf.table_address + staging.walk_position_of_leaf.entry_offset,
            staging.pending_descriptor.get_descriptor(),
        );
        self.relocation_map.insert(
            staging.clone_phys_for_leaf,
            CloneRecord {
                original_descriptor: staging.original_leaf_descriptor.get_descriptor(),
                allocated_clone_virt: staging.clone_virt_for_leaf,
                ref_count: 1,
            },
        );
        self.relocated_pages.push(staging.target_page_va);
        self.pending = false;
        log::debug!("complete_relocation: committed {:x}", staging.target_page_va);
        true
    }

    /// Abandons the pending relocation: the staged leaf clone is freed and
    /// any already-written intermediate clones are unwound via
    /// `restore_page_for`. Returns false if nothing was pending.
    pub fn cancel_relocation(&mut self) -> bool {
        if !self.pending {
            return false;
        }
        let target_page_va = self
            .staging
            .as_ref()
            .expect("pending implies staging is Some")
            .target_page_va;
        log::debug!("cancel_relocation: {target_page_va:x}");
        self.restore_page_for(target_page_va)
    }

    /// Prepares and immediately commits a relocation for `va`.
    pub fn relocate_page_for(
        &mut self,
        va: VirtAddr,
        callback: impl FnMut(TTLevel, Descriptor, &mut Descriptor),
    ) -> VirtAddr {
        let leaf = self.prepare_page_relocation_for(va, callback);
        if leaf.is_invalid() {
            return leaf;
        }
        if !self.complete_relocation() {
            return VirtAddr::invalid();
        }
        leaf
    }

    /// Reverses a committed or pending relocation for `va`, decrementing
    /// shared intermediate clones' ref counts and only freeing a clone once
    /// its last referencing relocation is restored.
    pub fn restore_page_for(&mut self, va: VirtAddr) -> bool {
        let target_page_va = self.target_page_va(va);

        let was_pending = self.pending
            && self
                .staging
                .as_ref()
                .map(|s| s.target_page_va == target_page_va)
                .unwrap_or(false);
        let was_committed = self.relocated_pages.contains(&target_page_va);
        if !was_pending && !was_committed {
            log::debug!("restore_page_for: {target_page_va:x} is neither committed nor pending");
            return false;
        }

        let granule_size = self.config.granule.size();

        if was_pending {
            if let Some(staging) = &self.staging {
                self.primitives
                    .dealloc_in_physical_memory(staging.clone_virt_for_leaf, granule_size);
            }
        }

        let config = self.config;
        let table_base = self.table_base;
        let primitives = self.primitives;
        let forwarding = Forwarding(primitives);
        let walker = TTWalker::new(config, table_base, &forwarding);
        let relocation_map = &mut self.relocation_map;

        walker.reverse_walk_from(target_page_va, |position, descriptor| {
            let output = descriptor.get_output_address();
            if let Some(record) = relocation_map.get_mut(&output) {
                record.ref_count -= 1;
                log::trace!("restore_page_for: {output:x} ref_count now {}", record.ref_count);
                if record.ref_count == 0 {
                    let mut original = descriptor.snapshot();
                    original.set_descriptor(record.original_descriptor);
                    primitives.write_address(
                        position.table_address + position.entry_offset,
                        original.get_descriptor(),
                    );
                    primitives.dealloc_in_physical_memory(record.allocated_clone_virt, granule_size);
                    relocation_map.remove(&output);
                }
            }
            ControlFlow::Continue
        });

        if was_pending {
            self.pending = false;
            self.staging = None;
        } else {
            self.relocated_pages.retain(|&p| p != target_page_va);
        }
        true
    }

    pub fn is_page_relocated_for(&self, va: VirtAddr) -> bool {
        self.relocated_pages.contains(&self.target_page_va(va))
    }

    pub fn is_relocation_pending_for(&self, va: VirtAddr) -> bool {
        let target_page_va = self.target_page_va(va);
        self.pending
            && self
                .staging
                .as_ref()
                .map(|s| s.target_page_va == target_page_va)
                .unwrap_or(false)
    }
}
