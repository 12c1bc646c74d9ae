// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! The garbage-collection protocol.
//!
//! Vats report loss of interest through `dropImports`/`retireImports`/
//! `retireExports` syscalls, handled here inside the crank's transaction.
//! Between cranks the reaper inspects every kref whose count touched zero
//! (the `gc.maybeFree` side table) and turns the transitions into `gc`
//! run-queue entries: `dropExports` to the owner when reachability is
//! gone, `retireExports`/`retireImports` when recognizability is gone.
//!
//! The kernel never drops a vat's import without notice, and never retires
//! a kref a vat still references. The protocol does not collect cycles
//! that span vats; `collectGarbage` merely prompts every vat to publish
//! its local drops.

use std::collections::BTreeMap;

use vatnest_kernel_core::{KernelError, KernelRef, KernelResult, VatId};
use vatnest_kernel_message::queue::{GcKind, RunQueueItem};
use vatnest_storage::KVWrite;

use crate::state::{KernelState, PromiseStatus};

impl<T: KVWrite> KernelState<T> {
    /// `dropImports` syscall: the vat holds no more strong references.
    pub fn vat_drop_imports(&mut self, vat: VatId, krefs: &[KernelRef]) -> KernelResult<()> {
        for &kref in krefs {
            if kref.is_promise() {
                return Err(KernelError::InvalidSyscall {
                    vat,
                    reason: format!("cannot drop promise {kref}"),
                });
            }
            if self.object_owner(kref)? == Some(vat) {
                return Err(KernelError::InvalidSyscall {
                    vat,
                    reason: format!("cannot drop own export {kref}"),
                });
            }
            let (_, reachable) = self
                .clist_entry(vat, kref)?
                .ok_or(KernelError::ClistMiss { vat, kref })?;
            if reachable {
                self.clist_set_reachable(vat, kref, false)?;
                self.adjust_object_refcount(kref, -1, 0)?;
            }
        }
        Ok(())
    }

    /// `retireImports` syscall: the vat holds no references at all.
    /// Requires the import to have been dropped first.
    pub fn vat_retire_imports(&mut self, vat: VatId, krefs: &[KernelRef]) -> KernelResult<()> {
        for &kref in krefs {
            let (_, reachable) = self
                .clist_entry(vat, kref)?
                .ok_or(KernelError::ClistMiss { vat, kref })?;
            if reachable {
                return Err(KernelError::InvalidSyscall {
                    vat,
                    reason: format!("retiring {kref} before dropping it"),
                });
            }
            self.clist_remove(vat, kref)?;
            if !kref.is_promise() {
                self.adjust_object_refcount(kref, 0, -1)?;
            } else {
                self.adjust_promise_refcount(kref, -1)?;
            }
        }
        Ok(())
    }

    /// `retireExports` syscall: the owner says these exports are gone for
    /// good. Importers are told to retire, and the record goes away once
    /// their retires have drained the counts.
    pub fn vat_retire_exports(&mut self, vat: VatId, krefs: &[KernelRef]) -> KernelResult<()> {
        let mut per_importer: BTreeMap<VatId, Vec<KernelRef>> = BTreeMap::new();
        for &kref in krefs {
            let owner = self.object_owner(kref)?;
            if owner != Some(vat) {
                return Err(KernelError::InvalidSyscall {
                    vat,
                    reason: format!("retiring {kref} it does not own"),
                });
            }
            self.clist_remove(vat, kref)?;
            for importer in self.clist_importers(kref)? {
                per_importer.entry(importer).or_default().push(kref);
            }
            // With the owner entry gone, the reaper deletes the record as
            // soon as recognizability drains.
            self.note_maybe_free(kref)?;
        }
        for (importer, krefs) in per_importer {
            self.queue_push(RunQueueItem::Gc {
                vat_id: importer,
                kind: GcKind::RetireImports,
                krefs,
            })?;
        }
        Ok(())
    }

    /// The reaper: translate zero-transitions into gc queue entries.
    /// Runs in its own transaction between cranks, never inside one.
    /// Returns the number of gc entries queued.
    pub fn reap_maybe_free(&mut self) -> KernelResult<usize> {
        let mut queued = 0;
        // Deleting a promise record can release more references, so keep
        // draining until the side table stays empty.
        loop {
            let batch = self.take_maybe_free()?;
            if batch.is_empty() {
                return Ok(queued);
            }
            let mut drops: BTreeMap<VatId, Vec<KernelRef>> = BTreeMap::new();
            let mut retires: BTreeMap<VatId, Vec<KernelRef>> = BTreeMap::new();
            for kref in batch {
                if kref.is_promise() {
                    self.reap_promise(kref)?;
                    continue;
                }
                let Some((reachable, recognizable)) = self.object_refcount(kref)? else {
                    continue;
                };
                let owner = self.object_owner(kref)?;
                let owner_live = match owner {
                    Some(owner) => self.vat_is_live(owner)?,
                    None => false,
                };
                let owner_entry = match owner {
                    Some(owner) => self.clist_entry(owner, kref)?,
                    None => None,
                };
                if recognizable == 0 {
                    match (owner, owner_entry) {
                        (Some(owner), Some(_)) if owner_live => {
                            retires.entry(owner).or_default().push(kref);
                        }
                        _ => {
                            // Nobody left to tell; free the record now.
                            self.delete_object(kref)?;
                        }
                    }
                } else if reachable == 0 {
                    if let (Some(owner), Some((_, true))) = (owner, owner_entry) {
                        if owner_live {
                            // Flip the export flag here so the drop is
                            // emitted at most once until a re-export.
                            self.clist_set_reachable(owner, kref, false)?;
                            drops.entry(owner).or_default().push(kref);
                        }
                    }
                }
            }
            // Drops land before retires for the same kref; both batched
            // per destination vat.
            for (vat, krefs) in drops {
                self.queue_push(RunQueueItem::Gc {
                    vat_id: vat,
                    kind: GcKind::DropExports,
                    krefs,
                })?;
                queued += 1;
            }
            for (vat, krefs) in retires {
                self.queue_push(RunQueueItem::Gc {
                    vat_id: vat,
                    kind: GcKind::RetireExports,
                    krefs,
                })?;
                queued += 1;
            }
        }
    }

    /// A settled promise nobody references any more can go away; its value
    /// releases whatever it was holding.
    fn reap_promise(&mut self, kref: KernelRef) -> KernelResult<()> {
        match self.promise_status(kref)? {
            Some(PromiseStatus::Unresolved) | None => Ok(()),
            Some(_) => {
                if self.promise_refcount(kref)? > 0 {
                    return Ok(());
                }
                let value = self.promise_value(kref)?;
                self.delete_promise(kref)?;
                if let Some(value) = value {
                    for slot in value.slots {
                        self.release_kref(slot)?;
                    }
                }
                tracing::trace!(%kref, "retired settled promise");
                Ok(())
            }
        }
    }
}
