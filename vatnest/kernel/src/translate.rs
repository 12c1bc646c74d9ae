// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Moving references between the kernel space and a vat's local space.
//!
//! Outbound (kernel to vat) translation inserts c-list entries on demand:
//! every kref appearing in a delivery is guaranteed to be addressable by
//! the receiving vat. Inbound (vat to kernel) translation creates kernel
//! records the first time a vat exports something, and refuses references
//! the vat was never told about.

use fnv::FnvHashMap;

use vatnest_kernel_core::{
    CapData, Decider, KernelError, KernelRef, KernelResult, VatId, VatRef,
};
use vatnest_kernel_message::queue::RunQueueItem;
use vatnest_storage::KVWrite;

use crate::state::{KernelState, PromiseStatus};

impl<T: KVWrite> KernelState<T> {
    /// Vat-to-kernel direction for a vat-allocated vref (`o+`/`p+`).
    ///
    /// First appearance creates the object/promise record owned (decided)
    /// by the exporting vat. Re-exporting an object the kernel had dropped
    /// makes it reachable again.
    pub fn export_from_vat(&mut self, vat: VatId, vref: VatRef) -> KernelResult<KernelRef> {
        debug_assert!(vref.is_vat_allocated());
        if let Some(kref) = self.clist_kref_for(vat, vref)? {
            if !kref.is_promise() {
                if let Some((_, false)) = self.clist_entry(vat, kref)? {
                    self.clist_set_reachable(vat, kref, true)?;
                }
            }
            return Ok(kref);
        }
        let kref = match vref {
            VatRef::Object { .. } => self.create_object(vat)?,
            VatRef::Promise { .. } => self.create_promise(Decider::Vat(vat))?,
        };
        self.clist_add(vat, kref, vref, true)?;
        if kref.is_promise() {
            // Promise records are held by every c-list entry, the
            // decider's included.
            self.adjust_promise_refcount(kref, 1)?;
        }
        tracing::trace!(%vat, %vref, %kref, "new export");
        Ok(kref)
    }

    /// Kernel-to-vat direction: ensure `vat` can address `kref`.
    ///
    /// A fresh import bumps the object's counts (or the promise's single
    /// count), and translating an unresolved promise in subscribes the vat
    /// implicitly; translating a settled one queues an immediate notify so
    /// the vat is never left holding a promise it cannot learn about.
    pub fn import_to_vat(&mut self, vat: VatId, kref: KernelRef) -> KernelResult<VatRef> {
        if let Some((vref, reachable)) = self.clist_entry(vat, kref)? {
            if !reachable {
                self.clist_set_reachable(vat, kref, true)?;
                // The owner's export entry never figures in the counts.
                if !kref.is_promise() && self.object_owner(kref)? != Some(vat) {
                    self.adjust_object_refcount(kref, 1, 0)?;
                }
            }
            return Ok(vref);
        }
        match kref {
            KernelRef::Object(_) => {
                let owner = self.object_owner(kref)?.ok_or_else(|| {
                    KernelError::Corrupt(format!("translating unknown object {kref} into {vat}"))
                })?;
                if owner == vat {
                    // The owner's export entry only disappears at retirement,
                    // after which the kernel has no business mentioning it.
                    return Err(KernelError::Corrupt(format!(
                        "owner {vat} lost its export entry for {kref}"
                    )));
                }
                let vref = self.allocate_import_ref(vat, false)?;
                self.clist_add(vat, kref, vref, true)?;
                self.adjust_object_refcount(kref, 1, 1)?;
                Ok(vref)
            }
            KernelRef::Promise(_) => {
                let status = self.promise_status(kref)?.ok_or_else(|| {
                    KernelError::Corrupt(format!("translating unknown promise {kref} into {vat}"))
                })?;
                let vref = self.allocate_import_ref(vat, true)?;
                self.clist_add(vat, kref, vref, true)?;
                self.adjust_promise_refcount(kref, 1)?;
                match status {
                    PromiseStatus::Unresolved => {
                        if self.promise_decider(kref)? != Some(Decider::Vat(vat)) {
                            self.add_promise_subscriber(kref, vat)?;
                        }
                    }
                    _ => {
                        self.queue_push(RunQueueItem::Notify { vat_id: vat, kpid: kref })?;
                    }
                }
                Ok(vref)
            }
        }
    }

    /// Translate a payload into the vat's space, slots in array order,
    /// duplicates sharing one allocation.
    pub fn translate_capdata_to_vat(
        &mut self,
        vat: VatId,
        capdata: CapData<KernelRef>,
    ) -> KernelResult<CapData<VatRef>> {
        let mut memo: FnvHashMap<KernelRef, VatRef> = FnvHashMap::default();
        capdata.map_slots(|kref| {
            if let Some(vref) = memo.get(&kref) {
                return Ok(*vref);
            }
            let vref = self.import_to_vat(vat, kref)?;
            memo.insert(kref, vref);
            Ok(vref)
        })
    }

    /// A single vref the vat mentioned, into kernel space.
    pub fn translate_ref_from_vat(&mut self, vat: VatId, vref: VatRef) -> KernelResult<KernelRef> {
        if vref.is_vat_allocated() {
            self.export_from_vat(vat, vref)
        } else {
            self.clist_kref_for(vat, vref)?
                .ok_or_else(|| KernelError::InvalidSyscall {
                    vat,
                    reason: format!("unknown reference {vref}"),
                })
        }
    }

    /// Translate a payload out of the vat's space, verifying the body's
    /// slot discipline first.
    pub fn translate_capdata_from_vat(
        &mut self,
        vat: VatId,
        capdata: CapData<VatRef>,
    ) -> KernelResult<CapData<KernelRef>> {
        capdata.verify()?;
        let mut memo: FnvHashMap<VatRef, KernelRef> = FnvHashMap::default();
        capdata.map_slots(|vref| {
            if let Some(kref) = memo.get(&vref) {
                return Ok(*kref);
            }
            let kref = self.translate_ref_from_vat(vat, vref)?;
            memo.insert(vref, kref);
            Ok(kref)
        })
    }
}
