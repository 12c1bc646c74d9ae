// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Per-vat c-lists: the bidirectional kref-to-vref tables.
//!
//! Both directions are stored explicitly (`v<id>.o.<vref> -> kref` and
//! `v<id>.k.<kref> -> "<flag> <vref>"`) so either side of a translation is
//! one read. The kref-side value carries the reachability flag: `R` while
//! the entry holds a strong reference, `_` after the vat dropped it (or,
//! for the owner's own export entry, after `dropExports` was issued).

use vatnest_kernel_core::{KernelError, KernelRef, KernelResult, VatId, VatRef};
use vatnest_storage::{KVRead, KVWrite};

use crate::keys;
use crate::state::KernelState;

fn parse_entry(vat: VatId, kref: KernelRef, raw: &str) -> KernelResult<(VatRef, bool)> {
    let (flag, vref) = raw
        .split_once(' ')
        .ok_or_else(|| KernelError::Corrupt(format!("bad c-list entry {vat}/{kref}: {raw}")))?;
    let reachable = match flag {
        "R" => true,
        "_" => false,
        _ => {
            return Err(KernelError::Corrupt(format!(
                "bad c-list flag {vat}/{kref}: {raw}"
            )))
        }
    };
    Ok((vref.parse()?, reachable))
}

impl<T: KVRead> KernelState<T> {
    /// The kref a vat means when it says `vref`, if the mapping exists.
    pub fn clist_kref_for(&self, vat: VatId, vref: VatRef) -> KernelResult<Option<KernelRef>> {
        match self.raw_get(&keys::clist_by_vref(vat, &vref.to_string()))? {
            None => Ok(None),
            Some(s) => s.parse().map(Some),
        }
    }

    /// The vref a vat knows `kref` under, plus the reachability flag.
    pub fn clist_entry(&self, vat: VatId, kref: KernelRef) -> KernelResult<Option<(VatRef, bool)>> {
        match self.raw_get(&keys::clist_by_kref(vat, kref))? {
            None => Ok(None),
            Some(s) => parse_entry(vat, kref, &s).map(Some),
        }
    }

    /// Vats other than the owner whose c-lists still mention `kref`.
    pub fn clist_importers(&self, kref: KernelRef) -> KernelResult<Vec<VatId>> {
        let owner = self.object_owner(kref)?;
        let mut importers = Vec::new();
        for (vat, _) in self.all_vats()? {
            if Some(vat) == owner {
                continue;
            }
            if self.clist_entry(vat, kref)?.is_some() {
                importers.push(vat);
            }
        }
        Ok(importers)
    }
}

impl<T: KVWrite> KernelState<T> {
    pub fn clist_add(
        &mut self,
        vat: VatId,
        kref: KernelRef,
        vref: VatRef,
        reachable: bool,
    ) -> KernelResult<()> {
        let flag = if reachable { "R" } else { "_" };
        self.raw_set(
            &keys::clist_by_kref(vat, kref),
            &format!("{flag} {vref}"),
        )?;
        self.raw_set(&keys::clist_by_vref(vat, &vref.to_string()), &kref.to_string())?;
        Ok(())
    }

    pub fn clist_set_reachable(
        &mut self,
        vat: VatId,
        kref: KernelRef,
        reachable: bool,
    ) -> KernelResult<()> {
        let (vref, _) = self
            .clist_entry(vat, kref)?
            .ok_or(KernelError::ClistMiss { vat, kref })?;
        let flag = if reachable { "R" } else { "_" };
        self.raw_set(
            &keys::clist_by_kref(vat, kref),
            &format!("{flag} {vref}"),
        )?;
        Ok(())
    }

    /// Drop both directions of the mapping. Reference counts are the
    /// caller's business; removal itself is just bookkeeping.
    pub fn clist_remove(&mut self, vat: VatId, kref: KernelRef) -> KernelResult<()> {
        if let Some((vref, _)) = self.clist_entry(vat, kref)? {
            self.raw_delete(&keys::clist_by_kref(vat, kref))?;
            self.raw_delete(&keys::clist_by_vref(vat, &vref.to_string()))?;
        }
        Ok(())
    }

    /// Hand out the next kernel-allocated (`o-`/`p-`) index for this vat.
    pub fn allocate_import_ref(&mut self, vat: VatId, promise: bool) -> KernelResult<VatRef> {
        let counter = if promise {
            keys::next_promise_import(vat)
        } else {
            keys::next_object_import(vat)
        };
        let n = self.get_u64(&counter)?.unwrap_or(1);
        self.set_u64(&counter, n + 1)?;
        Ok(if promise {
            VatRef::promise_imported(n)
        } else {
            VatRef::import(n)
        })
    }

    /// All krefs in this vat's c-list, for termination sweeps.
    pub fn clist_krefs(&self, vat: VatId) -> KernelResult<Vec<KernelRef>> {
        let prefix = keys::clist_by_kref_prefix(vat);
        let mut krefs = Vec::new();
        for key in self.keys_with_prefix(&prefix)? {
            krefs.push(key[prefix.len()..].parse()?);
        }
        Ok(krefs)
    }
}

#[cfg(test)]
mod tests {
    use vatnest_kernel_core::{KernelRef, VatId, VatRef};
    use vatnest_storage::im::MemDb;
    use vatnest_storage::KVWritable;

    use crate::state::KernelState;

    #[test]
    fn entries_map_both_ways() {
        let db = MemDb::new();
        let mut st = KernelState::new(db.write());
        let vat = VatId::new(1);
        let ko = KernelRef::Object(5);
        let vref = VatRef::import(1);

        st.clist_add(vat, ko, vref, true).unwrap();
        assert_eq!(st.clist_kref_for(vat, vref).unwrap(), Some(ko));
        assert_eq!(st.clist_entry(vat, ko).unwrap(), Some((vref, true)));

        st.clist_set_reachable(vat, ko, false).unwrap();
        assert_eq!(st.clist_entry(vat, ko).unwrap(), Some((vref, false)));

        st.clist_remove(vat, ko).unwrap();
        assert_eq!(st.clist_kref_for(vat, vref).unwrap(), None);
        assert_eq!(st.clist_entry(vat, ko).unwrap(), None);
        st.commit().unwrap();
    }

    #[test]
    fn import_indices_count_up_per_vat() {
        let db = MemDb::new();
        let mut st = KernelState::new(db.write());
        let v1 = VatId::new(1);
        let v2 = VatId::new(2);

        assert_eq!(
            st.allocate_import_ref(v1, false).unwrap(),
            VatRef::import(1)
        );
        assert_eq!(
            st.allocate_import_ref(v1, false).unwrap(),
            VatRef::import(2)
        );
        assert_eq!(
            st.allocate_import_ref(v1, true).unwrap(),
            VatRef::promise_imported(1)
        );
        // Independent counters per vat.
        assert_eq!(
            st.allocate_import_ref(v2, false).unwrap(),
            VatRef::import(1)
        );
        st.commit().unwrap();
    }
}
