// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Layout of the kernel keyspace.
//!
//! Every piece of kernel state lives under one of these prefixes; ordered
//! scans over them implement queue traversal, c-list sweeps and state
//! wipes. Queue sequence numbers are zero-padded so byte order equals
//! numeric order.

use vatnest_kernel_core::{KernelRef, SubclusterId, VatId};

pub const SCHEMA_VERSION_KEY: &str = "kernel.schemaVersion";
pub const SCHEMA_VERSION: u32 = 1;

pub const QUEUE_HEAD: &str = "queue.head";
pub const QUEUE_TAIL: &str = "queue.tail";

pub const NEXT_VAT_ID: &str = "nextId.vat";
pub const NEXT_OBJECT_ID: &str = "nextId.object";
pub const NEXT_PROMISE_ID: &str = "nextId.promise";
pub const NEXT_SUBCLUSTER_ID: &str = "nextId.subcluster";

pub const GC_MAYBE_FREE: &str = "gc.maybeFree";

pub fn queue_entry(seq: u64) -> String {
    format!("queue.{seq:020}")
}

pub fn object_owner(kref: KernelRef) -> String {
    format!("{kref}.owner")
}

pub fn object_refcount(kref: KernelRef) -> String {
    format!("{kref}.refcount")
}

pub fn promise_state(kref: KernelRef) -> String {
    format!("{kref}.state")
}

pub fn promise_decider(kref: KernelRef) -> String {
    format!("{kref}.decider")
}

pub fn promise_subscribers(kref: KernelRef) -> String {
    format!("{kref}.subscribers")
}

pub fn promise_queue(kref: KernelRef) -> String {
    format!("{kref}.queue")
}

pub fn promise_value(kref: KernelRef) -> String {
    format!("{kref}.value")
}

pub fn promise_refcount(kref: KernelRef) -> String {
    format!("{kref}.refcount")
}

/// `v<id>.o.<vref> -> kref`, the vat-to-kernel direction of a c-list.
pub fn clist_by_vref(vat: VatId, vref: &str) -> String {
    format!("{vat}.o.{vref}")
}

/// `v<id>.k.<kref> -> "R <vref>" | "_ <vref>"`, the kernel-to-vat direction.
pub fn clist_by_kref(vat: VatId, kref: KernelRef) -> String {
    format!("{vat}.k.{kref}")
}

pub fn clist_by_kref_prefix(vat: VatId) -> String {
    format!("{vat}.k.")
}

pub fn next_object_import(vat: VatId) -> String {
    format!("{vat}.nextImport.o")
}

pub fn next_promise_import(vat: VatId) -> String {
    format!("{vat}.nextImport.p")
}

pub fn vatstore(vat: VatId, key: &str) -> String {
    format!("{vat}.ks.{key}")
}

pub fn vatstore_prefix(vat: VatId) -> String {
    format!("{vat}.ks.")
}

/// Every per-vat key other than the `vat.<id>.*` records.
pub fn vat_data_prefix(vat: VatId) -> String {
    format!("{vat}.")
}

pub fn vat_config(vat: VatId) -> String {
    format!("vat.{vat}.config")
}

pub fn vat_state(vat: VatId) -> String {
    format!("vat.{vat}.state")
}

pub fn vat_subcluster(vat: VatId) -> String {
    format!("vat.{vat}.subcluster")
}

pub fn subcluster_config(id: SubclusterId) -> String {
    format!("subcluster.{id}.config")
}

pub fn subcluster_vats(id: SubclusterId) -> String {
    format!("subcluster.{id}.vats")
}

#[cfg(test)]
mod tests {
    use vatnest_kernel_core::{KernelRef, VatId};

    #[test]
    fn queue_keys_sort_numerically() {
        assert!(super::queue_entry(9) < super::queue_entry(10));
        assert!(super::queue_entry(99) < super::queue_entry(100));
    }

    #[test]
    fn clist_key_shapes() {
        let v = VatId::new(3);
        assert_eq!(super::clist_by_vref(v, "o+0"), "v3.o.o+0");
        assert_eq!(
            super::clist_by_kref(v, KernelRef::Object(7)),
            "v3.k.ko7"
        );
    }
}
