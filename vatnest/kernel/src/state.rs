// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Typed access to the kernel tables over one open store transaction.
//!
//! A [`KernelState`] wraps the transaction of a single crank (or of one
//! operator action) and exposes the object table, promise table, run
//! queue, vat records and reference counts as methods. It never commits
//! on its own; the crank loop decides between [`KernelState::commit`] and
//! [`KernelState::rollback`].

use serde::de::DeserializeOwned;
use serde::Serialize;

use vatnest_kernel_config::VatConfig;
use vatnest_kernel_core::{CapData, Decider, KernelError, KernelRef, KernelResult, VatId};
use vatnest_kernel_message::queue::{MessageBody, RunQueueItem};
use vatnest_storage::{keys_with_prefix, KVRead, KVTransaction, KVWrite};

use crate::keys;
use crate::lifecycle::VatLifecycle;

/// Resolution state of a kernel promise.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromiseStatus {
    Unresolved,
    Fulfilled,
    Rejected,
}

impl PromiseStatus {
    fn as_str(&self) -> &'static str {
        match self {
            PromiseStatus::Unresolved => "unresolved",
            PromiseStatus::Fulfilled => "fulfilled",
            PromiseStatus::Rejected => "rejected",
        }
    }

    fn parse(s: &str) -> KernelResult<Self> {
        match s {
            "unresolved" => Ok(PromiseStatus::Unresolved),
            "fulfilled" => Ok(PromiseStatus::Fulfilled),
            "rejected" => Ok(PromiseStatus::Rejected),
            other => Err(KernelError::Corrupt(format!(
                "unknown promise state '{other}'"
            ))),
        }
    }
}

pub struct KernelState<T> {
    tx: T,
}

impl<T> KernelState<T> {
    pub fn new(tx: T) -> Self {
        Self { tx }
    }
}

impl<T: KVTransaction + KVWrite> KernelState<T> {
    /// Run `f` against a fresh state over `tx`, committing on success and
    /// rolling back on error.
    pub fn update<R>(tx: T, f: impl FnOnce(&mut Self) -> KernelResult<R>) -> KernelResult<R> {
        let mut state = KernelState::new(tx);
        match f(&mut state) {
            Ok(r) => {
                state.commit()?;
                Ok(r)
            }
            Err(e) => {
                state.rollback()?;
                Err(e)
            }
        }
    }

    pub fn commit(self) -> KernelResult<()> {
        match self.tx.prepare()? {
            Some(prepared) => {
                use vatnest_storage::KVTransactionPrepared;
                prepared.commit()?;
                Ok(())
            }
            None => Err(KernelError::Corrupt(
                "store transaction lost a conflict; the kernel must be the only writer".into(),
            )),
        }
    }

    pub fn rollback(self) -> KernelResult<()> {
        self.tx.rollback()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

impl<T: KVRead> KernelState<T> {
    pub(crate) fn raw_get(&self, key: &str) -> KernelResult<Option<String>> {
        Ok(self.tx.get(key)?)
    }

    pub(crate) fn get_u64(&self, key: &str) -> KernelResult<Option<u64>> {
        match self.tx.get(key)? {
            None => Ok(None),
            Some(s) => s
                .parse()
                .map(Some)
                .map_err(|_| KernelError::Corrupt(format!("non-numeric value under {key}: {s}"))),
        }
    }

    pub(crate) fn get_json<V: DeserializeOwned>(&self, key: &str) -> KernelResult<Option<V>> {
        match self.tx.get(key)? {
            None => Ok(None),
            Some(s) => serde_json::from_str(&s)
                .map(Some)
                .map_err(|e| KernelError::Corrupt(format!("bad JSON under {key}: {e}"))),
        }
    }

    pub fn schema_version(&self) -> KernelResult<Option<u32>> {
        Ok(self.get_u64(keys::SCHEMA_VERSION_KEY)?.map(|v| v as u32))
    }

    // --- run queue ---

    pub fn queue_bounds(&self) -> KernelResult<(u64, u64)> {
        let head = self.get_u64(keys::QUEUE_HEAD)?.unwrap_or(0);
        let tail = self.get_u64(keys::QUEUE_TAIL)?.unwrap_or(0);
        Ok((head, tail))
    }

    pub fn queue_length(&self) -> KernelResult<u64> {
        let (head, tail) = self.queue_bounds()?;
        Ok(tail.saturating_sub(head))
    }

    // --- object table ---

    pub fn object_owner(&self, kref: KernelRef) -> KernelResult<Option<VatId>> {
        match self.tx.get(&keys::object_owner(kref))? {
            None => Ok(None),
            Some(s) => s.parse().map(Some),
        }
    }

    pub fn object_refcount(&self, kref: KernelRef) -> KernelResult<Option<(u64, u64)>> {
        match self.tx.get(&keys::object_refcount(kref))? {
            None => Ok(None),
            Some(s) => {
                let (r, c) = s.split_once(',').ok_or_else(|| {
                    KernelError::Corrupt(format!("bad refcount for {kref}: {s}"))
                })?;
                let r = r.parse().map_err(|_| {
                    KernelError::Corrupt(format!("bad refcount for {kref}: {s}"))
                })?;
                let c = c.parse().map_err(|_| {
                    KernelError::Corrupt(format!("bad refcount for {kref}: {s}"))
                })?;
                Ok(Some((r, c)))
            }
        }
    }

    pub fn count_objects(&self) -> KernelResult<u64> {
        let mut n = 0;
        for key in keys_with_prefix(&self.tx, "ko")? {
            if key.ends_with(".owner") {
                n += 1;
            }
        }
        Ok(n)
    }

    // --- promise table ---

    pub fn promise_status(&self, kref: KernelRef) -> KernelResult<Option<PromiseStatus>> {
        match self.tx.get(&keys::promise_state(kref))? {
            None => Ok(None),
            Some(s) => PromiseStatus::parse(&s).map(Some),
        }
    }

    pub fn promise_decider(&self, kref: KernelRef) -> KernelResult<Option<Decider>> {
        match self.tx.get(&keys::promise_decider(kref))? {
            None => Ok(None),
            Some(s) => s.parse().map(Some),
        }
    }

    pub fn promise_subscribers(&self, kref: KernelRef) -> KernelResult<Vec<VatId>> {
        match self.tx.get(&keys::promise_subscribers(kref))? {
            None => Ok(Vec::new()),
            Some(s) if s.is_empty() => Ok(Vec::new()),
            Some(s) => s.split(',').map(|v| v.parse()).collect(),
        }
    }

    pub fn promise_queue(&self, kref: KernelRef) -> KernelResult<Vec<MessageBody>> {
        Ok(self.get_json(&keys::promise_queue(kref))?.unwrap_or_default())
    }

    pub fn promise_value(&self, kref: KernelRef) -> KernelResult<Option<CapData<KernelRef>>> {
        self.get_json(&keys::promise_value(kref))
    }

    pub fn promise_refcount(&self, kref: KernelRef) -> KernelResult<u64> {
        Ok(self.get_u64(&keys::promise_refcount(kref))?.unwrap_or(0))
    }

    /// Settled state and value, or `None` while unresolved.
    pub fn promise_resolution(
        &self,
        kref: KernelRef,
    ) -> KernelResult<Option<(bool, CapData<KernelRef>)>> {
        match self.promise_status(kref)? {
            None => Err(KernelError::Corrupt(format!("no promise record for {kref}"))),
            Some(PromiseStatus::Unresolved) => Ok(None),
            Some(status) => {
                let value = self.promise_value(kref)?.ok_or_else(|| {
                    KernelError::Corrupt(format!("{kref} is settled but has no value"))
                })?;
                Ok(Some((status == PromiseStatus::Rejected, value)))
            }
        }
    }

    pub fn count_promises(&self) -> KernelResult<u64> {
        let mut n = 0;
        for key in keys_with_prefix(&self.tx, "kp")? {
            if key.ends_with(".state") {
                n += 1;
            }
        }
        Ok(n)
    }

    /// Promises currently decided by the given vat.
    pub fn promises_decided_by(&self, vat: VatId) -> KernelResult<Vec<KernelRef>> {
        let needle = Decider::Vat(vat).to_string();
        let mut found = Vec::new();
        for key in keys_with_prefix(&self.tx, "kp")? {
            if let Some(kp) = key.strip_suffix(".decider") {
                if self.tx.get(&key)?.as_deref() == Some(needle.as_str()) {
                    found.push(kp.parse()?);
                }
            }
        }
        Ok(found)
    }

    // --- vat records ---

    pub fn vat_config(&self, vat: VatId) -> KernelResult<Option<VatConfig>> {
        self.get_json(&keys::vat_config(vat))
    }

    pub fn vat_lifecycle(&self, vat: VatId) -> KernelResult<Option<VatLifecycle>> {
        match self.tx.get(&keys::vat_state(vat))? {
            None => Ok(None),
            Some(s) => s.parse().map(Some),
        }
    }

    pub fn vat_is_live(&self, vat: VatId) -> KernelResult<bool> {
        Ok(self
            .vat_lifecycle(vat)?
            .map(|l| l.is_live())
            .unwrap_or(false))
    }

    /// Every vat the kernel has a state record for, live or terminated.
    pub fn all_vats(&self) -> KernelResult<Vec<(VatId, VatLifecycle)>> {
        let mut vats = Vec::new();
        for key in keys_with_prefix(&self.tx, "vat.")? {
            if let Some(rest) = key.strip_prefix("vat.") {
                if let Some(id) = rest.strip_suffix(".state") {
                    let vat: VatId = id.parse()?;
                    let lifecycle = self
                        .vat_lifecycle(vat)?
                        .ok_or_else(|| KernelError::Corrupt(format!("lost state for {vat}")))?;
                    vats.push((vat, lifecycle));
                }
            }
        }
        Ok(vats)
    }

    pub fn live_vats(&self) -> KernelResult<Vec<VatId>> {
        Ok(self
            .all_vats()?
            .into_iter()
            .filter(|(_, l)| l.is_live())
            .map(|(v, _)| v)
            .collect())
    }

    pub fn vat_subcluster(&self, vat: VatId) -> KernelResult<Option<vatnest_kernel_core::SubclusterId>> {
        match self.tx.get(&keys::vat_subcluster(vat))? {
            None => Ok(None),
            Some(s) => s.parse().map(Some),
        }
    }

    // --- subclusters ---

    pub fn subcluster_config(
        &self,
        id: vatnest_kernel_core::SubclusterId,
    ) -> KernelResult<Option<vatnest_kernel_config::ClusterConfig>> {
        self.get_json(&keys::subcluster_config(id))
    }

    pub fn subcluster_members(
        &self,
        id: vatnest_kernel_core::SubclusterId,
    ) -> KernelResult<Vec<VatId>> {
        match self.tx.get(&keys::subcluster_vats(id))? {
            None => Ok(Vec::new()),
            Some(s) if s.is_empty() => Ok(Vec::new()),
            Some(s) => s.split(',').map(|v| v.parse()).collect(),
        }
    }

    pub fn all_subclusters(&self) -> KernelResult<Vec<vatnest_kernel_core::SubclusterId>> {
        let mut out = Vec::new();
        for key in keys_with_prefix(&self.tx, "subcluster.")? {
            if let Some(rest) = key.strip_prefix("subcluster.") {
                if let Some(id) = rest.strip_suffix(".config") {
                    out.push(id.parse()?);
                }
            }
        }
        Ok(out)
    }

    // --- vatstore ---

    pub fn vatstore_get(&self, vat: VatId, key: &str) -> KernelResult<Option<String>> {
        Ok(self.tx.get(&keys::vatstore(vat, key))?)
    }

    pub fn vatstore_get_next_key(&self, vat: VatId, key: &str) -> KernelResult<Option<String>> {
        let prefix = keys::vatstore_prefix(vat);
        let probe = keys::vatstore(vat, key);
        match self.tx.get_next_key(&probe)? {
            Some(k) if k.starts_with(&prefix) => Ok(Some(k[prefix.len()..].to_string())),
            _ => Ok(None),
        }
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> KernelResult<Vec<String>> {
        Ok(keys_with_prefix(&self.tx, prefix)?)
    }

    pub fn execute_query(&self, query: &vatnest_storage::KVQuery) -> KernelResult<Vec<vatnest_storage::KVRow>> {
        Ok(query.execute(&self.tx)?)
    }
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

impl<T: KVWrite> KernelState<T> {
    pub(crate) fn raw_set(&mut self, key: &str, value: &str) -> KernelResult<()> {
        self.tx.set(key, value)?;
        Ok(())
    }

    pub(crate) fn raw_delete(&mut self, key: &str) -> KernelResult<()> {
        self.tx.delete(key)?;
        Ok(())
    }

    pub(crate) fn set_u64(&mut self, key: &str, value: u64) -> KernelResult<()> {
        self.tx.set(key, &value.to_string())?;
        Ok(())
    }

    pub(crate) fn set_json<V: Serialize>(&mut self, key: &str, value: &V) -> KernelResult<()> {
        let s = serde_json::to_string(value)
            .map_err(|e| KernelError::Corrupt(format!("cannot serialize for {key}: {e}")))?;
        self.tx.set(key, &s)?;
        Ok(())
    }

    pub(crate) fn allocate(&mut self, counter: &str) -> KernelResult<u64> {
        let next = self.get_u64(counter)?.unwrap_or(0);
        self.set_u64(counter, next + 1)?;
        Ok(next)
    }

    /// Check the schema row, writing it on first boot.
    pub fn ensure_schema(&mut self) -> KernelResult<()> {
        match self.schema_version()? {
            None => {
                self.set_u64(keys::SCHEMA_VERSION_KEY, keys::SCHEMA_VERSION as u64)?;
                Ok(())
            }
            Some(v) if v <= keys::SCHEMA_VERSION => Ok(()),
            Some(v) => Err(KernelError::Corrupt(format!(
                "store schema v{v} is newer than this kernel (v{})",
                keys::SCHEMA_VERSION
            ))),
        }
    }

    pub fn allocate_vat_id(&mut self) -> KernelResult<VatId> {
        // Vat ids start at 1; v0 reads like a mistake in logs.
        let n = self.allocate(keys::NEXT_VAT_ID)?;
        Ok(VatId::new(n as u32 + 1))
    }

    pub fn allocate_subcluster_id(&mut self) -> KernelResult<vatnest_kernel_core::SubclusterId> {
        let n = self.allocate(keys::NEXT_SUBCLUSTER_ID)?;
        Ok(vatnest_kernel_core::SubclusterId::new(n as u32 + 1))
    }

    // --- object table ---

    pub fn create_object(&mut self, owner: VatId) -> KernelResult<KernelRef> {
        let n = self.allocate(keys::NEXT_OBJECT_ID)?;
        let kref = KernelRef::Object(n + 1);
        self.tx.set(&keys::object_owner(kref), &owner.to_string())?;
        self.tx.set(&keys::object_refcount(kref), "0,0")?;
        Ok(kref)
    }

    pub fn delete_object(&mut self, kref: KernelRef) -> KernelResult<()> {
        self.tx.delete(&keys::object_owner(kref))?;
        self.tx.delete(&keys::object_refcount(kref))?;
        Ok(())
    }

    /// Adjust the strong/weak counts of an object.
    ///
    /// A transition to zero on either count is noted for the reaper.
    /// Decrements on a missing record are ignored: a retire may have beaten
    /// the release here, and the record is already gone.
    pub fn adjust_object_refcount(
        &mut self,
        kref: KernelRef,
        d_reachable: i64,
        d_recognizable: i64,
    ) -> KernelResult<()> {
        let Some((reachable, recognizable)) = self.object_refcount(kref)? else {
            if d_reachable > 0 || d_recognizable > 0 {
                return Err(KernelError::Corrupt(format!(
                    "refcount increment on missing object {kref}"
                )));
            }
            tracing::debug!(%kref, "refcount release on retired object");
            return Ok(());
        };
        let apply = |count: u64, delta: i64| -> KernelResult<u64> {
            let next = count as i64 + delta;
            if next < 0 {
                return Err(KernelError::Corrupt(format!(
                    "refcount underflow for {kref}"
                )));
            }
            Ok(next as u64)
        };
        let reachable2 = apply(reachable, d_reachable)?;
        let recognizable2 = apply(recognizable, d_recognizable)?;
        if recognizable2 < reachable2 {
            return Err(KernelError::Corrupt(format!(
                "recognizable < reachable for {kref}"
            )));
        }
        self.tx.set(
            &keys::object_refcount(kref),
            &format!("{reachable2},{recognizable2}"),
        )?;
        if (reachable2 == 0 && reachable > 0) || (recognizable2 == 0 && recognizable > 0) {
            self.note_maybe_free(kref)?;
        }
        Ok(())
    }

    // --- promise table ---

    pub fn create_promise(&mut self, decider: Decider) -> KernelResult<KernelRef> {
        let n = self.allocate(keys::NEXT_PROMISE_ID)?;
        let kref = KernelRef::Promise(n + 1);
        self.tx.set(
            &keys::promise_state(kref),
            PromiseStatus::Unresolved.as_str(),
        )?;
        self.tx
            .set(&keys::promise_decider(kref), &decider.to_string())?;
        self.tx.set(&keys::promise_subscribers(kref), "")?;
        self.set_json(&keys::promise_queue(kref), &Vec::<MessageBody>::new())?;
        self.set_u64(&keys::promise_refcount(kref), 0)?;
        Ok(kref)
    }

    pub fn set_promise_decider(&mut self, kref: KernelRef, decider: Decider) -> KernelResult<()> {
        self.tx
            .set(&keys::promise_decider(kref), &decider.to_string())?;
        Ok(())
    }

    pub fn add_promise_subscriber(&mut self, kref: KernelRef, vat: VatId) -> KernelResult<()> {
        let mut subs = self.promise_subscribers(kref)?;
        if !subs.contains(&vat) {
            subs.push(vat);
            let joined = subs
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(",");
            self.tx.set(&keys::promise_subscribers(kref), &joined)?;
        }
        Ok(())
    }

    /// Append a pipelined send to an unresolved promise's own queue.
    pub fn push_promise_queue(&mut self, kref: KernelRef, message: MessageBody) -> KernelResult<()> {
        self.retain_message_refs(&message)?;
        let mut queue = self.promise_queue(kref)?;
        queue.push(message);
        self.set_json(&keys::promise_queue(kref), &queue)?;
        Ok(())
    }

    /// Flip an unresolved record to its settled state. The value's slots
    /// become referenced by the record itself.
    pub fn mark_promise_resolved(
        &mut self,
        kref: KernelRef,
        rejected: bool,
        value: &CapData<KernelRef>,
    ) -> KernelResult<()> {
        for slot in &value.slots {
            self.retain_kref(*slot)?;
        }
        let status = if rejected {
            PromiseStatus::Rejected
        } else {
            PromiseStatus::Fulfilled
        };
        self.tx.set(&keys::promise_state(kref), status.as_str())?;
        self.set_json(&keys::promise_value(kref), value)?;
        self.tx.delete(&keys::promise_decider(kref))?;
        self.tx.delete(&keys::promise_subscribers(kref))?;
        self.tx.delete(&keys::promise_queue(kref))?;
        Ok(())
    }

    pub fn delete_promise(&mut self, kref: KernelRef) -> KernelResult<()> {
        self.tx.delete(&keys::promise_state(kref))?;
        self.tx.delete(&keys::promise_decider(kref))?;
        self.tx.delete(&keys::promise_subscribers(kref))?;
        self.tx.delete(&keys::promise_queue(kref))?;
        self.tx.delete(&keys::promise_value(kref))?;
        self.tx.delete(&keys::promise_refcount(kref))?;
        Ok(())
    }

    pub fn adjust_promise_refcount(&mut self, kref: KernelRef, delta: i64) -> KernelResult<()> {
        if self.promise_status(kref)?.is_none() {
            if delta > 0 {
                return Err(KernelError::Corrupt(format!(
                    "refcount increment on missing promise {kref}"
                )));
            }
            tracing::debug!(%kref, "refcount release on retired promise");
            return Ok(());
        }
        let count = self.promise_refcount(kref)? as i64 + delta;
        if count < 0 {
            return Err(KernelError::Corrupt(format!(
                "refcount underflow for {kref}"
            )));
        }
        self.set_u64(&keys::promise_refcount(kref), count as u64)?;
        if count == 0 {
            self.note_maybe_free(kref)?;
        }
        Ok(())
    }

    // --- reference holds ---

    /// Record that something durable (queue entry, resolution value) now
    /// holds this kref.
    pub fn retain_kref(&mut self, kref: KernelRef) -> KernelResult<()> {
        match kref {
            KernelRef::Object(_) => self.adjust_object_refcount(kref, 1, 1),
            KernelRef::Promise(_) => self.adjust_promise_refcount(kref, 1),
        }
    }

    pub fn release_kref(&mut self, kref: KernelRef) -> KernelResult<()> {
        match kref {
            KernelRef::Object(_) => self.adjust_object_refcount(kref, -1, -1),
            KernelRef::Promise(_) => self.adjust_promise_refcount(kref, -1),
        }
    }

    pub fn retain_message_refs(&mut self, message: &MessageBody) -> KernelResult<()> {
        for slot in &message.args.slots {
            self.retain_kref(*slot)?;
        }
        if let Some(result) = message.result {
            self.retain_kref(result)?;
        }
        Ok(())
    }

    pub fn release_message_refs(&mut self, message: &MessageBody) -> KernelResult<()> {
        for slot in &message.args.slots {
            self.release_kref(*slot)?;
        }
        if let Some(result) = message.result {
            self.release_kref(result)?;
        }
        Ok(())
    }

    // --- run queue ---

    pub fn queue_push(&mut self, item: RunQueueItem) -> KernelResult<()> {
        for kref in item.retained_krefs() {
            self.retain_kref(kref)?;
        }
        let (_, tail) = self.queue_bounds()?;
        self.set_json(&keys::queue_entry(tail), &item)?;
        self.set_u64(keys::QUEUE_TAIL, tail + 1)?;
        Ok(())
    }

    /// Take the head entry off the queue. The entry's reference holds are
    /// NOT released here; the crank releases them once the payload has been
    /// translated into the target vat (or otherwise disposed of).
    pub fn queue_pop(&mut self) -> KernelResult<Option<RunQueueItem>> {
        let (head, tail) = self.queue_bounds()?;
        if head >= tail {
            return Ok(None);
        }
        let key = keys::queue_entry(head);
        let item = self
            .get_json(&key)?
            .ok_or_else(|| KernelError::Corrupt(format!("queue entry {head} missing")))?;
        self.tx.delete(&key)?;
        self.set_u64(keys::QUEUE_HEAD, head + 1)?;
        Ok(Some(item))
    }

    pub fn release_queue_item_refs(&mut self, item: &RunQueueItem) -> KernelResult<()> {
        for kref in item.retained_krefs() {
            self.release_kref(kref)?;
        }
        Ok(())
    }

    // --- GC side table ---

    pub fn note_maybe_free(&mut self, kref: KernelRef) -> KernelResult<()> {
        let mut set: Vec<KernelRef> = self.get_json(keys::GC_MAYBE_FREE)?.unwrap_or_default();
        if !set.contains(&kref) {
            set.push(kref);
            self.set_json(keys::GC_MAYBE_FREE, &set)?;
        }
        Ok(())
    }

    pub fn take_maybe_free(&mut self) -> KernelResult<Vec<KernelRef>> {
        let set: Vec<KernelRef> = self.get_json(keys::GC_MAYBE_FREE)?.unwrap_or_default();
        if !set.is_empty() {
            self.tx.delete(keys::GC_MAYBE_FREE)?;
        }
        Ok(set)
    }

    // --- vat records ---

    pub fn set_vat_config(&mut self, vat: VatId, config: &VatConfig) -> KernelResult<()> {
        self.set_json(&keys::vat_config(vat), config)
    }

    pub fn delete_vat_config(&mut self, vat: VatId) -> KernelResult<()> {
        self.tx.delete(&keys::vat_config(vat))?;
        Ok(())
    }

    pub fn set_vat_lifecycle(&mut self, vat: VatId, lifecycle: VatLifecycle) -> KernelResult<()> {
        self.tx.set(&keys::vat_state(vat), lifecycle.as_str())?;
        Ok(())
    }

    pub fn set_vat_subcluster(
        &mut self,
        vat: VatId,
        id: vatnest_kernel_core::SubclusterId,
    ) -> KernelResult<()> {
        self.tx.set(&keys::vat_subcluster(vat), &id.to_string())?;
        Ok(())
    }

    /// Remove every `v<id>.*` key: c-list, import counters, vatstore.
    /// Callers settle reference counts first; this is a blind sweep.
    pub fn delete_vat_data(&mut self, vat: VatId) -> KernelResult<()> {
        for key in self.keys_with_prefix(&keys::vat_data_prefix(vat))? {
            self.tx.delete(&key)?;
        }
        self.tx.delete(&keys::vat_subcluster(vat))?;
        Ok(())
    }

    // --- subclusters ---

    pub fn set_subcluster_config(
        &mut self,
        id: vatnest_kernel_core::SubclusterId,
        config: &vatnest_kernel_config::ClusterConfig,
    ) -> KernelResult<()> {
        self.set_json(&keys::subcluster_config(id), config)
    }

    pub fn set_subcluster_members(
        &mut self,
        id: vatnest_kernel_core::SubclusterId,
        members: &[VatId],
    ) -> KernelResult<()> {
        let joined = members
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.tx.set(&keys::subcluster_vats(id), &joined)?;
        Ok(())
    }

    pub fn delete_subcluster(&mut self, id: vatnest_kernel_core::SubclusterId) -> KernelResult<()> {
        self.tx.delete(&keys::subcluster_config(id))?;
        self.tx.delete(&keys::subcluster_vats(id))?;
        Ok(())
    }

    // --- vatstore ---

    pub fn vatstore_set(&mut self, vat: VatId, key: &str, value: &str) -> KernelResult<()> {
        self.tx.set(&keys::vatstore(vat, key), value)?;
        Ok(())
    }

    pub fn vatstore_delete(&mut self, vat: VatId, key: &str) -> KernelResult<()> {
        self.tx.delete(&keys::vatstore(vat, key))?;
        Ok(())
    }

    /// Wipe the entire keyspace. Used by `clearState`.
    pub fn clear_all(&mut self) -> KernelResult<()> {
        for key in self.keys_with_prefix("")? {
            self.tx.delete(&key)?;
        }
        self.ensure_schema()
    }
}
