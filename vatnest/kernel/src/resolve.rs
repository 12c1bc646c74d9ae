// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Promise resolution and send routing.
//!
//! Resolution is one-shot and monotonic: the record flips to its settled
//! state, every subscriber gets exactly one `notify` on the run queue, and
//! the promise's pipelined sends are flushed in their original order. A
//! send whose target turns out to be settled follows the value: retargeted
//! to the object it fulfilled to, spliced onto the next promise in a
//! chain, or rejected outright for rejections and data resolutions.

use fnv::FnvHashSet;

use vatnest_kernel_core::{
    CapData, Decider, KernelError, KernelRef, KernelResult, MarshalledError, VatId,
};
use vatnest_kernel_message::queue::{MessageBody, RunQueueItem};
use vatnest_storage::KVWrite;

use crate::state::KernelState;

impl<T: KVWrite> KernelState<T> {
    /// Settle a promise. `resolver` must be the current decider.
    pub fn resolve_promise(
        &mut self,
        resolver: Decider,
        kpid: KernelRef,
        rejected: bool,
        value: CapData<KernelRef>,
    ) -> KernelResult<()> {
        let status = self
            .promise_status(kpid)?
            .ok_or_else(|| KernelError::Corrupt(format!("resolving unknown promise {kpid}")))?;
        if status != crate::state::PromiseStatus::Unresolved {
            return Err(KernelError::AlreadyResolved(kpid));
        }
        let decider = self.promise_decider(kpid)?;
        if decider != Some(resolver) {
            return match resolver {
                Decider::Vat(vat) => Err(KernelError::NotDecider { vat, promise: kpid }),
                Decider::Kernel => Err(KernelError::Corrupt(format!(
                    "kernel tried to settle {kpid} decided by {decider:?}"
                ))),
            };
        }

        let subscribers = self.promise_subscribers(kpid)?;
        let pipelined = self.promise_queue(kpid)?;
        self.mark_promise_resolved(kpid, rejected, &value)?;
        tracing::debug!(%kpid, rejected, subscribers = subscribers.len(), pipelined = pipelined.len(), "promise settled");

        for vat in subscribers {
            self.queue_push(RunQueueItem::Notify { vat_id: vat, kpid })?;
        }

        // Flush the pipelined queue through the value, in original order.
        // Each entry's references were held by the promise queue; the
        // re-route takes its own holds, then the old ones are released.
        for message in pipelined {
            if rejected {
                if let Some(result) = message.result {
                    self.resolve_promise(Decider::Kernel, result, true, value.clone())?;
                }
            } else {
                self.route_send_to_value(&value, message.clone())?;
            }
            self.release_message_refs(&message)?;
        }
        Ok(())
    }

    /// Route a send to a target kref: objects go on the main queue,
    /// unresolved promises onto their own queue, settled promises through
    /// their value.
    pub fn route_send(&mut self, target: KernelRef, message: MessageBody) -> KernelResult<()> {
        let mut seen = FnvHashSet::default();
        self.route_send_inner(target, message, &mut seen)
    }

    fn route_send_inner(
        &mut self,
        target: KernelRef,
        message: MessageBody,
        seen: &mut FnvHashSet<KernelRef>,
    ) -> KernelResult<()> {
        match target {
            KernelRef::Object(_) => self.queue_push(RunQueueItem::Send { target, message }),
            KernelRef::Promise(_) => {
                if !seen.insert(target) {
                    // A resolution cycle; nothing will ever deliver this.
                    return self.reject_result(
                        message.result,
                        &MarshalledError::new(format!("promise resolution cycle through {target}")),
                    );
                }
                match self.promise_resolution(target)? {
                    None => self.push_promise_queue(target, message),
                    Some((true, value)) => {
                        if let Some(result) = message.result {
                            self.resolve_promise(Decider::Kernel, result, true, value)?;
                        }
                        Ok(())
                    }
                    Some((false, value)) => self.route_send_to_value_inner(&value, message, seen),
                }
            }
        }
    }

    fn route_send_to_value(
        &mut self,
        value: &CapData<KernelRef>,
        message: MessageBody,
    ) -> KernelResult<()> {
        let mut seen = FnvHashSet::default();
        self.route_send_to_value_inner(value, message, &mut seen)
    }

    fn route_send_to_value_inner(
        &mut self,
        value: &CapData<KernelRef>,
        message: MessageBody,
        seen: &mut FnvHashSet<KernelRef>,
    ) -> KernelResult<()> {
        match value.single_slot() {
            Some(next) => self.route_send_inner(next, message, seen),
            None => self.reject_result(
                message.result,
                &MarshalledError::new("cannot deliver to a promise fulfilled to data"),
            ),
        }
    }

    fn reject_result(
        &mut self,
        result: Option<KernelRef>,
        error: &MarshalledError,
    ) -> KernelResult<()> {
        if let Some(result) = result {
            self.resolve_promise(Decider::Kernel, result, true, error.to_capdata())?;
        }
        Ok(())
    }

    /// Reject every promise a vat currently decides; part of termination
    /// and of `exit`.
    pub fn reject_promises_decided_by(
        &mut self,
        vat: VatId,
        error: &MarshalledError,
    ) -> KernelResult<()> {
        for kpid in self.promises_decided_by(vat)? {
            self.resolve_promise(Decider::Vat(vat), kpid, true, error.to_capdata())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use vatnest_kernel_core::{CapData, Decider, ErrorCode, KernelRef, MarshalledError, VatId, VatRef};
    use vatnest_kernel_message::queue::{MessageBody, RunQueueItem};
    use vatnest_storage::im::MemDb;
    use vatnest_storage::KVWritable;

    use crate::lifecycle::VatLifecycle;
    use crate::state::KernelState;

    fn with_vats(db: &MemDb, n: u32) -> KernelState<<MemDb as KVWritable>::Tx<'_>> {
        let mut st = KernelState::new(db.write());
        for i in 1..=n {
            st.set_vat_lifecycle(VatId::new(i), VatLifecycle::Running)
                .unwrap();
        }
        st
    }

    #[test]
    fn only_the_decider_may_resolve() {
        let db = MemDb::new();
        let mut st = with_vats(&db, 2);
        let v1 = VatId::new(1);
        let v2 = VatId::new(2);
        let kp = st.export_from_vat(v1, VatRef::promise_decided(0)).unwrap();

        assert!(st
            .resolve_promise(Decider::Vat(v2), kp, false, CapData::null())
            .is_err());
        st.resolve_promise(Decider::Vat(v1), kp, false, CapData::null())
            .unwrap();
        // One-shot.
        assert!(st
            .resolve_promise(Decider::Vat(v1), kp, false, CapData::null())
            .is_err());
        st.commit().unwrap();
    }

    #[test]
    fn resolution_notifies_each_subscriber_once() {
        let db = MemDb::new();
        let mut st = with_vats(&db, 3);
        let v1 = VatId::new(1);
        let kp = st.export_from_vat(v1, VatRef::promise_decided(0)).unwrap();
        st.import_to_vat(VatId::new(2), kp).unwrap();
        st.import_to_vat(VatId::new(3), kp).unwrap();
        // Subscribing twice changes nothing.
        st.add_promise_subscriber(kp, VatId::new(2)).unwrap();

        let before = st.queue_length().unwrap();
        st.resolve_promise(Decider::Vat(v1), kp, false, CapData::text("ok"))
            .unwrap();
        assert_eq!(st.queue_length().unwrap(), before + 2);
        st.commit().unwrap();
    }

    #[test]
    fn pipelined_sends_flush_in_order_to_the_object() {
        let db = MemDb::new();
        let mut st = with_vats(&db, 2);
        let v1 = VatId::new(1);
        let kp = st.export_from_vat(v1, VatRef::promise_decided(0)).unwrap();
        let target = st.export_from_vat(v1, VatRef::export(0)).unwrap();

        st.route_send(kp, MessageBody::new("first", CapData::null()))
            .unwrap();
        st.route_send(kp, MessageBody::new("second", CapData::null()))
            .unwrap();
        assert_eq!(st.queue_length().unwrap(), 0);
        assert_eq!(st.promise_queue(kp).unwrap().len(), 2);

        st.resolve_promise(Decider::Vat(v1), kp, false, CapData::single(target))
            .unwrap();

        let first = st.queue_pop().unwrap().unwrap();
        let second = st.queue_pop().unwrap().unwrap();
        match (first, second) {
            (
                RunQueueItem::Send {
                    target: t1,
                    message: m1,
                },
                RunQueueItem::Send {
                    target: t2,
                    message: m2,
                },
            ) => {
                assert_eq!(t1, target);
                assert_eq!(t2, target);
                assert_eq!(m1.method, "first");
                assert_eq!(m2.method, "second");
            }
            other => panic!("expected two sends, got {other:?}"),
        }
        st.commit().unwrap();
    }

    #[test]
    fn pipelined_sends_splice_onto_the_next_promise() {
        let db = MemDb::new();
        let mut st = with_vats(&db, 2);
        let v1 = VatId::new(1);
        let kp1 = st.export_from_vat(v1, VatRef::promise_decided(0)).unwrap();
        let kp2 = st.export_from_vat(v1, VatRef::promise_decided(1)).unwrap();

        st.route_send(kp1, MessageBody::new("hello", CapData::null()))
            .unwrap();
        st.resolve_promise(Decider::Vat(v1), kp1, false, CapData::single(kp2))
            .unwrap();

        assert_eq!(st.queue_length().unwrap(), 0);
        let spliced = st.promise_queue(kp2).unwrap();
        assert_eq!(spliced.len(), 1);
        assert_eq!(spliced[0].method, "hello");
        st.commit().unwrap();
    }

    #[test]
    fn rejection_rejects_pipelined_results() {
        let db = MemDb::new();
        let mut st = with_vats(&db, 2);
        let v1 = VatId::new(1);
        let kp = st.export_from_vat(v1, VatRef::promise_decided(0)).unwrap();
        let result = st.create_promise(Decider::Kernel).unwrap();

        st.route_send(
            kp,
            MessageBody::new("doomed", CapData::null()).with_result(result),
        )
        .unwrap();

        let error = MarshalledError::new("no counter for you").with_code(ErrorCode::Unknown);
        st.resolve_promise(Decider::Vat(v1), kp, true, error.to_capdata())
            .unwrap();

        let (rejected, value) = st.promise_resolution(result).unwrap().unwrap();
        assert!(rejected);
        assert_eq!(MarshalledError::from_capdata(&value).unwrap(), error);
        st.commit().unwrap();
    }

    #[test]
    fn data_resolution_rejects_queued_sends() {
        let db = MemDb::new();
        let mut st = with_vats(&db, 1);
        let v1 = VatId::new(1);
        let kp = st.export_from_vat(v1, VatRef::promise_decided(0)).unwrap();
        let result = st.create_promise(Decider::Kernel).unwrap();

        st.route_send(
            kp,
            MessageBody::new("nope", CapData::null()).with_result(result),
        )
        .unwrap();
        st.resolve_promise(Decider::Vat(v1), kp, false, CapData::text("just data"))
            .unwrap();

        let (rejected, value) = st.promise_resolution(result).unwrap().unwrap();
        assert!(rejected);
        let err = MarshalledError::from_capdata(&value).unwrap();
        assert!(err.message.contains("data"));
        st.commit().unwrap();
    }

    #[test]
    fn resolution_cycles_reject_instead_of_looping() {
        let db = MemDb::new();
        let mut st = with_vats(&db, 1);
        let v1 = VatId::new(1);
        let kp1 = st.export_from_vat(v1, VatRef::promise_decided(0)).unwrap();
        let kp2 = st.export_from_vat(v1, VatRef::promise_decided(1)).unwrap();
        let result = st.create_promise(Decider::Kernel).unwrap();

        st.resolve_promise(Decider::Vat(v1), kp2, false, CapData::single(kp1))
            .unwrap();
        st.resolve_promise(Decider::Vat(v1), kp1, false, CapData::single(kp2))
            .unwrap();

        st.route_send(
            kp1,
            MessageBody::new("spin", CapData::null()).with_result(result),
        )
        .unwrap();

        let (rejected, value) = st.promise_resolution(result).unwrap().unwrap();
        assert!(rejected);
        let err = MarshalledError::from_capdata(&value).unwrap();
        assert!(err.message.contains("cycle"));
        st.commit().unwrap();
    }
}
