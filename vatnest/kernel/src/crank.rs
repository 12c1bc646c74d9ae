// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! One crank: one run-queue entry against one vat.
//!
//! The caller opens the store transaction and decides what to do with the
//! outcome: commit on success, roll back and run the fault protocol when
//! the worker misbehaves. Inside the crank, syscalls are serviced
//! strictly in order against the same transaction, so a worker observes
//! its own writes and nothing of a crank that later rolls back.

use std::time::Duration;

use fnv::FnvHashMap;
use tokio::time::timeout;

use vatnest_kernel_core::{
    CapData, Decider, KernelError, KernelRef, KernelResult, MarshalledError, VatId,
};
use vatnest_kernel_message::delivery::{DeliveryStatus, VatDelivery};
use vatnest_kernel_message::queue::{GcKind, MessageBody, RunQueueItem};
use vatnest_kernel_message::syscall::{SyscallResult, VatSyscall};
use vatnest_storage::KVWrite;
use vatnest_vat::service::{VatHandle, WorkerOutbound};

use crate::state::{KernelState, PromiseStatus};

/// What became of one attempted crank, before commit/rollback.
pub(crate) enum AttemptOutcome {
    /// Handled entirely against kernel state; nothing was delivered.
    NoDelivery,
    /// The worker processed the delivery; commit.
    Delivered,
    /// Delivered, and the vat asked to terminate itself afterwards.
    Exit {
        vat: VatId,
        failure: bool,
        value: CapData<KernelRef>,
    },
    /// The vat or its worker misbehaved; roll back and run the fault path.
    Fault { vat: VatId, error: MarshalledError },
}

/// Per-crank scratch: buffered resolutions (applied at crank end) and a
/// pending self-termination request.
struct CrankContext {
    vat: VatId,
    resolutions: Vec<(KernelRef, bool, CapData<KernelRef>)>,
    exit: Option<(bool, CapData<KernelRef>)>,
}

impl CrankContext {
    fn new(vat: VatId) -> Self {
        Self {
            vat,
            resolutions: Vec::new(),
            exit: None,
        }
    }
}

/// Errors a vat caused, as opposed to kernel/store trouble that must stop
/// the world.
fn is_vat_fault(e: &KernelError) -> bool {
    !matches!(e, KernelError::Store(_) | KernelError::Corrupt(_))
}

enum Drive {
    Status(DeliveryStatus),
    Fault(MarshalledError),
}

pub(crate) async fn attempt<T: KVWrite>(
    state: &mut KernelState<T>,
    handles: &mut FnvHashMap<VatId, VatHandle>,
    crank_timeout: Duration,
    item: &RunQueueItem,
) -> KernelResult<AttemptOutcome> {
    match item {
        RunQueueItem::Send { target, message } => {
            attempt_send(state, handles, crank_timeout, *target, message, item).await
        }
        RunQueueItem::Notify { vat_id, kpid } => {
            attempt_notify(state, handles, crank_timeout, *vat_id, *kpid, item).await
        }
        RunQueueItem::Gc {
            vat_id,
            kind,
            krefs,
        } => attempt_gc(state, handles, crank_timeout, *vat_id, *kind, krefs).await,
        RunQueueItem::BringOutYourDead { vat_id } => {
            attempt_boyd(state, handles, crank_timeout, *vat_id).await
        }
    }
}

async fn attempt_send<T: KVWrite>(
    state: &mut KernelState<T>,
    handles: &mut FnvHashMap<VatId, VatHandle>,
    crank_timeout: Duration,
    target: KernelRef,
    message: &MessageBody,
    item: &RunQueueItem,
) -> KernelResult<AttemptOutcome> {
    if target.is_promise() {
        // The target settled while this entry sat on the main queue (it
        // arrived here through a resolution flush); route it again.
        state.route_send(target, message.clone())?;
        state.release_queue_item_refs(item)?;
        return Ok(AttemptOutcome::NoDelivery);
    }

    let owner = state.object_owner(target)?;
    let live_owner = match owner {
        Some(owner) if state.vat_is_live(owner)? => Some(owner),
        _ => None,
    };
    let Some(owner) = live_owner else {
        // Calls on a revoked object are rejected, not resolved.
        let error = match owner {
            Some(dead) => KernelError::VatDeleted(dead).marshal(),
            None => MarshalledError::new(format!("{target} has been retired")),
        };
        reject_result(state, message.result, &error)?;
        state.release_queue_item_refs(item)?;
        return Ok(AttemptOutcome::NoDelivery);
    };

    let Some(handle) = handles.get_mut(&owner) else {
        return Ok(AttemptOutcome::Fault {
            vat: owner,
            error: MarshalledError::new(format!("{owner} has no worker attached")),
        });
    };

    // Delivery hands decidership of the result to the receiving vat.
    if let Some(result) = message.result {
        if state.promise_status(result)? == Some(PromiseStatus::Unresolved) {
            state.set_promise_decider(result, Decider::Vat(owner))?;
        }
    }

    let target_vref = state.import_to_vat(owner, target)?;
    let args = state.translate_capdata_to_vat(owner, message.args.clone())?;
    let result_vref = match message.result {
        Some(kp) => Some(state.import_to_vat(owner, kp)?),
        None => None,
    };
    state.release_queue_item_refs(item)?;

    let frame = VatDelivery::Deliver {
        target: target_vref,
        method: message.method.clone(),
        args,
        result: result_vref,
    };
    let mut cx = CrankContext::new(owner);
    match drive(state, handle, crank_timeout, &mut cx, frame).await? {
        Drive::Fault(error) => Ok(AttemptOutcome::Fault { vat: owner, error }),
        Drive::Status(DeliveryStatus::Error { error }) => Ok(AttemptOutcome::Fault {
            vat: owner,
            error: MarshalledError::from_capdata(&error)
                .unwrap_or_else(|| MarshalledError::new("delivery failed")),
        }),
        Drive::Status(DeliveryStatus::Ok) => finish(state, cx),
    }
}

async fn attempt_notify<T: KVWrite>(
    state: &mut KernelState<T>,
    handles: &mut FnvHashMap<VatId, VatHandle>,
    crank_timeout: Duration,
    vat: VatId,
    kpid: KernelRef,
    item: &RunQueueItem,
) -> KernelResult<AttemptOutcome> {
    if !state.vat_is_live(vat)? {
        state.release_queue_item_refs(item)?;
        return Ok(AttemptOutcome::NoDelivery);
    }
    let Some((vref, _)) = state.clist_entry(vat, kpid)? else {
        // The vat already forgot this promise; nothing to tell it.
        state.release_queue_item_refs(item)?;
        return Ok(AttemptOutcome::NoDelivery);
    };
    let Some((rejected, value)) = state.promise_resolution(kpid)? else {
        return Err(KernelError::Corrupt(format!(
            "notify queued for unresolved {kpid}"
        )));
    };
    let Some(handle) = handles.get_mut(&vat) else {
        return Ok(AttemptOutcome::Fault {
            vat,
            error: MarshalledError::new(format!("{vat} has no worker attached")),
        });
    };

    let value = state.translate_capdata_to_vat(vat, value)?;
    let frame = VatDelivery::Notify {
        kpid: vref,
        rejected,
        value,
    };
    let mut cx = CrankContext::new(vat);
    match drive(state, handle, crank_timeout, &mut cx, frame).await? {
        Drive::Fault(error) => Ok(AttemptOutcome::Fault { vat, error }),
        Drive::Status(DeliveryStatus::Error { error }) => Ok(AttemptOutcome::Fault {
            vat,
            error: MarshalledError::from_capdata(&error)
                .unwrap_or_else(|| MarshalledError::new("notify failed")),
        }),
        Drive::Status(DeliveryStatus::Ok) => {
            // A delivered notify retires the subscriber's promise entry.
            state.clist_remove(vat, kpid)?;
            state.adjust_promise_refcount(kpid, -1)?;
            state.release_queue_item_refs(item)?;
            finish(state, cx)
        }
    }
}

async fn attempt_gc<T: KVWrite>(
    state: &mut KernelState<T>,
    handles: &mut FnvHashMap<VatId, VatHandle>,
    crank_timeout: Duration,
    vat: VatId,
    kind: GcKind,
    krefs: &[KernelRef],
) -> KernelResult<AttemptOutcome> {
    if !state.vat_is_live(vat)? {
        return Ok(AttemptOutcome::NoDelivery);
    }
    let mut vrefs = Vec::new();
    for &kref in krefs {
        let Some((vref, reachable)) = state.clist_entry(vat, kref)? else {
            // The vat beat us to it with its own retire; skip.
            continue;
        };
        match kind {
            GcKind::DropExports => {}
            GcKind::RetireImports => {
                state.clist_remove(vat, kref)?;
                if kref.is_promise() {
                    state.adjust_promise_refcount(kref, -1)?;
                } else {
                    state.adjust_object_refcount(kref, -(reachable as i64), -1)?;
                }
            }
            GcKind::RetireExports => {
                state.clist_remove(vat, kref)?;
                state.delete_object(kref)?;
            }
        }
        vrefs.push(vref);
    }
    if vrefs.is_empty() {
        return Ok(AttemptOutcome::NoDelivery);
    }
    let Some(handle) = handles.get_mut(&vat) else {
        return Ok(AttemptOutcome::Fault {
            vat,
            error: MarshalledError::new(format!("{vat} has no worker attached")),
        });
    };
    let frame = match kind {
        GcKind::DropExports => VatDelivery::DropExports { refs: vrefs },
        GcKind::RetireImports => VatDelivery::RetireImports { refs: vrefs },
        GcKind::RetireExports => VatDelivery::RetireExports { refs: vrefs },
    };
    let mut cx = CrankContext::new(vat);
    match drive(state, handle, crank_timeout, &mut cx, frame).await? {
        Drive::Fault(error) => Ok(AttemptOutcome::Fault { vat, error }),
        Drive::Status(DeliveryStatus::Error { error }) => Ok(AttemptOutcome::Fault {
            vat,
            error: MarshalledError::from_capdata(&error)
                .unwrap_or_else(|| MarshalledError::new("gc delivery failed")),
        }),
        Drive::Status(DeliveryStatus::Ok) => finish(state, cx),
    }
}

async fn attempt_boyd<T: KVWrite>(
    state: &mut KernelState<T>,
    handles: &mut FnvHashMap<VatId, VatHandle>,
    crank_timeout: Duration,
    vat: VatId,
) -> KernelResult<AttemptOutcome> {
    if !state.vat_is_live(vat)? {
        return Ok(AttemptOutcome::NoDelivery);
    }
    let Some(handle) = handles.get_mut(&vat) else {
        return Ok(AttemptOutcome::Fault {
            vat,
            error: MarshalledError::new(format!("{vat} has no worker attached")),
        });
    };
    let mut cx = CrankContext::new(vat);
    match drive(
        state,
        handle,
        crank_timeout,
        &mut cx,
        VatDelivery::BringOutYourDead,
    )
    .await?
    {
        Drive::Fault(error) => Ok(AttemptOutcome::Fault { vat, error }),
        Drive::Status(DeliveryStatus::Error { error }) => Ok(AttemptOutcome::Fault {
            vat,
            error: MarshalledError::from_capdata(&error)
                .unwrap_or_else(|| MarshalledError::new("bringOutYourDead failed")),
        }),
        Drive::Status(DeliveryStatus::Ok) => finish(state, cx),
    }
}

/// Send the frame and service syscalls until the worker reports done.
async fn drive<T: KVWrite>(
    state: &mut KernelState<T>,
    handle: &mut VatHandle,
    crank_timeout: Duration,
    cx: &mut CrankContext,
    frame: VatDelivery,
) -> KernelResult<Drive> {
    if let Err(e) = handle.send_delivery(frame).await {
        return Ok(Drive::Fault(e.marshal()));
    }
    loop {
        let event = match timeout(crank_timeout, handle.next_outbound()).await {
            Err(_) => {
                return Ok(Drive::Fault(MarshalledError::new(format!(
                    "{} crank timed out after {crank_timeout:?}",
                    cx.vat
                ))))
            }
            Ok(Err(e)) => return Ok(Drive::Fault(e.marshal())),
            Ok(Ok(event)) => event,
        };
        match event {
            WorkerOutbound::Done(status) => return Ok(Drive::Status(status)),
            WorkerOutbound::Syscall(syscall) => {
                let kind = syscall.kind();
                match handle_syscall(state, cx, syscall) {
                    Ok(result) => {
                        if handle.send_syscall_result(result).await.is_err() {
                            return Ok(Drive::Fault(MarshalledError::new(format!(
                                "{} hung up mid-syscall",
                                cx.vat
                            ))));
                        }
                    }
                    Err(e) if is_vat_fault(&e) => {
                        tracing::warn!(vat = %cx.vat, syscall = kind, error = %e, "syscall refused, failing crank");
                        let _ = handle
                            .send_syscall_result(SyscallResult::Error {
                                message: e.to_string(),
                            })
                            .await;
                        return Ok(Drive::Fault(
                            MarshalledError::new(format!("invalid {kind} syscall"))
                                .with_cause(e.marshal()),
                        ));
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }
}

fn handle_syscall<T: KVWrite>(
    state: &mut KernelState<T>,
    cx: &mut CrankContext,
    syscall: VatSyscall,
) -> KernelResult<SyscallResult> {
    let vat = cx.vat;
    match syscall {
        VatSyscall::Send {
            target,
            method,
            args,
            result,
        } => {
            let target = state.translate_ref_from_vat(vat, target)?;
            let args = state.translate_capdata_from_vat(vat, args)?;
            let mut message = MessageBody::new(method, args);
            if let Some(vref) = result {
                message = message.with_result(export_result_promise(state, vat, vref)?);
            }
            state.route_send(target, message)?;
            Ok(SyscallResult::Ok)
        }
        VatSyscall::Subscribe { kpid } => {
            let kref = state.translate_ref_from_vat(vat, kpid)?;
            if !kref.is_promise() {
                return Err(KernelError::InvalidSyscall {
                    vat,
                    reason: format!("cannot subscribe to {kref}"),
                });
            }
            match state.promise_status(kref)? {
                Some(PromiseStatus::Unresolved) => state.add_promise_subscriber(kref, vat)?,
                Some(_) => state.queue_push(RunQueueItem::Notify { vat_id: vat, kpid: kref })?,
                None => {
                    return Err(KernelError::Corrupt(format!(
                        "promise record missing for {kref}"
                    )))
                }
            }
            Ok(SyscallResult::Ok)
        }
        VatSyscall::Resolve { resolutions } => {
            for r in resolutions {
                let kref = state.translate_ref_from_vat(vat, r.kpid)?;
                if !kref.is_promise() {
                    return Err(KernelError::InvalidSyscall {
                        vat,
                        reason: format!("cannot resolve {kref}"),
                    });
                }
                if cx.resolutions.iter().any(|(k, _, _)| *k == kref) {
                    return Err(KernelError::InvalidSyscall {
                        vat,
                        reason: format!("{kref} resolved twice in one crank"),
                    });
                }
                // Authority is checked now so the worker hears about its
                // mistake synchronously; the effect lands at crank end.
                match state.promise_status(kref)? {
                    Some(PromiseStatus::Unresolved) => {}
                    Some(_) => return Err(KernelError::AlreadyResolved(kref)),
                    None => {
                        return Err(KernelError::Corrupt(format!(
                            "promise record missing for {kref}"
                        )))
                    }
                }
                if state.promise_decider(kref)? != Some(Decider::Vat(vat)) {
                    return Err(KernelError::NotDecider { vat, promise: kref });
                }
                let value = state.translate_capdata_from_vat(vat, r.value)?;
                cx.resolutions.push((kref, r.rejected, value));
            }
            Ok(SyscallResult::Ok)
        }
        VatSyscall::Exit { failure, value } => {
            let value = state.translate_capdata_from_vat(vat, value)?;
            cx.exit = Some((failure, value));
            Ok(SyscallResult::Ok)
        }
        VatSyscall::DropImports { refs } => {
            let krefs = lookup_imports(state, vat, &refs)?;
            state.vat_drop_imports(vat, &krefs)?;
            Ok(SyscallResult::Ok)
        }
        VatSyscall::RetireImports { refs } => {
            let krefs = lookup_imports(state, vat, &refs)?;
            state.vat_retire_imports(vat, &krefs)?;
            Ok(SyscallResult::Ok)
        }
        VatSyscall::RetireExports { refs } => {
            let krefs = lookup_imports(state, vat, &refs)?;
            state.vat_retire_exports(vat, &krefs)?;
            Ok(SyscallResult::Ok)
        }
        VatSyscall::VatstoreGet { key } => Ok(SyscallResult::Value {
            value: state.vatstore_get(vat, &key)?,
        }),
        VatSyscall::VatstoreSet { key, value } => {
            state.vatstore_set(vat, &key, &value)?;
            Ok(SyscallResult::Ok)
        }
        VatSyscall::VatstoreDelete { key } => {
            state.vatstore_delete(vat, &key)?;
            Ok(SyscallResult::Ok)
        }
        VatSyscall::VatstoreGetNextKey { key } => Ok(SyscallResult::Value {
            value: state.vatstore_get_next_key(vat, &key)?,
        }),
    }
}

/// Strict c-list lookups for gc syscalls: no entry may be created here.
fn lookup_imports<T: KVWrite>(
    state: &mut KernelState<T>,
    vat: VatId,
    refs: &[vatnest_kernel_core::VatRef],
) -> KernelResult<Vec<KernelRef>> {
    let mut krefs = Vec::with_capacity(refs.len());
    for &vref in refs {
        let kref =
            state
                .clist_kref_for(vat, vref)?
                .ok_or_else(|| KernelError::InvalidSyscall {
                    vat,
                    reason: format!("unknown reference {vref}"),
                })?;
        krefs.push(kref);
    }
    Ok(krefs)
}

/// The result vref of an outgoing send: a fresh vat-allocated promise,
/// kernel-decided until the send is delivered.
fn export_result_promise<T: KVWrite>(
    state: &mut KernelState<T>,
    vat: VatId,
    vref: vatnest_kernel_core::VatRef,
) -> KernelResult<KernelRef> {
    if !vref.is_promise() || !vref.is_vat_allocated() {
        return Err(KernelError::InvalidSyscall {
            vat,
            reason: format!("result must be a fresh p+ reference, got {vref}"),
        });
    }
    if state.clist_kref_for(vat, vref)?.is_some() {
        return Err(KernelError::InvalidSyscall {
            vat,
            reason: format!("result {vref} is already in use"),
        });
    }
    let kref = state.create_promise(Decider::Kernel)?;
    state.clist_add(vat, kref, vref, true)?;
    state.adjust_promise_refcount(kref, 1)?;
    Ok(kref)
}

/// Apply the crank's buffered effects after a successful delivery.
fn finish<T: KVWrite>(state: &mut KernelState<T>, cx: CrankContext) -> KernelResult<AttemptOutcome> {
    for (kpid, rejected, value) in cx.resolutions {
        if let Err(e) = state.resolve_promise(Decider::Vat(cx.vat), kpid, rejected, value) {
            if is_vat_fault(&e) {
                return Ok(AttemptOutcome::Fault {
                    vat: cx.vat,
                    error: MarshalledError::new("resolution failed at crank end")
                        .with_cause(e.marshal()),
                });
            }
            return Err(e);
        }
        // The decider is done with a promise it settled.
        state.clist_remove(cx.vat, kpid)?;
        state.adjust_promise_refcount(kpid, -1)?;
    }
    match cx.exit {
        Some((failure, value)) => Ok(AttemptOutcome::Exit {
            vat: cx.vat,
            failure,
            value,
        }),
        None => Ok(AttemptOutcome::Delivered),
    }
}

fn reject_result<T: KVWrite>(
    state: &mut KernelState<T>,
    result: Option<KernelRef>,
    error: &MarshalledError,
) -> KernelResult<()> {
    if let Some(result) = result {
        if state.promise_status(result)? == Some(PromiseStatus::Unresolved) {
            state.resolve_promise(Decider::Kernel, result, true, error.to_capdata())?;
        }
    }
    Ok(())
}
