// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! The owning kernel object and its operator surface.
//!
//! One `Kernel` owns the Store handle, the worker handles, and the crank
//! loop; everything the operator can do goes through its methods. There is
//! no module-level state anywhere: construct with [`Kernel::init`], drive
//! with [`Kernel::step`]/[`Kernel::run`] or hand the whole thing to
//! [`Kernel::serve`] and talk to it through a `KernelHandle`.

use std::sync::Arc;
use std::time::Duration;

use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};

use vatnest_kernel_config::{ClusterConfig, VatConfig};
use vatnest_kernel_core::{
    CapData, Decider, ErrorCode, KernelError, KernelRef, KernelResult, MarshalledError,
    SubclusterId, VatId, VatRef,
};
use vatnest_kernel_message::queue::{GcKind, MessageBody, RunQueueItem};
use vatnest_storage::{KVQuery, KVReadable, KVRow, KVWritable, KVWrite};
use vatnest_vat::service::{VatHandle, VatWorkerService};

use crate::crank::{self, AttemptOutcome};
use crate::keys;
use crate::lifecycle::VatLifecycle;
use crate::state::{KernelState, PromiseStatus};

#[derive(Clone, Debug)]
pub struct KernelOptions {
    /// How long one worker round-trip may take before the crank is
    /// declared faulted.
    pub crank_timeout: Duration,
}

impl Default for KernelOptions {
    fn default() -> Self {
        Self {
            crank_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LaunchedVat {
    pub vat_id: VatId,
    pub root: KernelRef,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubclusterVat {
    pub name: String,
    pub vat_id: VatId,
    pub root: KernelRef,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LaunchedSubcluster {
    pub subcluster_id: SubclusterId,
    pub vats: Vec<SubclusterVat>,
    /// The kpid of the bootstrap delivery's result.
    pub bootstrap_result: KernelRef,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VatStatus {
    pub vat_id: VatId,
    pub name: Option<String>,
    pub state: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KernelStatus {
    pub schema_version: u32,
    pub vats: Vec<VatStatus>,
    pub subclusters: Vec<SubclusterId>,
    pub queue_length: u64,
    pub object_count: u64,
    pub promise_count: u64,
}

enum StepFollowUp {
    None,
    Fault { vat: VatId, error: MarshalledError },
    Exit { vat: VatId, failure: bool },
}

pub struct Kernel<DB> {
    db: DB,
    workers: Arc<dyn VatWorkerService>,
    handles: FnvHashMap<VatId, VatHandle>,
    crank_timeout: Duration,
}

impl<DB> Kernel<DB>
where
    DB: KVWritable + KVReadable + Send + Sync + 'static,
{
    /// Open (or create) the kernel state in `db` and relaunch workers for
    /// every vat that was live when the previous process stopped. Any
    /// crank that was in flight at the time was rolled back, so its
    /// delivery is still at the queue head.
    pub async fn init(
        db: DB,
        workers: Arc<dyn VatWorkerService>,
        options: KernelOptions,
    ) -> anyhow::Result<Self> {
        let relaunch = KernelState::update(db.write(), |state| {
            state.ensure_schema()?;
            let mut relaunch = Vec::new();
            for vat in state.live_vats()? {
                let config = state.vat_config(vat)?.ok_or_else(|| {
                    KernelError::Corrupt(format!("{vat} is live but has no config"))
                })?;
                state.set_vat_lifecycle(vat, VatLifecycle::Running)?;
                relaunch.push((vat, config));
            }
            Ok(relaunch)
        })?;

        let mut kernel = Self {
            db,
            workers,
            handles: FnvHashMap::default(),
            crank_timeout: options.crank_timeout,
        };
        for (vat, config) in relaunch {
            let handle = kernel.workers.launch(vat, &config).await?;
            kernel.handles.insert(vat, handle);
            tracing::info!(vat_id = %vat, name = %config.name, "relaunched vat");
        }
        Ok(kernel)
    }

    /// Stop every worker. Kernel state stays in the Store untouched.
    pub async fn shutdown(&mut self) {
        let vats: Vec<VatId> = self.handles.drain().map(|(vat, _)| vat).collect();
        for vat in vats {
            self.workers.terminate(vat).await;
        }
    }

    /// One transaction around `f`: commit on success, rollback on error.
    fn with_write<'s, R>(
        &'s self,
        f: impl FnOnce(&mut KernelState<<DB as KVWritable>::Tx<'s>>) -> KernelResult<R>,
    ) -> KernelResult<R> {
        KernelState::update(self.db.write(), f)
    }

    fn read_state(&self) -> KernelState<<DB as KVReadable>::Tx<'_>> {
        KernelState::new(self.db.read())
    }

    // -----------------------------------------------------------------
    // Vat lifecycle
    // -----------------------------------------------------------------

    pub async fn launch_vat(&mut self, config: VatConfig) -> KernelResult<LaunchedVat> {
        let (vat, root) = self.with_write(|state| {
            for v in state.live_vats()? {
                if state.vat_config(v)?.map(|c| c.name) == Some(config.name.clone()) {
                    return Err(KernelError::VatAlreadyExists(config.name.clone()));
                }
            }
            let vat = state.allocate_vat_id()?;
            state.set_vat_config(vat, &config)?;
            state.set_vat_lifecycle(vat, VatLifecycle::Launching)?;
            // The root object: `o+0` on the vat side, pinned by the kernel
            // so the operator can always address it.
            let root = state.create_object(vat)?;
            state.clist_add(vat, root, VatRef::export(0), true)?;
            state.adjust_object_refcount(root, 1, 1)?;
            Ok((vat, root))
        })?;

        match self.workers.launch(vat, &config).await {
            Ok(handle) => {
                self.handles.insert(vat, handle);
                self.with_write(|state| state.set_vat_lifecycle(vat, VatLifecycle::Running))?;
                tracing::info!(vat_id = %vat, name = %config.name, %root, "launched vat");
                Ok(LaunchedVat { vat_id: vat, root })
            }
            Err(e) => {
                // Roll the records forward to terminated; the id is spent.
                self.with_write(|state| {
                    state.adjust_object_refcount(root, -1, -1)?;
                    state.clist_remove(vat, root)?;
                    state.delete_object(root)?;
                    state.delete_vat_data(vat)?;
                    state.delete_vat_config(vat)?;
                    state.set_vat_lifecycle(vat, VatLifecycle::Terminated)
                })?;
                Err(KernelError::InvalidConfig(format!(
                    "worker launch for '{}' failed: {e:#}",
                    config.name
                )))
            }
        }
    }

    pub async fn terminate_vat(&mut self, vat: VatId) -> KernelResult<()> {
        self.with_write(|state| terminate_vat_records(state, vat))?;
        self.handles.remove(&vat);
        self.workers.terminate(vat).await;
        self.reap()?;
        tracing::info!(vat_id = %vat, "terminated vat");
        Ok(())
    }

    pub async fn restart_vat(&mut self, vat: VatId) -> KernelResult<()> {
        let config = {
            let state = self.read_state();
            match state.vat_lifecycle(vat)? {
                None => return Err(KernelError::VatNotFound(vat)),
                Some(l) if !l.is_live() => return Err(KernelError::VatDeleted(vat)),
                Some(_) => {}
            }
            state
                .vat_config(vat)?
                .ok_or_else(|| KernelError::Corrupt(format!("{vat} has no config")))?
        };
        self.with_write(|state| state.set_vat_lifecycle(vat, VatLifecycle::Paused))?;
        self.handles.remove(&vat);
        self.workers.terminate(vat).await;
        let handle = self
            .workers
            .launch(vat, &config)
            .await
            .map_err(|e| KernelError::StreamReadError(format!("relaunching {vat}: {e:#}")))?;
        self.handles.insert(vat, handle);
        self.with_write(|state| state.set_vat_lifecycle(vat, VatLifecycle::Running))?;
        tracing::info!(vat_id = %vat, "restarted vat");
        Ok(())
    }

    // -----------------------------------------------------------------
    // Subclusters
    // -----------------------------------------------------------------

    pub async fn launch_subcluster(
        &mut self,
        config: ClusterConfig,
    ) -> KernelResult<LaunchedSubcluster> {
        config.validate().map_err(KernelError::from)?;

        let subcluster_id = self.with_write(|state| {
            let id = state.allocate_subcluster_id()?;
            state.set_subcluster_config(id, &config)?;
            Ok(id)
        })?;

        let mut vats = Vec::new();
        for vat_config in &config.vats {
            let launched = self.launch_vat(vat_config.clone()).await?;
            self.with_write(|state| state.set_vat_subcluster(launched.vat_id, subcluster_id))?;
            vats.push(SubclusterVat {
                name: vat_config.name.clone(),
                vat_id: launched.vat_id,
                root: launched.root,
            });
        }

        let bootstrap_root = vats
            .iter()
            .find(|v| v.name == config.bootstrap)
            .map(|v| v.root)
            .expect("validate() checked the bootstrap is a member");

        let bootstrap_result = self.with_write(|state| {
            let members: Vec<VatId> = vats.iter().map(|v| v.vat_id).collect();
            state.set_subcluster_members(subcluster_id, &members)?;

            // Introductions: every member's root, keyed by name.
            let mut entries = serde_json::Map::new();
            let mut slots = Vec::new();
            for (ix, vat) in vats.iter().enumerate() {
                entries.insert(vat.name.clone(), serde_json::json!({ "#ref": ix }));
                slots.push(vat.root);
            }
            let body = serde_json::json!({ "introductions": entries });
            let introductions = CapData::new(
                serde_json::to_string(&body).expect("introductions always serialize"),
                slots,
            );

            let result = state.create_promise(Decider::Kernel)?;
            // Operator-held results are pinned; see `queue_message`.
            state.adjust_promise_refcount(result, 1)?;
            state.route_send(
                bootstrap_root,
                MessageBody::new("bootstrap", introductions).with_result(result),
            )?;
            Ok(result)
        })?;

        tracing::info!(
            subcluster_id = %subcluster_id,
            vats = vats.len(),
            bootstrap = %config.bootstrap,
            "launched subcluster"
        );
        Ok(LaunchedSubcluster {
            subcluster_id,
            vats,
            bootstrap_result,
        })
    }

    pub async fn terminate_subcluster(&mut self, id: SubclusterId) -> KernelResult<()> {
        let members = {
            let state = self.read_state();
            if state.subcluster_config(id)?.is_none() {
                return Err(KernelError::SubclusterNotFound(id));
            }
            state.subcluster_members(id)?
        };
        for vat in members {
            let live = self.read_state().vat_is_live(vat)?;
            if live {
                self.terminate_vat(vat).await?;
            }
        }
        self.with_write(|state| state.delete_subcluster(id))
    }

    // -----------------------------------------------------------------
    // Messaging
    // -----------------------------------------------------------------

    /// Queue a message from the operator. The caller acts as the "kernel"
    /// pseudo-vat: `args` slots are krefs and must name records the kernel
    /// already has. Returns the kpid of the result, which stays pinned so
    /// the operator can inspect the resolution later.
    pub fn queue_message(
        &mut self,
        target: KernelRef,
        method: &str,
        args: CapData<KernelRef>,
    ) -> KernelResult<KernelRef> {
        args.verify()?;
        let result = self.with_write(|state| {
            for slot in std::iter::once(&target).chain(args.slots.iter()) {
                let known = match slot {
                    KernelRef::Object(_) => state.object_owner(*slot)?.is_some(),
                    KernelRef::Promise(_) => state.promise_status(*slot)?.is_some(),
                };
                if !known {
                    return Err(KernelError::InvalidRef(slot.to_string()));
                }
            }
            let result = state.create_promise(Decider::Kernel)?;
            state.adjust_promise_refcount(result, 1)?;
            state.route_send(
                target,
                MessageBody::new(method, args.clone()).with_result(result),
            )?;
            Ok(result)
        })?;
        tracing::debug!(%target, method, %result, "operator message queued");
        Ok(result)
    }

    // -----------------------------------------------------------------
    // The crank loop
    // -----------------------------------------------------------------

    pub fn queue_is_empty(&self) -> KernelResult<bool> {
        Ok(self.read_state().queue_length()? == 0)
    }

    /// Run one crank. Returns `false` when the queue was empty.
    pub async fn step(&mut self) -> KernelResult<bool> {
        let follow_up = {
            let Self {
                db,
                handles,
                crank_timeout,
                ..
            } = self;
            let mut state = KernelState::new(db.write());
            let item = match state.queue_pop() {
                Ok(Some(item)) => item,
                Ok(None) => {
                    state.rollback()?;
                    return Ok(false);
                }
                Err(e) => {
                    state.rollback()?;
                    return Err(e);
                }
            };
            match crank::attempt(&mut state, handles, *crank_timeout, &item).await {
                Err(e) => {
                    state.rollback()?;
                    return Err(e);
                }
                Ok(AttemptOutcome::Fault { vat, error }) => {
                    state.rollback()?;
                    StepFollowUp::Fault { vat, error }
                }
                Ok(AttemptOutcome::Exit { vat, failure, value }) => {
                    state.commit()?;
                    tracing::info!(vat_id = %vat, failure, value = %value.body, "vat requested exit");
                    StepFollowUp::Exit { vat, failure }
                }
                Ok(AttemptOutcome::Delivered) | Ok(AttemptOutcome::NoDelivery) => {
                    state.commit()?;
                    StepFollowUp::None
                }
            }
        };

        match follow_up {
            StepFollowUp::None => {}
            StepFollowUp::Fault { vat, error } => self.handle_fault(vat, error).await?,
            StepFollowUp::Exit { vat, .. } => self.terminate_vat(vat).await?,
        }
        self.reap()?;
        Ok(true)
    }

    /// Drain the queue. Returns the number of cranks run.
    pub async fn run(&mut self) -> KernelResult<usize> {
        let mut cranks = 0;
        while self.step().await? {
            cranks += 1;
        }
        Ok(cranks)
    }

    /// The fault protocol: the crank's transaction is already rolled back.
    /// Consume the head delivery, reject its result, pause and relaunch
    /// the vat.
    async fn handle_fault(&mut self, vat: VatId, error: MarshalledError) -> KernelResult<()> {
        tracing::warn!(vat_id = %vat, error = %error.message, "crank faulted");
        self.with_write(|state| {
            if let Some(item) = state.queue_pop()? {
                if let RunQueueItem::Send { message, .. } = &item {
                    if let Some(result) = message.result {
                        if state.promise_status(result)? == Some(PromiseStatus::Unresolved) {
                            let rejection = MarshalledError::new("vat fault")
                                .with_code(ErrorCode::Unknown)
                                .with_cause(error.clone());
                            state.resolve_promise(
                                Decider::Kernel,
                                result,
                                true,
                                rejection.to_capdata(),
                            )?;
                        }
                    }
                }
                state.release_queue_item_refs(&item)?;
            }
            state.set_vat_lifecycle(vat, VatLifecycle::Paused)
        })?;
        self.restart_worker(vat).await
    }

    async fn restart_worker(&mut self, vat: VatId) -> KernelResult<()> {
        let config = {
            let state = self.read_state();
            match state.vat_lifecycle(vat)? {
                Some(l) if l.is_live() => state.vat_config(vat)?,
                _ => None,
            }
        };
        let Some(config) = config else {
            // Terminating or already gone; no relaunch.
            return Ok(());
        };
        self.handles.remove(&vat);
        self.workers.terminate(vat).await;
        let handle = self
            .workers
            .launch(vat, &config)
            .await
            .map_err(|e| KernelError::StreamReadError(format!("relaunching {vat}: {e:#}")))?;
        self.handles.insert(vat, handle);
        self.with_write(|state| state.set_vat_lifecycle(vat, VatLifecycle::Running))
    }

    /// Run the reaper over the krefs whose counts touched zero.
    fn reap(&mut self) -> KernelResult<()> {
        let queued = self.with_write(|state| state.reap_maybe_free())?;
        if queued > 0 {
            tracing::debug!(queued, "reaper queued gc work");
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Operator utilities
    // -----------------------------------------------------------------

    /// Ask every live vat to publish its pending drops and retires.
    pub fn collect_garbage(&mut self) -> KernelResult<()> {
        self.with_write(|state| {
            for vat in state.live_vats()? {
                state.queue_push(RunQueueItem::BringOutYourDead { vat_id: vat })?;
            }
            Ok(())
        })
    }

    /// Wipe everything: workers, vats, queue, tables. The schema row is
    /// re-created so the store is immediately usable again.
    pub async fn clear_state(&mut self) -> KernelResult<()> {
        let vats: Vec<VatId> = self.handles.drain().map(|(vat, _)| vat).collect();
        for vat in vats {
            self.workers.terminate(vat).await;
        }
        self.with_write(|state| state.clear_all())
    }

    pub fn execute_db_query(&self, query: &str) -> KernelResult<Vec<KVRow>> {
        let parsed = KVQuery::parse(query)?;
        let state = self.read_state();
        state.execute_query(&parsed)
    }

    pub fn get_status(&self) -> KernelResult<KernelStatus> {
        let state = self.read_state();
        let schema_version = state.schema_version()?.unwrap_or(keys::SCHEMA_VERSION);
        let mut vats = Vec::new();
        for (vat, lifecycle) in state.all_vats()? {
            let name = state.vat_config(vat)?.map(|c| c.name);
            vats.push(VatStatus {
                vat_id: vat,
                name,
                state: lifecycle.to_string(),
            });
        }
        Ok(KernelStatus {
            schema_version,
            vats,
            subclusters: state.all_subclusters()?,
            queue_length: state.queue_length()?,
            object_count: state.count_objects()?,
            promise_count: state.count_promises()?,
        })
    }

    /// Peek at a promise's settlement; operator convenience over the
    /// pinned result kpids returned by `queue_message`.
    pub fn promise_outcome(
        &self,
        kpid: KernelRef,
    ) -> KernelResult<Option<(bool, CapData<KernelRef>)>> {
        self.read_state().promise_resolution(kpid)
    }

    /// Drop the operator's pin on a result promise. Once every other hold
    /// drains, the record (and whatever its resolution value was keeping
    /// alive) gets reclaimed.
    pub fn forget_promise(&mut self, kpid: KernelRef) -> KernelResult<()> {
        self.with_write(|state| {
            if state.promise_status(kpid)?.is_none() {
                return Err(KernelError::InvalidRef(kpid.to_string()));
            }
            state.adjust_promise_refcount(kpid, -1)
        })?;
        self.reap()
    }
}

/// Everything termination does to the Store, in one transaction:
/// reject the vat's decided promises, retire its c-list, delete its
/// partitions, and leave the sticky `terminated` marker.
fn terminate_vat_records<T: KVWrite>(state: &mut KernelState<T>, vat: VatId) -> KernelResult<()> {
    match state.vat_lifecycle(vat)? {
        None => return Err(KernelError::VatNotFound(vat)),
        Some(VatLifecycle::Terminated) | Some(VatLifecycle::Terminating) => {
            return Err(KernelError::VatDeleted(vat))
        }
        Some(_) => {}
    }
    state.set_vat_lifecycle(vat, VatLifecycle::Terminating)?;

    let rejection = MarshalledError::new("vat terminated").with_code(ErrorCode::VatDeleted);
    state.reject_promises_decided_by(vat, &rejection)?;

    // Unpin the root before the sweep so its counts can drain.
    if let Some(root) = state.clist_kref_for(vat, VatRef::export(0))? {
        state.adjust_object_refcount(root, -1, -1)?;
    }

    let mut retires: std::collections::BTreeMap<VatId, Vec<KernelRef>> = Default::default();
    for kref in state.clist_krefs(vat)? {
        let Some((_, reachable)) = state.clist_entry(vat, kref)? else {
            continue;
        };
        state.clist_remove(vat, kref)?;
        match kref {
            KernelRef::Object(_) => {
                if state.object_owner(kref)? == Some(vat) {
                    // A dying export: every importer must retire it.
                    for importer in state.clist_importers(kref)? {
                        retires.entry(importer).or_default().push(kref);
                    }
                    state.note_maybe_free(kref)?;
                } else {
                    state.adjust_object_refcount(kref, -(reachable as i64), -1)?;
                }
            }
            KernelRef::Promise(_) => {
                state.adjust_promise_refcount(kref, -1)?;
            }
        }
    }
    for (importer, krefs) in retires {
        state.queue_push(RunQueueItem::Gc {
            vat_id: importer,
            kind: GcKind::RetireImports,
            krefs,
        })?;
    }

    state.delete_vat_data(vat)?;
    state.delete_vat_config(vat)?;
    state.set_vat_lifecycle(vat, VatLifecycle::Terminated)?;
    Ok(())
}
