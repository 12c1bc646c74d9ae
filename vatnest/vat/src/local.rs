// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! In-process worker service.
//!
//! Each vat runs as a tokio task owning a [`VatBehavior`] built from a
//! registered bundle factory. Isolation here is cooperative (a task, not a
//! process); the kernel-facing contract is identical to a real isolate, so
//! everything above the [`VatWorkerService`] seam is exercised for real.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use vatnest_kernel_config::VatConfig;
use vatnest_kernel_core::VatId;
use vatnest_kernel_message::delivery::DeliveryStatus;

use crate::behavior::{SyscallClient, VatBehavior};
use crate::service::{VatHandle, VatWorkerService, WorkerInbound, WorkerOutbound};

/// Builds a fresh behavior instance for every (re)launch.
pub type BehaviorFactory =
    Arc<dyn Fn(&VatConfig) -> anyhow::Result<Box<dyn VatBehavior>> + Send + Sync>;

#[derive(Default)]
pub struct LocalWorkerService {
    bundles: Mutex<HashMap<String, BehaviorFactory>>,
    running: Mutex<HashMap<VatId, JoinHandle<()>>>,
}

impl LocalWorkerService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the factory behind `bundle:<name>`.
    pub fn register_bundle(
        &self,
        name: impl Into<String>,
        factory: impl Fn(&VatConfig) -> anyhow::Result<Box<dyn VatBehavior>> + Send + Sync + 'static,
    ) {
        self.bundles
            .lock()
            .expect("bundle registry poisoned")
            .insert(name.into(), Arc::new(factory));
    }

    fn factory(&self, name: &str) -> anyhow::Result<BehaviorFactory> {
        self.bundles
            .lock()
            .expect("bundle registry poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("no bundle registered under '{name}'"))
    }

    fn abort_running(&self, vat_id: VatId) {
        if let Some(handle) = self
            .running
            .lock()
            .expect("worker table poisoned")
            .remove(&vat_id)
        {
            handle.abort();
        }
    }
}

#[async_trait]
impl VatWorkerService for LocalWorkerService {
    async fn launch(&self, vat_id: VatId, config: &VatConfig) -> anyhow::Result<VatHandle> {
        let factory = self.factory(config.bundle.name())?;
        let behavior = factory(config)
            .with_context(|| format!("building behavior for {vat_id} ({})", config.bundle))?;

        // Relaunching replaces any previous worker: behaviors are stateless
        // between cranks, so the old task has nothing worth keeping.
        self.abort_running(vat_id);

        let (handle, inbound, outbound) = VatHandle::pipe(vat_id);
        let task = tokio::spawn(worker_loop(vat_id, behavior, inbound, outbound));
        self.running
            .lock()
            .expect("worker table poisoned")
            .insert(vat_id, task);

        tracing::debug!(vat_id = %vat_id, bundle = %config.bundle, "launched local worker");
        Ok(handle)
    }

    async fn terminate(&self, vat_id: VatId) {
        self.abort_running(vat_id);
        tracing::debug!(vat_id = %vat_id, "terminated local worker");
    }
}

async fn worker_loop(
    vat_id: VatId,
    mut behavior: Box<dyn VatBehavior>,
    mut from_kernel: mpsc::Receiver<WorkerInbound>,
    to_kernel: mpsc::Sender<WorkerOutbound>,
) {
    while let Some(frame) = from_kernel.recv().await {
        match frame {
            WorkerInbound::Deliver(delivery) => {
                let status = {
                    let mut client = SyscallClient::new(&to_kernel, &mut from_kernel);
                    match behavior.deliver(delivery, &mut client).await {
                        Ok(()) => DeliveryStatus::Ok,
                        Err(e) => DeliveryStatus::Error {
                            error: e.to_capdata(),
                        },
                    }
                };
                if to_kernel.send(WorkerOutbound::Done(status)).await.is_err() {
                    break;
                }
            }
            WorkerInbound::SyscallResult(result) => {
                // A reply with no outstanding syscall; the kernel side will
                // notice the protocol break, just don't act on it here.
                tracing::warn!(vat_id = %vat_id, ?result, "stray syscall result");
            }
        }
    }
}
