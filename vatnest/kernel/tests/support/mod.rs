// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Harness shared by the end-to-end scenarios: a kernel on the in-memory
//! store plus a handful of scripted vat behaviors. Behaviors keep their
//! cross-crank state in the vatstore only, so they behave correctly
//! across restarts, like real vats must.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use vatnest_kernel::{Kernel, KernelOptions, LaunchedVat};
use vatnest_kernel_config::{BundleSpec, VatConfig};
use vatnest_kernel_core::{CapData, KernelRef, MarshalledError, VatId, VatRef};
use vatnest_kernel_message::delivery::VatDelivery;
use vatnest_storage::im::MemDb;
use vatnest_storage::{KVRead, KVReadable};
use vatnest_vat::behavior::{SyscallClient, VatBehavior};
use vatnest_vat::local::LocalWorkerService;

pub struct TestKernel {
    pub db: MemDb,
    pub workers: Arc<LocalWorkerService>,
    pub kernel: Kernel<MemDb>,
}

impl TestKernel {
    pub async fn new() -> Self {
        let db = MemDb::new();
        let workers = Arc::new(LocalWorkerService::new());
        register_test_bundles(&workers);
        let kernel = Kernel::init(db.clone(), workers.clone(), options())
            .await
            .expect("kernel init");
        Self {
            db,
            workers,
            kernel,
        }
    }

    /// Simulate a process restart: stop the workers, then reopen the same
    /// store with a fresh kernel, which relaunches the live vats.
    pub async fn reopen(self) -> Self {
        let Self {
            db,
            workers,
            mut kernel,
        } = self;
        kernel.shutdown().await;
        let kernel = Kernel::init(db.clone(), workers.clone(), options())
            .await
            .expect("kernel reopen");
        Self {
            db,
            workers,
            kernel,
        }
    }

    pub async fn launch(&mut self, name: &str, bundle: &str) -> LaunchedVat {
        self.kernel
            .launch_vat(VatConfig::new(name, BundleSpec::named(bundle)))
            .await
            .expect("launch vat")
    }

    /// Queue an operator message and drain the queue.
    pub async fn call(
        &mut self,
        target: KernelRef,
        method: &str,
        args: CapData<KernelRef>,
    ) -> KernelRef {
        let result = self
            .kernel
            .queue_message(target, method, args)
            .expect("queue message");
        self.kernel.run().await.expect("run");
        result
    }

    pub fn fulfilled(&self, kpid: KernelRef) -> CapData<KernelRef> {
        match self.kernel.promise_outcome(kpid).expect("promise outcome") {
            Some((false, value)) => value,
            other => panic!("expected {kpid} fulfilled, got {other:?}"),
        }
    }

    pub fn rejected(&self, kpid: KernelRef) -> MarshalledError {
        match self.kernel.promise_outcome(kpid).expect("promise outcome") {
            Some((true, value)) => MarshalledError::from_capdata(&value)
                .unwrap_or_else(|| panic!("{kpid} rejection is not a marshalled error")),
            other => panic!("expected {kpid} rejected, got {other:?}"),
        }
    }

    /// Peek straight into a vat's vatstore partition.
    pub fn vatstore(&self, vat: VatId, key: &str) -> Option<String> {
        self.db
            .read()
            .get(&format!("{vat}.ks.{key}"))
            .expect("vatstore read")
    }

    pub fn vat_log(&self, vat: VatId) -> Vec<String> {
        self.vatstore(vat, "log")
            .map(|s| s.split(',').map(|p| p.to_string()).collect())
            .unwrap_or_default()
    }
}

fn options() -> KernelOptions {
    KernelOptions {
        crank_timeout: Duration::from_secs(5),
    }
}

pub fn register_test_bundles(workers: &LocalWorkerService) {
    workers.register_bundle("greeter", |_| Ok(Box::new(Greeter)));
    workers.register_bundle("keeper", |_| Ok(Box::new(Keeper)));
    workers.register_bundle("counter", |_| Ok(Box::new(Counter)));
    workers.register_bundle("driver", |_| Ok(Box::new(Driver)));
    workers.register_bundle("exiter", |_| Ok(Box::new(Exiter)));
}

fn internal(e: anyhow::Error) -> MarshalledError {
    MarshalledError::new(format!("{e:#}"))
}

async fn append_log(syscall: &mut SyscallClient<'_>, entry: &str) -> Result<(), MarshalledError> {
    let log = match syscall.vatstore_get("log").await.map_err(internal)? {
        Some(log) => format!("{log},{entry}"),
        None => entry.to_string(),
    };
    syscall.vatstore_set("log", &log).await.map_err(internal)
}

fn join_refs(refs: &[VatRef]) -> String {
    refs.iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join("+")
}

/// Answers `ping` with `"hi"`; anything else is an error.
struct Greeter;

#[async_trait]
impl VatBehavior for Greeter {
    async fn deliver(
        &mut self,
        delivery: VatDelivery,
        syscall: &mut SyscallClient<'_>,
    ) -> Result<(), MarshalledError> {
        match delivery {
            VatDelivery::Deliver { method, result, .. } => {
                if method != "ping" {
                    return Err(MarshalledError::new(format!("unknown method '{method}'")));
                }
                if let Some(result) = result {
                    syscall
                        .resolve(result, false, CapData::text("hi"))
                        .await
                        .map_err(internal)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// A general-purpose vat: it can hand out a secondary export, hold an
/// import across cranks, drop it on demand, and it logs every gc notice
/// and notify it receives. Throws on unknown methods, which the fault
/// tests rely on.
struct Keeper;

#[async_trait]
impl VatBehavior for Keeper {
    async fn deliver(
        &mut self,
        delivery: VatDelivery,
        syscall: &mut SyscallClient<'_>,
    ) -> Result<(), MarshalledError> {
        match delivery {
            VatDelivery::Deliver {
                method,
                args,
                result,
                ..
            } => {
                match method.as_str() {
                    "bootstrap" => {
                        syscall
                            .vatstore_set("intro", &args.body)
                            .await
                            .map_err(internal)?;
                        if let Some(result) = result {
                            syscall
                                .resolve(result, false, CapData::null())
                                .await
                                .map_err(internal)?;
                        }
                    }
                    "ping" => {
                        if let Some(result) = result {
                            syscall
                                .resolve(result, false, CapData::text("pong"))
                                .await
                                .map_err(internal)?;
                        }
                    }
                    "make" => {
                        if let Some(result) = result {
                            syscall
                                .resolve(result, false, CapData::single(VatRef::export(1)))
                                .await
                                .map_err(internal)?;
                        }
                    }
                    "keep" => {
                        let kept = args
                            .slots
                            .first()
                            .ok_or_else(|| MarshalledError::new("keep needs a reference"))?;
                        syscall
                            .vatstore_set("kept", &kept.to_string())
                            .await
                            .map_err(internal)?;
                        if let Some(result) = result {
                            syscall
                                .resolve(result, false, CapData::null())
                                .await
                                .map_err(internal)?;
                        }
                    }
                    "getKept" => {
                        let kept = self.kept(syscall).await?;
                        if let Some(result) = result {
                            syscall
                                .resolve(result, false, CapData::single(kept))
                                .await
                                .map_err(internal)?;
                        }
                    }
                    "dropKept" => {
                        let kept = self.kept(syscall).await?;
                        syscall.drop_imports(vec![kept]).await.map_err(internal)?;
                        if let Some(result) = result {
                            syscall
                                .resolve(result, false, CapData::null())
                                .await
                                .map_err(internal)?;
                        }
                    }
                    other => {
                        return Err(MarshalledError::new(format!("unknown method '{other}'")))
                    }
                }
                Ok(())
            }
            VatDelivery::Notify {
                kpid,
                rejected,
                value,
            } => {
                append_log(
                    syscall,
                    &format!("notify:{kpid}:{rejected}:{}", value.body),
                )
                .await
            }
            VatDelivery::DropExports { refs } => {
                append_log(syscall, &format!("dropExports:{}", join_refs(&refs))).await?;
                // This vat forgets a dropped export entirely.
                syscall.retire_exports(refs).await.map_err(internal)
            }
            VatDelivery::RetireImports { refs } => {
                append_log(syscall, &format!("retireImports:{}", join_refs(&refs))).await
            }
            VatDelivery::RetireExports { refs } => {
                append_log(syscall, &format!("retireExports:{}", join_refs(&refs))).await
            }
            VatDelivery::BringOutYourDead => append_log(syscall, "bringOutYourDead").await,
        }
    }
}

impl Keeper {
    async fn kept(&self, syscall: &mut SyscallClient<'_>) -> Result<VatRef, MarshalledError> {
        let kept = syscall
            .vatstore_get("kept")
            .await
            .map_err(internal)?
            .ok_or_else(|| MarshalledError::new("nothing kept"))?;
        kept.parse()
            .map_err(|_| MarshalledError::new(format!("bad kept ref '{kept}'")))
    }
}

/// Hands out a counter object and counts `inc` deliveries, logging the
/// order everything arrives in.
struct Counter;

#[async_trait]
impl VatBehavior for Counter {
    async fn deliver(
        &mut self,
        delivery: VatDelivery,
        syscall: &mut SyscallClient<'_>,
    ) -> Result<(), MarshalledError> {
        match delivery {
            VatDelivery::Deliver { method, result, .. } => {
                append_log(syscall, &method).await?;
                match method.as_str() {
                    "makeCounter" => {
                        if let Some(result) = result {
                            syscall
                                .resolve(result, false, CapData::single(VatRef::export(1)))
                                .await
                                .map_err(internal)?;
                        }
                        Ok(())
                    }
                    "inc" => {
                        let count: u64 = syscall
                            .vatstore_get("count")
                            .await
                            .map_err(internal)?
                            .and_then(|s| s.parse().ok())
                            .unwrap_or(0)
                            + 1;
                        syscall
                            .vatstore_set("count", &count.to_string())
                            .await
                            .map_err(internal)?;
                        if let Some(result) = result {
                            syscall
                                .resolve(result, false, CapData::text(&count.to_string()))
                                .await
                                .map_err(internal)?;
                        }
                        Ok(())
                    }
                    other => Err(MarshalledError::new(format!("unknown method '{other}'"))),
                }
            }
            _ => Ok(()),
        }
    }
}

/// Exercises promise pipelining: on `go` it asks the referenced vat for a
/// counter and sends two `inc`s at the result promise before it can
/// possibly have resolved.
struct Driver;

#[async_trait]
impl VatBehavior for Driver {
    async fn deliver(
        &mut self,
        delivery: VatDelivery,
        syscall: &mut SyscallClient<'_>,
    ) -> Result<(), MarshalledError> {
        match delivery {
            VatDelivery::Deliver {
                method,
                args,
                result,
                ..
            } => {
                if method != "go" {
                    return Err(MarshalledError::new(format!("unknown method '{method}'")));
                }
                let counter_maker = *args
                    .slots
                    .first()
                    .ok_or_else(|| MarshalledError::new("go needs a target"))?;

                let mc = VatRef::promise_decided(21);
                let i1 = VatRef::promise_decided(22);
                let i2 = VatRef::promise_decided(23);

                syscall
                    .send(counter_maker, "makeCounter", CapData::null(), Some(mc))
                    .await
                    .map_err(internal)?;
                syscall.subscribe(mc).await.map_err(internal)?;
                // Pipelined: the counter does not exist yet.
                syscall
                    .send(mc, "inc", CapData::null(), Some(i1))
                    .await
                    .map_err(internal)?;
                syscall.subscribe(i1).await.map_err(internal)?;
                syscall
                    .send(mc, "inc", CapData::null(), Some(i2))
                    .await
                    .map_err(internal)?;
                syscall.subscribe(i2).await.map_err(internal)?;

                if let Some(result) = result {
                    syscall
                        .resolve(result, false, CapData::text("sent"))
                        .await
                        .map_err(internal)?;
                }
                Ok(())
            }
            VatDelivery::Notify {
                kpid,
                rejected,
                value,
            } => {
                append_log(
                    syscall,
                    &format!("notify:{kpid}:{rejected}:{}", value.body),
                )
                .await
            }
            _ => Ok(()),
        }
    }
}

/// Resolves its result, then asks to terminate itself.
struct Exiter;

#[async_trait]
impl VatBehavior for Exiter {
    async fn deliver(
        &mut self,
        delivery: VatDelivery,
        syscall: &mut SyscallClient<'_>,
    ) -> Result<(), MarshalledError> {
        match delivery {
            VatDelivery::Deliver { method, result, .. } => {
                if method != "leave" {
                    return Err(MarshalledError::new(format!("unknown method '{method}'")));
                }
                if let Some(result) = result {
                    syscall
                        .resolve(result, false, CapData::text("bye"))
                        .await
                        .map_err(internal)?;
                }
                syscall
                    .exit(false, CapData::text("bye"))
                    .await
                    .map_err(internal)
            }
            _ => Ok(()),
        }
    }
}
