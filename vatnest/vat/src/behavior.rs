// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! What runs inside an in-process worker.
//!
//! A [`VatBehavior`] is the application side of a vat: it receives one
//! delivery at a time and may emit any number of syscalls through the
//! [`SyscallClient`] while handling it. Behaviors hold no state the kernel
//! knows about between cranks other than what they put in the vatstore;
//! a restart builds a fresh instance from the factory.

use anyhow::bail;
use async_trait::async_trait;
use tokio::sync::mpsc;

use vatnest_kernel_core::{CapData, MarshalledError, VatRef};
use vatnest_kernel_message::delivery::VatDelivery;
use vatnest_kernel_message::syscall::{Resolution, SyscallResult, VatSyscall};

use crate::service::{WorkerInbound, WorkerOutbound};

#[async_trait]
pub trait VatBehavior: Send {
    /// Handle one delivery. Returning an error rejects the delivery; the
    /// kernel marshals it into the result promise's rejection.
    async fn deliver(
        &mut self,
        delivery: VatDelivery,
        syscall: &mut SyscallClient<'_>,
    ) -> Result<(), MarshalledError>;
}

/// The worker-side syscall channel, valid for the duration of one delivery.
///
/// Syscalls are strict request/reply: the client blocks on the kernel's
/// answer before the behavior continues, which is what makes the syscall
/// stream replayable.
pub struct SyscallClient<'a> {
    to_kernel: &'a mpsc::Sender<WorkerOutbound>,
    from_kernel: &'a mut mpsc::Receiver<WorkerInbound>,
}

impl<'a> SyscallClient<'a> {
    pub fn new(
        to_kernel: &'a mpsc::Sender<WorkerOutbound>,
        from_kernel: &'a mut mpsc::Receiver<WorkerInbound>,
    ) -> Self {
        Self {
            to_kernel,
            from_kernel,
        }
    }

    pub async fn syscall(&mut self, syscall: VatSyscall) -> anyhow::Result<SyscallResult> {
        let kind = syscall.kind();
        self.to_kernel
            .send(WorkerOutbound::Syscall(syscall))
            .await
            .map_err(|_| anyhow::anyhow!("kernel hung up before {kind}"))?;
        match self.from_kernel.recv().await {
            Some(WorkerInbound::SyscallResult(SyscallResult::Error { message })) => {
                bail!("syscall {kind} refused: {message}")
            }
            Some(WorkerInbound::SyscallResult(result)) => Ok(result),
            Some(WorkerInbound::Deliver(_)) => {
                bail!("kernel delivered mid-syscall; protocol broken")
            }
            None => bail!("kernel hung up awaiting {kind} result"),
        }
    }

    pub async fn send(
        &mut self,
        target: VatRef,
        method: &str,
        args: CapData<VatRef>,
        result: Option<VatRef>,
    ) -> anyhow::Result<()> {
        self.syscall(VatSyscall::Send {
            target,
            method: method.to_string(),
            args,
            result,
        })
        .await?;
        Ok(())
    }

    pub async fn subscribe(&mut self, kpid: VatRef) -> anyhow::Result<()> {
        self.syscall(VatSyscall::Subscribe { kpid }).await?;
        Ok(())
    }

    pub async fn resolve(
        &mut self,
        kpid: VatRef,
        rejected: bool,
        value: CapData<VatRef>,
    ) -> anyhow::Result<()> {
        self.syscall(VatSyscall::Resolve {
            resolutions: vec![Resolution {
                kpid,
                rejected,
                value,
            }],
        })
        .await?;
        Ok(())
    }

    pub async fn vatstore_get(&mut self, key: &str) -> anyhow::Result<Option<String>> {
        match self
            .syscall(VatSyscall::VatstoreGet {
                key: key.to_string(),
            })
            .await?
        {
            SyscallResult::Value { value } => Ok(value),
            other => bail!("unexpected vatstoreGet result: {other:?}"),
        }
    }

    pub async fn vatstore_set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        self.syscall(VatSyscall::VatstoreSet {
            key: key.to_string(),
            value: value.to_string(),
        })
        .await?;
        Ok(())
    }

    pub async fn drop_imports(&mut self, refs: Vec<VatRef>) -> anyhow::Result<()> {
        self.syscall(VatSyscall::DropImports { refs }).await?;
        Ok(())
    }

    pub async fn retire_imports(&mut self, refs: Vec<VatRef>) -> anyhow::Result<()> {
        self.syscall(VatSyscall::RetireImports { refs }).await?;
        Ok(())
    }

    pub async fn retire_exports(&mut self, refs: Vec<VatRef>) -> anyhow::Result<()> {
        self.syscall(VatSyscall::RetireExports { refs }).await?;
        Ok(())
    }

    pub async fn exit(&mut self, failure: bool, value: CapData<VatRef>) -> anyhow::Result<()> {
        self.syscall(VatSyscall::Exit { failure, value }).await?;
        Ok(())
    }
}
