// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT
use async_trait::async_trait;
use tokio::sync::mpsc;

use vatnest_kernel_config::VatConfig;
use vatnest_kernel_core::{KernelError, KernelResult, VatId};
use vatnest_kernel_message::delivery::{DeliveryStatus, VatDelivery};
use vatnest_kernel_message::syscall::{SyscallResult, VatSyscall};

/// Frames travelling from the kernel into a worker.
#[derive(Debug)]
pub enum WorkerInbound {
    Deliver(VatDelivery),
    SyscallResult(SyscallResult),
}

/// Frames travelling from a worker back to the kernel.
#[derive(Debug)]
pub enum WorkerOutbound {
    Syscall(VatSyscall),
    Done(DeliveryStatus),
}

/// Per-delivery channel capacity. Syscalls are strictly request/reply, so
/// anything beyond a couple of frames in flight indicates a broken worker.
pub const CHANNEL_BOUND: usize = 16;

/// The kernel's end of one worker's channels.
///
/// A handle is owned by the vat host; dropping it hangs up on the worker.
pub struct VatHandle {
    vat_id: VatId,
    to_worker: mpsc::Sender<WorkerInbound>,
    from_worker: mpsc::Receiver<WorkerOutbound>,
}

impl VatHandle {
    pub fn new(
        vat_id: VatId,
        to_worker: mpsc::Sender<WorkerInbound>,
        from_worker: mpsc::Receiver<WorkerOutbound>,
    ) -> Self {
        Self {
            vat_id,
            to_worker,
            from_worker,
        }
    }

    /// Create both endpoints of a worker channel pair; the second element
    /// is handed to the worker side.
    pub fn pipe(
        vat_id: VatId,
    ) -> (
        Self,
        mpsc::Receiver<WorkerInbound>,
        mpsc::Sender<WorkerOutbound>,
    ) {
        let (in_tx, in_rx) = mpsc::channel(CHANNEL_BOUND);
        let (out_tx, out_rx) = mpsc::channel(CHANNEL_BOUND);
        (Self::new(vat_id, in_tx, out_rx), in_rx, out_tx)
    }

    pub fn vat_id(&self) -> VatId {
        self.vat_id
    }

    pub async fn send_delivery(&mut self, delivery: VatDelivery) -> KernelResult<()> {
        self.to_worker
            .send(WorkerInbound::Deliver(delivery))
            .await
            .map_err(|_| self.hangup("delivery channel closed"))
    }

    pub async fn send_syscall_result(&mut self, result: SyscallResult) -> KernelResult<()> {
        self.to_worker
            .send(WorkerInbound::SyscallResult(result))
            .await
            .map_err(|_| self.hangup("syscall reply channel closed"))
    }

    /// The next frame from the worker; an error if it hung up.
    pub async fn next_outbound(&mut self) -> KernelResult<WorkerOutbound> {
        match self.from_worker.recv().await {
            Some(frame) => Ok(frame),
            None => Err(self.hangup("worker stream ended")),
        }
    }

    fn hangup(&self, what: &str) -> KernelError {
        KernelError::StreamReadError(format!("{}: {what}", self.vat_id))
    }
}

/// The opaque capability that launches and terminates isolated executors.
///
/// `launch` is also how restarts happen: launching an already-running vat
/// replaces its worker with a fresh one from the same image.
#[async_trait]
pub trait VatWorkerService: Send + Sync {
    async fn launch(&self, vat_id: VatId, config: &VatConfig) -> anyhow::Result<VatHandle>;

    /// Kill the worker if it is running. Idempotent.
    async fn terminate(&self, vat_id: VatId);
}
