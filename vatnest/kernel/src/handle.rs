// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Command-channel access to a running kernel.
//!
//! The kernel is single-threaded; [`Kernel::serve`] owns it on one task
//! and interleaves operator commands with cranks, commands landing only
//! between cranks. A [`KernelHandle`] is the cheap, clonable client other
//! tasks (the RPC server, tests) talk through.

use tokio::sync::{mpsc, oneshot};

use vatnest_kernel_config::{ClusterConfig, VatConfig};
use vatnest_kernel_core::{CapData, KernelError, KernelRef, KernelResult, SubclusterId, VatId};
use vatnest_storage::{KVReadable, KVRow, KVWritable};

use crate::kernel::{Kernel, KernelStatus, LaunchedSubcluster, LaunchedVat};

pub enum KernelCommand {
    LaunchVat {
        config: VatConfig,
        reply: oneshot::Sender<KernelResult<LaunchedVat>>,
    },
    LaunchSubcluster {
        config: ClusterConfig,
        reply: oneshot::Sender<KernelResult<LaunchedSubcluster>>,
    },
    TerminateVat {
        vat: VatId,
        reply: oneshot::Sender<KernelResult<()>>,
    },
    TerminateSubcluster {
        id: SubclusterId,
        reply: oneshot::Sender<KernelResult<()>>,
    },
    RestartVat {
        vat: VatId,
        reply: oneshot::Sender<KernelResult<()>>,
    },
    QueueMessage {
        target: KernelRef,
        method: String,
        args: CapData<KernelRef>,
        reply: oneshot::Sender<KernelResult<KernelRef>>,
    },
    ForgetPromise {
        kpid: KernelRef,
        reply: oneshot::Sender<KernelResult<()>>,
    },
    CollectGarbage {
        reply: oneshot::Sender<KernelResult<()>>,
    },
    ClearState {
        reply: oneshot::Sender<KernelResult<()>>,
    },
    ExecuteQuery {
        query: String,
        reply: oneshot::Sender<KernelResult<Vec<KVRow>>>,
    },
    GetStatus {
        reply: oneshot::Sender<KernelResult<KernelStatus>>,
    },
    Shutdown,
}

#[derive(Clone)]
pub struct KernelHandle {
    commands: mpsc::Sender<KernelCommand>,
}

impl KernelHandle {
    pub fn new(commands: mpsc::Sender<KernelCommand>) -> Self {
        Self { commands }
    }

    /// A handle plus the receiver to pass to [`Kernel::serve`], for hosts
    /// that keep the kernel on their own task instead of spawning it.
    pub fn channel() -> (Self, mpsc::Receiver<KernelCommand>) {
        let (tx, rx) = mpsc::channel(32);
        (Self::new(tx), rx)
    }

    async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<KernelResult<R>>) -> KernelCommand,
    ) -> KernelResult<R> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| KernelError::StreamReadError("kernel has stopped".into()))?;
        rx.await
            .map_err(|_| KernelError::StreamReadError("kernel dropped the request".into()))?
    }

    pub async fn launch_vat(&self, config: VatConfig) -> KernelResult<LaunchedVat> {
        self.request(|reply| KernelCommand::LaunchVat { config, reply })
            .await
    }

    pub async fn launch_subcluster(&self, config: ClusterConfig) -> KernelResult<LaunchedSubcluster> {
        self.request(|reply| KernelCommand::LaunchSubcluster { config, reply })
            .await
    }

    pub async fn terminate_vat(&self, vat: VatId) -> KernelResult<()> {
        self.request(|reply| KernelCommand::TerminateVat { vat, reply })
            .await
    }

    pub async fn terminate_subcluster(&self, id: SubclusterId) -> KernelResult<()> {
        self.request(|reply| KernelCommand::TerminateSubcluster { id, reply })
            .await
    }

    pub async fn restart_vat(&self, vat: VatId) -> KernelResult<()> {
        self.request(|reply| KernelCommand::RestartVat { vat, reply })
            .await
    }

    pub async fn queue_message(
        &self,
        target: KernelRef,
        method: impl Into<String>,
        args: CapData<KernelRef>,
    ) -> KernelResult<KernelRef> {
        let method = method.into();
        self.request(|reply| KernelCommand::QueueMessage {
            target,
            method,
            args,
            reply,
        })
        .await
    }

    pub async fn forget_promise(&self, kpid: KernelRef) -> KernelResult<()> {
        self.request(|reply| KernelCommand::ForgetPromise { kpid, reply })
            .await
    }

    pub async fn collect_garbage(&self) -> KernelResult<()> {
        self.request(|reply| KernelCommand::CollectGarbage { reply })
            .await
    }

    pub async fn clear_state(&self) -> KernelResult<()> {
        self.request(|reply| KernelCommand::ClearState { reply })
            .await
    }

    pub async fn execute_db_query(&self, query: impl Into<String>) -> KernelResult<Vec<KVRow>> {
        let query = query.into();
        self.request(|reply| KernelCommand::ExecuteQuery { query, reply })
            .await
    }

    pub async fn get_status(&self) -> KernelResult<KernelStatus> {
        self.request(|reply| KernelCommand::GetStatus { reply }).await
    }

    /// Ask the kernel to stop serving. Outstanding commands are dropped.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(KernelCommand::Shutdown).await;
    }
}

impl<DB> Kernel<DB>
where
    DB: KVWritable + KVReadable + Send + Sync + 'static,
{
    /// Move the kernel onto its own task and return the command handle.
    ///
    /// Requires `Send` store transactions; a store that cannot promise
    /// that is served inline via [`KernelHandle::channel`] + `serve`.
    pub fn spawn(self) -> (KernelHandle, tokio::task::JoinHandle<()>)
    where
        for<'a> <DB as KVWritable>::Tx<'a>: Send,
        for<'a> <DB as KVReadable>::Tx<'a>: Send,
    {
        let (handle, rx) = KernelHandle::channel();
        let task = tokio::spawn(self.serve(rx));
        (handle, task)
    }

    /// Serve commands and cranks until shut down. Commands are drained
    /// between cranks, so an operator call never observes a half-applied
    /// crank.
    pub async fn serve(mut self, mut commands: mpsc::Receiver<KernelCommand>) {
        loop {
            // Let queued operator commands land first.
            loop {
                match commands.try_recv() {
                    Ok(KernelCommand::Shutdown) => {
                        self.shutdown().await;
                        return;
                    }
                    Ok(cmd) => self.handle_command(cmd).await,
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        self.shutdown().await;
                        return;
                    }
                }
            }

            let idle = match self.queue_is_empty() {
                Ok(idle) => idle,
                Err(e) => {
                    tracing::error!(error = %e, "cannot inspect the run queue; stopping");
                    self.shutdown().await;
                    return;
                }
            };
            if idle {
                match commands.recv().await {
                    None | Some(KernelCommand::Shutdown) => {
                        self.shutdown().await;
                        return;
                    }
                    Some(cmd) => self.handle_command(cmd).await,
                }
            } else if let Err(e) = self.step().await {
                tracing::error!(error = %e, "kernel fault; stopping");
                self.shutdown().await;
                return;
            }
        }
    }

    async fn handle_command(&mut self, command: KernelCommand) {
        match command {
            KernelCommand::LaunchVat { config, reply } => {
                let _ = reply.send(self.launch_vat(config).await);
            }
            KernelCommand::LaunchSubcluster { config, reply } => {
                let _ = reply.send(self.launch_subcluster(config).await);
            }
            KernelCommand::TerminateVat { vat, reply } => {
                let _ = reply.send(self.terminate_vat(vat).await);
            }
            KernelCommand::TerminateSubcluster { id, reply } => {
                let _ = reply.send(self.terminate_subcluster(id).await);
            }
            KernelCommand::RestartVat { vat, reply } => {
                let _ = reply.send(self.restart_vat(vat).await);
            }
            KernelCommand::QueueMessage {
                target,
                method,
                args,
                reply,
            } => {
                let _ = reply.send(self.queue_message(target, &method, args));
            }
            KernelCommand::ForgetPromise { kpid, reply } => {
                let _ = reply.send(self.forget_promise(kpid));
            }
            KernelCommand::CollectGarbage { reply } => {
                let _ = reply.send(self.collect_garbage());
            }
            KernelCommand::ClearState { reply } => {
                let _ = reply.send(self.clear_state().await);
            }
            KernelCommand::ExecuteQuery { query, reply } => {
                let _ = reply.send(self.execute_db_query(&query));
            }
            KernelCommand::GetStatus { reply } => {
                let _ = reply.send(self.get_status());
            }
            KernelCommand::Shutdown => unreachable!("handled by the serve loop"),
        }
    }
}
