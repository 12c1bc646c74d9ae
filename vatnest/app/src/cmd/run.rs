// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;

use anyhow::Context;

use vatnest_kernel::{Kernel, KernelHandle, KernelOptions};
use vatnest_rocksdb::{RocksDb, RocksDbConfig};
use vatnest_storage::im::MemDb;
use vatnest_storage::{KVReadable, KVWritable};
use vatnest_vat::local::LocalWorkerService;

use crate::bundles;
use crate::cmd;
use crate::options::RunArgs;
use crate::settings::Settings;

cmd! {
  RunArgs(self, settings) {
    run(settings).await
  }
}

/// Run the vatnest kernel and its operator API.
///
/// This method acts as our composition root.
async fn run(settings: Settings) -> anyhow::Result<()> {
    let workers = Arc::new(LocalWorkerService::new());
    bundles::register_builtin(&workers);

    let options = KernelOptions {
        crank_timeout: settings.kernel.crank_timeout,
    };

    if settings.db.in_memory {
        tracing::warn!("running on the in-memory store; state will not survive a restart");
        serve(MemDb::new(), workers, options, settings).await
    } else {
        let db = RocksDb::open(settings.data_dir(), &RocksDbConfig::default())
            .context("error opening DB")?;
        serve(db, workers, options, settings).await
    }
}

async fn serve<DB>(
    db: DB,
    workers: Arc<LocalWorkerService>,
    options: KernelOptions,
    settings: Settings,
) -> anyhow::Result<()>
where
    DB: KVWritable + KVReadable + Send + Sync + 'static,
{
    let kernel = Kernel::init(db, workers, options)
        .await
        .context("error initializing the kernel")?;

    // The kernel stays on this task (store transactions are not
    // necessarily Send); the RPC server talks to it over the handle.
    let (handle, commands) = KernelHandle::channel();

    let listen_addr = settings.rpc.addr();
    tokio::select! {
        res = vatnest_rpc::listen(listen_addr, handle.clone()) => {
            res.context("operator API failed")
        }
        _ = kernel.serve(commands) => {
            anyhow::bail!("kernel stopped unexpectedly")
        }
    }
}
