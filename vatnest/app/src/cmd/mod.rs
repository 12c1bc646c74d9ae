// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! CLI command implementations.

use crate::{
    options::{ClearStateArgs, Command, Options},
    settings::Settings,
};
use anyhow::Context;
use async_trait::async_trait;

use vatnest_storage::{keys_with_prefix, KVTransaction, KVWritable, KVWrite};

pub mod query;
pub mod run;

#[async_trait]
pub trait Cmd {
    async fn exec(&self, settings: Settings) -> anyhow::Result<()>;
}

/// Convenience macro to simplify declaring commands that either need or don't need settings.
///
/// ```text
/// cmd! {
///   <type-name>(self, settings) {
///     <exec-body>
///   }
/// }
/// ```
#[macro_export]
macro_rules! cmd {
    // A command which needs access to the settings.
    ($name:ident($self:ident, $settings:ident) $exec:expr) => {
        #[async_trait::async_trait]
        impl $crate::cmd::Cmd for $name {
            async fn exec(&$self, $settings: $crate::settings::Settings) -> anyhow::Result<()> {
                $exec
            }
        }
    };

    // A command which is self-contained and doesn't need the settings.
    ($name:ident($self:ident) $exec:expr) => {
        cmd!($name($self, _settings) $exec);
    };
}

impl Options {
    /// Execute the command specified in the options.
    pub async fn exec(&self) -> anyhow::Result<()> {
        match &self.command {
            Command::Run(args) => args.exec(self.settings(&args.mode)?).await,
            Command::ClearState(args) => args.exec(self.settings(&args.mode)?).await,
            Command::Query(args) => args.exec(self.settings(&args.mode)?).await,
        }
    }

    /// Try to parse the settings in the configuration directory.
    fn settings(&self, mode: &str) -> anyhow::Result<Settings> {
        Settings::new(&self.config_dir(), &self.home_dir, mode).context("error parsing settings")
    }
}

pub async fn exec(opts: &Options) -> anyhow::Result<()> {
    opts.exec().await
}

cmd! {
  ClearStateArgs(self, settings) {
    clear_state(settings)
  }
}

/// Wipe the on-disk store. Offline; refuses in-memory configs where there
/// is nothing durable to clear.
fn clear_state(settings: Settings) -> anyhow::Result<()> {
    if settings.db.in_memory {
        anyhow::bail!("the configured store is in-memory; nothing to clear");
    }
    let db = vatnest_rocksdb::RocksDb::open(
        settings.data_dir(),
        &vatnest_rocksdb::RocksDbConfig::default(),
    )
    .context("error opening DB")?;
    let mut tx = db.write();
    let keys = keys_with_prefix(&tx, "")?;
    let n = keys.len();
    for key in keys {
        tx.delete(&key)?;
    }
    if !tx.prepare_and_commit()? {
        anyhow::bail!("commit conflict; is the kernel still running?");
    }
    tracing::info!(deleted = n, "cleared kernel state");
    Ok(())
}
