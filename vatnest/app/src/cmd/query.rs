// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use anyhow::Context;

use vatnest_rocksdb::{RocksDb, RocksDbConfig};
use vatnest_storage::{KVQuery, KVReadable};

use crate::cmd;
use crate::options::QueryArgs;
use crate::settings::Settings;

cmd! {
  QueryArgs(self, settings) {
    query(settings, &self.query)
  }
}

/// Run a query against the on-disk store and print one row per line.
fn query(settings: Settings, query: &str) -> anyhow::Result<()> {
    if settings.db.in_memory {
        anyhow::bail!("the configured store is in-memory; nothing to query offline");
    }
    let parsed = KVQuery::parse(query).context("error parsing query")?;
    let db = RocksDb::open(settings.data_dir(), &RocksDbConfig::default())
        .context("error opening DB")?;
    let tx = db.read();
    for row in parsed.execute(&tx)? {
        println!("{}\t{}", row.key, row.value);
    }
    Ok(())
}
