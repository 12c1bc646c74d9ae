// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use rocksdb::{OptimisticTransactionDB, Options};
use std::{path::Path, sync::Arc};

mod config;
mod error;

pub use config::RocksDbConfig;
pub use error::Error;

use crate::kvstore::KERNEL_CF;

#[derive(Clone)]
pub struct RocksDb {
    pub db: Arc<OptimisticTransactionDB>,
    options: Options,
}

/// `RocksDb` holds the kernel keyspace in a single column family of an
/// `OptimisticTransactionDB`, so that a crank's writes can be rolled back
/// when the worker faults.
///
/// Usage:
/// ```no_run
/// use vatnest_rocksdb::{RocksDb, RocksDbConfig};
///
/// let db = RocksDb::open("test_db", &RocksDbConfig::default()).unwrap();
/// ```
impl RocksDb {
    pub fn open<P>(path: P, config: &RocksDbConfig) -> Result<Self, Error>
    where
        P: AsRef<Path>,
    {
        let db_opts: Options = config.into();
        let db = OptimisticTransactionDB::open_cf(&db_opts, path, [KERNEL_CF])?;
        Ok(Self {
            db: Arc::new(db),
            options: db_opts,
        })
    }

    pub fn get_statistics(&self) -> Option<String> {
        self.options.get_statistics()
    }

    pub fn flush(&self) -> Result<(), Error> {
        self.db.flush().map_err(|e| Error::Other(e.to_string()))
    }
}
