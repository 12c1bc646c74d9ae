// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT
use rocksdb::{BoundColumnFamily, ErrorKind, OptimisticTransactionDB, Transaction};
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::thread;

use vatnest_storage::{
    KVError, KVRead, KVReadable, KVResult, KVTransaction, KVTransactionPrepared, KVWritable,
    KVWrite,
};

use crate::RocksDb;

/// Name of the column family holding the kernel keyspace.
pub const KERNEL_CF: &str = "kernel";

/// Marker for read-only mode.
pub struct Read;
/// Marker for read-write mode.
pub struct Write;

pub struct RocksDbTx<'a, M> {
    db: &'a OptimisticTransactionDB,
    tx: ManuallyDrop<Transaction<'a, OptimisticTransactionDB>>,
    /// Indicate read-only or read-write mode.
    _mode: PhantomData<M>,
    /// Flag to support sanity checking in `Drop`.
    read_only: bool,
}

impl<'a, M> RocksDbTx<'a, M> {
    fn cf(&self) -> KVResult<Arc<BoundColumnFamily<'a>>> {
        self.db
            .cf_handle(KERNEL_CF)
            .ok_or_else(|| unexpected_str(format!("column family {KERNEL_CF} doesn't exist")))
    }
}

impl KVReadable for RocksDb {
    type Tx<'a> = RocksDbTx<'a, Read>
    where
        Self: 'a;

    fn read(&self) -> Self::Tx<'_> {
        let tx = self.db.transaction();
        RocksDbTx {
            db: self.db.as_ref(),
            tx: ManuallyDrop::new(tx),
            read_only: true,
            _mode: PhantomData,
        }
    }
}

impl KVWritable for RocksDb {
    type Tx<'a> = RocksDbTx<'a, Write>
    where
        Self: 'a;

    fn write(&self) -> Self::Tx<'_> {
        let tx = self.db.transaction();
        RocksDbTx {
            db: self.db.as_ref(),
            tx: ManuallyDrop::new(tx),
            read_only: false,
            _mode: PhantomData,
        }
    }
}

impl<'a, M> KVRead for RocksDbTx<'a, M> {
    fn get(&self, key: &str) -> KVResult<Option<String>> {
        let cf = self.cf()?;
        let res = self.tx.get_cf(&cf, key.as_bytes()).map_err(unexpected)?;
        match res {
            Some(bz) => Ok(Some(String::from_utf8(bz).map_err(|e| {
                unexpected_str(format!("non-UTF-8 value under {key}: {e}"))
            })?)),
            None => Ok(None),
        }
    }

    fn get_next_key(&self, key: &str) -> KVResult<Option<String>> {
        let cf = self.cf()?;
        // The raw iterator sees the transaction's own uncommitted writes,
        // which is what the crank requires.
        let mut it = self.tx.raw_iterator_cf(&cf);
        it.seek(key.as_bytes());
        if it.valid() && it.key() == Some(key.as_bytes()) {
            it.next();
        }
        if it.valid() {
            let k = it
                .key()
                .expect("valid iterator has a key")
                .to_vec();
            let k = String::from_utf8(k)
                .map_err(|e| unexpected_str(format!("non-UTF-8 key in store: {e}")))?;
            Ok(Some(k))
        } else {
            it.status().map_err(unexpected)?;
            Ok(None)
        }
    }
}

impl<'a> KVWrite for RocksDbTx<'a, Write> {
    fn set(&mut self, key: &str, value: &str) -> KVResult<()> {
        let cf = self.cf()?;
        self.tx
            .put_cf(&cf, key.as_bytes(), value.as_bytes())
            .map_err(unexpected)
    }

    fn delete(&mut self, key: &str) -> KVResult<()> {
        let cf = self.cf()?;
        self.tx.delete_cf(&cf, key.as_bytes()).map_err(unexpected)
    }
}

impl<'a> KVTransaction for RocksDbTx<'a, Write> {
    type Prepared = Self;

    fn prepare(self) -> KVResult<Option<Self::Prepared>> {
        match self.tx.prepare() {
            Err(e) if e.kind() == ErrorKind::Busy => {
                self.dispose();
                Ok(None)
            }
            Err(e) => {
                let e = unexpected(e);
                self.dispose();
                Err(e)
            }
            Ok(()) => Ok(Some(self)),
        }
    }

    fn rollback(self) -> KVResult<()> {
        let this = ManuallyDrop::new(self);
        let res = unsafe {
            let mut this = this;
            let tx = ManuallyDrop::take(&mut this.tx);
            tx.rollback().map_err(unexpected)
        };
        res
    }
}

impl<'a> KVTransactionPrepared for RocksDbTx<'a, Write> {
    fn commit(self) -> KVResult<()> {
        // This method cleans up the transaction without running the panicky destructor.
        let mut this = ManuallyDrop::new(self);
        let res = unsafe {
            let tx = ManuallyDrop::take(&mut this.tx);
            tx.commit().map_err(unexpected)
        };
        res
    }

    fn rollback(self) -> KVResult<()> {
        KVTransaction::rollback(self)
    }
}

impl<'a, M> RocksDbTx<'a, M> {
    /// Drop the inner transaction without the premature-drop panic.
    fn dispose(self) {
        let mut this = ManuallyDrop::new(self);
        unsafe {
            let tx = ManuallyDrop::take(&mut this.tx);
            drop(tx);
        }
    }
}

impl<'a, M> Drop for RocksDbTx<'a, M> {
    fn drop(&mut self) {
        if self.read_only {
            unsafe { ManuallyDrop::drop(&mut self.tx) }
        } else if !thread::panicking() {
            panic!("Transaction prematurely dropped. Must call `.commit()` or `.rollback()`.");
        }
    }
}

fn unexpected(e: rocksdb::Error) -> KVError {
    KVError::Unexpected(Box::new(e))
}

fn unexpected_str(msg: String) -> KVError {
    KVError::Unexpected(msg.into())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use vatnest_storage::{
        keys_with_prefix, KVRead, KVReadable, KVTransaction, KVTransactionPrepared, KVWritable,
        KVWrite,
    };

    use crate::{RocksDb, RocksDbConfig};

    fn open() -> (TempDir, RocksDb) {
        let dir = TempDir::new().expect("temp dir");
        let db = RocksDb::open(dir.path(), &RocksDbConfig::default()).expect("open db");
        (dir, db)
    }

    #[test]
    fn get_next_key_and_rollback() {
        let (_dir, db) = open();

        let mut tx = db.write();
        tx.set("ko1.owner", "v1").unwrap();
        tx.set("ko2.owner", "v2").unwrap();
        tx.prepare().unwrap().unwrap().commit().unwrap();

        let mut tx = db.write();
        tx.set("ko1.refcount", "1,1").unwrap();
        // The open transaction sees its own write...
        assert_eq!(
            tx.get_next_key("ko1.owner").unwrap().as_deref(),
            Some("ko1.refcount")
        );
        KVTransaction::rollback(tx).unwrap();

        // ...but after rollback it's gone.
        let tx = db.read();
        assert_eq!(
            tx.get_next_key("ko1.owner").unwrap().as_deref(),
            Some("ko2.owner")
        );
    }

    #[test]
    fn survives_reopen() {
        let dir = TempDir::new().expect("temp dir");
        {
            let db = RocksDb::open(dir.path(), &RocksDbConfig::default()).expect("open db");
            let mut tx = db.write();
            tx.set("queue.head", "1").unwrap();
            tx.set("queue.tail", "3").unwrap();
            tx.prepare().unwrap().unwrap().commit().unwrap();
        }
        let db = RocksDb::open(dir.path(), &RocksDbConfig::default()).expect("reopen db");
        let tx = db.read();
        assert_eq!(tx.get("queue.head").unwrap().as_deref(), Some("1"));
        assert_eq!(
            keys_with_prefix(&tx, "queue.").unwrap(),
            vec!["queue.head".to_string(), "queue.tail".to_string()]
        );
    }
}
