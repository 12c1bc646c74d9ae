// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT
use std::error::Error;

/// In-memory KV store backend.
#[cfg(feature = "inmem")]
pub mod im;

mod query;

pub use query::{KVQuery, KVRow};

/// Possible errors during key-value operations.
#[derive(Debug, thiserror::Error)]
pub enum KVError {
    /// KV transaction was aborted due to some business rule violation.
    #[error("transaction aborted: {0}")]
    Abort(Box<dyn Error + Send + Sync>),
    /// The query string passed to `execute_query` was not understood.
    #[error("invalid query: {0}")]
    Query(String),
    /// Some unexpected error occurred in the underlying implementation,
    /// e.g. some IO error with a database.
    #[error("unexpected store error: {0}")]
    Unexpected(Box<dyn Error + Send + Sync>),
}

pub type KVResult<T> = Result<T, KVError>;

/// Operations available on a read transaction.
///
/// Keys and values are UTF-8 strings; byte order on keys is the only
/// ordering the kernel relies on.
pub trait KVRead {
    fn get(&self, key: &str) -> KVResult<Option<String>>;

    /// The smallest key strictly greater than `key` in byte order,
    /// whether or not `key` itself is present.
    ///
    /// Ordered scans over key prefixes (queue traversal, c-list sweeps,
    /// state wipes) are built out of repeated calls to this.
    fn get_next_key(&self, key: &str) -> KVResult<Option<String>>;
}

/// Operations available on a write transaction.
pub trait KVWrite: KVRead {
    fn set(&mut self, key: &str, value: &str) -> KVResult<()>;

    fn delete(&mut self, key: &str) -> KVResult<()>;
}

/// Transaction running on a KV store, ending with a commit or a rollback.
///
/// Writes must not be visible to other transactions until committed, and
/// durability is assumed on commit. The kernel opens exactly one write
/// transaction per crank.
pub trait KVTransaction {
    type Prepared: KVTransactionPrepared;

    /// Prepare to commit the transaction. This gives us a chance to do
    /// Optimistic Concurrency Control, to only take out locks during commit.
    ///
    /// Returns `None` if the transaction lost a conflict and should be retried.
    fn prepare(self) -> KVResult<Option<Self::Prepared>>;

    /// Abandon the changes of the transaction.
    fn rollback(self) -> KVResult<()>;

    /// Convenience method to prepare and commit.
    ///
    /// Returns a flag indicating whether the commit was successful.
    fn prepare_and_commit(self) -> KVResult<bool>
    where
        Self: Sized,
    {
        match self.prepare()? {
            Some(tx) => {
                tx.commit()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Transaction in a state when it's ready to be committed.
pub trait KVTransactionPrepared {
    fn commit(self) -> KVResult<()>;
    fn rollback(self) -> KVResult<()>;
}

/// Interface for stores that support read-only transactions.
///
/// Any resources held by the read transaction should be released when it's dropped.
pub trait KVReadable {
    type Tx<'a>: KVRead
    where
        Self: 'a;

    /// Start a read-only transaction.
    fn read(&self) -> Self::Tx<'_>;
}

/// Interface for stores that support read-write transactions.
pub trait KVWritable {
    type Tx<'a>: KVWrite + KVTransaction
    where
        Self: 'a;

    /// Start a read-write transaction.
    fn write(&self) -> Self::Tx<'_>;
}

/// Collect every key starting with `prefix`, in byte order.
///
/// Helper for sweeps where the caller deletes or inspects each key;
/// the iteration itself never holds borrows across awaits.
pub fn keys_with_prefix<T: KVRead + ?Sized>(tx: &T, prefix: &str) -> KVResult<Vec<String>> {
    let mut keys = Vec::new();
    // `get_next_key` is strictly-greater, so probe the prefix itself first.
    if tx.get(prefix)?.is_some() {
        keys.push(prefix.to_string());
    }
    let mut cursor = prefix.to_string();
    while let Some(k) = tx.get_next_key(&cursor)? {
        if !k.starts_with(prefix) {
            break;
        }
        keys.push(k.clone());
        cursor = k;
    }
    Ok(keys)
}
