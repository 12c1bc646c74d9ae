// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! In-memory KV store backend, for testing and for clusters that don't
//! need durability across process restarts.
//!
//! Reads run against an immutable snapshot taken when the transaction
//! starts; writes accumulate in an overlay that is applied on commit.
//! The kernel is the only writer, so there is no conflict detection.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::{Arc, RwLock};
use std::thread;

use im::OrdMap;

use crate::{
    KVRead, KVReadable, KVResult, KVTransaction, KVTransactionPrepared, KVWritable, KVWrite,
};

type Data = OrdMap<String, String>;

/// In-memory ordered KV store.
#[derive(Clone, Default)]
pub struct MemDb {
    data: Arc<RwLock<Data>>,
}

impl MemDb {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Data {
        self.data.read().expect("mem store poisoned").clone()
    }
}

/// Read-only transaction: a snapshot of the data at the time it started.
pub struct MemDbReadTx {
    snapshot: Data,
}

/// Read-write transaction: a snapshot plus an overlay of pending writes,
/// where `None` marks a deletion.
pub struct MemDbWriteTx<'a> {
    db: &'a MemDb,
    snapshot: Data,
    writes: BTreeMap<String, Option<String>>,
    done: bool,
}

impl KVReadable for MemDb {
    type Tx<'a> = MemDbReadTx
    where
        Self: 'a;

    fn read(&self) -> Self::Tx<'_> {
        MemDbReadTx {
            snapshot: self.snapshot(),
        }
    }
}

impl KVWritable for MemDb {
    type Tx<'a> = MemDbWriteTx<'a>
    where
        Self: 'a;

    fn write(&self) -> Self::Tx<'_> {
        MemDbWriteTx {
            db: self,
            snapshot: self.snapshot(),
            writes: BTreeMap::new(),
            done: false,
        }
    }
}

fn next_key_in(snapshot: &Data, key: &str) -> Option<String> {
    snapshot
        .range((Excluded(key.to_string()), Unbounded))
        .next()
        .map(|(k, _)| k.clone())
}

impl KVRead for MemDbReadTx {
    fn get(&self, key: &str) -> KVResult<Option<String>> {
        Ok(self.snapshot.get(key).cloned())
    }

    fn get_next_key(&self, key: &str) -> KVResult<Option<String>> {
        Ok(next_key_in(&self.snapshot, key))
    }
}

impl<'a> KVRead for MemDbWriteTx<'a> {
    fn get(&self, key: &str) -> KVResult<Option<String>> {
        match self.writes.get(key) {
            Some(pending) => Ok(pending.clone()),
            None => Ok(self.snapshot.get(key).cloned()),
        }
    }

    fn get_next_key(&self, key: &str) -> KVResult<Option<String>> {
        // Next pending insert after `key`.
        let pending = self
            .writes
            .range::<String, _>((Excluded(key.to_string()), Unbounded))
            .find(|(_, v)| v.is_some())
            .map(|(k, _)| k.clone());

        // Next snapshot key after `key` that isn't pending deletion.
        let mut committed = None;
        let mut cursor = key.to_string();
        while let Some(k) = next_key_in(&self.snapshot, &cursor) {
            if matches!(self.writes.get(&k), Some(None)) {
                cursor = k;
                continue;
            }
            committed = Some(k);
            break;
        }

        Ok(match (pending, committed) {
            (Some(p), Some(c)) => Some(p.min(c)),
            (p, c) => p.or(c),
        })
    }
}

impl<'a> KVWrite for MemDbWriteTx<'a> {
    fn set(&mut self, key: &str, value: &str) -> KVResult<()> {
        self.writes.insert(key.to_string(), Some(value.to_string()));
        Ok(())
    }

    fn delete(&mut self, key: &str) -> KVResult<()> {
        self.writes.insert(key.to_string(), None);
        Ok(())
    }
}

impl<'a> KVTransaction for MemDbWriteTx<'a> {
    type Prepared = Self;

    fn prepare(self) -> KVResult<Option<Self::Prepared>> {
        Ok(Some(self))
    }

    fn rollback(mut self) -> KVResult<()> {
        self.done = true;
        Ok(())
    }
}

impl<'a> KVTransactionPrepared for MemDbWriteTx<'a> {
    fn commit(mut self) -> KVResult<()> {
        let writes = std::mem::take(&mut self.writes);
        self.done = true;
        let mut data = self.db.data.write().expect("mem store poisoned");
        for (k, v) in writes {
            match v {
                Some(v) => {
                    data.insert(k, v);
                }
                None => {
                    data.remove(&k);
                }
            }
        }
        Ok(())
    }

    fn rollback(self) -> KVResult<()> {
        KVTransaction::rollback(self)
    }
}

impl<'a> Drop for MemDbWriteTx<'a> {
    fn drop(&mut self) {
        if !self.done && !thread::panicking() {
            panic!("Transaction prematurely dropped. Must call `.commit()` or `.rollback()`.");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use quickcheck_macros::quickcheck;

    use super::MemDb;
    use crate::{
        keys_with_prefix, KVQuery, KVRead, KVReadable, KVTransaction, KVTransactionPrepared,
        KVWritable, KVWrite,
    };

    #[test]
    fn writes_are_isolated_until_commit() {
        let db = MemDb::new();
        let mut tx = db.write();
        tx.set("a", "1").unwrap();

        assert_eq!(db.read().get("a").unwrap(), None);

        tx.prepare().unwrap().unwrap().commit().unwrap();
        assert_eq!(db.read().get("a").unwrap(), Some("1".to_string()));
    }

    #[test]
    fn rollback_discards_writes() {
        let db = MemDb::new();
        let mut tx = db.write();
        tx.set("a", "1").unwrap();
        tx.delete("a").unwrap();
        KVTransaction::rollback(tx).unwrap();

        assert_eq!(db.read().get("a").unwrap(), None);
    }

    #[test]
    fn next_key_sees_overlay() {
        let db = MemDb::new();
        let mut tx = db.write();
        tx.set("a", "1").unwrap();
        tx.set("c", "3").unwrap();
        tx.prepare().unwrap().unwrap().commit().unwrap();

        let mut tx = db.write();
        tx.set("b", "2").unwrap();
        tx.delete("c").unwrap();

        assert_eq!(tx.get_next_key("a").unwrap(), Some("b".to_string()));
        assert_eq!(tx.get_next_key("b").unwrap(), None);
        KVTransaction::rollback(tx).unwrap();
    }

    #[test]
    fn prefix_scan() {
        let db = MemDb::new();
        let mut tx = db.write();
        for (k, v) in [("v1.a", "1"), ("v1.b", "2"), ("v2.a", "3")] {
            tx.set(k, v).unwrap();
        }
        tx.prepare().unwrap().unwrap().commit().unwrap();

        let tx = db.read();
        let keys = keys_with_prefix(&tx, "v1.").unwrap();
        assert_eq!(keys, vec!["v1.a".to_string(), "v1.b".to_string()]);
    }

    #[test]
    fn query_prefix_and_limit() {
        let db = MemDb::new();
        let mut tx = db.write();
        for i in 0..5 {
            tx.set(&format!("queue.{i}"), &i.to_string()).unwrap();
        }
        tx.set("vat.1", "x").unwrap();
        tx.prepare().unwrap().unwrap().commit().unwrap();

        let q = KVQuery::parse("SELECT key, value FROM kv WHERE key LIKE 'queue.%' LIMIT 3")
            .unwrap();
        let rows = q.execute(&db.read()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].key, "queue.0");
        assert_eq!(rows[2].key, "queue.2");
    }

    #[test]
    #[should_panic(expected = "prematurely dropped")]
    fn dropped_write_tx_panics() {
        let db = MemDb::new();
        let mut tx = db.write();
        tx.set("a", "1").unwrap();
        drop(tx);
    }

    /// `get_next_key` through a dirty overlay must agree with committing
    /// the overlay first and asking the snapshot.
    #[quickcheck]
    fn prop_next_key_matches_model(
        committed: BTreeMap<String, String>,
        inserts: BTreeMap<String, String>,
        deletes: Vec<String>,
        probe: String,
    ) -> bool {
        let db = MemDb::new();
        let mut tx = db.write();
        for (k, v) in &committed {
            tx.set(k, v).unwrap();
        }
        tx.prepare().unwrap().unwrap().commit().unwrap();

        let mut model: BTreeMap<String, String> = committed;
        let mut tx = db.write();
        for (k, v) in &inserts {
            tx.set(k, v).unwrap();
            model.insert(k.clone(), v.clone());
        }
        for k in &deletes {
            tx.delete(k).unwrap();
            model.remove(k);
        }

        let expected = model
            .range::<String, _>((
                std::ops::Bound::Excluded(probe.clone()),
                std::ops::Bound::Unbounded,
            ))
            .next()
            .map(|(k, _)| k.clone());
        let actual = tx.get_next_key(&probe).unwrap();
        KVTransaction::rollback(tx).unwrap();
        expected == actual
    }
}
