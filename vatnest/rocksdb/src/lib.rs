// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT
mod kvstore;
mod rocks;

pub use kvstore::{KERNEL_CF, RocksDbTx};
pub use rocks::{Error as RocksDbError, RocksDb, RocksDbConfig};
