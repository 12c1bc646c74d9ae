// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT
use rocksdb::Options;

/// RocksDB configuration exposed in settings.
#[derive(Clone, Debug)]
pub struct RocksDbConfig {
    /// Creates database if it doesn't exist.
    pub create_if_missing: bool,
    /// Number of threads for compaction and flushing; defaults to the
    /// number of cores.
    pub parallelism: i32,
    /// Per-memtable write buffer, in bytes.
    pub write_buffer_size: usize,
    /// Maximum number of open files; -1 means unlimited.
    pub max_open_files: i32,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            parallelism: num_cpus::get() as i32,
            write_buffer_size: 256 * 1024 * 1024,
            max_open_files: -1,
        }
    }
}

impl From<&RocksDbConfig> for Options {
    fn from(config: &RocksDbConfig) -> Self {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(config.create_if_missing);
        db_opts.create_missing_column_families(true);
        db_opts.increase_parallelism(config.parallelism);
        db_opts.set_write_buffer_size(config.write_buffer_size);
        db_opts.set_max_open_files(config.max_open_files);
        #[cfg(feature = "lz4")]
        db_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        db_opts
    }
}
