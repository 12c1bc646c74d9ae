// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};

#[derive(Debug, Deserialize)]
pub struct Address {
    pub host: String,
    pub port: u32,
}

impl Address {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize)]
pub struct DbSettings {
    /// Where the RocksDB store lives, relative to the home directory.
    pub data_dir: PathBuf,
    /// Run on the in-memory store instead; nothing survives a restart.
    pub in_memory: bool,
}

#[serde_as]
#[derive(Debug, Deserialize)]
pub struct KernelSettings {
    /// How long one worker round-trip may take before the crank faults.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub crank_timeout: Duration,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Home directory configured on the CLI, to which all paths in
    /// settings can be set relative.
    home_dir: PathBuf,
    pub db: DbSettings,
    pub rpc: Address,
    pub kernel: KernelSettings,
}

impl Settings {
    /// Layered settings: baked-in defaults, then `default.toml`, then the
    /// mode override, then `VATNEST_` environment variables.
    pub fn new(config_dir: &Path, home_dir: &Path, mode: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("db.data_dir", "data")?
            .set_default("db.in_memory", false)?
            .set_default("rpc.host", "127.0.0.1")?
            .set_default("rpc.port", 26680)?
            .set_default("kernel.crank_timeout", 10)?
            .add_source(File::from(config_dir.join("default")).required(false))
            .add_source(File::from(config_dir.join(mode)).required(false))
            .add_source(
                Environment::with_prefix("VATNEST")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .set_override("home_dir", home_dir.to_string_lossy().as_ref())?
            .build()?
            .try_deserialize()
    }

    pub fn data_dir(&self) -> PathBuf {
        if self.db.data_dir.is_absolute() {
            self.db.data_dir.clone()
        } else {
            self.home_dir.join(&self.db.data_dir)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::Settings;

    #[test]
    fn defaults_without_config_files() {
        let settings =
            Settings::new(Path::new("/nonexistent"), Path::new("/tmp/vatnest"), "dev").unwrap();
        assert!(!settings.db.in_memory);
        assert_eq!(settings.rpc.addr(), "127.0.0.1:26680");
        assert_eq!(settings.kernel.crank_timeout.as_secs(), 10);
        assert_eq!(settings.data_dir(), Path::new("/tmp/vatnest/data"));
    }
}
