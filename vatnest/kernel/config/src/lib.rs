// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Configuration records the operator hands to the kernel.
//!
//! A [`VatConfig`] is everything needed to (re)launch one vat: a name, the
//! worker image to run, and opaque parameters passed to the bootstrap
//! delivery. A [`ClusterConfig`] groups vats into a subcluster with a
//! designated bootstrap vat. Both persist verbatim in the Store so a
//! restarted kernel can relaunch its vats.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use vatnest_kernel_core::KernelError;

/// Names a worker image, rendered `bundle:<name>`.
///
/// The kernel treats the name as opaque; the worker service resolves it to
/// an executor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BundleSpec(String);

impl BundleSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BundleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bundle:{}", self.0)
    }
}

impl FromStr for BundleSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix("bundle:") {
            Some(name) if !name.is_empty() => Ok(Self(name.to_string())),
            _ => Err(ConfigError::InvalidBundle(s.to_string())),
        }
    }
}

impl Serialize for BundleSpec {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BundleSpec {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Everything needed to launch one vat.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VatConfig {
    pub name: String,
    pub bundle: BundleSpec,
    /// Opaque parameters the worker receives at launch.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub parameters: serde_json::Value,
}

impl VatConfig {
    pub fn new(name: impl Into<String>, bundle: BundleSpec) -> Self {
        Self {
            name: name.into(),
            bundle,
            parameters: serde_json::Value::Null,
        }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }
}

/// A named group of vats bootstrapped together.
///
/// `vats` is ordered: launch, introduction and termination all follow it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Name of the member that receives the bootstrap delivery.
    pub bootstrap: String,
    pub vats: Vec<VatConfig>,
}

impl ClusterConfig {
    /// Check the shape before any vat is launched: member names unique,
    /// bootstrap among them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for vat in &self.vats {
            if !seen.insert(vat.name.as_str()) {
                return Err(ConfigError::DuplicateVat(vat.name.clone()));
            }
        }
        if !seen.contains(self.bootstrap.as_str()) {
            return Err(ConfigError::UnknownBootstrap(self.bootstrap.clone()));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("duplicate vat name '{0}' in cluster")]
    DuplicateVat(String),
    #[error("bootstrap vat '{0}' is not a member of the cluster")]
    UnknownBootstrap(String),
    #[error("invalid bundle spec '{0}'")]
    InvalidBundle(String),
}

impl From<ConfigError> for KernelError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::DuplicateVat(name) => KernelError::DuplicateEndowment(name),
            other => KernelError::InvalidConfig(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BundleSpec, ClusterConfig, ConfigError, VatConfig};

    fn cluster() -> ClusterConfig {
        ClusterConfig {
            bootstrap: "alice".to_string(),
            vats: vec![
                VatConfig::new("alice", BundleSpec::named("greeter")),
                VatConfig::new("bob", BundleSpec::named("counter")),
            ],
        }
    }

    #[test]
    fn valid_cluster() {
        cluster().validate().unwrap();
    }

    #[test]
    fn duplicate_vat_name() {
        let mut c = cluster();
        c.vats.push(VatConfig::new("bob", BundleSpec::named("other")));
        assert!(matches!(
            c.validate(),
            Err(ConfigError::DuplicateVat(name)) if name == "bob"
        ));
    }

    #[test]
    fn unknown_bootstrap() {
        let mut c = cluster();
        c.bootstrap = "carol".to_string();
        assert!(matches!(
            c.validate(),
            Err(ConfigError::UnknownBootstrap(_))
        ));
    }

    #[test]
    fn bundle_spec_roundtrip() {
        let b: BundleSpec = "bundle:greeter".parse().unwrap();
        assert_eq!(b.name(), "greeter");
        assert_eq!(b.to_string(), "bundle:greeter");
        assert!("greeter".parse::<BundleSpec>().is_err());
        assert!("bundle:".parse::<BundleSpec>().is_err());
    }

    #[test]
    fn config_json_shape() {
        let c = VatConfig::new("alice", BundleSpec::named("greeter"));
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, r#"{"name":"alice","bundle":"bundle:greeter"}"#);
        let back: VatConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }
}
