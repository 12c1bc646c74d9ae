// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT
use std::fmt;
use std::str::FromStr;

use vatnest_kernel_core::KernelError;

/// Where a vat is in its life.
///
/// `Terminated` is terminal and sticky: the `vat.<id>.state` key outlives
/// the rest of the vat's records so the kernel can answer `VAT_DELETED`
/// instead of `VAT_NOT_FOUND` for ids it has actually seen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VatLifecycle {
    Launching,
    Running,
    Paused,
    Terminating,
    Terminated,
}

impl VatLifecycle {
    /// Can the vat receive deliveries (possibly after a relaunch)?
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            VatLifecycle::Launching | VatLifecycle::Running | VatLifecycle::Paused
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VatLifecycle::Launching => "launching",
            VatLifecycle::Running => "running",
            VatLifecycle::Paused => "paused",
            VatLifecycle::Terminating => "terminating",
            VatLifecycle::Terminated => "terminated",
        }
    }
}

impl fmt::Display for VatLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VatLifecycle {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "launching" => Ok(VatLifecycle::Launching),
            "running" => Ok(VatLifecycle::Running),
            "paused" => Ok(VatLifecycle::Paused),
            "terminating" => Ok(VatLifecycle::Terminating),
            "terminated" => Ok(VatLifecycle::Terminated),
            other => Err(KernelError::Corrupt(format!(
                "unknown vat lifecycle state '{other}'"
            ))),
        }
    }
}
