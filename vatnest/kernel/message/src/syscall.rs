// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Frames a worker sends back to the kernel during a crank.
//!
//! Each syscall is answered with exactly one [`SyscallResult`] before the
//! worker may emit the next one; the kernel reflects the effect into the
//! crank's store transaction before replying, so a worker that observes a
//! reply can rely on the write.

use serde::{Deserialize, Serialize};

use vatnest_kernel_core::{CapData, VatRef};

/// One promise settlement inside a `Resolve` batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub kpid: VatRef,
    pub rejected: bool,
    pub value: CapData<VatRef>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum VatSyscall {
    /// Send a message; `result` names the promise the vat wants to hold
    /// for the outcome (a fresh `p+` it does not decide).
    Send {
        target: VatRef,
        method: String,
        args: CapData<VatRef>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<VatRef>,
    },
    /// Ask to be notified when a promise settles.
    Subscribe { kpid: VatRef },
    /// Settle promises this vat decides. Takes effect atomically at
    /// crank end.
    Resolve { resolutions: Vec<Resolution> },
    /// Self-terminate after this crank.
    Exit {
        failure: bool,
        value: CapData<VatRef>,
    },
    /// No strong references left to these imports.
    DropImports { refs: Vec<VatRef> },
    /// No references at all left to these imports.
    RetireImports { refs: Vec<VatRef> },
    /// These exports are gone; importers should be told.
    RetireExports { refs: Vec<VatRef> },
    VatstoreGet { key: String },
    VatstoreSet { key: String, value: String },
    VatstoreDelete { key: String },
    VatstoreGetNextKey { key: String },
}

impl VatSyscall {
    /// Name for logging and error reports.
    pub fn kind(&self) -> &'static str {
        match self {
            VatSyscall::Send { .. } => "send",
            VatSyscall::Subscribe { .. } => "subscribe",
            VatSyscall::Resolve { .. } => "resolve",
            VatSyscall::Exit { .. } => "exit",
            VatSyscall::DropImports { .. } => "dropImports",
            VatSyscall::RetireImports { .. } => "retireImports",
            VatSyscall::RetireExports { .. } => "retireExports",
            VatSyscall::VatstoreGet { .. } => "vatstoreGet",
            VatSyscall::VatstoreSet { .. } => "vatstoreSet",
            VatSyscall::VatstoreDelete { .. } => "vatstoreDelete",
            VatSyscall::VatstoreGetNextKey { .. } => "vatstoreGetNextKey",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyscallResult {
    /// The effect is recorded; nothing to return.
    Ok,
    /// Result of the vatstore reads.
    Value {
        #[serde(default)]
        value: Option<String>,
    },
    /// The syscall was invalid. The kernel fails the crank right after
    /// sending this, so it is informational for worker-side logs.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use quickcheck_macros::quickcheck;

    use super::{SyscallResult, VatSyscall};

    #[quickcheck]
    fn prop_syscall_json_roundtrip(syscall: VatSyscall) -> bool {
        let json = serde_json::to_string(&syscall).unwrap();
        let back: VatSyscall = serde_json::from_str(&json).unwrap();
        back == syscall
    }

    #[test]
    fn result_value_shape() {
        let json = serde_json::to_string(&SyscallResult::Value {
            value: Some("x".into()),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"value","value":"x"}"#);
    }
}
