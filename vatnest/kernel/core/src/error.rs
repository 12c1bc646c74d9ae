// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Kernel errors and the marshalled form that crosses the vat boundary.
//!
//! The kernel never throws into a worker: every failure a vat can observe
//! arrives as a rejection whose capdata body carries a [`MarshalledError`]
//! under the `#error` sentinel. The marshalled form round-trips byte-stable
//! modulo the `stack` string.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capdata::CapData;
use crate::refs::{KernelRef, SubclusterId, VatId};

/// Body key marking a marshalled error payload.
pub const ERROR_SENTINEL: &str = "#error";

/// The fixed enumeration of error codes understood on both sides of the
/// boundary. Anything the kernel cannot classify crosses as `Unknown`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    VatNotFound,
    VatAlreadyExists,
    VatDeleted,
    StreamReadError,
    SubclusterNotFound,
    DuplicateEndowment,
    Unknown,
}

/// An error in the shape that crosses the kernel/vat boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarshalledError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<MarshalledError>>,
}

impl MarshalledError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            data: None,
            stack: None,
            cause: None,
        }
    }

    pub fn with_code(mut self, code: ErrorCode) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_cause(mut self, cause: MarshalledError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Render as a rejection payload. Errors carry no references.
    pub fn to_capdata<S>(&self) -> CapData<S> {
        let mut body = serde_json::Map::new();
        body.insert(
            ERROR_SENTINEL.to_string(),
            serde_json::to_value(self).expect("errors always serialize"),
        );
        let body = serde_json::Value::Object(body);
        CapData::new(
            serde_json::to_string(&body).expect("errors always serialize"),
            Vec::new(),
        )
    }

    /// Recognize a rejection payload produced by [`MarshalledError::to_capdata`].
    pub fn from_capdata<S>(capdata: &CapData<S>) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_str(&capdata.body).ok()?;
        let inner = value.as_object()?.get(ERROR_SENTINEL)?;
        serde_json::from_value(inner.clone()).ok()
    }
}

impl From<&KernelError> for MarshalledError {
    fn from(e: &KernelError) -> Self {
        MarshalledError::new(e.to_string()).with_code(e.code())
    }
}

/// Errors produced by the kernel proper.
///
/// Operator-facing failures map onto [`ErrorCode`]; everything else is a
/// protocol violation or an internal fault and crosses as `Unknown`.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("vat {0} not found")]
    VatNotFound(VatId),
    #[error("vat '{0}' already exists")]
    VatAlreadyExists(String),
    #[error("vat {0} was deleted")]
    VatDeleted(VatId),
    #[error("worker stream read failed: {0}")]
    StreamReadError(String),
    #[error("subcluster {0} not found")]
    SubclusterNotFound(SubclusterId),
    #[error("duplicate endowment '{0}'")]
    DuplicateEndowment(String),
    #[error("invalid reference '{0}'")]
    InvalidRef(String),
    #[error("device references are not supported: '{0}'")]
    UnsupportedDevice(String),
    #[error("invalid capdata: {0}")]
    InvalidCapData(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("{vat} has no c-list entry for {kref}")]
    ClistMiss { vat: VatId, kref: KernelRef },
    #[error("{vat} is not the decider of {promise}")]
    NotDecider { vat: VatId, promise: KernelRef },
    #[error("{0} is already resolved")]
    AlreadyResolved(KernelRef),
    #[error("invalid syscall from {vat}: {reason}")]
    InvalidSyscall { vat: VatId, reason: String },
    #[error("store error")]
    Store(#[from] vatnest_storage::KVError),
    #[error("corrupt kernel state: {0}")]
    Corrupt(String),
}

impl KernelError {
    pub fn code(&self) -> ErrorCode {
        match self {
            KernelError::VatNotFound(_) => ErrorCode::VatNotFound,
            KernelError::VatAlreadyExists(_) => ErrorCode::VatAlreadyExists,
            KernelError::VatDeleted(_) => ErrorCode::VatDeleted,
            KernelError::StreamReadError(_) => ErrorCode::StreamReadError,
            KernelError::SubclusterNotFound(_) => ErrorCode::SubclusterNotFound,
            KernelError::DuplicateEndowment(_) => ErrorCode::DuplicateEndowment,
            _ => ErrorCode::Unknown,
        }
    }

    pub fn marshal(&self) -> MarshalledError {
        self.into()
    }
}

#[cfg(feature = "arb")]
mod arb {
    use quickcheck::{Arbitrary, Gen};

    use super::{ErrorCode, MarshalledError};

    impl Arbitrary for ErrorCode {
        fn arbitrary(g: &mut Gen) -> Self {
            *g.choose(&[
                ErrorCode::VatNotFound,
                ErrorCode::VatAlreadyExists,
                ErrorCode::VatDeleted,
                ErrorCode::StreamReadError,
                ErrorCode::SubclusterNotFound,
                ErrorCode::DuplicateEndowment,
                ErrorCode::Unknown,
            ])
            .expect("slice is non-empty")
        }
    }

    impl Arbitrary for MarshalledError {
        fn arbitrary(g: &mut Gen) -> Self {
            // Keep the cause chain short; deep recursion adds nothing.
            let cause = if u8::arbitrary(g) % 4 == 0 {
                Some(Box::new(MarshalledError {
                    message: String::arbitrary(g),
                    code: Option::arbitrary(g),
                    data: None,
                    stack: Option::arbitrary(g),
                    cause: None,
                }))
            } else {
                None
            };
            MarshalledError {
                message: String::arbitrary(g),
                code: Option::arbitrary(g),
                data: None,
                stack: Option::arbitrary(g),
                cause,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorCode, KernelError, MarshalledError};
    use crate::capdata::CapData;
    use crate::refs::{KernelRef, VatId};

    #[test]
    fn marshalled_error_roundtrip() {
        let err = MarshalledError::new("vat fault")
            .with_code(ErrorCode::Unknown)
            .with_cause(MarshalledError::new("worker died").with_code(ErrorCode::StreamReadError));

        let capdata: CapData<KernelRef> = err.to_capdata();
        capdata.verify().unwrap();
        let back = MarshalledError::from_capdata(&capdata).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn non_error_capdata_is_not_an_error() {
        let capdata: CapData<KernelRef> = CapData::text("hi");
        assert_eq!(MarshalledError::from_capdata(&capdata), None);
    }

    #[test]
    fn kernel_error_codes() {
        assert_eq!(
            KernelError::VatNotFound(VatId::new(3)).code(),
            ErrorCode::VatNotFound
        );
        assert_eq!(
            KernelError::InvalidRef("junk".into()).code(),
            ErrorCode::Unknown
        );
    }

    #[test]
    fn code_serializes_screaming() {
        let json = serde_json::to_string(&ErrorCode::VatNotFound).unwrap();
        assert_eq!(json, "\"VAT_NOT_FOUND\"");
    }
}
