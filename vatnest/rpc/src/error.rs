// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use vatnest_kernel_core::{ErrorCode, KernelError};

pub struct JsonRpcError {
    code: i64,
    message: String,
}

/// Stable numeric codes for the operator surface; the code name is part
/// of the message so plain JSON-RPC clients see it without a decoder.
fn code_number(code: ErrorCode) -> i64 {
    match code {
        ErrorCode::VatNotFound => 1001,
        ErrorCode::VatAlreadyExists => 1002,
        ErrorCode::VatDeleted => 1003,
        ErrorCode::StreamReadError => 1004,
        ErrorCode::SubclusterNotFound => 1005,
        ErrorCode::DuplicateEndowment => 1006,
        ErrorCode::Unknown => 1000,
    }
}

impl From<KernelError> for JsonRpcError {
    fn from(value: KernelError) -> Self {
        let code = value.code();
        let name = serde_json::to_string(&code)
            .map(|s| s.trim_matches('"').to_string())
            .unwrap_or_else(|_| "UNKNOWN".to_string());
        Self {
            code: code_number(code),
            message: format!("{name}: {value}"),
        }
    }
}

impl From<anyhow::Error> for JsonRpcError {
    fn from(value: anyhow::Error) -> Self {
        Self {
            code: code_number(ErrorCode::Unknown),
            message: format!("{:#}", value),
        }
    }
}

impl From<JsonRpcError> for jsonrpc_v2::Error {
    fn from(value: JsonRpcError) -> Self {
        Self::Full {
            code: value.code,
            message: value.message,
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use vatnest_kernel_core::{KernelError, VatId};

    use super::JsonRpcError;

    #[test]
    fn code_name_lands_in_the_message() {
        let e: JsonRpcError = KernelError::VatNotFound(VatId::new(3)).into();
        assert_eq!(e.code, 1001);
        assert!(e.message.starts_with("VAT_NOT_FOUND:"));
    }
}
