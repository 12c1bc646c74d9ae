// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Core data structures shared between the kernel, the worker protocol
//! and the operator surface: the two reference spaces, capability data,
//! and the error types that cross process boundaries.

mod capdata;
mod error;
mod refs;

pub use capdata::CapData;
pub use error::{ErrorCode, KernelError, MarshalledError, ERROR_SENTINEL};
pub use refs::{Decider, KernelRef, SubclusterId, VatId, VatRef};

pub type KernelResult<T> = Result<T, KernelError>;
