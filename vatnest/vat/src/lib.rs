// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! The boundary between the kernel and its vat workers.
//!
//! The kernel only ever talks to a [`service::VatHandle`]: a pair of framed
//! channels carrying deliveries one way and syscalls the other. Where those
//! channels lead is the worker service's business; [`local`] runs workers as
//! tokio tasks in the kernel process, which is what tests and single-process
//! clusters use. A remote service would carry the same frames over a socket.

pub mod behavior;
pub mod local;
pub mod service;
