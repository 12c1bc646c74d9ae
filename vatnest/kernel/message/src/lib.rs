// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Message shapes moving through the kernel.
//!
//! [`queue`] holds the entries persisted on the run queue, in kernel
//! reference space. [`delivery`] and [`syscall`] hold the frames exchanged
//! with a vat worker, in that vat's local reference space. The split keeps
//! the translator the single place where one space turns into the other.

pub mod delivery;
pub mod queue;
pub mod syscall;

#[cfg(any(test, feature = "arb"))]
mod arb;
