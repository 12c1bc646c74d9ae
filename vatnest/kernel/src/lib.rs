// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! The object-capability kernel.
//!
//! A [`Kernel`] owns the durable Store, a run queue of deliveries and
//! notifications, the per-vat c-lists translating between reference
//! spaces, and the garbage-collection protocol that reclaims objects no
//! vat can reach. Execution is single-threaded cooperative: one crank at
//! a time, one store transaction per crank, committed only when the crank
//! succeeds.
//!
//! Module map, leaves first: [`keys`] lays out the keyspace, [`state`]
//! wraps one open transaction with typed table operations, [`clist`] and
//! [`translate`] move references between spaces, [`resolve`] runs the
//! promise protocol, [`crank`] executes one queue entry against one vat,
//! [`gc`] reaps between cranks, and [`kernel`] is the operator facade.

mod clist;
mod crank;
mod gc;
mod handle;
mod kernel;
mod keys;
mod lifecycle;
mod resolve;
mod state;
mod translate;

pub use handle::{KernelCommand, KernelHandle};
pub use kernel::{
    Kernel, KernelOptions, KernelStatus, LaunchedSubcluster, LaunchedVat, SubclusterVat, VatStatus,
};
pub use lifecycle::VatLifecycle;
pub use state::{KernelState, PromiseStatus};
