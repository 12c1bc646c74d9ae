// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Generators shared by the `arb` features of the other crates.
//!
//! Wrapper newtypes are used where a bare `Arbitrary` impl would either be
//! an orphan or would not maintain the invariants the kernel expects
//! (capdata bodies must reference exactly their slot array).

pub mod arb;
