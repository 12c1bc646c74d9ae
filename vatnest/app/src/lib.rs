// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT
pub mod bundles;
pub mod cmd;
pub mod options;
pub mod settings;
