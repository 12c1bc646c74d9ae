// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Built-in worker bundles.
//!
//! These two are enough to smoke-test a fresh deployment over RPC:
//! `bundle:greeter` answers `ping`, `bundle:counter` counts `inc` calls
//! in its vatstore so restarts are observable.

use async_trait::async_trait;

use vatnest_kernel_core::{CapData, MarshalledError};
use vatnest_kernel_message::delivery::VatDelivery;
use vatnest_vat::behavior::{SyscallClient, VatBehavior};
use vatnest_vat::local::LocalWorkerService;

pub fn register_builtin(workers: &LocalWorkerService) {
    workers.register_bundle("greeter", |_| Ok(Box::new(Greeter)));
    workers.register_bundle("counter", |_| Ok(Box::new(Counter)));
}

fn internal(e: anyhow::Error) -> MarshalledError {
    MarshalledError::new(format!("{e:#}"))
}

struct Greeter;

#[async_trait]
impl VatBehavior for Greeter {
    async fn deliver(
        &mut self,
        delivery: VatDelivery,
        syscall: &mut SyscallClient<'_>,
    ) -> Result<(), MarshalledError> {
        match delivery {
            VatDelivery::Deliver { method, result, .. } => {
                if method != "ping" {
                    return Err(MarshalledError::new(format!("unknown method '{method}'")));
                }
                if let Some(result) = result {
                    syscall
                        .resolve(result, false, CapData::text("hi"))
                        .await
                        .map_err(internal)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

struct Counter;

#[async_trait]
impl VatBehavior for Counter {
    async fn deliver(
        &mut self,
        delivery: VatDelivery,
        syscall: &mut SyscallClient<'_>,
    ) -> Result<(), MarshalledError> {
        match delivery {
            VatDelivery::Deliver { method, result, .. } => {
                if method != "inc" {
                    return Err(MarshalledError::new(format!("unknown method '{method}'")));
                }
                let count: u64 = syscall
                    .vatstore_get("count")
                    .await
                    .map_err(internal)?
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0)
                    + 1;
                syscall
                    .vatstore_set("count", &count.to_string())
                    .await
                    .map_err(internal)?;
                if let Some(result) = result {
                    syscall
                        .resolve(result, false, CapData::text(&count.to_string()))
                        .await
                        .map_err(internal)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
