// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Typed params and results of the operator methods.

use serde::{Deserialize, Serialize};

use vatnest_kernel_config::{ClusterConfig, VatConfig};
use vatnest_kernel_core::{CapData, KernelRef, SubclusterId, VatId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchVatParams {
    pub config: VatConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchSubclusterParams {
    pub config: ClusterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VatIdParams {
    pub vat_id: VatId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubclusterIdParams {
    pub subcluster_id: SubclusterId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessageParams {
    pub target: KernelRef,
    pub method: String,
    pub args: CapData<KernelRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessageResult {
    /// The kpid the operator can poll for the outcome.
    pub result: KernelRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgetPromiseParams {
    pub kpid: KernelRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteQueryParams {
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRow {
    pub key: String,
    pub value: String,
}
