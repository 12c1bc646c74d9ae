// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Method handlers. Each is a thin translation between the JSON-RPC
//! params/result shapes and a `KernelHandle` call.

use std::sync::Arc;

use jsonrpc_v2::{Data, MapRouter, Params, ServerBuilder};

use vatnest_kernel::{KernelHandle, KernelStatus, LaunchedSubcluster, LaunchedVat};

use crate::error::JsonRpcError;
use crate::types::{
    ExecuteQueryParams, ForgetPromiseParams, LaunchSubclusterParams, LaunchVatParams, QueryRow,
    QueueMessageParams, QueueMessageResult, SubclusterIdParams, VatIdParams,
};

type Kernel = Data<Arc<KernelHandle>>;

pub fn register_methods(server: ServerBuilder<MapRouter>) -> ServerBuilder<MapRouter> {
    server
        .with_method("vatnest_launchVat", launch_vat)
        .with_method("vatnest_launchSubcluster", launch_subcluster)
        .with_method("vatnest_terminateVat", terminate_vat)
        .with_method("vatnest_terminateSubcluster", terminate_subcluster)
        .with_method("vatnest_restartVat", restart_vat)
        .with_method("vatnest_queueMessage", queue_message)
        .with_method("vatnest_forgetPromise", forget_promise)
        .with_method("vatnest_collectGarbage", collect_garbage)
        .with_method("vatnest_clearState", clear_state)
        .with_method("vatnest_executeDBQuery", execute_db_query)
        .with_method("vatnest_getStatus", get_status)
}

async fn launch_vat(
    kernel: Kernel,
    Params(params): Params<LaunchVatParams>,
) -> Result<LaunchedVat, jsonrpc_v2::Error> {
    kernel
        .launch_vat(params.config)
        .await
        .map_err(|e| JsonRpcError::from(e).into())
}

async fn launch_subcluster(
    kernel: Kernel,
    Params(params): Params<LaunchSubclusterParams>,
) -> Result<LaunchedSubcluster, jsonrpc_v2::Error> {
    kernel
        .launch_subcluster(params.config)
        .await
        .map_err(|e| JsonRpcError::from(e).into())
}

async fn terminate_vat(
    kernel: Kernel,
    Params(params): Params<VatIdParams>,
) -> Result<(), jsonrpc_v2::Error> {
    kernel
        .terminate_vat(params.vat_id)
        .await
        .map_err(|e| JsonRpcError::from(e).into())
}

async fn terminate_subcluster(
    kernel: Kernel,
    Params(params): Params<SubclusterIdParams>,
) -> Result<(), jsonrpc_v2::Error> {
    kernel
        .terminate_subcluster(params.subcluster_id)
        .await
        .map_err(|e| JsonRpcError::from(e).into())
}

async fn restart_vat(
    kernel: Kernel,
    Params(params): Params<VatIdParams>,
) -> Result<(), jsonrpc_v2::Error> {
    kernel
        .restart_vat(params.vat_id)
        .await
        .map_err(|e| JsonRpcError::from(e).into())
}

async fn queue_message(
    kernel: Kernel,
    Params(params): Params<QueueMessageParams>,
) -> Result<QueueMessageResult, jsonrpc_v2::Error> {
    let result = kernel
        .queue_message(params.target, params.method, params.args)
        .await
        .map_err(JsonRpcError::from)?;
    Ok(QueueMessageResult { result })
}

async fn forget_promise(
    kernel: Kernel,
    Params(params): Params<ForgetPromiseParams>,
) -> Result<(), jsonrpc_v2::Error> {
    kernel
        .forget_promise(params.kpid)
        .await
        .map_err(|e| JsonRpcError::from(e).into())
}

async fn collect_garbage(kernel: Kernel) -> Result<(), jsonrpc_v2::Error> {
    kernel
        .collect_garbage()
        .await
        .map_err(|e| JsonRpcError::from(e).into())
}

async fn clear_state(kernel: Kernel) -> Result<(), jsonrpc_v2::Error> {
    kernel
        .clear_state()
        .await
        .map_err(|e| JsonRpcError::from(e).into())
}

async fn execute_db_query(
    kernel: Kernel,
    Params(params): Params<ExecuteQueryParams>,
) -> Result<Vec<QueryRow>, jsonrpc_v2::Error> {
    let rows = kernel
        .execute_db_query(params.query)
        .await
        .map_err(JsonRpcError::from)?;
    Ok(rows
        .into_iter()
        .map(|r| QueryRow {
            key: r.key,
            value: r.value,
        })
        .collect())
}

async fn get_status(kernel: Kernel) -> Result<KernelStatus, jsonrpc_v2::Error> {
    kernel
        .get_status()
        .await
        .map_err(|e| JsonRpcError::from(e).into())
}
