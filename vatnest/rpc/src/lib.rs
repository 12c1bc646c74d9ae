// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! JSON-RPC access to a running kernel.
//!
//! Every operator method maps 1:1 onto a `KernelHandle` call; the server
//! is a thin axum + jsonrpc-v2 shell with no state of its own.

use std::net::ToSocketAddrs;
use std::sync::Arc;

use anyhow::anyhow;
use axum::routing::post;
use jsonrpc_v2::Data;

use vatnest_kernel::KernelHandle;

mod apis;
mod error;
mod rpc_http_handler;
mod types;

pub use error::JsonRpcError;
pub use types::*;

type JsonRpcServer = Arc<jsonrpc_v2::Server<jsonrpc_v2::MapRouter>>;

/// Start listening to JSON-RPC requests.
pub async fn listen<A: ToSocketAddrs>(listen_addr: A, kernel: KernelHandle) -> anyhow::Result<()> {
    if let Some(listen_addr) = listen_addr.to_socket_addrs()?.next() {
        let server = make_server(kernel);
        let router = make_router(server);
        let server = axum::Server::try_bind(&listen_addr)?.serve(router.into_make_service());

        tracing::info!(?listen_addr, "bound operator API");
        server.await?;
        Ok(())
    } else {
        Err(anyhow!("failed to convert to any socket address"))
    }
}

/// Register method handlers with the JSON-RPC server construct.
fn make_server(kernel: KernelHandle) -> JsonRpcServer {
    let server = jsonrpc_v2::Server::new().with_data(Data(Arc::new(kernel)));
    let server = apis::register_methods(server);
    server.finish()
}

/// Register routes in the `axum` router to handle JSON-RPC calls.
fn make_router(server: JsonRpcServer) -> axum::Router {
    axum::Router::new()
        .route("/rpc/v0", post(rpc_http_handler::handle))
        .with_state(server)
}
