// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use tracing_subscriber::EnvFilter;

use vatnest_app::{cmd, options};

#[tokio::main]
async fn main() {
    let opts = options::parse();

    // Log events to stdout; RUST_LOG wins over the -v flags.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(opts.tracing_level().as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = cmd::exec(&opts).await {
        tracing::error!("failed to execute {:?}: {e:#}", opts.command);
        std::process::exit(1);
    }
}
