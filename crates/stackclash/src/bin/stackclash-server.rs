//! Runs a StackClash server with the built-in rules and an in-memory
//! account store.
//!
//! Environment:
//! - `STACKCLASH_BIND`: listen address (default `0.0.0.0:8765`)
//! - `RUST_LOG`: log filter (default `info`)

use stackclash::prelude::*;
use tracing_subscriber::EnvFilter;

const DEFAULT_BIND: &str = "0.0.0.0:8765";

#[tokio::main]
async fn main() -> Result<(), StackClashError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let bind = std::env::var("STACKCLASH_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let server = StackClashServerBuilder::new()
        .bind(&bind)
        .build(StandardRules, MemoryAccountStore::new())
        .await?;
    tracing::info!(addr = %bind, "listening");

    server
        .run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for ctrl-c");
            }
        })
        .await
}
