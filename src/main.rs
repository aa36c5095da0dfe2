//! The bare provider endpoint binary.
//!
//! Takes one required argument, the address of the engine's own RPC
//! endpoint. The address is not consulted by dispatch today; it is accepted
//! and logged so the engine's spawn contract holds, reserved for callback
//! use. On startup the process binds an ephemeral loopback port, writes the
//! port number to stdout, and serves until signalled.
//!
//! This binary ships with an empty handler registry: it answers Configure
//! and rejects everything else until handlers are registered. Teams embed
//! the library and call [`dynamic_provider_host::serve`] with their own
//! registry to host real resource types.

use std::process::ExitCode;

use dynamic_provider_host::{init_logging, serve, HandlerRegistry};
use tracing::info;

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let mut args = std::env::args().skip(1);
    let engine_addr = match args.next() {
        Some(addr) => addr,
        None => {
            eprintln!("fatal: missing <engine> address");
            return ExitCode::FAILURE;
        }
    };

    info!(engine = %engine_addr, "starting dynamic provider endpoint");

    let registry = HandlerRegistry::new();
    match serve(registry).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fatal: {}", e);
            ExitCode::FAILURE
        }
    }
}
