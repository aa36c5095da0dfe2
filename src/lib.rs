//! Dynamic Provider Host
//!
//! This crate hosts a resource-lifecycle provider endpoint: a gRPC process
//! that receives declarative CRUD requests from an orchestration engine and
//! dispatches them to a pluggable handler resolved *per call* from the
//! resource's own properties. One endpoint manages arbitrary custom resource
//! types without a dedicated provider binary per type.
//!
//! # Overview
//!
//! - **Property bags**: schema-less JSON documents describing resource state.
//!   The reserved `__provider` key holds the *handler reference* naming the
//!   handler implementation governing the resource instance.
//! - **[`ResourceHandler`]**: the capability contract handlers implement:
//!   `check`, `diff`, `create`, `update`, `delete`.
//! - **[`HandlerRegistry`]**: maps handler references to factories; populated
//!   at startup, consulted on every call, one fresh handler per call.
//! - **[`Dispatcher`]**: one procedure per RPC method. `diff` and `update`
//!   run the provider-identity guard first: a changed handler reference
//!   forces replacement (`diff`) or fails the call (`update`) without
//!   consulting the handler.
//! - **Server helpers**: [`serve`] binds an ephemeral loopback port and
//!   publishes it on stdout so the engine can connect.
//!
//! # Quick Start
//!
//! ```ignore
//! use dynamic_provider_host::{
//!     serve, init_logging, HandlerRegistry, ResourceHandler, ProviderError,
//!     CreateResult, PropertyBag,
//! };
//!
//! #[derive(Default)]
//! struct KvHandler;
//!
//! #[async_trait::async_trait]
//! impl ResourceHandler for KvHandler {
//!     async fn create(&self, news: PropertyBag) -> Result<CreateResult, ProviderError> {
//!         Ok(CreateResult::new("kv-1"))
//!     }
//!
//!     async fn delete(&self, id: &str, props: PropertyBag) -> Result<(), ProviderError> {
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging();
//!     let registry = HandlerRegistry::new().register("kv", KvHandler::default);
//!     serve(registry).await
//! }
//! ```
//!
//! # Port Discovery
//!
//! When an endpoint starts via [`serve`], it binds `127.0.0.1:0` and writes
//! the bound port number to stdout as the sole machine-readable line:
//!
//! ```text
//! 54321
//! ```
//!
//! The engine spawns the endpoint as a subprocess, reads that line, and
//! connects over gRPC. All diagnostics go to stderr.
//!
//! # Protocol
//!
//! A single fixed gRPC service, `dynamic.provider.v1.ResourceProvider`:
//!
//! - **Configure**: no-op acknowledgement (no configuration schema exists)
//! - **Invoke**: always fails, naming the requested function token
//! - **Check**: validates inputs, computes defaults
//! - **Diff**: computes replacement-forcing properties; guard applies
//! - **Create/Update/Delete**: CRUD on one resource instance; guard applies
//!   to Update

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dispatch;
pub mod error;
pub mod handler;
pub mod logging;
pub mod registry;
pub mod server;
pub mod testing;
pub mod types;

#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod generated;

// Re-export main types at crate root
pub use dispatch::Dispatcher;
pub use error::ProviderError;
pub use handler::ResourceHandler;
pub use logging::{init_logging, try_init_logging};
pub use registry::{HandlerFactory, HandlerRegistry};
pub use server::{
    grpc_service, serve, serve_on, serve_on_with_options, serve_with_options, ServeOptions,
};
pub use types::{
    CheckFailure, CheckResult, CreateResult, DiffResult, PropertyBag, UpdateResult, PROVIDER_KEY,
};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tonic;
pub use tracing;
