//! gRPC service wiring and endpoint bootstrap.
//!
//! This module adapts the [`Dispatcher`] to the generated
//! `ResourceProvider` gRPC trait and provides the `serve` functions that
//! bind a loopback listener, publish the bound port on stdout, and run the
//! server until shutdown.
//!
//! # Signal Handling
//!
//! The server handles OS signals (SIGTERM, SIGINT) for graceful shutdown:
//! it stops accepting new connections and waits for in-flight requests to
//! complete, bounded by [`ServeOptions::shutdown_timeout`]. In-flight handler
//! calls themselves are never cancelled by this layer; the engine owns
//! request deadlines.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tonic::transport::Server;
use tracing::{debug, error, info, instrument, warn};

use crate::dispatch::Dispatcher;
use crate::error::ProviderError;
use crate::generated;
use crate::generated::resource_provider_server::{ResourceProvider, ResourceProviderServer};
use crate::registry::HandlerRegistry;
use crate::types::PropertyBag;

/// Wrapper that implements the generated gRPC trait over a [`Dispatcher`].
struct ProviderGrpcService {
    dispatcher: Dispatcher,
}

/// Decode a JSON-encoded property bag. Empty bytes mean an empty bag.
fn decode_bag(bytes: &[u8]) -> Result<PropertyBag, ProviderError> {
    if bytes.is_empty() {
        return Ok(PropertyBag::new());
    }
    Ok(serde_json::from_slice(bytes)?)
}

/// Encode an optional output bag; `None` encodes as empty bytes.
fn encode_outs(outs: Option<PropertyBag>) -> Result<Vec<u8>, ProviderError> {
    match outs {
        Some(bag) => Ok(serde_json::to_vec(&bag)?),
        None => Ok(Vec::new()),
    }
}

impl ProviderGrpcService {
    async fn run_check(
        &self,
        req: generated::CheckRequest,
    ) -> Result<generated::CheckResponse, ProviderError> {
        let news = decode_bag(&req.properties)?;
        let result = self.dispatcher.check(news).await?;
        Ok(generated::CheckResponse {
            defaults: encode_outs(result.defaults)?,
            failures: result
                .failures
                .into_iter()
                .map(|f| generated::CheckFailure {
                    property: f.property,
                    reason: f.reason,
                })
                .collect(),
        })
    }

    async fn run_diff(
        &self,
        req: generated::DiffRequest,
    ) -> Result<generated::DiffResponse, ProviderError> {
        let olds = decode_bag(&req.olds)?;
        let news = decode_bag(&req.news)?;
        let result = self.dispatcher.diff(&req.id, olds, news).await?;
        Ok(generated::DiffResponse {
            replaces: result.replaces,
        })
    }

    async fn run_create(
        &self,
        req: generated::CreateRequest,
    ) -> Result<generated::CreateResponse, ProviderError> {
        let news = decode_bag(&req.properties)?;
        let result = self.dispatcher.create(news).await?;
        Ok(generated::CreateResponse {
            id: result.id,
            properties: encode_outs(result.outs)?,
        })
    }

    async fn run_update(
        &self,
        req: generated::UpdateRequest,
    ) -> Result<generated::UpdateResponse, ProviderError> {
        let olds = decode_bag(&req.olds)?;
        let news = decode_bag(&req.news)?;
        let result = self.dispatcher.update(&req.id, olds, news).await?;
        Ok(generated::UpdateResponse {
            properties: encode_outs(result.outs)?,
        })
    }

    async fn run_delete(
        &self,
        req: generated::DeleteRequest,
    ) -> Result<generated::DeleteResponse, ProviderError> {
        let props = decode_bag(&req.properties)?;
        self.dispatcher.delete(&req.id, props).await?;
        Ok(generated::DeleteResponse {})
    }
}

#[tonic::async_trait]
impl ResourceProvider for ProviderGrpcService {
    #[instrument(skip(self, _request), name = "grpc.configure")]
    async fn configure(
        &self,
        _request: tonic::Request<generated::ConfigureRequest>,
    ) -> Result<tonic::Response<generated::ConfigureResponse>, tonic::Status> {
        // No configuration schema exists for this protocol; acknowledge.
        debug!("Configure called");
        Ok(tonic::Response::new(generated::ConfigureResponse {}))
    }

    #[instrument(skip(self, request), name = "grpc.invoke")]
    async fn invoke(
        &self,
        request: tonic::Request<generated::InvokeRequest>,
    ) -> Result<tonic::Response<generated::InvokeResponse>, tonic::Status> {
        let req = request.into_inner();
        warn!(token = %req.tok, "Invoke called, not supported");
        let args = decode_bag(&req.args).unwrap_or_default();
        // Dispatcher::invoke never succeeds; surface its error as the failure.
        let err = self
            .dispatcher
            .invoke(&req.tok, args)
            .await
            .err()
            .unwrap_or_else(|| ProviderError::UnsupportedFunction(req.tok));
        Err(err.into())
    }

    #[instrument(skip(self, request), name = "grpc.check")]
    async fn check(
        &self,
        request: tonic::Request<generated::CheckRequest>,
    ) -> Result<tonic::Response<generated::CheckResponse>, tonic::Status> {
        debug!("Check called");
        match self.run_check(request.into_inner()).await {
            Ok(resp) => {
                debug!(failures = resp.failures.len(), "Check completed");
                Ok(tonic::Response::new(resp))
            }
            Err(e) => {
                error!(error = %e, "Check failed");
                Err(e.into())
            }
        }
    }

    #[instrument(skip(self, request), name = "grpc.diff")]
    async fn diff(
        &self,
        request: tonic::Request<generated::DiffRequest>,
    ) -> Result<tonic::Response<generated::DiffResponse>, tonic::Status> {
        let req = request.into_inner();
        debug!(id = %req.id, "Diff called");
        match self.run_diff(req).await {
            Ok(resp) => {
                debug!(replaces = resp.replaces.len(), "Diff completed");
                Ok(tonic::Response::new(resp))
            }
            Err(e) => {
                error!(error = %e, "Diff failed");
                Err(e.into())
            }
        }
    }

    #[instrument(skip(self, request), name = "grpc.create")]
    async fn create(
        &self,
        request: tonic::Request<generated::CreateRequest>,
    ) -> Result<tonic::Response<generated::CreateResponse>, tonic::Status> {
        info!("Create called");
        match self.run_create(request.into_inner()).await {
            Ok(resp) => {
                info!(id = %resp.id, "Create completed");
                Ok(tonic::Response::new(resp))
            }
            Err(e) => {
                error!(error = %e, "Create failed");
                Err(e.into())
            }
        }
    }

    #[instrument(skip(self, request), name = "grpc.update")]
    async fn update(
        &self,
        request: tonic::Request<generated::UpdateRequest>,
    ) -> Result<tonic::Response<generated::UpdateResponse>, tonic::Status> {
        let req = request.into_inner();
        info!(id = %req.id, "Update called");
        match self.run_update(req).await {
            Ok(resp) => {
                info!("Update completed");
                Ok(tonic::Response::new(resp))
            }
            Err(e) => {
                error!(error = %e, "Update failed");
                Err(e.into())
            }
        }
    }

    #[instrument(skip(self, request), name = "grpc.delete")]
    async fn delete(
        &self,
        request: tonic::Request<generated::DeleteRequest>,
    ) -> Result<tonic::Response<generated::DeleteResponse>, tonic::Status> {
        let req = request.into_inner();
        info!(id = %req.id, "Delete called");
        match self.run_delete(req).await {
            Ok(resp) => {
                info!("Delete completed");
                Ok(tonic::Response::new(resp))
            }
            Err(e) => {
                error!(error = %e, "Delete failed");
                Err(e.into())
            }
        }
    }
}

/// Build the tonic service for a registry, for mounting on a caller-owned
/// `tonic::transport::Server`. [`serve`] uses this internally.
pub fn grpc_service(registry: HandlerRegistry) -> ResourceProviderServer<impl ResourceProvider> {
    ResourceProviderServer::new(ProviderGrpcService {
        dispatcher: Dispatcher::new(registry),
    })
}

/// Options for configuring the provider server.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// Timeout for graceful shutdown. After receiving a shutdown signal,
    /// the server will wait this long for in-flight requests to complete.
    /// Default: 30 seconds.
    pub shutdown_timeout: Duration,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServeOptions {
    /// Create new serve options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// On Unix, this waits for SIGTERM or SIGINT.
/// On Windows, this waits for CTRL+C.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                eprintln!("Received SIGTERM, initiating graceful shutdown...");
            }
            _ = sigint.recv() => {
                eprintln!("Received SIGINT, initiating graceful shutdown...");
            }
        }
    }

    #[cfg(windows)]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C handler");
        eprintln!("Received CTRL+C, initiating graceful shutdown...");
    }

    #[cfg(not(any(unix, windows)))]
    {
        // Fallback: just wait forever (no signal handling)
        std::future::pending::<()>().await;
    }
}

/// Serve a handler registry as a gRPC endpoint on an ephemeral loopback port.
///
/// This function:
/// 1. Binds `127.0.0.1:0` and lets the OS choose a port
/// 2. Starts the gRPC server
/// 3. Writes the bound port number to stdout as the sole machine-readable
///    line, which is how the engine discovers the endpoint
/// 4. Handles shutdown signals (SIGTERM/SIGINT) gracefully
///
/// For custom configuration, use [`serve_with_options`].
pub async fn serve(registry: HandlerRegistry) -> Result<(), Box<dyn std::error::Error>> {
    serve_with_options(registry, ServeOptions::default()).await
}

/// Serve a registry with custom options.
///
/// See [`serve`] for details. This function allows configuring
/// shutdown behavior via [`ServeOptions`].
pub async fn serve_with_options(
    registry: HandlerRegistry,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    serve_on_listener(registry, listener, addr, options).await
}

/// Serve a registry on a specific address.
///
/// Unlike [`serve`], this function binds to the specified address rather than
/// letting the OS pick an ephemeral port. The bound port is still written to
/// stdout.
pub async fn serve_on(
    registry: HandlerRegistry,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    serve_on_with_options(registry, addr, ServeOptions::default()).await
}

/// Serve a registry on a specific address with custom options.
pub async fn serve_on_with_options(
    registry: HandlerRegistry,
    addr: SocketAddr,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    serve_on_listener(registry, listener, actual_addr, options).await
}

/// Internal function to serve on an already-bound listener.
async fn serve_on_listener(
    registry: HandlerRegistry,
    listener: TcpListener,
    addr: SocketAddr,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    // The engine reads this line to learn where to connect. Everything else
    // the process prints goes to stderr.
    println!("{}", addr.port());

    info!(address = %addr, handlers = ?registry.references(), "provider endpoint starting");

    // The server future completes only once the shutdown future resolves and
    // the drain finishes (or on a transport error). The shutdown timeout
    // starts when the signal arrives, never against ordinary uptime: an idle
    // endpoint serves until the engine stops it.
    let (signal_tx, signal_rx) = tokio::sync::oneshot::channel::<()>();
    let server_future = Server::builder()
        .add_service(grpc_service(registry))
        .serve_with_incoming_shutdown(
            tokio_stream::wrappers::TcpListenerStream::new(listener),
            async {
                wait_for_shutdown_signal().await;
                let _ = signal_tx.send(());
            },
        );
    tokio::pin!(server_future);

    tokio::select! {
        result = &mut server_future => {
            // Finished without entering a drain phase: a transport error, or
            // the incoming stream ended on its own.
            result?;
            info!("Server shutdown complete");
            return Ok(());
        }
        _ = signal_rx => {}
    }

    // Signal received; bound only the remaining drain of in-flight requests.
    match tokio::time::timeout(options.shutdown_timeout, &mut server_future).await {
        Ok(Ok(())) => {
            info!("Server shutdown complete");
        }
        Ok(Err(e)) => {
            error!(error = %e, "Server error during shutdown");
            return Err(e.into());
        }
        Err(_) => {
            warn!(
                timeout = ?options.shutdown_timeout,
                "Shutdown timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("Provider endpoint shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_bag_empty_bytes() {
        let bag = decode_bag(&[]).unwrap();
        assert!(bag.is_empty());
    }

    #[test]
    fn test_decode_bag_rejects_malformed_json() {
        let err = decode_bag(b"{not json").unwrap_err();
        assert!(matches!(err, ProviderError::Serialization(_)));
    }

    #[test]
    fn test_decode_bag_rejects_non_object() {
        let err = decode_bag(b"[1, 2, 3]").unwrap_err();
        assert!(matches!(err, ProviderError::Serialization(_)));
    }

    #[test]
    fn test_encode_outs_none_is_empty() {
        assert!(encode_outs(None).unwrap().is_empty());

        let mut bag = PropertyBag::new();
        bag.insert("x".to_string(), json!(1));
        let bytes = encode_outs(Some(bag)).unwrap();
        assert_eq!(serde_json::from_slice::<serde_json::Value>(&bytes).unwrap(), json!({"x": 1}));
    }

    #[test]
    fn test_serve_options() {
        assert_eq!(
            ServeOptions::default().shutdown_timeout,
            Duration::from_secs(30)
        );
        let options = ServeOptions::new().with_shutdown_timeout(Duration::from_secs(5));
        assert_eq!(options.shutdown_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_serve_outlives_shutdown_timeout_without_signal() {
        // The shutdown timeout bounds the post-signal drain only. An idle
        // endpoint must keep serving well past it when no signal arrives.
        let options = ServeOptions::new().with_shutdown_timeout(Duration::from_millis(100));
        let serve_future = serve_with_options(HandlerRegistry::new(), options);
        tokio::pin!(serve_future);

        let outcome = tokio::time::timeout(Duration::from_millis(800), &mut serve_future).await;
        assert!(
            outcome.is_err(),
            "endpoint exited without a shutdown signal"
        );
    }
}
