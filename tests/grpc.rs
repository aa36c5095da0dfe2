//! End-to-end tests driving the gRPC service over a loopback socket, plus
//! the endpoint binary's process contract (argument handling and port
//! publication).

use std::net::SocketAddr;
use std::time::Duration;

use serde_json::json;
use tokio_test::assert_ok;
use tokio::io::AsyncBufReadExt;
use tokio_stream::wrappers::TcpListenerStream;

use dynamic_provider_host::generated::resource_provider_client::ResourceProviderClient;
use dynamic_provider_host::generated::{
    CheckRequest, ConfigureRequest, CreateRequest, DeleteRequest, DiffRequest, InvokeRequest,
    UpdateRequest,
};
use dynamic_provider_host::testing::{bag_with_handler, UnreachableHandler};
use dynamic_provider_host::{
    grpc_service, CheckFailure, CheckResult, CreateResult, HandlerRegistry, PropertyBag,
    ProviderError, ResourceHandler, PROVIDER_KEY,
};

struct KvHandler;

#[async_trait::async_trait]
impl ResourceHandler for KvHandler {
    async fn check(&self, news: PropertyBag) -> Result<CheckResult, ProviderError> {
        if news.contains_key("name") {
            Ok(CheckResult::ok())
        } else {
            Ok(CheckResult::with_failures(vec![CheckFailure::new(
                "name", "required",
            )]))
        }
    }

    async fn create(&self, _news: PropertyBag) -> Result<CreateResult, ProviderError> {
        let mut outs = PropertyBag::new();
        outs.insert("x".to_string(), json!(1));
        Ok(CreateResult::new("abc").with_outs(outs))
    }

    async fn delete(&self, id: &str, _props: PropertyBag) -> Result<(), ProviderError> {
        assert_eq!(id, "abc");
        Ok(())
    }
}

fn registry() -> HandlerRegistry {
    HandlerRegistry::new()
        .register("kv", || KvHandler)
        .register("untouchable", || UnreachableHandler)
}

/// Mount the service on an ephemeral port and return the bound address.
async fn spawn_endpoint(registry: HandlerRegistry) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(grpc_service(registry))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr) -> ResourceProviderClient<tonic::transport::Channel> {
    ResourceProviderClient::connect(format!("http://{}", addr))
        .await
        .unwrap()
}

fn encode(bag: PropertyBag) -> Vec<u8> {
    serde_json::to_vec(&bag).unwrap()
}

#[tokio::test]
async fn configure_always_acks() {
    let addr = spawn_endpoint(registry()).await;
    let mut client = connect(addr).await;

    let resp = client
        .configure(ConfigureRequest {
            variables: b"{\"anything\": true}".to_vec(),
        })
        .await;
    tokio_test::assert_ok!(resp);
}

#[tokio::test]
async fn invoke_always_fails_naming_token() {
    let addr = spawn_endpoint(registry()).await;
    let mut client = connect(addr).await;

    let status = client
        .invoke(InvokeRequest {
            tok: "pkg:index:doThing".to_string(),
            args: Vec::new(),
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::Unimplemented);
    assert!(status.message().contains("pkg:index:doThing"));
}

#[tokio::test]
async fn create_round_trips_id_and_outs() {
    let addr = spawn_endpoint(registry()).await;
    let mut client = connect(addr).await;

    let resp = client
        .create(CreateRequest {
            properties: encode(bag_with_handler("kv", json!({"name": "n"}))),
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(resp.id, "abc");
    let outs: serde_json::Value = serde_json::from_slice(&resp.properties).unwrap();
    assert_eq!(outs, json!({"x": 1}));
}

#[tokio::test]
async fn check_reports_single_failure_without_defaults() {
    let addr = spawn_endpoint(registry()).await;
    let mut client = connect(addr).await;

    let resp = client
        .check(CheckRequest {
            properties: encode(bag_with_handler("kv", json!({}))),
        })
        .await
        .unwrap()
        .into_inner();
    assert!(resp.defaults.is_empty());
    assert_eq!(resp.failures.len(), 1);
    assert_eq!(resp.failures[0].property, "name");
    assert_eq!(resp.failures[0].reason, "required");
}

#[tokio::test]
async fn diff_across_providers_replaces_without_touching_handler() {
    let addr = spawn_endpoint(registry()).await;
    let mut client = connect(addr).await;

    // olds names the handler that fails on any invocation; only the guard's
    // short-circuit lets this call succeed.
    let resp = client
        .diff(DiffRequest {
            id: "abc".to_string(),
            olds: encode(bag_with_handler("untouchable", json!({"a": 1}))),
            news: encode(bag_with_handler("kv", json!({"a": 1}))),
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(resp.replaces, vec![PROVIDER_KEY.to_string()]);
}

#[tokio::test]
async fn update_across_providers_fails() {
    let addr = spawn_endpoint(registry()).await;
    let mut client = connect(addr).await;

    let status = client
        .update(UpdateRequest {
            id: "abc".to_string(),
            olds: encode(bag_with_handler("kv", json!({}))),
            news: encode(bag_with_handler("untouchable", json!({}))),
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::Internal);
    assert!(status.message().contains(PROVIDER_KEY));
}

#[tokio::test]
async fn update_unimplemented_by_handler_fails() {
    let addr = spawn_endpoint(registry()).await;
    let mut client = connect(addr).await;

    let status = client
        .update(UpdateRequest {
            id: "abc".to_string(),
            olds: encode(bag_with_handler("kv", json!({}))),
            news: encode(bag_with_handler("kv", json!({}))),
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::Unimplemented);
}

/// A handler whose operations fail with an application-level error.
struct BrokenHandler;

#[async_trait::async_trait]
impl ResourceHandler for BrokenHandler {
    async fn create(&self, _news: PropertyBag) -> Result<CreateResult, ProviderError> {
        Err(ProviderError::handler("disk on fire"))
    }

    async fn delete(&self, _id: &str, _props: PropertyBag) -> Result<(), ProviderError> {
        Err(ProviderError::handler("disk on fire"))
    }
}

#[tokio::test]
async fn handler_error_reaches_client_verbatim() {
    let registry = HandlerRegistry::new().register("broken", || BrokenHandler);
    let addr = spawn_endpoint(registry).await;
    let mut client = connect(addr).await;

    let status = client
        .create(CreateRequest {
            properties: encode(bag_with_handler("broken", json!({}))),
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::Unknown);
    assert_eq!(status.message(), "disk on fire");
}

#[tokio::test]
async fn delete_acks_when_handler_succeeds() {
    let addr = spawn_endpoint(registry()).await;
    let mut client = connect(addr).await;

    let resp = client
        .delete(DeleteRequest {
            id: "abc".to_string(),
            properties: encode(bag_with_handler("kv", json!({}))),
        })
        .await;
    tokio_test::assert_ok!(resp);
}

#[tokio::test]
async fn missing_handler_reference_is_invalid_argument() {
    let addr = spawn_endpoint(registry()).await;
    let mut client = connect(addr).await;

    let status = client
        .create(CreateRequest {
            properties: encode(PropertyBag::new()),
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::InvalidArgument);
}

#[test]
fn endpoint_binary_requires_engine_address() {
    let output = std::process::Command::new(env!("CARGO_BIN_EXE_dynamic-provider-host"))
        .output()
        .unwrap();
    assert!(!output.status.success());
    // No listener, no port line.
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("missing"));
}

#[tokio::test]
async fn endpoint_binary_publishes_port_then_serves() {
    let mut child = tokio::process::Command::new(env!("CARGO_BIN_EXE_dynamic-provider-host"))
        .arg("127.0.0.1:1")
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .unwrap();

    let stdout = child.stdout.take().unwrap();
    let mut lines = tokio::io::BufReader::new(stdout).lines();
    let line = tokio::time::timeout(Duration::from_secs(10), lines.next_line())
        .await
        .expect("timed out waiting for port line")
        .unwrap()
        .expect("endpoint exited without printing a port");
    let port: u16 = line.trim().parse().expect("port line must be a number");

    // The published port must accept at least one RPC.
    let mut client = ResourceProviderClient::connect(format!("http://127.0.0.1:{}", port))
        .await
        .unwrap();
    let resp = client
        .configure(ConfigureRequest {
            variables: Vec::new(),
        })
        .await;
    tokio_test::assert_ok!(resp);

    child.kill().await.unwrap();
}
