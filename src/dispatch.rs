//! Operation dispatch: one procedure per RPC method on domain types.
//!
//! The [`Dispatcher`] resolves the governing handler from the appropriate
//! property bag (news for check/create, olds for diff/update, props for
//! delete) and delegates to it. Before delegating, `diff` and `update` run
//! the provider-identity guard: a resource whose handler reference changed
//! must be replaced, never updated in place, and the guard's verdict
//! supersedes whatever the handler would have said.
//!
//! Wire encoding stays out of this module; the gRPC layer in
//! [`crate::server`] decodes requests into bags before calling in here.

use std::sync::Arc;

use tracing::debug;

use crate::error::ProviderError;
use crate::registry::HandlerRegistry;
use crate::types::{
    CheckResult, CreateResult, DiffResult, PropertyBag, UpdateResult, PROVIDER_KEY,
};

/// Dispatches lifecycle operations to per-call handler instances.
///
/// Holds no state beyond the registry; each operation resolves a fresh
/// handler, invokes it once, and drops it. Concurrent calls never share a
/// handler instance, so no locking is involved.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
}

impl Dispatcher {
    /// Create a dispatcher over the given registry.
    pub fn new(registry: HandlerRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// Validate proposed inputs via the handler named in `news`.
    pub async fn check(&self, news: PropertyBag) -> Result<CheckResult, ProviderError> {
        let handler = self.registry.resolve(&news)?;
        handler.check(news).await
    }

    /// Diff old against new state via the handler named in `olds`.
    ///
    /// If the handler reference itself changed, returns a replacement verdict
    /// for the reserved key without consulting the handler.
    pub async fn diff(
        &self,
        id: &str,
        olds: PropertyBag,
        news: PropertyBag,
    ) -> Result<DiffResult, ProviderError> {
        if handler_reference_changed(&olds, &news) {
            debug!(id, "handler reference changed, forcing replacement");
            return Ok(DiffResult::replace(vec![PROVIDER_KEY.to_string()]));
        }
        let handler = self.registry.resolve(&olds)?;
        handler.diff(id, olds, news).await
    }

    /// Provision a new resource via the handler named in `news`.
    pub async fn create(&self, news: PropertyBag) -> Result<CreateResult, ProviderError> {
        let handler = self.registry.resolve(&news)?;
        handler.create(news).await
    }

    /// Update a resource in place via the handler named in `olds`.
    ///
    /// An update across a provider change is a contract violation: the engine
    /// is expected to have planned a replacement instead, so the call fails
    /// before any handler is resolved.
    pub async fn update(
        &self,
        id: &str,
        olds: PropertyBag,
        news: PropertyBag,
    ) -> Result<UpdateResult, ProviderError> {
        if handler_reference_changed(&olds, &news) {
            return Err(ProviderError::InvariantViolation(format!(
                "changes to {} require replacement, not update",
                PROVIDER_KEY
            )));
        }
        let handler = self.registry.resolve(&olds)?;
        handler.update(id, olds, news).await
    }

    /// Tear down a resource via the handler named in `props`.
    pub async fn delete(&self, id: &str, props: PropertyBag) -> Result<(), ProviderError> {
        let handler = self.registry.resolve(&props)?;
        handler.delete(id, props).await
    }

    /// Function invocation is not part of this protocol; always fails,
    /// naming the requested token.
    pub async fn invoke(
        &self,
        token: &str,
        _args: PropertyBag,
    ) -> Result<PropertyBag, ProviderError> {
        Err(ProviderError::UnsupportedFunction(token.to_string()))
    }
}

/// Whether the reserved handler reference differs between two bags.
///
/// Compared as raw values: absent on both sides counts as unchanged, and a
/// malformed value only trips the guard when it differs. Shape validation
/// happens later, at resolution.
fn handler_reference_changed(olds: &PropertyBag, news: &PropertyBag) -> bool {
    olds.get(PROVIDER_KEY) != news.get(PROVIDER_KEY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{bag_with_handler, UnreachableHandler};
    use crate::types::CheckFailure;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct KvHandler;

    #[async_trait::async_trait]
    impl crate::handler::ResourceHandler for KvHandler {
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

        async fn delete(&self, _id: &str, _props: PropertyBag) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(
            HandlerRegistry::new()
                .register("kv", || KvHandler)
                .register("untouchable", || UnreachableHandler),
        )
    }

    #[tokio::test]
    async fn test_create_returns_handler_result() {
        let result = dispatcher()
            .create(bag_with_handler("kv", json!({"name": "n"})))
            .await
            .unwrap();
        assert_eq!(result.id, "abc");
        assert_eq!(result.outs.unwrap()["x"], json!(1));
    }

    #[tokio::test]
    async fn test_check_surfaces_failures() {
        let result = dispatcher()
            .check(bag_with_handler("kv", json!({})))
            .await
            .unwrap();
        assert!(result.defaults.is_none());
        assert_eq!(
            result.failures,
            vec![CheckFailure::new("name", "required")]
        );
    }

    #[tokio::test]
    async fn test_diff_across_providers_short_circuits() {
        // The handler would fail loudly if consulted; the guard must win.
        let olds = bag_with_handler("untouchable", json!({"a": 1}));
        let news = bag_with_handler("kv", json!({"a": 1}));
        let result = dispatcher().diff("abc", olds, news).await.unwrap();
        assert_eq!(result.replaces, vec![PROVIDER_KEY.to_string()]);
    }

    #[tokio::test]
    async fn test_diff_same_provider_delegates() {
        let olds = bag_with_handler("kv", json!({"a": 1}));
        let news = bag_with_handler("kv", json!({"a": 2}));
        let result = dispatcher().diff("abc", olds, news).await.unwrap();
        assert!(!result.requires_replacement());
    }

    #[tokio::test]
    async fn test_update_across_providers_is_invariant_violation() {
        let olds = bag_with_handler("kv", json!({}));
        let news = bag_with_handler("untouchable", json!({}));
        let err = dispatcher().update("abc", olds, news).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn test_update_unimplemented_by_handler() {
        // KvHandler leans on the default update, which is unsupported.
        let olds = bag_with_handler("kv", json!({}));
        let news = bag_with_handler("kv", json!({}));
        let err = dispatcher().update("abc", olds, news).await.unwrap_err();
        assert!(matches!(err, ProviderError::UnsupportedOperation(op) if op == "update"));
    }

    #[tokio::test]
    async fn test_delete_reaches_handler() {
        let deleted = Arc::new(AtomicBool::new(false));

        struct RecordingHandler(Arc<AtomicBool>);

        #[async_trait::async_trait]
        impl crate::handler::ResourceHandler for RecordingHandler {
            async fn create(&self, _news: PropertyBag) -> Result<CreateResult, ProviderError> {
                Ok(CreateResult::new("rec"))
            }

            async fn delete(&self, id: &str, _props: PropertyBag) -> Result<(), ProviderError> {
                assert_eq!(id, "rec");
                self.0.store(true, Ordering::SeqCst);
                Ok(())
            }
        }

        let flag = Arc::clone(&deleted);
        let dispatcher = Dispatcher::new(
            HandlerRegistry::new()
                .register("recording", move || RecordingHandler(Arc::clone(&flag))),
        );
        dispatcher
            .delete("rec", bag_with_handler("recording", json!({})))
            .await
            .unwrap();
        assert!(deleted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_invoke_always_fails_with_token() {
        let err = dispatcher()
            .invoke("pkg:index:fn", PropertyBag::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnsupportedFunction(_)));
        assert!(err.to_string().contains("pkg:index:fn"));
    }

    #[test]
    fn test_reference_changed_comparison() {
        let a = bag_with_handler("kv", json!({"other": 1}));
        let b = bag_with_handler("kv", json!({"other": 2}));
        assert!(!handler_reference_changed(&a, &b));

        let c = bag_with_handler("other", json!({}));
        assert!(handler_reference_changed(&a, &c));

        // Absent on both sides is unchanged; absent on one side is a change.
        assert!(!handler_reference_changed(
            &PropertyBag::new(),
            &PropertyBag::new()
        ));
        assert!(handler_reference_changed(&a, &PropertyBag::new()));
    }
}
