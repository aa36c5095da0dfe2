//! Testing utilities for handler and dispatch code.
//!
//! Helpers for building property bags from JSON literals, a handler that
//! fails loudly if any capability is invoked (for proving that the
//! provider-identity guard short-circuits), and replacement assertions.
//!
//! # Example
//!
//! ```ignore
//! use dynamic_provider_host::testing::{bag_with_handler, assert_requires_replacement};
//! use dynamic_provider_host::{Dispatcher, HandlerRegistry};
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn test_cross_provider_diff() {
//!     let dispatcher = Dispatcher::new(
//!         HandlerRegistry::new().register("kv", || KvHandler::default()),
//!     );
//!     let diff = dispatcher
//!         .diff(
//!             "id-1",
//!             bag_with_handler("kv", json!({})),
//!             bag_with_handler("kv-v2", json!({})),
//!         )
//!         .await
//!         .unwrap();
//!     assert_requires_replacement(&diff);
//! }
//! ```

use crate::error::ProviderError;
use crate::handler::ResourceHandler;
use crate::types::{
    CheckResult, CreateResult, DiffResult, PropertyBag, UpdateResult, PROVIDER_KEY,
};

/// Build a property bag from a JSON object literal.
///
/// # Panics
///
/// Panics if `value` is not a JSON object. Test helper only.
pub fn bag(value: serde_json::Value) -> PropertyBag {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("property bag literal must be a JSON object, got {}", other),
    }
}

/// Build a property bag carrying the given handler reference.
///
/// # Panics
///
/// Panics if `value` is not a JSON object. Test helper only.
pub fn bag_with_handler(reference: &str, value: serde_json::Value) -> PropertyBag {
    let mut map = bag(value);
    map.insert(
        PROVIDER_KEY.to_string(),
        serde_json::Value::String(reference.to_string()),
    );
    map
}

/// A handler that fails every operation.
///
/// Register it under an old handler reference to prove a code path never
/// consults the handler, e.g. that `diff` across a provider change
/// short-circuits before resolution.
pub struct UnreachableHandler;

#[async_trait::async_trait]
impl ResourceHandler for UnreachableHandler {
    async fn check(&self, _news: PropertyBag) -> Result<CheckResult, ProviderError> {
        Err(ProviderError::handler("check invoked on UnreachableHandler"))
    }

    async fn diff(
        &self,
        _id: &str,
        _olds: PropertyBag,
        _news: PropertyBag,
    ) -> Result<DiffResult, ProviderError> {
        Err(ProviderError::handler("diff invoked on UnreachableHandler"))
    }

    async fn create(&self, _news: PropertyBag) -> Result<CreateResult, ProviderError> {
        Err(ProviderError::handler(
            "create invoked on UnreachableHandler",
        ))
    }

    async fn update(
        &self,
        _id: &str,
        _olds: PropertyBag,
        _news: PropertyBag,
    ) -> Result<UpdateResult, ProviderError> {
        Err(ProviderError::handler(
            "update invoked on UnreachableHandler",
        ))
    }

    async fn delete(&self, _id: &str, _props: PropertyBag) -> Result<(), ProviderError> {
        Err(ProviderError::handler(
            "delete invoked on UnreachableHandler",
        ))
    }
}

/// Assert that a diff requires the resource to be replaced.
///
/// # Panics
///
/// Panics if the diff forces no replacement.
pub fn assert_requires_replacement(diff: &DiffResult) {
    assert!(
        diff.requires_replacement(),
        "Expected diff to require replacement, but replaces is empty"
    );
}

/// Assert that a diff allows the resource to be kept in place.
///
/// # Panics
///
/// Panics if the diff forces replacement.
pub fn assert_in_place(diff: &DiffResult) {
    assert!(
        !diff.requires_replacement(),
        "Expected in-place diff, but replacement forced by: {:?}",
        diff.replaces
    );
}
