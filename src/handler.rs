//! The capability interface that resource handlers implement.

use crate::error::ProviderError;
use crate::types::{CheckResult, CreateResult, DiffResult, PropertyBag, UpdateResult};

/// The CRUD capability contract for one resource type.
///
/// A handler is constructed fresh for every RPC call by its registered
/// factory and dropped as soon as the response is encoded. Nothing in the
/// host caches or shares handler instances, so implementations carry no
/// cross-call state. Operations on the same resource instance are invoked
/// sequentially by the engine, never concurrently.
///
/// `create` and `delete` must be implemented; the remaining operations have
/// defaults: `check` accepts everything with no defaults, `diff` forces no
/// replacement, and `update` fails with
/// [`ProviderError::UnsupportedOperation`].
///
/// # Example
///
/// ```ignore
/// use dynamic_provider_host::{ResourceHandler, ProviderError};
/// use dynamic_provider_host::{CreateResult, PropertyBag};
///
/// struct KvHandler;
///
/// #[async_trait::async_trait]
/// impl ResourceHandler for KvHandler {
///     async fn create(&self, news: PropertyBag) -> Result<CreateResult, ProviderError> {
///         Ok(CreateResult::new("kv-1"))
///     }
///
///     async fn delete(&self, _id: &str, _props: PropertyBag) -> Result<(), ProviderError> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Validate the proposed inputs and compute defaults.
    async fn check(&self, news: PropertyBag) -> Result<CheckResult, ProviderError> {
        let _ = news;
        Ok(CheckResult::ok())
    }

    /// Decide which changed properties force replacement.
    async fn diff(
        &self,
        id: &str,
        olds: PropertyBag,
        news: PropertyBag,
    ) -> Result<DiffResult, ProviderError> {
        let _ = (id, olds, news);
        Ok(DiffResult::unchanged())
    }

    /// Provision a new resource instance and return its id.
    async fn create(&self, news: PropertyBag) -> Result<CreateResult, ProviderError>;

    /// Modify an existing resource in place.
    async fn update(
        &self,
        id: &str,
        olds: PropertyBag,
        news: PropertyBag,
    ) -> Result<UpdateResult, ProviderError> {
        let _ = (id, olds, news);
        Err(ProviderError::UnsupportedOperation("update".to_string()))
    }

    /// Tear down an existing resource.
    async fn delete(&self, id: &str, props: PropertyBag) -> Result<(), ProviderError>;
}

impl std::fmt::Debug for dyn ResourceHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn ResourceHandler")
    }
}
