//! Handler resolution: from a property bag to a live [`ResourceHandler`].
//!
//! The reserved [`PROVIDER_KEY`] entry in a bag is the *handler reference*: a
//! string naming a factory registered in a [`HandlerRegistry`]. The registry
//! is populated once at startup and consulted on every call; references that
//! name nothing registered are load failures. Arbitrary code-as-data is not
//! accepted as a reference.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ProviderError;
use crate::handler::ResourceHandler;
use crate::types::{PropertyBag, PROVIDER_KEY};

/// Factory producing a fresh handler instance for one RPC call.
pub type HandlerFactory =
    dyn Fn() -> Result<Box<dyn ResourceHandler>, ProviderError> + Send + Sync;

/// Maps handler references to factories.
///
/// Resolution runs the matching factory on every call rather than caching an
/// instance: the engine may swap handler implementations between calls during
/// migrations, and a fresh instance per call rules out cross-call state.
///
/// # Example
///
/// ```ignore
/// use dynamic_provider_host::HandlerRegistry;
///
/// let registry = HandlerRegistry::new()
///     .register("kv", || KvHandler::default())
///     .register("bucket", || BucketHandler::default());
/// ```
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    factories: HashMap<String, Arc<HandlerFactory>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler factory under the given reference.
    ///
    /// Re-registering a reference replaces the previous factory.
    pub fn register<F, H>(mut self, reference: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: ResourceHandler + 'static,
    {
        self.factories.insert(
            reference.into(),
            Arc::new(move || Ok(Box::new(factory()) as Box<dyn ResourceHandler>)),
        );
        self
    }

    /// Register a factory that may itself fail to produce a handler.
    ///
    /// Factory errors surface as [`ProviderError::HandlerLoad`].
    pub fn register_with<F>(mut self, reference: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<Box<dyn ResourceHandler>, ProviderError> + Send + Sync + 'static,
    {
        self.factories.insert(reference.into(), Arc::new(factory));
        self
    }

    /// The registered handler references, in no particular order.
    pub fn references(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Extract the handler reference from a property bag.
    ///
    /// Fails with [`ProviderError::MissingHandler`] if the reserved key is
    /// absent or its value is not a string.
    pub fn handler_reference(bag: &PropertyBag) -> Result<&str, ProviderError> {
        match bag.get(PROVIDER_KEY) {
            Some(serde_json::Value::String(reference)) => Ok(reference),
            Some(other) => Err(ProviderError::MissingHandler(format!(
                "{} must be a string, got {}",
                PROVIDER_KEY,
                json_kind(other)
            ))),
            None => Err(ProviderError::MissingHandler(format!(
                "property bag has no {} entry",
                PROVIDER_KEY
            ))),
        }
    }

    /// Resolve the bag's handler reference into a fresh handler instance.
    pub fn resolve(&self, bag: &PropertyBag) -> Result<Box<dyn ResourceHandler>, ProviderError> {
        let reference = Self::handler_reference(bag)?;
        let factory = self.factories.get(reference).ok_or_else(|| {
            ProviderError::HandlerLoad(format!("no handler registered for {:?}", reference))
        })?;
        factory().map_err(|e| match e {
            err @ ProviderError::HandlerLoad(_) => err,
            other => ProviderError::HandlerLoad(format!(
                "factory for {:?} failed: {}",
                reference, other
            )),
        })
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("references", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
