//! Core data model for the dynamic provider protocol.
//!
//! A resource's desired and actual state travel as *property bags*: schema-less
//! string-keyed documents. One key is reserved, [`PROVIDER_KEY`], whose string
//! value names the handler implementation governing the resource instance.

use serde::{Deserialize, Serialize};

/// A property bag: the associative document describing a resource's desired
/// or actual state. Keys are strings, values arbitrary JSON.
pub type PropertyBag = serde_json::Map<String, serde_json::Value>;

/// Reserved property-bag key holding the handler reference.
///
/// Two bags describe the same provider iff the string values under this key
/// are identical. The dispatcher validates the key at the RPC boundary, never
/// inside handler logic.
pub const PROVIDER_KEY: &str = "__provider";

/// A single validation failure reported by `check`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckFailure {
    /// The property the failure refers to.
    pub property: String,
    /// Why the property is unacceptable.
    pub reason: String,
}

impl CheckFailure {
    /// Create a new check failure.
    pub fn new(property: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            reason: reason.into(),
        }
    }
}

/// The result of a `check` operation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CheckResult {
    /// Default values the handler wants merged into the inputs, if any.
    pub defaults: Option<PropertyBag>,
    /// Validation failures. Empty means the inputs are acceptable.
    pub failures: Vec<CheckFailure>,
}

impl CheckResult {
    /// A passing check: no defaults, no failures.
    pub fn ok() -> Self {
        Self::default()
    }

    /// A passing check that supplies default values.
    pub fn with_defaults(defaults: PropertyBag) -> Self {
        Self {
            defaults: Some(defaults),
            failures: Vec::new(),
        }
    }

    /// A failing check carrying the given failures.
    pub fn with_failures(failures: Vec<CheckFailure>) -> Self {
        Self {
            defaults: None,
            failures,
        }
    }
}

/// The result of a `diff` operation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiffResult {
    /// Property names whose change forces the resource to be replaced.
    /// Non-empty means replacement is required.
    pub replaces: Vec<String>,
}

impl DiffResult {
    /// No forced replacement.
    pub fn unchanged() -> Self {
        Self::default()
    }

    /// Replacement forced by the given properties.
    pub fn replace(replaces: Vec<String>) -> Self {
        Self { replaces }
    }

    /// Whether this diff requires the resource to be replaced.
    pub fn requires_replacement(&self) -> bool {
        !self.replaces.is_empty()
    }
}

/// The result of a `create` operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateResult {
    /// Opaque identifier for the new resource instance. The engine passes it
    /// back verbatim on later `update` and `delete` calls.
    pub id: String,
    /// Output properties, if any.
    pub outs: Option<PropertyBag>,
}

impl CreateResult {
    /// Create a result with no output properties.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            outs: None,
        }
    }

    /// Attach output properties.
    pub fn with_outs(mut self, outs: PropertyBag) -> Self {
        self.outs = Some(outs);
        self
    }
}

/// The result of an `update` operation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UpdateResult {
    /// Output properties, if any.
    pub outs: Option<PropertyBag>,
}

impl UpdateResult {
    /// An update with no output properties.
    pub fn new() -> Self {
        Self::default()
    }

    /// An update carrying output properties.
    pub fn with_outs(outs: PropertyBag) -> Self {
        Self { outs: Some(outs) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_check_result_constructors() {
        assert_eq!(CheckResult::ok(), CheckResult::default());

        let failing = CheckResult::with_failures(vec![CheckFailure::new("name", "required")]);
        assert!(failing.defaults.is_none());
        assert_eq!(failing.failures.len(), 1);
        assert_eq!(failing.failures[0].property, "name");
        assert_eq!(failing.failures[0].reason, "required");
    }

    #[test]
    fn test_diff_result_replacement() {
        assert!(!DiffResult::unchanged().requires_replacement());

        let diff = DiffResult::replace(vec![PROVIDER_KEY.to_string()]);
        assert!(diff.requires_replacement());
        assert_eq!(diff.replaces, vec![PROVIDER_KEY]);
    }

    #[test]
    fn test_create_result_builder() {
        let result = CreateResult::new("abc");
        assert_eq!(result.id, "abc");
        assert!(result.outs.is_none());

        let mut outs = PropertyBag::new();
        outs.insert("x".to_string(), json!(1));
        let result = CreateResult::new("abc").with_outs(outs);
        assert_eq!(result.outs.as_ref().unwrap()["x"], json!(1));
    }

    #[test]
    fn test_property_bag_is_plain_json_map() {
        let mut bag = PropertyBag::new();
        bag.insert(PROVIDER_KEY.to_string(), json!("kv"));
        bag.insert("nested".to_string(), json!({"a": [1, 2, 3]}));

        let bytes = serde_json::to_vec(&bag).unwrap();
        let back: PropertyBag = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, bag);
    }
}
