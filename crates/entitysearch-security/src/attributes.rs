//! Attribute sets and the external attribute-evaluation contract.
//!
//! Label expression semantics live outside this crate. Filtering only ever
//! parses a raw label string into opaque [`Expression`]s through a
//! [`LabelEvaluator`] and evaluates them against the caller's
//! [`AttributeSet`] plus a [`HierarchyResolver`]. This crate never inlines
//! its own expression grammar.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Attribute Set
// =============================================================================

/// The set of security attributes held by a caller.
///
/// Order-insensitive and cheap to compare; equality of attribute sets is
/// what the redacted-documents cache uses to detect credential changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeSet {
    attributes: BTreeSet<String>,
}

impl AttributeSet {
    /// Create an empty attribute set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute. Returns true if it was not already present.
    pub fn insert(&mut self, attribute: impl Into<String>) -> bool {
        self.attributes.insert(attribute.into())
    }

    /// True iff the caller holds the given attribute.
    #[must_use]
    pub fn contains(&self, attribute: &str) -> bool {
        self.attributes.contains(attribute)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Iterate the attributes in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for AttributeSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self {
            attributes: iter.into_iter().map(Into::into).collect(),
        }
    }
}

// =============================================================================
// Evaluator Contract
// =============================================================================

/// A raw label string could not be parsed into expressions.
#[derive(Debug, Clone, Error)]
#[error("Malformed label expression: {message}")]
pub struct LabelSyntaxError {
    message: String,
}

impl LabelSyntaxError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// An opaque parsed boolean expression over user attributes.
pub trait Expression: Send + Sync {
    /// Evaluate this expression against a caller's attributes.
    ///
    /// The resolver supplies attribute hierarchies; it may block on an
    /// external store, so callers needing deadlines enforce them one
    /// layer up.
    fn evaluate(&self, attributes: &AttributeSet, hierarchy: &dyn HierarchyResolver) -> bool;

    /// Stable textual identity of this expression.
    ///
    /// Used as the per-context evaluation-cache key, so two expressions
    /// with equal sources must evaluate identically for a fixed attribute
    /// set and resolver.
    fn source(&self) -> &str;
}

/// Parses raw label strings into expression lists.
pub trait LabelEvaluator: Send + Sync {
    /// Parse a raw label string.
    ///
    /// # Errors
    ///
    /// Returns [`LabelSyntaxError`] when the label is malformed. Filtering
    /// treats that as a deny at the label's scope, never as a caller error.
    fn parse(&self, raw: &str) -> Result<Vec<Arc<dyn Expression>>, LabelSyntaxError>;
}

// =============================================================================
// Attribute Hierarchies
// =============================================================================

/// The set of attributes implied by holding some parent attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hierarchy {
    implied: BTreeSet<String>,
}

impl Hierarchy {
    #[must_use]
    pub fn new(implied: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            implied: implied.into_iter().map(Into::into).collect(),
        }
    }

    /// True iff this hierarchy implies the given attribute.
    #[must_use]
    pub fn implies(&self, attribute: &str) -> bool {
        self.implied.contains(attribute)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.implied.iter().map(String::as_str)
    }
}

/// Resolves the hierarchy rooted at an attribute, if any.
pub trait HierarchyResolver: Send + Sync {
    fn resolve(&self, attribute: &str) -> Option<Hierarchy>;
}

/// Disabled-sentinel resolver used when no hierarchy store is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHierarchy;

impl HierarchyResolver for NoHierarchy {
    fn resolve(&self, _attribute: &str) -> Option<Hierarchy> {
        None
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_set_is_order_insensitive() {
        let a: AttributeSet = ["nationality=UK", "clearance=high"].into_iter().collect();
        let b: AttributeSet = ["clearance=high", "nationality=UK"].into_iter().collect();
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
        assert!(a.contains("nationality=UK"));
        assert!(!a.contains("nationality=US"));
    }

    #[test]
    fn test_attribute_set_serializes_as_list() {
        let attrs: AttributeSet = ["b", "a"].into_iter().collect();
        let json = serde_json::to_value(&attrs).unwrap();
        assert_eq!(json, serde_json::json!(["a", "b"]));
    }

    #[test]
    fn test_hierarchy_implication() {
        let hierarchy = Hierarchy::new(["nationality=UK", "nationality=EU"]);
        assert!(hierarchy.implies("nationality=UK"));
        assert!(!hierarchy.implies("nationality=US"));
    }

    #[test]
    fn test_no_hierarchy_resolves_nothing() {
        assert!(NoHierarchy.resolve("anything").is_none());
    }
}
