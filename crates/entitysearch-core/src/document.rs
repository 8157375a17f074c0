//! Schema-free entity document model.
//!
//! A [`Document`] is a mutable mapping from field name to an arbitrarily
//! nested JSON value tree. Documents carry their own security metadata:
//! a reserved `securityLabels` field may appear at any nesting level as a
//! sibling of the fields it governs, and a top-level reserved sub-structure
//! holds whole-document defaults.
//!
//! The document model is purely structural. Redaction itself lives in the
//! `entitysearch-security` crate, which mutates documents in place through
//! the accessors exposed here.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, Result};

/// Reserved field name holding security labels for its sibling fields.
pub const SECURITY_LABELS_FIELD: &str = "securityLabels";

/// Sub-key of the top-level reserved structure holding the whole-document
/// default label expression.
pub const DEFAULTS_FIELD: &str = "defaults";

/// Sub-key of the top-level reserved structure holding the serialized
/// label-rules graph. Opaque to this crate.
pub const GRAPH_FIELD: &str = "graph";

// =============================================================================
// Document
// =============================================================================

/// A mutable, arbitrarily-nested entity document.
///
/// Values are JSON trees (`null`, boolean, number, string, object, array)
/// with no fixed schema. Documents are constructed fresh per produced entity
/// or per hydrated search hit, mutated in place by redaction, and discarded
/// after the response is produced. Callers that need the pre-redaction
/// content must take a [`Document::deep_copy`] first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    fields: Map<String, Value>,
}

impl Document {
    /// Create an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self { fields: Map::new() }
    }

    /// Create a document from an existing field mapping.
    #[must_use]
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Create a document from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidDocument`] if the value is not an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(CoreError::invalid_document(format!(
                "expected a JSON object at the document root, got {}",
                value_kind(&other)
            ))),
        }
    }

    /// Set a top-level field, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    /// Remove a top-level field, returning its previous value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// Look up a (possibly deeply nested) value by an ordered key path.
    ///
    /// Resolves the full path to a terminal value or an intermediate
    /// mapping. Returns `None` when any step is missing or hits a
    /// non-traversable node (a scalar or an array). Never errors.
    #[must_use]
    pub fn get(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.fields.get(*first)?;
        for key in rest {
            match current {
                Value::Object(map) => current = map.get(*key)?,
                _ => return None,
            }
        }
        Some(current)
    }

    /// True iff the top-level mapping has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of top-level fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Produce an independently mutable copy, value-equal at every depth.
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        Self {
            fields: self.fields.clone(),
        }
    }

    /// Recursively remove every security-label field.
    ///
    /// Removes any field whose name equals [`SECURITY_LABELS_FIELD`] or
    /// *ends with* it. The suffix rule is intentional: entity converters
    /// emit nested label fields as `"<name>securityLabels"`, and those must
    /// be stripped too. Used only when security enforcement is fully
    /// disabled, so that label metadata is not exposed to callers who are
    /// not subject to any access check.
    pub fn trim_security_labels(&mut self) {
        trim_labels_in_map(&mut self.fields);
    }

    /// Borrow the top-level field mapping.
    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Mutably borrow the top-level field mapping.
    pub fn fields_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.fields
    }

    /// Consume the document, returning its field mapping.
    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        self.fields
    }

    /// Consume the document, returning it as a JSON object value.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

fn is_label_field(name: &str) -> bool {
    name.ends_with(SECURITY_LABELS_FIELD)
}

fn trim_labels_in_map(map: &mut Map<String, Value>) {
    map.retain(|name, _| !is_label_field(name));
    for value in map.values_mut() {
        trim_labels_in_value(value);
    }
}

fn trim_labels_in_value(value: &mut Value) {
    match value {
        Value::Object(map) => trim_labels_in_map(map),
        Value::Array(items) => {
            for item in items {
                trim_labels_in_value(item);
            }
        }
        _ => {}
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document(value: Value) -> Document {
        Document::from_value(value).unwrap()
    }

    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    #[test]
    fn test_new_document_is_empty() {
        let doc = Document::new();
        assert!(doc.is_empty());
        assert_eq!(doc.len(), 0);
    }

    #[test]
    fn test_from_value_rejects_non_objects() {
        assert!(Document::from_value(json!("scalar")).is_err());
        assert!(Document::from_value(json!([1, 2, 3])).is_err());
        assert!(Document::from_value(json!(null)).is_err());
        assert!(Document::from_value(json!({})).is_ok());
    }

    #[test]
    fn test_set_and_remove() {
        let mut doc = Document::new();
        doc.set("name", json!("Fred"));
        assert_eq!(doc.get(&["name"]), Some(&json!("Fred")));

        doc.set("name", json!("Wilma"));
        assert_eq!(doc.get(&["name"]), Some(&json!("Wilma")));

        assert_eq!(doc.remove("name"), Some(json!("Wilma")));
        assert!(doc.is_empty());
    }

    // -------------------------------------------------------------------------
    // Path lookup
    // -------------------------------------------------------------------------

    #[test]
    fn test_get_nested_path() {
        let doc = document(json!({
            "entity": {
                "location": { "city": "London" }
            }
        }));

        assert_eq!(
            doc.get(&["entity", "location", "city"]),
            Some(&json!("London"))
        );
        // A partial path resolves to the intermediate mapping.
        assert_eq!(
            doc.get(&["entity", "location"]),
            Some(&json!({ "city": "London" }))
        );
    }

    #[test]
    fn test_get_absent_paths_never_error() {
        let doc = document(json!({
            "entity": { "age": 34 },
            "tags": ["a", "b"]
        }));

        assert_eq!(doc.get(&[]), None);
        assert_eq!(doc.get(&["missing"]), None);
        assert_eq!(doc.get(&["entity", "missing"]), None);
        // A key step into a scalar is non-traversable.
        assert_eq!(doc.get(&["entity", "age", "deeper"]), None);
        // A key step into an array is non-traversable.
        assert_eq!(doc.get(&["tags", "0"]), None);
    }

    // -------------------------------------------------------------------------
    // Deep copy
    // -------------------------------------------------------------------------

    #[test]
    fn test_deep_copy_is_equal_and_independent() {
        let original = document(json!({
            "name": "Fred",
            "nested": { "list": [1, 2, {"inner": true}] }
        }));

        let mut copy = original.deep_copy();
        assert_eq!(copy, original);

        // Mutating the copy's nested structures never changes the original.
        if let Some(Value::Object(nested)) = copy.fields_mut().get_mut("nested") {
            nested.insert("extra".to_string(), json!("added"));
            if let Some(Value::Array(list)) = nested.get_mut("list") {
                list.push(json!(4));
            }
        }
        copy.set("name", json!("changed"));

        assert_eq!(original.get(&["name"]), Some(&json!("Fred")));
        assert_eq!(original.get(&["nested", "extra"]), None);
        assert_eq!(
            original.get(&["nested", "list"]),
            Some(&json!([1, 2, {"inner": true}]))
        );
    }

    // -------------------------------------------------------------------------
    // Label trimming
    // -------------------------------------------------------------------------

    #[test]
    fn test_trim_removes_reserved_field_at_every_level() {
        let mut doc = document(json!({
            "name": "Fred",
            "securityLabels": { "name": "nationality=UK" },
            "nested": {
                "value": 1,
                "securityLabels": { "value": "x=1" }
            },
            "items": [
                { "a": 1, "securityLabels": { "a": "x=1" } },
                { "b": 2 }
            ]
        }));

        doc.trim_security_labels();

        assert_eq!(
            doc,
            document(json!({
                "name": "Fred",
                "nested": { "value": 1 },
                "items": [ { "a": 1 }, { "b": 2 } ]
            }))
        );
    }

    #[test]
    fn test_trim_suffix_rule_strips_converter_emitted_fields() {
        // Converter output flattens nested label maps into suffixed names;
        // the suffix rule must strip those too, even a genuine data field
        // that happens to end with the reserved name.
        let mut doc = document(json!({
            "name": "Fred",
            "addresssecurityLabels": { "address": "x=1" },
            "extrasecurityLabels": "not actually a label map"
        }));

        doc.trim_security_labels();

        // The suffix match is exact and case-sensitive: a differently-cased
        // name such as "mySecurityLabels" would survive.
        assert_eq!(doc, document(json!({ "name": "Fred" })));
    }

    #[test]
    fn test_trim_on_unlabelled_document_is_noop() {
        let mut doc = document(json!({ "name": "Fred", "age": 34 }));
        let before = doc.deep_copy();
        doc.trim_security_labels();
        assert_eq!(doc, before);
    }

    // -------------------------------------------------------------------------
    // Serialization
    // -------------------------------------------------------------------------

    #[test]
    fn test_document_serializes_transparently() {
        let doc = document(json!({ "name": "Fred", "age": 34 }));
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json, json!({ "name": "Fred", "age": 34 }));

        let roundtrip: Document = serde_json::from_value(json).unwrap();
        assert_eq!(roundtrip, doc);
    }
}
