//! Per-request secure search context and the redaction algorithm.
//!
//! A [`SecureSearchContext`] is created once per inbound request and owns
//! the security-label filtering pass that runs over every candidate
//! document before it may reach the caller. Filtering is recursive and in
//! place: content the caller may not see is removed, and a document that
//! ends up empty (or fails the secondary type filter) is reported as not
//! visible at all.
//!
//! The context is deliberately not safe for concurrent sharing: its
//! private evaluation memo is unsynchronized interior state, because one
//! context serves exactly one request thread. Create one per request.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::{Map, Value};

use entitysearch_core::{DEFAULTS_FIELD, Document, SECURITY_LABELS_FIELD};

use crate::attributes::{AttributeSet, Expression, HierarchyResolver, LabelEvaluator};
use crate::error::{SecurityError, SecurityResult};
use crate::labels::{LabelParseCache, ParseOutcome};
use crate::visibility_cache::RedactedDocumentsCache;

// =============================================================================
// Security Options
// =============================================================================

/// Per-request security configuration.
///
/// Optional pieces default to disabled sentinels so the filtering
/// algorithm never branches on missing configuration.
#[derive(Debug, Clone, Default)]
pub struct SecurityOptions {
    /// Whether security enforcement is active at all. When false, every
    /// document is visible and only label trimming applies.
    pub enabled: bool,

    /// The authenticated caller. Required when enforcement is enabled;
    /// scopes the shared redacted-documents cache.
    pub username: String,

    /// The caller's security attributes, fixed for the request.
    pub attributes: AttributeSet,

    /// Keep security-label metadata in returned documents instead of
    /// stripping it.
    pub show_labels: bool,

    /// Optional secondary type filter, independent of security labels.
    pub type_filter: Option<TypeFilter>,
}

impl SecurityOptions {
    /// Options with enforcement switched off entirely.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Options enforcing security for the given caller.
    #[must_use]
    pub fn enabled(username: impl Into<String>, attributes: AttributeSet) -> Self {
        Self {
            enabled: true,
            username: username.into(),
            attributes,
            show_labels: false,
            type_filter: None,
        }
    }

    /// Keep label metadata in filtered documents.
    #[must_use]
    pub fn with_show_labels(mut self, show_labels: bool) -> Self {
        self.show_labels = show_labels;
        self
    }

    /// Require documents to match a type filter as well.
    #[must_use]
    pub fn with_type_filter(mut self, type_filter: TypeFilter) -> Self {
        self.type_filter = Some(type_filter);
        self
    }

    fn validate(&self) -> SecurityResult<()> {
        if self.enabled && self.username.trim().is_empty() {
            return Err(SecurityError::invalid_options(
                "username is required when security is enabled",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Type Filter
// =============================================================================

/// Secondary, non-security filter over configured document fields.
///
/// A document passes iff at least one configured field path resolves,
/// anywhere in the document (descending through arrays of objects), to a
/// scalar equal to one of the allowed values or to an array containing
/// one. Runs after security filtering, over already-redacted content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeFilter {
    fields: Vec<String>,
    allowed: BTreeSet<String>,
    spec: String,
}

impl TypeFilter {
    /// Create a type filter from dot-separated field paths and an
    /// allow-set of values.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError::InvalidOptions`] when either side is empty.
    pub fn new(
        fields: impl IntoIterator<Item = impl Into<String>>,
        allowed: impl IntoIterator<Item = impl Into<String>>,
    ) -> SecurityResult<Self> {
        let mut fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        fields.sort();
        fields.dedup();
        let allowed: BTreeSet<String> = allowed.into_iter().map(Into::into).collect();

        if fields.is_empty() || fields.iter().any(|field| field.trim().is_empty()) {
            return Err(SecurityError::invalid_options(
                "type filter requires at least one non-empty field path",
            ));
        }
        if allowed.is_empty() {
            return Err(SecurityError::invalid_options(
                "type filter requires at least one allowed value",
            ));
        }

        let spec = format!(
            "{}={}",
            fields.join(","),
            allowed.iter().cloned().collect::<Vec<_>>().join("|")
        );
        Ok(Self {
            fields,
            allowed,
            spec,
        })
    }

    /// Canonical rendering of this filter, stable across construction
    /// order. Folded into the visibility cache key.
    #[must_use]
    pub fn spec_string(&self) -> &str {
        &self.spec
    }

    /// True iff any configured path in the document holds an allowed value.
    #[must_use]
    pub fn matches(&self, document: &Document) -> bool {
        self.fields.iter().any(|field| {
            let path: Vec<&str> = field.split('.').collect();
            let Some((first, rest)) = path.split_first() else {
                return false;
            };
            document
                .fields()
                .get(*first)
                .is_some_and(|value| self.path_matches(value, rest))
        })
    }

    fn path_matches(&self, value: &Value, path: &[&str]) -> bool {
        match path.split_first() {
            None => self.value_matches(value),
            Some((key, rest)) => match value {
                Value::Object(map) => map
                    .get(*key)
                    .is_some_and(|child| self.path_matches(child, rest)),
                // A path step over an array scans every element.
                Value::Array(items) => items.iter().any(|item| self.path_matches(item, path)),
                _ => false,
            },
        }
    }

    fn value_matches(&self, value: &Value) -> bool {
        match value {
            Value::String(text) => self.allowed.contains(text),
            Value::Array(items) => items
                .iter()
                .any(|item| item.as_str().is_some_and(|text| self.allowed.contains(text))),
            _ => false,
        }
    }
}

// =============================================================================
// Secure Search Context
// =============================================================================

/// Per-request filtering context.
///
/// Combines the caller's [`SecurityOptions`], the external label
/// evaluator, the shared parse cache, a private evaluation memo, and an
/// optional handle to the shared [`RedactedDocumentsCache`].
pub struct SecureSearchContext {
    options: SecurityOptions,
    evaluator: Arc<dyn LabelEvaluator>,
    hierarchy: Arc<dyn HierarchyResolver>,
    parse_cache: Arc<LabelParseCache>,
    redacted_cache: Option<Arc<RedactedDocumentsCache>>,
    // Keyed by expression source, valid only for this context's fixed
    // attribute set. RefCell keeps the context !Sync on purpose.
    evaluation_cache: RefCell<HashMap<String, bool>>,
}

impl SecureSearchContext {
    /// Create a context for one request.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError::InvalidOptions`] when the options are
    /// unusable (enabled enforcement without a username).
    pub fn new(
        options: SecurityOptions,
        evaluator: Arc<dyn LabelEvaluator>,
        hierarchy: Arc<dyn HierarchyResolver>,
        parse_cache: Arc<LabelParseCache>,
        redacted_cache: Option<Arc<RedactedDocumentsCache>>,
    ) -> SecurityResult<Self> {
        options.validate()?;
        Ok(Self {
            options,
            evaluator,
            hierarchy,
            parse_cache,
            redacted_cache,
            evaluation_cache: RefCell::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn options(&self) -> &SecurityOptions {
        &self.options
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.options.username
    }

    #[must_use]
    pub fn attributes(&self) -> &AttributeSet {
        &self.options.attributes
    }

    /// Canonical rendering of the active type filter, empty when none is
    /// configured. Part of the visibility cache key.
    #[must_use]
    pub fn type_filter_spec(&self) -> &str {
        self.options
            .type_filter
            .as_ref()
            .map_or("", TypeFilter::spec_string)
    }

    // -------------------------------------------------------------------------
    // Visibility
    // -------------------------------------------------------------------------

    /// Decide whether the caller may see this document at all, redacting
    /// it in place to the visible subset.
    ///
    /// With enforcement disabled the document is visible unmodified
    /// (label metadata trimmed unless `show_labels`). With a shared
    /// redacted-documents cache configured, a cached not-visible outcome
    /// short-circuits filtering entirely; a visible document is always
    /// re-filtered, because visibility never implies *full* visibility.
    pub fn can_view_document(&self, id: &str, version: &str, document: &mut Document) -> bool {
        if !self.options.enabled {
            if !self.options.show_labels {
                document.trim_security_labels();
            }
            return true;
        }

        let Some(cache) = &self.redacted_cache else {
            return self.compute_visibility(document);
        };

        if cache.is_visible(self, id, version) == Some(false) {
            tracing::debug!(
                id,
                version,
                user = self.options.username.as_str(),
                "Document fully redacted for user (cached)"
            );
            return false;
        }

        let visible = self.compute_visibility(document);
        if !visible {
            // Only negative outcomes are worth remembering: a visible
            // document still needs its per-field redaction re-run.
            cache.set_visible(self, id, version, false);
            tracing::debug!(
                id,
                version,
                user = self.options.username.as_str(),
                "Document fully redacted for user"
            );
        }
        visible
    }

    fn compute_visibility(&self, document: &mut Document) -> bool {
        let default_decision = self.default_decision(document);
        self.filter_document(document, default_decision);
        !document.is_empty() && self.matches_type_filter(document)
    }

    /// The allow/deny outcome applied to content with no specific label.
    ///
    /// Read from the document-level `securityLabels.defaults` expression:
    /// absent or blank allows, a malformed expression denies everything it
    /// governs (fail secure), and a valid expression list must evaluate
    /// all-true against the caller's attributes.
    fn default_decision(&self, document: &Document) -> bool {
        match document.get(&[SECURITY_LABELS_FIELD, DEFAULTS_FIELD]) {
            None | Some(Value::Null) => true,
            Some(Value::String(raw)) if raw.trim().is_empty() => true,
            Some(Value::String(raw)) => {
                match self.parse_cache.parse(self.evaluator.as_ref(), raw) {
                    ParseOutcome::Parsed(expressions) => self.evaluate_all(&expressions),
                    ParseOutcome::Invalid => {
                        tracing::warn!(
                            label = raw.as_str(),
                            "Malformed document default label, default decision is deny"
                        );
                        false
                    }
                }
            }
            Some(_) => {
                tracing::warn!(
                    "Document default label is not a string, default decision is deny"
                );
                false
            }
        }
    }

    // -------------------------------------------------------------------------
    // Field and list filtering
    // -------------------------------------------------------------------------

    /// Redact the document in place against the given default decision.
    pub fn filter_document(&self, document: &mut Document, default_decision: bool) {
        self.filter_level(document.fields_mut(), default_decision);
    }

    /// Filter one nesting level: recurse depth-first into nested mappings
    /// and sequences, then prune this level's fields.
    fn filter_level(&self, map: &mut Map<String, Value>, default_decision: bool) {
        // Detach the labels mapping so sibling fields can be mutated while
        // their labels are consulted.
        let mut labels = match map.remove(SECURITY_LABELS_FIELD) {
            Some(Value::Object(labels)) => labels,
            Some(_) => {
                tracing::warn!("Reserved securityLabels field is not a mapping, discarding");
                Map::new()
            }
            None => Map::new(),
        };

        let names: Vec<String> = map.keys().cloned().collect();
        for name in names {
            let Some(value) = map.get_mut(&name) else {
                continue;
            };
            let keep = match value {
                Value::Object(child) => {
                    self.filter_level(child, default_decision);
                    !child.is_empty()
                }
                Value::Array(items) => {
                    self.filter_sequence(&name, items, &mut labels, default_decision)
                }
                _ => self.scalar_visible(&name, &labels, default_decision),
            };
            if !keep {
                map.remove(&name);
                labels.remove(&name);
            }
        }

        if self.options.show_labels && !labels.is_empty() {
            map.insert(SECURITY_LABELS_FIELD.to_string(), Value::Object(labels));
        }
    }

    /// Filter a sequence field. Returns whether the field is kept.
    fn filter_sequence(
        &self,
        name: &str,
        items: &mut Vec<Value>,
        labels: &mut Map<String, Value>,
        default_decision: bool,
    ) -> bool {
        if !items.is_empty() && items.iter().all(Value::is_object) {
            // Nested-document items carry their own labels; filter each
            // and drop the ones that end up empty.
            for item in items.iter_mut() {
                if let Value::Object(child) = item {
                    self.filter_level(child, default_decision);
                }
            }
            items.retain(|item| item.as_object().is_some_and(|child| !child.is_empty()));
            return !items.is_empty();
        }

        match labels.get_mut(name) {
            Some(Value::Array(item_labels)) => {
                // Positionally aligned label list: decide per item, and
                // drop label slots in lockstep to keep the arrays aligned.
                let mut kept_items = Vec::with_capacity(items.len());
                let mut kept_labels = Vec::with_capacity(items.len());
                for (index, mut item) in items.drain(..).enumerate() {
                    let slot = item_labels.get(index).cloned();
                    if !self.item_visible(slot.as_ref(), default_decision) {
                        continue;
                    }
                    // A mapping item in a mixed sequence still carries its
                    // own nested labels.
                    if let Value::Object(child) = &mut item {
                        self.filter_level(child, default_decision);
                        if child.is_empty() {
                            continue;
                        }
                    }
                    kept_labels.push(slot.unwrap_or_else(|| Value::String(String::new())));
                    kept_items.push(item);
                }
                *items = kept_items;
                *item_labels = kept_labels;
                !items.is_empty()
            }
            Some(_) => {
                // A sequence field with a non-sequence label entry is a
                // shape mismatch; fail secure.
                tracing::warn!(
                    field = name,
                    "Sequence field has a non-sequence label entry, removing"
                );
                items.clear();
                false
            }
            // No accompanying label list: the default decision governs
            // the entire sequence.
            None => {
                if !default_decision {
                    items.clear();
                    return false;
                }
                for item in items.iter_mut() {
                    if let Value::Object(child) = item {
                        self.filter_level(child, default_decision);
                    }
                }
                items.retain(|item| item.as_object().is_none_or(|child| !child.is_empty()));
                !items.is_empty()
            }
        }
    }

    fn item_visible(&self, label: Option<&Value>, default_decision: bool) -> bool {
        match label {
            None | Some(Value::Null) => default_decision,
            Some(Value::String(raw)) if raw.trim().is_empty() => default_decision,
            Some(Value::String(raw)) => self.label_allows(raw),
            Some(_) => false,
        }
    }

    fn scalar_visible(
        &self,
        name: &str,
        labels: &Map<String, Value>,
        default_decision: bool,
    ) -> bool {
        match labels.get(name) {
            None | Some(Value::Null) => default_decision,
            Some(Value::String(raw)) if raw.trim().is_empty() => default_decision,
            Some(Value::String(raw)) => self.label_allows(raw),
            // A scalar field with a non-string label entry is a shape
            // mismatch; fail secure.
            Some(_) => false,
        }
    }

    /// A specific label grants access iff it parses and every expression
    /// evaluates true. Malformed labels never grant access, regardless of
    /// the default decision.
    fn label_allows(&self, raw: &str) -> bool {
        match self.parse_cache.parse(self.evaluator.as_ref(), raw) {
            ParseOutcome::Parsed(expressions) => self.evaluate_all(&expressions),
            ParseOutcome::Invalid => false,
        }
    }

    // -------------------------------------------------------------------------
    // Expression evaluation
    // -------------------------------------------------------------------------

    /// All-match AND over the given expressions, memoized per expression.
    ///
    /// An empty list is a deny: a label that yields nothing evaluable
    /// must never grant access.
    #[must_use]
    pub fn evaluate_all(&self, expressions: &[Arc<dyn Expression>]) -> bool {
        if expressions.is_empty() {
            return false;
        }
        expressions.iter().all(|expr| self.evaluate_one(expr))
    }

    fn evaluate_one(&self, expression: &Arc<dyn Expression>) -> bool {
        let key = expression.source();
        if let Some(&cached) = self.evaluation_cache.borrow().get(key) {
            return cached;
        }
        let result = expression.evaluate(&self.options.attributes, self.hierarchy.as_ref());
        self.evaluation_cache
            .borrow_mut()
            .insert(key.to_string(), result);
        result
    }

    // -------------------------------------------------------------------------
    // Type filtering
    // -------------------------------------------------------------------------

    fn matches_type_filter(&self, document: &Document) -> bool {
        match &self.options.type_filter {
            Some(filter) => filter.matches(document),
            None => true,
        }
    }
}

impl std::fmt::Debug for SecureSearchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureSearchContext")
            .field("options", &self.options)
            .field("has_redacted_cache", &self.redacted_cache.is_some())
            .field("cached_evaluations", &self.evaluation_cache.borrow().len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
