//! Shared label-parse cache.
//!
//! Parsing a raw label string is independent of who is asking, so parse
//! results are cached once and shared across requests and users. Parse
//! *failures* are cached too: a malformed label stays malformed, and the
//! warning for it is logged once, on first sight, rather than per document.
//!
//! Evaluation results are never cached here. They depend on the attribute
//! set fixed in a [`crate::context::SecureSearchContext`], which keeps its
//! own private, request-scoped memo.

use std::sync::Arc;

use dashmap::DashMap;

use crate::attributes::{Expression, LabelEvaluator};

/// The cached result of parsing one raw label string.
#[derive(Clone)]
pub enum ParseOutcome {
    /// The label parsed into one or more expressions.
    Parsed(Arc<[Arc<dyn Expression>]>),
    /// The label was malformed or yielded no usable expressions.
    ///
    /// Filtering treats this as a deny at the label's scope.
    Invalid,
}

impl ParseOutcome {
    /// True iff this outcome carries usable expressions.
    #[must_use]
    pub fn is_parsed(&self) -> bool {
        matches!(self, Self::Parsed(_))
    }
}

impl std::fmt::Debug for ParseOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parsed(exprs) => f.debug_tuple("Parsed").field(&exprs.len()).finish(),
            Self::Invalid => f.write_str("Invalid"),
        }
    }
}

/// Shared, long-lived cache mapping raw label strings to parse outcomes.
#[derive(Default)]
pub struct LabelParseCache {
    entries: DashMap<String, ParseOutcome>,
}

impl LabelParseCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw label string through the evaluator, memoized.
    ///
    /// A label that parses into zero expressions is treated the same as a
    /// syntax error: there is nothing to evaluate, and an unevaluable label
    /// must never grant access.
    pub fn parse(&self, evaluator: &dyn LabelEvaluator, raw: &str) -> ParseOutcome {
        if let Some(hit) = self.entries.get(raw) {
            return hit.clone();
        }

        let outcome = match evaluator.parse(raw) {
            Ok(expressions) if expressions.is_empty() => {
                tracing::warn!(label = raw, "Label parsed to no expressions, treating as deny");
                ParseOutcome::Invalid
            }
            Ok(expressions) => ParseOutcome::Parsed(expressions.into()),
            Err(error) => {
                tracing::warn!(label = raw, error = %error, "Failed to parse label, treating as deny");
                ParseOutcome::Invalid
            }
        };

        self.entries.insert(raw.to_string(), outcome.clone());
        outcome
    }

    /// Number of cached labels (valid and invalid).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all cached parse results.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

// =============================================================================
// Tests
// =============================================================================
