//! Shared test fixtures.
//!
//! The real attribute-expression engine is an external collaborator, so
//! tests drive the filtering code through a minimal `key=value` evaluator:
//! a label is a `&`-joined conjunction of attribute terms, each term
//! requiring the caller to hold (or be implied into) that exact attribute.
//! Parse and evaluation counters make cache behavior observable.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::attributes::{
    AttributeSet, Expression, HierarchyResolver, LabelEvaluator, LabelSyntaxError, NoHierarchy,
};
use crate::context::{SecureSearchContext, SecurityOptions};
use crate::labels::LabelParseCache;
use crate::visibility_cache::RedactedDocumentsCache;

/// Expression satisfied when the caller holds one specific attribute,
/// directly or through a hierarchy.
pub(crate) struct RequiredAttribute {
    attribute: String,
    evaluations: Arc<AtomicUsize>,
}

impl Expression for RequiredAttribute {
    fn evaluate(&self, attributes: &AttributeSet, hierarchy: &dyn HierarchyResolver) -> bool {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        if attributes.contains(&self.attribute) {
            return true;
        }
        attributes.iter().any(|held| {
            hierarchy
                .resolve(held)
                .is_some_and(|h| h.implies(&self.attribute))
        })
    }

    fn source(&self) -> &str {
        &self.attribute
    }
}

/// `key=value` conjunction evaluator; `a=1&b=2` parses to two expressions.
pub(crate) struct KeyValueEvaluator {
    pub parse_calls: AtomicUsize,
    pub evaluations: Arc<AtomicUsize>,
}

impl KeyValueEvaluator {
    pub fn new() -> Self {
        Self {
            parse_calls: AtomicUsize::new(0),
            evaluations: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl LabelEvaluator for KeyValueEvaluator {
    fn parse(&self, raw: &str) -> Result<Vec<Arc<dyn Expression>>, LabelSyntaxError> {
        self.parse_calls.fetch_add(1, Ordering::SeqCst);
        raw.split('&')
            .map(str::trim)
            .map(|term| {
                if term.is_empty() || term.contains(' ') || !term.contains('=') {
                    return Err(LabelSyntaxError::new(format!(
                        "unrecognized term {term:?}"
                    )));
                }
                Ok(Arc::new(RequiredAttribute {
                    attribute: term.to_string(),
                    evaluations: Arc::clone(&self.evaluations),
                }) as Arc<dyn Expression>)
            })
            .collect()
    }
}

/// One evaluator plus one shared parse cache, from which request-scoped
/// contexts are minted the way a serving layer would.
pub(crate) struct TestEnv {
    pub evaluator: Arc<KeyValueEvaluator>,
    pub parse_cache: Arc<LabelParseCache>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            evaluator: Arc::new(KeyValueEvaluator::new()),
            parse_cache: Arc::new(LabelParseCache::new()),
        }
    }

    /// A security-enabled context with the given attributes.
    pub fn context(&self, username: &str, attributes: &[&str]) -> SecureSearchContext {
        self.context_with(
            SecurityOptions::enabled(username, attributes.iter().copied().collect()),
            None,
        )
    }

    /// Like [`TestEnv::context`], wired to a shared redacted-documents cache.
    pub fn context_with_cache(
        &self,
        username: &str,
        attributes: &[&str],
        cache: &Arc<RedactedDocumentsCache>,
    ) -> SecureSearchContext {
        self.context_with(
            SecurityOptions::enabled(username, attributes.iter().copied().collect()),
            Some(Arc::clone(cache)),
        )
    }

    pub fn context_with(
        &self,
        options: SecurityOptions,
        cache: Option<Arc<RedactedDocumentsCache>>,
    ) -> SecureSearchContext {
        SecureSearchContext::new(
            options,
            self.evaluator.clone(),
            Arc::new(NoHierarchy),
            self.parse_cache.clone(),
            cache,
        )
        .expect("test options are valid")
    }

    /// Total expression evaluations across every context minted here.
    pub fn evaluations(&self) -> usize {
        self.evaluator.evaluations.load(Ordering::SeqCst)
    }
}
