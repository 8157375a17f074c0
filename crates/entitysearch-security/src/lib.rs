//! # entitysearch-security
//!
//! Security-label enforcement for EntitySearch documents.
//!
//! This crate decides, field by field and list item by list item, what an
//! authenticated caller with a given attribute set may see of an entity
//! document. It provides:
//! - The attribute evaluation collaborator contract (label parsing and
//!   expression evaluation stay external)
//! - Shared label-parse and per-request evaluation caches
//! - [`SecureSearchContext`] with the in-place redaction algorithm and the
//!   secondary type filter
//! - [`RedactedDocumentsCache`], a bounded, expiring, per-user cache of
//!   fully-redacted outcomes
//!
//! ## Modules
//!
//! - [`attributes`] - Attribute sets and the external evaluator contract
//! - [`labels`] - Label-parse cache shared across requests
//! - [`context`] - Per-request context and the filtering algorithm
//! - [`visibility_cache`] - Shared redacted-documents cache
//! - [`config`] - Cache configuration
//! - [`error`] - Error types

pub mod attributes;
pub mod config;
pub mod context;
pub mod error;
pub mod labels;
pub mod visibility_cache;

#[cfg(test)]
pub(crate) mod test_support;

pub use attributes::{
    AttributeSet, Expression, Hierarchy, HierarchyResolver, LabelEvaluator, LabelSyntaxError,
    NoHierarchy,
};
pub use config::SecurityCacheConfig;
pub use context::{SecureSearchContext, SecurityOptions, TypeFilter};
pub use error::{SecurityError, SecurityResult};
pub use labels::{LabelParseCache, ParseOutcome};
pub use visibility_cache::{RedactedDocumentsCache, RedactedDocumentsCacheStats, VisibilityKey};
