pub mod document;
pub mod error;

pub use document::{Document, DEFAULTS_FIELD, GRAPH_FIELD, SECURITY_LABELS_FIELD};
pub use error::{CoreError, Result};
