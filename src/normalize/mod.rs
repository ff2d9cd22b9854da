//! Schema and text canonicalization applied before transformation.

pub mod schema;
pub mod text;

pub use schema::{normalize_document, RenameRule, MESSAGE_RULES, RECORD_RULES};
pub use text::normalize_text;
