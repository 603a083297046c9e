//! Field metadata consumed by the flattening engine
//!
//! A catalog describes every addressable field path of a document schema:
//! its dotted full path, the nesting levels it crosses, whether it holds
//! scalars, a list of scalars, a sub-document or a list of sub-documents,
//! and which field of each document level is designated for flattening.
//!
//! The engine only ever queries a catalog through [`FieldCatalog`]. The
//! crate ships [`SchemaCatalog`], built from a JSON Schema.

pub mod schema;

pub use schema::SchemaCatalog;

use std::sync::Arc;

/// Separator between nesting levels in a full field path
pub const PATH_SEPARATOR: char = '.';

/// Full path of the synthetic top-level pseudo-level
pub const TOP_LEVEL_PARENT: &str = "";

/// Shape of the values stored under a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Scalar,
    ScalarArray,
    Document,
    DocumentArray,
}

/// Immutable metadata for one field path
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub full_path: String,
    pub simple_name: String,
    pub level_path: Vec<String>,
    pub kind: FieldKind,
    /// Schema node describing the children, for document fields
    pub child_schema: Option<usize>,
}

impl FieldDescriptor {
    pub fn new(full_path: impl Into<String>, kind: FieldKind) -> Self {
        let full_path = full_path.into();
        let level_path: Vec<String> = split_path(&full_path).map(str::to_string).collect();
        FieldDescriptor {
            simple_name: simple_name(&full_path).to_string(),
            full_path,
            level_path,
            kind,
            child_schema: None,
        }
    }

    pub fn with_child_schema(mut self, node: usize) -> Self {
        self.child_schema = Some(node);
        self
    }

    pub fn is_scalar_array(&self) -> bool {
        self.kind == FieldKind::ScalarArray
    }

    pub fn has_children(&self) -> bool {
        matches!(self.kind, FieldKind::Document | FieldKind::DocumentArray)
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, FieldKind::ScalarArray | FieldKind::DocumentArray)
    }

    /// Whether the field sits directly in the top-level document
    pub fn is_top_level(&self) -> bool {
        self.level_path.len() == 1
    }
}

/// Read-only metadata source queried by the engine
pub trait FieldCatalog {
    /// Descriptor for a full field path
    fn lookup(&self, full_path: &str) -> Option<Arc<FieldDescriptor>>;

    /// Whether every array on the path down to `descriptor` is a flattenable level
    fn is_descendant_flattenable(&self, descriptor: &FieldDescriptor) -> bool;

    /// Direct child fields of a document field
    fn children_of(&self, descriptor: &FieldDescriptor) -> Vec<Arc<FieldDescriptor>>;

    /// Fields of the top-level document
    fn root_fields(&self) -> Vec<Arc<FieldDescriptor>>;

    /// The field designated for flattening in the document level under `parent`
    /// (the top-level document when `None`)
    fn flattenable_field(&self, parent: Option<&FieldDescriptor>) -> Option<String>;
}

pub fn split_path(full_path: &str) -> impl Iterator<Item = &str> {
    full_path.split(PATH_SEPARATOR).filter(|s| !s.is_empty())
}

pub fn join_path<S: AsRef<str>>(segments: &[S]) -> String {
    let mut out = String::new();
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            out.push(PATH_SEPARATOR);
        }
        out.push_str(segment.as_ref());
    }
    out
}

pub fn simple_name(full_path: &str) -> &str {
    full_path
        .rsplit(PATH_SEPARATOR)
        .next()
        .unwrap_or(full_path)
}

/// Child path relative to `parent`, or `None` if `full_path` is not below it.
/// The top-level parent is an ancestor of every path.
pub fn strip_parent<'a>(full_path: &'a str, parent: &str) -> Option<&'a str> {
    if parent == TOP_LEVEL_PARENT {
        return Some(full_path);
    }
    full_path
        .strip_prefix(parent)
        .and_then(|rest| rest.strip_prefix(PATH_SEPARATOR))
}

/// Whether `full_path` is `ancestor` itself or lies below it
pub fn is_at_or_below(full_path: &str, ancestor: &str) -> bool {
    full_path == ancestor || strip_parent(full_path, ancestor).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_level_path() {
        let desc = FieldDescriptor::new("order.lines.sku", FieldKind::Scalar);
        assert_eq!(desc.simple_name, "sku");
        assert_eq!(desc.level_path, vec!["order", "lines", "sku"]);
        assert_eq!(join_path(&desc.level_path), desc.full_path);
        assert!(!desc.is_top_level());
        assert!(!desc.has_children());
    }

    #[test]
    fn test_strip_parent() {
        assert_eq!(strip_parent("items.x", "items"), Some("x"));
        assert_eq!(strip_parent("items.sub.x", "items"), Some("sub.x"));
        assert_eq!(strip_parent("itemsCount", "items"), None);
        assert_eq!(strip_parent("items", "items"), None);
        assert_eq!(strip_parent("a.b", TOP_LEVEL_PARENT), Some("a.b"));
    }

    #[test]
    fn test_is_at_or_below() {
        assert!(is_at_or_below("items", "items"));
        assert!(is_at_or_below("items.parts.sku", "items"));
        assert!(!is_at_or_below("itemsCount", "items"));
    }
}
