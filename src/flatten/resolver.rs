//! Navigation of raw documents by field path
//!
//! The resolver is stateless with respect to the engine: it takes a source
//! value and a list of level names and reports what sits under them. It
//! never consults or fills the engine's caches.

use crate::catalog::join_path;
use serde_json::{Map, Value};
use tracing::info;

/// Outcome of resolving a field path against a document
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// No value under the field or one of its intermediate parents
    Absent,
    /// A primitive, or a list that is not made of sub-documents
    Scalar(Value),
    /// A single sub-document
    Document(Value),
    /// A collection of sub-documents, nested lists collapsed into one
    Documents(Vec<Value>),
}

impl Resolution {
    pub fn is_absent(&self) -> bool {
        matches!(self, Resolution::Absent)
    }

    /// The resolved value as one JSON value, `None` when absent
    pub fn into_value(self) -> Option<Value> {
        match self {
            Resolution::Absent => None,
            Resolution::Scalar(v) | Resolution::Document(v) => Some(v),
            Resolution::Documents(docs) => Some(Value::Array(docs)),
        }
    }
}

/// Link to a document stored elsewhere, `{"$ref": .., "$id": .., "$db": ..}`
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRef {
    pub collection: String,
    pub id: Value,
    pub database: Option<String>,
}

impl DocumentRef {
    fn from_map(map: &Map<String, Value>) -> Option<Self> {
        let collection = map.get("$ref")?.as_str()?.to_string();
        let id = map.get("$id")?.clone();
        let database = map.get("$db").and_then(|db| db.as_str()).map(str::to_string);
        Some(DocumentRef {
            collection,
            id,
            database,
        })
    }
}

/// Fetches the documents behind [`DocumentRef`]s
pub trait ReferenceResolver {
    fn fetch(&self, reference: &DocumentRef) -> anyhow::Result<Option<Value>>;
}

/// Shape of a raw value, decided once and then dispatched on
#[derive(Debug)]
pub enum Node<'a> {
    Null,
    Scalar(&'a Value),
    Array(&'a [Value]),
    Document(&'a Value),
    Reference(DocumentRef),
}

impl<'a> Node<'a> {
    /// Classify a value; references are only recognized when `links` is set
    pub fn classify(value: &'a Value, links: bool) -> Self {
        match value {
            Value::Null => Node::Null,
            Value::Array(items) => Node::Array(items),
            Value::Object(map) if links => match DocumentRef::from_map(map) {
                Some(reference) => Node::Reference(reference),
                None => Node::Document(value),
            },
            Value::Object(_) => Node::Document(value),
            _ => Node::Scalar(value),
        }
    }
}

/// Extracts values and container documents from raw documents
#[derive(Default)]
pub struct DocumentResolver {
    references: Option<Box<dyn ReferenceResolver>>,
}

impl std::fmt::Debug for DocumentResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentResolver")
            .field("references", &self.references.is_some())
            .finish()
    }
}

impl DocumentResolver {
    pub fn new() -> Self {
        DocumentResolver { references: None }
    }

    /// Dereference `$ref` links through the given resolver
    pub fn with_references(references: Box<dyn ReferenceResolver>) -> Self {
        DocumentResolver {
            references: Some(references),
        }
    }

    /// Resolve the value or container under `levels` in `source`
    ///
    /// Lists met on the way are resolved element by element and the results
    /// merged into one list. A null or missing value at any level makes the
    /// whole path absent. A scalar met above the last level has no fields of
    /// its own and is returned as is.
    pub fn resolve_container<S: AsRef<str>>(&self, levels: &[S], source: &Value) -> Resolution {
        let Some((head, rest)) = levels.split_first() else {
            return self.classify(source);
        };

        match Node::classify(source, false) {
            Node::Null => Resolution::Absent,
            Node::Array(items) => self.resolve_from_list(levels, items),
            Node::Document(doc) => {
                let value = match doc.get(head.as_ref()) {
                    None | Some(Value::Null) => return Resolution::Absent,
                    Some(value) => value,
                };
                if rest.is_empty() {
                    return self.classify(value);
                }
                match self.classify(value) {
                    Resolution::Absent => Resolution::Absent,
                    Resolution::Document(child) => self.resolve_container(rest, &child),
                    Resolution::Documents(children) => self.resolve_from_list(rest, &children),
                    Resolution::Scalar(Value::Array(items)) => self.resolve_from_list(rest, &items),
                    Resolution::Scalar(scalar) => {
                        info!(field = %join_path(levels), "nested field has no parent document");
                        Resolution::Scalar(scalar)
                    }
                }
            }
            // list elements that are not documents pass through unchanged
            Node::Scalar(scalar) => Resolution::Scalar(scalar.clone()),
            // Sources are always classified containers, never raw links
            Node::Reference(_) => Resolution::Absent,
        }
    }

    /// Sort a raw field value into a container or a scalar
    ///
    /// A list is a container when every element is a sub-document, a list of
    /// them, or null; nested lists are collapsed into the same collection.
    /// Null elements stay in place as `Value::Null`.
    pub fn classify(&self, value: &Value) -> Resolution {
        match Node::classify(value, self.references.is_some()) {
            Node::Null => Resolution::Absent,
            Node::Scalar(scalar) => Resolution::Scalar(scalar.clone()),
            Node::Document(doc) => Resolution::Document(doc.clone()),
            Node::Reference(reference) => self.dereference(&reference),
            Node::Array(items) => {
                let mut docs = Vec::with_capacity(items.len());
                for item in items {
                    match self.classify(item) {
                        Resolution::Document(doc) => docs.push(doc),
                        Resolution::Documents(nested) => docs.extend(nested),
                        Resolution::Absent => docs.push(Value::Null),
                        // at least one element is not a nested document
                        Resolution::Scalar(_) => return Resolution::Scalar(value.clone()),
                    }
                }
                Resolution::Documents(docs)
            }
        }
    }

    fn resolve_from_list<S: AsRef<str>>(&self, levels: &[S], items: &[Value]) -> Resolution {
        if items.is_empty() {
            return Resolution::Absent;
        }

        let resolved: Vec<Resolution> = items
            .iter()
            .map(|item| self.resolve_container(levels, item))
            .collect();

        if resolved.iter().all(Resolution::is_absent) {
            return Resolution::Absent;
        }

        let all_documents = resolved.iter().all(|r| {
            matches!(
                r,
                Resolution::Document(_) | Resolution::Documents(_) | Resolution::Absent
            )
        });
        if all_documents {
            let mut docs = Vec::new();
            for r in resolved {
                match r {
                    Resolution::Document(doc) => docs.push(doc),
                    Resolution::Documents(nested) => docs.extend(nested),
                    Resolution::Absent => docs.push(Value::Null),
                    Resolution::Scalar(_) => {}
                }
            }
            return Resolution::Documents(docs);
        }

        let mut values = Vec::with_capacity(resolved.len());
        for r in resolved {
            match r {
                Resolution::Absent => values.push(Value::Null),
                Resolution::Scalar(Value::Array(nested)) => values.extend(nested),
                Resolution::Documents(nested) => values.extend(nested),
                Resolution::Scalar(v) | Resolution::Document(v) => values.push(v),
            }
        }
        Resolution::Scalar(Value::Array(values))
    }

    fn dereference(&self, reference: &DocumentRef) -> Resolution {
        let Some(references) = self.references.as_ref() else {
            return Resolution::Absent;
        };
        match references.fetch(reference) {
            Ok(Some(doc)) => match Node::classify(&doc, false) {
                Node::Document(_) => Resolution::Document(doc),
                _ => Resolution::Scalar(doc),
            },
            Ok(None) => {
                info!(collection = %reference.collection, id = %reference.id, "referenced document not found");
                Resolution::Absent
            }
            Err(err) => {
                info!(collection = %reference.collection, error = %err, "ignoring error in fetching a referenced document");
                Resolution::Absent
            }
        }
    }
}
