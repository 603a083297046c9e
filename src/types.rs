use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// A column value handed to the tabular consumer
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// No value under the field or any of its parents
    Null,
    /// A primitive, or a list that is not a collection of documents
    Scalar(Value),
    /// A sub-document or a collection of sub-documents, left uniterated
    Structured(Value),
}

impl FieldValue {
    /// Wrap a raw JSON value, sorting it into the matching variant
    pub fn from_json(value: Value) -> Self {
        let structured = match &value {
            Value::Null => return FieldValue::Null,
            Value::Object(_) => true,
            Value::Array(items) => !items.is_empty() && items.iter().all(|v| v.is_object()),
            _ => false,
        };

        if structured {
            FieldValue::Structured(value)
        } else {
            FieldValue::Scalar(value)
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            FieldValue::Null => None,
            FieldValue::Scalar(v) | FieldValue::Structured(v) => Some(v),
        }
    }

    pub fn into_json(self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Scalar(v) | FieldValue::Structured(v) => v,
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Null => serializer.serialize_unit(),
            FieldValue::Scalar(v) | FieldValue::Structured(v) => v.serialize(serializer),
        }
    }
}

/// One flat row produced from a top-level document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    /// Zero-based index of the top-level document this row came from
    pub document: u64,

    /// Zero-based position of this row within its document
    pub ordinal: u64,

    /// Column values keyed by full field path
    pub data: Map<String, Value>,
}

impl Row {
    pub fn new(document: u64, ordinal: u64) -> Self {
        Row {
            document,
            ordinal,
            data: Map::new(),
        }
    }

    pub fn insert(&mut self, column: impl Into<String>, value: FieldValue) {
        self.data.insert(column.into(), value.into_json());
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.data.get(column)
    }
}

/// Configuration for deciding which arrays get expanded into rows
#[derive(Debug, Clone)]
pub struct FlattenConfig {
    /// Expand arrays of sub-documents into one row per element
    pub flatten_nested_documents: bool,

    /// Expand arrays of scalars when a level has no array of sub-documents
    pub flatten_scalar_arrays: bool,

    /// Full paths that take precedence when choosing a level's flattenable field
    pub flatten_paths: Vec<String>,

    /// Maximum schema nesting depth to describe (0 = only top-level fields)
    pub max_depth: usize,
}

impl Default for FlattenConfig {
    fn default() -> Self {
        FlattenConfig {
            flatten_nested_documents: true,
            flatten_scalar_arrays: true,
            flatten_paths: vec![],
            max_depth: 10,
        }
    }
}
