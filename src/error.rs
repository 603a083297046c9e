use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by the catalog, resolver and flattening engine
#[derive(Debug, Error)]
pub enum FlattenError {
    /// The field path has no descriptor in the catalog
    #[error("invalid field name: {0}")]
    InvalidField(String),

    /// A container could not be navigated the way the metadata describes
    #[error("unable to get field value of {path} from document: ({container})")]
    Resolution { path: String, container: Value },

    /// `value_of` was called before the first successful `advance()`
    #[error("no current row; load a document and call advance() first")]
    NoCurrentRow,

    /// The schema handed to the catalog builder is malformed
    #[error("invalid schema: {0}")]
    Schema(String),
}

pub type Result<T> = std::result::Result<T, FlattenError>;
