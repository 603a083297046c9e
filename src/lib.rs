//! # docflat - Nested Document Flattening
//!
//! Turns semi-structured documents (objects holding scalars, sub-documents
//! and arrays of either, to any depth) into flat rows for tabular
//! consumers. Each row is one combination of elements drawn from the nested
//! arrays along a chain of field paths, like a lazily computed cross join
//! across nesting levels.
//!
//! ## Modules
//!
//! - **catalog**: field metadata, and a catalog built from a JSON Schema
//! - **flatten**: the resolver, level cursors, engine and row writer
//!
//! ## Quick Start
//!
//! ```rust
//! use docflat::{FlattenConfig, FlatteningEngine, SchemaCatalog};
//! use serde_json::json;
//!
//! # fn main() -> anyhow::Result<()> {
//! let schema = json!({
//!     "type": "object",
//!     "properties": {
//!         "a": {"type": "integer"},
//!         "items": {
//!             "type": "array",
//!             "items": {
//!                 "type": "object",
//!                 "properties": {"x": {"type": "integer"}, "y": {"type": "integer"}}
//!             }
//!         }
//!     }
//! });
//!
//! let catalog = SchemaCatalog::from_schema(&schema, FlattenConfig::default())?;
//! let mut engine = FlatteningEngine::new(catalog);
//!
//! engine.load(json!({"a": 1, "items": [{"x": 10, "y": 20}, {"x": 30, "y": 40}]}));
//! while engine.advance() {
//!     let x = engine.value_of("items.x")?;
//!     // 10, then 30
//! #   assert!(!x.is_null());
//! }
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use std::io::{BufRead, Write};

pub mod catalog;
pub mod error;
pub mod flatten;
pub mod types;

// Re-export commonly used types for convenience
pub use catalog::{FieldCatalog, FieldDescriptor, FieldKind, SchemaCatalog};
pub use error::FlattenError;
pub use flatten::{DocumentResolver, FlatteningEngine, ReferenceResolver, Resolution, RowWriter};
pub use types::{FieldValue, FlattenConfig, Row};

/// Main entry point: flatten a newline-delimited JSON stream into rows
///
/// Returns the number of documents read.
pub fn flatten_json<R, W, C>(
    reader: R,
    writer: &mut RowWriter<W>,
    engine: &mut FlatteningEngine<C>,
    columns: &[String],
) -> Result<u64>
where
    R: BufRead,
    W: Write,
    C: FieldCatalog,
{
    let mut documents = 0;

    for line in reader.lines() {
        let line = line.context("Failed to read line")?;
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(&line)
            .context("Failed to parse JSON")?;

        let rows = engine
            .rows_of(value, columns)
            .with_context(|| format!("Failed to flatten document {}", documents))?;
        writer.write_rows(&rows)?;
        documents += 1;
    }

    Ok(documents)
}
