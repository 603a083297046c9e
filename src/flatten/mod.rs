//! Nested-document flattening
//!
//! Expands nested arrays of a document into flat rows, one row per
//! combination of array elements, for consumers that read columns by name.
//!
//! ## Components
//!
//! - [`DocumentResolver`]: navigates raw documents by field path
//! - [`ArrayLevelCursor`]: iteration state of one nested array
//! - [`FlatteningEngine`]: the odometer over all flattenable levels
//! - [`RowWriter`]: writes the produced rows as JSON Lines

pub mod cursor;
pub mod engine;
pub mod resolver;
pub mod writer;

pub use cursor::{ArrayLevelCursor, LevelKind};
pub use engine::{EngineStats, FlatteningEngine, Level};
pub use resolver::{DocumentRef, DocumentResolver, Node, ReferenceResolver, Resolution};
pub use writer::RowWriter;
