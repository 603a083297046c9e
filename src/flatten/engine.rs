//! The flattening engine
//!
//! Turns one top-level document at a time into a sequence of flat rows.
//! Each row picks one element from every flattenable level (the chain of
//! nested arrays designated by the catalog), and rows are visited like an
//! odometer: the deepest level cycles fastest and carries into its parent
//! when exhausted.
//!
//! Values are resolved lazily in [`FlatteningEngine::value_of`] and kept in
//! two caches:
//!
//! - a position-scoped cache of containers and values under the flattenable
//!   levels, evicted level by level as the cursor advances;
//! - a per-document cache for fields with no flattenable ancestor, cleared
//!   only when the next document is loaded.

use crate::catalog::{is_at_or_below, split_path, strip_parent, FieldCatalog, FieldDescriptor, TOP_LEVEL_PARENT};
use crate::error::{FlattenError, Result};
use crate::flatten::cursor::{ArrayLevelCursor, LevelKind};
use crate::flatten::resolver::{DocumentResolver, Resolution};
use crate::types::{FieldValue, Row};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// One flattenable level and its cursor
#[derive(Debug, Clone)]
pub struct Level {
    /// Full path of the array field; empty for the top-level pseudo-level
    pub path: String,
    pub kind: LevelKind,
    /// Level names leading from the parent level's container to this array
    relative: Vec<String>,
    cursor: ArrayLevelCursor,
}

impl Level {
    fn top() -> Self {
        Level {
            path: TOP_LEVEL_PARENT.to_string(),
            kind: LevelKind::Top,
            relative: Vec::new(),
            cursor: ArrayLevelCursor::new(),
        }
    }

    pub fn cursor(&self) -> &ArrayLevelCursor {
        &self.cursor
    }
}

/// Counters describing the work done by an engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Calls made into the document resolver
    pub resolutions: u64,
    /// Lookups answered by the position-scoped cache
    pub position_hits: u64,
    /// Lookups answered by the per-document cache
    pub document_hits: u64,
    /// Rows produced by successful `advance()` calls
    pub rows: u64,
    /// Top-level documents loaded
    pub documents: u64,
}

/// Read-through memo of catalog lookups
///
/// Misses are only remembered for paths the engine derives itself (levels
/// and intermediate prefixes of known fields), so unknown column names
/// cannot grow the map.
#[derive(Debug, Default)]
struct MetadataCache {
    entries: HashMap<String, Option<Arc<FieldDescriptor>>>,
}

impl MetadataCache {
    fn get<C: FieldCatalog>(&mut self, catalog: &C, full_path: &str) -> Option<Arc<FieldDescriptor>> {
        if let Some(entry) = self.entries.get(full_path) {
            return entry.clone();
        }
        let entry = catalog.lookup(full_path);
        self.entries.insert(full_path.to_string(), entry.clone());
        entry
    }

    /// Lookup of a consumer-supplied path; a miss is not remembered
    fn field<C: FieldCatalog>(&mut self, catalog: &C, full_path: &str) -> Option<Arc<FieldDescriptor>> {
        if let Some(entry) = self.entries.get(full_path) {
            return entry.clone();
        }
        let descriptor = catalog.lookup(full_path)?;
        self.entries
            .insert(full_path.to_string(), Some(Arc::clone(&descriptor)));
        Some(descriptor)
    }
}

/// Pull-based cursor producing flat rows from nested documents
///
/// Not meant to be shared between consumers: one engine serves one stream
/// of top-level documents.
#[derive(Debug)]
pub struct FlatteningEngine<C: FieldCatalog> {
    catalog: C,
    resolver: DocumentResolver,
    metadata: MetadataCache,
    levels: Vec<Level>,
    document: Option<Value>,
    started: bool,
    on_row: bool,
    ordinal: u64,
    position: HashMap<String, Resolution>,
    document_values: HashMap<String, Resolution>,
    stats: EngineStats,
}

impl<C: FieldCatalog> FlatteningEngine<C> {
    pub fn new(catalog: C) -> Self {
        Self::with_resolver(catalog, DocumentResolver::new())
    }

    pub fn with_resolver(catalog: C, resolver: DocumentResolver) -> Self {
        let mut metadata = MetadataCache::default();
        let levels = Self::discover_levels(&catalog, &mut metadata);
        debug!(
            levels = ?levels.iter().map(|l| l.path.as_str()).collect::<Vec<_>>(),
            "discovered flattenable levels"
        );

        FlatteningEngine {
            catalog,
            resolver,
            metadata,
            levels,
            document: None,
            started: false,
            on_row: false,
            ordinal: 0,
            position: HashMap::new(),
            document_values: HashMap::new(),
            stats: EngineStats::default(),
        }
    }

    /// Follow the designated flattenable field of each document level,
    /// from the top-level document down to the deepest nested array
    fn discover_levels(catalog: &C, metadata: &mut MetadataCache) -> Vec<Level> {
        let mut levels = vec![Level::top()];
        let mut parent: Option<Arc<FieldDescriptor>> = None;

        while let Some(path) = catalog.flattenable_field(parent.as_deref()) {
            let Some(descriptor) = metadata.get(catalog, &path) else {
                break; // not a valid field
            };
            if levels.iter().any(|level| level.path == path) {
                break;
            }

            let parent_path = parent
                .as_ref()
                .map(|p| p.full_path.as_str())
                .unwrap_or(TOP_LEVEL_PARENT);
            let Some(relative) = strip_parent(&path, parent_path) else {
                break;
            };

            let kind = if descriptor.is_scalar_array() {
                LevelKind::Scalars
            } else {
                LevelKind::Documents
            };
            levels.push(Level {
                path: path.clone(),
                kind,
                relative: split_path(relative).map(str::to_string).collect(),
                cursor: ArrayLevelCursor::new(),
            });

            if !descriptor.has_children() {
                break;
            }
            parent = Some(descriptor);
        }

        levels
    }

    /// Make `document` the current top-level document
    ///
    /// Drops every cursor and cached value of the previous document. The
    /// first `advance()` afterwards positions on the document's first row.
    pub fn load(&mut self, document: Value) {
        self.clear_document();
        self.document = Some(document);
        self.stats.documents += 1;
    }

    /// Move to the next row of the current document
    ///
    /// Returns false once every combination has been visited; the engine is
    /// then cleared and a new document must be loaded.
    pub fn advance(&mut self) -> bool {
        if self.document.is_none() {
            return false;
        }

        if !self.started {
            self.started = true;
            self.on_row = true;
            self.stats.rows += 1;
            return true;
        }

        // iterate over the lowest level first
        for idx in (1..self.levels.len()).rev() {
            let path = self.levels[idx].path.clone();
            self.clear_position_of(&path);

            if let Err(err) = self.populate_level(idx) {
                warn!(level = %path, error = %err, "unable to populate level; treating it as exhausted");
            }
            if self.levels[idx].cursor.step() {
                self.ordinal += 1;
                self.stats.rows += 1;
                return true;
            }
            // done iterating this level; clear it before moving its parent
            self.levels[idx].cursor.reset();
        }

        trace!(rows = self.ordinal + 1, "top-level document fully enumerated");
        self.clear_document();
        false
    }

    /// Value of a column at the current row
    pub fn value_of(&mut self, field_path: &str) -> Result<FieldValue> {
        if !self.on_row {
            return Err(FlattenError::NoCurrentRow);
        }

        let descriptor = self
            .metadata
            .field(&self.catalog, field_path)
            .ok_or_else(|| FlattenError::InvalidField(field_path.to_string()))?;

        // an array of scalars being flattened on its own
        if let Some(idx) = self.level_index(field_path) {
            if self.levels[idx].kind == LevelKind::Scalars {
                self.populate_level(idx)?;
                return Ok(self.levels[idx]
                    .cursor
                    .current()
                    .cloned()
                    .map(FieldValue::from_json)
                    .unwrap_or(FieldValue::Null));
            }
        }

        match self.anchor_level(field_path) {
            Some(idx) => self.nested_value(idx, &descriptor),
            None => self.document_value(&descriptor),
        }
    }

    /// Values of the given columns at the current row
    pub fn current_row<S: AsRef<str>>(&mut self, columns: &[S]) -> Result<Row> {
        let document = self.stats.documents.saturating_sub(1);
        let mut row = Row::new(document, self.ordinal);
        for column in columns {
            let value = self.value_of(column.as_ref())?;
            row.insert(column.as_ref(), value);
        }
        Ok(row)
    }

    /// Load `document` and collect all of its rows
    pub fn rows_of<S: AsRef<str>>(&mut self, document: Value, columns: &[S]) -> Result<Vec<Row>> {
        self.load(document);
        let mut rows = Vec::new();
        while self.advance() {
            rows.push(self.current_row(columns)?);
        }
        Ok(rows)
    }

    /// Flattenable level paths, root-to-leaf, excluding the top-level pseudo-level
    pub fn levels(&self) -> Vec<&str> {
        self.levels[1..].iter().map(|l| l.path.as_str()).collect()
    }

    pub fn level(&self, path: &str) -> Option<&Level> {
        self.level_index(path).map(|idx| &self.levels[idx])
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn has_document(&self) -> bool {
        self.document.is_some()
    }

    fn level_index(&self, path: &str) -> Option<usize> {
        self.levels
            .iter()
            .skip(1)
            .position(|level| level.path == path)
            .map(|idx| idx + 1)
    }

    /// Deepest level of sub-documents holding `field_path`
    fn anchor_level(&self, field_path: &str) -> Option<usize> {
        (1..self.levels.len()).rev().find(|&idx| {
            let level = &self.levels[idx];
            level.kind == LevelKind::Documents && is_at_or_below(field_path, &level.path)
        })
    }

    /// Fill a level's cursor from its parent's current container
    fn populate_level(&mut self, idx: usize) -> Result<()> {
        if self.levels[idx].cursor.is_populated() {
            return Ok(());
        }

        let resolution = if idx == 1 {
            let Some(document) = self.document.as_ref() else {
                return Err(FlattenError::NoCurrentRow);
            };
            self.stats.resolutions += 1;
            self.resolver
                .resolve_container(&self.levels[idx].relative, document)
        } else {
            match self.level_container(idx - 1)? {
                Some(container) => {
                    self.stats.resolutions += 1;
                    self.resolver
                        .resolve_container(&self.levels[idx].relative, &container)
                }
                None => Resolution::Absent,
            }
        };

        let level = &mut self.levels[idx];
        if level.kind == LevelKind::Documents {
            if let Resolution::Scalar(value) = resolution {
                return Err(FlattenError::Resolution {
                    path: level.path.clone(),
                    container: value,
                });
            }
        }

        trace!(level = %level.path, value = ?resolution, "cached container documents");
        level.cursor.populate(resolution);
        Ok(())
    }

    /// Current container document of a level of sub-documents, `None` when
    /// the level has no element at this position
    fn level_container(&mut self, idx: usize) -> Result<Option<Value>> {
        if let Some(cached) = self.position.get(&self.levels[idx].path) {
            self.stats.position_hits += 1;
            return Ok(container_value(cached));
        }

        self.populate_level(idx)?;
        let level = &self.levels[idx];
        let current = match level.cursor.current() {
            None | Some(Value::Null) => Resolution::Absent,
            Some(doc) => Resolution::Document(doc.clone()),
        };
        let container = container_value(&current);
        self.position.insert(level.path.clone(), current);
        Ok(container)
    }

    /// Value of a field lying under the flattenable level `idx`
    fn nested_value(&mut self, idx: usize, descriptor: &FieldDescriptor) -> Result<FieldValue> {
        let full_path = descriptor.full_path.as_str();
        if let Some(cached) = self.position.get(full_path) {
            self.stats.position_hits += 1;
            return Ok(field_value(cached.clone()));
        }

        let level_path = self.levels[idx].path.clone();
        let Some(mut container) = self.level_container(idx)? else {
            self.position.insert(full_path.to_string(), Resolution::Absent);
            return Ok(FieldValue::Null);
        };
        if full_path == level_path {
            return Ok(FieldValue::Structured(container));
        }

        let relative: Vec<&str> = strip_parent(full_path, &level_path)
            .map(|rest| split_path(rest).collect())
            .unwrap_or_default();
        let Some((_, intermediate)) = relative.split_last() else {
            return Ok(FieldValue::Null);
        };

        // walk down through the intermediate containers, caching each one
        let mut prefix = level_path;
        for (depth, segment) in intermediate.iter().enumerate() {
            prefix = format!("{}.{}", prefix, segment);

            let navigable = match self.metadata.get(&self.catalog, &prefix) {
                Some(desc) => self.catalog.is_descendant_flattenable(&desc),
                None => true,
            };
            if !navigable {
                // an array that is not flattened: collect values across it
                let resolution = self.resolve_cached(full_path, &relative[depth..], &container);
                return Ok(field_value(resolution));
            }

            match self.resolve_cached(&prefix, &relative[depth..=depth], &container) {
                Resolution::Absent => {
                    self.position.insert(full_path.to_string(), Resolution::Absent);
                    return Ok(FieldValue::Null);
                }
                Resolution::Document(doc) => container = doc,
                Resolution::Documents(docs) => container = Value::Array(docs),
                Resolution::Scalar(value) => {
                    info!(field = %full_path, parent = %prefix, "nested field has no parent document");
                    self.position
                        .insert(full_path.to_string(), Resolution::Scalar(value.clone()));
                    return Ok(FieldValue::Scalar(value));
                }
            }
        }

        let last = relative.len() - 1;
        let resolution = self.resolve_cached(full_path, &relative[last..], &container);
        Ok(field_value(resolution))
    }

    /// Value of a field with no flattenable ancestor, resolved once per document
    fn document_value(&mut self, descriptor: &FieldDescriptor) -> Result<FieldValue> {
        if let Some(cached) = self.document_values.get(&descriptor.full_path) {
            self.stats.document_hits += 1;
            return Ok(field_value(cached.clone()));
        }

        let Some(document) = self.document.as_ref() else {
            return Err(FlattenError::NoCurrentRow);
        };
        self.stats.resolutions += 1;
        let resolution = self
            .resolver
            .resolve_container(&descriptor.level_path, document);

        trace!(field = %descriptor.full_path, value = ?resolution, "cached non-flattened value for top-level field");
        self.document_values
            .insert(descriptor.full_path.clone(), resolution.clone());
        Ok(field_value(resolution))
    }

    /// Resolve `levels` from `container` unless `key` is already cached at
    /// this position
    fn resolve_cached(&mut self, key: &str, levels: &[&str], container: &Value) -> Resolution {
        if let Some(cached) = self.position.get(key) {
            self.stats.position_hits += 1;
            return cached.clone();
        }

        self.stats.resolutions += 1;
        let resolution = self.resolver.resolve_container(levels, container);
        self.position.insert(key.to_string(), resolution.clone());
        resolution
    }

    /// Evict the cached containers and values at or below a level
    fn clear_position_of(&mut self, level_path: &str) {
        if self.position.is_empty() || level_path == TOP_LEVEL_PARENT {
            return;
        }
        self.position
            .retain(|path, _| !is_at_or_below(path, level_path));
    }

    fn clear_document(&mut self) {
        for level in self.levels.iter_mut() {
            level.cursor.reset();
        }
        self.position.clear();
        self.document_values.clear();
        self.document = None;
        self.started = false;
        self.on_row = false;
        self.ordinal = 0;
    }
}

fn container_value(resolution: &Resolution) -> Option<Value> {
    match resolution {
        Resolution::Document(doc) => Some(doc.clone()),
        Resolution::Documents(docs) => Some(Value::Array(docs.clone())),
        Resolution::Absent | Resolution::Scalar(_) => None,
    }
}

fn field_value(resolution: Resolution) -> FieldValue {
    match resolution {
        Resolution::Absent => FieldValue::Null,
        Resolution::Scalar(value) => FieldValue::Scalar(value),
        Resolution::Document(doc) => FieldValue::Structured(doc),
        Resolution::Documents(docs) => FieldValue::Structured(Value::Array(docs)),
    }
}
