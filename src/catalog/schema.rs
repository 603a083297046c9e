//! Field catalog derived from a JSON Schema
//!
//! The schema is walked once, the way a melt plan is derived: every
//! property becomes a [`FieldDescriptor`], every object schema becomes a
//! document node, and each document level (the top-level document, or the
//! items of an array of sub-documents) gets at most one flattenable field.

use crate::catalog::{join_path, FieldCatalog, FieldDescriptor, FieldKind};
use crate::error::{FlattenError, Result};
use crate::types::FlattenConfig;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

static EMPTY_SCHEMA: Value = Value::Null;

/// A set of fields sharing one parent document
#[derive(Debug, Clone)]
struct SchemaNode {
    /// Full paths of the node's direct children, in schema order
    fields: Vec<String>,

    /// Node id of the document level this node belongs to. Plain
    /// sub-documents share the level of their parent; array items open
    /// a new one.
    scope: usize,
}

/// Catalog built from a JSON Schema document
#[derive(Debug, Clone)]
pub struct SchemaCatalog {
    fields: HashMap<String, Arc<FieldDescriptor>>,
    nodes: Vec<SchemaNode>,
    flattenable: HashMap<usize, String>,
    chain: Vec<String>,
}

impl SchemaCatalog {
    /// Build a catalog from a JSON Schema whose root describes an object
    pub fn from_schema(schema: &Value, config: FlattenConfig) -> Result<Self> {
        if schema_type(schema) != Some("object") {
            return Err(FlattenError::Schema(
                "root schema must describe an object".to_string(),
            ));
        }

        let mut builder = CatalogBuilder {
            config: &config,
            fields: HashMap::new(),
            nodes: Vec::new(),
            candidates: HashMap::new(),
        };
        builder.analyze_object(schema, "", None, 0);

        let CatalogBuilder {
            fields,
            nodes,
            candidates,
            ..
        } = builder;

        let flattenable = Self::choose_flattenable(&candidates, &config);
        let chain = Self::flattenable_chain(&fields, &flattenable);
        debug!(levels = ?chain, fields = fields.len(), "built field catalog");

        Ok(SchemaCatalog {
            fields,
            nodes,
            flattenable,
            chain,
        })
    }

    /// Pick one array field per document level
    fn choose_flattenable(
        candidates: &HashMap<usize, Vec<(String, FieldKind)>>,
        config: &FlattenConfig,
    ) -> HashMap<usize, String> {
        let mut chosen = HashMap::new();

        for (scope, arrays) in candidates.iter() {
            let explicit = arrays
                .iter()
                .find(|(path, _)| config.flatten_paths.iter().any(|p| p == path));

            let documents = arrays
                .iter()
                .find(|(_, kind)| *kind == FieldKind::DocumentArray)
                .filter(|_| config.flatten_nested_documents);

            let scalars = arrays
                .iter()
                .find(|(_, kind)| *kind == FieldKind::ScalarArray)
                .filter(|_| config.flatten_scalar_arrays);

            if let Some((path, _)) = explicit.or(documents).or(scalars) {
                chosen.insert(*scope, path.clone());
            }
        }

        chosen
    }

    /// Walk the designated fields from the root down to the deepest level
    fn flattenable_chain(
        fields: &HashMap<String, Arc<FieldDescriptor>>,
        flattenable: &HashMap<usize, String>,
    ) -> Vec<String> {
        let mut chain = Vec::new();
        let mut scope = 0;

        while let Some(path) = flattenable.get(&scope) {
            chain.push(path.clone());
            match fields.get(path) {
                Some(desc) if desc.kind == FieldKind::DocumentArray => match desc.child_schema {
                    Some(child) => scope = child,
                    None => break,
                },
                _ => break,
            }
        }

        chain
    }

    /// Full paths of every field that has no child fields, depth-first
    pub fn leaf_columns(&self) -> Vec<String> {
        let mut columns = Vec::new();
        self.collect_leaves(0, &mut columns);
        columns
    }

    fn collect_leaves(&self, node: usize, columns: &mut Vec<String>) {
        let Some(schema_node) = self.nodes.get(node) else {
            return;
        };
        for path in schema_node.fields.iter() {
            let Some(desc) = self.fields.get(path) else {
                continue;
            };
            match desc.child_schema {
                Some(child) if desc.has_children() => self.collect_leaves(child, columns),
                _ => columns.push(path.clone()),
            }
        }
    }

    /// Designated flattenable fields, root-to-leaf
    pub fn chain(&self) -> &[String] {
        &self.chain
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FieldCatalog for SchemaCatalog {
    fn lookup(&self, full_path: &str) -> Option<Arc<FieldDescriptor>> {
        self.fields.get(full_path).cloned()
    }

    fn is_descendant_flattenable(&self, descriptor: &FieldDescriptor) -> bool {
        (1..=descriptor.level_path.len()).all(|depth| {
            let prefix = join_path(&descriptor.level_path[..depth]);
            match self.fields.get(&prefix) {
                Some(desc) if desc.is_array() => self.chain.contains(&prefix),
                _ => true,
            }
        })
    }

    fn children_of(&self, descriptor: &FieldDescriptor) -> Vec<Arc<FieldDescriptor>> {
        descriptor
            .child_schema
            .and_then(|node| self.nodes.get(node))
            .map(|node| {
                node.fields
                    .iter()
                    .filter_map(|path| self.fields.get(path).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn root_fields(&self) -> Vec<Arc<FieldDescriptor>> {
        self.nodes
            .first()
            .map(|node| {
                node.fields
                    .iter()
                    .filter_map(|path| self.fields.get(path).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn flattenable_field(&self, parent: Option<&FieldDescriptor>) -> Option<String> {
        let scope = match parent {
            None => 0,
            Some(desc) => {
                let node = desc.child_schema?;
                self.nodes.get(node)?.scope
            }
        };
        self.flattenable.get(&scope).cloned()
    }
}

struct CatalogBuilder<'a> {
    config: &'a FlattenConfig,
    fields: HashMap<String, Arc<FieldDescriptor>>,
    nodes: Vec<SchemaNode>,
    /// Array fields seen per document level, in schema order
    candidates: HashMap<usize, Vec<(String, FieldKind)>>,
}

impl CatalogBuilder<'_> {
    /// Describe the properties of an object schema, returning its node id
    fn analyze_object(
        &mut self,
        schema: &Value,
        prefix: &str,
        scope: Option<usize>,
        depth: usize,
    ) -> usize {
        let node_id = self.nodes.len();
        let scope = scope.unwrap_or(node_id);
        self.nodes.push(SchemaNode {
            fields: Vec::new(),
            scope,
        });

        let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) else {
            return node_id;
        };

        for (field_name, field_schema) in properties.iter() {
            let full_path = if prefix.is_empty() {
                field_name.clone()
            } else {
                format!("{}.{}", prefix, field_name)
            };

            let mut kind = field_kind(field_schema);
            if depth >= self.config.max_depth && kind != FieldKind::ScalarArray {
                // Children beyond the depth limit stay opaque
                kind = FieldKind::Scalar;
            }

            let mut desc = FieldDescriptor::new(full_path.clone(), kind);
            match kind {
                FieldKind::Document => {
                    let child = self.analyze_object(field_schema, &full_path, Some(scope), depth + 1);
                    desc = desc.with_child_schema(child);
                }
                FieldKind::DocumentArray => {
                    let items = field_schema.get("items").unwrap_or(&EMPTY_SCHEMA);
                    let child = self.analyze_object(items, &full_path, None, depth + 1);
                    desc = desc.with_child_schema(child);
                }
                FieldKind::Scalar | FieldKind::ScalarArray => {}
            }

            if desc.is_array() {
                self.candidates
                    .entry(scope)
                    .or_default()
                    .push((full_path.clone(), kind));
            }

            self.nodes[node_id].fields.push(full_path.clone());
            self.fields.insert(full_path, Arc::new(desc));
        }

        node_id
    }
}

/// The non-null `type` of a schema node, inferred from its shape when absent
fn schema_type(schema: &Value) -> Option<&str> {
    match schema.get("type") {
        Some(Value::String(t)) => Some(t.as_str()),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(|t| t.as_str())
            .find(|t| *t != "null"),
        _ if schema.get("properties").is_some() => Some("object"),
        _ if schema.get("items").is_some() => Some("array"),
        _ => None,
    }
}

fn field_kind(field_schema: &Value) -> FieldKind {
    match schema_type(field_schema) {
        Some("array") => {
            let items_are_objects = field_schema
                .get("items")
                .map(|items| schema_type(items) == Some("object") && items.get("properties").is_some())
                .unwrap_or(false);
            if items_are_objects {
                FieldKind::DocumentArray
            } else {
                FieldKind::ScalarArray
            }
        }
        Some("object") if field_schema.get("properties").is_some() => FieldKind::Document,
        _ => FieldKind::Scalar,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn order_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": {"type": "integer"},
                "customer": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "emails": {"type": "array", "items": {"type": "string"}}
                    }
                },
                "lines": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "sku": {"type": "string"},
                            "parts": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "properties": {"serial": {"type": "string"}}
                                }
                            }
                        }
                    }
                },
                "tags": {"type": ["array", "null"], "items": {"type": "string"}}
            }
        })
    }

    #[test]
    fn test_field_kinds() {
        let catalog = SchemaCatalog::from_schema(&order_schema(), FlattenConfig::default()).unwrap();

        assert_eq!(catalog.lookup("id").unwrap().kind, FieldKind::Scalar);
        assert_eq!(catalog.lookup("customer").unwrap().kind, FieldKind::Document);
        assert_eq!(catalog.lookup("customer.emails").unwrap().kind, FieldKind::ScalarArray);
        assert_eq!(catalog.lookup("lines").unwrap().kind, FieldKind::DocumentArray);
        assert_eq!(catalog.lookup("lines.parts.serial").unwrap().kind, FieldKind::Scalar);
        assert_eq!(catalog.lookup("tags").unwrap().kind, FieldKind::ScalarArray);
        assert!(catalog.lookup("missing").is_none());
    }

    #[test]
    fn test_document_arrays_win_over_scalar_arrays() {
        let catalog = SchemaCatalog::from_schema(&order_schema(), FlattenConfig::default()).unwrap();

        assert_eq!(catalog.chain(), &["lines".to_string(), "lines.parts".to_string()]);
        assert_eq!(catalog.flattenable_field(None).as_deref(), Some("lines"));

        let lines = catalog.lookup("lines").unwrap();
        assert_eq!(catalog.flattenable_field(Some(&lines)).as_deref(), Some("lines.parts"));
    }

    #[test]
    fn test_explicit_flatten_path() {
        let config = FlattenConfig {
            flatten_paths: vec!["customer.emails".to_string()],
            ..FlattenConfig::default()
        };
        let catalog = SchemaCatalog::from_schema(&order_schema(), config).unwrap();

        assert_eq!(catalog.chain(), &["customer.emails".to_string()]);
    }

    #[test]
    fn test_scalar_arrays_when_no_documents() {
        let config = FlattenConfig {
            flatten_nested_documents: false,
            ..FlattenConfig::default()
        };
        let catalog = SchemaCatalog::from_schema(&order_schema(), config).unwrap();

        // customer.emails comes before tags in the schema
        assert_eq!(catalog.chain(), &["customer.emails".to_string()]);
    }

    #[test]
    fn test_is_descendant_flattenable() {
        let config = FlattenConfig {
            flatten_scalar_arrays: false,
            ..FlattenConfig::default()
        };
        let catalog = SchemaCatalog::from_schema(&order_schema(), config).unwrap();

        let serial = catalog.lookup("lines.parts.serial").unwrap();
        assert!(catalog.is_descendant_flattenable(&serial));

        let name = catalog.lookup("customer.name").unwrap();
        assert!(catalog.is_descendant_flattenable(&name));

        let tags = catalog.lookup("tags").unwrap();
        assert!(!catalog.is_descendant_flattenable(&tags));
    }

    #[test]
    fn test_children_and_leaves() {
        let catalog = SchemaCatalog::from_schema(&order_schema(), FlattenConfig::default()).unwrap();

        let lines = catalog.lookup("lines").unwrap();
        let children: Vec<String> = catalog
            .children_of(&lines)
            .iter()
            .map(|d| d.full_path.clone())
            .collect();
        assert_eq!(children, vec!["lines.sku", "lines.parts"]);

        assert_eq!(
            catalog.leaf_columns(),
            vec![
                "id",
                "customer.name",
                "customer.emails",
                "lines.sku",
                "lines.parts.serial",
                "tags",
            ]
        );
        assert_eq!(catalog.root_fields().len(), 4);
    }

    #[test]
    fn test_max_depth_keeps_deep_documents_opaque() {
        let config = FlattenConfig {
            max_depth: 1,
            ..FlattenConfig::default()
        };
        let catalog = SchemaCatalog::from_schema(&order_schema(), config).unwrap();

        assert_eq!(catalog.lookup("lines.parts").unwrap().kind, FieldKind::Scalar);
        assert!(catalog.lookup("lines.parts.serial").is_none());
        assert_eq!(catalog.chain(), &["lines".to_string()]);
    }

    #[test]
    fn test_first_array_in_schema_order_wins() {
        let schema = json!({
            "type": "object",
            "properties": {
                "zones": {
                    "type": "array",
                    "items": {"type": "object", "properties": {"name": {"type": "string"}}}
                },
                "areas": {
                    "type": "array",
                    "items": {"type": "object", "properties": {"name": {"type": "string"}}}
                }
            }
        });
        let catalog = SchemaCatalog::from_schema(&schema, FlattenConfig::default()).unwrap();

        assert_eq!(catalog.chain(), &["zones".to_string()]);
        assert_eq!(catalog.leaf_columns(), vec!["zones.name", "areas.name"]);
    }

    #[test]
    fn test_rejects_non_object_root() {
        let err = SchemaCatalog::from_schema(&json!({"type": "string"}), FlattenConfig::default());
        assert!(matches!(err, Err(FlattenError::Schema(_))));
    }
}
