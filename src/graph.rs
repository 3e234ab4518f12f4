//! Knowledge graph of table/column relationships
//!
//! The graph is stored as flat id-keyed collections: node id -> node, plus a
//! relationship list and an adjacency index from node id to relationship
//! indices. All traversal works purely on ids, so cyclic schemas never
//! create ownership cycles.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Table,
    Column,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
}

impl GraphNode {
    pub fn table(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            node_type: NodeType::Table,
            properties: HashMap::new(),
        }
    }

    pub fn column(table: &str, column: &str) -> Self {
        Self {
            id: format!("{}.{}", table, column),
            label: column.to_string(),
            node_type: NodeType::Column,
            properties: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationshipProperties {
    /// Whether the edge may be traversed in either direction for joins.
    #[serde(default)]
    pub bidirectional: bool,

    /// Human-readable justification recorded at detection time.
    #[serde(default)]
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphRelationship {
    pub source_id: String,
    pub target_id: String,
    pub relationship_type: String,
    pub source_column: String,
    pub target_column: String,
    pub confidence: f64,
    #[serde(default)]
    pub properties: RelationshipProperties,
}

impl GraphRelationship {
    pub fn foreign_key(
        source_id: impl Into<String>,
        source_column: impl Into<String>,
        target_id: impl Into<String>,
        target_column: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            relationship_type: "foreign_key".to_string(),
            source_column: source_column.into(),
            target_column: target_column.into(),
            confidence,
            properties: RelationshipProperties {
                bidirectional: true,
                reasoning: None,
            },
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.properties.reasoning = Some(reasoning.into());
        self
    }

    /// Unordered endpoint pair, used for deduplication.
    pub fn unordered_key(&self) -> (String, String) {
        let a = format!("{}.{}", self.source_id, self.source_column);
        let b = format!("{}.{}", self.target_id, self.target_column);
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }
}

/// Wire format for persistence. Nodes are a list on disk but id-keyed in
/// memory; the adjacency index is rebuilt on load, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDocument {
    pub nodes: Vec<GraphNode>,
    pub relationships: Vec<GraphRelationship>,
    #[serde(default)]
    pub table_aliases: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(into = "GraphDocument", from = "GraphDocument")]
pub struct KnowledgeGraph {
    nodes: HashMap<String, GraphNode>,
    relationships: Vec<GraphRelationship>,
    /// node id -> indices into `relationships` where the node is an endpoint
    adjacency: HashMap<String, Vec<usize>>,
    /// learned table aliases: table id -> alias texts (case-insensitively unique)
    table_aliases: HashMap<String, Vec<String>>,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: GraphNode) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn get_node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn table_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .nodes
            .values()
            .filter(|n| n.node_type == NodeType::Table)
            .map(|n| n.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Add a relationship after validating both endpoints exist.
    ///
    /// Dangling relationships are logged and skipped - relationship
    /// detection is noisy and one bad edge must not make the graph unusable.
    /// Returns whether the relationship was actually added.
    pub fn add_relationship(&mut self, rel: GraphRelationship) -> bool {
        if !self.nodes.contains_key(&rel.source_id) {
            warn!(
                "Skipping dangling relationship: source node '{}' not in graph ({} -> {})",
                rel.source_id, rel.source_id, rel.target_id
            );
            return false;
        }
        if !self.nodes.contains_key(&rel.target_id) {
            warn!(
                "Skipping dangling relationship: target node '{}' not in graph ({} -> {})",
                rel.target_id, rel.source_id, rel.target_id
            );
            return false;
        }

        let idx = self.relationships.len();
        self.adjacency
            .entry(rel.source_id.clone())
            .or_default()
            .push(idx);
        if rel.target_id != rel.source_id {
            self.adjacency
                .entry(rel.target_id.clone())
                .or_default()
                .push(idx);
        }
        debug!(
            "Added relationship {}.{} -> {}.{} ({}, confidence {:.2})",
            rel.source_id, rel.source_column, rel.target_id, rel.target_column,
            rel.relationship_type, rel.confidence
        );
        self.relationships.push(rel);
        true
    }

    pub fn relationships(&self) -> &[GraphRelationship] {
        &self.relationships
    }

    /// Relationships touching a node, with their indices.
    pub fn relationships_of(&self, node_id: &str) -> Vec<(usize, &GraphRelationship)> {
        self.adjacency
            .get(node_id)
            .map(|indices| {
                indices
                    .iter()
                    .map(|&i| (i, &self.relationships[i]))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Record a learned alias for a table. Alias texts are unique per table
    /// ignoring case; re-learning an existing alias is a no-op.
    pub fn learn_alias(&mut self, table_id: &str, alias: &str) {
        if !self.nodes.contains_key(table_id) {
            warn!("Not learning alias '{}' for unknown table '{}'", alias, table_id);
            return;
        }
        let aliases = self.table_aliases.entry(table_id.to_string()).or_default();
        if aliases.iter().any(|a| a.eq_ignore_ascii_case(alias)) {
            return;
        }
        aliases.push(alias.to_string());
    }

    pub fn table_aliases(&self) -> &HashMap<String, Vec<String>> {
        &self.table_aliases
    }
}

impl From<KnowledgeGraph> for GraphDocument {
    fn from(kg: KnowledgeGraph) -> Self {
        let mut nodes: Vec<GraphNode> = kg.nodes.into_values().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        GraphDocument {
            nodes,
            relationships: kg.relationships,
            table_aliases: kg.table_aliases,
        }
    }
}

impl From<GraphDocument> for KnowledgeGraph {
    fn from(doc: GraphDocument) -> Self {
        let mut kg = KnowledgeGraph::new();
        for node in doc.nodes {
            kg.add_node(node);
        }
        for rel in doc.relationships {
            // add_relationship re-validates, so a document with dangling
            // edges loads cleanly minus those edges
            kg.add_relationship(rel);
        }
        for (table_id, aliases) in doc.table_aliases {
            for alias in aliases {
                kg.learn_alias(&table_id, &alias);
            }
        }
        kg
    }
}

/// Validate a graph document before accepting it from an external source.
pub fn validate_document(doc: &GraphDocument) -> Result<Vec<String>> {
    let ids: std::collections::HashSet<&str> = doc.nodes.iter().map(|n| n.id.as_str()).collect();
    let mut warnings = Vec::new();
    for rel in &doc.relationships {
        if !ids.contains(rel.source_id.as_str()) || !ids.contains(rel.target_id.as_str()) {
            warnings.push(format!(
                "dangling relationship {} -> {}",
                rel.source_id, rel.target_id
            ));
        }
        if !(0.0..=1.0).contains(&rel.confidence) {
            warnings.push(format!(
                "confidence out of range on {} -> {}: {}",
                rel.source_id, rel.target_id, rel.confidence
            ));
        }
    }
    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_table_graph() -> KnowledgeGraph {
        let mut kg = KnowledgeGraph::new();
        kg.add_node(GraphNode::table("orders"));
        kg.add_node(GraphNode::table("customers"));
        kg
    }

    #[test]
    fn test_dangling_relationship_skipped() {
        let mut kg = two_table_graph();
        let added = kg.add_relationship(GraphRelationship::foreign_key(
            "orders", "customer_id", "ghosts", "id", 0.9,
        ));
        assert!(!added);
        assert!(kg.relationships().is_empty());

        let added = kg.add_relationship(GraphRelationship::foreign_key(
            "orders", "customer_id", "customers", "id", 0.9,
        ));
        assert!(added);
        assert_eq!(kg.relationships().len(), 1);
    }

    #[test]
    fn test_adjacency_covers_both_endpoints() {
        let mut kg = two_table_graph();
        kg.add_relationship(GraphRelationship::foreign_key(
            "orders", "customer_id", "customers", "id", 0.9,
        ));
        assert_eq!(kg.relationships_of("orders").len(), 1);
        assert_eq!(kg.relationships_of("customers").len(), 1);
        assert!(kg.relationships_of("nobody").is_empty());
    }

    #[test]
    fn test_alias_case_insensitive_dedup() {
        let mut kg = two_table_graph();
        kg.learn_alias("orders", "Purchases");
        kg.learn_alias("orders", "purchases");
        kg.learn_alias("orders", "PURCHASES");
        assert_eq!(kg.table_aliases().get("orders").unwrap().len(), 1);

        // unknown table: silently skipped
        kg.learn_alias("ghosts", "spooky");
        assert!(!kg.table_aliases().contains_key("ghosts"));
    }

    #[test]
    fn test_document_round_trip() {
        let mut kg = two_table_graph();
        kg.add_relationship(
            GraphRelationship::foreign_key("orders", "customer_id", "customers", "id", 0.85)
                .with_reasoning("FK naming pattern"),
        );
        kg.learn_alias("customers", "clients");

        let json = serde_json::to_string(&kg).unwrap();
        let restored: KnowledgeGraph = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.node_count(), 2);
        assert_eq!(restored.relationships().len(), 1);
        let rel = &restored.relationships()[0];
        assert_eq!(rel.source_column, "customer_id");
        assert_eq!(rel.target_column, "id");
        assert_eq!(
            restored.table_aliases().get("customers").unwrap(),
            &vec!["clients".to_string()]
        );
    }

    #[test]
    fn test_validate_document_reports_problems() {
        let doc = GraphDocument {
            nodes: vec![GraphNode::table("orders")],
            relationships: vec![
                GraphRelationship::foreign_key("orders", "customer_id", "ghosts", "id", 0.9),
                GraphRelationship::foreign_key("orders", "id", "orders", "id", 1.5),
            ],
            table_aliases: HashMap::new(),
        };

        let warnings = validate_document(&doc).unwrap();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("dangling"));
        assert!(warnings[1].contains("confidence out of range"));
    }
}
