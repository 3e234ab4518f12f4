//! Knowledge graph construction
//!
//! Builds a `KnowledgeGraph` from schema definitions using naming-pattern
//! detection, explicit user-provided pairs, and optional LLM suggestions.
//! Detection is noisy by design - everything funnels through
//! `KnowledgeGraph::add_relationship`, which drops what it can't validate.

use crate::graph::{GraphNode, GraphRelationship, KnowledgeGraph};
use crate::llm::LlmClient;
use crate::schema::{SchemaCatalog, TableSchema};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Confidence attached to a `{table}_id` foreign-key naming match.
const FK_PATTERN_CONFIDENCE: f64 = 0.8;

/// Confidence attached to a shared non-generic column name of the same type.
const SHARED_NAME_CONFIDENCE: f64 = 0.5;

/// Column names too generic to treat as join evidence on their own.
const GENERIC_COLUMNS: &[&str] = &["id", "name", "type", "status", "created_at", "updated_at"];

/// A join pair supplied directly by the user; always trusted at confidence 1.0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplicitPair {
    pub source_table: String,
    pub source_column: String,
    pub target_table: String,
    pub target_column: String,
}

pub struct GraphBuilder {
    catalog: SchemaCatalog,
    explicit_pairs: Vec<ExplicitPair>,
    excluded_fields: HashSet<String>,
    llm: Option<LlmClient>,
}

impl GraphBuilder {
    pub fn new(catalog: SchemaCatalog) -> Self {
        Self {
            catalog,
            explicit_pairs: Vec::new(),
            excluded_fields: HashSet::new(),
            llm: None,
        }
    }

    pub fn with_explicit_pairs(mut self, pairs: Vec<ExplicitPair>) -> Self {
        self.explicit_pairs = pairs;
        self
    }

    /// Columns that must never participate in detected relationships
    /// (audit fields, soft-delete flags, tenant discriminators).
    pub fn with_excluded_fields(mut self, fields: Vec<String>) -> Self {
        self.excluded_fields = fields.into_iter().map(|f| f.to_lowercase()).collect();
        self
    }

    pub fn with_llm(mut self, llm: LlmClient) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Build the knowledge graph for the named schemas.
    pub async fn build(&self, schema_names: &[String]) -> KnowledgeGraph {
        let mut kg = KnowledgeGraph::new();

        let tables: Vec<&TableSchema> = schema_names
            .iter()
            .filter_map(|name| {
                let found = self.catalog.get_table(name);
                if found.is_none() {
                    warn!("Schema '{}' not in catalog, skipping", name);
                }
                found
            })
            .collect();

        // Nodes first: tables, then their columns.
        for table in &tables {
            kg.add_node(GraphNode::table(&table.name));
            for column in &table.columns {
                let mut node = GraphNode::column(&table.name, &column.name);
                node.properties.insert(
                    "data_type".to_string(),
                    serde_json::Value::String(column.data_type.clone()),
                );
                kg.add_node(node);
                kg.add_relationship(GraphRelationship {
                    source_id: table.name.clone(),
                    target_id: format!("{}.{}", table.name, column.name),
                    relationship_type: "has_column".to_string(),
                    source_column: column.name.clone(),
                    target_column: column.name.clone(),
                    confidence: 1.0,
                    properties: Default::default(),
                });
            }
        }

        // Pattern-detected joins over every table pair.
        let mut detected: Vec<GraphRelationship> = Vec::new();
        for (left, right) in tables.iter().tuple_combinations() {
            detected.extend(self.detect_between(left, right));
        }

        // Explicit user pairs: trusted, can also repair what detection missed.
        for pair in &self.explicit_pairs {
            detected.push(
                GraphRelationship::foreign_key(
                    &pair.source_table,
                    &pair.source_column,
                    &pair.target_table,
                    &pair.target_column,
                    1.0,
                )
                .with_reasoning("explicit user-provided pair"),
            );
        }

        // Optional LLM suggestions, one bounded call per table.
        if let Some(llm) = &self.llm {
            let context = self.schema_context(&tables);
            for table in &tables {
                let suggestions = llm.suggest_relationships(&table.name, &context).await;
                debug!("{} suggestions for {}", suggestions.len(), table.name);
                for s in suggestions {
                    let mut rel = GraphRelationship::foreign_key(
                        &table.name,
                        &s.source_column,
                        &s.target_table,
                        &s.target_column,
                        s.confidence,
                    );
                    rel.relationship_type = s.relationship_type;
                    rel.properties.reasoning = s.reasoning;
                    detected.push(rel);
                }
            }
        }

        // Dedup on the unordered column pair, keeping max confidence.
        let mut by_pair: HashMap<(String, String), GraphRelationship> = HashMap::new();
        for rel in detected {
            let key = rel.unordered_key();
            match by_pair.get(&key) {
                Some(existing) if existing.confidence >= rel.confidence => {}
                _ => {
                    by_pair.insert(key, rel);
                }
            }
        }

        let mut rels: Vec<GraphRelationship> = by_pair.into_values().collect();
        rels.sort_by(|a, b| a.unordered_key().cmp(&b.unordered_key()));
        let mut added = 0usize;
        for rel in rels {
            if kg.add_relationship(rel) {
                added += 1;
            }
        }

        info!(
            "Built knowledge graph: {} nodes, {} join relationships across {} tables",
            kg.node_count(),
            added,
            tables.len()
        );
        kg
    }

    fn is_excluded(&self, column: &str) -> bool {
        self.excluded_fields.contains(&column.to_lowercase())
    }

    /// Naming-pattern detection between one pair of tables.
    fn detect_between(&self, left: &TableSchema, right: &TableSchema) -> Vec<GraphRelationship> {
        let mut rels = Vec::new();

        // FK pattern in both directions: {parent}_id in the child table
        // pointing at the parent primary key.
        if let Some(rel) = self.check_fk_pattern(left, right) {
            rels.push(rel);
        }
        if let Some(rel) = self.check_fk_pattern(right, left) {
            rels.push(rel);
        }

        // Shared non-generic column name with matching type.
        if rels.is_empty() {
            for lc in &left.columns {
                if self.is_excluded(&lc.name) {
                    continue;
                }
                let lower = lc.name.to_lowercase();
                if GENERIC_COLUMNS.contains(&lower.as_str()) {
                    continue;
                }
                if let Some(rc) = right
                    .columns
                    .iter()
                    .find(|rc| rc.name.eq_ignore_ascii_case(&lc.name) && rc.data_type == lc.data_type)
                {
                    rels.push(
                        GraphRelationship::foreign_key(
                            &left.name,
                            &lc.name,
                            &right.name,
                            &rc.name,
                            SHARED_NAME_CONFIDENCE,
                        )
                        .with_reasoning(format!(
                            "both tables carry column '{}' of type {}",
                            lc.name, lc.data_type
                        )),
                    );
                }
            }
        }

        rels
    }

    /// `{parent}_id` in the child matching the parent's `id` (or
    /// `{parent}_id`) primary key column.
    fn check_fk_pattern(
        &self,
        child: &TableSchema,
        parent: &TableSchema,
    ) -> Option<GraphRelationship> {
        let fk_name = format!("{}_id", singular(&parent.name));
        let child_fk = child
            .columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(&fk_name))?;
        if self.is_excluded(&child_fk.name) {
            return None;
        }

        let parent_pk = parent.columns.iter().find(|c| {
            let lower = c.name.to_lowercase();
            lower == "id" || lower == fk_name
        })?;

        if parent_pk.data_type != child_fk.data_type {
            return None;
        }

        Some(
            GraphRelationship::foreign_key(
                &child.name,
                &child_fk.name,
                &parent.name,
                &parent_pk.name,
                FK_PATTERN_CONFIDENCE,
            )
            .with_reasoning(format!(
                "{}.{} matches {} primary key {}",
                child.name, child_fk.name, parent.name, parent_pk.name
            )),
        )
    }

    fn schema_context(&self, tables: &[&TableSchema]) -> String {
        tables
            .iter()
            .map(|t| {
                let cols = t
                    .columns
                    .iter()
                    .map(|c| format!("{} {}", c.name, c.data_type))
                    .join(", ");
                format!("{}({})", t.name, cols)
            })
            .join("\n")
    }
}

/// Crude singularization covering the common plural table-name convention.
fn singular(name: &str) -> String {
    let lower = name.to_lowercase();
    if let Some(stem) = lower.strip_suffix("ies") {
        format!("{}y", stem)
    } else if lower.ends_with("ses") || lower.ends_with("xes") {
        lower[..lower.len() - 2].to_string()
    } else if let Some(stem) = lower.strip_suffix('s') {
        stem.to_string()
    } else {
        lower
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableSchema;

    fn orders_customers_catalog() -> SchemaCatalog {
        SchemaCatalog::from_tables(vec![
            TableSchema::with_columns(
                "orders",
                &[("id", "bigint"), ("customer_id", "bigint"), ("total", "numeric")],
            ),
            TableSchema::with_columns(
                "customers",
                &[("id", "bigint"), ("name", "varchar")],
            ),
        ])
    }

    fn join_rels(kg: &KnowledgeGraph) -> Vec<&GraphRelationship> {
        kg.relationships()
            .iter()
            .filter(|r| r.relationship_type != "has_column")
            .collect()
    }

    #[tokio::test]
    async fn test_fk_pattern_detection() {
        let builder = GraphBuilder::new(orders_customers_catalog());
        let kg = builder
            .build(&["orders".to_string(), "customers".to_string()])
            .await;

        let joins = join_rels(&kg);
        assert_eq!(joins.len(), 1);
        let rel = joins[0];
        assert_eq!(rel.source_id, "orders");
        assert_eq!(rel.source_column, "customer_id");
        assert_eq!(rel.target_id, "customers");
        assert_eq!(rel.target_column, "id");
        assert!((rel.confidence - FK_PATTERN_CONFIDENCE).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_excluded_fields_respected() {
        let builder = GraphBuilder::new(orders_customers_catalog())
            .with_excluded_fields(vec!["customer_id".to_string()]);
        let kg = builder
            .build(&["orders".to_string(), "customers".to_string()])
            .await;
        assert!(join_rels(&kg).is_empty());
    }

    #[tokio::test]
    async fn test_explicit_pair_outranks_detection() {
        let builder = GraphBuilder::new(orders_customers_catalog()).with_explicit_pairs(vec![
            ExplicitPair {
                source_table: "orders".to_string(),
                source_column: "customer_id".to_string(),
                target_table: "customers".to_string(),
                target_column: "id".to_string(),
            },
        ]);
        let kg = builder
            .build(&["orders".to_string(), "customers".to_string()])
            .await;

        let joins = join_rels(&kg);
        assert_eq!(joins.len(), 1);
        assert!((joins[0].confidence - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_shared_name_skips_generic_columns() {
        let catalog = SchemaCatalog::from_tables(vec![
            TableSchema::with_columns("a", &[("id", "bigint"), ("region_code", "varchar")]),
            TableSchema::with_columns("b", &[("id", "bigint"), ("region_code", "varchar")]),
        ]);
        let builder = GraphBuilder::new(catalog);
        let kg = builder.build(&["a".to_string(), "b".to_string()]).await;

        let joins = join_rels(&kg);
        assert_eq!(joins.len(), 1);
        assert_eq!(joins[0].source_column, "region_code");
        // never a bare id=id edge from name sharing
        assert!(joins.iter().all(|r| r.source_column != "id"));
    }

    #[test]
    fn test_singular() {
        assert_eq!(singular("customers"), "customer");
        assert_eq!(singular("categories"), "category");
        assert_eq!(singular("status"), "statu"); // naive, acceptable for _id probing
    }
}
