//! End-to-end orchestration
//!
//! `QueryPipeline` wires the alias resolver, intent extractor, join path
//! resolver and SQL generator over one catalog and graph.
//! `ReconciliationPipeline` does the same for ruleset generation and export.

use crate::alias::{AliasConfig, AliasResolver};
use crate::error::Result;
use crate::graph::KnowledgeGraph;
use crate::graph_builder::{ExplicitPair, GraphBuilder};
use crate::intent::{IntentExtractor, QueryIntent};
use crate::join_path::JoinPathResolver;
use crate::llm::LlmClient;
use crate::rules::{ExportQueryType, RuleEngine, Ruleset, SemanticSuggestion};
use crate::schema::SchemaCatalog;
use crate::sql_gen::{ComparisonStyle, GeneratedSql, SqlDialect, SqlGenerator};
use tracing::warn;

#[derive(Default)]
pub struct GraphBuildOptions {
    pub explicit_pairs: Vec<ExplicitPair>,
    pub excluded_fields: Vec<String>,
    pub llm: Option<LlmClient>,
}

/// Build a knowledge graph for the named schemas in `catalog`.
pub async fn build_knowledge_graph(
    catalog: &SchemaCatalog,
    options: GraphBuildOptions,
) -> KnowledgeGraph {
    let mut builder = GraphBuilder::new(catalog.clone())
        .with_explicit_pairs(options.explicit_pairs)
        .with_excluded_fields(options.excluded_fields);
    if let Some(llm) = options.llm {
        builder = builder.with_llm(llm);
    }
    builder.build(&catalog.table_names()).await
}

pub struct QueryPipeline {
    catalog: SchemaCatalog,
    graph: KnowledgeGraph,
    extractor: IntentExtractor,
    generator: SqlGenerator,
}

impl QueryPipeline {
    pub fn new(catalog: SchemaCatalog, graph: KnowledgeGraph) -> Self {
        Self {
            catalog,
            graph,
            extractor: IntentExtractor::new(AliasResolver::new(AliasConfig::new())),
            generator: SqlGenerator::new(SqlDialect::Postgres),
        }
    }

    pub fn with_static_aliases(mut self, aliases: AliasConfig) -> Self {
        self.extractor = IntentExtractor::new(AliasResolver::new(aliases));
        self
    }

    pub fn with_reject_threshold(mut self, threshold: f64) -> Self {
        self.extractor = self.extractor.with_reject_threshold(threshold);
        self
    }

    pub fn with_dialect(mut self, dialect: SqlDialect) -> Self {
        self.generator = SqlGenerator::new(dialect);
        self
    }

    pub fn with_comparison_style(mut self, style: ComparisonStyle) -> Self {
        self.generator = self.generator.with_comparison_style(style);
        self
    }

    pub fn with_row_limit(mut self, limit: u64) -> Self {
        self.generator = self.generator.with_row_limit(limit);
        self
    }

    pub fn graph(&self) -> &KnowledgeGraph {
        &self.graph
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    /// Parse a natural-language query and annotate each requested column
    /// with its join path from the anchor table.
    pub fn parse_intent(&self, text: &str) -> QueryIntent {
        let mut intent = self.extractor.parse(text, &self.graph, &self.catalog);
        if let Some(anchor) = intent.source_table.clone() {
            for request in &mut intent.requested_columns {
                if request.source_table_hint.is_empty()
                    || request.source_table_hint == anchor
                {
                    continue;
                }
                match JoinPathResolver::find_path(&self.graph, &anchor, &request.source_table_hint)
                {
                    Ok(path) => request.join_path = path.tables(),
                    Err(e) => {
                        warn!(
                            "No join path from {} to {} for requested column {}: {}",
                            anchor, request.source_table_hint, request.column_name, e
                        );
                        request.satisfiable = false;
                    }
                }
            }
        }
        intent
    }

    /// Parse and generate in one step.
    pub fn generate_sql(&self, text: &str) -> Result<GeneratedSql> {
        let intent = self.parse_intent(text);
        self.generate_sql_for_intent(&intent)
    }

    pub fn generate_sql_for_intent(&self, intent: &QueryIntent) -> Result<GeneratedSql> {
        self.generator.generate(intent, &self.graph)
    }
}

pub struct ReconciliationPipeline {
    engine: RuleEngine,
}

impl ReconciliationPipeline {
    pub fn new(engine: RuleEngine) -> Self {
        Self { engine }
    }

    pub fn generate_ruleset(
        &self,
        source_name: &str,
        source: &SchemaCatalog,
        target_name: &str,
        target: &SchemaCatalog,
        kg: &KnowledgeGraph,
        suggestions: &[SemanticSuggestion],
    ) -> Ruleset {
        self.engine
            .generate_ruleset(source_name, source, target_name, target, kg, suggestions)
    }

    pub fn export_ruleset(&self, ruleset: &Ruleset, query_type: ExportQueryType) -> String {
        self.engine.export_ruleset(ruleset, query_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableSchema;

    async fn crm_pipeline() -> QueryPipeline {
        let catalog = SchemaCatalog::from_tables(vec![
            TableSchema::with_columns(
                "customers",
                &[("id", "bigint"), ("name", "varchar"), ("city", "varchar")],
            ),
            TableSchema::with_columns(
                "orders",
                &[("id", "bigint"), ("customer_id", "bigint"), ("total", "numeric")],
            ),
        ]);
        let graph = build_knowledge_graph(&catalog, GraphBuildOptions::default()).await;
        QueryPipeline::new(catalog, graph)
    }

    #[tokio::test]
    async fn test_end_to_end_comparison() {
        let pipeline = crm_pipeline().await;
        let result = pipeline
            .generate_sql("show customers not in orders")
            .unwrap();
        assert!(!result.degraded);
        assert!(result.sql.contains("\"customer_id\""));
    }

    #[tokio::test]
    async fn test_requested_column_gets_join_path() {
        let pipeline = crm_pipeline().await;
        let intent = pipeline.parse_intent("show orders, also show name from customers");
        let request = intent
            .requested_columns
            .iter()
            .find(|r| r.column_name == "name")
            .expect("name request");
        assert!(request.satisfiable);
        assert_eq!(
            request.join_path,
            vec!["orders".to_string(), "customers".to_string()]
        );
    }
}
