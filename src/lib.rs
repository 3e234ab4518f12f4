//! Knowledge-graph-guided SQL generation and schema reconciliation.
//!
//! The crate builds a knowledge graph over database schemas, parses
//! natural-language queries into structured intents, resolves join paths
//! through the graph, and renders dialect-aware SQL. A separate rule engine
//! consumes the same graph to produce column-matching reconciliation rules.

pub mod alias;
pub mod error;
pub mod graph;
pub mod graph_builder;
pub mod intent;
pub mod join_path;
pub mod llm;
pub mod pipeline;
pub mod rules;
pub mod schema;
pub mod sql_gen;
pub mod storage;

pub use error::{EngineError, Result};
pub use graph::KnowledgeGraph;
pub use pipeline::{build_knowledge_graph, QueryPipeline, ReconciliationPipeline};
