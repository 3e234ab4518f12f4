//! Dialect-aware SQL generation
//!
//! Renders a `QueryIntent` plus resolved join paths into SQL text. Join
//! predicates always use the real columns recorded on the traversed graph
//! relationships; the one permitted fallback (comparison against a table
//! with no known relationship) produces a placeholder join and flips
//! `degraded` so callers can refuse to run it.

use crate::error::{EngineError, Result};
use crate::graph::KnowledgeGraph;
use crate::intent::{Predicate, QueryIntent, QueryOperation};
use crate::join_path::{JoinHop, JoinPathResolver};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    Postgres,
    MySql,
    SqlServer,
    Sqlite,
}

impl SqlDialect {
    pub fn quote(&self, ident: &str) -> String {
        match self {
            SqlDialect::Postgres | SqlDialect::Sqlite => {
                format!("\"{}\"", ident.replace('"', "\"\""))
            }
            SqlDialect::MySql => format!("`{}`", ident.replace('`', "``")),
            SqlDialect::SqlServer => format!("[{}]", ident.replace(']', "]]")),
        }
    }

    pub fn quote_literal(&self, value: &str) -> String {
        // numbers pass through unquoted, everything else is escaped
        if value.parse::<f64>().is_ok() {
            value.to_string()
        } else {
            format!("'{}'", value.replace('\'', "''"))
        }
    }

    /// TOP goes right after SELECT; LIMIT trails the statement.
    pub(crate) fn uses_top(&self) -> bool {
        matches!(self, SqlDialect::SqlServer)
    }
}

/// Whether a COMPARISON renders as NOT EXISTS, NOT IN, or IN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonStyle {
    #[default]
    NotExists,
    NotIn,
    In,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedSql {
    pub sql: String,
    /// True when a placeholder join was emitted. Degraded SQL must not be
    /// executed without human confirmation.
    pub degraded: bool,
    pub warnings: Vec<String>,
}

pub struct SqlGenerator {
    dialect: SqlDialect,
    comparison_style: ComparisonStyle,
    row_limit: Option<u64>,
}

impl SqlGenerator {
    pub fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            comparison_style: ComparisonStyle::default(),
            row_limit: None,
        }
    }

    pub fn with_comparison_style(mut self, style: ComparisonStyle) -> Self {
        self.comparison_style = style;
        self
    }

    pub fn with_row_limit(mut self, limit: u64) -> Self {
        self.row_limit = Some(limit);
        self
    }

    pub fn generate(&self, intent: &QueryIntent, kg: &KnowledgeGraph) -> Result<GeneratedSql> {
        if let Some(reason) = &intent.failure_reason {
            return Err(EngineError::Intent(format!(
                "Refusing to generate SQL for rejected intent: {}",
                reason
            )));
        }
        let source = intent
            .source_table
            .as_deref()
            .ok_or_else(|| EngineError::Intent("Intent has no source table".to_string()))?;

        let mut warnings = Vec::new();
        let mut degraded = false;

        // Resolve join paths for requested columns up front, deduplicating
        // joins shared between requests.
        let mut aliases: HashMap<String, String> = HashMap::new();
        let source_alias = "t0".to_string();
        aliases.insert(source.to_string(), source_alias.clone());

        let mut join_clauses: Vec<String> = Vec::new();
        let mut joined_pairs: HashMap<(String, String), ()> = HashMap::new();
        let mut select_extras: Vec<String> = Vec::new();

        for request in &intent.requested_columns {
            let path = match JoinPathResolver::find_path(kg, source, &request.source_table_hint) {
                Ok(path) => path,
                Err(EngineError::NoJoinPath { from, to }) => {
                    warnings.push(format!(
                        "Column '{}' skipped: no join path from {} to {}",
                        request.column_name, from, to
                    ));
                    continue;
                }
                Err(e) => return Err(e),
            };

            for hop in &path.hops {
                self.add_join(
                    hop,
                    &mut aliases,
                    &mut join_clauses,
                    &mut joined_pairs,
                );
            }

            let table_alias = aliases
                .get(&request.source_table_hint)
                .cloned()
                .unwrap_or_else(|| source_alias.clone());
            select_extras.push(format!(
                "{}.{} AS {}",
                table_alias,
                self.dialect.quote(&request.column_name),
                self.dialect
                    .quote(&format!("{}_{}", request.source_table_hint, request.column_name))
            ));
        }

        let mut where_clauses: Vec<String> = intent
            .filters
            .iter()
            .map(|p| self.render_predicate(p, &source_alias))
            .collect();

        if intent.operation == QueryOperation::Comparison {
            let target = intent
                .target_table
                .as_deref()
                .ok_or_else(|| EngineError::Intent("Comparison intent has no target table".to_string()))?;
            let (clause, clause_degraded) = self.render_comparison(kg, source, &source_alias, target)?;
            if clause_degraded {
                degraded = true;
                warnings.push(format!(
                    "No known relationship between {} and {}; emitted placeholder join - do not execute without review",
                    source, target
                ));
            }
            where_clauses.push(clause);
        }

        // Select list: source.* plus one aliased column per satisfied
        // request. DISTINCT guards against join fan-out.
        let distinct = if join_clauses.is_empty() || intent.operation == QueryOperation::Aggregation
        {
            ""
        } else {
            "DISTINCT "
        };
        let top = match (self.dialect.uses_top(), self.row_limit) {
            (true, Some(n)) => format!("TOP {} ", n),
            _ => String::new(),
        };

        let select_list = match intent.operation {
            QueryOperation::Aggregation => {
                let agg = intent.aggregation.as_deref().unwrap_or("COUNT");
                match &intent.source_column {
                    Some(col) => format!("{}({}.{})", agg, source_alias, self.dialect.quote(col)),
                    None => format!("{}(*)", agg),
                }
            }
            _ => {
                let mut items = vec![format!("{}.*", source_alias)];
                items.extend(select_extras);
                items.join(", ")
            }
        };

        // T-SQL wants DISTINCT before TOP
        let mut sql = format!(
            "SELECT {}{}{} FROM {} {}",
            distinct,
            top,
            select_list,
            self.dialect.quote(source),
            source_alias
        );
        for join in &join_clauses {
            sql.push_str(&format!(" {}", join));
        }
        if !where_clauses.is_empty() {
            sql.push_str(&format!(" WHERE {}", where_clauses.join(" AND ")));
        }
        if let (false, Some(n)) = (self.dialect.uses_top(), self.row_limit) {
            sql.push_str(&format!(" LIMIT {}", n));
        }

        debug!("Generated SQL ({:?}): {}", self.dialect, sql);
        Ok(GeneratedSql {
            sql,
            degraded,
            warnings,
        })
    }

    /// Emit one LEFT JOIN per hop, reusing the existing join when another
    /// request already crossed the same (from, to) table pair.
    fn add_join(
        &self,
        hop: &JoinHop,
        aliases: &mut HashMap<String, String>,
        join_clauses: &mut Vec<String>,
        joined_pairs: &mut HashMap<(String, String), ()>,
    ) {
        let pair = (hop.from_table.clone(), hop.to_table.clone());
        if joined_pairs.contains_key(&pair) {
            return;
        }

        let from_alias = aliases
            .get(&hop.from_table)
            .cloned()
            .unwrap_or_else(|| "t0".to_string());
        let next_idx = aliases.len();
        let to_alias = aliases
            .entry(hop.to_table.clone())
            .or_insert_with(|| format!("t{}", next_idx))
            .clone();

        join_clauses.push(format!(
            "LEFT JOIN {} {} ON {}.{} = {}.{}",
            self.dialect.quote(&hop.to_table),
            to_alias,
            from_alias,
            self.dialect.quote(&hop.from_column),
            to_alias,
            self.dialect.quote(&hop.to_column),
        ));
        joined_pairs.insert(pair, ());
    }

    fn render_predicate(&self, p: &Predicate, source_alias: &str) -> String {
        format!(
            "{}.{} {} {}",
            source_alias,
            self.dialect.quote(&p.column),
            p.op.as_sql(),
            self.dialect.quote_literal(&p.value)
        )
    }

    /// Render the comparison clause. Returns (clause, degraded).
    fn render_comparison(
        &self,
        kg: &KnowledgeGraph,
        source: &str,
        source_alias: &str,
        target: &str,
    ) -> Result<(String, bool)> {
        let path = match JoinPathResolver::find_path(kg, source, target) {
            Ok(path) if !path.is_empty() => path,
            Ok(_) => {
                return Err(EngineError::SqlGeneration(
                    "Comparison source and target are the same table".to_string(),
                ))
            }
            Err(EngineError::NoJoinPath { .. }) => {
                // Last resort: placeholder identity join, flagged degraded.
                warn!(
                    "Falling back to placeholder join for {} vs {}",
                    source, target
                );
                let clause = format!(
                    "NOT EXISTS (SELECT 1 FROM {} x0 WHERE x0.{} = {}.{})",
                    self.dialect.quote(target),
                    self.dialect.quote("id"),
                    source_alias,
                    self.dialect.quote("id"),
                );
                return Ok((clause, true));
            }
            Err(e) => return Err(e),
        };

        let first = &path.hops[0];
        let clause = match (self.comparison_style, path.hops.len()) {
            (ComparisonStyle::NotIn, 1) => format!(
                "{}.{} NOT IN (SELECT x0.{} FROM {} x0)",
                source_alias,
                self.dialect.quote(&first.from_column),
                self.dialect.quote(&first.to_column),
                self.dialect.quote(&first.to_table),
            ),
            (ComparisonStyle::In, 1) => format!(
                "{}.{} IN (SELECT x0.{} FROM {} x0)",
                source_alias,
                self.dialect.quote(&first.from_column),
                self.dialect.quote(&first.to_column),
                self.dialect.quote(&first.to_table),
            ),
            _ => {
                // NOT EXISTS with the full hop chain joined inside the
                // subquery; also the fallback for multi-hop IN/NOT IN.
                let mut joins = String::new();
                let mut prev_alias = "x0".to_string();
                for (i, hop) in path.hops.iter().skip(1).enumerate() {
                    let alias = format!("x{}", i + 1);
                    joins.push_str(&format!(
                        " JOIN {} {} ON {}.{} = {}.{}",
                        self.dialect.quote(&hop.to_table),
                        alias,
                        prev_alias,
                        self.dialect.quote(&hop.from_column),
                        alias,
                        self.dialect.quote(&hop.to_column),
                    ));
                    prev_alias = alias;
                }
                let sub = format!(
                    "SELECT 1 FROM {} x0{} WHERE x0.{} = {}.{}",
                    self.dialect.quote(&first.to_table),
                    joins,
                    self.dialect.quote(&first.to_column),
                    source_alias,
                    self.dialect.quote(&first.from_column),
                );
                let keyword = if self.comparison_style == ComparisonStyle::In {
                    "EXISTS"
                } else {
                    "NOT EXISTS"
                };
                format!("{} ({})", keyword, sub)
            }
        };
        Ok((clause, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphNode, GraphRelationship};
    use crate::intent::{ColumnRequest, CompareOp};

    fn orders_customers_graph() -> KnowledgeGraph {
        let mut kg = KnowledgeGraph::new();
        kg.add_node(GraphNode::table("orders"));
        kg.add_node(GraphNode::table("customers"));
        kg.add_relationship(GraphRelationship::foreign_key(
            "orders", "customer_id", "customers", "id", 0.9,
        ));
        kg
    }

    fn comparison_intent(source: &str, target: &str) -> QueryIntent {
        QueryIntent {
            operation: QueryOperation::Comparison,
            source_table: Some(source.to_string()),
            target_table: Some(target.to_string()),
            source_column: None,
            target_column: None,
            filters: Vec::new(),
            requested_columns: Vec::new(),
            aggregation: None,
            confidence: 1.0,
            failure_reason: None,
        }
    }

    #[test]
    fn test_comparison_uses_real_columns() {
        let kg = orders_customers_graph();
        let generator = SqlGenerator::new(SqlDialect::Postgres);
        let result = generator
            .generate(&comparison_intent("customers", "orders"), &kg)
            .unwrap();

        assert!(!result.degraded);
        assert!(result.sql.contains(r#"x0."customer_id" = t0."id""#), "{}", result.sql);
        assert!(result.sql.contains("NOT EXISTS"));
        assert!(!result.sql.contains(r#""id" = x0."id""#));
    }

    #[test]
    fn test_missing_relationship_degrades() {
        let mut kg = KnowledgeGraph::new();
        kg.add_node(GraphNode::table("customers"));
        kg.add_node(GraphNode::table("orders"));
        // no relationship at all
        let generator = SqlGenerator::new(SqlDialect::Postgres);
        let result = generator
            .generate(&comparison_intent("customers", "orders"), &kg)
            .unwrap();

        assert!(result.degraded);
        assert!(!result.warnings.is_empty());
    }

    #[test]
    fn test_not_in_style() {
        let kg = orders_customers_graph();
        let generator =
            SqlGenerator::new(SqlDialect::Postgres).with_comparison_style(ComparisonStyle::NotIn);
        let result = generator
            .generate(&comparison_intent("customers", "orders"), &kg)
            .unwrap();
        assert!(result.sql.contains("NOT IN"), "{}", result.sql);
        assert!(result.sql.contains(r#"t0."id" NOT IN"#));
    }

    #[test]
    fn test_column_request_joins_with_real_columns() {
        let kg = orders_customers_graph();
        let mut intent = comparison_intent("orders", "customers");
        intent.operation = QueryOperation::SimpleSelect;
        intent.target_table = None;
        intent.requested_columns.push(ColumnRequest {
            column_name: "name".to_string(),
            source_table_hint: "customers".to_string(),
            join_path: Vec::new(),
            aggregation: None,
            satisfiable: true,
        });

        let generator = SqlGenerator::new(SqlDialect::Postgres);
        let result = generator.generate(&intent, &kg).unwrap();

        assert!(result.sql.starts_with("SELECT DISTINCT"));
        assert!(
            result
                .sql
                .contains(r#"LEFT JOIN "customers" t1 ON t0."customer_id" = t1."id""#),
            "{}",
            result.sql
        );
        assert!(result.sql.contains(r#"t1."name" AS "customers_name""#));
    }

    #[test]
    fn test_sqlserver_distinct_precedes_top() {
        let kg = orders_customers_graph();
        let mut intent = comparison_intent("orders", "customers");
        intent.operation = QueryOperation::SimpleSelect;
        intent.target_table = None;
        intent.requested_columns.push(ColumnRequest {
            column_name: "name".to_string(),
            source_table_hint: "customers".to_string(),
            join_path: Vec::new(),
            aggregation: None,
            satisfiable: true,
        });

        let generator = SqlGenerator::new(SqlDialect::SqlServer).with_row_limit(50);
        let result = generator.generate(&intent, &kg).unwrap();
        assert!(
            result.sql.starts_with("SELECT DISTINCT TOP 50 "),
            "{}",
            result.sql
        );
        assert!(!result.sql.contains("TOP 50 DISTINCT"));
    }

    #[test]
    fn test_duplicate_requests_share_one_join() {
        let kg = orders_customers_graph();
        let mut intent = comparison_intent("orders", "customers");
        intent.operation = QueryOperation::SimpleSelect;
        intent.target_table = None;
        for col in ["name", "city"] {
            intent.requested_columns.push(ColumnRequest {
                column_name: col.to_string(),
                source_table_hint: "customers".to_string(),
                join_path: Vec::new(),
                aggregation: None,
                satisfiable: true,
            });
        }

        let generator = SqlGenerator::new(SqlDialect::Postgres);
        let result = generator.generate(&intent, &kg).unwrap();
        assert_eq!(result.sql.matches("LEFT JOIN").count(), 1, "{}", result.sql);
    }

    #[test]
    fn test_unreachable_request_warns_but_proceeds() {
        let mut kg = orders_customers_graph();
        kg.add_node(GraphNode::table("island"));
        let mut intent = comparison_intent("orders", "customers");
        intent.operation = QueryOperation::SimpleSelect;
        intent.target_table = None;
        intent.requested_columns.push(ColumnRequest {
            column_name: "thing".to_string(),
            source_table_hint: "island".to_string(),
            join_path: Vec::new(),
            aggregation: None,
            satisfiable: true,
        });

        let generator = SqlGenerator::new(SqlDialect::Postgres);
        let result = generator.generate(&intent, &kg).unwrap();
        assert!(!result.degraded);
        assert_eq!(result.warnings.len(), 1);
        assert!(!result.sql.contains("island"));
    }

    #[test]
    fn test_filter_and_limit_by_dialect() {
        let kg = orders_customers_graph();
        let mut intent = comparison_intent("orders", "customers");
        intent.operation = QueryOperation::Filter;
        intent.target_table = None;
        intent.filters.push(Predicate {
            column: "total".to_string(),
            op: CompareOp::Gt,
            value: "100".to_string(),
        });

        let pg = SqlGenerator::new(SqlDialect::Postgres)
            .with_row_limit(50)
            .generate(&intent, &kg)
            .unwrap();
        assert!(pg.sql.contains(r#"t0."total" > 100"#), "{}", pg.sql);
        assert!(pg.sql.ends_with("LIMIT 50"));

        let mssql = SqlGenerator::new(SqlDialect::SqlServer)
            .with_row_limit(50)
            .generate(&intent, &kg)
            .unwrap();
        assert!(mssql.sql.starts_with("SELECT TOP 50"), "{}", mssql.sql);
        assert!(mssql.sql.contains("[total] > 100"));
        assert!(!mssql.sql.contains("LIMIT"));
    }

    #[test]
    fn test_aggregation_sql() {
        let kg = orders_customers_graph();
        let mut intent = comparison_intent("orders", "customers");
        intent.operation = QueryOperation::Aggregation;
        intent.target_table = None;
        intent.aggregation = Some("SUM".to_string());
        intent.source_column = Some("total".to_string());

        let result = SqlGenerator::new(SqlDialect::Postgres)
            .generate(&intent, &kg)
            .unwrap();
        assert!(result.sql.contains(r#"SUM(t0."total")"#), "{}", result.sql);
    }

    #[test]
    fn test_mysql_quoting() {
        let kg = orders_customers_graph();
        let result = SqlGenerator::new(SqlDialect::MySql)
            .generate(&comparison_intent("customers", "orders"), &kg)
            .unwrap();
        assert!(result.sql.contains("`orders`"), "{}", result.sql);
    }

    #[test]
    fn test_rejected_intent_refused() {
        let kg = orders_customers_graph();
        let mut intent = comparison_intent("customers", "orders");
        intent.failure_reason = Some("UNRESOLVED_SOURCE_TABLE".to_string());
        let err = SqlGenerator::new(SqlDialect::Postgres)
            .generate(&intent, &kg)
            .unwrap_err();
        assert!(matches!(err, EngineError::Intent(_)));
    }
}
