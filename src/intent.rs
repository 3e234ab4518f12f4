//! Natural-language intent extraction
//!
//! Parses a free-text data request into a structured `QueryIntent`:
//! operation classification by keyword signal, table mentions resolved
//! through the alias resolver, column mentions resolved against the table's
//! known schema. The extractor never guesses - an unresolvable source table
//! yields confidence 0.0 with an explicit reason.

use crate::alias::{normalize, AliasResolution, AliasResolver};
use crate::graph::KnowledgeGraph;
use crate::schema::SchemaCatalog;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const UNRESOLVED_SOURCE_TABLE: &str = "UNRESOLVED_SOURCE_TABLE";

/// Default confidence below which an intent is rejected instead of executed.
pub const DEFAULT_REJECT_THRESHOLD: f64 = 0.4;

lazy_static! {
    static ref COMPARISON_RE: Regex =
        Regex::new(r"(?i)\b(not in|missing from|but not in|with no match in)\b").unwrap();
    static ref AGGREGATION_RE: Regex =
        Regex::new(r"(?i)\b(count|sum|total|average|avg|minimum|maximum|min|max)\b").unwrap();
    static ref AGG_TARGET_RE: Regex = Regex::new(
        r"(?i)\b(count|sum|total|average|avg|minimum|maximum|min|max)\s+(?:of\s+|the\s+)*([a-z0-9_]+)"
    )
    .unwrap();
    static ref ALSO_SHOW_RE: Regex = Regex::new(
        r"(?i)(?:also show|also include|including)\s+([a-z0-9_ ]+?)\s+from\s+([a-z0-9_]+)"
    )
    .unwrap();
    static ref FILTER_RE: Regex = Regex::new(
        r"(?i)\b(?:where|with|having)\s+([a-z0-9_]+)\s*(>=|<=|!=|=|>|<|above|over|below|under|at least|at most|equal to)\s*'?([a-z0-9_@ .:-]+?)'?(?:\s|$|,)"
    )
    .unwrap();
    static ref LEAD_VERBS_RE: Regex = Regex::new(
        r"(?i)^(?:please\s+)?(?:show me|show|list|find|get|give me|which|what|display|all)\s+"
    )
    .unwrap();
    static ref FROM_RE: Regex = Regex::new(r"(?i)\bfrom\s+([a-z0-9_ ]+)").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryOperation {
    Comparison,
    Filter,
    Aggregation,
    SimpleSelect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token.to_lowercase().as_str() {
            "=" | "equal to" => Some(CompareOp::Eq),
            "!=" => Some(CompareOp::Ne),
            ">" | "above" | "over" => Some(CompareOp::Gt),
            ">=" | "at least" => Some(CompareOp::Gte),
            "<" | "below" | "under" => Some(CompareOp::Lt),
            "<=" | "at most" => Some(CompareOp::Lte),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub column: String,
    pub op: CompareOp,
    pub value: String,
}

/// A requested extra column, possibly from another table reached via joins.
/// `join_path` is left empty here and filled by the join path resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnRequest {
    pub column_name: String,
    pub source_table_hint: String,
    #[serde(default)]
    pub join_path: Vec<String>,
    #[serde(default)]
    pub aggregation: Option<String>,
    /// Cleared by the join path resolver when no path connects the tables.
    #[serde(default = "default_true")]
    pub satisfiable: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryIntent {
    pub operation: QueryOperation,
    pub source_table: Option<String>,
    pub target_table: Option<String>,
    pub source_column: Option<String>,
    pub target_column: Option<String>,
    pub filters: Vec<Predicate>,
    pub requested_columns: Vec<ColumnRequest>,
    /// Aggregate function (COUNT/SUM/AVG/MIN/MAX) for Aggregation intents.
    pub aggregation: Option<String>,
    pub confidence: f64,
    /// Set when the intent must be rejected (e.g. UNRESOLVED_SOURCE_TABLE).
    pub failure_reason: Option<String>,
}

impl QueryIntent {
    fn unresolved(operation: QueryOperation, reason: &str) -> Self {
        Self {
            operation,
            source_table: None,
            target_table: None,
            source_column: None,
            target_column: None,
            filters: Vec::new(),
            requested_columns: Vec::new(),
            aggregation: None,
            confidence: 0.0,
            failure_reason: Some(reason.to_string()),
        }
    }
}

pub struct IntentExtractor {
    resolver: AliasResolver,
    reject_threshold: f64,
}

impl IntentExtractor {
    pub fn new(resolver: AliasResolver) -> Self {
        Self {
            resolver,
            reject_threshold: DEFAULT_REJECT_THRESHOLD,
        }
    }

    pub fn with_reject_threshold(mut self, threshold: f64) -> Self {
        self.reject_threshold = threshold;
        self
    }

    pub fn reject_threshold(&self) -> f64 {
        self.reject_threshold
    }

    /// Parse a natural-language request into a structured intent.
    pub fn parse(&self, text: &str, kg: &KnowledgeGraph, catalog: &SchemaCatalog) -> QueryIntent {
        let mut working = text.to_string();

        // Pull out "also show X from Y" requests first so their table
        // mentions don't confuse source-table resolution.
        let mut extra_requests: Vec<(String, String)> = Vec::new();
        for cap in ALSO_SHOW_RE.captures_iter(text) {
            extra_requests.push((cap[1].trim().to_string(), cap[2].trim().to_string()));
        }
        working = ALSO_SHOW_RE.replace_all(&working, " ").to_string();

        // Filters next, same reason.
        let mut filters = Vec::new();
        let filter_snapshot = working.clone();
        for cap in FILTER_RE.captures_iter(&filter_snapshot) {
            if let Some(op) = CompareOp::from_token(&cap[2]) {
                filters.push(Predicate {
                    column: cap[1].to_string(),
                    op,
                    value: cap[3].trim().to_string(),
                });
            }
        }
        working = FILTER_RE.replace_all(&working, " ").to_string();

        // Operation classification by keyword signal.
        let comparison = COMPARISON_RE.find(&working).map(|m| m.range());
        let aggregation = comparison.is_none() && AGGREGATION_RE.is_match(&working);
        let (operation, op_certainty) = if comparison.is_some() {
            (QueryOperation::Comparison, 1.0)
        } else if aggregation {
            (QueryOperation::Aggregation, 1.0)
        } else if !filters.is_empty() {
            (QueryOperation::Filter, 1.0)
        } else {
            (QueryOperation::SimpleSelect, 0.6)
        };

        // Table resolution.
        let (source_res, target_res) = match &comparison {
            Some(range) => {
                let left = &working[..range.start];
                let right = &working[range.end..];
                (
                    self.best_table_mention(left, kg),
                    self.best_table_mention(right, kg),
                )
            }
            None => (self.best_table_mention(&working, kg), None),
        };

        let source_table = match source_res.as_ref().and_then(|r| r.table_id()) {
            Some(id) => id.to_string(),
            None => {
                debug!("Source table unresolved for query: {}", text);
                return QueryIntent::unresolved(operation, UNRESOLVED_SOURCE_TABLE);
            }
        };
        let target_table = target_res
            .as_ref()
            .and_then(|r| r.table_id())
            .map(|s| s.to_string());

        let mut table_score = resolution_score(&source_res);
        if operation == QueryOperation::Comparison {
            table_score = (table_score + resolution_score(&target_res)) / 2.0;
        }

        // Column resolution for aggregation targets and extra requests.
        let mut column_attempts = 0usize;
        let mut column_hits = 0usize;

        let mut source_column = None;
        let mut aggregation_fn = None;
        if operation == QueryOperation::Aggregation {
            if let Some(cap) = AGG_TARGET_RE.captures(&working) {
                aggregation_fn = Some(normalize_agg(&cap[1]));
                let mention = cap[2].to_string();
                // "count" alone is fine without a column target
                if mention != "rows" && mention != "records" {
                    column_attempts += 1;
                    if let Some(col) = resolve_column(&mention, &source_table, catalog) {
                        source_column = Some(col);
                        column_hits += 1;
                    }
                }
            } else {
                aggregation_fn = Some("COUNT".to_string());
            }
        }

        // Validate filter columns against the source table.
        let mut resolved_filters = Vec::new();
        for f in filters {
            column_attempts += 1;
            match resolve_column(&f.column, &source_table, catalog) {
                Some(col) => {
                    column_hits += 1;
                    resolved_filters.push(Predicate { column: col, ..f });
                }
                None => debug!(
                    "Dropping filter on unknown column '{}' of {}",
                    f.column, source_table
                ),
            }
        }

        let mut requested_columns = Vec::new();
        for (col_mention, table_mention) in extra_requests {
            column_attempts += 1;
            let hint = match self.resolver.resolve(&table_mention, kg) {
                AliasResolution::Resolved { table_id, .. } => table_id,
                AliasResolution::Unresolved => {
                    debug!("Unresolved table hint '{}' in extra request", table_mention);
                    continue;
                }
            };
            match resolve_column(&col_mention, &hint, catalog) {
                Some(col) => {
                    column_hits += 1;
                    requested_columns.push(ColumnRequest {
                        column_name: col,
                        source_table_hint: hint,
                        join_path: Vec::new(),
                        aggregation: None,
                        satisfiable: true,
                    });
                }
                None => debug!("Unresolved column '{}' on {}", col_mention, hint),
            }
        }

        let column_score = if column_attempts == 0 {
            1.0
        } else {
            column_hits as f64 / column_attempts as f64
        };

        let confidence = ((table_score + column_score + op_certainty) / 3.0).clamp(0.0, 1.0);
        let failure_reason = if confidence < self.reject_threshold {
            Some(format!("confidence {:.2} below threshold", confidence))
        } else {
            None
        };

        QueryIntent {
            operation,
            source_table: Some(source_table),
            target_table,
            source_column,
            target_column: None,
            filters: resolved_filters,
            requested_columns,
            aggregation: aggregation_fn,
            confidence,
            failure_reason,
        }
    }

    /// Scan candidate phrases in a text fragment and return the best table
    /// resolution. Prefers an explicit "from <mention>" phrase, then tries
    /// sliding 1-3 token windows.
    fn best_table_mention(&self, fragment: &str, kg: &KnowledgeGraph) -> Option<AliasResolution> {
        let stripped = LEAD_VERBS_RE.replace(fragment.trim(), "").to_string();

        if let Some(cap) = FROM_RE.captures(&stripped) {
            let res = self.resolver.resolve(cap[1].trim(), kg);
            if res != AliasResolution::Unresolved {
                return Some(res);
            }
        }

        let words: Vec<String> = normalize(&stripped)
            .split(' ')
            .filter(|w| !w.is_empty())
            .map(String::from)
            .collect();

        let mut best: Option<(f64, AliasResolution)> = None;
        for size in (1..=3.min(words.len())).rev() {
            for window in words.windows(size) {
                let phrase = window.join(" ");
                if let AliasResolution::Resolved { table_id, score } =
                    self.resolver.resolve(&phrase, kg)
                {
                    let better = best.as_ref().map_or(true, |(s, _)| score > *s);
                    if better {
                        best = Some((score, AliasResolution::Resolved { table_id, score }));
                    }
                }
            }
        }
        best.map(|(_, res)| res)
    }
}

fn resolution_score(res: &Option<AliasResolution>) -> f64 {
    match res {
        Some(AliasResolution::Resolved { score, .. }) => *score,
        _ => 0.0,
    }
}

fn normalize_agg(token: &str) -> String {
    match token.to_lowercase().as_str() {
        "count" => "COUNT",
        "sum" | "total" => "SUM",
        "average" | "avg" => "AVG",
        "minimum" | "min" => "MIN",
        "maximum" | "max" => "MAX",
        _ => "COUNT",
    }
    .to_string()
}

/// Resolve a column mention against a table's known columns: exact match
/// first, then normalized-token equality ("customer name" -> customer_name).
pub fn resolve_column(mention: &str, table: &str, catalog: &SchemaCatalog) -> Option<String> {
    let table_schema = catalog.get_table(table)?;
    if let Some(col) = table_schema
        .columns
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(mention.trim()))
    {
        return Some(col.name.clone());
    }
    let needle = normalize(mention);
    table_schema
        .columns
        .iter()
        .find(|c| normalize(&c.name) == needle)
        .map(|c| c.name.clone())
}
