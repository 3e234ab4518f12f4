//! Reconciliation rule synthesis
//!
//! Produces confidence-scored column-matching rules between two schemas.
//! Candidates move through a small state machine: Detected, optionally
//! ScoredByExternal when an outside suggestion names the same column pair,
//! then Accepted or Rejected against the configured minimum confidence.
//! One bad candidate never aborts the ruleset.

use crate::alias::{normalize, token_overlap};
use crate::graph::KnowledgeGraph;
use crate::schema::SchemaCatalog;
use crate::sql_gen::SqlDialect;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use strsim::normalized_levenshtein;
use tracing::{debug, info, warn};

/// Base confidence for an exact normalized-name match.
const EXACT_BASE_CONFIDENCE: f64 = 0.75;

/// Base confidence for a near-name match; below the default acceptance
/// threshold on purpose, so fuzzy candidates need external corroboration.
const FUZZY_BASE_CONFIDENCE: f64 = 0.6;

/// Similarity floor for the fuzzy name fallback.
const FUZZY_NAME_CUTOFF: f64 = 0.8;

pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchType {
    Exact,
    Fuzzy,
    Semantic,
    Composite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CandidateState {
    Detected,
    ScoredByExternal,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationRule {
    pub rule_id: String,
    pub rule_name: String,
    pub source_table: String,
    pub source_columns: Vec<String>,
    pub target_table: String,
    pub target_columns: Vec<String>,
    pub match_type: MatchType,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub transformation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ruleset {
    pub ruleset_id: String,
    pub rules: Vec<ReconciliationRule>,
    pub source_schema: String,
    pub target_schema: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Externally supplied semantic suggestion (LLM-style collaborator output).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticSuggestion {
    pub source_table: String,
    pub source_column: String,
    pub target_table: String,
    pub target_column: String,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone)]
struct RuleCandidate {
    state: CandidateState,
    source_table: String,
    source_column: String,
    target_table: String,
    target_column: String,
    match_type: MatchType,
    confidence: f64,
    reasoning: String,
}

impl RuleCandidate {
    fn unordered_key(&self) -> (String, String) {
        let a = format!("{}.{}", self.source_table, self.source_column);
        let b = format!("{}.{}", self.target_table, self.target_column);
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }
}

/// The matched / unmatched-source / unmatched-target SQL for one rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSql {
    pub matched: String,
    pub unmatched_source: String,
    pub unmatched_target: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportQueryType {
    All,
    Matched,
}

pub struct RuleEngine {
    min_confidence: f64,
    dialect: SqlDialect,
    row_limit: u64,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            dialect: SqlDialect::Postgres,
            row_limit: 100,
        }
    }
}

impl RuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn with_dialect(mut self, dialect: SqlDialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_row_limit(mut self, row_limit: u64) -> Self {
        self.row_limit = row_limit;
        self
    }

    /// Generate a ruleset matching columns of `source` against `target`.
    ///
    /// The knowledge graph contributes relationships already detected across
    /// the two schemas; `suggestions` is the optional external collaborator
    /// payload. Output is deterministic up to the generated ids.
    pub fn generate_ruleset(
        &self,
        source_name: &str,
        source: &SchemaCatalog,
        target_name: &str,
        target: &SchemaCatalog,
        kg: &KnowledgeGraph,
        suggestions: &[SemanticSuggestion],
    ) -> Ruleset {
        let mut candidates = self.detect_candidates(source, target);

        // Knowledge-graph edges crossing the two schemas count as detected
        // candidates with the edge's own confidence. Edge direction is a
        // storage detail, so either orientation qualifies.
        for rel in kg.relationships() {
            if rel.relationship_type == "has_column" {
                continue;
            }
            let forward = source.get_table(&rel.source_id).is_some()
                && target.get_table(&rel.target_id).is_some();
            let reverse = source.get_table(&rel.target_id).is_some()
                && target.get_table(&rel.source_id).is_some();
            let (src_table, src_column, tgt_table, tgt_column) = if forward {
                (&rel.source_id, &rel.source_column, &rel.target_id, &rel.target_column)
            } else if reverse {
                (&rel.target_id, &rel.target_column, &rel.source_id, &rel.source_column)
            } else {
                continue;
            };
            candidates.push(RuleCandidate {
                state: CandidateState::Detected,
                source_table: src_table.clone(),
                source_column: src_column.clone(),
                target_table: tgt_table.clone(),
                target_column: tgt_column.clone(),
                match_type: MatchType::Composite,
                confidence: rel.confidence,
                reasoning: rel
                    .properties
                    .reasoning
                    .clone()
                    .unwrap_or_else(|| format!("knowledge graph {} edge", rel.relationship_type)),
            });
        }

        // Merge external semantic suggestions, preferring the
        // higher-confidence variant for an already-detected pair.
        for s in suggestions {
            if !(0.0..=1.0).contains(&s.confidence) {
                warn!(
                    "Ignoring external suggestion with confidence {}: {}.{} vs {}.{}",
                    s.confidence, s.source_table, s.source_column, s.target_table, s.target_column
                );
                continue;
            }
            let suggestion = RuleCandidate {
                state: CandidateState::ScoredByExternal,
                source_table: s.source_table.clone(),
                source_column: s.source_column.clone(),
                target_table: s.target_table.clone(),
                target_column: s.target_column.clone(),
                match_type: MatchType::Semantic,
                confidence: s.confidence,
                reasoning: s
                    .reasoning
                    .clone()
                    .unwrap_or_else(|| "external semantic suggestion".to_string()),
            };
            let key = suggestion.unordered_key();
            if let Some(pos) = candidates.iter().position(|c| c.unordered_key() == key) {
                let existing = &mut candidates[pos];
                existing.state = CandidateState::ScoredByExternal;
                if suggestion.confidence > existing.confidence {
                    existing.confidence = suggestion.confidence;
                    existing.match_type = MatchType::Semantic;
                }
                existing.reasoning =
                    format!("{}; {}", existing.reasoning, suggestion.reasoning);
            } else {
                candidates.push(suggestion);
            }
        }

        // Dedup on the unordered column pair, keeping max confidence and
        // concatenating reasonings.
        let mut by_pair: HashMap<(String, String), RuleCandidate> = HashMap::new();
        for candidate in candidates {
            match by_pair.entry(candidate.unordered_key()) {
                Entry::Vacant(slot) => {
                    slot.insert(candidate);
                }
                Entry::Occupied(mut slot) => {
                    let existing = slot.get_mut();
                    if !existing.reasoning.contains(&candidate.reasoning) {
                        existing.reasoning =
                            format!("{}; {}", existing.reasoning, candidate.reasoning);
                    }
                    if candidate.confidence > existing.confidence {
                        existing.confidence = candidate.confidence;
                        existing.match_type = candidate.match_type;
                        existing.state = candidate.state;
                    }
                }
            }
        }

        // Accept or reject; a candidate whose table metadata is missing is
        // skipped with a reason, never fatal.
        let mut rules: Vec<ReconciliationRule> = Vec::new();
        let mut sorted: Vec<RuleCandidate> = by_pair.into_values().collect();
        sorted.sort_by_key(|c| c.unordered_key());
        for mut candidate in sorted {
            if source.get_table(&candidate.source_table).is_none()
                || target.get_table(&candidate.target_table).is_none()
            {
                warn!(
                    "Skipping candidate {}.{} vs {}.{}: table metadata missing",
                    candidate.source_table,
                    candidate.source_column,
                    candidate.target_table,
                    candidate.target_column
                );
                continue;
            }

            // boundary inclusive: exactly-at-threshold confidence is kept
            if candidate.confidence >= self.min_confidence {
                candidate.state = CandidateState::Accepted;
            } else {
                candidate.state = CandidateState::Rejected;
                debug!(
                    "Dropping low-confidence candidate {}.{} vs {}.{} ({:.3} < {:.3})",
                    candidate.source_table,
                    candidate.source_column,
                    candidate.target_table,
                    candidate.target_column,
                    candidate.confidence,
                    self.min_confidence
                );
                continue;
            }

            let rule_name = format!(
                "{}_{}__{}_{}",
                candidate.source_table,
                candidate.source_column,
                candidate.target_table,
                candidate.target_column
            );
            rules.push(ReconciliationRule {
                rule_id: uuid::Uuid::new_v4().to_string(),
                rule_name,
                source_table: candidate.source_table,
                source_columns: vec![candidate.source_column],
                target_table: candidate.target_table,
                target_columns: vec![candidate.target_column],
                match_type: candidate.match_type,
                confidence: candidate.confidence,
                reasoning: candidate.reasoning,
                transformation: None,
            });
        }

        info!(
            "Ruleset {} vs {}: {} accepted rules",
            source_name,
            target_name,
            rules.len()
        );
        Ruleset {
            ruleset_id: uuid::Uuid::new_v4().to_string(),
            rules,
            source_schema: source_name.to_string(),
            target_schema: target_name.to_string(),
            created_at: chrono::Utc::now(),
        }
    }

    /// Name-based candidate generation across every cross-schema column pair.
    fn detect_candidates(
        &self,
        source: &SchemaCatalog,
        target: &SchemaCatalog,
    ) -> Vec<RuleCandidate> {
        let mut candidates = Vec::new();
        for (src_name, tgt_name) in source
            .table_names()
            .iter()
            .cartesian_product(target.table_names().iter())
        {
            let src = source.get_table(src_name).unwrap();
            let tgt = target.get_table(tgt_name).unwrap();
            for sc in &src.columns {
                for tc in &tgt.columns {
                    let sn = normalize(&sc.name);
                    let tn = normalize(&tc.name);
                    if sn == tn {
                        candidates.push(RuleCandidate {
                            state: CandidateState::Detected,
                            source_table: src.name.clone(),
                            source_column: sc.name.clone(),
                            target_table: tgt.name.clone(),
                            target_column: tc.name.clone(),
                            match_type: MatchType::Exact,
                            confidence: EXACT_BASE_CONFIDENCE,
                            reasoning: format!(
                                "column name '{}' matches '{}' after normalization",
                                sc.name, tc.name
                            ),
                        });
                        continue;
                    }

                    // fuzzy fallback: edit distance or token overlap
                    let similarity =
                        normalized_levenshtein(&sn, &tn).max(token_overlap(&sc.name, &tc.name));
                    if similarity >= FUZZY_NAME_CUTOFF {
                        candidates.push(RuleCandidate {
                            state: CandidateState::Detected,
                            source_table: src.name.clone(),
                            source_column: sc.name.clone(),
                            target_table: tgt.name.clone(),
                            target_column: tc.name.clone(),
                            match_type: MatchType::Fuzzy,
                            confidence: FUZZY_BASE_CONFIDENCE,
                            reasoning: format!(
                                "column name '{}' is near '{}' (similarity {:.2})",
                                sc.name, tc.name, similarity
                            ),
                        });
                    }
                }
            }
        }
        candidates
    }

    /// Render the three reconciliation statements for one rule.
    pub fn render_rule_sql(&self, rule: &ReconciliationRule) -> RuleSql {
        let d = &self.dialect;
        let src = d.quote(&rule.source_table);
        let tgt = d.quote(&rule.target_table);

        let on: String = rule
            .source_columns
            .iter()
            .zip(&rule.target_columns)
            .map(|(s, t)| format!("s.{} = t.{}", d.quote(s), d.quote(t)))
            .join(" AND ");

        let (top, limit) = if d.uses_top() {
            (format!("TOP {} ", self.row_limit), String::new())
        } else {
            (String::new(), format!(" LIMIT {}", self.row_limit))
        };

        let matched = format!(
            "SELECT {}s.*, t.* FROM {} s INNER JOIN {} t ON {}{}",
            top, src, tgt, on, limit
        );
        let unmatched_source = format!(
            "SELECT {}s.* FROM {} s WHERE NOT EXISTS (SELECT 1 FROM {} t WHERE {}){}",
            top, src, tgt, on, limit
        );
        let unmatched_target = format!(
            "SELECT {}t.* FROM {} t WHERE NOT EXISTS (SELECT 1 FROM {} s WHERE {}){}",
            top, tgt, src, on, limit
        );

        RuleSql {
            matched,
            unmatched_source,
            unmatched_target,
        }
    }

    /// Render a whole ruleset as executable SQL text.
    pub fn export_ruleset(&self, ruleset: &Ruleset, query_type: ExportQueryType) -> String {
        let mut blocks = Vec::new();
        for rule in &ruleset.rules {
            let sql = self.render_rule_sql(rule);
            let mut block = format!(
                "-- {} ({:?}, confidence {:.2})\n-- matched rows\n{};",
                rule.rule_name, rule.match_type, rule.confidence, sql.matched
            );
            if query_type == ExportQueryType::All {
                block.push_str(&format!(
                    "\n-- unmatched in {}\n{};\n-- unmatched in {}\n{};",
                    ruleset.source_schema, sql.unmatched_source, ruleset.target_schema, sql.unmatched_target
                ));
            }
            blocks.push(block);
        }
        blocks.join("\n\n")
    }
}
