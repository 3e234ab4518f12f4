//! Table alias resolution
//!
//! Maps free-text table mentions to canonical table ids. Static aliases are
//! injected at construction; learned aliases live on the knowledge graph and
//! are merged at call time. Resolution is a pure lookup - when nothing
//! clears the fuzzy cutoff the caller gets `Unresolved`, never a guess.

use crate::graph::KnowledgeGraph;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strsim::jaro_winkler;

/// Minimum token-overlap similarity for a fuzzy alias match.
const FUZZY_CUTOFF: f64 = 0.6;

/// Per-token similarity above which two tokens are considered the same word.
const TOKEN_MATCH_CUTOFF: f64 = 0.9;

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Outcome of a table-mention lookup.
///
/// Callers must treat `Unresolved` as a hard stop for that mention, not
/// default to an arbitrary table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AliasResolution {
    Resolved { table_id: String, score: f64 },
    Unresolved,
}

impl AliasResolution {
    pub fn table_id(&self) -> Option<&str> {
        match self {
            AliasResolution::Resolved { table_id, .. } => Some(table_id),
            AliasResolution::Unresolved => None,
        }
    }
}

/// Static business-alias configuration, injected rather than hardcoded so
/// deployments can ship their own vocabulary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AliasConfig {
    /// table id -> alias texts
    pub aliases: HashMap<String, Vec<String>>,
}

impl AliasConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alias(mut self, table_id: &str, alias: &str) -> Self {
        self.aliases
            .entry(table_id.to_string())
            .or_default()
            .push(alias.to_string());
        self
    }
}

pub struct AliasResolver {
    static_aliases: AliasConfig,
}

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize(text: &str) -> String {
    let lowered: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    WHITESPACE.replace_all(lowered.trim(), " ").to_string()
}

fn tokens(text: &str) -> Vec<String> {
    normalize(text)
        .split(' ')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Token-overlap similarity between two phrases. Tokens count as shared when
/// equal or near-equal under Jaro-Winkler (handles light misspellings).
pub fn token_overlap(a: &str, b: &str) -> f64 {
    let tokens_a = tokens(a);
    let tokens_b = tokens(b);
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let mut used = vec![false; tokens_b.len()];
    let mut shared = 0usize;
    for ta in &tokens_a {
        for (i, tb) in tokens_b.iter().enumerate() {
            if used[i] {
                continue;
            }
            if ta == tb || jaro_winkler(ta, tb) >= TOKEN_MATCH_CUTOFF {
                used[i] = true;
                shared += 1;
                break;
            }
        }
    }

    let union = tokens_a.len() + tokens_b.len() - shared;
    shared as f64 / union as f64
}

impl AliasResolver {
    pub fn new(static_aliases: AliasConfig) -> Self {
        Self { static_aliases }
    }

    /// Resolve a free-text mention to a table id.
    ///
    /// Priority order: exact table id, learned alias, static alias, then
    /// fuzzy token overlap over everything with similarity >= 0.6 (ties
    /// broken by longer alias text). Learned aliases shadow static ones for
    /// identical alias text.
    pub fn resolve(&self, text: &str, kg: &KnowledgeGraph) -> AliasResolution {
        let needle = normalize(text);
        if needle.is_empty() {
            return AliasResolution::Unresolved;
        }

        // 1. Exact table id
        for table_id in kg.table_ids() {
            if normalize(&table_id) == needle {
                return AliasResolution::Resolved {
                    table_id,
                    score: 1.0,
                };
            }
        }

        // 2. Learned alias exact match
        for (table_id, aliases) in kg.table_aliases() {
            if aliases.iter().any(|a| normalize(a) == needle) {
                return AliasResolution::Resolved {
                    table_id: table_id.clone(),
                    score: 1.0,
                };
            }
        }

        // 3. Static alias exact match
        for (table_id, aliases) in &self.static_aliases.aliases {
            if aliases.iter().any(|a| normalize(a) == needle) {
                return AliasResolution::Resolved {
                    table_id: table_id.clone(),
                    score: 1.0,
                };
            }
        }

        // 4. Fuzzy token-overlap over table ids plus all aliases
        let mut best: Option<(f64, usize, String)> = None;
        let mut consider = |candidate: &str, table_id: &str| {
            let score = token_overlap(text, candidate);
            if score < FUZZY_CUTOFF {
                return;
            }
            let len = candidate.len();
            let better = match &best {
                None => true,
                Some((s, l, _)) => score > *s || (score == *s && len > *l),
            };
            if better {
                best = Some((score, len, table_id.to_string()));
            }
        };

        for table_id in kg.table_ids() {
            consider(&table_id, &table_id);
        }
        for (table_id, aliases) in kg.table_aliases() {
            for alias in aliases {
                consider(alias, table_id);
            }
        }
        for (table_id, aliases) in &self.static_aliases.aliases {
            for alias in aliases {
                consider(alias, table_id);
            }
        }

        match best {
            Some((score, _, table_id)) => AliasResolution::Resolved { table_id, score },
            None => AliasResolution::Unresolved,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphNode;

    fn graph_with(tables: &[&str]) -> KnowledgeGraph {
        let mut kg = KnowledgeGraph::new();
        for t in tables {
            kg.add_node(GraphNode::table(*t));
        }
        kg
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Order-Items!! "), "order items");
        assert_eq!(normalize("design_code_master"), "design code master");
    }

    #[test]
    fn test_exact_id_wins() {
        let kg = graph_with(&["orders", "customers"]);
        let resolver = AliasResolver::new(AliasConfig::new());
        assert_eq!(
            resolver.resolve("Orders", &kg).table_id(),
            Some("orders")
        );
    }

    #[test]
    fn test_learned_overrides_static() {
        let mut kg = graph_with(&["orders", "customers"]);
        kg.learn_alias("customers", "accounts");
        let resolver =
            AliasResolver::new(AliasConfig::new().with_alias("orders", "accounts"));
        // Same alias text known both ways: the learned one wins.
        assert_eq!(
            resolver.resolve("accounts", &kg).table_id(),
            Some("customers")
        );
    }

    #[test]
    fn test_fuzzy_cutoff_respected() {
        let kg = graph_with(&["design_code_master"]);
        let resolver = AliasResolver::new(AliasConfig::new());
        assert_eq!(
            resolver.resolve("design code", &kg).table_id(),
            Some("design_code_master")
        );
        assert_eq!(resolver.resolve("inventory", &kg), AliasResolution::Unresolved);
    }

    #[test]
    fn test_idempotent_for_unchanged_graph() {
        let mut kg = graph_with(&["orders", "order_items"]);
        kg.learn_alias("orders", "sales");
        let resolver = AliasResolver::new(AliasConfig::new());
        let first = resolver.resolve("sales", &kg);
        let second = resolver.resolve("sales", &kg);
        assert_eq!(first, second);
    }
}
