//! Join path discovery over the knowledge graph
//!
//! The graph is traversed as undirected, but each hop remembers which way it
//! crossed the stored edge so the real join columns end up on the correct
//! sides. Shortest path wins; among equal-length paths the one whose weakest
//! edge has the highest confidence is kept.

use crate::error::{EngineError, Result};
use crate::graph::{KnowledgeGraph, NodeType};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use tracing::debug;

/// One traversed edge, oriented in walk direction with its real join columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinHop {
    pub from_table: String,
    pub to_table: String,
    pub from_column: String,
    pub to_column: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JoinPath {
    pub hops: Vec<JoinHop>,
}

impl JoinPath {
    /// Ordered table ids along the path, anchor first.
    pub fn tables(&self) -> Vec<String> {
        let mut tables = Vec::new();
        for hop in &self.hops {
            if tables.is_empty() {
                tables.push(hop.from_table.clone());
            }
            tables.push(hop.to_table.clone());
        }
        tables
    }

    pub fn min_confidence(&self) -> f64 {
        self.hops
            .iter()
            .map(|h| h.confidence)
            .fold(f64::INFINITY, f64::min)
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }
}

pub struct JoinPathResolver;

impl JoinPathResolver {
    /// Find the best path from `anchor` to `target`.
    ///
    /// BFS over table nodes only. Join column relationships on column nodes
    /// (has_column and friends) never appear in a path. `anchor == target`
    /// yields an empty zero-hop path.
    pub fn find_path(kg: &KnowledgeGraph, anchor: &str, target: &str) -> Result<JoinPath> {
        if kg.get_node(anchor).is_none() {
            return Err(EngineError::Graph(format!("Unknown anchor table: {}", anchor)));
        }
        if kg.get_node(target).is_none() {
            return Err(EngineError::Graph(format!("Unknown target table: {}", target)));
        }
        if anchor == target {
            return Ok(JoinPath::default());
        }

        // Breadth-first relaxation keeping the best known path per node:
        // fewer hops wins, equal hops resolved by the higher minimum edge
        // confidence (strengthen the weakest link). A candidate revisiting a
        // node is always longer than that node's recorded best, so cycles
        // terminate without a separate visited set.
        let mut best_paths: std::collections::HashMap<String, JoinPath> =
            std::collections::HashMap::new();
        best_paths.insert(anchor.to_string(), JoinPath::default());

        let mut frontier: VecDeque<String> = VecDeque::new();
        frontier.push_back(anchor.to_string());
        let mut queued: HashSet<String> = HashSet::new();
        queued.insert(anchor.to_string());

        while let Some(current) = frontier.pop_front() {
            queued.remove(&current);
            let current_path = best_paths.get(&current).cloned().unwrap_or_default();

            for (_, rel) in kg.relationships_of(&current) {
                let hop = match orient(kg, rel, &current) {
                    Some(hop) => hop,
                    None => continue,
                };

                let mut hops = current_path.hops.clone();
                let next_table = hop.to_table.clone();
                hops.push(hop);
                let candidate = JoinPath { hops };

                let improved = match best_paths.get(&next_table) {
                    None => true,
                    Some(existing) => {
                        candidate.hops.len() < existing.hops.len()
                            || (candidate.hops.len() == existing.hops.len()
                                && candidate.min_confidence() > existing.min_confidence())
                    }
                };
                if improved {
                    best_paths.insert(next_table.clone(), candidate);
                    if queued.insert(next_table.clone()) {
                        frontier.push_back(next_table);
                    }
                }
            }
        }

        match best_paths.remove(target) {
            Some(path) => {
                debug!(
                    "Join path {} -> {}: {} hops, min confidence {:.2}",
                    anchor,
                    target,
                    path.hops.len(),
                    path.min_confidence()
                );
                Ok(path)
            }
            None => Err(EngineError::NoJoinPath {
                from: anchor.to_string(),
                to: target.to_string(),
            }),
        }
    }
}

/// Orient a stored relationship for a walk leaving `from`. Returns `None`
/// for non-join edges (column attachments) or edges not touching `from`.
fn orient(
    kg: &KnowledgeGraph,
    rel: &crate::graph::GraphRelationship,
    from: &str,
) -> Option<JoinHop> {
    if rel.relationship_type == "has_column" {
        return None;
    }
    let table = |id: &str| kg.get_node(id).map(|n| n.node_type == NodeType::Table) == Some(true);
    if !table(&rel.source_id) || !table(&rel.target_id) {
        return None;
    }
    if rel.source_column.is_empty() || rel.target_column.is_empty() {
        return None;
    }

    if rel.source_id == from {
        Some(JoinHop {
            from_table: rel.source_id.clone(),
            to_table: rel.target_id.clone(),
            from_column: rel.source_column.clone(),
            to_column: rel.target_column.clone(),
            confidence: rel.confidence,
        })
    } else if rel.target_id == from {
        // walking against the stored direction: swap column sides
        Some(JoinHop {
            from_table: rel.target_id.clone(),
            to_table: rel.source_id.clone(),
            from_column: rel.target_column.clone(),
            to_column: rel.source_column.clone(),
            confidence: rel.confidence,
        })
    } else {
        None
    }
}
