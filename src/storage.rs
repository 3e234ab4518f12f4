//! Graph persistence
//!
//! Serialized as the flat node/relationship document so a saved graph can be
//! inspected or edited by hand. Loading rebuilds the adjacency index and
//! drops dangling relationships the same way live construction does.

use crate::error::{EngineError, Result};
use crate::graph::{validate_document, GraphDocument, KnowledgeGraph};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub trait GraphStore {
    fn save(&self, name: &str, graph: &KnowledgeGraph) -> Result<()>;
    fn load(&self, name: &str) -> Result<KnowledgeGraph>;
    fn exists(&self, name: &str) -> bool;
}

/// One JSON file per named graph under a base directory.
pub struct FileGraphStore {
    base_dir: PathBuf,
}

impl FileGraphStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\', '.']) {
            return Err(EngineError::Storage(format!(
                "invalid graph name: {:?}",
                name
            )));
        }
        Ok(self.base_dir.join(format!("{}.json", name)))
    }
}

impl GraphStore for FileGraphStore {
    fn save(&self, name: &str, graph: &KnowledgeGraph) -> Result<()> {
        let path = self.path_for(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(graph)?;
        fs::write(&path, json)?;
        info!("Saved knowledge graph '{}' to {}", name, path.display());
        Ok(())
    }

    fn load(&self, name: &str) -> Result<KnowledgeGraph> {
        let path = self.path_for(name)?;
        if !path.exists() {
            return Err(EngineError::Storage(format!(
                "no stored graph named '{}' in {}",
                name,
                self.base_dir.display()
            )));
        }
        let graph = load_graph_file(&path)?;
        info!(
            "Loaded knowledge graph '{}' ({} nodes, {} relationships)",
            name,
            graph.node_count(),
            graph.relationships().len()
        );
        Ok(graph)
    }

    fn exists(&self, name: &str) -> bool {
        self.path_for(name).map(|p| p.exists()).unwrap_or(false)
    }
}

/// Load a graph document from an explicit path, reporting anything
/// suspicious in it before conversion drops the offending edges.
pub fn load_graph_file(path: &Path) -> Result<KnowledgeGraph> {
    let json = fs::read_to_string(path)?;
    let doc: GraphDocument = serde_json::from_str(&json)?;
    for warning in validate_document(&doc)? {
        warn!("{}: {}", path.display(), warning);
    }
    Ok(doc.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphNode, GraphRelationship};

    fn temp_store(tag: &str) -> FileGraphStore {
        let dir = std::env::temp_dir().join(format!(
            "schema_link_store_{}_{}",
            tag,
            std::process::id()
        ));
        FileGraphStore::new(dir)
    }

    fn sample_graph() -> KnowledgeGraph {
        let mut kg = KnowledgeGraph::new();
        kg.add_node(GraphNode::table("customers"));
        kg.add_node(GraphNode::table("orders"));
        kg.add_relationship(GraphRelationship::foreign_key(
            "orders",
            "customer_id",
            "customers",
            "id",
            0.8,
        ));
        kg.learn_alias("customers", "clients");
        kg
    }

    #[test]
    fn test_save_load_round_trip() {
        let store = temp_store("round_trip");
        let kg = sample_graph();
        assert_eq!(kg.relationships().len(), 1, "fixture edge must not dangle");
        store.save("crm", &kg).unwrap();

        let loaded = store.load("crm").unwrap();
        assert_eq!(loaded.node_count(), kg.node_count());
        assert_eq!(loaded.relationships().len(), 1);
        let rel = &loaded.relationships()[0];
        assert_eq!(rel.source_column, "customer_id");
        assert_eq!(rel.target_column, "id");
        assert_eq!(
            loaded.table_aliases().get("customers"),
            Some(&vec!["clients".to_string()])
        );
        // adjacency is rebuilt, not stored
        assert_eq!(loaded.relationships_of("orders").len(), 1);
    }

    #[test]
    fn test_load_missing_graph() {
        let store = temp_store("missing");
        let err = store.load("nope").unwrap_err();
        assert!(matches!(err, EngineError::Storage(_)));
    }

    #[test]
    fn test_load_drops_dangling_edges() {
        let dir = std::env::temp_dir().join(format!("schema_link_dangling_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("partial.json");
        fs::write(
            &path,
            r#"{
                "nodes": [{"id": "orders", "label": "orders", "type": "table"}],
                "relationships": [{
                    "source_id": "orders",
                    "target_id": "ghosts",
                    "relationship_type": "foreign_key",
                    "source_column": "customer_id",
                    "target_column": "id",
                    "confidence": 0.9
                }]
            }"#,
        )
        .unwrap();

        let graph = load_graph_file(&path).unwrap();
        assert_eq!(graph.node_count(), 1);
        assert!(graph.relationships().is_empty());
    }

    #[test]
    fn test_rejects_path_traversal_names() {
        let store = temp_store("names");
        assert!(store.save("../evil", &sample_graph()).is_err());
        assert!(store.save("a.b", &sample_graph()).is_err());
    }
}
