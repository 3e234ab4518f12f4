use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Graph error: {0}")]
    Graph(String),

    #[error("Unresolved table mention: {0}")]
    UnresolvedTable(String),

    #[error("Unresolved column '{column}' on table '{table}'")]
    UnresolvedColumn { table: String, column: String },

    #[error("No join path between '{from}' and '{to}'")]
    NoJoinPath { from: String, to: String },

    #[error("Intent error: {0}")]
    Intent(String),

    #[error("SQL generation error: {0}")]
    SqlGeneration(String),

    #[error("Rule engine error: {0}")]
    Rules(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
