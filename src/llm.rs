//! LLM suggestion collaborator
//!
//! Optional external service that proposes semantic relationships between
//! tables. Called synchronously under a bounded timeout; any transport
//! failure or malformed response is treated as "no suggestions" so the
//! pattern-based pipeline keeps going without it.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// A relationship proposed by the external collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipSuggestion {
    pub target_table: String,
    pub target_column: String,
    pub source_column: String,
    pub relationship_type: String,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: Option<String>,
}

pub struct LlmClient {
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl LlmClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Ask for relationship suggestions for one table.
    ///
    /// Never bubbles transport or parse errors: a failed or garbled call
    /// returns an empty list. No retries - one bounded attempt.
    pub async fn suggest_relationships(
        &self,
        table_name: &str,
        schema_context: &str,
    ) -> Vec<RelationshipSuggestion> {
        let prompt = format!(
            r#"You are a database schema analyst. Given the table "{}" and the
schema context below, propose join relationships from this table to other
tables. Return ONLY a JSON array, no other text:

[
  {{
    "target_table": "customers",
    "target_column": "id",
    "source_column": "customer_id",
    "relationship_type": "foreign_key",
    "confidence": 0.9,
    "reasoning": "customer_id references customers.id"
  }}
]

Schema context:
{}

Only return the JSON array."#,
            table_name, schema_context
        );

        match self.call_llm(&prompt).await {
            Ok(response) => match parse_suggestions(&response) {
                Ok(suggestions) => suggestions,
                Err(e) => {
                    warn!("Malformed suggestion response for {}: {}", table_name, e);
                    Vec::new()
                }
            },
            Err(e) => {
                warn!("Suggestion call failed for {}: {}", table_name, e);
                Vec::new()
            }
        }
    }

    async fn call_llm(&self, prompt: &str) -> Result<String> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| EngineError::Llm(format!("Failed to build HTTP client: {}", e)))?;

        let body = serde_json::json!({
            "model": "gpt-4",
            "messages": [
                {"role": "system", "content": "You are a precise JSON-only responder. Always return valid JSON, no other text."},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.1,
            "max_tokens": 1000
        });

        let response = client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Llm(format!("LLM API call failed: {}", e)))?;

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| EngineError::Llm("No content in LLM response".to_string()))?;

        Ok(content.to_string())
    }
}

/// Parse a suggestion payload, discarding entries with out-of-range
/// confidence. An empty array is a valid "no suggestions" answer.
pub fn parse_suggestions(payload: &str) -> Result<Vec<RelationshipSuggestion>> {
    let suggestions: Vec<RelationshipSuggestion> = serde_json::from_str(payload.trim())?;
    Ok(suggestions
        .into_iter()
        .filter(|s| {
            if (0.0..=1.0).contains(&s.confidence) {
                true
            } else {
                warn!(
                    "Dropping suggestion {} -> {} with confidence {}",
                    s.source_column, s.target_table, s.confidence
                );
                false
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_suggestions() {
        let payload = r#"[
            {"target_table": "customers", "target_column": "id",
             "source_column": "customer_id", "relationship_type": "foreign_key",
             "confidence": 0.9, "reasoning": "fk"}
        ]"#;
        let suggestions = parse_suggestions(payload).unwrap();
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].target_table, "customers");
    }

    #[test]
    fn test_out_of_range_confidence_dropped() {
        let payload = r#"[
            {"target_table": "a", "target_column": "id", "source_column": "a_id",
             "relationship_type": "foreign_key", "confidence": 1.7}
        ]"#;
        assert!(parse_suggestions(payload).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_payload_is_error() {
        assert!(parse_suggestions("not json").is_err());
        assert!(parse_suggestions(r#"{"oops": true}"#).is_err());
    }
}
