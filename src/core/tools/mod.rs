pub mod appointments;
pub mod calendar;
pub mod contacts;
pub mod email;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::core::llm::ToolDefinition;

/// A named, schema-described capability the model may request. Implementors
/// parse their own arguments and return a JSON result for the follow-up
/// LLM call.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn parameters(&self) -> serde_json::Value;

    async fn execute(&self, user_id: &str, params: serde_json::Value)
    -> Result<serde_json::Value>;
}

/// Immutable catalog built once at startup and shared with the LLM call and
/// the dispatch path.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        info!("Registering tool: {}", tool.name());
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Render the catalog in the shape the chat-completion call expects.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
            })
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// An unknown name is a model/catalog mismatch, not a recoverable
    /// condition; it propagates as a hard error.
    pub async fn execute_tool(
        &self,
        name: &str,
        user_id: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Tool not found: {}", name))?;
        tool.execute(user_id, params).await
    }
}
