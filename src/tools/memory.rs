//! Tools exposing the long-term memory store to the model.

use std::sync::Arc;

use async_trait::async_trait;

use super::tool::{Tool, ToolContext, ToolResult};
use crate::error::Result;
use crate::memory::Memory;

/// Stores one fact under a key.
pub struct MemoryStoreTool {
    memory: Arc<dyn Memory>,
}

impl MemoryStoreTool {
    pub fn new(memory: Arc<dyn Memory>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for MemoryStoreTool {
    fn name(&self) -> &str {
        "memory_store"
    }

    fn description(&self) -> &str {
        "Store a fact in long-term memory under a key. Use stable, descriptive keys \
         (e.g. 'user.timezone') so the fact can be updated later."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "key": { "type": "string", "description": "Stable identifier for the fact" },
                "content": { "type": "string", "description": "The fact to remember" },
                "category": {
                    "type": "string",
                    "description": "Grouping: core, daily, or conversation",
                }
            },
            "required": ["key", "content"]
        })
    }

    async fn execute(&self, args: serde_json::Value, ctx: &ToolContext) -> Result<ToolResult> {
        let Some(key) = args["key"].as_str().filter(|k| !k.is_empty()) else {
            return Ok(ToolResult::error("key is required"));
        };
        let Some(content) = args["content"].as_str() else {
            return Ok(ToolResult::error("content is required"));
        };
        let category = args["category"].as_str().unwrap_or_default();
        let session = session_id(ctx);

        match self
            .memory
            .store(key, content, category, session.as_deref())
        {
            Ok(entry) => Ok(ToolResult::ok(format!("Stored memory '{}'", entry.key))),
            Err(err) => Ok(ToolResult::error(format!("failed to store memory: {err}"))),
        }
    }
}

/// Searches memory by relevance.
pub struct MemoryRecallTool {
    memory: Arc<dyn Memory>,
}

impl MemoryRecallTool {
    pub fn new(memory: Arc<dyn Memory>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for MemoryRecallTool {
    fn name(&self) -> &str {
        "memory_recall"
    }

    fn description(&self) -> &str {
        "Search long-term memory for facts relevant to a query. Returns the best \
         matches with their keys."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What to look for" },
                "limit": { "type": "integer", "description": "Maximum results (default 5)" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: serde_json::Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let Some(query) = args["query"].as_str().filter(|q| !q.is_empty()) else {
            return Ok(ToolResult::error("query is required"));
        };
        let limit = args["limit"].as_u64().unwrap_or(5) as usize;

        match self.memory.recall(query, limit, None) {
            Ok(entries) if entries.is_empty() => Ok(ToolResult::ok("No matching memories found")),
            Ok(entries) => {
                let lines: Vec<String> = entries
                    .iter()
                    .map(|e| format!("[{}] {}: {}", e.category, e.key, e.content))
                    .collect();
                Ok(ToolResult::ok(lines.join("\n")))
            }
            Err(err) => Ok(ToolResult::error(format!("failed to recall: {err}"))),
        }
    }
}

/// Deletes a memory entry by key.
pub struct MemoryForgetTool {
    memory: Arc<dyn Memory>,
}

impl MemoryForgetTool {
    pub fn new(memory: Arc<dyn Memory>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for MemoryForgetTool {
    fn name(&self) -> &str {
        "memory_forget"
    }

    fn description(&self) -> &str {
        "Delete a fact from long-term memory by its key."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "key": { "type": "string", "description": "Key of the fact to delete" }
            },
            "required": ["key"]
        })
    }

    async fn execute(&self, args: serde_json::Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let Some(key) = args["key"].as_str().filter(|k| !k.is_empty()) else {
            return Ok(ToolResult::error("key is required"));
        };
        match self.memory.forget(key) {
            Ok(true) => Ok(ToolResult::ok(format!("Forgot memory '{key}'"))),
            Ok(false) => Ok(ToolResult::ok(format!("No memory stored under '{key}'"))),
            Err(err) => Ok(ToolResult::error(format!("failed to forget: {err}"))),
        }
    }
}

fn session_id(ctx: &ToolContext) -> Option<String> {
    if ctx.channel.is_empty() || ctx.chat_id.is_empty() {
        None
    } else {
        Some(format!("{}:{}", ctx.channel, ctx.chat_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SqliteMemory;

    fn memory() -> Arc<dyn Memory> {
        Arc::new(SqliteMemory::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn store_recall_forget_cycle() {
        let memory = memory();
        let ctx = ToolContext::new("term", "1");

        let store = MemoryStoreTool::new(memory.clone());
        let result = store
            .execute(
                serde_json::json!({"key": "user.editor", "content": "helix"}),
                &ctx,
            )
            .await
            .unwrap();
        assert!(!result.is_error);

        let recall = MemoryRecallTool::new(memory.clone());
        let result = recall
            .execute(serde_json::json!({"query": "helix"}), &ctx)
            .await
            .unwrap();
        assert!(result.content.contains("user.editor"));

        let forget = MemoryForgetTool::new(memory.clone());
        let result = forget
            .execute(serde_json::json!({"key": "user.editor"}), &ctx)
            .await
            .unwrap();
        assert!(result.content.contains("Forgot"));

        let result = recall
            .execute(serde_json::json!({"query": "helix"}), &ctx)
            .await
            .unwrap();
        assert_eq!(result.content, "No matching memories found");
    }
}
