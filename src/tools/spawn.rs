//! Tool for fanning work out to parallel subagents.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::tool::{Approval, Tool, ToolContext, ToolResult};
use crate::error::Result;
use crate::subagent::{SubagentManager, SubagentTask};

const RESULT_PREVIEW: usize = 300;

/// Runs a batch of independent tasks concurrently and reports a combined
/// summary back to the model.
pub struct SpawnTool {
    manager: Arc<SubagentManager>,
    cancel: CancellationToken,
}

impl SpawnTool {
    pub fn new(manager: Arc<SubagentManager>, cancel: CancellationToken) -> Self {
        Self { manager, cancel }
    }
}

#[async_trait]
impl Tool for SpawnTool {
    fn name(&self) -> &str {
        "spawn_subagents"
    }

    fn description(&self) -> &str {
        "Run multiple independent tasks in parallel. Each task gets its own \
         isolated agent with tool access. Use this for work that can be split \
         into parts with no shared state."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "tasks": {
                    "type": "array",
                    "description": "Tasks to run in parallel",
                    "items": {
                        "type": "object",
                        "properties": {
                            "task": {
                                "type": "string",
                                "description": "What this subagent should do"
                            },
                            "label": {
                                "type": "string",
                                "description": "Short name used in the report"
                            }
                        },
                        "required": ["task"]
                    }
                }
            },
            "required": ["tasks"]
        })
    }

    fn make_approval(&self, args: &serde_json::Value) -> Option<Approval> {
        let count = args["tasks"].as_array().map(|t| t.len()).unwrap_or(0);
        let noun = if count == 1 { "task" } else { "tasks" };
        Some(Approval {
            justification: format!("Spawn {count} parallel {noun}"),
            what: args["tasks"]
                .as_array()
                .map(|tasks| {
                    tasks
                        .iter()
                        .filter_map(|t| t["task"].as_str())
                        .collect::<Vec<_>>()
                        .join("; ")
                })
                .unwrap_or_default(),
        })
    }

    async fn execute(&self, args: serde_json::Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let tasks: Vec<SubagentTask> = match serde_json::from_value(args["tasks"].clone()) {
            Ok(tasks) => tasks,
            Err(err) => return Ok(ToolResult::error(format!("invalid tasks: {err}"))),
        };
        if tasks.is_empty() {
            return Ok(ToolResult::error("tasks must not be empty"));
        }

        let count = tasks.len();
        let results = self.manager.spawn(&self.cancel, tasks).await;

        let mut report = format!("Spawned {count} subagent(s) in parallel:\n");
        for result in &results {
            let glyph = if result.is_error { "❌" } else { "✅" };
            report.push_str(&format!(
                "\n{glyph} [{}] ({} iteration(s)): {}",
                result.label,
                result.iterations,
                preview(&result.content),
            ));
        }

        // Partial failures still carry useful results; only a total loss is
        // flagged as an error.
        let all_failed = !results.is_empty() && results.iter().all(|r| r.is_error);
        Ok(ToolResult {
            content: report,
            is_error: all_failed,
        })
    }
}

fn preview(content: &str) -> &str {
    let content = content.trim();
    match content.char_indices().nth(RESULT_PREVIEW) {
        Some((idx, _)) => &content[..idx],
        None => content,
    }
}
