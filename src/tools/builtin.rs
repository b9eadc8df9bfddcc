//! Built-in tools: shell, file access, think, and direct messaging.

use async_trait::async_trait;

use super::tool::{Approval, Tool, ToolContext, ToolResult};
use crate::bus::OutboundMessage;
use crate::error::Result;

fn string_arg<'a>(args: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

/// Reject paths that climb out of the working tree.
fn check_path(path: &str) -> std::result::Result<std::path::PathBuf, ToolResult> {
    let cleaned = std::path::Path::new(path).to_path_buf();
    if cleaned
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(ToolResult::error("path traversal not allowed"));
    }
    Ok(cleaned)
}

/// Runs a command line through the user's shell.
pub struct ShellTool;

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Runs arbitrary commands like using a terminal. The command line should be single \
         line if possible. Strings collected from stdout and stderr will be returned as \
         the tool's output."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "cmdline": {
                    "type": "string",
                    "description": "The command line to run"
                }
            },
            "required": ["cmdline"]
        })
    }

    fn make_approval(&self, args: &serde_json::Value) -> Option<Approval> {
        let cmdline = string_arg(args, "cmdline")?;
        Some(Approval::new("Agent wants to run the command", cmdline))
    }

    async fn execute(&self, args: serde_json::Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let Some(cmdline) = string_arg(&args, "cmdline") else {
            return Ok(ToolResult::error("cmdline is required"));
        };

        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
        let output = tokio::process::Command::new(shell)
            .arg("-c")
            .arg(cmdline)
            .output()
            .await?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            Ok(ToolResult::ok(combined))
        } else {
            Ok(ToolResult::error(format!(
                "{combined}\nError: exit status {}",
                output.status.code().unwrap_or(-1)
            )))
        }
    }
}

/// Reads a file's contents.
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "The path to the file to read" }
            },
            "required": ["path"]
        })
    }

    fn make_approval(&self, args: &serde_json::Value) -> Option<Approval> {
        let path = string_arg(args, "path")?;
        Some(Approval::new(
            "Agent wants to read a file",
            format!("Read: {path}"),
        ))
    }

    async fn execute(&self, args: serde_json::Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let Some(path) = string_arg(&args, "path") else {
            return Ok(ToolResult::error("path is required"));
        };
        let path = match check_path(path) {
            Ok(p) => p,
            Err(result) => return Ok(result),
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(ToolResult::ok(content)),
            Err(err) => Ok(ToolResult::error(format!("failed to read file: {err}"))),
        }
    }
}

/// Writes content to a file, creating parent directories.
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating it (and parent directories) if needed"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "The path to the file to write" },
                "content": { "type": "string", "description": "The content to write" }
            },
            "required": ["path", "content"]
        })
    }

    fn make_approval(&self, args: &serde_json::Value) -> Option<Approval> {
        let path = string_arg(args, "path")?;
        Some(Approval::new(
            "Agent wants to write a file",
            format!("Write: {path}"),
        ))
    }

    async fn execute(&self, args: serde_json::Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let Some(path) = string_arg(&args, "path") else {
            return Ok(ToolResult::error("path is required"));
        };
        let Some(content) = string_arg(&args, "content") else {
            return Ok(ToolResult::error("content is required"));
        };
        let path = match check_path(path) {
            Ok(p) => p,
            Err(result) => return Ok(result),
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                return Ok(ToolResult::error(format!(
                    "failed to create directories: {err}"
                )));
            }
        }
        match tokio::fs::write(&path, content).await {
            Ok(()) => Ok(ToolResult::ok(format!(
                "wrote {} bytes to {}",
                content.len(),
                path.display()
            ))),
            Err(err) => Ok(ToolResult::error(format!("failed to write file: {err}"))),
        }
    }
}

/// Lists directory entries, one per line.
pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List the files in a directory"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "The directory to list" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: serde_json::Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let Some(path) = string_arg(&args, "path") else {
            return Ok(ToolResult::error("path is required"));
        };
        let mut dir = match tokio::fs::read_dir(path).await {
            Ok(dir) => dir,
            Err(err) => return Ok(ToolResult::error(format!("failed to list files: {err}"))),
        };
        let mut names = Vec::new();
        loop {
            match dir.next_entry().await {
                Ok(Some(entry)) => {
                    let mut name = entry.file_name().to_string_lossy().into_owned();
                    if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                        name.push('/');
                    }
                    names.push(name);
                }
                Ok(None) => break,
                Err(err) => {
                    return Ok(ToolResult::error(format!("failed to list files: {err}")))
                }
            }
        }
        names.sort();
        Ok(ToolResult::ok(names.join("\n")))
    }
}

/// Records internal reasoning without user-visible effect.
pub struct ThinkTool;

#[async_trait]
impl Tool for ThinkTool {
    fn name(&self) -> &str {
        "think"
    }

    fn description(&self) -> &str {
        "Use this tool to think through complex problems step by step. Your thought \
         process will be recorded but not shown to the user. This helps you organize \
         your reasoning before taking action."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "thought": {
                    "type": "string",
                    "description": "Your internal reasoning and thought process"
                }
            },
            "required": ["thought"]
        })
    }

    async fn execute(&self, args: serde_json::Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let Some(thought) = string_arg(&args, "thought") else {
            return Ok(ToolResult::error("thought is required"));
        };
        Ok(ToolResult::ok(format!("Thought recorded: {thought}")))
    }
}

/// Sends a message to the current chat immediately, via the outbound queue.
pub struct MessageTool;

#[async_trait]
impl Tool for MessageTool {
    fn name(&self) -> &str {
        "message"
    }

    fn description(&self) -> &str {
        "Send a message to the user. Use this to communicate information, ask questions, \
         or provide updates. The message will be sent immediately to the current chat."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "The message content to send to the user"
                }
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, args: serde_json::Value, ctx: &ToolContext) -> Result<ToolResult> {
        let Some(content) = string_arg(&args, "content").filter(|c| !c.is_empty()) else {
            return Ok(ToolResult::error("content is required"));
        };
        let Some(bus) = &ctx.bus else {
            return Ok(ToolResult::error(
                "message tool not configured with channel context",
            ));
        };
        if ctx.channel.is_empty() || ctx.chat_id.is_empty() {
            return Ok(ToolResult::error(
                "message tool not configured with channel context",
            ));
        }
        bus.publish_outbound(OutboundMessage {
            channel: ctx.channel.clone(),
            chat_id: ctx.chat_id.clone(),
            content: content.to_string(),
            media: Vec::new(),
        })
        .await?;
        Ok(ToolResult::ok("Message sent to user"))
    }
}
