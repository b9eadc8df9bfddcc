//! Bounded, concurrent mini agent loops for fan-out work.

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::provider::{ChatRequest, FinishReason, ModelProvider, ResponseEvent};
use crate::tools::{ToolContext, ToolRegistry};
use crate::types::{ChatMessage, ToolCall};

/// Default iteration cap for one subagent loop.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

const SUBAGENT_SYSTEM_PROMPT: &str = "You are a subagent tasked with completing a specific task.
Complete the task independently and report a clear, concise result.
You have access to tools - use them as needed.
After completing the task, provide a summary of what was done.";

/// One isolated unit of work.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SubagentTask {
    pub task: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// Outcome of one subagent run; immutable once produced.
#[derive(Debug, Clone)]
pub struct SubagentResult {
    pub label: String,
    pub content: String,
    pub is_error: bool,
    pub iterations: u32,
}

/// Runs independent bounded agent loops concurrently and joins their results.
pub struct SubagentManager {
    provider: Arc<dyn ModelProvider>,
    model: String,
    tools: Arc<ToolRegistry>,
    max_iterations: u32,
}

impl SubagentManager {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        model: impl Into<String>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            tools,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Run every task concurrently under one cancellable scope and return
    /// results in task order. A failing task never cancels its siblings;
    /// cancelling `scope` propagates to all in-flight units.
    pub async fn spawn(
        self: &Arc<Self>,
        scope: &CancellationToken,
        tasks: Vec<SubagentTask>,
    ) -> Vec<SubagentResult> {
        let shared = scope.child_token();
        let mut join_set = JoinSet::new();

        for (index, task) in tasks.into_iter().enumerate() {
            let label = task
                .label
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| format!("task-{}", index + 1));
            let manager = Arc::clone(self);
            let token = shared.clone();
            join_set.spawn(async move {
                let result = manager.run_task(&token, &task.task, &label).await;
                (index, result)
            });
        }

        let mut results: Vec<Option<SubagentResult>> = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => {
                    if results.len() <= index {
                        results.resize_with(index + 1, || None);
                    }
                    results[index] = Some(result);
                }
                Err(err) => warn!(error = %err, "subagent task panicked"),
            }
        }

        results.into_iter().flatten().collect()
    }

    /// One bounded mini-loop with an isolated history. No stream events are
    /// published; the caller only sees the final result.
    pub async fn run_task(
        &self,
        scope: &CancellationToken,
        task: &str,
        label: &str,
    ) -> SubagentResult {
        let mut messages = vec![
            ChatMessage::system(SUBAGENT_SYSTEM_PROMPT),
            ChatMessage::user(task),
        ];

        let error_result = |content: String, iterations: u32| SubagentResult {
            label: label.to_string(),
            content,
            is_error: true,
            iterations,
        };

        let mut iteration = 0u32;
        while iteration < self.max_iterations {
            iteration += 1;
            debug!(label, iteration, "subagent iteration");

            let request = ChatRequest {
                model: self.model.clone(),
                messages: messages.clone(),
                tools: self.tools.definitions(),
                max_tokens: None,
            };

            let stream = tokio::select! {
                _ = scope.cancelled() => return error_result("cancelled".to_string(), iteration),
                stream = self.provider.send_stream(&request) => match stream {
                    Ok(stream) => stream,
                    Err(err) => return error_result(format!("Error: {err}"), iteration),
                },
            };

            let mut text = String::new();
            let mut tool_calls: Vec<ToolCall> = Vec::new();
            let mut finish = FinishReason::Stop;

            futures::pin_mut!(stream);
            loop {
                let event = tokio::select! {
                    _ = scope.cancelled() => {
                        return error_result("cancelled".to_string(), iteration)
                    }
                    event = stream.next() => event,
                };
                match event {
                    Some(Ok(ResponseEvent::TextDelta(delta))) => text.push_str(&delta),
                    Some(Ok(ResponseEvent::ToolCall(call))) => tool_calls.push(call),
                    Some(Ok(ResponseEvent::Finish(reason))) => finish = reason,
                    Some(Err(err)) => return error_result(format!("Error: {err}"), iteration),
                    None => break,
                }
            }

            messages.push(ChatMessage::assistant(text.clone(), tool_calls.clone()));

            if finish != FinishReason::ToolCalls || tool_calls.is_empty() {
                return SubagentResult {
                    label: label.to_string(),
                    content: text,
                    is_error: false,
                    iterations: iteration,
                };
            }

            let ctx = ToolContext::default();
            for call in &tool_calls {
                let result = self.tools.execute(&call.name, &call.arguments, &ctx).await;
                let content = if result.is_error {
                    format!("Error: {}", result.content)
                } else {
                    result.content
                };
                messages.push(ChatMessage::tool_result(call.id.clone(), content));
            }
        }

        error_result(
            format!(
                "reached the {} iteration limit without a final answer",
                self.max_iterations
            ),
            iteration,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::provider::ChatResponse;
    use async_trait::async_trait;
    use std::time::{Duration, Instant};

    /// Completes after one simulated unit of work.
    struct SlowProvider {
        delay: Duration,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl crate::provider::ModelProvider for SlowProvider {
        fn name(&self) -> &str {
            "slow-stub"
        }

        async fn send(&self, request: &ChatRequest) -> Result<ChatResponse> {
            tokio::time::sleep(self.delay).await;
            let task_text = request
                .messages
                .iter()
                .find(|m| m.role == crate::types::Role::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            if let Some(marker) = self.fail_on {
                if task_text.contains(marker) {
                    return Err(crate::error::PalaverError::provider("slow-stub", "boom"));
                }
            }
            Ok(ChatResponse {
                content: format!("done: {task_text}"),
                ..Default::default()
            })
        }
    }

    fn tasks(n: usize) -> Vec<SubagentTask> {
        (0..n)
            .map(|i| SubagentTask {
                task: format!("job {i}"),
                label: None,
            })
            .collect()
    }

    #[tokio::test]
    async fn spawn_joins_all_results_in_task_order() {
        let manager = Arc::new(SubagentManager::new(
            Arc::new(SlowProvider {
                delay: Duration::from_millis(10),
                fail_on: None,
            }),
            "stub-model",
            Arc::new(ToolRegistry::new()),
        ));
        let results = manager
            .spawn(&CancellationToken::new(), tasks(3))
            .await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].label, "task-1");
        assert_eq!(results[2].content, "done: job 2");
    }

    #[tokio::test]
    async fn one_failure_does_not_cancel_siblings() {
        let manager = Arc::new(SubagentManager::new(
            Arc::new(SlowProvider {
                delay: Duration::from_millis(10),
                fail_on: Some("job 2"),
            }),
            "stub-model",
            Arc::new(ToolRegistry::new()),
        ));
        let results = manager
            .spawn(&CancellationToken::new(), tasks(5))
            .await;
        assert_eq!(results.len(), 5);
        let errors: Vec<_> = results.iter().filter(|r| r.is_error).collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].label, "task-3");
    }

    #[tokio::test]
    async fn tasks_run_concurrently_not_sequentially() {
        let manager = Arc::new(SubagentManager::new(
            Arc::new(SlowProvider {
                delay: Duration::from_millis(100),
                fail_on: None,
            }),
            "stub-model",
            Arc::new(ToolRegistry::new()),
        ));
        let started = Instant::now();
        let results = manager
            .spawn(&CancellationToken::new(), tasks(5))
            .await;
        let elapsed = started.elapsed();
        assert_eq!(results.len(), 5);
        // 5 × 100ms sequentially would take 500ms; the join should take
        // roughly one task's worth.
        assert!(
            elapsed < Duration::from_millis(350),
            "expected concurrent execution, took {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn cancellation_propagates_to_all_units() {
        let manager = Arc::new(SubagentManager::new(
            Arc::new(SlowProvider {
                delay: Duration::from_secs(30),
                fail_on: None,
            }),
            "stub-model",
            Arc::new(ToolRegistry::new()),
        ));
        let scope = CancellationToken::new();
        let cancel = scope.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });
        let started = Instant::now();
        let results = manager.spawn(&scope, tasks(3)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.is_error));
    }

    #[tokio::test]
    async fn explicit_labels_are_kept() {
        let manager = Arc::new(SubagentManager::new(
            Arc::new(SlowProvider {
                delay: Duration::from_millis(5),
                fail_on: None,
            }),
            "stub-model",
            Arc::new(ToolRegistry::new()),
        ));
        let results = manager
            .spawn(
                &CancellationToken::new(),
                vec![SubagentTask {
                    task: "check weather".into(),
                    label: Some("weather".into()),
                }],
            )
            .await;
        assert_eq!(results[0].label, "weather");
    }
}
