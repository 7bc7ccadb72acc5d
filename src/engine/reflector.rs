//! Reflector：工具步骤成功后判断任务是否已完成，未完成则给出后续步骤
//!
//! 模型说已完成、回复无法解析、后续步骤为空或模型调用失败，一律视为「无需继续」；
//! 只有取消会作为错误返回。

use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::engine::formatter::{format_result, truncate_chars};
use crate::engine::model::ask_model;
use crate::engine::parse::parse_structured;
use crate::engine::planner::step_schema_json;
use crate::engine::task::{Step, StepDraft, Task};
use crate::llm::{CompletionOptions, LlmClient};
use crate::memory::Message;
use crate::tools::ToolExecutor;

/// 拼入 prompt 的单个结果最大字符数
const MAX_RESULT_CHARS: usize = 4000;

const REFLECTION_INSTRUCTION: &str = "You review the progress of a task after a tool step finished. \
Decide whether the user's request is now fully satisfied. \
If it is, reply {\"complete\": true, \"reasoning\": \"...\"}. \
If not, reply {\"complete\": false, \"reasoning\": \"...\", \"next_steps\": [...]} with at most {max} new steps, \
each following the step schema below. Reply with JSON only.";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reflection {
    pub should_continue: bool,
    pub new_steps: Vec<Step>,
}

impl Reflection {
    fn done() -> Self {
        Self::default()
    }
}

/// `complete` 与 `next_steps` 至少出现一个才算反思回复
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReflectionDraft {
    #[serde(alias = "done", alias = "is_complete")]
    complete: Option<bool>,
    reasoning: String,
    #[serde(alias = "steps")]
    next_steps: Option<Vec<StepDraft>>,
}

impl ReflectionDraft {
    fn is_reflection(&self) -> bool {
        self.complete.is_some() || self.next_steps.is_some()
    }
}

pub struct Reflector {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolExecutor>,
    options: CompletionOptions,
    max_new_steps: usize,
}

impl Reflector {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolExecutor>,
        options: CompletionOptions,
        max_new_steps: usize,
    ) -> Self {
        Self {
            llm,
            tools,
            options,
            max_new_steps,
        }
    }

    fn messages(&self, task: &Task, completed: &Step) -> Vec<Message> {
        let system = format!(
            "{}\n\n## Step schema\n{}\n\n## Available tools\n{}",
            REFLECTION_INSTRUCTION.replace("{max}", &self.max_new_steps.to_string()),
            step_schema_json(),
            self.tools.registry().catalogue()
        );
        let result = completed
            .result()
            .map(format_result)
            .unwrap_or_else(|| "(no output)".to_string());
        let user = format!(
            "Original request: {}\nTask: {}\nCompleted step: {}\nResult:\n{}",
            task.user_input,
            task.description,
            completed.description,
            truncate_chars(&result, MAX_RESULT_CHARS)
        );
        vec![Message::system(system), Message::user(user)]
    }

    pub async fn reflect(
        &self,
        task: &Task,
        completed: &Step,
        cancel: &CancellationToken,
    ) -> Result<Reflection, AgentError> {
        let messages = self.messages(task, completed);
        let reply = match ask_model(self.llm.as_ref(), &messages, &self.options, cancel).await {
            Ok(reply) => reply,
            Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
            Err(e) => {
                tracing::warn!(error = %e, "reflection model call failed, treating task as done");
                return Ok(Reflection::done());
            }
        };

        let Some(draft) = parse_structured(&reply, ReflectionDraft::is_reflection).ok() else {
            tracing::warn!("reflection reply unparseable, treating task as done");
            return Ok(Reflection::done());
        };
        let next_steps = draft.next_steps.unwrap_or_default();
        if draft.complete == Some(true) || next_steps.is_empty() {
            tracing::debug!(reasoning = %draft.reasoning, "reflection: no further steps");
            return Ok(Reflection::done());
        }

        if next_steps.len() > self.max_new_steps {
            tracing::debug!(
                proposed = next_steps.len(),
                kept = self.max_new_steps,
                "reflection proposed too many steps"
            );
        }
        let new_steps: Vec<Step> = next_steps
            .into_iter()
            .take(self.max_new_steps)
            .map(Step::from)
            .collect();
        Ok(Reflection {
            should_continue: !new_steps.is_empty(),
            new_steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::llm::{LlmError, ScriptedLlmClient};
    use crate::tools::{ToolRegistry, ToolResult};

    fn reflector(llm: Arc<ScriptedLlmClient>) -> Reflector {
        Reflector::new(
            llm,
            Arc::new(ToolExecutor::new(ToolRegistry::new(), 5)),
            CompletionOptions::default(),
            3,
        )
    }

    fn completed_step() -> (Task, Step) {
        let mut task = Task::new("show files", "List files");
        let mut step = Step::tool_call("list-directory", json!({"path": "."}), "List root", "");
        step.record_result(ToolResult::ok(json!([{"name": "src", "type": "directory"}])));
        task.steps.push(step.clone());
        (task, step)
    }

    #[tokio::test]
    async fn test_complete_means_done() {
        let llm = Arc::new(ScriptedLlmClient::new([r#"{"complete": true, "reasoning": "all listed"}"#]));
        let (task, step) = completed_step();
        let r = reflector(llm.clone())
            .reflect(&task, &step, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(r, Reflection::done());
        let prompt = &llm.call(0).unwrap()[1].content;
        assert!(prompt.contains("📁 src (directory)"));
    }

    #[tokio::test]
    async fn test_follow_up_steps_capped() {
        let reply = json!({
            "complete": false,
            "next_steps": [
                {"action": "tool_call", "description": "a", "tool": "read-file", "parameters": {"path": "a"}},
                {"action": "analysis", "description": "b"},
                {"action": "analysis", "description": "c"},
                {"action": "analysis", "description": "d"}
            ]
        })
        .to_string();
        let llm = Arc::new(ScriptedLlmClient::new([reply]));
        let (task, step) = completed_step();
        let r = reflector(llm)
            .reflect(&task, &step, &CancellationToken::new())
            .await
            .unwrap();
        assert!(r.should_continue);
        assert_eq!(r.new_steps.len(), 3);
        assert!(r.new_steps.iter().all(|s| s.is_pending()));
        assert_eq!(r.new_steps[0].tool.as_deref(), Some("read-file"));
    }

    #[tokio::test]
    async fn test_quoted_fragment_before_reply_is_skipped() {
        let reply = r#"The last call used {"path": "."}. Next:
{"complete": false, "next_steps": [{"action": "tool_call", "description": "Read", "tool": "read-file", "parameters": {"path": "README.md"}}]}"#;
        let llm = Arc::new(ScriptedLlmClient::new([reply]));
        let (task, step) = completed_step();
        let r = reflector(llm)
            .reflect(&task, &step, &CancellationToken::new())
            .await
            .unwrap();
        assert!(r.should_continue);
        assert_eq!(r.new_steps.len(), 1);
        assert_eq!(r.new_steps[0].tool.as_deref(), Some("read-file"));
    }

    #[tokio::test]
    async fn test_garbage_or_failure_means_done() {
        let llm = Arc::new(ScriptedLlmClient::new(["looks good to me"]));
        llm.push_error(LlmError::Transport("reset".to_string()));
        let (task, step) = completed_step();
        let reflector = reflector(llm);
        let token = CancellationToken::new();
        assert_eq!(reflector.reflect(&task, &step, &token).await.unwrap(), Reflection::done());
        assert_eq!(reflector.reflect(&task, &step, &token).await.unwrap(), Reflection::done());
    }

    #[tokio::test]
    async fn test_cancel_is_error() {
        let llm = Arc::new(ScriptedLlmClient::new(["{}"]));
        let (task, step) = completed_step();
        let token = CancellationToken::new();
        token.cancel();
        let err = reflector(llm).reflect(&task, &step, &token).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
