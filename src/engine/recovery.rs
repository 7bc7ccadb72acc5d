//! RecoveryPlanner：步骤失败后请模型给出 1–2 个替代步骤
//!
//! 回复无法解析、为空或模型调用失败时返回空列表（表示无法恢复，由编排器中止任务）。
//! 返回的步骤记录恢复链的根（origin），编排器据此限制同一失败的重复恢复次数。

use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::engine::model::ask_model;
use crate::engine::parse::parse_structured;
use crate::engine::planner::step_schema_json;
use crate::engine::task::{Step, StepDraft, Task};
use crate::llm::{CompletionOptions, LlmClient};
use crate::memory::Message;
use crate::tools::ToolExecutor;

const RECOVERY_INSTRUCTION: &str = "A step of the current task failed. \
Propose up to {max} alternative steps that work around the failure, using only tools from the catalogue. \
If nothing sensible can be done, return an empty list. \
Reply with JSON only: {\"analysis\": \"...\", \"steps\": [...]}, each step following the step schema below.";

/// 必须带 `steps`（可为空列表）才算恢复回复
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RecoveryDraft {
    analysis: String,
    #[serde(alias = "alternatives")]
    steps: Option<Vec<StepDraft>>,
}

pub struct RecoveryPlanner {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolExecutor>,
    options: CompletionOptions,
    max_new_steps: usize,
}

impl RecoveryPlanner {
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

    fn messages(&self, task: &Task, failed: &Step, error: &str) -> Vec<Message> {
        let system = format!(
            "{}\n\n## Step schema\n{}\n\n## Available tools\n{}",
            RECOVERY_INSTRUCTION.replace("{max}", &self.max_new_steps.to_string()),
            step_schema_json(),
            self.tools.registry().catalogue()
        );
        let call = match (&failed.tool, &failed.parameters) {
            (Some(tool), Some(params)) => format!("\nTool: {} {}", tool, params),
            _ => String::new(),
        };
        let user = format!(
            "Original request: {}\nFailed step: {}{}\nError: {}",
            task.user_input, failed.description, call, error
        );
        vec![Message::system(system), Message::user(user)]
    }

    /// 返回替代步骤；空列表表示无法恢复
    pub async fn recover(
        &self,
        task: &Task,
        failed: &Step,
        error: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Step>, AgentError> {
        let messages = self.messages(task, failed, error);
        let reply = match ask_model(self.llm.as_ref(), &messages, &self.options, cancel).await {
            Ok(reply) => reply,
            Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
            Err(e) => {
                tracing::warn!(error = %e, "recovery model call failed");
                return Ok(Vec::new());
            }
        };

        let draft = parse_structured(&reply, |d: &RecoveryDraft| d.steps.is_some()).ok();
        let Some((analysis, steps)) = draft.and_then(|d| Some((d.analysis, d.steps?))) else {
            tracing::warn!("recovery reply unparseable");
            return Ok(Vec::new());
        };
        tracing::debug!(analysis = %analysis, proposed = steps.len(), "recovery analysis");

        let origin = failed.origin.clone().unwrap_or_else(|| failed.id.clone());
        Ok(steps
            .into_iter()
            .take(self.max_new_steps)
            .map(|d| Step::from(d).with_origin(origin.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::llm::{LlmError, ScriptedLlmClient};
    use crate::tools::{ToolRegistry, ToolResult};

    fn planner(llm: Arc<ScriptedLlmClient>) -> RecoveryPlanner {
        RecoveryPlanner::new(
            llm,
            Arc::new(ToolExecutor::new(ToolRegistry::new(), 5)),
            CompletionOptions::default(),
            2,
        )
    }

    fn failed_step() -> (Task, Step) {
        let mut task = Task::new("read config", "Read the config");
        let mut step = Step::tool_call("read-file", json!({"path": "config.toml"}), "Read config", "");
        step.record_result(ToolResult::err("Path not found: config.toml"));
        task.steps.push(step.clone());
        (task, step)
    }

    #[tokio::test]
    async fn test_alternatives_capped_and_linked_to_origin() {
        let reply = json!({
            "analysis": "file is elsewhere",
            "alternatives": [
                {"action": "tool_call", "description": "List", "tool": "list-directory", "parameters": {"path": "."}},
                {"action": "tool_call", "description": "Read other", "tool": "read-file", "parameters": {"path": "config/default.toml"}},
                {"action": "analysis", "description": "give up"}
            ]
        })
        .to_string();
        let llm = Arc::new(ScriptedLlmClient::new([reply]));
        let (task, step) = failed_step();
        let steps = planner(llm.clone())
            .recover(&task, &step, "Path not found: config.toml", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(steps.len(), 2);
        assert!(steps.iter().all(|s| s.origin.as_deref() == Some(step.id.as_str())));
        let prompt = &llm.call(0).unwrap()[1].content;
        assert!(prompt.contains("Error: Path not found: config.toml"));
        assert!(prompt.contains("Tool: read-file"));
    }

    #[tokio::test]
    async fn test_origin_is_inherited_along_the_chain() {
        let llm = Arc::new(ScriptedLlmClient::new([
            r#"{"steps": [{"action": "analysis", "description": "retry"}]}"#,
        ]));
        let (task, step) = failed_step();
        let step = step.with_origin("step-root");
        let steps = planner(llm)
            .recover(&task, &step, "boom", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(steps[0].origin.as_deref(), Some("step-root"));
    }

    #[tokio::test]
    async fn test_quoted_fragment_before_reply_is_skipped() {
        let reply = r#"The failed call was {"path": "config.toml"}; try listing instead:
{"analysis": "wrong path", "steps": [{"action": "tool_call", "description": "List", "tool": "list-directory", "parameters": {"path": "."}}]}"#;
        let llm = Arc::new(ScriptedLlmClient::new([reply]));
        let (task, step) = failed_step();
        let steps = planner(llm)
            .recover(&task, &step, "Path not found: config.toml", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].tool.as_deref(), Some("list-directory"));
    }

    #[tokio::test]
    async fn test_nothing_usable_is_empty() {
        let llm = Arc::new(ScriptedLlmClient::new(["sorry", r#"{"steps": []}"#]));
        llm.push_error(LlmError::EmptyResponse);
        let (task, step) = failed_step();
        let planner = planner(llm);
        let token = CancellationToken::new();
        for _ in 0..3 {
            assert!(planner.recover(&task, &step, "x", &token).await.unwrap().is_empty());
        }
    }
}
