//! TaskPlanner：一次模型调用把用户请求拆成步骤计划
//!
//! system prompt = 规划说明 + 计划 JSON Schema（schemars 生成）+ 工具目录；
//! 随后是最近 history_window 条对话与本次输入。解析失败或步骤为空时回退为单步 analysis 任务，
//! 只有模型调用本身失败才返回 Err。

use std::collections::HashMap;
use std::sync::Arc;

use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::engine::model::ask_model;
use crate::engine::parse::parse_structured;
use crate::engine::task::{Step, StepAction, StepDraft, Task};
use crate::llm::{CompletionOptions, LlmClient};
use crate::memory::Message;
use crate::tools::ToolExecutor;

/// 计划格式（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct PlanFormat {
    /// 用一句话复述目标
    description: String,
    /// 整体思路
    strategy: String,
    steps: Vec<StepFormat>,
    /// 完成后用户应得到什么
    expected_outcome: String,
}

#[allow(dead_code)]
#[derive(JsonSchema)]
struct StepFormat {
    /// tool_call / analysis / reflection / planning
    action: String,
    description: String,
    /// 仅 tool_call：工具目录中的名称
    tool: Option<String>,
    /// 仅 tool_call：工具参数
    parameters: Option<HashMap<String, serde_json::Value>>,
    reasoning: String,
}

/// 计划 JSON Schema 字符串，拼入 system prompt
pub fn plan_schema_json() -> String {
    let schema = schema_for!(PlanFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// 步骤 JSON Schema 字符串（反思、恢复的输出复用）
pub fn step_schema_json() -> String {
    let schema = schema_for!(StepFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

const PLANNING_INSTRUCTION: &str = "You are the planning module of a terminal assistant. \
Break the user's request into a short ordered list of concrete steps. \
Use action \"tool_call\" with a tool name and parameters when a tool from the catalogue can do the work; \
use \"analysis\" for reasoning-only steps. Prefer the fewest steps that reach the goal. \
Reply with one JSON object matching the schema below and nothing else.";

const FALLBACK_REASONING: &str =
    "No structured plan was produced; answer the request directly from the conversation and general knowledge.";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PlanDraft {
    description: String,
    strategy: String,
    steps: Vec<StepDraft>,
    #[serde(alias = "expectedOutcome")]
    expected_outcome: String,
}

pub struct TaskPlanner {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolExecutor>,
    options: CompletionOptions,
    history_window: usize,
}

impl TaskPlanner {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolExecutor>,
        options: CompletionOptions,
        history_window: usize,
    ) -> Self {
        Self {
            llm,
            tools,
            options,
            history_window,
        }
    }

    fn system_prompt(&self) -> String {
        format!(
            "{}\n\n## Plan schema\n{}\n\n## Available tools\n{}",
            PLANNING_INSTRUCTION,
            plan_schema_json(),
            self.tools.registry().catalogue()
        )
    }

    pub async fn plan(
        &self,
        user_input: &str,
        history: &[Message],
        cancel: &CancellationToken,
    ) -> Result<Task, AgentError> {
        let mut messages = vec![Message::system(self.system_prompt())];
        let skip = history.len().saturating_sub(self.history_window);
        messages.extend(history.iter().skip(skip).cloned());
        messages.push(Message::user(user_input));
        tracing::debug!(messages = messages.len(), "planning request");

        let reply = ask_model(self.llm.as_ref(), &messages, &self.options, cancel)
            .await
            .map_err(|e| match e {
                AgentError::Cancelled => AgentError::Cancelled,
                other => AgentError::PlanningFailed(other.to_string()),
            })?;

        let draft = parse_structured(&reply, |d: &PlanDraft| !d.steps.is_empty()).ok();
        let task = match draft {
            Some(draft) => build_task(user_input, draft),
            None => {
                tracing::warn!("plan reply had no usable structure, falling back to a single step");
                fallback_task(user_input)
            }
        };
        tracing::info!(task_id = %task.id, steps = task.steps.len(), "plan ready");
        Ok(task)
    }
}

fn build_task(user_input: &str, draft: PlanDraft) -> Task {
    let description = if draft.description.trim().is_empty() {
        user_input.to_string()
    } else {
        draft.description
    };
    let mut task = Task::new(user_input, description);
    task.strategy = draft.strategy;
    task.expected_outcome = draft.expected_outcome;
    task.steps = draft.steps.into_iter().map(Step::from).collect();
    task
}

/// 无法解析计划时的单步任务
pub fn fallback_task(user_input: &str) -> Task {
    let mut task = Task::new(user_input, user_input);
    task.strategy = "Respond directly".to_string();
    task.steps.push(Step::reasoning(
        StepAction::Analysis,
        format!("Answer: {}", user_input),
        FALLBACK_REASONING,
    ));
    task
}
