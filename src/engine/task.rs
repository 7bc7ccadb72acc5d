//! 任务数据模型：Task / Step / ConfirmationRequest
//!
//! Task 独占自己的步骤列表；步骤状态单调（Pending → Completed | Failed），
//! 只能通过 Step 上的方法推进，已结束的步骤不会被改回。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::tools::ToolResult;

/// 步骤类型；模型给出的未知类型反序列化为 Unknown，按推理占位处理
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    ToolCall,
    #[default]
    Analysis,
    Reflection,
    Planning,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// 模型输出中的单个步骤（规划、反思、恢复共用）；字段缺失时取默认值
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StepDraft {
    pub action: StepAction,
    pub description: String,
    pub tool: Option<String>,
    #[serde(alias = "params", alias = "args")]
    pub parameters: Option<Value>,
    pub reasoning: String,
}

/// 一个计划步骤
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step {
    pub id: String,
    pub action: StepAction,
    pub description: String,
    /// 仅 ToolCall 有值
    pub tool: Option<String>,
    /// 仅 ToolCall 有值
    pub parameters: Option<Value>,
    pub reasoning: String,
    /// 恢复链的根步骤 id：由哪个失败步骤衍生而来
    pub origin: Option<String>,
    result: Option<ToolResult>,
    status: StepStatus,
}

fn mint_step_id() -> String {
    format!("step-{}", Uuid::new_v4().simple())
}

impl Step {
    pub fn tool_call(
        tool: impl Into<String>,
        parameters: Value,
        description: impl Into<String>,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            id: mint_step_id(),
            action: StepAction::ToolCall,
            description: description.into(),
            tool: Some(tool.into()),
            parameters: Some(parameters),
            reasoning: reasoning.into(),
            origin: None,
            result: None,
            status: StepStatus::Pending,
        }
    }

    /// 非工具步骤（analysis / reflection / planning）；传入 ToolCall 时降级为 Analysis
    pub fn reasoning(
        action: StepAction,
        description: impl Into<String>,
        reasoning: impl Into<String>,
    ) -> Self {
        let action = if action == StepAction::ToolCall {
            StepAction::Analysis
        } else {
            action
        };
        Self {
            id: mint_step_id(),
            action,
            description: description.into(),
            tool: None,
            parameters: None,
            reasoning: reasoning.into(),
            origin: None,
            result: None,
            status: StepStatus::Pending,
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    pub fn result(&self) -> Option<&ToolResult> {
        self.result.as_ref()
    }

    pub fn is_tool_call(&self) -> bool {
        self.action == StepAction::ToolCall
    }

    pub fn is_pending(&self) -> bool {
        self.status == StepStatus::Pending
    }

    /// 记录工具结果并按 success 结束步骤；已结束的步骤保持不变
    pub(crate) fn record_result(&mut self, result: ToolResult) -> StepStatus {
        if self.is_pending() {
            self.status = if result.success {
                StepStatus::Completed
            } else {
                StepStatus::Failed
            };
            self.result = Some(result);
        }
        self.status
    }

    pub(crate) fn mark_completed(&mut self) {
        if self.is_pending() {
            self.status = StepStatus::Completed;
        }
    }

    pub(crate) fn mark_failed(&mut self, error: impl Into<String>) {
        if self.is_pending() {
            self.status = StepStatus::Failed;
            self.result = Some(ToolResult::err(error));
        }
    }

    /// 失败原因（仅 Failed 步骤）
    pub fn error(&self) -> Option<&str> {
        match (&self.status, &self.result) {
            (StepStatus::Failed, Some(r)) => Some(r.error_message()),
            (StepStatus::Failed, None) => Some("unknown error"),
            _ => None,
        }
    }
}

impl From<StepDraft> for Step {
    /// 强制「tool/parameters 当且仅当 ToolCall」：缺 tool 的 ToolCall 降级为 Analysis
    fn from(draft: StepDraft) -> Self {
        let description = if draft.description.trim().is_empty() {
            "(no description)".to_string()
        } else {
            draft.description
        };
        match (draft.action, draft.tool) {
            (StepAction::ToolCall, Some(tool)) if !tool.trim().is_empty() => {
                let parameters = match draft.parameters {
                    Some(Value::Object(map)) => Value::Object(map),
                    _ => Value::Object(Default::default()),
                };
                Step::tool_call(tool.trim(), parameters, description, draft.reasoning)
            }
            (action, _) => Step::reasoning(action, description, draft.reasoning),
        }
    }
}

/// 一次用户请求的执行单元
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: String,
    pub user_input: String,
    pub description: String,
    pub strategy: String,
    pub expected_outcome: String,
    pub steps: Vec<Step>,
    pub status: TaskStatus,
    /// 侧信息（如 "<tool>_result" → 该工具最近一次的结果数据），任务内只增不清
    pub context: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(user_input: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_input: user_input.into(),
            description: description.into(),
            strategy: String::new(),
            expected_outcome: String::new(),
            steps: Vec::new(),
            status: TaskStatus::Pending,
            context: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    /// 在 index 之后插入步骤（index 越界时追加到末尾），返回插入数量
    pub fn insert_steps_after(&mut self, index: usize, steps: Vec<Step>) -> usize {
        let at = (index + 1).min(self.steps.len());
        let count = steps.len();
        self.steps.splice(at..at, steps);
        count
    }
}

/// 挂起等待人工确认的请求（不属于任务持久状态，仅通过通知与 resume 传递）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfirmationRequest {
    pub task_id: String,
    pub step_id: String,
    pub tool: String,
    pub params: Value,
    /// 给用户看的说明
    pub content: String,
}

impl ConfirmationRequest {
    pub fn for_step(task: &Task, step: &Step) -> Self {
        let tool = step.tool.clone().unwrap_or_default();
        let params = step
            .parameters
            .clone()
            .unwrap_or_else(|| Value::Object(Default::default()));
        let detail = match params.get("command").and_then(Value::as_str) {
            Some(command) => format!("Run command: {}", command),
            None => serde_json::to_string_pretty(&params).unwrap_or_else(|_| params.to_string()),
        };
        Self {
            task_id: task.id.clone(),
            step_id: step.id.clone(),
            content: format!("{}\nTool: {}\n{}", step.description, tool, detail),
            tool,
            params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_status_is_monotonic() {
        let mut step = Step::tool_call("read-file", json!({"path": "a"}), "read", "need it");
        assert_eq!(step.record_result(ToolResult::err("missing")), StepStatus::Failed);
        step.mark_completed();
        assert_eq!(
            step.record_result(ToolResult::ok("late")),
            StepStatus::Failed
        );
        assert_eq!(step.error(), Some("missing"));
    }

    #[test]
    fn test_draft_tool_call_without_tool_downgrades() {
        let draft: StepDraft = serde_json::from_value(json!({
            "action": "tool_call",
            "description": "look around",
            "reasoning": "why not"
        }))
        .unwrap();
        let step = Step::from(draft);
        assert_eq!(step.action, StepAction::Analysis);
        assert!(step.tool.is_none());
        assert!(step.parameters.is_none());
    }

    #[test]
    fn test_draft_non_tool_drops_tool_and_unknown_action() {
        let draft: StepDraft = serde_json::from_value(json!({
            "action": "daydream",
            "description": "think",
            "tool": "shell-exec",
            "parameters": {"command": "ls"}
        }))
        .unwrap();
        let step = Step::from(draft);
        assert_eq!(step.action, StepAction::Unknown);
        assert!(step.tool.is_none());
    }

    #[test]
    fn test_draft_tool_call_normalizes_parameters() {
        let draft: StepDraft = serde_json::from_value(json!({
            "action": "tool_call",
            "description": "list",
            "tool": " list-directory ",
            "params": "oops"
        }))
        .unwrap();
        let step = Step::from(draft);
        assert_eq!(step.tool.as_deref(), Some("list-directory"));
        assert_eq!(step.parameters, Some(json!({})));
    }

    #[test]
    fn test_insert_steps_after_cursor() {
        let mut task = Task::new("do it", "do it");
        task.steps.push(Step::reasoning(StepAction::Analysis, "a", ""));
        task.steps.push(Step::reasoning(StepAction::Analysis, "c", ""));
        let inserted = task.insert_steps_after(0, vec![Step::reasoning(StepAction::Analysis, "b", "")]);
        assert_eq!(inserted, 1);
        let order: Vec<&str> = task.steps.iter().map(|s| s.description.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);

        task.insert_steps_after(10, vec![Step::reasoning(StepAction::Analysis, "d", "")]);
        assert_eq!(task.steps.last().unwrap().description, "d");
    }

    #[test]
    fn test_step_ids_unique() {
        let a = Step::reasoning(StepAction::Analysis, "a", "");
        let b = Step::reasoning(StepAction::Analysis, "a", "");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_confirmation_request_shows_command() {
        let mut task = Task::new("clean", "clean build");
        let step = Step::tool_call("shell-exec", json!({"command": "cargo clean"}), "Clean", "");
        task.steps.push(step.clone());
        let req = ConfirmationRequest::for_step(&task, &step);
        assert_eq!(req.tool, "shell-exec");
        assert_eq!(req.step_id, step.id);
        assert!(req.content.contains("Run command: cargo clean"));
    }
}
