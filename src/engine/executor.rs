//! StepExecutor：执行单个步骤
//!
//! tool_call 先过确认策略（已批准则跳过）：需要确认时不调用工具，只发出确认请求并保持步骤 pending；
//! 否则调用 ToolExecutor，按结果结束步骤并把数据写入 task.context["<tool>_result"]。
//! 非工具步骤直接完成。工具侧的一切失败都落在步骤上，不向外抛错。

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::engine::events::NotificationSink;
use crate::engine::policy::ConfirmationPolicy;
use crate::engine::task::{ConfirmationRequest, StepStatus, Task};
use crate::tools::ToolExecutor;

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Completed,
    Failed(String),
    NeedsConfirmation(ConfirmationRequest),
    Cancelled,
}

pub struct StepExecutor {
    tools: Arc<ToolExecutor>,
    policy: ConfirmationPolicy,
    sink: Arc<dyn NotificationSink>,
}

impl StepExecutor {
    pub fn new(
        tools: Arc<ToolExecutor>,
        policy: ConfirmationPolicy,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            tools,
            policy,
            sink,
        }
    }

    pub async fn execute_step(
        &self,
        task: &mut Task,
        index: usize,
        approved: bool,
        cancel: &CancellationToken,
    ) -> StepOutcome {
        let Some(step) = task.steps.get(index) else {
            return StepOutcome::Failed(format!("no step at position {}", index));
        };
        if !step.is_pending() {
            return match step.status() {
                StepStatus::Failed => {
                    StepOutcome::Failed(step.error().unwrap_or("unknown error").to_string())
                }
                _ => StepOutcome::Completed,
            };
        }

        if !step.is_tool_call() {
            self.sink.on_thinking(&step.description);
            task.steps[index].mark_completed();
            return StepOutcome::Completed;
        }

        let tool = step.tool.clone().unwrap_or_default();
        let params = step
            .parameters
            .clone()
            .unwrap_or_else(|| Value::Object(Default::default()));

        if !approved && self.policy.requires_confirmation(&tool, &params) {
            let request = ConfirmationRequest::for_step(task, step);
            tracing::info!(step = %step.id, tool = %tool, "step requires confirmation");
            self.sink.on_confirmation(&request);
            return StepOutcome::NeedsConfirmation(request);
        }

        self.sink.on_tool_call(&tool, &params);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            r = self.tools.execute(&tool, params) => Some(r),
        };

        let step = &mut task.steps[index];
        let Some(result) = result else {
            step.mark_failed(AgentError::Cancelled.to_string());
            return StepOutcome::Cancelled;
        };
        let data = result.data.clone();
        match step.record_result(result) {
            StepStatus::Completed => {
                if let Some(data) = data {
                    task.context.insert(format!("{}_result", tool), data);
                }
                StepOutcome::Completed
            }
            _ => {
                let error = step.error().unwrap_or("unknown error").to_string();
                tracing::warn!(step = %step.id, tool = %tool, error = %error, "step failed");
                StepOutcome::Failed(error)
            }
        }
    }
}
