//! TaskOrchestrator：规划 → 逐步执行 → 反思/恢复 → 合成 的主循环
//!
//! 状态机：Idle → Planning → Executing ⇄ (Reflecting | Recovering | AwaitingConfirmation) → Synthesizing → Done；
//! 恢复失败、模型在规划/合成阶段失败或用户中途取消 → Aborted；用户拒绝确认 → Cancelled。
//!
//! 步骤列表是 Vec + 游标：反思插入到游标之后，恢复插入到失败步骤之后并把游标移到第一个恢复步骤。
//! 反思与恢复共用一个迭代计数（上限 max_iterations），到达上限即停止执行、直接合成；
//! 另外同一失败链（按 Step::origin 归并）最多恢复 max_recovery_attempts 次。
//! 等待确认时运行状态（任务、游标、计数）保存在 active 中，由 resume 从同一步骤继续。

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::AgentSection;
use crate::core::{AgentError, SessionSupervisor};
use crate::engine::events::NotificationSink;
use crate::engine::executor::{StepExecutor, StepOutcome};
use crate::engine::formatter::{format_results, truncate_chars};
use crate::engine::model::ask_model;
use crate::engine::planner::TaskPlanner;
use crate::engine::policy::ConfirmationPolicy;
use crate::engine::recovery::RecoveryPlanner;
use crate::engine::reflector::Reflector;
use crate::engine::task::{ConfirmationRequest, StepStatus, Task, TaskStatus};
use crate::llm::{CompletionOptions, LlmClient};
use crate::memory::Message;
use crate::tools::{ToolExecutor, ToolResult};

/// 合成 prompt 中单个步骤结果的最大字符数
const MAX_SYNTHESIS_RESULT_CHARS: usize = 4000;

const SYNTHESIS_INSTRUCTION: &str = "You are a helpful terminal assistant. \
The steps below were executed to handle the user's request. \
Using their results, answer the original request directly and concisely. \
Mention failures only if they affect the answer.";

/// 编排器运行参数（来自 [agent] 配置段）
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_iterations: usize,
    pub max_recovery_attempts: usize,
    pub history_window: usize,
    pub max_reflection_steps: usize,
    pub max_recovery_steps: usize,
    /// 规划 / 反思 / 恢复
    pub options: CompletionOptions,
    pub synthesis_options: CompletionOptions,
    pub policy: ConfirmationPolicy,
}

impl EngineSettings {
    pub fn from_config(section: &AgentSection) -> Self {
        let defaults = AgentSection::default();
        let options = CompletionOptions::default()
            .with_temperature(section.temperature)
            .with_max_tokens(section.max_tokens);
        Self {
            max_iterations: non_zero_or_default(
                "max_iterations",
                section.max_iterations,
                defaults.max_iterations,
            ),
            max_recovery_attempts: section.max_recovery_attempts,
            history_window: non_zero_or_default(
                "history_window",
                section.history_window,
                defaults.history_window,
            ),
            max_reflection_steps: section.max_reflection_steps,
            max_recovery_steps: section.max_recovery_steps,
            synthesis_options: options.clone().with_temperature(section.synthesis_temperature),
            options,
            policy: ConfirmationPolicy::from_config(&section.confirmation),
        }
    }
}

/// 0 会让引擎不执行任何步骤（或不带任何历史），按配置错误处理
fn non_zero_or_default(key: &str, value: usize, default: usize) -> usize {
    if value == 0 {
        tracing::warn!(key, default, "agent setting must be at least 1, using default");
        default
    } else {
        value
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&AgentSection::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Idle,
    Planning,
    Executing,
    Reflecting,
    Recovering,
    AwaitingConfirmation,
    Synthesizing,
    Done,
    Aborted,
    Cancelled,
}

/// 一次 process_user_input / resume 的结果
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// 正常结束，附最终回答（调用方可写入对话历史）
    Completed { response: String },
    /// 挂起等待确认；调用 resume 继续
    AwaitingConfirmation(ConfirmationRequest),
    Aborted { error: String },
    /// 用户拒绝确认
    Cancelled { reason: String },
}

/// 进行中的任务及其执行位置
#[derive(Debug)]
struct ActiveRun {
    task: Task,
    cursor: usize,
    iterations: usize,
    /// 失败链根步骤 id → 已触发恢复次数
    recovery_attempts: HashMap<String, usize>,
}

impl ActiveRun {
    fn new(task: Task) -> Self {
        Self {
            task,
            cursor: 0,
            iterations: 0,
            recovery_attempts: HashMap::new(),
        }
    }
}

pub struct TaskOrchestrator {
    llm: Arc<dyn LlmClient>,
    planner: TaskPlanner,
    executor: StepExecutor,
    reflector: Reflector,
    recovery: RecoveryPlanner,
    sink: Arc<dyn NotificationSink>,
    settings: EngineSettings,
    supervisor: SessionSupervisor,
    state: OrchestratorState,
    active: Option<ActiveRun>,
    last_task: Option<Task>,
}

impl TaskOrchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolExecutor>,
        sink: Arc<dyn NotificationSink>,
        settings: EngineSettings,
    ) -> Self {
        let planner = TaskPlanner::new(
            llm.clone(),
            tools.clone(),
            settings.options.clone(),
            settings.history_window,
        );
        let reflector = Reflector::new(
            llm.clone(),
            tools.clone(),
            settings.options.clone(),
            settings.max_reflection_steps,
        );
        let recovery = RecoveryPlanner::new(
            llm.clone(),
            tools.clone(),
            settings.options.clone(),
            settings.max_recovery_steps,
        );
        let executor = StepExecutor::new(tools, settings.policy.clone(), sink.clone());
        Self {
            llm,
            planner,
            executor,
            reflector,
            recovery,
            sink,
            settings,
            supervisor: SessionSupervisor::new(),
            state: OrchestratorState::Idle,
            active: None,
            last_task: None,
        }
    }

    /// 取消句柄：可在其他任务中调用 cancel()
    pub fn cancel_handle(&self) -> SessionSupervisor {
        self.supervisor.clone()
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// 正在等待确认的任务
    pub fn active_task(&self) -> Option<&Task> {
        self.active.as_ref().map(|run| &run.task)
    }

    /// 最近一个已结束的任务
    pub fn last_task(&self) -> Option<&Task> {
        self.last_task.as_ref()
    }

    pub fn is_awaiting_confirmation(&self) -> bool {
        self.active.is_some()
    }

    /// 处理一条新请求；history 为此前的对话（不含本次输入）
    pub async fn process_user_input(&mut self, input: &str, history: &[Message]) -> TaskOutcome {
        if let Some(mut stale) = self.active.take() {
            tracing::warn!(task_id = %stale.task.id, "discarding task that was waiting for confirmation");
            stale.task.status = TaskStatus::Failed;
            self.last_task = Some(stale.task);
        }

        let cancel = self.supervisor.begin();
        self.state = OrchestratorState::Planning;
        tracing::info!(input = %truncate_chars(input, 80), "planning");
        self.sink.on_thinking("Planning...");

        let task = match self.planner.plan(input, history, &cancel).await {
            Ok(task) => task,
            Err(e) => {
                let error = e.to_string();
                tracing::warn!(error = %error, "planning aborted");
                self.state = OrchestratorState::Aborted;
                self.sink.on_error(&error);
                self.supervisor.end();
                return TaskOutcome::Aborted { error };
            }
        };
        self.sink.on_progress("Planning", 1, task.steps.len() + 1);
        self.drive(ActiveRun::new(task), false, cancel).await
    }

    /// 回应挂起的确认：批准则从原步骤继续，拒绝则以 Cancelled 结束
    pub async fn resume(&mut self, approved: bool) -> Result<TaskOutcome, AgentError> {
        let Some(mut run) = self.active.take() else {
            return Err(AgentError::NoPendingConfirmation);
        };
        if approved {
            tracing::info!(task_id = %run.task.id, "confirmation approved");
            let cancel = self.supervisor.begin();
            return Ok(self.drive(run, true, cancel).await);
        }

        tracing::info!(task_id = %run.task.id, "confirmation denied");
        let cursor = run.cursor;
        if let Some(step) = run.task.steps.get_mut(cursor) {
            step.mark_failed("Denied by user");
        }
        run.task.status = TaskStatus::Failed;
        self.state = OrchestratorState::Cancelled;
        let reason = "Cancelled by user".to_string();
        self.sink.on_response("Operation cancelled by user.");
        self.last_task = Some(run.task);
        Ok(TaskOutcome::Cancelled { reason })
    }

    async fn drive(
        &mut self,
        mut run: ActiveRun,
        mut approved: bool,
        cancel: CancellationToken,
    ) -> TaskOutcome {
        run.task.status = TaskStatus::InProgress;
        self.state = OrchestratorState::Executing;
        let bound = self.settings.max_iterations;

        while run.cursor < run.task.steps.len() && run.iterations < bound {
            let index = run.cursor;
            let total = run.task.steps.len() + 1;
            self.sink
                .on_progress(&run.task.steps[index].description, index + 2, total);

            let outcome = self
                .executor
                .execute_step(&mut run.task, index, std::mem::take(&mut approved), &cancel)
                .await;
            match outcome {
                StepOutcome::NeedsConfirmation(request) => {
                    self.state = OrchestratorState::AwaitingConfirmation;
                    self.supervisor.end();
                    self.active = Some(run);
                    return TaskOutcome::AwaitingConfirmation(request);
                }
                StepOutcome::Cancelled => return self.abort(run, AgentError::Cancelled),
                StepOutcome::Completed => {
                    if run.task.steps[index].is_tool_call() {
                        self.state = OrchestratorState::Reflecting;
                        let reflection = match self
                            .reflector
                            .reflect(&run.task, &run.task.steps[index], &cancel)
                            .await
                        {
                            Ok(reflection) => reflection,
                            Err(e) => return self.abort(run, e),
                        };
                        if reflection.should_continue {
                            let added = run.task.insert_steps_after(index, reflection.new_steps);
                            tracing::info!(added, "reflection added steps");
                        }
                        run.iterations += 1;
                        self.state = OrchestratorState::Executing;
                    }
                    run.cursor += 1;
                }
                StepOutcome::Failed(error) => {
                    self.state = OrchestratorState::Recovering;
                    let (lineage, description) = {
                        let step = &run.task.steps[index];
                        (
                            step.origin.clone().unwrap_or_else(|| step.id.clone()),
                            step.description.clone(),
                        )
                    };
                    let attempts = run.recovery_attempts.entry(lineage).or_insert(0);
                    if *attempts >= self.settings.max_recovery_attempts {
                        tracing::warn!(step = %description, "recovery attempts exhausted");
                        return self.abort(
                            run,
                            AgentError::RecoveryExhausted {
                                step: description,
                                reason: error,
                            },
                        );
                    }
                    *attempts += 1;

                    let steps = match self
                        .recovery
                        .recover(&run.task, &run.task.steps[index], &error, &cancel)
                        .await
                    {
                        Ok(steps) => steps,
                        Err(e) => return self.abort(run, e),
                    };
                    if steps.is_empty() {
                        return self.abort(
                            run,
                            AgentError::RecoveryExhausted {
                                step: description,
                                reason: error,
                            },
                        );
                    }
                    let added = run.task.insert_steps_after(index, steps);
                    tracing::info!(added, step = %description, "recovery added steps");
                    run.cursor += 1;
                    run.iterations += 1;
                    self.state = OrchestratorState::Executing;
                }
            }
        }

        if run.cursor < run.task.steps.len() {
            tracing::warn!(
                iterations = run.iterations,
                skipped = run.task.steps.len() - run.cursor,
                "iteration bound reached, synthesizing early"
            );
        }
        self.synthesize(run, &cancel).await
    }

    async fn synthesize(&mut self, mut run: ActiveRun, cancel: &CancellationToken) -> TaskOutcome {
        self.state = OrchestratorState::Synthesizing;
        self.sink.on_thinking("Composing the answer...");
        let messages = synthesis_messages(&run.task);
        match ask_model(
            self.llm.as_ref(),
            &messages,
            &self.settings.synthesis_options,
            cancel,
        )
        .await
        {
            Ok(response) => {
                run.task.status = TaskStatus::Completed;
                self.state = OrchestratorState::Done;
                self.supervisor.end();
                tracing::info!(task_id = %run.task.id, steps = run.task.steps.len(), "task completed");
                self.sink.on_response(&response);
                self.last_task = Some(run.task);
                TaskOutcome::Completed { response }
            }
            Err(AgentError::Cancelled) => self.abort(run, AgentError::Cancelled),
            Err(e) => self.abort(run, AgentError::SynthesisFailed(e.to_string())),
        }
    }

    /// 中止任务：恰好一次 on_error，不做合成
    fn abort(&mut self, mut run: ActiveRun, error: AgentError) -> TaskOutcome {
        let error = error.to_string();
        run.task.status = TaskStatus::Failed;
        self.state = OrchestratorState::Aborted;
        self.supervisor.end();
        tracing::warn!(task_id = %run.task.id, error = %error, "task aborted");
        self.sink.on_error(&error);
        self.last_task = Some(run.task);
        TaskOutcome::Aborted { error }
    }
}

fn synthesis_messages(task: &Task) -> Vec<Message> {
    let results: Vec<(String, ToolResult)> = task
        .steps
        .iter()
        .filter(|s| !s.is_pending())
        .enumerate()
        .map(|(i, step)| {
            let status = match step.status() {
                StepStatus::Failed => "failed",
                _ => "completed",
            };
            let label = format!("Step {}: {} ({})", i + 1, step.description, status);
            let result = match step.result() {
                Some(result) => result.clone(),
                None => ToolResult::ok(step.reasoning.clone()),
            };
            (label, result)
        })
        .collect();

    let trace = truncate_chars(
        &format_results(&results),
        MAX_SYNTHESIS_RESULT_CHARS * results.len().max(1),
    );
    let user = format!(
        "Original request: {}\nTask: {}\n\nExecuted steps:\n{}",
        task.user_input, task.description, trace
    );
    vec![Message::system(SYNTHESIS_INSTRUCTION), Message::user(user)]
}
