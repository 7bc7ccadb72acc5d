//! Headless Agent 运行时
//!
//! create_agent_components 按配置构建 LLM、工具注册表与执行器、引擎参数；
//! spawn_agent 在后台任务中持有 TaskOrchestrator 与对话历史，消费命令（Submit/Approve/Deny/Cancel/Quit），
//! 事件通过注入的 NotificationSink 推给前端。

use std::collections::VecDeque;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::core::{AgentError, SessionSupervisor};
use crate::engine::{EngineSettings, NotificationSink, TaskOrchestrator, TaskOutcome};
use crate::llm::{create_llm_from_config, LlmClient};
use crate::memory::{ConversationMemory, Message};
use crate::tools::{
    ListDirectoryTool, ReadFileTool, ShellTool, ToolExecutor, ToolRegistry, WebFetchTool,
    WriteFileTool,
};

/// 前端发往 Agent 的命令
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// 提交用户输入，开始一个新任务
    Submit(String),
    /// 批准挂起的确认
    Approve,
    /// 拒绝挂起的确认
    Deny,
    /// 取消正在运行的任务
    Cancel,
    Quit,
}

/// 预构建的 Agent 组件
pub struct AgentComponents {
    pub llm: Arc<dyn LlmClient>,
    pub tools: Arc<ToolExecutor>,
    pub settings: EngineSettings,
    pub workspace: PathBuf,
    pub max_context_turns: usize,
}

/// 工作目录：配置 > 当前目录下的 workspace；不存在时创建
fn resolve_workspace(cfg: &AppConfig) -> Result<PathBuf, AgentError> {
    let workspace = match &cfg.app.workspace_root {
        Some(root) => root.clone(),
        None => std::env::current_dir()
            .map_err(|e| AgentError::ConfigError(format!("cannot read current dir: {}", e)))?
            .join("workspace"),
    };
    std::fs::create_dir_all(&workspace).map_err(|e| {
        AgentError::ConfigError(format!("cannot create {}: {}", workspace.display(), e))
    })?;
    Ok(workspace.canonicalize().unwrap_or(workspace))
}

/// 注册内置工具：read-file / list-directory / write-file / shell-exec / web-fetch
pub fn default_registry(cfg: &AppConfig, workspace: &Path) -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register(ReadFileTool::new(workspace));
    tools.register(ListDirectoryTool::new(workspace));
    tools.register(WriteFileTool::new(workspace));
    tools.register(ShellTool::new(workspace, cfg.tools.tool_timeout_secs));
    tools.register(WebFetchTool::new(
        cfg.tools.search.allowed_domains.clone(),
        cfg.tools.search.timeout_secs,
        cfg.tools.search.max_result_chars,
    ));
    tools
}

pub fn create_agent_components(cfg: &AppConfig) -> Result<AgentComponents, AgentError> {
    let workspace = resolve_workspace(cfg)?;
    let llm = create_llm_from_config(cfg);
    let registry = default_registry(cfg, &workspace);
    tracing::info!(
        workspace = %workspace.display(),
        tools = ?registry.tool_names(),
        "agent components ready"
    );
    Ok(AgentComponents {
        llm,
        tools: Arc::new(ToolExecutor::new(registry, cfg.tools.tool_timeout_secs)),
        settings: EngineSettings::from_config(&cfg.agent),
        workspace,
        max_context_turns: cfg.app.max_context_turns,
    })
}

/// 等待 fut 完成，期间继续接收命令：Cancel 触发取消，Quit 取消并在结束后退出，其余命令排队
async fn run_cancellable<T>(
    fut: impl Future<Output = T>,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    backlog: &mut VecDeque<Command>,
    cancel: &SessionSupervisor,
) -> (T, bool) {
    tokio::pin!(fut);
    let mut quit = false;
    loop {
        tokio::select! {
            biased;
            out = &mut fut => return (out, quit),
            Some(cmd) = cmd_rx.recv() => match cmd {
                Command::Cancel => {
                    cancel.cancel();
                }
                Command::Quit => {
                    cancel.cancel();
                    quit = true;
                }
                other => {
                    tracing::debug!(command = ?other, "agent busy, command queued");
                    backlog.push_back(other);
                }
            },
        }
    }
}

/// 启动 Agent 后台任务，返回命令发送端与任务句柄
pub fn spawn_agent(
    components: AgentComponents,
    sink: Arc<dyn NotificationSink>,
) -> (mpsc::UnboundedSender<Command>, JoinHandle<()>) {
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
    let history_window = components.settings.history_window;
    let mut orchestrator = TaskOrchestrator::new(
        components.llm,
        components.tools,
        sink.clone(),
        components.settings,
    );
    let cancel = orchestrator.cancel_handle();
    let mut memory = ConversationMemory::new(components.max_context_turns);

    let handle = tokio::spawn(async move {
        // 挂起任务对应的用户输入，完成后再写入历史
        let mut pending_input: Option<String> = None;
        let mut backlog: VecDeque<Command> = VecDeque::new();

        loop {
            let cmd = match backlog.pop_front() {
                Some(cmd) => cmd,
                None => match cmd_rx.recv().await {
                    Some(cmd) => cmd,
                    None => break,
                },
            };
            let (input, outcome, quit) = match cmd {
                Command::Submit(input) => {
                    if orchestrator.is_awaiting_confirmation() {
                        sink.on_error("A confirmation is pending; answer it before starting a new task");
                        continue;
                    }
                    let history = memory.recent(history_window).to_vec();
                    let (outcome, quit) = run_cancellable(
                        orchestrator.process_user_input(&input, &history),
                        &mut cmd_rx,
                        &mut backlog,
                        &cancel,
                    )
                    .await;
                    (input, outcome, quit)
                }
                Command::Approve | Command::Deny => {
                    let approved = cmd == Command::Approve;
                    let (result, quit) = run_cancellable(
                        orchestrator.resume(approved),
                        &mut cmd_rx,
                        &mut backlog,
                        &cancel,
                    )
                    .await;
                    match result {
                        Ok(outcome) => (pending_input.take().unwrap_or_default(), outcome, quit),
                        Err(e) => {
                            sink.on_error(&e.to_string());
                            if quit {
                                break;
                            }
                            continue;
                        }
                    }
                }
                Command::Cancel => {
                    if !cancel.cancel() {
                        tracing::debug!("cancel requested while idle");
                    }
                    continue;
                }
                Command::Quit => break,
            };

            match outcome {
                TaskOutcome::Completed { response } => {
                    memory.push(Message::user(input));
                    memory.push(Message::assistant(response));
                }
                TaskOutcome::AwaitingConfirmation(_) => pending_input = Some(input),
                TaskOutcome::Aborted { .. } | TaskOutcome::Cancelled { .. } => {}
            }
            if quit {
                break;
            }
        }
        tracing::info!("agent loop stopped");
    });

    (cmd_tx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{AgentEvent, ChannelSink};
    use crate::llm::ScriptedLlmClient;

    fn components(llm: Arc<ScriptedLlmClient>) -> AgentComponents {
        AgentComponents {
            llm,
            tools: Arc::new(ToolExecutor::new(ToolRegistry::new(), 5)),
            settings: EngineSettings::default(),
            workspace: PathBuf::from("."),
            max_context_turns: 10,
        }
    }

    #[tokio::test]
    async fn test_submit_then_history_is_used() {
        let llm = Arc::new(ScriptedLlmClient::new([
            "no plan",
            "first answer",
            "no plan",
            "second answer",
        ]));
        let (sink, mut rx) = ChannelSink::channel();
        let (tx, handle) = spawn_agent(components(llm.clone()), Arc::new(sink));
        tx.send(Command::Submit("first".into())).unwrap();
        tx.send(Command::Submit("second".into())).unwrap();
        drop(tx);
        handle.await.unwrap();

        let responses: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|e| match e {
                AgentEvent::Response { text } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(responses, vec!["first answer", "second answer"]);

        // 第二次规划带上了第一轮对话
        let second_plan = llm.call(2).unwrap();
        let contents: Vec<&str> = second_plan.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(&contents[1..], &["first", "first answer", "second"]);
    }

    #[tokio::test]
    async fn test_approve_without_pending_reports_error() {
        let llm = Arc::new(ScriptedLlmClient::new(Vec::<String>::new()));
        let (sink, mut rx) = ChannelSink::channel();
        let (tx, handle) = spawn_agent(components(llm), Arc::new(sink));
        tx.send(Command::Approve).unwrap();
        drop(tx);
        handle.await.unwrap();
        assert!(matches!(
            rx.try_recv(),
            Ok(AgentEvent::Error { text }) if text.contains("No task is waiting")
        ));
    }

    #[test]
    fn test_workspace_created_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.app.workspace_root = Some(dir.path().join("ws"));
        cfg.llm.provider = "mock".to_string();
        let components = create_agent_components(&cfg).unwrap();
        assert!(components.workspace.is_dir());
        let names = components.tools.tool_names();
        assert_eq!(
            names,
            vec!["list-directory", "read-file", "shell-exec", "web-fetch", "write-file"]
        );
    }
}
