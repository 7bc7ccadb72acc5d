//! taskbee - 终端任务执行助手
//!
//! 入口：初始化日志、加载配置、启动 Agent 后台任务；从 stdin 读取请求，事件打印到 stdout。
//! 有待确认的操作时输入 y / n 回应；Ctrl+C 取消正在运行的任务；输入 exit 或 quit 退出。

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use taskbee::agent::{create_agent_components, spawn_agent, Command};
use taskbee::config::{load_config, AppConfig};
use taskbee::engine::{AgentEvent, ChannelSink};
use tokio::io::{AsyncBufReadExt, BufReader};

fn render(event: &AgentEvent) -> String {
    match event {
        AgentEvent::Thinking { text } => format!("💭 {}", text),
        AgentEvent::ToolCall { tool, params } => format!("🔧 {} {}", tool, params),
        AgentEvent::Confirmation { request } => format!(
            "⚠️  Confirmation required\n{}\nProceed? [y/n]",
            request.content
        ),
        AgentEvent::Progress {
            label,
            current,
            total,
        } => format!("[{}/{}] {}", current, total, label),
        AgentEvent::Response { text } => format!("\n{}\n", text),
        AgentEvent::Error { text } => format!("❌ {}", text),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    taskbee::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    let components = create_agent_components(&cfg).context("Failed to create agent")?;

    let (sink, mut events) = ChannelSink::channel();
    let (cmd_tx, agent) = spawn_agent(components, Arc::new(sink));

    // 事件打印；收到确认请求时置位，下一行输入按 y/n 解释
    let awaiting = Arc::new(AtomicBool::new(false));
    let printer = {
        let awaiting = awaiting.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if matches!(event, AgentEvent::Confirmation { .. }) {
                    awaiting.store(true, Ordering::SeqCst);
                }
                println!("{}", render(&event));
            }
        })
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                if cmd_tx.send(Command::Cancel).is_err() {
                    break;
                }
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let cmd = if awaiting.swap(false, Ordering::SeqCst) {
                    match line.to_lowercase().as_str() {
                        "y" | "yes" => Command::Approve,
                        _ => Command::Deny,
                    }
                } else if matches!(line, "exit" | "quit") {
                    break;
                } else {
                    Command::Submit(line.to_string())
                };
                if cmd_tx.send(cmd).is_err() {
                    break;
                }
            }
        }
    }

    let _ = cmd_tx.send(Command::Quit);
    drop(cmd_tx);
    agent.await.context("Agent task failed")?;
    printer.await.context("Printer task failed")?;
    Ok(())
}
