//! Shell 执行工具（shell-exec）
//!
//! 是否需要人工确认由引擎的确认策略决定；本工具只负责兜底：
//! 即使用户批准，也拒绝 rm -rf、mkfs、fork bomb 等破坏性子串。
//! 通过 sh -c / cmd /C 执行，在工作目录内运行，带超时与 tracing 审计。

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use crate::tools::Tool;

/// 禁止的命令子串
const FORBIDDEN_SUBSTR: &[&str] = &[
    "rm -rf /",
    "rm -fr /",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    "chmod 777 /",
    "curl | sh",
    "wget -o- | sh",
    ":(){ :|:& };:",
];

pub struct ShellTool {
    working_dir: PathBuf,
    timeout_secs: u64,
}

impl ShellTool {
    pub fn new(working_dir: impl AsRef<Path>, timeout_secs: u64) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
            timeout_secs: timeout_secs.max(1),
        }
    }

    fn check_forbidden(raw: &str) -> Result<(), String> {
        let lower = raw.to_lowercase();
        if let Some(pattern) = FORBIDDEN_SUBSTR.iter().find(|p| lower.contains(*p)) {
            return Err(format!("Forbidden pattern: {}", pattern));
        }
        Ok(())
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell-exec"
    }

    fn description(&self) -> &str {
        "Run a shell command in the workspace. Read-only commands (ls, cat, grep, git status, ...) run directly; anything else asks the user first."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "The shell command to execute" }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        if command.is_empty() {
            return Err("Empty command".to_string());
        }
        Self::check_forbidden(command)?;

        tracing::info!(command = %command, "shell-exec tool execute");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.current_dir(&self.working_dir).kill_on_drop(true);

        let output = tokio::time::timeout(Duration::from_secs(self.timeout_secs), cmd.output())
            .await
            .map_err(|_| format!("Command timed out after {}s", self.timeout_secs))?
            .map_err(|e| format!("Execution failed: {}", e))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            return Err(format!(
                "Exit {}\nstderr: {}",
                output.status.code().map_or("signal".to_string(), |c| c.to_string()),
                stderr.trim()
            ));
        }
        Ok(serde_json::json!({
            "exit_code": output.status.code().unwrap_or(0),
            "stdout": stdout,
            "stderr": stderr,
        }))
    }
}
