//! 确认策略：判断一次工具调用能否自动执行
//!
//! 敏感工具（写文件、执行 shell）默认需要人工确认；shell 工具额外检查命令：
//! 命令（小写、去空白）按整词前缀命中只读白名单（如 `ls`、`git status`）且不含管道/重定向/串联时放行。
//! 纯函数，无副作用。

use std::collections::BTreeSet;

use serde_json::Value;

use crate::config::ConfirmationSection;

const DEFAULT_SENSITIVE_TOOLS: &[&str] = &["write-file", "edit-file", "delete-file", "shell-exec"];

const DEFAULT_SHELL_TOOL: &str = "shell-exec";

const DEFAULT_READ_ONLY_COMMANDS: &[&str] = &[
    "ls", "pwd", "cat", "head", "tail", "wc", "echo", "grep", "which", "whoami", "date", "tree",
    "du", "df", "file", "stat", "git status", "git log", "git diff", "git show",
];

/// 出现即视为可能有副作用的 shell 元字符
const SHELL_METACHARS: &[&str] = &[";", "&&", "||", "|", ">", "<", "`", "$("];

#[derive(Debug, Clone)]
pub struct ConfirmationPolicy {
    sensitive_tools: BTreeSet<String>,
    shell_tool: String,
    /// 每项按空白切分后的词序列
    read_only_commands: Vec<Vec<String>>,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_SENSITIVE_TOOLS.iter().copied(),
            DEFAULT_SHELL_TOOL,
            DEFAULT_READ_ONLY_COMMANDS.iter().copied(),
        )
    }
}

impl ConfirmationPolicy {
    pub fn new<'a>(
        sensitive_tools: impl IntoIterator<Item = &'a str>,
        shell_tool: &str,
        read_only_commands: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Self {
            sensitive_tools: sensitive_tools.into_iter().map(String::from).collect(),
            shell_tool: shell_tool.to_string(),
            read_only_commands: read_only_commands
                .into_iter()
                .map(|c| {
                    c.to_lowercase()
                        .split_whitespace()
                        .map(String::from)
                        .collect::<Vec<_>>()
                })
                .filter(|words| !words.is_empty())
                .collect(),
        }
    }

    pub fn from_config(section: &ConfirmationSection) -> Self {
        Self::new(
            section.sensitive_tools.iter().map(String::as_str),
            &section.shell_tool,
            section.read_only_commands.iter().map(String::as_str),
        )
    }

    pub fn sensitive_tools(&self) -> impl Iterator<Item = &str> {
        self.sensitive_tools.iter().map(String::as_str)
    }

    pub fn shell_tool(&self) -> &str {
        &self.shell_tool
    }

    pub fn read_only_commands(&self) -> impl Iterator<Item = String> + '_ {
        self.read_only_commands.iter().map(|words| words.join(" "))
    }

    pub fn is_sensitive(&self, tool_name: &str) -> bool {
        self.sensitive_tools.contains(tool_name)
    }

    /// 是否需要人工确认
    pub fn requires_confirmation(&self, tool_name: &str, parameters: &Value) -> bool {
        if !self.is_sensitive(tool_name) {
            return false;
        }
        if tool_name != self.shell_tool {
            return true;
        }
        let command = parameters
            .get("command")
            .and_then(Value::as_str)
            .map(|c| c.trim().to_lowercase())
            .unwrap_or_default();
        !self.is_read_only_command(&command)
    }

    fn is_read_only_command(&self, command: &str) -> bool {
        if command.is_empty() || SHELL_METACHARS.iter().any(|m| command.contains(m)) {
            return false;
        }
        let words: Vec<&str> = command.split_whitespace().collect();
        self.read_only_commands.iter().any(|allowed| {
            words.len() >= allowed.len()
                && allowed.iter().zip(&words).all(|(a, w)| a == w)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generic_sensitive_tools_always_confirm() {
        let policy = ConfirmationPolicy::default();
        for tool in ["write-file", "edit-file", "delete-file"] {
            assert!(policy.requires_confirmation(tool, &json!({})));
            assert!(policy.requires_confirmation(tool, &json!({"command": "ls"})));
            assert!(policy.requires_confirmation(tool, &Value::Null));
        }
    }

    #[test]
    fn test_shell_allow_list() {
        let policy = ConfirmationPolicy::default();
        assert!(!policy.requires_confirmation("shell-exec", &json!({"command": "git status"})));
        assert!(!policy.requires_confirmation("shell-exec", &json!({"command": "  LS -la  "})));
        assert!(!policy.requires_confirmation("shell-exec", &json!({"command": "git log --oneline -5"})));
        assert!(policy.requires_confirmation("shell-exec", &json!({"command": "rm -rf /"})));
        assert!(policy.requires_confirmation("shell-exec", &json!({"command": "git push"})));
        assert!(policy.requires_confirmation("shell-exec", &json!({"command": "lsblk"})));
        assert!(policy.requires_confirmation("shell-exec", &json!({"command": "git"})));
    }

    #[test]
    fn test_shell_empty_or_missing_command_requires_confirmation() {
        let policy = ConfirmationPolicy::default();
        assert!(policy.requires_confirmation("shell-exec", &json!({"command": ""})));
        assert!(policy.requires_confirmation("shell-exec", &json!({"command": "   "})));
        assert!(policy.requires_confirmation("shell-exec", &json!({})));
        assert!(policy.requires_confirmation("shell-exec", &json!({"command": 42})));
    }

    #[test]
    fn test_shell_chaining_requires_confirmation() {
        let policy = ConfirmationPolicy::default();
        assert!(policy.requires_confirmation("shell-exec", &json!({"command": "ls; rm -rf ~"})));
        assert!(policy.requires_confirmation("shell-exec", &json!({"command": "cat a > b"})));
        assert!(policy.requires_confirmation("shell-exec", &json!({"command": "echo $(reboot)"})));
    }

    #[test]
    fn test_non_sensitive_tools_never_confirm() {
        let policy = ConfirmationPolicy::default();
        assert!(!policy.requires_confirmation("read-file", &json!({"path": "x"})));
        assert!(!policy.requires_confirmation("unknown-tool", &Value::Null));
    }

    #[test]
    fn test_from_config() {
        let section = ConfirmationSection {
            sensitive_tools: vec!["deploy".into(), "run".into()],
            shell_tool: "run".into(),
            read_only_commands: vec!["kubectl get".into()],
        };
        let policy = ConfirmationPolicy::from_config(&section);
        assert!(policy.requires_confirmation("deploy", &json!({})));
        assert!(!policy.requires_confirmation("run", &json!({"command": "kubectl get pods"})));
        assert!(policy.requires_confirmation("run", &json!({"command": "kubectl delete pod x"})));
        assert!(!policy.requires_confirmation("shell-exec", &json!({"command": "rm x"})));
    }
}
