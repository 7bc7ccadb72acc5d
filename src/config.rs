//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TASKBEE__*` 覆盖（双下划线表示嵌套，如 `TASKBEE__AGENT__MAX_ITERATIONS=5`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub agent: AgentSection,
}

/// [app] 段：应用名、工作目录、对话轮数上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 工作目录（文件工具沙箱根、shell 工作目录），未设置时用 ./workspace
    pub workspace_root: Option<PathBuf>,
    /// 对话历史保留轮数
    pub max_context_turns: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            workspace_root: None,
            max_context_turns: 20,
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub deepseek: LlmModelOverride,
    pub openai: LlmModelOverride,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: "deepseek-chat".to_string(),
            base_url: None,
            deepseek: LlmModelOverride::default(),
            openai: LlmModelOverride::default(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmModelOverride {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次模型请求超时（秒）
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// [tools] 段：工具超时与网页抓取设置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    pub search: SearchSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            search: SearchSection::default(),
        }
    }
}

/// [tools.search] 段：web-fetch 的超时、最大字符数、域名白名单
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub timeout_secs: u64,
    pub max_result_chars: usize,
    pub allowed_domains: Vec<String>,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            max_result_chars: 8000,
            allowed_domains: [
                "wikipedia.org",
                "github.com",
                "raw.githubusercontent.com",
                "stackoverflow.com",
                "docs.rs",
                "crates.io",
                "doc.rust-lang.org",
                "docs.python.org",
                "developer.mozilla.org",
                "arxiv.org",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// [agent] 段：任务引擎的迭代上限、历史窗口、采样参数、确认策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// 反思 + 恢复共享的全局迭代上限
    pub max_iterations: usize,
    /// 规划时带入的最近对话条数
    pub history_window: usize,
    /// 单次反思最多插入的步骤数
    pub max_reflection_steps: usize,
    /// 单次恢复最多插入的步骤数
    pub max_recovery_steps: usize,
    /// 同一原始步骤最多触发几轮恢复（恢复步骤再失败算同一条链）
    pub max_recovery_attempts: usize,
    /// 规划/反思/恢复使用的温度
    pub temperature: f32,
    /// 最终回答合成使用的温度
    pub synthesis_temperature: f32,
    pub max_tokens: u32,
    pub confirmation: ConfirmationSection,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            history_window: 3,
            max_reflection_steps: 3,
            max_recovery_steps: 2,
            max_recovery_attempts: 2,
            temperature: 0.2,
            synthesis_temperature: 0.7,
            max_tokens: 2048,
            confirmation: ConfirmationSection::default(),
        }
    }
}

/// [agent.confirmation] 段：敏感工具集合、shell 工具名、只读命令白名单
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConfirmationSection {
    pub sensitive_tools: Vec<String>,
    pub shell_tool: String,
    pub read_only_commands: Vec<String>,
}

impl Default for ConfirmationSection {
    fn default() -> Self {
        let policy = crate::engine::ConfirmationPolicy::default();
        Self {
            sensitive_tools: policy.sensitive_tools().map(String::from).collect(),
            shell_tool: policy.shell_tool().to_string(),
            read_only_commands: policy.read_only_commands().map(String::from).collect(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 TASKBEE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TASKBEE__*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found, skipped");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TASKBEE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
