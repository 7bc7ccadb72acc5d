//! DeepSeek 预设（OpenAI 兼容格式）
//!
//! - Base URL: https://api.deepseek.com
//! - 模型: deepseek-chat（默认）, deepseek-reasoner（思考模式，规划 JSON 输出不稳定，不推荐用于任务引擎）

use crate::llm::OpenAiClient;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";
pub const DEEPSEEK_REASONER: &str = "deepseek-reasoner";

/// 创建 DeepSeek 客户端：Key 取 `DEEPSEEK_API_KEY`，缺省回退 `OPENAI_API_KEY`；
/// 模型取参数，其次 `DEEPSEEK_MODEL` 环境变量，最后 deepseek-chat
pub fn create_deepseek_client(model: Option<&str>, request_timeout_secs: u64) -> OpenAiClient {
    let api_key = std::env::var("DEEPSEEK_API_KEY")
        .ok()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .unwrap_or_else(|| "sk-placeholder".to_string());

    let model = model
        .map(String::from)
        .or_else(|| std::env::var("DEEPSEEK_MODEL").ok())
        .unwrap_or_else(|| DEEPSEEK_CHAT.to_string());

    OpenAiClient::new(Some(DEEPSEEK_BASE_URL), &model, Some(api_key.as_str()))
        .with_request_timeout(request_timeout_secs)
}
