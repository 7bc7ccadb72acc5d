//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient::complete：
//! 输入消息列表与采样参数，返回生成文本；失败以 LlmError 表示，由引擎捕获并转换。

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Message;

/// 模型调用失败（传输错误、超时、空回复等）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("model returned an empty response")]
    EmptyResponse,

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// 单次调用的采样参数
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    /// 覆盖客户端默认模型；None 表示使用客户端配置的模型
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.2,
            max_tokens: 2048,
        }
    }
}

impl CompletionOptions {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<String, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
