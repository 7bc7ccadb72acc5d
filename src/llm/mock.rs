//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! - MockLlmClient：回显最后一条 User 消息；规划时不是合法 JSON，引擎会回退为单步分析任务，
//!   因此离线也能跑通完整流程。
//! - ScriptedLlmClient：按顺序返回预置回复（或错误），并记录每次调用的消息，供测试断言。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{CompletionOptions, LlmClient, LlmError};
use crate::memory::{Message, Role};

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<String, LlmError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        let first_line = last_user.lines().next().unwrap_or_default();
        Ok(format!("Echo from Mock: {}", first_line))
    }
}

/// 脚本化客户端：依次弹出预置回复；脚本耗尽后返回 Transport 错误
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(|s| Ok(s.into())).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// 追加一条回复
    pub fn push_response(&self, response: impl Into<String>) {
        if let Ok(mut q) = self.responses.lock() {
            q.push_back(Ok(response.into()));
        }
    }

    /// 追加一次失败
    pub fn push_error(&self, error: LlmError) {
        if let Ok(mut q) = self.responses.lock() {
            q.push_back(Err(error));
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// 第 index 次调用时发送的消息
    pub fn call(&self, index: usize) -> Option<Vec<Message>> {
        self.calls.lock().ok().and_then(|c| c.get(index).cloned())
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().map(|q| q.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<String, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }
        self.responses
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or_else(|| Err(LlmError::Transport("script exhausted".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_echoes_last_user_message() {
        let client = MockLlmClient;
        let messages = vec![
            Message::system("planning instructions"),
            Message::user("first"),
            Message::user("list files\nmore context"),
        ];
        let out = client
            .complete(&messages, &CompletionOptions::default())
            .await
            .unwrap();
        assert_eq!(out, "Echo from Mock: list files");
    }

    #[tokio::test]
    async fn test_scripted_pops_in_order_then_fails() {
        let client = ScriptedLlmClient::new(["one", "two"]);
        client.push_error(LlmError::Timeout(5));
        let opts = CompletionOptions::default();
        let msgs = vec![Message::user("hi")];

        assert_eq!(client.complete(&msgs, &opts).await.unwrap(), "one");
        assert_eq!(client.complete(&msgs, &opts).await.unwrap(), "two");
        assert_eq!(
            client.complete(&msgs, &opts).await,
            Err(LlmError::Timeout(5))
        );
        assert!(matches!(
            client.complete(&msgs, &opts).await,
            Err(LlmError::Transport(_))
        ));
        assert_eq!(client.call_count(), 4);
        assert_eq!(client.call(0).unwrap()[0].content, "hi");
    }
}
