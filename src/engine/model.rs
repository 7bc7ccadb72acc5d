//! 可取消的模型调用

use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::llm::{CompletionOptions, LlmClient};
use crate::memory::Message;

/// 调用模型；取消令牌先触发时立即返回 Cancelled，不等待在途请求
pub async fn ask_model(
    llm: &dyn LlmClient,
    messages: &[Message],
    options: &CompletionOptions,
    cancel: &CancellationToken,
) -> Result<String, AgentError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AgentError::Cancelled),
        reply = llm.complete(messages, options) => reply.map_err(AgentError::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, ScriptedLlmClient};

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let llm = ScriptedLlmClient::new(["unused"]);
        let token = CancellationToken::new();
        token.cancel();
        let err = ask_model(&llm, &[Message::user("hi")], &CompletionOptions::default(), &token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(llm.remaining(), 1);
    }

    #[tokio::test]
    async fn test_llm_error_wrapped() {
        let llm = ScriptedLlmClient::new(Vec::<String>::new());
        llm.push_error(LlmError::EmptyResponse);
        let err = ask_model(
            &llm,
            &[Message::user("hi")],
            &CompletionOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AgentError::Llm(LlmError::EmptyResponse)));
    }
}
