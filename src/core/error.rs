//! Agent 错误类型
//!
//! 引擎内部的错误分类：模型调用失败、工具失败、取消、规划/合成失败等。
//! 大部分错误会在编排器内被吸收（转为步骤失败或降级），只有规划/合成阶段的模型失败、
//! 恢复耗尽与用户取消会作为任务级错误呈现给用户。

use thiserror::Error;

use crate::llm::LlmError;

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Cancelled by user")]
    Cancelled,

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// 初始规划阶段模型调用失败（解析失败不算，解析失败会回退为单步任务）
    #[error("Planning failed: {0}")]
    PlanningFailed(String),

    #[error("Synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    /// 步骤失败且恢复规划器未给出替代步骤
    #[error("Step '{step}' failed and no recovery was possible: {reason}")]
    RecoveryExhausted { step: String, reason: String },

    #[error("No task is waiting for confirmation")]
    NoPendingConfirmation,

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Path escape attempt: {0}")]
    PathEscape(String),
}

impl AgentError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AgentError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_error_converts() {
        let err: AgentError = LlmError::Timeout(30).into();
        assert!(matches!(err, AgentError::Llm(LlmError::Timeout(30))));
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_recovery_exhausted_message() {
        let err = AgentError::RecoveryExhausted {
            step: "read config".to_string(),
            reason: "Path not found: config.toml".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("read config"));
        assert!(msg.contains("Path not found"));
        assert!(!err.is_cancelled());
        assert!(AgentError::Cancelled.is_cancelled());
    }
}
