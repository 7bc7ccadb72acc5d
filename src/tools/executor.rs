//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时。execute(tool_name, args) 永不向外抛错：
//! 未知工具、工具返回 Err、超时、工具内部 panic 都转为 ToolResult { success: false }；
//! 每次调用输出结构化审计日志（JSON）。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde_json::Value;
use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::{Tool, ToolRegistry, ToolResult};

pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name)
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub async fn execute(&self, tool_name: &str, args: Value) -> ToolResult {
        let start = Instant::now();
        let args_preview = args_preview(&args);

        let (result, outcome) = match self.lookup(tool_name) {
            None => (
                ToolResult::err(AgentError::ToolNotFound(tool_name.to_string()).to_string()),
                "not_found",
            ),
            Some(tool) => {
                let call = AssertUnwindSafe(tool.execute(args)).catch_unwind();
                match timeout(self.timeout, call).await {
                    Ok(Ok(Ok(data))) => (ToolResult::ok(data), "ok"),
                    Ok(Ok(Err(e))) => (
                        ToolResult::err(AgentError::ToolExecutionFailed(e).to_string()),
                        "error",
                    ),
                    Ok(Err(_panic)) => (
                        ToolResult::err(
                            AgentError::ToolExecutionFailed(format!("tool '{}' panicked", tool_name))
                                .to_string(),
                        ),
                        "panic",
                    ),
                    Err(_) => (
                        ToolResult::err(AgentError::ToolTimeout(tool_name.to_string()).to_string()),
                        "timeout",
                    ),
                }
            }
        };

        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": result.success,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit, "tool");
        result
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Failing;

    #[async_trait]
    impl Tool for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        async fn execute(&self, _args: Value) -> Result<Value, String> {
            Err("disk full".to_string())
        }
    }

    struct Panicking;

    #[async_trait]
    impl Tool for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }
        fn description(&self) -> &str {
            "panics"
        }
        async fn execute(&self, _args: Value) -> Result<Value, String> {
            panic!("boom");
        }
    }

    struct Sleepy;

    #[async_trait]
    impl Tool for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        async fn execute(&self, _args: Value) -> Result<Value, String> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Value::Null)
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(Failing);
        registry.register(Panicking);
        registry.register(Sleepy);
        ToolExecutor::new(registry, 1)
    }

    #[tokio::test]
    async fn test_unknown_tool_is_failure_result() {
        let result = executor().execute("nope", Value::Null).await;
        assert!(!result.success);
        assert!(result.error_message().contains("Tool not found: nope"));
    }

    #[tokio::test]
    async fn test_tool_error_is_failure_result() {
        let result = executor().execute("failing", Value::Null).await;
        assert!(!result.success);
        assert!(result.error_message().contains("disk full"));
    }

    #[tokio::test]
    async fn test_panic_is_caught() {
        let result = executor().execute("panicking", Value::Null).await;
        assert!(!result.success);
        assert!(result.error_message().contains("panicked"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_failure_result() {
        let result = executor().execute("sleepy", Value::Null).await;
        assert!(!result.success);
        assert!(result.error_message().contains("Tool timeout"));
    }
}
