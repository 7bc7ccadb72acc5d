//! 引擎通知：思考、工具调用、确认请求、进度、最终回复、错误
//!
//! 编排器只依赖 NotificationSink trait；终端、测试或其他前端各自实现。
//! ChannelSink 把回调转成可序列化的 AgentEvent 发到 mpsc 通道。

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::engine::ConfirmationRequest;

/// 通知回调；调用顺序即事件发生顺序
pub trait NotificationSink: Send + Sync {
    fn on_thinking(&self, text: &str);
    fn on_tool_call(&self, tool: &str, params: &Value);
    fn on_confirmation(&self, request: &ConfirmationRequest);
    /// 进度：规划算第 1 步，共 N+1 步
    fn on_progress(&self, label: &str, current: usize, total: usize);
    fn on_response(&self, text: &str);
    fn on_error(&self, text: &str);
}

/// 引擎事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Thinking { text: String },
    ToolCall { tool: String, params: Value },
    Confirmation { request: ConfirmationRequest },
    Progress {
        label: String,
        current: usize,
        total: usize,
    },
    Response { text: String },
    Error { text: String },
}

/// 把通知转发到通道；接收端关闭后静默丢弃
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<AgentEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<AgentEvent>) -> Self {
        Self { tx }
    }

    /// 新建通道并返回 (sink, receiver)
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn send(&self, event: AgentEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("event receiver dropped");
        }
    }
}

impl NotificationSink for ChannelSink {
    fn on_thinking(&self, text: &str) {
        self.send(AgentEvent::Thinking {
            text: text.to_string(),
        });
    }

    fn on_tool_call(&self, tool: &str, params: &Value) {
        self.send(AgentEvent::ToolCall {
            tool: tool.to_string(),
            params: params.clone(),
        });
    }

    fn on_confirmation(&self, request: &ConfirmationRequest) {
        self.send(AgentEvent::Confirmation {
            request: request.clone(),
        });
    }

    fn on_progress(&self, label: &str, current: usize, total: usize) {
        self.send(AgentEvent::Progress {
            label: label.to_string(),
            current,
            total,
        });
    }

    fn on_response(&self, text: &str) {
        self.send(AgentEvent::Response {
            text: text.to_string(),
        });
    }

    fn on_error(&self, text: &str) {
        self.send(AgentEvent::Error {
            text: text.to_string(),
        });
    }
}

/// 忽略所有通知
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl NotificationSink for NoopSink {
    fn on_thinking(&self, _text: &str) {}
    fn on_tool_call(&self, _tool: &str, _params: &Value) {}
    fn on_confirmation(&self, _request: &ConfirmationRequest) {}
    fn on_progress(&self, _label: &str, _current: usize, _total: usize) {}
    fn on_response(&self, _text: &str) {}
    fn on_error(&self, _text: &str) {}
}
