//! taskbee - 终端助手的自主任务执行引擎
//!
//! 模块划分：
//! - **agent**: 无头 Agent 运行时（组件构建 + 命令循环）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、运行取消监管
//! - **engine**: 规划、逐步执行、反思、恢复、确认与合成
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 短期对话历史
//! - **observability**: 日志初始化
//! - **tools**: 工具箱（文件读写、目录列表、shell、网页抓取）与执行器

pub mod agent;
pub mod config;
pub mod core;
pub mod engine;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod tools;
