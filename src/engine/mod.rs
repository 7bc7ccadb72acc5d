//! 任务执行引擎：规划、逐步执行、反思、失败恢复、人工确认与最终合成

pub mod events;
pub mod executor;
pub mod formatter;
pub mod model;
pub mod orchestrator;
pub mod parse;
pub mod planner;
pub mod policy;
pub mod recovery;
pub mod reflector;
pub mod task;

pub use events::{AgentEvent, ChannelSink, NoopSink, NotificationSink};
pub use executor::{StepExecutor, StepOutcome};
pub use formatter::{format_result, format_results};
pub use orchestrator::{EngineSettings, OrchestratorState, TaskOrchestrator, TaskOutcome};
pub use parse::{parse_structured, ParseOutcome};
pub use planner::TaskPlanner;
pub use policy::ConfirmationPolicy;
pub use recovery::RecoveryPlanner;
pub use reflector::{Reflection, Reflector};
pub use task::{ConfirmationRequest, Step, StepAction, StepStatus, Task, TaskStatus};
