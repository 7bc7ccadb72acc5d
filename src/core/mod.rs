//! 核心层：错误分类与运行取消监管

pub mod error;
pub mod session_supervisor;

pub use error::AgentError;
pub use session_supervisor::SessionSupervisor;
