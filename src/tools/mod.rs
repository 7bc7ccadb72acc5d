//! 工具层：Tool trait、注册表、执行器，以及文件、Shell、网页抓取等具体工具

pub mod executor;
pub mod filesystem;
pub mod registry;
pub mod search;
pub mod shell;

pub use executor::ToolExecutor;
pub use filesystem::{ListDirectoryTool, ReadFileTool, SafeFs, WriteFileTool};
pub use registry::{Tool, ToolRegistry, ToolResult};
pub use search::WebFetchTool;
pub use shell::ShellTool;
