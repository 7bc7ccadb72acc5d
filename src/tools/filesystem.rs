//! 沙箱文件系统工具
//!
//! SafeFs 绑定 root_dir，所有路径必须落在 root 下（禁止 ../ 逃逸）；
//! ReadFileTool / ListDirectoryTool / WriteFileTool 基于 SafeFs 提供 read-file / list-directory / write-file。
//! write-file 属于敏感工具，由确认策略拦截后才会执行。

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use crate::core::AgentError;
use crate::tools::Tool;

/// 沙箱文件系统：绑定根目录，校验路径在根下
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 解析已存在的路径：canonicalize 后必须仍在根目录内
    pub fn resolve(&self, path: &str) -> Result<PathBuf, AgentError> {
        let path = path.trim_start_matches("./");
        let full = self.root_dir.join(path);
        let canonical = full
            .canonicalize()
            .map_err(|_| AgentError::ToolExecutionFailed(format!("Path not found: {}", path)))?;
        if canonical.starts_with(&self.root_dir) {
            Ok(canonical)
        } else {
            Err(AgentError::PathEscape(path.to_string()))
        }
    }

    /// 解析写入目标（文件可以不存在）：按词法拒绝绝对路径与 `..`
    pub fn resolve_for_write(&self, path: &str) -> Result<PathBuf, AgentError> {
        let rel = Path::new(path.trim_start_matches("./"));
        if path.trim().is_empty() {
            return Err(AgentError::ToolExecutionFailed("Empty path".to_string()));
        }
        for component in rel.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(AgentError::PathEscape(path.to_string())),
            }
        }
        Ok(self.root_dir.join(rel))
    }

    pub fn read_file(&self, path: &str) -> Result<String, AgentError> {
        let resolved = self.resolve(path)?;
        std::fs::read_to_string(&resolved)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Read failed: {}", e)))
    }

    /// 列出目录项：(名称, "file" | "directory")，按名称排序，跳过隐藏文件
    pub fn list_dir(&self, path: &str) -> Result<Vec<(String, &'static str)>, AgentError> {
        let base = if path.is_empty() || path == "." {
            self.root_dir.clone()
        } else {
            self.resolve(path)?
        };
        let read_dir = std::fs::read_dir(&base)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("List failed: {}", e)))?;
        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| AgentError::ToolExecutionFailed(e.to_string()))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let kind = if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                "directory"
            } else {
                "file"
            };
            entries.push((name, kind));
        }
        entries.sort();
        Ok(entries)
    }

    pub fn write_file(&self, path: &str, content: &str) -> Result<PathBuf, AgentError> {
        let target = self.resolve_for_write(path)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AgentError::ToolExecutionFailed(format!("Failed to create parent directory: {}", e))
            })?;
        }
        std::fs::write(&target, content)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Write failed: {}", e)))?;
        Ok(target)
    }
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

/// read-file：读取文件内容
pub struct ReadFileTool {
    fs: SafeFs,
}

impl ReadFileTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read-file"
    }

    fn description(&self) -> &str {
        "Read a text file from the workspace."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path relative to the workspace" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let path = str_arg(&args, "path").ok_or("Missing 'path' parameter")?;
        tracing::info!(path = %path, "read-file tool execute");
        self.fs
            .read_file(path)
            .map(Value::String)
            .map_err(|e| e.to_string())
    }
}

/// list-directory：列出目录，返回 [{name, type}]
pub struct ListDirectoryTool {
    fs: SafeFs,
}

impl ListDirectoryTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list-directory"
    }

    fn description(&self) -> &str {
        "List the entries of a workspace directory (default '.')."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory path relative to the workspace" }
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let path = str_arg(&args, "path").unwrap_or(".");
        tracing::info!(path = %path, "list-directory tool execute");
        let entries = self.fs.list_dir(path).map_err(|e| e.to_string())?;
        Ok(Value::Array(
            entries
                .into_iter()
                .map(|(name, kind)| serde_json::json!({ "name": name, "type": kind }))
                .collect(),
        ))
    }
}

/// write-file：创建或覆盖文件（敏感，需确认）
pub struct WriteFileTool {
    fs: SafeFs,
}

impl WriteFileTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write-file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a workspace file with the given content. Parent directories are created."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path relative to the workspace" },
                "content": { "type": "string", "description": "Full file content" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let path = str_arg(&args, "path").ok_or("Missing 'path' parameter")?;
        let content = str_arg(&args, "content").ok_or("Missing 'content' parameter")?;
        tracing::info!(path = %path, bytes = content.len(), "write-file tool execute");
        self.fs.write_file(path, content).map_err(|e| e.to_string())?;
        Ok(serde_json::json!({ "path": path, "bytes_written": content.len() }))
    }
}
