//! File tools restricted to allowed roots
//!
//! Paths are normalised and resolved through the deepest existing ancestor
//! before the root check, so `..` segments and symlinks cannot escape.

use async_trait::async_trait;
use serde_json::Value;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use crate::schema::{required_str, InputSchema, PropertySchema, Tool, ToolSchema};
use crate::ToolError;

/// Lexically remove `.` and `..` components
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonical form of a path that may not exist yet
async fn resolve(path: &Path) -> PathBuf {
    let lexical = normalize(path);
    let mut existing = lexical.clone();
    let mut missing: Vec<OsString> = Vec::new();

    loop {
        if let Ok(canonical) = tokio::fs::canonicalize(&existing).await {
            let mut resolved = canonical;
            for part in missing.iter().rev() {
                resolved.push(part);
            }
            return resolved;
        }
        match existing.file_name() {
            Some(name) => {
                missing.push(name.to_owned());
                existing.pop();
            }
            None => return lexical,
        }
    }
}

/// Path sandbox shared by the file tools
#[derive(Debug, Clone)]
struct Sandbox {
    allowed: Vec<String>,
}

impl Sandbox {
    /// Resolve `requested` and check it lies under an allowed root.
    /// Relative paths are taken from the first root.
    async fn check(&self, requested: &str) -> Result<PathBuf, ToolError> {
        let denied = || {
            ToolError::execution(format!(
                "Path not allowed. Must be within: {}",
                self.allowed.join(", ")
            ))
        };

        let raw = Path::new(requested);
        let absolute = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            match self.allowed.first() {
                Some(root) => Path::new(root).join(raw),
                None => return Err(denied()),
            }
        };

        let resolved = resolve(&absolute).await;
        for root in &self.allowed {
            if resolved.starts_with(resolve(Path::new(root)).await) {
                return Ok(resolved);
            }
        }

        tracing::warn!(path = %requested, "File access outside allowed paths");
        Err(denied())
    }
}

pub struct ReadFileTool {
    sandbox: Sandbox,
    default_max_lines: usize,
}

impl ReadFileTool {
    pub fn new(allowed_paths: Vec<String>, default_max_lines: usize) -> Self {
        Self {
            sandbox: Sandbox {
                allowed: allowed_paths,
            },
            default_max_lines,
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file. Path must be within allowed directories."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: InputSchema::object()
                .property("path", PropertySchema::string("Absolute path to the file to read"), true)
                .property(
                    "max_lines",
                    PropertySchema::integer("Maximum number of lines to read (default: 200)"),
                    false,
                )
                .build(),
        }
    }

    async fn execute(&self, input: Value) -> Result<String, ToolError> {
        let requested = required_str(&input, "path")?;
        let max_lines = input
            .get("max_lines")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(self.default_max_lines);

        let path = self.sandbox.check(requested).await?;

        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|_| ToolError::execution(format!("File not found: {}", requested)))?;
        if !metadata.is_file() {
            return Err(ToolError::execution(format!("Not a file: {}", requested)));
        }

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| ToolError::execution(format!("Error reading file: {}", e)))?;
        let text = String::from_utf8_lossy(&bytes);
        let lines: Vec<&str> = text.lines().collect();

        if lines.is_empty() {
            return Ok("(empty file)".to_string());
        }
        if lines.len() > max_lines {
            return Ok(format!(
                "{}\n... ({} more lines)",
                lines[..max_lines].join("\n"),
                lines.len() - max_lines
            ));
        }
        Ok(lines.join("\n"))
    }

    fn timeout_secs(&self) -> u64 {
        10
    }
}

pub struct WriteFileTool {
    sandbox: Sandbox,
}

impl WriteFileTool {
    pub fn new(allowed_paths: Vec<String>) -> Self {
        Self {
            sandbox: Sandbox {
                allowed: allowed_paths,
            },
        }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file. Creates parent directories if needed. Path must be within allowed directories."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: InputSchema::object()
                .property("path", PropertySchema::string("Absolute path to write to"), true)
                .property("content", PropertySchema::string("Content to write to the file"), true)
                .build(),
        }
    }

    async fn execute(&self, input: Value) -> Result<String, ToolError> {
        let requested = required_str(&input, "path")?;
        let content = required_str(&input, "content")?;

        let path = self.sandbox.check(requested).await?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::execution(format!("Error writing file: {}", e)))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| ToolError::execution(format!("Error writing file: {}", e)))?;

        tracing::info!(path = %path.display(), bytes = content.len(), "File written");
        Ok(format!("Written {} bytes to {}", content.len(), requested))
    }

    fn timeout_secs(&self) -> u64 {
        10
    }
}
