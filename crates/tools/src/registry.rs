//! Tool Registry
//!
//! Manages tool registration, discovery, and execution.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use voice_gateway_config::{ToolSettings, TwilioConfig};
use voice_gateway_core::EventPublisher;
use voice_gateway_persistence::ConversationStore;

use crate::schema::{Tool, ToolSchema};
use crate::ToolError;

/// Tool registry
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Schemas of every tool, sorted by name
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values().map(|t| t.schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Execute a tool with timeout protection
    pub async fn execute(&self, name: &str, arguments: Value) -> Result<String, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::not_found(name))?;

        tool.validate(&arguments)?;

        let timeout_secs = tool.timeout_secs();
        tracing::trace!(tool = name, timeout_secs, "Executing tool with timeout");

        match tokio::time::timeout(Duration::from_secs(timeout_secs), tool.execute(arguments)).await
        {
            Ok(result) => result,
            Err(_elapsed) => Err(ToolError::timeout(name, timeout_secs)),
        }
    }
}

/// Registry with every built-in tool
pub fn create_registry(
    store: Arc<dyn ConversationStore>,
    publisher: Arc<dyn EventPublisher>,
    settings: &ToolSettings,
    twilio: &TwilioConfig,
    demo: bool,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(crate::notes::TakeNoteTool::new(store.clone()));
    registry.register(crate::notes::SearchNotesTool::new(store));
    registry.register(crate::filesystem::ReadFileTool::new(
        settings.allowed_paths.clone(),
        settings.max_read_lines,
    ));
    registry.register(crate::filesystem::WriteFileTool::new(
        settings.allowed_paths.clone(),
    ));
    registry.register(crate::shell::RunCommandTool::new(settings, demo));
    registry.register(crate::integrations::SendSmsTool::new(twilio, demo));
    registry.register(crate::integrations::PublishMessageTool::new(
        publisher.clone(),
        demo,
    ));
    registry.register(crate::integrations::StatusTool::new(publisher, demo));

    tracing::info!(
        tool_count = registry.len(),
        allowed_paths = ?settings.allowed_paths,
        demo,
        "Created tool registry"
    );

    registry
}
