use serde_json::Value;

use super::handler::{ToolDef, ToolError, ToolHandler};

/// Catalog of tools offered to a tool-calling model. Stores definitions,
/// provides schemas and looks up handlers by name.
pub struct ToolRegistry {
    tools: Vec<ToolDef>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Register a tool. The schema is the complete JSON tool definition
    /// (name, description, input_schema) sent to the LLM.
    pub fn add(
        mut self,
        name: impl Into<String>,
        schema: Value,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        self.tools.push(ToolDef {
            name: name.into(),
            schema,
            handler: Box::new(handler),
        });
        self
    }

    /// All tool schemas for the LLM API request.
    pub fn schemas(&self) -> Vec<Value> {
        self.tools.iter().map(|t| t.schema.clone()).collect()
    }

    /// Run a tool by name.
    pub async fn execute(&self, name: &str, input: &Value) -> Result<String, ToolError> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))?;
        tool.handler.call(input).await
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
