use async_trait::async_trait;
use serde_json::Value;

use crate::error::{AgentError, FetchError, SearchError};

/// Why a tool call produced no output.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The model sent arguments the tool cannot use. Reported back to the model.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unknown tool: {0}")]
    Unknown(String),
    /// A capability behind the tool failed. Aborts the run.
    #[error(transparent)]
    Failed(#[from] AgentError),
}

impl From<SearchError> for ToolError {
    fn from(e: SearchError) -> Self {
        ToolError::Failed(e.into())
    }
}

impl From<FetchError> for ToolError {
    fn from(e: FetchError) -> Self {
        ToolError::Failed(e.into())
    }
}

/// A tool's execution handler. Consumers implement this for each tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, input: &Value) -> Result<String, ToolError>;
}

/// A tool definition: schema for the LLM + handler for execution.
pub struct ToolDef {
    pub name: String,
    pub schema: Value,
    pub(crate) handler: Box<dyn ToolHandler>,
}
