pub mod openai;
pub mod sse;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{AgentError, GenerationError};
use crate::tools::ToolRegistry;
use crate::types::{StructuredRequest, ToolCallingRequest, ToolRunSummary};

/// Growing partial parses of one structured response. Each element knows
/// at least as much as the one before it.
pub type PartialObjectStream = BoxStream<'static, Result<Value, GenerationError>>;

/// Prompt + schema in, object out. No state, no history.
#[async_trait]
pub trait StructuredGenerator: Send + Sync {
    /// One-shot generation of a complete object.
    async fn generate(&self, request: StructuredRequest) -> Result<Value, GenerationError>;

    /// Stream partial objects as the response is generated.
    async fn stream(&self, request: StructuredRequest) -> Result<PartialObjectStream, GenerationError>;
}

/// A model that may call tools before producing a structured object.
#[async_trait]
pub trait ToolCallingModel: Send + Sync {
    /// Run the tool loop for at most `request.max_steps` model calls.
    ///
    /// Every partial parse of the final object is sent on `partial_output`
    /// as it arrives. Tool failures other than bad input abort the loop.
    async fn run_with_tools(
        &self,
        request: ToolCallingRequest,
        tools: &ToolRegistry,
        partial_output: mpsc::UnboundedSender<Value>,
    ) -> Result<ToolRunSummary, AgentError>;
}

#[async_trait]
impl<T: StructuredGenerator + ?Sized> StructuredGenerator for Arc<T> {
    async fn generate(&self, request: StructuredRequest) -> Result<Value, GenerationError> {
        (**self).generate(request).await
    }

    async fn stream(&self, request: StructuredRequest) -> Result<PartialObjectStream, GenerationError> {
        (**self).stream(request).await
    }
}

#[async_trait]
impl<T: ToolCallingModel + ?Sized> ToolCallingModel for Arc<T> {
    async fn run_with_tools(
        &self,
        request: ToolCallingRequest,
        tools: &ToolRegistry,
        partial_output: mpsc::UnboundedSender<Value>,
    ) -> Result<ToolRunSummary, AgentError> {
        (**self).run_with_tools(request, tools, partial_output).await
    }
}

pub use openai::OpenAiProvider;
