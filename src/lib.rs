pub mod bridge;
pub mod error;
pub mod events;
pub mod fetch;
pub mod inference;
pub mod judge;
pub mod partial;
pub mod pipeline;
pub mod planner;
pub mod search;
pub mod synthesizer;
pub mod tool_agent;
pub mod tools;
pub mod trace;
pub mod types;
pub mod ui;

#[cfg(test)]
pub(crate) mod testing;

use futures::stream::{BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;

pub use bridge::EventBridge;
pub use error::{AgentError, FetchError, GenerationError, SearchError};
pub use events::{AgentEvent, Citation, PartialCitation, RunOutcome};
pub use fetch::{ContentFetcher, JinaReader};
pub use inference::{OpenAiProvider, StructuredGenerator, ToolCallingModel};
pub use pipeline::{FixedPipelineAgent, PipelineRun};
pub use search::{HttpSearch, SearchBackend, WebSearch};
pub use tool_agent::ToolDrivenAgent;
pub use trace::{NoopSink, TraceRecord, TraceSink, TracingSink};
pub use types::{AgentContext, KnowledgeItem, NextStep, SearchResult};
pub use ui::{UiChunk, UiStreamWriter};

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: String,
    pub max_tokens: u32,
    /// Cap on fixed-pipeline search rounds. `None` keeps searching until the
    /// judge is satisfied.
    pub max_rounds: Option<usize>,
    /// Model steps allowed in a tool-driven run.
    pub tool_max_steps: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "gpt-5-mini".into(),
            max_tokens: 4096,
            max_rounds: None,
            tool_max_steps: 10,
        }
    }
}

pub type AgentEventStream = BoxStream<'static, Result<AgentEvent, AgentError>>;

/// Either agent variant behind one entry point.
pub enum SearchAgent {
    FixedPipeline(FixedPipelineAgent),
    ToolDriven(ToolDrivenAgent),
}

impl SearchAgent {
    pub fn run(&self, user_query: impl Into<String>) -> AgentEventStream {
        match self {
            Self::FixedPipeline(agent) => agent.run(user_query).into_stream(),
            Self::ToolDriven(agent) => agent.run(user_query).boxed(),
        }
    }

    pub fn run_with_cancel(
        &self,
        user_query: impl Into<String>,
        cancel: CancellationToken,
    ) -> AgentEventStream {
        match self {
            Self::FixedPipeline(agent) => agent.run_with_cancel(user_query, cancel).into_stream(),
            Self::ToolDriven(agent) => agent.run_with_cancel(user_query, cancel).boxed(),
        }
    }
}
