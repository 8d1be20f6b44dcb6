use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::{AgentEvent, PartialCitation};

/// One fetched-and-extracted page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub url: String,
    pub title: String,
    pub content: String,
}

/// One organic search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub title: String,
    pub description: String,
}

/// Working memory of a single fixed-pipeline run.
///
/// Append-only: queries and knowledge are only ever pushed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentContext {
    user_query: String,
    search_queries: Vec<String>,
    knowledges: Vec<KnowledgeItem>,
}

impl AgentContext {
    pub fn new(user_query: impl Into<String>) -> Self {
        Self {
            user_query: user_query.into(),
            search_queries: Vec::new(),
            knowledges: Vec::new(),
        }
    }

    pub fn user_query(&self) -> &str {
        &self.user_query
    }

    pub fn search_queries(&self) -> &[String] {
        &self.search_queries
    }

    pub fn knowledges(&self) -> &[KnowledgeItem] {
        &self.knowledges
    }

    pub fn push_query(&mut self, query: impl Into<String>) {
        self.search_queries.push(query.into());
    }

    pub fn push_knowledge(&mut self, item: KnowledgeItem) {
        self.knowledges.push(item);
    }
}

/// What the continuation judge wants to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NextStep {
    Answer,
    Search,
}

/// Current best reconstruction of a streamed answer object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PartialAnswer {
    pub content: Option<String>,
    pub citations: Option<Vec<PartialCitation>>,
}

impl PartialAnswer {
    /// `Answer` if there is any content yet, then `Citations` if the list
    /// has started.
    pub fn into_events(self) -> Vec<AgentEvent> {
        let mut events = Vec::with_capacity(2);
        if let Some(content) = self.content.filter(|c| !c.is_empty()) {
            events.push(AgentEvent::Answer { content });
        }
        if let Some(citations) = self.citations {
            events.push(AgentEvent::Citations { citations });
        }
        events
    }
}

/// Named JSON schema handed to a structured-generation call.
#[derive(Debug, Clone)]
pub struct OutputSchema {
    pub name: String,
    pub schema: Value,
}

impl OutputSchema {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }
}

/// Prompt + schema for one structured generation.
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    pub model: String,
    pub max_tokens: u32,
    pub system: Option<String>,
    pub prompt: String,
    pub schema: OutputSchema,
}

/// A tool-calling generation: the model picks tools until it emits
/// an object matching `output`, or `max_steps` runs out.
#[derive(Debug, Clone)]
pub struct ToolCallingRequest {
    pub model: String,
    pub max_tokens: u32,
    pub system: String,
    pub prompt: String,
    pub max_steps: usize,
    pub output: OutputSchema,
}

/// What a tool-calling run did.
#[derive(Debug, Clone, Default)]
pub struct ToolRunSummary {
    pub steps: usize,
    pub tool_calls: usize,
    /// The final structured object, if the model produced one in time.
    pub output: Option<Value>,
}
