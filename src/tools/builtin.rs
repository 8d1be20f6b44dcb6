use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;

use super::handler::{ToolError, ToolHandler};
use crate::events::AgentEvent;
use crate::fetch::ContentFetcher;
use crate::search::WebSearch;
use crate::trace::{TraceRecord, TraceSink};

/// Results handed back to the model per search call.
pub const SEARCH_TOOL_RESULTS: usize = 3;

#[derive(Deserialize)]
struct SearchInput {
    query: String,
}

#[derive(Deserialize)]
struct ReadInput {
    url: String,
}

fn parse_input<T: for<'de> Deserialize<'de>>(input: &Value) -> Result<T, ToolError> {
    serde_json::from_value(input.clone()).map_err(|e| ToolError::InvalidInput(e.to_string()))
}

pub struct SearchTool {
    search: Arc<dyn WebSearch>,
    events: UnboundedSender<AgentEvent>,
    sink: Arc<dyn TraceSink>,
}

impl SearchTool {
    pub const NAME: &'static str = "search";

    pub fn new(
        search: Arc<dyn WebSearch>,
        events: UnboundedSender<AgentEvent>,
        sink: Arc<dyn TraceSink>,
    ) -> Self {
        Self {
            search,
            events,
            sink,
        }
    }

    pub fn schema() -> Value {
        json!({
            "name": Self::NAME,
            "description": "Useful for when you need to answer questions using the latest knowledge. Input should be a google search query based on the user's question.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The generated query passed to the search tool."
                    }
                },
                "required": ["query"]
            }
        })
    }
}

#[async_trait]
impl ToolHandler for SearchTool {
    async fn call(&self, input: &Value) -> Result<String, ToolError> {
        let SearchInput { query } = parse_input(input)?;
        self.sink.record(TraceRecord::ToolInvoked {
            tool: Self::NAME.into(),
        });
        let _ = self.events.send(AgentEvent::Searching {
            query: query.clone(),
        });

        let mut results = self.search.search(&query).await?;
        results.truncate(SEARCH_TOOL_RESULTS);
        self.sink.record(TraceRecord::SearchCompleted {
            query,
            results: results.len(),
        });

        Ok(serde_json::to_string(&results).unwrap_or_else(|_| "[]".into()))
    }
}

pub struct ReadTool {
    fetcher: Arc<dyn ContentFetcher>,
    events: UnboundedSender<AgentEvent>,
    sink: Arc<dyn TraceSink>,
}

impl ReadTool {
    pub const NAME: &'static str = "read";

    pub fn new(
        fetcher: Arc<dyn ContentFetcher>,
        events: UnboundedSender<AgentEvent>,
        sink: Arc<dyn TraceSink>,
    ) -> Self {
        Self {
            fetcher,
            events,
            sink,
        }
    }

    pub fn schema() -> Value {
        json!({
            "name": Self::NAME,
            "description": "Useful for when you need to read web pages.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "The URL of the web page to read."
                    }
                },
                "required": ["url"]
            }
        })
    }
}

#[async_trait]
impl ToolHandler for ReadTool {
    async fn call(&self, input: &Value) -> Result<String, ToolError> {
        let ReadInput { url } = parse_input(input)?;
        self.sink.record(TraceRecord::ToolInvoked {
            tool: Self::NAME.into(),
        });
        let _ = self.events.send(AgentEvent::Reading { url: url.clone() });

        let content = self.fetcher.fetch(&url).await?;
        self.sink.record(TraceRecord::KnowledgeAdded {
            url,
            chars: content.chars().count(),
        });
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::testing::{FakeFetcher, FakeSearch};
    use crate::trace::NoopSink;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn search_emits_event_and_keeps_top_three() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let search = Arc::new(FakeSearch::new().with_round(&["a", "b", "c", "d"]));
        let tool = SearchTool::new(search, tx, Arc::new(NoopSink));

        let out = tool.call(&json!({"query": "rust"})).await.unwrap();
        let results: Vec<Value> = serde_json::from_str(&out).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0]["url"], "https://a.example");
        assert!(results[0]["description"].is_string());
        assert_eq!(
            rx.try_recv().unwrap(),
            AgentEvent::Searching {
                query: "rust".into()
            }
        );
    }

    #[tokio::test]
    async fn read_emits_event_before_fetching() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let fetcher = Arc::new(FakeFetcher::new().failing_on("https://down.example"));
        let tool = ReadTool::new(fetcher, tx, Arc::new(NoopSink));

        let err = tool
            .call(&json!({"url": "https://down.example"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Failed(AgentError::Fetch(_))));
        assert_eq!(
            rx.try_recv().unwrap(),
            AgentEvent::Reading {
                url: "https://down.example".into()
            }
        );
    }

    #[tokio::test]
    async fn malformed_input_is_rejected_without_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tool = ReadTool::new(Arc::new(FakeFetcher::new()), tx, Arc::new(NoopSink));

        let err = tool.call(&json!({"link": 5})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn schemas_name_their_tools() {
        assert_eq!(SearchTool::schema()["name"], "search");
        assert_eq!(ReadTool::schema()["input_schema"]["required"][0], "url");
    }
}
