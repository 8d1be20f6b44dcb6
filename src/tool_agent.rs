use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bridge::EventBridge;
use crate::error::{AgentError, GenerationError};
use crate::events::{AgentEvent, RunOutcome};
use crate::fetch::ContentFetcher;
use crate::inference::ToolCallingModel;
use crate::search::WebSearch;
use crate::synthesizer::{answer_schema, ANSWER_FORMAT};
use crate::tools::{ReadTool, SearchTool, ToolRegistry};
use crate::trace::{TraceRecord, TraceSink, TracingSink};
use crate::types::{PartialAnswer, ToolCallingRequest};
use crate::AgentConfig;

fn system_prompt() -> String {
    format!(
        "You are a search agent that assists users by searching the web.\n\
1. When given a user query, you must first perform a google search to find relevant information.\n\
2. Then you can pick the most relevant result to read and extract information from it.\n\
3. You should decide whether to answer the user with the information gathered or perform another search.\n\n\
Output Format:\n{ANSWER_FORMAT}"
    )
}

/// Lets the model drive: one tool-calling generation with `search` and
/// `read` tools and the answer schema as structured output.
pub struct ToolDrivenAgent {
    model: Arc<dyn ToolCallingModel>,
    search: Arc<dyn WebSearch>,
    fetcher: Arc<dyn ContentFetcher>,
    sink: Arc<dyn TraceSink>,
    config: AgentConfig,
}

impl ToolDrivenAgent {
    pub fn new(
        model: Arc<dyn ToolCallingModel>,
        search: Arc<dyn WebSearch>,
        fetcher: Arc<dyn ContentFetcher>,
        config: AgentConfig,
    ) -> Self {
        Self {
            model,
            search,
            fetcher,
            sink: Arc::new(TracingSink),
            config,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Start a run. The model is not called until the bridge is polled.
    pub fn run(&self, user_query: impl Into<String>) -> EventBridge {
        self.start(user_query.into(), None)
    }

    /// Like [`run`](Self::run), failing with `AgentError::Cancelled` once
    /// `cancel` fires.
    pub fn run_with_cancel(
        &self,
        user_query: impl Into<String>,
        cancel: CancellationToken,
    ) -> EventBridge {
        self.start(user_query.into(), Some(cancel))
    }

    fn start(&self, user_query: String, cancel: Option<CancellationToken>) -> EventBridge {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let tools = ToolRegistry::new()
            .add(
                SearchTool::NAME,
                SearchTool::schema(),
                SearchTool::new(self.search.clone(), events_tx.clone(), self.sink.clone()),
            )
            .add(
                ReadTool::NAME,
                ReadTool::schema(),
                ReadTool::new(self.fetcher.clone(), events_tx.clone(), self.sink.clone()),
            );

        let request = ToolCallingRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            system: system_prompt(),
            prompt: format!("User query: {user_query}"),
            max_steps: self.config.tool_max_steps,
            output: answer_schema(),
        };

        let model = self.model.clone();
        let sink = self.sink.clone();

        let producer = async move {
            let (partial_tx, partial_rx) = mpsc::unbounded_channel();

            // The registry lives inside the tool loop future so its senders
            // are gone as soon as the loop returns.
            let tool_loop = async move { model.run_with_tools(request, &tools, partial_tx).await };
            let (summary, answered) =
                tokio::try_join!(tool_loop, forward_partials(partial_rx, events_tx))?;

            sink.record(TraceRecord::ToolRunFinished {
                steps: summary.steps,
                tool_calls: summary.tool_calls,
            });

            if summary.output.is_some() {
                info!(steps = summary.steps, "tool-driven run answered");
                Ok(RunOutcome::Answered)
            } else if answered {
                warn!(steps = summary.steps, "tool-driven answer was cut off");
                Ok(RunOutcome::Truncated)
            } else {
                warn!(
                    steps = summary.steps,
                    tool_calls = summary.tool_calls,
                    "tool-driven run ended without an answer"
                );
                Ok(RunOutcome::EmptyResult)
            }
        };

        let producer = match cancel {
            Some(cancel) => async move {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!("tool-driven run cancelled");
                        Err(AgentError::Cancelled)
                    }
                    result = producer => result,
                }
            }
            .boxed(),
            None => producer.boxed(),
        };

        EventBridge::new(events_rx, producer)
    }
}

/// Translate partial output objects into answer events until the tool loop
/// drops its sender. Returns whether any event was sent.
async fn forward_partials(
    mut partials: mpsc::UnboundedReceiver<Value>,
    events: mpsc::UnboundedSender<AgentEvent>,
) -> Result<bool, AgentError> {
    let mut sent = false;
    while let Some(value) = partials.recv().await {
        let answer: PartialAnswer = serde_json::from_value(value)
            .map_err(|e| GenerationError::Schema(e.to_string()))?;
        for event in answer.into_events() {
            sent = true;
            let _ = events.send(event);
        }
    }
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use futures::StreamExt;
    use serde_json::json;

    use super::*;
    use crate::error::FetchError;
    use crate::inference::OpenAiProvider;
    use crate::testing::{FakeFetcher, FakeSearch, MemorySink, ModelStep, ScriptedToolModel};

    fn agent(
        model: Arc<ScriptedToolModel>,
        search: FakeSearch,
        fetcher: FakeFetcher,
        config: AgentConfig,
    ) -> ToolDrivenAgent {
        ToolDrivenAgent::new(model, Arc::new(search), Arc::new(fetcher), config)
    }

    async fn drain(bridge: &mut EventBridge) -> (Vec<AgentEvent>, Option<AgentError>) {
        let mut events = Vec::new();
        while let Some(item) = bridge.next().await {
            match item {
                Ok(event) => events.push(event),
                Err(e) => return (events, Some(e)),
            }
        }
        (events, None)
    }

    fn answer_output() -> ModelStep {
        ModelStep::Output(vec![
            json!({"content": "Rust"}),
            json!({"content": "Rust is fast [1](http://citation/1)", "citations": [{"number": "1"}]}),
        ])
    }

    #[tokio::test]
    async fn model_searches_reads_then_answers() {
        let model = Arc::new(ScriptedToolModel::new(vec![
            ModelStep::Call {
                tool: "search",
                input: json!({"query": "rust speed"}),
            },
            ModelStep::Call {
                tool: "read",
                input: json!({"url": "https://a.example"}),
            },
            answer_output(),
        ]));
        let search = FakeSearch::new().with_round(&["a", "b", "c", "d"]);
        let mut bridge = agent(model.clone(), search, FakeFetcher::new(), AgentConfig::default())
            .run("is rust fast");

        let (events, err) = drain(&mut bridge).await;
        assert!(err.is_none());
        assert_eq!(
            events,
            vec![
                AgentEvent::Searching {
                    query: "rust speed".into()
                },
                AgentEvent::Reading {
                    url: "https://a.example".into()
                },
                AgentEvent::Answer {
                    content: "Rust".into()
                },
                AgentEvent::Answer {
                    content: "Rust is fast [1](http://citation/1)".into()
                },
                AgentEvent::Citations {
                    citations: vec![crate::events::PartialCitation {
                        number: Some("1".into()),
                        ..Default::default()
                    }]
                },
            ]
        );
        assert_eq!(bridge.outcome(), Some(RunOutcome::Answered));

        let request = &model.requests().await[0];
        assert_eq!(request.prompt, "User query: is rust fast");
        assert_eq!(request.max_steps, 10);
        assert!(request.system.contains("[1](http://citation/1)"));
        assert_eq!(request.output.name, "answer");
    }

    #[tokio::test]
    async fn step_limit_without_output_is_empty_result() {
        let model = Arc::new(ScriptedToolModel::new(vec![
            ModelStep::Call {
                tool: "search",
                input: json!({"query": "one"}),
            },
            ModelStep::Call {
                tool: "search",
                input: json!({"query": "two"}),
            },
            answer_output(),
        ]));
        let sink = Arc::new(MemorySink::new());
        let config = AgentConfig {
            tool_max_steps: 2,
            ..AgentConfig::default()
        };
        let mut bridge = agent(model, FakeSearch::new(), FakeFetcher::new(), config)
            .with_sink(sink.clone())
            .run("q");

        let (events, err) = drain(&mut bridge).await;
        assert!(err.is_none());
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|e| matches!(e, AgentEvent::Searching { .. })));
        assert_eq!(bridge.outcome(), Some(RunOutcome::EmptyResult));
        assert!(sink.records().contains(&TraceRecord::ToolRunFinished {
            steps: 2,
            tool_calls: 2
        }));
    }

    #[tokio::test]
    async fn fetch_failure_aborts_run() {
        let model = Arc::new(ScriptedToolModel::new(vec![
            ModelStep::Call {
                tool: "read",
                input: json!({"url": "https://down.example"}),
            },
            answer_output(),
        ]));
        let fetcher = FakeFetcher::new().failing_on("https://down.example");
        let mut bridge = agent(model, FakeSearch::new(), fetcher, AgentConfig::default()).run("q");

        let (events, err) = drain(&mut bridge).await;
        assert_eq!(
            events,
            vec![AgentEvent::Reading {
                url: "https://down.example".into()
            }]
        );
        assert!(matches!(
            err,
            Some(AgentError::Fetch(FetchError::Status { status: 502, .. }))
        ));
        assert_eq!(bridge.outcome(), None);
    }

    #[tokio::test]
    async fn malformed_tool_input_does_not_abort() {
        let model = Arc::new(ScriptedToolModel::new(vec![
            ModelStep::Call {
                tool: "read",
                input: json!({"link": "https://a.example"}),
            },
            answer_output(),
        ]));
        let mut bridge = agent(model, FakeSearch::new(), FakeFetcher::new(), AgentConfig::default())
            .run("q");

        let (events, err) = drain(&mut bridge).await;
        assert!(err.is_none());
        assert!(matches!(events[0], AgentEvent::Answer { .. }));
        assert_eq!(bridge.outcome(), Some(RunOutcome::Answered));
    }

    #[tokio::test]
    async fn partial_with_wrong_shape_is_schema_error() {
        let model = Arc::new(ScriptedToolModel::new(vec![ModelStep::Output(vec![
            json!({"content": ["not", "a", "string"]}),
        ])]));
        let mut bridge = agent(model, FakeSearch::new(), FakeFetcher::new(), AgentConfig::default())
            .run("q");

        let (_, err) = drain(&mut bridge).await;
        assert!(matches!(
            err,
            Some(AgentError::Generation(GenerationError::Schema(_)))
        ));
    }

    #[tokio::test]
    async fn dropping_bridge_releases_inflight_read() {
        let released = Arc::new(AtomicBool::new(false));
        let model = Arc::new(ScriptedToolModel::new(vec![ModelStep::Call {
            tool: "read",
            input: json!({"url": "https://slow.example"}),
        }]));
        let fetcher = FakeFetcher::new().hanging_on("https://slow.example", released.clone());
        let mut bridge = agent(model, FakeSearch::new(), fetcher, AgentConfig::default()).run("q");

        assert!(matches!(bridge.next().await, Some(Ok(AgentEvent::Reading { .. }))));
        assert!(tokio::time::timeout(Duration::from_millis(50), bridge.next())
            .await
            .is_err());
        assert!(!released.load(Ordering::SeqCst));

        drop(bridge);
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancellation_token_ends_run() {
        let released = Arc::new(AtomicBool::new(false));
        let model = Arc::new(ScriptedToolModel::new(vec![ModelStep::Call {
            tool: "read",
            input: json!({"url": "https://slow.example"}),
        }]));
        let fetcher = FakeFetcher::new().hanging_on("https://slow.example", released.clone());
        let cancel = CancellationToken::new();
        let mut bridge = agent(model, FakeSearch::new(), fetcher, AgentConfig::default())
            .run_with_cancel("q", cancel.clone());

        assert!(matches!(bridge.next().await, Some(Ok(AgentEvent::Reading { .. }))));
        cancel.cancel();
        assert!(matches!(bridge.next().await, Some(Err(AgentError::Cancelled))));
        assert!(released.load(Ordering::SeqCst));
        assert!(bridge.next().await.is_none());
    }

    #[tokio::test]
    async fn cut_off_answer_is_truncated_not_empty() {
        let model = Arc::new(ScriptedToolModel::new(vec![ModelStep::Truncated(vec![
            json!({"content": "Rust is"}),
            json!({"content": "Rust is fa"}),
        ])]));
        let mut bridge = agent(model, FakeSearch::new(), FakeFetcher::new(), AgentConfig::default())
            .run("q");

        let (events, err) = drain(&mut bridge).await;
        assert!(err.is_none());
        assert_eq!(
            events.last(),
            Some(&AgentEvent::Answer {
                content: "Rust is fa".into()
            })
        );
        assert_eq!(bridge.outcome(), Some(RunOutcome::Truncated));
    }

    fn openai_step(server_chunks: &[Value]) -> wiremock::ResponseTemplate {
        let mut body = String::new();
        for chunk in server_chunks {
            body.push_str(&format!("data: {chunk}\n\n"));
        }
        body.push_str("data: [DONE]\n\n");
        wiremock::ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
    }

    fn openai_tool_call(id: &str, name: &str, arguments: Value) -> Value {
        json!({"choices": [{"index": 0, "delta": {"tool_calls": [
            {"index": 0, "id": id, "function": {"name": name, "arguments": arguments.to_string()}}
        ]}}]})
    }

    fn openai_content(text: &str) -> Value {
        json!({"choices": [{"index": 0, "delta": {"content": text}}]})
    }

    #[tokio::test]
    async fn openai_model_searches_reads_then_answers() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer};

        let server = MockServer::start().await;
        let steps = vec![
            vec![openai_tool_call("call_1", "search", json!({"query": "rust speed"}))],
            vec![openai_tool_call("call_2", "read", json!({"url": "https://a.example"}))],
            vec![
                openai_content("{\"content\":\"Rust is"),
                openai_content(
                    " fast [1](http://citation/1)\",\"citations\":[{\"number\":\"1\",\"url\":\"https://a.example\"}]}",
                ),
            ],
        ];
        for chunks in &steps {
            Mock::given(method("POST"))
                .and(path("/v1/chat/completions"))
                .respond_with(openai_step(chunks))
                .up_to_n_times(1)
                .mount(&server)
                .await;
        }

        let sink = Arc::new(MemorySink::new());
        let search = FakeSearch::new().with_round(&["a", "b"]);
        let mut bridge = ToolDrivenAgent::new(
            Arc::new(OpenAiProvider::new(server.uri())),
            Arc::new(search),
            Arc::new(FakeFetcher::new()),
            AgentConfig::default(),
        )
        .with_sink(sink.clone())
        .run("is rust fast");

        let (events, err) = drain(&mut bridge).await;
        assert!(err.is_none(), "{err:?}");
        assert_eq!(
            events,
            vec![
                AgentEvent::Searching {
                    query: "rust speed".into()
                },
                AgentEvent::Reading {
                    url: "https://a.example".into()
                },
                AgentEvent::Answer {
                    content: "Rust is".into()
                },
                AgentEvent::Answer {
                    content: "Rust is fast [1](http://citation/1)".into()
                },
                AgentEvent::Citations {
                    citations: vec![crate::events::PartialCitation {
                        number: Some("1".into()),
                        url: Some("https://a.example".into()),
                        ..Default::default()
                    }]
                },
            ]
        );
        assert_eq!(bridge.outcome(), Some(RunOutcome::Answered));
        assert!(sink.records().contains(&TraceRecord::ToolRunFinished {
            steps: 3,
            tool_calls: 2
        }));

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3);
        let last: Value = requests[2].body_json().unwrap();
        let messages = last["messages"].as_array().unwrap();
        assert_eq!(messages[5]["role"], "tool");
        assert_eq!(messages[5]["tool_call_id"], "call_2");
    }
}
