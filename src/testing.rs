use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::StreamExt;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};

use crate::error::{AgentError, FetchError, GenerationError, SearchError};
use crate::fetch::ContentFetcher;
use crate::inference::{PartialObjectStream, StructuredGenerator, ToolCallingModel};
use crate::search::WebSearch;
use crate::tools::{ToolError, ToolRegistry};
use crate::trace::{TraceRecord, TraceSink};
use crate::types::{SearchResult, StructuredRequest, ToolCallingRequest, ToolRunSummary};

// --- Structured generation ---

pub struct ScriptedGenerator {
    objects: Mutex<VecDeque<Result<Value, GenerationError>>>,
    streams: Mutex<VecDeque<Vec<Result<Value, GenerationError>>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(VecDeque::new()),
            streams: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_object(self, value: Value) -> Self {
        self.objects.try_lock().unwrap().push_back(Ok(value));
        self
    }

    pub fn with_error(self, error: GenerationError) -> Self {
        self.objects.try_lock().unwrap().push_back(Err(error));
        self
    }

    /// Queue a planner response.
    pub fn query(self, query: &str) -> Self {
        self.with_object(json!({ "query": query }))
    }

    /// Queue a judge response.
    pub fn decide(self, step: &str) -> Self {
        self.with_object(json!({ "nextStep": step }))
    }

    pub fn with_stream(self, partials: Vec<Value>) -> Self {
        self.streams
            .try_lock()
            .unwrap()
            .push_back(partials.into_iter().map(Ok).collect());
        self
    }

    pub fn with_failing_stream(self, partials: Vec<Value>, error: GenerationError) -> Self {
        let mut items: Vec<_> = partials.into_iter().map(Ok).collect();
        items.push(Err(error));
        self.streams.try_lock().unwrap().push_back(items);
        self
    }

    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait]
impl StructuredGenerator for ScriptedGenerator {
    async fn generate(&self, request: StructuredRequest) -> Result<Value, GenerationError> {
        self.prompts.lock().await.push(request.prompt);
        self.objects
            .lock()
            .await
            .pop_front()
            .unwrap_or(Err(GenerationError::Request(
                "no more scripted objects".into(),
            )))
    }

    async fn stream(&self, request: StructuredRequest) -> Result<PartialObjectStream, GenerationError> {
        self.prompts.lock().await.push(request.prompt);
        let items = self
            .streams
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| GenerationError::Request("no more scripted streams".into()))?;
        Ok(futures::stream::iter(items).boxed())
    }
}

// --- Web search ---

pub fn result(name: &str) -> SearchResult {
    SearchResult {
        url: format!("https://{name}.example"),
        title: name.to_uppercase(),
        description: format!("about {name}"),
    }
}

pub struct FakeSearch {
    rounds: Mutex<VecDeque<Result<Vec<SearchResult>, SearchError>>>,
    queries: Mutex<Vec<String>>,
}

impl FakeSearch {
    pub fn new() -> Self {
        Self {
            rounds: Mutex::new(VecDeque::new()),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn with_round(self, names: &[&str]) -> Self {
        let results = names.iter().map(|n| result(n)).collect();
        self.rounds.try_lock().unwrap().push_back(Ok(results));
        self
    }

    pub fn with_error(self, error: SearchError) -> Self {
        self.rounds.try_lock().unwrap().push_back(Err(error));
        self
    }

    pub async fn queries(&self) -> Vec<String> {
        self.queries.lock().await.clone()
    }
}

#[async_trait]
impl WebSearch for FakeSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SearchError> {
        self.queries.lock().await.push(query.to_string());
        self.rounds.lock().await.pop_front().unwrap_or(Ok(Vec::new()))
    }
}

// --- Content fetching ---

/// Sets its flag when dropped.
pub struct DropFlag(pub Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub struct FakeFetcher {
    failing: Vec<String>,
    hanging: Option<(String, Arc<AtomicBool>)>,
    fetched: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self {
            failing: Vec::new(),
            hanging: None,
            fetched: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(mut self, url: &str) -> Self {
        self.failing.push(url.to_string());
        self
    }

    /// Never finish fetching `url`; `released` flips once the pending
    /// request is dropped.
    pub fn hanging_on(mut self, url: &str, released: Arc<AtomicBool>) -> Self {
        self.hanging = Some((url.to_string(), released));
        self
    }

    pub async fn fetched(&self) -> Vec<String> {
        self.fetched.lock().await.clone()
    }
}

#[async_trait]
impl ContentFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.fetched.lock().await.push(url.to_string());
        if let Some((hang_url, released)) = &self.hanging {
            if hang_url == url {
                let _guard = DropFlag(released.clone());
                std::future::pending::<()>().await;
            }
        }
        if self.failing.iter().any(|u| u == url) {
            return Err(FetchError::Status {
                status: 502,
                url: url.to_string(),
            });
        }
        Ok(format!("content of {url}"))
    }
}

// --- Tool-calling model ---

pub enum ModelStep {
    /// One model call that invokes a tool.
    Call { tool: &'static str, input: Value },
    /// One model call that streams the final object.
    Output(Vec<Value>),
    /// One model call whose output stops before the object closes.
    Truncated(Vec<Value>),
}

pub struct ScriptedToolModel {
    script: Mutex<VecDeque<ModelStep>>,
    requests: Mutex<Vec<ToolCallingRequest>>,
}

impl ScriptedToolModel {
    pub fn new(steps: Vec<ModelStep>) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub async fn requests(&self) -> Vec<ToolCallingRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl ToolCallingModel for ScriptedToolModel {
    async fn run_with_tools(
        &self,
        request: ToolCallingRequest,
        tools: &ToolRegistry,
        partial_output: mpsc::UnboundedSender<Value>,
    ) -> Result<ToolRunSummary, AgentError> {
        let max_steps = request.max_steps;
        self.requests.lock().await.push(request);
        let mut summary = ToolRunSummary::default();

        while summary.steps < max_steps {
            let Some(step) = self.script.lock().await.pop_front() else {
                break;
            };
            summary.steps += 1;
            match step {
                ModelStep::Call { tool, input } => {
                    summary.tool_calls += 1;
                    match tools.execute(tool, &input).await {
                        Ok(_) | Err(ToolError::InvalidInput(_)) | Err(ToolError::Unknown(_)) => {}
                        Err(ToolError::Failed(e)) => return Err(e),
                    }
                }
                ModelStep::Output(partials) => {
                    for partial in &partials {
                        let _ = partial_output.send(partial.clone());
                    }
                    summary.output = partials.last().cloned();
                    return Ok(summary);
                }
                ModelStep::Truncated(partials) => {
                    for partial in partials {
                        let _ = partial_output.send(partial);
                    }
                    return Ok(summary);
                }
            }
        }

        Ok(summary)
    }
}

// --- Tracing ---

/// Keeps every trace record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: std::sync::Mutex<Vec<TraceRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TraceRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl TraceSink for MemorySink {
    fn record(&self, record: TraceRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }
}
