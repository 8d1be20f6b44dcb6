use async_trait::async_trait;
use futures::stream::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::sse;
use super::{PartialObjectStream, StructuredGenerator, ToolCallingModel};
use crate::error::{AgentError, GenerationError};
use crate::partial::PartialObjectParser;
use crate::tools::{ToolError, ToolRegistry};
use crate::types::{OutputSchema, StructuredRequest, ToolCallingRequest, ToolRunSummary};

/// OpenAI-compatible provider. Works with OpenAI, OpenRouter, vLLM, DeepSeek
/// or any server that implements `/v1/chat/completions` with JSON-schema
/// response formats.
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    max_tokens_field: &'static str,
}

/// Tool calls beyond this index in one step are ignored.
const MAX_TOOL_CALLS_PER_STEP: usize = 64;

/// A tool call assembled from streamed deltas.
#[derive(Debug, Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl OpenAiProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            max_tokens_field: "max_completion_tokens",
        }
    }

    /// Set an API key (required for OpenAI, OpenRouter, etc.).
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Send the output limit as `max_tokens` instead of
    /// `max_completion_tokens`, for servers that predate the rename.
    pub fn with_legacy_max_tokens(mut self) -> Self {
        self.max_tokens_field = "max_tokens";
        self
    }

    /// Convert our Anthropic-style tool schemas to OpenAI function-calling format.
    fn convert_tools(tools: &[Value]) -> Vec<Value> {
        tools
            .iter()
            .filter_map(|tool| {
                let name = tool["name"].as_str()?;
                let description = tool.get("description").cloned().unwrap_or(Value::Null);
                let parameters = tool
                    .get("input_schema")
                    .cloned()
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}}));

                Some(json!({
                    "type": "function",
                    "function": {
                        "name": name,
                        "description": description,
                        "parameters": parameters,
                    }
                }))
            })
            .collect()
    }

    fn response_format(schema: &OutputSchema) -> Value {
        json!({
            "type": "json_schema",
            "json_schema": {
                "name": schema.name,
                "schema": schema.schema,
                "strict": false,
            }
        })
    }

    fn messages(system: Option<&str>, prompt: &str) -> Vec<Value> {
        let mut out = Vec::new();
        if let Some(sys) = system {
            out.push(json!({ "role": "system", "content": sys }));
        }
        out.push(json!({ "role": "user", "content": prompt }));
        out
    }

    fn structured_body(&self, request: &StructuredRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": request.model,
            "messages": Self::messages(request.system.as_deref(), &request.prompt),
            "response_format": Self::response_format(&request.schema),
            "stream": stream,
        });
        body[self.max_tokens_field] = json!(request.max_tokens);
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, GenerationError> {
        let mut req = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("content-type", "application/json");

        if let Some(ref key) = self.api_key {
            req = req.header("authorization", format!("Bearer {key}"));
        }

        let resp = req
            .json(body)
            .send()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body = resp
                .text()
                .await
                .map_err(|e| GenerationError::Request(e.to_string()))?;
            return Err(GenerationError::ApiError { status, body });
        }

        Ok(resp)
    }

    /// The `delta` object of the first choice in a streamed chunk.
    fn chunk_delta(data: &str) -> Result<Value, GenerationError> {
        let chunk: Value =
            serde_json::from_str(data).map_err(|e| GenerationError::Parse(e.to_string()))?;
        if let Some(err) = chunk.get("error") {
            return Err(GenerationError::Request(err.to_string()));
        }
        Ok(chunk["choices"][0]["delta"].clone())
    }

    fn accumulate_tool_calls(pending: &mut Vec<PendingToolCall>, deltas: &[Value]) {
        for (position, delta) in deltas.iter().enumerate() {
            let index = delta["index"].as_u64().map(|i| i as usize).unwrap_or(position);
            if index >= MAX_TOOL_CALLS_PER_STEP {
                warn!(index, "ignoring tool call with out-of-range index");
                continue;
            }
            if pending.len() <= index {
                pending.resize_with(index + 1, PendingToolCall::default);
            }
            let call = &mut pending[index];
            if let Some(id) = delta["id"].as_str() {
                call.id = id.to_string();
            }
            if let Some(name) = delta["function"]["name"].as_str() {
                call.name.push_str(name);
            }
            if let Some(args) = delta["function"]["arguments"].as_str() {
                call.arguments.push_str(args);
            }
        }
    }

    /// Drop calls that never received an id and a name, such as the gaps
    /// left by skipped indices.
    fn complete_tool_calls(pending: Vec<PendingToolCall>) -> Vec<PendingToolCall> {
        pending
            .into_iter()
            .filter(|call| {
                let complete = !call.id.is_empty() && !call.name.is_empty();
                if !complete && !(call.name.is_empty() && call.arguments.is_empty()) {
                    warn!(name = %call.name, "dropping tool call without id or name");
                }
                complete
            })
            .collect()
    }
}

#[async_trait]
impl StructuredGenerator for OpenAiProvider {
    async fn generate(&self, request: StructuredRequest) -> Result<Value, GenerationError> {
        debug!(model = %request.model, schema = %request.schema.name, "structured generation");

        let resp = self.send(&self.structured_body(&request, false)).await?;
        let text = resp
            .text()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;
        let parsed: Value =
            serde_json::from_str(&text).map_err(|e| GenerationError::Parse(e.to_string()))?;

        let content = parsed["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| GenerationError::Parse("response has no message content".into()))?;

        serde_json::from_str(content).map_err(|e| GenerationError::Schema(e.to_string()))
    }

    async fn stream(&self, request: StructuredRequest) -> Result<PartialObjectStream, GenerationError> {
        debug!(model = %request.model, schema = %request.schema.name, "streaming structured generation");

        let resp = self.send(&self.structured_body(&request, true)).await?;
        let mut parser = PartialObjectParser::new();

        let partials = sse::data_stream(resp).filter_map(move |item| {
            let out = match item.and_then(|data| Self::chunk_delta(&data)) {
                Ok(delta) => delta["content"]
                    .as_str()
                    .and_then(|text| parser.push(text))
                    .map(Ok),
                Err(e) => Some(Err(e)),
            };
            futures::future::ready(out)
        });

        Ok(partials.boxed())
    }
}

#[async_trait]
impl ToolCallingModel for OpenAiProvider {
    async fn run_with_tools(
        &self,
        request: ToolCallingRequest,
        tools: &ToolRegistry,
        partial_output: mpsc::UnboundedSender<Value>,
    ) -> Result<ToolRunSummary, AgentError> {
        let tool_schemas = Self::convert_tools(&tools.schemas());
        debug!(tools = ?tools.tool_names(), max_steps = request.max_steps, "starting tool loop");
        let mut messages = Self::messages(Some(&request.system), &request.prompt);
        let mut summary = ToolRunSummary::default();

        for step in 0..request.max_steps {
            summary.steps = step + 1;
            debug!(model = %request.model, step, messages = messages.len(), "tool-calling step");

            let mut body = json!({
                "model": request.model,
                "messages": messages,
                "response_format": Self::response_format(&request.output),
                "stream": true,
            });
            body[self.max_tokens_field] = json!(request.max_tokens);
            if !tools.is_empty() {
                body["tools"] = Value::Array(tool_schemas.clone());
            }

            let resp = self.send(&body).await?;
            let mut data = sse::data_stream(resp);
            let mut parser = PartialObjectParser::new();
            let mut calls: Vec<PendingToolCall> = Vec::new();
            // Held until the step is known to be final: content streamed
            // alongside tool calls is not part of the answer.
            let mut partials: Vec<Value> = Vec::new();

            while let Some(item) = data.next().await {
                let delta = Self::chunk_delta(&item?)?;
                if let Some(text) = delta["content"].as_str() {
                    partials.extend(parser.push(text));
                }
                if let Some(deltas) = delta["tool_calls"].as_array() {
                    Self::accumulate_tool_calls(&mut calls, deltas);
                }
            }
            let calls = Self::complete_tool_calls(calls);

            if calls.is_empty() {
                for partial in partials {
                    let _ = partial_output.send(partial);
                }
                if !parser.is_empty() {
                    match parser.finish() {
                        Ok(output) => summary.output = Some(output),
                        Err(e) => warn!(error = %e, "final output is not valid JSON"),
                    }
                }
                return Ok(summary);
            }

            let tool_calls: Vec<Value> = calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": { "name": c.name, "arguments": c.arguments },
                    })
                })
                .collect();
            messages.push(json!({
                "role": "assistant",
                "content": parser.text(),
                "tool_calls": tool_calls,
            }));

            for call in &calls {
                summary.tool_calls += 1;
                let input: Value = serde_json::from_str(&call.arguments).unwrap_or_else(|_| json!({}));
                let output = match tools.execute(&call.name, &input).await {
                    Ok(output) => output,
                    Err(ToolError::Failed(e)) => return Err(e),
                    Err(e) => {
                        warn!(tool = %call.name, error = %e, "tool call rejected");
                        format!("error: {e}")
                    }
                };
                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": call.id,
                    "content": output,
                }));
            }
        }

        warn!(max_steps = request.max_steps, "tool loop hit step limit");
        Ok(summary)
    }
}
