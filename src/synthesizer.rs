use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use serde::Serialize;
use serde_json::json;

use crate::error::GenerationError;
use crate::inference::StructuredGenerator;
use crate::trace::{TraceRecord, TraceSink, TracingSink};
use crate::types::{KnowledgeItem, OutputSchema, PartialAnswer, StructuredRequest};
use crate::AgentConfig;

/// Stream of ever-more-complete answers.
pub type AnswerStream = BoxStream<'static, Result<PartialAnswer, GenerationError>>;

/// Instructions on answer shape shared by both agent variants.
pub const ANSWER_FORMAT: &str = "\
- A short but concise answer with inline citations marked as [1](http://citation/1), [2](http://citation/2), etc.
- 2-3 citations with realistic source information
- Each citation should have a title, URL, and optional description/quote
- Make the content informative and the sources credible

Format citations as numbered references within the text.";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnswerContext<'a> {
    knowledges: &'a [KnowledgeItem],
    user_query: &'a str,
}

/// Writes the final cited markdown answer from gathered knowledge.
pub struct AnswerSynthesizer {
    generator: Arc<dyn StructuredGenerator>,
    model: String,
    max_tokens: u32,
    sink: Arc<dyn TraceSink>,
}

/// Schema of the final `{content, citations}` object.
pub fn answer_schema() -> OutputSchema {
    OutputSchema::new(
        "answer",
        json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "The main content of the answer. Must use markdown for better formatting"
                },
                "citations": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "number": { "type": "string" },
                            "title": { "type": "string" },
                            "url": { "type": "string" },
                            "description": { "type": "string" },
                            "quote": { "type": "string" }
                        },
                        "required": ["number", "title", "url"]
                    }
                }
            },
            "required": ["content", "citations"]
        }),
    )
}

impl AnswerSynthesizer {
    pub fn new(generator: Arc<dyn StructuredGenerator>, config: &AgentConfig) -> Self {
        Self {
            generator,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            sink: Arc::new(TracingSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = sink;
        self
    }

    fn prompt(knowledges: &[KnowledgeItem], user_query: &str) -> Result<String, GenerationError> {
        let context = serde_json::to_string(&AnswerContext {
            knowledges,
            user_query,
        })
        .map_err(|e| GenerationError::Parse(e.to_string()))?;

        Ok(format!(
            "Generate a well-researched answer in markdown about {user_query} with proper citations.\n\
Answer in the format of JSON.\n\
<context>\n{context}\n</context>\n\n\
Include:\n{ANSWER_FORMAT}"
        ))
    }

    /// Start streaming the answer. Each element is the best parse so far;
    /// `content` only ever grows by extension.
    pub async fn synthesize(
        &self,
        knowledges: &[KnowledgeItem],
        user_query: &str,
    ) -> Result<AnswerStream, GenerationError> {
        self.sink.record(TraceRecord::Answering {
            knowledges: knowledges.len(),
        });

        let partials = self
            .generator
            .stream(StructuredRequest {
                model: self.model.clone(),
                max_tokens: self.max_tokens,
                system: None,
                prompt: Self::prompt(knowledges, user_query)?,
                schema: answer_schema(),
            })
            .await?;

        Ok(partials
            .map(|item| {
                item.and_then(|value| {
                    serde_json::from_value::<PartialAnswer>(value)
                        .map_err(|e| GenerationError::Schema(e.to_string()))
                })
            })
            .boxed())
    }
}
