use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::GenerationError;
use crate::inference::StructuredGenerator;
use crate::trace::{TraceRecord, TraceSink, TracingSink};
use crate::types::{KnowledgeItem, NextStep, OutputSchema, StructuredRequest};
use crate::AgentConfig;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Decision {
    next_step: NextStep,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JudgeContext<'a> {
    knowledges: &'a [KnowledgeItem],
    user_query: &'a str,
}

/// Decides whether gathered knowledge is enough to answer.
///
/// Stateless: every call sees only the knowledge passed in.
pub struct ContinuationJudge {
    generator: Arc<dyn StructuredGenerator>,
    model: String,
    max_tokens: u32,
    sink: Arc<dyn TraceSink>,
}

impl ContinuationJudge {
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

    pub fn schema() -> OutputSchema {
        OutputSchema::new(
            "next_step",
            json!({
                "type": "object",
                "properties": {
                    "nextStep": {
                        "type": "string",
                        "enum": ["answer", "search"],
                        "description": "The next step to take, either answer the question using the provided knowledge or perform a further search."
                    }
                },
                "required": ["nextStep"],
                "additionalProperties": false
            }),
        )
    }

    fn prompt(knowledges: &[KnowledgeItem], user_query: &str) -> Result<String, GenerationError> {
        let context = serde_json::to_string(&JudgeContext {
            knowledges,
            user_query,
        })
        .map_err(|e| GenerationError::Parse(e.to_string()))?;

        Ok(format!(
            "Given the following context and user query, determine whether to answer the \
question using the provided knowledge or perform a further search.\n\
Context must be relevant and provide sufficient information to answer the query.\n\
Answer in the format of JSON.\n\n\
Context: {context}\n\
User Query: {user_query}\n\
Example Output:\n{{\n  \"nextStep\": \"search\"\n}}"
        ))
    }

    pub async fn decide(
        &self,
        knowledges: &[KnowledgeItem],
        user_query: &str,
    ) -> Result<NextStep, GenerationError> {
        debug_assert!(!knowledges.is_empty(), "judge needs at least one knowledge item");

        let value = self
            .generator
            .generate(StructuredRequest {
                model: self.model.clone(),
                max_tokens: self.max_tokens,
                system: None,
                prompt: Self::prompt(knowledges, user_query)?,
                schema: Self::schema(),
            })
            .await?;

        let decision: Decision =
            serde_json::from_value(value).map_err(|e| GenerationError::Schema(e.to_string()))?;

        self.sink.record(TraceRecord::Decision {
            step: decision.next_step,
            knowledges: knowledges.len(),
        });
        Ok(decision.next_step)
    }
}
