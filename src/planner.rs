use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use crate::error::GenerationError;
use crate::inference::StructuredGenerator;
use crate::trace::{TraceRecord, TraceSink, TracingSink};
use crate::types::{OutputSchema, StructuredRequest};
use crate::AgentConfig;

#[derive(Deserialize)]
struct PlannedQuery {
    query: String,
}

/// Produces the next web search query for a user request.
///
/// Earlier queries are listed in the prompt so the model avoids repeating
/// them, but nothing enforces it; callers must not assume uniqueness.
pub struct QueryPlanner {
    generator: Arc<dyn StructuredGenerator>,
    model: String,
    max_tokens: u32,
    sink: Arc<dyn TraceSink>,
}

impl QueryPlanner {
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
            "search_query",
            json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "A concise google search query related to the user's request."
                    }
                },
                "required": ["query"],
                "additionalProperties": false
            }),
        )
    }

    fn prompt(user_query: &str, prior_queries: &[String]) -> String {
        format!(
            "Given the following query, generate a concise google search query that captures \
the main intent of the user's request.\n\
The search query should be specific and relevant to the topic of interest. \
Don't duplicate previous queries. Answer in the format of JSON.\n\n\
Original user query: {user_query}\n\
Previous Queries: {previous}\n\
Example Output:\n{{\n  \"query\": \"search keywords\"\n}}",
            previous = prior_queries.join(", "),
        )
    }

    pub async fn plan(
        &self,
        user_query: &str,
        prior_queries: &[String],
    ) -> Result<String, GenerationError> {
        debug_assert!(!user_query.trim().is_empty(), "planner needs a user query");

        let value = self
            .generator
            .generate(StructuredRequest {
                model: self.model.clone(),
                max_tokens: self.max_tokens,
                system: None,
                prompt: Self::prompt(user_query, prior_queries),
                schema: Self::schema(),
            })
            .await?;

        let planned: PlannedQuery =
            serde_json::from_value(value).map_err(|e| GenerationError::Schema(e.to_string()))?;

        self.sink.record(TraceRecord::QueryPlanned {
            query: planned.query.clone(),
        });
        Ok(planned.query)
    }
}
