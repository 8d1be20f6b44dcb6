use serde::{Deserialize, Serialize};

/// Events emitted while an agent runs, for UI streaming.
///
/// Both agent variants speak this vocabulary. `Answer` carries the whole
/// answer so far, not a delta; `Citations` replaces any earlier list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AgentEvent {
    Searching { query: String },
    Reading { url: String },
    Answer { content: String },
    Citations { citations: Vec<PartialCitation> },
}

/// A citation as seen mid-stream. Any field may still be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartialCitation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
}

/// A fully-populated citation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub number: String,
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub quote: Option<String>,
}

impl PartialCitation {
    /// The completed citation, once `number`, `title` and `url` have arrived.
    pub fn complete(&self) -> Option<Citation> {
        Some(Citation {
            number: self.number.clone()?,
            title: self.title.clone()?,
            url: self.url.clone()?,
            description: self.description.clone(),
            quote: self.quote.clone(),
        })
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// A final answer was produced.
    Answered,
    /// The model ran out of steps before producing a final object.
    EmptyResult,
    /// Answer events were streamed but the final object never closed,
    /// usually because the output token limit cut it off.
    Truncated,
}
