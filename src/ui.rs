use serde::Serialize;
use uuid::Uuid;

use crate::events::{AgentEvent, PartialCitation};

/// One search step as shown in the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SearchState {
    Searching { query: String },
    Reading { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CitationData {
    pub citations: Vec<PartialCitation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UiChunk {
    TextStart { id: String },
    TextDelta { id: String, delta: String },
    TextEnd { id: String },
    DataSearchState { id: String, data: Vec<SearchState> },
    DataSearchCitation { id: String, data: CitationData },
}

/// Stateful translator for one run.
pub struct UiStreamWriter {
    answer_id: String,
    search_state_id: String,
    citations_id: String,
    search_state: Vec<SearchState>,
    answer: Option<String>,
}

impl Default for UiStreamWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl UiStreamWriter {
    pub fn new() -> Self {
        Self {
            answer_id: Uuid::new_v4().to_string(),
            search_state_id: Uuid::new_v4().to_string(),
            citations_id: Uuid::new_v4().to_string(),
            search_state: Vec::new(),
            answer: None,
        }
    }

    /// Chunks for one event. May be empty when nothing changed.
    pub fn push(&mut self, event: AgentEvent) -> Vec<UiChunk> {
        match event {
            AgentEvent::Searching { query } => {
                self.search_state.push(SearchState::Searching { query });
                vec![self.search_state_chunk()]
            }
            AgentEvent::Reading { url } => {
                self.search_state.push(SearchState::Reading { url });
                vec![self.search_state_chunk()]
            }
            AgentEvent::Answer { content } => self.answer_chunks(content),
            AgentEvent::Citations { citations } => vec![UiChunk::DataSearchCitation {
                id: self.citations_id.clone(),
                data: CitationData { citations },
            }],
        }
    }

    /// Close the text part if one was opened.
    pub fn finish(&mut self) -> Option<UiChunk> {
        self.answer.take().map(|_| UiChunk::TextEnd {
            id: self.answer_id.clone(),
        })
    }

    fn search_state_chunk(&self) -> UiChunk {
        UiChunk::DataSearchState {
            id: self.search_state_id.clone(),
            data: self.search_state.clone(),
        }
    }

    fn answer_chunks(&mut self, content: String) -> Vec<UiChunk> {
        let mut chunks = Vec::new();
        let previous = match self.answer.take() {
            Some(previous) => previous,
            None => {
                chunks.push(UiChunk::TextStart {
                    id: self.answer_id.clone(),
                });
                String::new()
            }
        };

        // Content only grows by extension; anything else is resent whole.
        let delta = content
            .strip_prefix(previous.as_str())
            .unwrap_or(content.as_str());
        if !delta.is_empty() {
            chunks.push(UiChunk::TextDelta {
                id: self.answer_id.clone(),
                delta: delta.to_string(),
            });
        }

        self.answer = Some(content);
        chunks
    }
}
