use std::sync::Arc;

use tracing::{debug, info};

use crate::types::NextStep;

/// Something worth recording while an agent works.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceRecord {
    QueryPlanned { query: String },
    SearchCompleted { query: String, results: usize },
    KnowledgeAdded { url: String, chars: usize },
    Decision { step: NextStep, knowledges: usize },
    Answering { knowledges: usize },
    ToolInvoked { tool: String },
    ToolRunFinished { steps: usize, tool_calls: usize },
}

/// Receives trace records. Injected into every component instead of
/// logging from a global.
pub trait TraceSink: Send + Sync {
    fn record(&self, record: TraceRecord);
}

impl<T: TraceSink + ?Sized> TraceSink for Arc<T> {
    fn record(&self, record: TraceRecord) {
        (**self).record(record)
    }
}

/// Forwards records to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn record(&self, record: TraceRecord) {
        match record {
            TraceRecord::QueryPlanned { query } => info!(%query, "searching"),
            TraceRecord::SearchCompleted { query, results } => {
                debug!(%query, results, "search completed")
            }
            TraceRecord::KnowledgeAdded { url, chars } => info!(%url, chars, "knowledge added"),
            TraceRecord::Decision { step, knowledges } => {
                info!(?step, knowledges, "continuation decided")
            }
            TraceRecord::Answering { knowledges } => info!(knowledges, "answering with context"),
            TraceRecord::ToolInvoked { tool } => debug!(%tool, "tool invoked"),
            TraceRecord::ToolRunFinished { steps, tool_calls } => {
                info!(steps, tool_calls, "tool run finished")
            }
        }
    }
}

/// Drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl TraceSink for NoopSink {
    fn record(&self, _record: TraceRecord) {}
}
