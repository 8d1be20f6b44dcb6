use std::collections::VecDeque;
use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::AgentError;
use crate::events::{AgentEvent, RunOutcome};
use crate::fetch::ContentFetcher;
use crate::inference::StructuredGenerator;
use crate::judge::ContinuationJudge;
use crate::planner::QueryPlanner;
use crate::search::WebSearch;
use crate::synthesizer::{AnswerStream, AnswerSynthesizer};
use crate::trace::{TraceRecord, TraceSink, TracingSink};
use crate::types::{AgentContext, KnowledgeItem, NextStep, SearchResult};
use crate::AgentConfig;

/// Results read per search round.
pub const RESULTS_PER_ROUND: usize = 2;

/// Builds [`PipelineRun`]s. Holds capabilities only; every run gets its own
/// context.
pub struct FixedPipelineAgent {
    generator: Arc<dyn StructuredGenerator>,
    search: Arc<dyn WebSearch>,
    fetcher: Arc<dyn ContentFetcher>,
    sink: Arc<dyn TraceSink>,
    config: AgentConfig,
}

impl FixedPipelineAgent {
    pub fn new(
        generator: Arc<dyn StructuredGenerator>,
        search: Arc<dyn WebSearch>,
        fetcher: Arc<dyn ContentFetcher>,
        config: AgentConfig,
    ) -> Self {
        Self {
            generator,
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

    /// Start a run. Nothing happens until the first `next()`.
    pub fn run(&self, user_query: impl Into<String>) -> PipelineRun {
        self.start(user_query.into(), None)
    }

    /// Start a run that ends with `AgentError::Cancelled` once `cancel` fires.
    pub fn run_with_cancel(
        &self,
        user_query: impl Into<String>,
        cancel: CancellationToken,
    ) -> PipelineRun {
        self.start(user_query.into(), Some(cancel))
    }

    fn start(&self, user_query: String, cancel: Option<CancellationToken>) -> PipelineRun {
        PipelineRun {
            planner: QueryPlanner::new(self.generator.clone(), &self.config)
                .with_sink(self.sink.clone()),
            judge: ContinuationJudge::new(self.generator.clone(), &self.config)
                .with_sink(self.sink.clone()),
            synthesizer: AnswerSynthesizer::new(self.generator.clone(), &self.config)
                .with_sink(self.sink.clone()),
            search: self.search.clone(),
            fetcher: self.fetcher.clone(),
            sink: self.sink.clone(),
            context: AgentContext::new(user_query),
            state: State::Planning,
            rounds: 0,
            max_rounds: self.config.max_rounds,
            cancel,
            outcome: None,
        }
    }
}

enum State {
    /// Ask the planner for the next query.
    Planning,
    /// Run the planned query.
    Searching { query: String },
    /// Announce the next unread result, or go back to planning.
    Reading { pending: VecDeque<SearchResult> },
    /// Fetch the announced result into the context.
    Fetching {
        result: SearchResult,
        rest: VecDeque<SearchResult>,
    },
    /// Ask the judge whether to answer now.
    Judging { rest: VecDeque<SearchResult> },
    /// Forward the answer stream.
    Synthesizing {
        answers: AnswerStream,
        ready: VecDeque<AgentEvent>,
    },
    Done,
}

/// One fixed-pipeline invocation: plan a query, search, read the top
/// results one by one and ask the judge after each page whether to answer.
///
/// Pulled one event at a time; nothing runs until `next()` is awaited.
pub struct PipelineRun {
    planner: QueryPlanner,
    judge: ContinuationJudge,
    synthesizer: AnswerSynthesizer,
    search: Arc<dyn WebSearch>,
    fetcher: Arc<dyn ContentFetcher>,
    sink: Arc<dyn TraceSink>,
    context: AgentContext,
    state: State,
    rounds: usize,
    max_rounds: Option<usize>,
    cancel: Option<CancellationToken>,
    outcome: Option<RunOutcome>,
}

impl PipelineRun {
    /// Pull the next event. `None` once the answer stream has ended or
    /// after an error has been returned.
    pub async fn next(&mut self) -> Option<Result<AgentEvent, AgentError>> {
        if matches!(self.state, State::Done) {
            return None;
        }

        let advanced = match self.cancel.clone() {
            Some(cancel) => tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                item = self.advance() => Some(item),
            },
            None => Some(self.advance().await),
        };

        match advanced {
            Some(item) => item.transpose(),
            None => {
                info!(rounds = self.rounds, "pipeline cancelled");
                self.state = State::Done;
                Some(Err(AgentError::Cancelled))
            }
        }
    }

    /// Turn the run into a stream of events.
    pub fn into_stream(self) -> BoxStream<'static, Result<AgentEvent, AgentError>> {
        futures::stream::unfold(self, |mut run| async move {
            run.next().await.map(|item| (item, run))
        })
        .boxed()
    }

    /// Everything gathered so far.
    pub fn context(&self) -> &AgentContext {
        &self.context
    }

    /// Search rounds started so far.
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Set once the answer stream has been fully forwarded.
    pub fn outcome(&self) -> Option<RunOutcome> {
        self.outcome
    }

    async fn advance(&mut self) -> Result<Option<AgentEvent>, AgentError> {
        loop {
            // A failed or abandoned step leaves the run in `Done`.
            match std::mem::replace(&mut self.state, State::Done) {
                State::Planning => {
                    if let Some(max) = self.max_rounds {
                        if self.rounds >= max {
                            warn!(rounds = self.rounds, "pipeline hit max rounds limit");
                            return Err(AgentError::MaxRoundsExceeded {
                                rounds: self.rounds,
                            });
                        }
                    }

                    let query = self
                        .planner
                        .plan(self.context.user_query(), self.context.search_queries())
                        .await?;
                    self.rounds += 1;
                    self.context.push_query(query.clone());
                    self.state = State::Searching {
                        query: query.clone(),
                    };
                    return Ok(Some(AgentEvent::Searching { query }));
                }

                State::Searching { query } => {
                    let mut results = self.search.search(&query).await?;
                    self.sink.record(TraceRecord::SearchCompleted {
                        query,
                        results: results.len(),
                    });
                    results.truncate(RESULTS_PER_ROUND);
                    self.state = State::Reading {
                        pending: results.into(),
                    };
                }

                State::Reading { mut pending } => match pending.pop_front() {
                    Some(result) => {
                        let url = result.url.clone();
                        self.state = State::Fetching {
                            result,
                            rest: pending,
                        };
                        return Ok(Some(AgentEvent::Reading { url }));
                    }
                    None => self.state = State::Planning,
                },

                State::Fetching { result, rest } => {
                    let content = self.fetcher.fetch(&result.url).await?;
                    self.sink.record(TraceRecord::KnowledgeAdded {
                        url: result.url.clone(),
                        chars: content.chars().count(),
                    });
                    self.context.push_knowledge(KnowledgeItem {
                        url: result.url,
                        title: result.title,
                        content,
                    });
                    self.state = State::Judging { rest };
                }

                State::Judging { rest } => {
                    let step = self
                        .judge
                        .decide(self.context.knowledges(), self.context.user_query())
                        .await?;
                    self.state = match step {
                        NextStep::Answer => State::Synthesizing {
                            answers: self
                                .synthesizer
                                .synthesize(self.context.knowledges(), self.context.user_query())
                                .await?,
                            ready: VecDeque::new(),
                        },
                        NextStep::Search => State::Reading { pending: rest },
                    };
                }

                State::Synthesizing {
                    mut answers,
                    mut ready,
                } => {
                    if let Some(event) = ready.pop_front() {
                        self.state = State::Synthesizing { answers, ready };
                        return Ok(Some(event));
                    }
                    match answers.next().await {
                        Some(partial) => {
                            ready.extend(partial?.into_events());
                            self.state = State::Synthesizing { answers, ready };
                        }
                        None => {
                            info!(
                                rounds = self.rounds,
                                knowledges = self.context.knowledges().len(),
                                "pipeline answered"
                            );
                            self.outcome = Some(RunOutcome::Answered);
                            return Ok(None);
                        }
                    }
                }

                State::Done => return Ok(None),
            }
        }
    }
}
