use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::Stream;
use tokio::sync::mpsc;

use crate::error::AgentError;
use crate::events::{AgentEvent, RunOutcome};

/// Merges everything a tool-driven run produces into one event stream.
///
/// The producer future owns every sender. It is polled from `poll_next`
/// rather than spawned, so it only makes progress while someone consumes
/// the stream and is dropped together with it. The stream ends once the
/// producer has finished and the queue is drained. A producer failure is
/// yielded after the events queued before it.
pub struct EventBridge {
    events: mpsc::UnboundedReceiver<AgentEvent>,
    producer: Option<BoxFuture<'static, Result<RunOutcome, AgentError>>>,
    outcome: Option<RunOutcome>,
    failure: Option<AgentError>,
}

impl EventBridge {
    pub fn new(
        events: mpsc::UnboundedReceiver<AgentEvent>,
        producer: BoxFuture<'static, Result<RunOutcome, AgentError>>,
    ) -> Self {
        Self {
            events,
            producer: Some(producer),
            outcome: None,
            failure: None,
        }
    }

    /// How the run ended. `None` while it is still going or if it failed.
    pub fn outcome(&self) -> Option<RunOutcome> {
        self.outcome
    }
}

impl Stream for EventBridge {
    type Item = Result<AgentEvent, AgentError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(producer) = this.producer.as_mut() {
            if let Poll::Ready(result) = producer.as_mut().poll(cx) {
                // Dropping the producer drops the last senders.
                this.producer = None;
                match result {
                    Ok(outcome) => this.outcome = Some(outcome),
                    Err(e) => this.failure = Some(e),
                }
            }
        }

        match this.events.poll_recv(cx) {
            Poll::Ready(Some(event)) => Poll::Ready(Some(Ok(event))),
            Poll::Ready(None) => Poll::Ready(this.failure.take().map(Err)),
            Poll::Pending => Poll::Pending,
        }
    }
}
