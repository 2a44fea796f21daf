//! Streaming broadcaster
//!
//! Drains an agent token stream into ordered session events:
//! `streamingStarted`, one `streamingChunk` per token, `finalResponse` with
//! the aggregate text when it is non-empty, then exactly one
//! `streamingCompleted`. A failing stream ends with `error` followed by
//! `streamingCompleted`.

use crate::agent::TokenStream;
use crate::broadcast_span;
use crate::error::HubError;
use crate::observability::metrics;
use crate::streaming::events::HubEvent;
use crate::streaming::lanes::SessionLane;
use crate::streaming::sink::EventSink;
use crate::streaming::state::StreamingState;
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn, Instrument};

/// How a broadcast ended
#[derive(Debug, Clone, PartialEq)]
pub enum BroadcastOutcome {
    /// Stream finished with text; a final response was sent
    Completed { text: String },
    /// Stream finished without producing any text
    Empty,
    /// Stream failed part way; an error event was sent
    Failed { message: String },
    /// Every subscriber left mid-stream and the stream was dropped
    Abandoned,
}

/// Emits session events for token streams and replayed text
pub struct Broadcaster {
    sink: Arc<dyn EventSink>,
    chunk_delay: Duration,
}

impl Broadcaster {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            chunk_delay: Duration::ZERO,
        }
    }

    /// Pause after every forwarded chunk
    pub fn with_chunk_delay(mut self, chunk_delay: Duration) -> Self {
        self.chunk_delay = chunk_delay;
        self
    }

    /// True when the session has at least one subscriber
    pub fn is_watched(&self, session_id: &str) -> bool {
        self.sink.subscriber_count(session_id) > 0
    }

    fn deserted(&self, session_id: &str, watched: bool) -> bool {
        watched && !self.is_watched(session_id)
    }

    /// Send one event to the session
    pub async fn emit(&self, session_id: &str, event: HubEvent) {
        self.sink.emit(session_id, event).await;
    }

    /// Stream `tokens` to the lane's session
    pub async fn stream(&self, lane: &SessionLane, tokens: TokenStream) -> BroadcastOutcome {
        let session_id = lane.session_id();
        self.drain(session_id, tokens)
            .instrument(broadcast_span!(session_id = %session_id))
            .await
    }

    async fn drain(&self, session_id: &str, mut tokens: TokenStream) -> BroadcastOutcome {
        let started_at = Instant::now();
        metrics().broadcast_started();
        self.emit(session_id, HubEvent::StreamingStarted).await;

        let watched = self.is_watched(session_id);
        let mut state = StreamingState::new();

        while let Some(item) = tokens.next().await {
            match item {
                Ok(chunk) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    state.push(chunk.clone());
                    self.emit(session_id, HubEvent::chunk(chunk)).await;
                    metrics().chunk_emitted();

                    if self.deserted(session_id, watched) {
                        info!(
                            session_id,
                            chunks = state.chunk_count(),
                            "All subscribers left, abandoning stream"
                        );
                        metrics().broadcast_abandoned();
                        self.emit(session_id, HubEvent::StreamingCompleted).await;
                        return BroadcastOutcome::Abandoned;
                    }

                    if !self.chunk_delay.is_zero() {
                        tokio::time::sleep(self.chunk_delay).await;
                    }
                }
                Err(e) => {
                    let message = HubError::from(e).client_message();
                    warn!(session_id, error = %message, "Token stream failed");
                    self.emit(session_id, HubEvent::error(message.clone())).await;
                    self.emit(session_id, HubEvent::StreamingCompleted).await;
                    metrics().broadcast_failed(started_at.elapsed());
                    return BroadcastOutcome::Failed { message };
                }
            }
        }

        let text = state.complete();
        let outcome = if text.is_empty() {
            BroadcastOutcome::Empty
        } else {
            self.emit(session_id, HubEvent::final_response(text.clone()))
                .await;
            BroadcastOutcome::Completed { text }
        };
        self.emit(session_id, HubEvent::StreamingCompleted).await;

        metrics().broadcast_completed(started_at.elapsed());
        debug!(session_id, elapsed_ms = started_at.elapsed().as_millis() as u64, "Broadcast completed");
        outcome
    }

    /// Replay finished text word by word, then send it whole as the final response.
    ///
    /// Emits neither `streamingStarted` nor `streamingCompleted`; the caller
    /// owns those. When `watched` is set and every subscriber has left after
    /// a word, the replay stops and reports [`BroadcastOutcome::Abandoned`].
    pub async fn replay_words(
        &self,
        lane: &SessionLane,
        text: &str,
        pacing: Duration,
        watched: bool,
    ) -> BroadcastOutcome {
        let session_id = lane.session_id();
        if text.is_empty() {
            return BroadcastOutcome::Empty;
        }

        for (index, word) in text.split(' ').enumerate() {
            if index > 0 && !pacing.is_zero() {
                tokio::time::sleep(pacing).await;
            }
            self.emit(session_id, HubEvent::chunk(format!("{word} "))).await;
            metrics().chunk_emitted();

            if self.deserted(session_id, watched) {
                info!(session_id, words = index + 1, "All subscribers left, abandoning replay");
                metrics().broadcast_abandoned();
                return BroadcastOutcome::Abandoned;
            }
        }

        self.emit(session_id, HubEvent::final_response(text)).await;
        BroadcastOutcome::Completed {
            text: text.to_string(),
        }
    }

    /// Report a failure that happened before any streaming began
    pub async fn signal_failure(&self, session_id: &str, error: &HubError) {
        self.emit(session_id, HubEvent::error(error.client_message()))
            .await;
        self.emit(session_id, HubEvent::StreamingCompleted).await;
    }

    /// Acknowledge a message that produced no work
    pub async fn signal_ignored(&self, lane: &SessionLane) {
        let session_id = lane.session_id();
        self.emit(session_id, HubEvent::StreamingStarted).await;
        self.emit(session_id, HubEvent::StreamingCompleted).await;
    }
}
