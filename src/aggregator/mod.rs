//! Live transcript of one sub-agent session.
//!
//! `SessionAggregator::open` subscribes to the parent session's lifecycle
//! topics (and optionally the broadcast topics), then spawns one task that
//! feeds every inbound event through a [`SessionPipeline`] in arrival order.
//! Readers observe the result through a [`TranscriptView`].
//!
//! A session whose outcome is already known is resolved without touching
//! the transport at all.

mod pipeline;
mod terminal;
mod view;

pub use pipeline::{Decision, DropReason, SessionPipeline};
pub use terminal::TerminalResult;
pub use view::TranscriptView;

use std::future;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::bus::{EventSource, Transport};
use crate::config::AggregatorConfig;
use crate::error::{AggregatorError, TransportError};
use crate::lifecycle::{Lifecycle, Transition};
use crate::model::{NormalizedMessage, SessionIdentity, SessionState, Topic};
use view::ViewWriter;

#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Also listen on the broadcast topics, correlating heuristically.
    pub listen_fallback_topics: bool,
    /// Known outcome; skips subscribing entirely.
    pub terminal_result: Option<TerminalResult>,
    pub config: AggregatorConfig,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.listen_fallback_topics = enabled;
        self
    }

    pub fn with_terminal_result(mut self, result: impl Into<TerminalResult>) -> Self {
        self.terminal_result = Some(result.into());
        self
    }

    pub fn with_config(mut self, config: AggregatorConfig) -> Self {
        self.config = config;
        self
    }
}

pub struct SessionAggregator;

impl SessionAggregator {
    /// Start observing a session.
    ///
    /// Every subscription is in place when this returns, so events published
    /// afterwards are not missed. On failure nothing stays subscribed.
    pub async fn open<T: Transport>(
        transport: &T,
        identity: SessionIdentity,
        options: OpenOptions,
    ) -> Result<SessionHandle, AggregatorError> {
        let OpenOptions {
            listen_fallback_topics,
            terminal_result,
            config,
        } = options;

        if let Some(result) = terminal_result {
            return Ok(Self::resolved(identity, &result));
        }

        let mut topics = Topic::all_for(&identity.parent_session_id);
        if listen_fallback_topics {
            topics.extend(config.broadcast_topics());
        }

        let source = EventSource::subscribe(transport, topics, config.channel_capacity).await?;
        info!(
            session = %identity,
            topics = source.topics().count(),
            fallback = listen_fallback_topics,
            "session aggregator opened"
        );

        let (view, writer) = TranscriptView::channel(true);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let pipeline = SessionPipeline::new(identity.clone(), &config, listen_fallback_topics);
        let task = tokio::spawn(consume(source, pipeline, writer, shutdown_rx, config.grace_period));

        Ok(SessionHandle {
            identity,
            view,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    fn resolved(identity: SessionIdentity, result: &TerminalResult) -> SessionHandle {
        let state = Lifecycle::new().resolve_out_of_band(result.is_error());
        let summary = result.summary();
        info!(session = %identity, %state, "session resolved from known result");

        let (view, writer) = TranscriptView::channel(false);
        writer.update(|shared| {
            shared.transcript.push(summary);
            shared.state = state;
        });
        writer.notify();

        SessionHandle {
            identity,
            view,
            shutdown: None,
            task: None,
        }
    }
}

/// Owner of a live (or resolved) session.
///
/// Dropping the handle stops the consumption task, which releases its
/// subscriptions on the way out. `close()` does the same and waits for it.
pub struct SessionHandle {
    identity: SessionIdentity,
    view: TranscriptView,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<(), TransportError>>>,
}

impl SessionHandle {
    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    /// A view that stays readable after the handle is closed.
    pub fn view(&self) -> TranscriptView {
        self.view.clone()
    }

    pub fn state(&self) -> SessionState {
        self.view.state()
    }

    pub fn transcript(&self) -> Vec<NormalizedMessage> {
        self.view.transcript()
    }

    pub fn len(&self) -> usize {
        self.view.len()
    }

    pub fn is_empty(&self) -> bool {
        self.view.is_empty()
    }

    pub fn is_live(&self) -> bool {
        self.view.is_live()
    }

    /// Stop observing and release every subscription. Idempotent in effect:
    /// a resolved or already torn-down session closes trivially.
    pub async fn close(mut self) -> Result<(), AggregatorError> {
        self.view.mark_closed();
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        task.await??;
        debug!(session = %self.identity, "session aggregator closed");
        Ok(())
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.shutdown.is_none() && self.task.is_none() {
            return;
        }
        self.view.mark_closed();
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

enum Outcome {
    Appended(Option<Transition>),
    Dropped,
    Closed,
}

async fn sleep_until_or_forever(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => future::pending().await,
    }
}

/// Drives one session until it is told to stop or its source ends.
///
/// # Imperative Shell
/// Owns the subscriptions and the receive loop. Every decision about an
/// event is made by `SessionPipeline`.
async fn consume<T: Transport>(
    mut source: EventSource<T>,
    mut pipeline: SessionPipeline,
    writer: ViewWriter,
    mut shutdown: oneshot::Receiver<()>,
    grace: Option<Duration>,
) -> Result<(), TransportError> {
    let identity = pipeline.identity().clone();
    let mut teardown_at: Option<Instant> = None;

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                debug!(session = %identity, "shutdown requested");
                break;
            }
            _ = sleep_until_or_forever(teardown_at) => {
                info!(session = %identity, "grace period elapsed, releasing subscriptions");
                break;
            }
            next = source.recv() => {
                let Some(raw) = next else {
                    warn!(session = %identity, "event stream ended");
                    break;
                };
                let outcome = writer.update(|shared| {
                    if shared.closed {
                        return Outcome::Closed;
                    }
                    match pipeline.process(&raw) {
                        Decision::Append { message, transition, state } => {
                            shared.transcript.push(message);
                            shared.state = state;
                            Outcome::Appended(transition)
                        }
                        Decision::Drop(_) => Outcome::Dropped,
                    }
                });
                let transition = match outcome {
                    Outcome::Appended(transition) => transition,
                    Outcome::Dropped => continue,
                    Outcome::Closed => break,
                };
                writer.notify();

                if let Some(transition) = transition {
                    info!(session = %identity, from = %transition.from, to = %transition.to, "session state changed");
                    if transition.to.is_terminal() && teardown_at.is_none() {
                        if let Some(grace) = grace {
                            teardown_at = Some(Instant::now() + grace);
                        }
                    }
                }
            }
        }
    }

    writer.detach();
    source.close()
}
