//! Session lifecycle state machine.
//!
//! `Completed` and `Errored` are absorbing: once reached, no event moves the
//! state anywhere else.

use tracing::debug;

use crate::model::{SessionState, Topic, TopicKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    Start,
    Message,
    Complete,
    Error,
}

impl LifecycleEvent {
    /// Event named by a topic. Broadcast topics name none, so their traffic
    /// is an ordinary message.
    pub fn from_topic(topic: &Topic) -> Self {
        Self::from_kind(topic.kind())
    }

    pub fn from_kind(kind: Option<TopicKind>) -> Self {
        match kind {
            Some(TopicKind::Started) => LifecycleEvent::Start,
            Some(TopicKind::Complete) => LifecycleEvent::Complete,
            Some(TopicKind::Error) => LifecycleEvent::Error,
            Some(TopicKind::Message | TopicKind::Output) | None => LifecycleEvent::Message,
        }
    }

    /// Start and completion are honored once per session.
    pub fn is_marker(self) -> bool {
        matches!(self, LifecycleEvent::Start | LifecycleEvent::Complete)
    }
}

/// # Functional Core
/// Pure transition function.
pub fn next_state(state: SessionState, event: LifecycleEvent) -> SessionState {
    use LifecycleEvent as E;
    use SessionState as S;

    match (state, event) {
        (S::Completed | S::Errored, _) => state,
        (_, E::Error) => S::Errored,
        (_, E::Complete) => S::Completed,
        (S::Idle, E::Start) => S::Starting,
        // Attached after the start was missed.
        (S::Idle, E::Message) => S::Active,
        (S::Starting | S::Active, E::Message) => S::Active,
        (S::Starting | S::Active, E::Start) => state,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
}

#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    state: SessionState,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Apply an event; returns the transition if the state changed.
    pub fn apply(&mut self, event: LifecycleEvent) -> Option<Transition> {
        let from = self.state;
        let to = next_state(from, event);
        if from == to {
            return None;
        }
        debug!(%from, %to, ?event, "lifecycle transition");
        self.state = to;
        Some(Transition { from, to })
    }

    /// Fast path for a result known before observation started.
    pub fn resolve_out_of_band(&mut self, errored: bool) -> SessionState {
        self.apply(LifecycleEvent::Start);
        self.apply(if errored {
            LifecycleEvent::Error
        } else {
            LifecycleEvent::Complete
        });
        self.state
    }
}
