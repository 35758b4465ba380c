use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::watch;

use crate::model::{NormalizedMessage, SessionState};

/// State shared between the consumption task and its readers.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub transcript: Vec<NormalizedMessage>,
    pub state: SessionState,
    /// Set by `close()`. Once set, nothing is appended.
    pub closed: bool,
    /// Live subscriptions still attached.
    pub live: bool,
}

/// Write side, owned by the consumption task (or dropped immediately for a
/// pre-resolved session).
pub(crate) struct ViewWriter {
    shared: Arc<RwLock<Shared>>,
    revision: watch::Sender<u64>,
}

impl ViewWriter {
    /// Run `f` under the write lock. Readers are not woken; call `notify`.
    pub fn update<R>(&self, f: impl FnOnce(&mut Shared) -> R) -> R {
        let mut guard = write(&self.shared);
        f(&mut guard)
    }

    pub fn notify(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    /// Mark the live machinery gone and wake readers one last time.
    pub fn detach(&self) {
        self.update(|shared| shared.live = false);
        self.notify();
    }
}

fn read(shared: &RwLock<Shared>) -> RwLockReadGuard<'_, Shared> {
    shared.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(shared: &RwLock<Shared>) -> RwLockWriteGuard<'_, Shared> {
    shared.write().unwrap_or_else(PoisonError::into_inner)
}

/// Read-only live view of one session's transcript and lifecycle state.
///
/// Cheap to clone; every clone observes the same session. The transcript only
/// grows, so `since(n)` with the last seen length yields exactly the new
/// entries.
#[derive(Debug, Clone)]
pub struct TranscriptView {
    shared: Arc<RwLock<Shared>>,
    revision: watch::Receiver<u64>,
}

impl TranscriptView {
    pub(crate) fn channel(live: bool) -> (Self, ViewWriter) {
        let shared = Arc::new(RwLock::new(Shared {
            live,
            ..Shared::default()
        }));
        let (tx, rx) = watch::channel(0);
        (
            Self {
                shared: shared.clone(),
                revision: rx,
            },
            ViewWriter {
                shared,
                revision: tx,
            },
        )
    }

    pub(crate) fn mark_closed(&self) {
        let mut guard = write(&self.shared);
        guard.closed = true;
        guard.live = false;
    }

    pub fn state(&self) -> SessionState {
        read(&self.shared).state
    }

    /// Snapshot of the whole transcript.
    pub fn transcript(&self) -> Vec<NormalizedMessage> {
        read(&self.shared).transcript.clone()
    }

    /// Entries appended after the first `offset`.
    pub fn since(&self, offset: usize) -> Vec<NormalizedMessage> {
        read(&self.shared)
            .transcript
            .get(offset..)
            .map(<[NormalizedMessage]>::to_vec)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        read(&self.shared).transcript.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether live subscriptions are still feeding this view.
    pub fn is_live(&self) -> bool {
        read(&self.shared).live
    }

    pub fn is_closed(&self) -> bool {
        read(&self.shared).closed
    }

    /// Wait for the next change. Returns `false` once no further changes can
    /// happen (the session was closed or its grace period ran out).
    pub async fn changed(&mut self) -> bool {
        self.revision.changed().await.is_ok()
    }

    /// Wait until the session reaches a terminal state or stops changing.
    pub async fn wait_terminal(&mut self) -> SessionState {
        loop {
            let state = self.state();
            if state.is_terminal() || !self.changed().await {
                return self.state();
            }
        }
    }
}
