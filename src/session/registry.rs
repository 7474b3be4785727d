use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

use crate::progress::{EventKind, ProgressEvent, CONNECTED_MESSAGE};

/// Events queued for one progress client before newer ones are dropped.
const SUBSCRIBER_BUFFER: usize = 64;

/// Ownership ticket for the process currently serving a session.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    token: u64,
    pid: Option<u32>,
    cancel: CancellationToken,
}

impl ProcessHandle {
    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Asks the owning orchestrator to kill the process.
    pub fn terminate(&self) {
        self.cancel.cancel();
    }

    pub fn is_terminated(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once [`terminate`](Self::terminate) was called on any clone.
    pub async fn terminated(&self) {
        self.cancel.cancelled().await
    }
}

#[derive(Debug)]
struct SubscriberHandle {
    token: u64,
    tx: mpsc::Sender<ProgressEvent>,
}

#[derive(Debug, Default)]
struct SessionEntry {
    process: Option<ProcessHandle>,
    subscriber: Option<SubscriberHandle>,
}

/// Point-in-time view of one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionView {
    pub process_token: Option<u64>,
    pub pid: Option<u32>,
    pub has_subscriber: bool,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    next_token: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn issue_token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Installs a new process for `id`, creating the entry if needed. Any
    /// process already registered there is terminated first.
    pub fn upsert_process(&self, id: &str, pid: Option<u32>) -> ProcessHandle {
        let handle = ProcessHandle { token: self.issue_token(), pid, cancel: CancellationToken::new() };
        let mut sessions = self.sessions.lock();
        let entry = sessions.entry(id.to_string()).or_default();
        if let Some(previous) = entry.process.replace(handle.clone()) {
            tracing::info!("Replacing process {:?} of session {}", previous.pid, id);
            previous.terminate();
        }
        handle
    }

    /// Attaches a new progress subscriber to `id`, creating the entry if
    /// needed. A previously attached subscriber is dropped, which ends its stream.
    pub fn attach_subscriber(self: &Arc<Self>, id: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        // Queued before the handle is visible, so it is always the first message.
        let _ = tx.try_send(ProgressEvent::new(id, EventKind::status(CONNECTED_MESSAGE)));

        let token = self.issue_token();
        let mut sessions = self.sessions.lock();
        let entry = sessions.entry(id.to_string()).or_default();
        if entry.process.is_none() {
            tracing::debug!("Progress subscriber for {} arrived before its download", id);
        }
        entry.subscriber = Some(SubscriberHandle { token, tx });

        Subscription { id: id.to_string(), token, rx, registry: Arc::clone(self) }
    }

    /// Clears the subscriber of `id` if it is still the one identified by
    /// `token`. Never removes the entry and never touches the process.
    pub fn detach_subscriber(&self, id: &str, token: u64) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(id) {
            Some(entry) if entry.subscriber.as_ref().is_some_and(|s| s.token == token) => {
                entry.subscriber = None;
                true
            }
            _ => false,
        }
    }

    pub fn lookup(&self, id: &str) -> Option<SessionView> {
        self.sessions.lock().get(id).map(|entry| SessionView {
            process_token: entry.process.as_ref().map(ProcessHandle::token),
            pid: entry.process.as_ref().and_then(ProcessHandle::pid),
            has_subscriber: entry.subscriber.as_ref().is_some_and(|s| !s.tx.is_closed()),
        })
    }

    /// Delivers `kind` to the subscriber of `id`. Without an open subscriber
    /// the event is dropped; nothing is buffered for late subscribers. A client
    /// that stopped reading loses events once its queue is full.
    pub fn publish(&self, id: &str, kind: EventKind) -> bool {
        let sessions = self.sessions.lock();
        let Some(subscriber) = sessions.get(id).and_then(|e| e.subscriber.as_ref()) else {
            return false;
        };
        if subscriber.tx.is_closed() {
            return false;
        }
        match subscriber.tx.try_send(ProgressEvent::new(id, kind)) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                tracing::debug!("Progress client for {} is lagging, dropped {:?}", id, event.kind);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Removes `id` unconditionally. Dropping the entry closes its subscriber.
    pub fn remove(&self, id: &str) -> bool {
        self.sessions.lock().remove(id).is_some()
    }

    /// Removes `id` only if its process is still the one identified by `owner`.
    /// With `owner == None` the entry is removed only when no process holds it.
    pub fn release(&self, id: &str, owner: Option<u64>) -> bool {
        let mut sessions = self.sessions.lock();
        let owned = match sessions.get(id) {
            Some(entry) => entry.process.as_ref().map(ProcessHandle::token) == owner,
            None => false,
        };
        if owned {
            sessions.remove(id);
        }
        owned
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

/// A live progress subscription. Yields events until the session ends;
/// detaches itself from the registry when dropped.
#[derive(Debug)]
pub struct Subscription {
    id: String,
    token: u64,
    rx: mpsc::Receiver<ProgressEvent>,
    registry: Arc<SessionRegistry>,
}

impl Subscription {
    pub fn session_id(&self) -> &str {
        &self.id
    }
}

impl Stream for Subscription {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.registry.detach_subscriber(&self.id, self.token) {
            tracing::info!("Progress client for {} disconnected.", self.id);
        }
    }
}
