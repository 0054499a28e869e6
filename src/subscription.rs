//! Result subscription channel
//!
//! The external engine delivers results out-of-band, keyed by recording
//! identifier. [`ResultRouter`] fans an underlying transport out to
//! independent per-recording subscriptions:
//!
//! - at-most-once delivery per recording identifier — duplicate envelopes
//!   from the transport are dropped before they reach the orchestrator;
//! - explicit release semantics — a subscription is unregistered
//!   synchronously by [`ResultSubscription::release`] (or on drop), so
//!   cancellation cannot leak it;
//! - many recordings in flight concurrently, each with its own subscription.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::biomarkers::feature_map::FeatureMap;

/// What the engine reported for one recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineOutcome {
    /// Analysis succeeded; flat feature map attached
    Completed(FeatureMap),
    /// Engine-side processing failure
    Failed(String),
}

/// One transport message: an engine outcome for a recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub recording_id: Uuid,
    pub outcome: EngineOutcome,
}

struct SubscriberEntry {
    /// Identifies which subscription generation owns the slot, so a stale
    /// release cannot evict a successor subscription for the same recording
    token: u64,
    tx: mpsc::UnboundedSender<EngineOutcome>,
}

struct RouterState {
    subscribers: HashMap<Uuid, SubscriberEntry>,
    delivered: HashSet<Uuid>,
    next_token: u64,
}

struct RouterShared {
    state: Mutex<RouterState>,
}

/// Fans engine results out to per-recording subscriptions.
pub struct ResultRouter {
    shared: Arc<RouterShared>,
}

impl Default for ResultRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultRouter {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(RouterShared {
                state: Mutex::new(RouterState {
                    subscribers: HashMap::new(),
                    delivered: HashSet::new(),
                    next_token: 0,
                }),
            }),
        }
    }

    /// Subscribe for the result of one recording.
    ///
    /// Re-arms delivery for the identifier: a fresh analysis of a recording
    /// that already completed once gets its result again.
    pub fn subscribe(&self, recording_id: Uuid) -> ResultSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = {
            let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            state.delivered.remove(&recording_id);
            let token = state.next_token;
            state.next_token += 1;
            if state
                .subscribers
                .insert(recording_id, SubscriberEntry { token, tx })
                .is_some()
            {
                warn!("Replacing existing result subscription for {}", recording_id);
            }
            token
        };
        ResultSubscription {
            recording_id,
            token,
            rx,
            shared: Arc::clone(&self.shared),
            released: false,
        }
    }

    /// Release a subscription by (recording, token) without owning the
    /// subscription object. Synchronous; a stale token is a no-op.
    pub(crate) fn release_token(&self, recording_id: Uuid, token: u64) {
        let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        if state
            .subscribers
            .get(&recording_id)
            .map(|entry| entry.token == token)
            .unwrap_or(false)
        {
            state.subscribers.remove(&recording_id);
        }
    }

    /// Handle for transport integrations to inject envelopes.
    pub fn publisher(&self) -> ResultPublisher {
        ResultPublisher {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Pipe a transport stream into the router on a background task.
    pub fn connect<S>(&self, mut stream: S) -> JoinHandle<()>
    where
        S: Stream<Item = ResultEnvelope> + Send + Unpin + 'static,
    {
        let publisher = self.publisher();
        tokio::spawn(async move {
            while let Some(envelope) = stream.next().await {
                publisher.publish(envelope);
            }
            debug!("Result transport stream ended");
        })
    }

    /// Number of live subscriptions (used by leak checks).
    pub fn subscription_count(&self) -> usize {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .subscribers
            .len()
    }
}

/// Cloneable injection handle for the underlying transport.
#[derive(Clone)]
pub struct ResultPublisher {
    shared: Arc<RouterShared>,
}

impl ResultPublisher {
    /// Deliver an envelope to its subscription, deduplicating by recording
    /// identifier.
    pub fn publish(&self, envelope: ResultEnvelope) {
        let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());

        if state.delivered.contains(&envelope.recording_id) {
            debug!(
                "Dropping duplicate engine result for {}",
                envelope.recording_id
            );
            return;
        }

        match state.subscribers.get(&envelope.recording_id) {
            Some(entry) => {
                if entry.tx.send(envelope.outcome).is_ok() {
                    let id = envelope.recording_id;
                    state.delivered.insert(id);
                } else {
                    debug!(
                        "Subscriber for {} gone before delivery",
                        envelope.recording_id
                    );
                }
            }
            None => {
                debug!("No subscription for engine result {}", envelope.recording_id);
            }
        }
    }
}

/// A live subscription for one recording's result.
pub struct ResultSubscription {
    recording_id: Uuid,
    token: u64,
    rx: mpsc::UnboundedReceiver<EngineOutcome>,
    shared: Arc<RouterShared>,
    released: bool,
}

impl ResultSubscription {
    pub fn recording_id(&self) -> Uuid {
        self.recording_id
    }

    /// Token identifying this subscription generation at the router.
    pub(crate) fn token(&self) -> u64 {
        self.token
    }

    /// Await the engine outcome. Returns `None` once released.
    pub async fn recv(&mut self) -> Option<EngineOutcome> {
        self.rx.recv().await
    }

    /// Unregister from the router. Synchronous: after this returns the
    /// router holds no reference to this subscription.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        if state
            .subscribers
            .get(&self.recording_id)
            .map(|entry| entry.token == self.token)
            .unwrap_or(false)
        {
            state.subscribers.remove(&self.recording_id);
        }
    }
}

impl Drop for ResultSubscription {
    fn drop(&mut self) {
        self.release();
    }
}
