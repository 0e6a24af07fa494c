use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use boifi_domain::FaultInjectionPolicy;
use boifi_store::{ChangeEvent, ChangeStream};
use futures::StreamExt;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::DistributorError;
use crate::message::DistributorMessage;

pub type SubscriberId = Uuid;

/// Cadence at which `Distributor::run` checks for idle connections and
/// emits a keep-alive.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

struct SubscriberEntry {
    tx: mpsc::Sender<DistributorMessage>,
    consecutive_drops: u32,
}

struct DistributorState {
    policies: HashMap<String, FaultInjectionPolicy>,
    revision: u64,
    subscribers: HashMap<SubscriberId, SubscriberEntry>,
    last_update_at: Instant,
}

impl Default for DistributorState {
    fn default() -> Self {
        Self {
            policies: HashMap::new(),
            revision: 0,
            subscribers: HashMap::new(),
            last_update_at: Instant::now(),
        }
    }
}

/// Holds the canonical distributed view (all policies, keyed by name) and
/// the set of live subscriber handles, fanning out full-snapshot updates.
///
/// Policies are small and the set is bounded, so every broadcast carries a
/// full snapshot rather than a delta: sidecar reconciliation becomes
/// last-writer-wins with no state reconstruction required.
pub struct Distributor {
    state: Arc<RwLock<DistributorState>>,
    queue_capacity: usize,
    max_consecutive_drops: u32,
}

impl Distributor {
    pub fn new(queue_capacity: usize, max_consecutive_drops: u32) -> Self {
        Self {
            state: Arc::new(RwLock::new(DistributorState::default())),
            queue_capacity,
            max_consecutive_drops,
        }
    }

    /// Register a new subscriber with a bounded send queue. The first
    /// message delivered is always a `FullConfig` snapshot, built and
    /// enqueued atomically with registration so no concurrent update can
    /// land in between and be missed.
    pub async fn subscribe(&self) -> (SubscriberId, mpsc::Receiver<DistributorMessage>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let mut guard = self.state.write().await;

        let snapshot = DistributorMessage::FullConfig {
            policies: guard.policies.values().cloned().collect(),
            revision: guard.revision,
        };
        // A fresh channel at its configured capacity cannot be full, so this
        // only fails if queue_capacity is 0 — a misconfiguration, not a
        // runtime condition to special-case.
        let _ = tx.try_send(snapshot);

        let id = Uuid::new_v4();
        guard.subscribers.insert(id, SubscriberEntry { tx, consecutive_drops: 0 });
        debug!(subscriber = %id, total = guard.subscribers.len(), "subscriber registered");
        (id, rx)
    }

    /// Remove and close a subscriber. Safe to call more than once.
    pub async fn unsubscribe(&self, id: SubscriberId) {
        let mut guard = self.state.write().await;
        if guard.subscribers.remove(&id).is_some() {
            debug!(subscriber = %id, "subscriber removed");
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.state.read().await.subscribers.len()
    }

    pub async fn current_revision(&self) -> u64 {
        self.state.read().await.revision
    }

    /// Drive the distributor from a store's change stream. Every event
    /// reconstructs the full snapshot and broadcasts it; this returns only
    /// when the stream itself ends or errors: a store-watch terminal error
    /// ends the distributor and the caller must restart it. Concurrently
    /// ticks `keep_alive_tick` on `KEEP_ALIVE_INTERVAL` so idle subscriber
    /// connections stay detectable even when policies never change.
    pub async fn run(&self, mut changes: ChangeStream) -> Result<(), DistributorError> {
        let mut keep_alive = tokio::time::interval(KEEP_ALIVE_INTERVAL);
        keep_alive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        keep_alive.tick().await; // first tick fires immediately, skip it

        loop {
            tokio::select! {
                event = changes.next() => {
                    match event {
                        Some(event) => self.apply_event(event?).await,
                        None => return Ok(()),
                    }
                }
                _ = keep_alive.tick() => {
                    self.keep_alive_tick(KEEP_ALIVE_INTERVAL).await;
                }
            }
        }
    }

    async fn apply_event(&self, event: ChangeEvent) {
        let mut guard = self.state.write().await;
        match event {
            ChangeEvent::InitSnapshot { policies, revision } => {
                guard.policies = policies.into_iter().map(|p| (p.name().to_string(), p)).collect();
                guard.revision = revision;
            }
            ChangeEvent::Put { policy, revision } => {
                guard.policies.insert(policy.name().to_string(), policy);
                guard.revision = revision;
            }
            ChangeEvent::Delete { name, revision } => {
                guard.policies.remove(&name);
                guard.revision = revision;
            }
        }
        guard.last_update_at = Instant::now();

        let msg = DistributorMessage::Update {
            policies: guard.policies.values().cloned().collect(),
            revision: guard.revision,
        };
        self.broadcast_locked(&mut guard, msg);
    }

    /// Emit a keep-alive to every subscriber if no update has flowed since
    /// the last tick, so idle connections stay detectable. Intended to be
    /// driven by a `tokio::time::interval` loop at a fixed cadence (e.g.
    /// 30s) in the owning binary.
    pub async fn keep_alive_tick(&self, min_idle: Duration) {
        let mut guard = self.state.write().await;
        if guard.last_update_at.elapsed() < min_idle {
            return;
        }
        self.broadcast_locked(&mut guard, DistributorMessage::KeepAlive);
    }

    /// Non-blocking send to every subscriber. A full queue drops that one
    /// message for that subscriber; after `max_consecutive_drops` drops in a
    /// row, the subscriber is evicted outright.
    fn broadcast_locked(&self, guard: &mut DistributorState, msg: DistributorMessage) {
        let mut evict = Vec::new();
        for (id, sub) in guard.subscribers.iter_mut() {
            match sub.tx.try_send(msg.clone()) {
                Ok(()) => sub.consecutive_drops = 0,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    sub.consecutive_drops += 1;
                    if sub.consecutive_drops >= self.max_consecutive_drops {
                        evict.push(*id);
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    evict.push(*id);
                }
            }
        }
        for id in evict {
            warn!(subscriber = %id, "evicting slow or disconnected subscriber");
            guard.subscribers.remove(&id);
        }
    }
}

impl Default for Distributor {
    fn default() -> Self {
        Self::new(100, 3)
    }
}
