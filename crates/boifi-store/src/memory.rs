use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use boifi_domain::FaultInjectionPolicy;
use futures::stream::{self, StreamExt};
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::BroadcastStream;

use crate::error::StoreError;
use crate::store::{ChangeEvent, ChangeStream, PolicyStore};

const BROADCAST_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct Inner {
    policies: HashMap<String, FaultInjectionPolicy>,
    revision: u64,
}

/// In-memory [`PolicyStore`]: a single read/write lock guards the map, and a
/// broadcast fan-out channel drives `watch()`. Suitable for tests and
/// single-process deployments; the revision counter is monotonic for the
/// lifetime of the process.
pub struct InMemoryPolicyStore {
    inner: Arc<RwLock<Inner>>,
    tx: broadcast::Sender<ChangeEvent>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        Self { inner: Arc::new(RwLock::new(Inner::default())), tx }
    }

    fn validated(mut policy: FaultInjectionPolicy) -> Result<FaultInjectionPolicy, StoreError> {
        policy
            .validate_and_normalize()
            .map_err(|e| StoreError::InvalidPolicy(e.to_string()))?;
        Ok(policy)
    }
}

impl Default for InMemoryPolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn put(&self, policy: FaultInjectionPolicy) -> Result<FaultInjectionPolicy, StoreError> {
        let policy = Self::validated(policy)?;
        let name = policy.name().to_string();

        let mut guard = self.inner.write().await;
        let unchanged = guard
            .policies
            .get(&name)
            .map_or(false, |existing| existing.content_hash() == policy.content_hash());

        if unchanged {
            return Ok(guard.policies.get(&name).unwrap().clone());
        }

        guard.revision += 1;
        let revision = guard.revision;
        let mut stored = policy;
        stored.metadata.revision = Some(revision);
        guard.policies.insert(name, stored.clone());

        // No subscribers is not an error — broadcast::send fails only when
        // there are zero receivers, which is a normal steady state.
        let _ = self.tx.send(ChangeEvent::Put { policy: stored.clone(), revision });
        Ok(stored)
    }

    async fn create_only(&self, policy: FaultInjectionPolicy) -> Result<FaultInjectionPolicy, StoreError> {
        let policy = Self::validated(policy)?;
        let name = policy.name().to_string();

        let mut guard = self.inner.write().await;
        if guard.policies.contains_key(&name) {
            return Err(StoreError::AlreadyExists(name));
        }

        guard.revision += 1;
        let revision = guard.revision;
        let mut stored = policy;
        stored.metadata.revision = Some(revision);
        guard.policies.insert(name, stored.clone());

        let _ = self.tx.send(ChangeEvent::Put { policy: stored.clone(), revision });
        Ok(stored)
    }

    async fn update(&self, name: &str, policy: FaultInjectionPolicy) -> Result<FaultInjectionPolicy, StoreError> {
        if policy.name() != name {
            return Err(StoreError::NameMismatch { path: name.to_string(), body: policy.name().to_string() });
        }
        let policy = Self::validated(policy)?;

        let mut guard = self.inner.write().await;
        if !guard.policies.contains_key(name) {
            return Err(StoreError::NotFound(name.to_string()));
        }

        guard.revision += 1;
        let revision = guard.revision;
        let mut stored = policy;
        stored.metadata.revision = Some(revision);
        guard.policies.insert(name.to_string(), stored.clone());

        let _ = self.tx.send(ChangeEvent::Put { policy: stored.clone(), revision });
        Ok(stored)
    }

    async fn get(&self, name: &str) -> Result<Option<FaultInjectionPolicy>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.policies.get(name).cloned())
    }

    async fn list(&self) -> Result<Vec<FaultInjectionPolicy>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.policies.values().cloned().collect())
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if guard.policies.remove(name).is_none() {
            return Err(StoreError::NotFound(name.to_string()));
        }
        guard.revision += 1;
        let revision = guard.revision;
        let _ = self.tx.send(ChangeEvent::Delete { name: name.to_string(), revision });
        Ok(())
    }

    async fn watch(&self) -> Result<ChangeStream, StoreError> {
        // Snapshot capture and broadcast subscription must happen under the
        // same lock so no write lands in the gap between them — otherwise a
        // subscriber could either miss a change or see it twice.
        let guard = self.inner.read().await;
        let snapshot = ChangeEvent::InitSnapshot {
            policies: guard.policies.values().cloned().collect(),
            revision: guard.revision,
        };
        let rx = self.tx.subscribe();
        drop(guard);

        let head = stream::once(async move { Ok(snapshot) });
        let tail = BroadcastStream::new(rx).map(|item| match item {
            Ok(event) => Ok(event),
            Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(n)) => {
                Err(StoreError::WatchTerminated(format!("subscriber lagged by {n} messages")))
            }
        });

        Ok(Box::pin(head.chain(tail)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boifi_domain::{FaultAction, FaultRule, MatchPredicate, PolicyMetadata, PolicySpec, Selector};

    fn dummy_policy(name: &str) -> FaultInjectionPolicy {
        FaultInjectionPolicy {
            metadata: PolicyMetadata { name: name.to_string(), version: None, revision: None },
            spec: PolicySpec {
                selector: Selector::default(),
                rules: vec![FaultRule {
                    match_predicate: MatchPredicate::default(),
                    fault: FaultAction::Abort { http_status: 503 },
                    percentage: 100.0,
                    start_delay_ms: None,
                    duration_seconds: None,
                }],
            },
        }
    }

    #[tokio::test]
    async fn put_assigns_revision() {
        let store = InMemoryPolicyStore::new();
        let stored = store.put(dummy_policy("a")).await.unwrap();
        assert_eq!(stored.metadata.revision, Some(1));
    }

    #[tokio::test]
    async fn create_only_rejects_conflict() {
        let store = InMemoryPolicyStore::new();
        store.create_only(dummy_policy("a")).await.unwrap();
        let err = store.create_only(dummy_policy("a")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let store = InMemoryPolicyStore::new();
        let err = store.update("missing", dummy_policy("missing")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_name_mismatch_rejected() {
        let store = InMemoryPolicyStore::new();
        store.put(dummy_policy("a")).await.unwrap();
        let err = store.update("a", dummy_policy("b")).await.unwrap_err();
        assert!(matches!(err, StoreError::NameMismatch { .. }));
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let store = InMemoryPolicyStore::new();
        assert!(matches!(store.delete("missing").await.unwrap_err(), StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn watch_first_event_is_snapshot() {
        let store = InMemoryPolicyStore::new();
        store.put(dummy_policy("a")).await.unwrap();

        let mut stream = store.watch().await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert!(matches!(first, ChangeEvent::InitSnapshot { .. }));
    }

    #[tokio::test]
    async fn watch_sees_subsequent_put_in_order() {
        let store = InMemoryPolicyStore::new();
        let mut stream = store.watch().await.unwrap();
        let _ = stream.next().await.unwrap().unwrap(); // snapshot

        store.put(dummy_policy("a")).await.unwrap();
        let event = stream.next().await.unwrap().unwrap();
        match event {
            ChangeEvent::Put { policy, revision } => {
                assert_eq!(policy.name(), "a");
                assert_eq!(revision, 1);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn unchanged_put_does_not_broadcast() {
        let store = InMemoryPolicyStore::new();
        store.put(dummy_policy("a")).await.unwrap();

        let mut stream = store.watch().await.unwrap();
        let _ = stream.next().await.unwrap().unwrap(); // snapshot

        // Re-put the byte-identical policy (content-hash unchanged).
        store.put(dummy_policy("a")).await.unwrap();
        // Put a second, distinct policy so the stream has something to
        // yield; if the first re-put had broadcast, this would be the
        // second item instead of the first.
        store.put(dummy_policy("b")).await.unwrap();

        let event = stream.next().await.unwrap().unwrap();
        match event {
            ChangeEvent::Put { policy, .. } => assert_eq!(policy.name(), "b"),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
