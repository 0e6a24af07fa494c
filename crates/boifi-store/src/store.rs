use std::pin::Pin;

use async_trait::async_trait;
use boifi_domain::FaultInjectionPolicy;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// A single notification from [`PolicyStore::watch`]. The first event
/// delivered to any new subscriber is always an `InitSnapshot`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChangeEvent {
    InitSnapshot { policies: Vec<FaultInjectionPolicy>, revision: u64 },
    Put { policy: FaultInjectionPolicy, revision: u64 },
    Delete { name: String, revision: u64 },
}

impl ChangeEvent {
    pub fn revision(&self) -> u64 {
        match self {
            ChangeEvent::InitSnapshot { revision, .. } => *revision,
            ChangeEvent::Put { revision, .. } => *revision,
            ChangeEvent::Delete { revision, .. } => *revision,
        }
    }
}

pub type ChangeStream = Pin<Box<dyn Stream<Item = Result<ChangeEvent, StoreError>> + Send>>;

/// Authoritative CRUD over [`FaultInjectionPolicy`] records with change
/// notifications. Two backends share this contract: an in-memory store and
/// an external-KV-backed store, so the Distributor never needs to know
/// which one it is driving.
#[async_trait]
pub trait PolicyStore: Send + Sync + 'static {
    /// Upsert by `metadata.name`, assigning a new monotonic revision and
    /// emitting a change event. Fails with `InvalidPolicy` on schema
    /// violation.
    async fn put(&self, policy: FaultInjectionPolicy) -> Result<FaultInjectionPolicy, StoreError>;

    /// Like [`PolicyStore::put`] but fails with `AlreadyExists` if the name
    /// is taken.
    async fn create_only(&self, policy: FaultInjectionPolicy) -> Result<FaultInjectionPolicy, StoreError>;

    /// Fails with `NotFound` if `name` is absent.
    async fn update(&self, name: &str, policy: FaultInjectionPolicy) -> Result<FaultInjectionPolicy, StoreError>;

    async fn get(&self, name: &str) -> Result<Option<FaultInjectionPolicy>, StoreError>;

    async fn list(&self) -> Result<Vec<FaultInjectionPolicy>, StoreError>;

    /// Fails with `NotFound` if `name` is absent.
    async fn delete(&self, name: &str) -> Result<(), StoreError>;

    /// Subscribe to the change stream. The first item is always an
    /// `InitSnapshot` enumerating every current policy atomically with
    /// respect to subsequent events — no event for a write that happened
    /// before the snapshot was taken can arrive afterward.
    async fn watch(&self) -> Result<ChangeStream, StoreError>;
}
