use async_trait::async_trait;
use boifi_domain::FaultInjectionPolicy;
use futures::stream::{self, StreamExt};
use sqlx::postgres::{PgListener, PgPoolOptions};
use sqlx::{PgPool, Row};

use crate::error::StoreError;
use crate::store::{ChangeEvent, ChangeStream, PolicyStore};

const NOTIFY_CHANNEL: &str = "boifi_policy_changes";

/// The pluggable external-KV-equivalent backend: policies live in a single
/// Postgres table under a logical "prefix" (the table itself), and a
/// `LISTEN`/`NOTIFY` channel stands in for a raw KV watch — each writer
/// `NOTIFY`s the serialized [`ChangeEvent`] after committing, so every
/// subscriber (including other processes) observes the same linearizable
/// sequence the table itself enforces.
pub struct PostgresPolicyStore {
    pool: PgPool,
}

impl PostgresPolicyStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS boifi_policies (
                name TEXT PRIMARY KEY,
                revision BIGINT NOT NULL,
                body JSONB NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    async fn next_revision(&self, tx: &mut sqlx::Transaction<'_, sqlx::Postgres>) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COALESCE(MAX(revision), 0) + 1 AS next FROM boifi_policies")
            .fetch_one(&mut **tx)
            .await?;
        Ok(row.try_get::<i64, _>("next")?)
    }

    async fn notify(&self, event: &ChangeEvent) -> Result<(), StoreError> {
        let payload = serde_json::to_string(event)?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(NOTIFY_CHANNEL)
            .bind(payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn validated(mut policy: FaultInjectionPolicy) -> Result<FaultInjectionPolicy, StoreError> {
        policy
            .validate_and_normalize()
            .map_err(|e| StoreError::InvalidPolicy(e.to_string()))?;
        Ok(policy)
    }

    fn row_to_policy(row: &sqlx::postgres::PgRow) -> Result<FaultInjectionPolicy, StoreError> {
        let body: serde_json::Value = row.try_get("body")?;
        let mut policy: FaultInjectionPolicy = serde_json::from_value(body)?;
        let revision: i64 = row.try_get("revision")?;
        policy.metadata.revision = Some(revision as u64);
        Ok(policy)
    }
}

#[async_trait]
impl PolicyStore for PostgresPolicyStore {
    async fn put(&self, policy: FaultInjectionPolicy) -> Result<FaultInjectionPolicy, StoreError> {
        let policy = Self::validated(policy)?;
        let name = policy.name().to_string();

        let mut tx = self.pool.begin().await?;
        let revision = self.next_revision(&mut tx).await?;
        let mut stored = policy;
        stored.metadata.revision = Some(revision as u64);
        let body = serde_json::to_value(&stored)?;

        sqlx::query(
            "INSERT INTO boifi_policies (name, revision, body) VALUES ($1, $2, $3)
             ON CONFLICT (name) DO UPDATE SET revision = EXCLUDED.revision, body = EXCLUDED.body",
        )
        .bind(&name)
        .bind(revision)
        .bind(&body)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        let event = ChangeEvent::Put { policy: stored.clone(), revision: revision as u64 };
        self.notify(&event).await?;
        Ok(stored)
    }

    async fn create_only(&self, policy: FaultInjectionPolicy) -> Result<FaultInjectionPolicy, StoreError> {
        let policy = Self::validated(policy)?;
        let name = policy.name().to_string();

        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query("SELECT 1 FROM boifi_policies WHERE name = $1")
            .bind(&name)
            .fetch_optional(&mut *tx)
            .await?;
        if existing.is_some() {
            return Err(StoreError::AlreadyExists(name));
        }

        let revision = self.next_revision(&mut tx).await?;
        let mut stored = policy;
        stored.metadata.revision = Some(revision as u64);
        let body = serde_json::to_value(&stored)?;

        sqlx::query("INSERT INTO boifi_policies (name, revision, body) VALUES ($1, $2, $3)")
            .bind(&name)
            .bind(revision)
            .bind(&body)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let event = ChangeEvent::Put { policy: stored.clone(), revision: revision as u64 };
        self.notify(&event).await?;
        Ok(stored)
    }

    async fn update(&self, name: &str, policy: FaultInjectionPolicy) -> Result<FaultInjectionPolicy, StoreError> {
        if policy.name() != name {
            return Err(StoreError::NameMismatch { path: name.to_string(), body: policy.name().to_string() });
        }
        let policy = Self::validated(policy)?;

        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query("SELECT 1 FROM boifi_policies WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut *tx)
            .await?;
        if existing.is_none() {
            return Err(StoreError::NotFound(name.to_string()));
        }

        let revision = self.next_revision(&mut tx).await?;
        let mut stored = policy;
        stored.metadata.revision = Some(revision as u64);
        let body = serde_json::to_value(&stored)?;

        sqlx::query("UPDATE boifi_policies SET revision = $2, body = $3 WHERE name = $1")
            .bind(name)
            .bind(revision)
            .bind(&body)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let event = ChangeEvent::Put { policy: stored.clone(), revision: revision as u64 };
        self.notify(&event).await?;
        Ok(stored)
    }

    async fn get(&self, name: &str) -> Result<Option<FaultInjectionPolicy>, StoreError> {
        let row = sqlx::query("SELECT revision, body FROM boifi_policies WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_policy).transpose()
    }

    async fn list(&self) -> Result<Vec<FaultInjectionPolicy>, StoreError> {
        let rows = sqlx::query("SELECT revision, body FROM boifi_policies").fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_policy).collect()
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM boifi_policies WHERE name = $1").bind(name).execute(&mut *tx).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(name.to_string()));
        }
        let revision = self.next_revision(&mut tx).await?;
        tx.commit().await?;

        let event = ChangeEvent::Delete { name: name.to_string(), revision: revision as u64 };
        self.notify(&event).await?;
        Ok(())
    }

    async fn watch(&self) -> Result<ChangeStream, StoreError> {
        // LISTEN must be established before the snapshot read, so a write
        // that lands in between is observed twice (snapshot + notify)
        // rather than lost; the Distributor's reconcile-to-full-snapshot
        // model makes a duplicate harmless.
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(NOTIFY_CHANNEL).await?;

        let policies = self.list().await?;
        let revision = policies.iter().filter_map(|p| p.metadata.revision).max().unwrap_or(0);
        let snapshot = ChangeEvent::InitSnapshot { policies, revision };

        let head = stream::once(async move { Ok(snapshot) });
        // `state = None` after the first connection error terminates the
        // stream on the next poll, matching the "single terminal error"
        // failure semantics callers must resubscribe past.
        let tail = stream::unfold(Some(listener), |state| async move {
            let mut listener = state?;
            match listener.recv().await {
                Ok(notification) => {
                    let event: Result<ChangeEvent, StoreError> =
                        serde_json::from_str(notification.payload()).map_err(StoreError::from);
                    Some((event, Some(listener)))
                }
                Err(e) => Some((Err(StoreError::WatchTerminated(e.to_string())), None)),
            }
        });

        Ok(Box::pin(head.chain(tail)))
    }
}
