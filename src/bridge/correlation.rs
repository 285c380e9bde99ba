//! Message correlation storage.
//!
//! Durable bidirectional mapping from a message's origin coordinates to
//! its mirrored copy. A mirrored message produces two records, one keyed
//! by the inbound timestamp pointing forward and one keyed by the
//! outbound timestamp pointing back; the pair is written and removed
//! atomically. Insertion is insert-once: a duplicate key or an
//! incomplete record is rejected, which makes retried deliveries no-ops
//! instead of corruption.
//!
//! Two backends share the contract: an in-memory map for ephemeral
//! deployments, and a Postgres table (selected by `DATABASE_URL`) for
//! deployments that must survive restart.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tokio::sync::RwLock;

use crate::common::error::{StoreError, StoreResult};

/// The stored link between an origin message and its mirrored copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationRecord {
    pub in_workspace: String,
    pub in_channel: String,
    pub out_workspace: String,
    pub out_channel: String,
    /// Conversation id the copy was posted to (channel or IM).
    pub out_conversation: String,
    /// Platform timestamp of the copy.
    pub out_ts: String,
}

impl CorrelationRecord {
    /// All six fields are required; incomplete records are rejected.
    pub fn is_complete(&self) -> bool {
        !self.in_workspace.is_empty()
            && !self.in_channel.is_empty()
            && !self.out_workspace.is_empty()
            && !self.out_channel.is_empty()
            && !self.out_conversation.is_empty()
            && !self.out_ts.is_empty()
    }
}

/// Pluggable correlation storage.
#[async_trait]
pub trait CorrelationStore: Send + Sync {
    /// Look up the record keyed by an origin timestamp.
    async fn get(&self, ts: &str) -> StoreResult<Option<CorrelationRecord>>;

    /// Insert-once. Returns `false` (without mutating anything) if the
    /// key already exists or the record is incomplete.
    async fn put(&self, ts: &str, record: CorrelationRecord) -> StoreResult<bool>;

    /// Remove one record. Returns whether it existed.
    async fn delete(&self, ts: &str) -> StoreResult<bool>;

    /// Insert the forward and backward records of a mirrored message
    /// atomically: both are written, or neither.
    async fn put_pair(
        &self,
        forward: (&str, CorrelationRecord),
        backward: (&str, CorrelationRecord),
    ) -> StoreResult<bool>;

    /// Remove both records of a pair together. Returns whether any
    /// record was removed.
    async fn delete_pair(&self, first: &str, second: &str) -> StoreResult<bool>;
}

/// In-memory store for single-process, ephemeral deployments.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, CorrelationRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CorrelationStore for MemoryStore {
    async fn get(&self, ts: &str) -> StoreResult<Option<CorrelationRecord>> {
        Ok(self.records.read().await.get(ts).cloned())
    }

    async fn put(&self, ts: &str, record: CorrelationRecord) -> StoreResult<bool> {
        if !record.is_complete() {
            return Ok(false);
        }
        let mut records = self.records.write().await;
        if records.contains_key(ts) {
            return Ok(false);
        }
        records.insert(ts.to_string(), record);
        Ok(true)
    }

    async fn delete(&self, ts: &str) -> StoreResult<bool> {
        Ok(self.records.write().await.remove(ts).is_some())
    }

    async fn put_pair(
        &self,
        forward: (&str, CorrelationRecord),
        backward: (&str, CorrelationRecord),
    ) -> StoreResult<bool> {
        if !forward.1.is_complete() || !backward.1.is_complete() {
            return Ok(false);
        }
        let mut records = self.records.write().await;
        if records.contains_key(forward.0) || records.contains_key(backward.0) {
            return Ok(false);
        }
        records.insert(forward.0.to_string(), forward.1);
        records.insert(backward.0.to_string(), backward.1);
        Ok(true)
    }

    async fn delete_pair(&self, first: &str, second: &str) -> StoreResult<bool> {
        let mut records = self.records.write().await;
        let removed_first = records.remove(first).is_some();
        let removed_second = records.remove(second).is_some();
        Ok(removed_first || removed_second)
    }
}

/// Postgres-backed store for restart-tolerant deployments.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and provision the `messages` table.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new().connect(url).await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (in_ts TEXT PRIMARY KEY, \
             in_workspace TEXT, in_channel TEXT, out_workspace TEXT, \
             out_channel TEXT, out_conversation TEXT, out_ts TEXT)",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }
}

/// Bind a record's six fields onto an insert statement.
fn bind_record<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ts: &'q str,
    record: &'q CorrelationRecord,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(ts)
        .bind(&record.in_workspace)
        .bind(&record.in_channel)
        .bind(&record.out_workspace)
        .bind(&record.out_channel)
        .bind(&record.out_conversation)
        .bind(&record.out_ts)
}

const INSERT: &str = "INSERT INTO messages (in_ts, in_workspace, in_channel, out_workspace, \
     out_channel, out_conversation, out_ts) VALUES ($1, $2, $3, $4, $5, $6, $7) \
     ON CONFLICT (in_ts) DO NOTHING";

#[async_trait]
impl CorrelationStore for PgStore {
    async fn get(&self, ts: &str) -> StoreResult<Option<CorrelationRecord>> {
        let row = sqlx::query(
            "SELECT in_workspace, in_channel, out_workspace, out_channel, \
             out_conversation, out_ts FROM messages WHERE in_ts = $1",
        )
        .bind(ts)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<CorrelationRecord, StoreError> {
            Ok(CorrelationRecord {
                in_workspace: row.try_get("in_workspace")?,
                in_channel: row.try_get("in_channel")?,
                out_workspace: row.try_get("out_workspace")?,
                out_channel: row.try_get("out_channel")?,
                out_conversation: row.try_get("out_conversation")?,
                out_ts: row.try_get("out_ts")?,
            })
        })
        .transpose()
    }

    async fn put(&self, ts: &str, record: CorrelationRecord) -> StoreResult<bool> {
        if !record.is_complete() {
            return Ok(false);
        }
        let result = bind_record(sqlx::query(INSERT), ts, &record)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, ts: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM messages WHERE in_ts = $1")
            .bind(ts)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn put_pair(
        &self,
        forward: (&str, CorrelationRecord),
        backward: (&str, CorrelationRecord),
    ) -> StoreResult<bool> {
        if !forward.1.is_complete() || !backward.1.is_complete() {
            return Ok(false);
        }
        let mut tx = self.pool.begin().await?;
        let first = bind_record(sqlx::query(INSERT), forward.0, &forward.1)
            .execute(&mut *tx)
            .await?;
        let second = bind_record(sqlx::query(INSERT), backward.0, &backward.1)
            .execute(&mut *tx)
            .await?;
        if first.rows_affected() == 1 && second.rows_affected() == 1 {
            tx.commit().await?;
            Ok(true)
        } else {
            tx.rollback().await?;
            Ok(false)
        }
    }

    async fn delete_pair(&self, first: &str, second: &str) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM messages WHERE in_ts = $1 OR in_ts = $2")
            .bind(first)
            .bind(second)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_record(suffix: &str) -> CorrelationRecord {
        CorrelationRecord {
            in_workspace: "acme".to_string(),
            in_channel: "general".to_string(),
            out_workspace: "partner".to_string(),
            out_channel: "general".to_string(),
            out_conversation: format!("C{}", suffix),
            out_ts: format!("200.{}", suffix),
        }
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = MemoryStore::new();
        let record = make_record("1");

        assert!(store.put("100.1", record.clone()).await.unwrap());
        assert_eq!(store.get("100.1").await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_duplicate_put_rejected_without_mutation() {
        let store = MemoryStore::new();
        let original = make_record("1");
        assert!(store.put("100.1", original.clone()).await.unwrap());

        let mut intruder = make_record("2");
        intruder.out_ts = "999.9".to_string();
        assert!(!store.put("100.1", intruder).await.unwrap());

        assert_eq!(store.get("100.1").await.unwrap(), Some(original));
    }

    #[tokio::test]
    async fn test_incomplete_record_rejected() {
        let store = MemoryStore::new();
        let mut record = make_record("1");
        record.out_ts = String::new();

        assert!(!store.put("100.1", record).await.unwrap());
        assert_eq!(store.get("100.1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryStore::new();
        assert!(store.put("100.1", make_record("1")).await.unwrap());

        assert!(store.delete("100.1").await.unwrap());
        assert_eq!(store.get("100.1").await.unwrap(), None);
        assert!(!store.delete("100.1").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_pair_atomic() {
        let store = MemoryStore::new();
        // Occupy one of the two keys.
        assert!(store.put("200.1", make_record("9")).await.unwrap());

        let inserted = store
            .put_pair(("100.1", make_record("1")), ("200.1", make_record("2")))
            .await
            .unwrap();
        assert!(!inserted);
        // Neither side was written.
        assert_eq!(store.get("100.1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_pair_removes_both() {
        let store = MemoryStore::new();
        assert!(store
            .put_pair(("100.1", make_record("1")), ("200.1", make_record("2")))
            .await
            .unwrap());

        assert!(store.delete_pair("100.1", "200.1").await.unwrap());
        assert_eq!(store.get("100.1").await.unwrap(), None);
        assert_eq!(store.get("200.1").await.unwrap(), None);
    }
}
