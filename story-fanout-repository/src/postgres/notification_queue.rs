use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use story_fanout_shared::{NotificationEntry, StoryId};
use uuid::Uuid;

use super::PostgresStore;
use crate::errors::StoreError;
use crate::interfaces::NotificationQueueStore;
use crate::types::AppendSummary;
use crate::utils::validate_batch;

/// Places every entry of recipient `$1` in log order, with each author's
/// entries sorted by sequence across the positions that author occupies.
///
/// `slot` is the position an entry would hold had every story of an author
/// been delivered in sequence order. Windows over the log are taken on it.
const PLACED_ENTRIES: &str = r#"
    WITH log AS (
        SELECT idempotency_key,
               author_id,
               position,
               ROW_NUMBER() OVER (PARTITION BY author_id ORDER BY position) AS slot_rank,
               ROW_NUMBER() OVER (PARTITION BY author_id ORDER BY story_sequence, position) AS sequence_rank
        FROM notification_entries
        WHERE recipient_id = $1
    ),
    placed AS (
        SELECT by_sequence.idempotency_key, by_slot.position AS slot
        FROM log by_sequence
        JOIN log by_slot
          ON by_slot.author_id = by_sequence.author_id
         AND by_slot.slot_rank = by_sequence.sequence_rank
    )
"#;

#[derive(sqlx::FromRow)]
struct EntryRow {
    idempotency_key: Uuid,
    recipient_id: String,
    author_id: String,
    story_id: Uuid,
    story_sequence: i64,
    payload: String,
    created_at: DateTime<Utc>,
}

impl From<EntryRow> for NotificationEntry {
    fn from(row: EntryRow) -> Self {
        Self {
            idempotency_key: row.idempotency_key,
            recipient_id: row.recipient_id,
            author_id: row.author_id,
            story_id: row.story_id,
            story_sequence: row.story_sequence,
            payload: row.payload,
            created_at: row.created_at,
        }
    }
}

impl PostgresStore {
    /// Inserts entries in slice order inside an active transaction.
    async fn insert_entries_tx(
        &self,
        entries: &[&NotificationEntry],
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }

        let keys: Vec<Uuid> = entries.iter().map(|e| e.idempotency_key).collect();
        let recipients: Vec<String> = entries.iter().map(|e| e.recipient_id.clone()).collect();
        let authors: Vec<String> = entries.iter().map(|e| e.author_id.clone()).collect();
        let stories: Vec<Uuid> = entries.iter().map(|e| e.story_id).collect();
        let sequences: Vec<i64> = entries.iter().map(|e| e.story_sequence).collect();
        let payloads: Vec<String> = entries.iter().map(|e| e.payload.clone()).collect();
        let created: Vec<DateTime<Utc>> = entries.iter().map(|e| e.created_at).collect();

        sqlx::query(
            r#"
            INSERT INTO notification_entries
                (idempotency_key, recipient_id, author_id, story_id, story_sequence, payload, created_at)
            SELECT k, r, a, s, q, p, c
            FROM UNNEST($1::uuid[], $2::text[], $3::text[], $4::uuid[], $5::int8[], $6::text[], $7::timestamptz[])
                WITH ORDINALITY AS t(k, r, a, s, q, p, c, ord)
            ORDER BY ord
            "#,
        )
        .bind(&keys)
        .bind(&recipients)
        .bind(&authors)
        .bind(&stories)
        .bind(&sequences)
        .bind(&payloads)
        .bind(&created)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl NotificationQueueStore for PostgresStore {
    async fn append_batch(
        &self,
        entries: &[NotificationEntry],
    ) -> Result<AppendSummary, StoreError> {
        validate_batch(entries, &self.config)?;
        if entries.is_empty() {
            return Ok(AppendSummary::default());
        }

        let mut seen = HashSet::with_capacity(entries.len());
        let unique: Vec<&NotificationEntry> = entries
            .iter()
            .filter(|e| seen.insert(e.idempotency_key))
            .collect();
        let keys: Vec<Uuid> = unique.iter().map(|e| e.idempotency_key).collect();
        let stories: Vec<Uuid> = unique.iter().map(|e| e.story_id).collect();

        let mut tx = self.pool.begin().await?;

        let fresh: HashSet<Uuid> = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO notification_keys (idempotency_key, story_id)
            SELECT * FROM UNNEST($1::uuid[], $2::uuid[])
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING idempotency_key
            "#,
        )
        .bind(&keys)
        .bind(&stories)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .collect();

        let new_entries: Vec<&NotificationEntry> = unique
            .into_iter()
            .filter(|e| fresh.contains(&e.idempotency_key))
            .collect();
        self.insert_entries_tx(&new_entries, &mut tx).await?;

        tx.commit().await?;

        let appended = new_entries.len() as u64;
        Ok(AppendSummary {
            appended,
            duplicates: entries.len() as u64 - appended,
        })
    }

    async fn trim(&self, recipient_id: &str, max_len: usize) -> Result<u64, StoreError> {
        let sql = format!(
            r#"{PLACED_ENTRIES}
            DELETE FROM notification_entries
            WHERE idempotency_key IN (
                SELECT idempotency_key FROM placed
                ORDER BY slot DESC
                OFFSET $2
            )
            "#
        );
        let result = sqlx::query(&sql)
            .bind(recipient_id)
            .bind(max_len as i64)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn recent(
        &self,
        recipient_id: &str,
        limit: usize,
    ) -> Result<Vec<NotificationEntry>, StoreError> {
        let sql = format!(
            r#"{PLACED_ENTRIES}
            SELECT e.idempotency_key, e.recipient_id, e.author_id, e.story_id,
                   e.story_sequence, e.payload, e.created_at
            FROM (
                SELECT idempotency_key, slot FROM placed
                ORDER BY slot DESC
                LIMIT $2
            ) newest
            JOIN notification_entries e ON e.idempotency_key = newest.idempotency_key
            ORDER BY newest.slot ASC
            "#
        );
        let rows: Vec<EntryRow> = sqlx::query_as(&sql)
            .bind(recipient_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(NotificationEntry::from).collect())
    }

    async fn count_for_story(&self, story_id: &StoryId) -> Result<u64, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM notification_keys WHERE story_id = $1")
                .bind(story_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }
}
