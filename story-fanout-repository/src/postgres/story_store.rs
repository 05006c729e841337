use async_trait::async_trait;
use chrono::{DateTime, Utc};
use story_fanout_shared::{FanoutJob, Story, StoryId};
use uuid::Uuid;

use super::fanout_job_store::insert_job;
use super::PostgresStore;
use crate::errors::StoreError;
use crate::interfaces::StoryStore;

#[derive(sqlx::FromRow)]
struct StoryRow {
    id: Uuid,
    author_id: String,
    content: String,
    sequence: i64,
    created_at: DateTime<Utc>,
}

impl From<StoryRow> for Story {
    fn from(row: StoryRow) -> Self {
        Self {
            id: row.id,
            author_id: row.author_id,
            content: row.content,
            sequence: row.sequence,
            created_at: row.created_at,
        }
    }
}

impl PostgresStore {
    /// Assign the author's next sequence and insert the story inside an
    /// active transaction.
    async fn insert_story_tx(
        &self,
        author_id: &str,
        content: &str,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ) -> Result<Story, StoreError> {
        if author_id.is_empty() {
            return Err(StoreError::invalid_input("Author id must not be empty"));
        }

        // The upsert holds the author's row lock until commit, so concurrent
        // publishers for one author receive consecutive sequences.
        let sequence: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO author_sequences (author_id, last_sequence)
            VALUES ($1, 1)
            ON CONFLICT (author_id)
            DO UPDATE SET last_sequence = author_sequences.last_sequence + 1
            RETURNING last_sequence
            "#,
        )
        .bind(author_id)
        .fetch_one(&mut **tx)
        .await?;

        let story = Story::new(author_id, content, sequence);
        sqlx::query(
            "INSERT INTO stories (id, author_id, content, sequence, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(story.id)
        .bind(&story.author_id)
        .bind(&story.content)
        .bind(story.sequence)
        .bind(story.created_at)
        .execute(&mut **tx)
        .await?;

        Ok(story)
    }
}

#[async_trait]
impl StoryStore for PostgresStore {
    async fn create_story(&self, author_id: &str, content: &str) -> Result<Story, StoreError> {
        let mut tx = self.pool.begin().await?;
        let story = self.insert_story_tx(author_id, content, &mut tx).await?;
        tx.commit().await?;
        Ok(story)
    }

    async fn create_story_with_job(
        &self,
        author_id: &str,
        content: &str,
    ) -> Result<(Story, FanoutJob), StoreError> {
        let mut tx = self.pool.begin().await?;
        let story = self.insert_story_tx(author_id, content, &mut tx).await?;
        let job = FanoutJob::for_story(&story);
        insert_job(&job, &mut *tx).await?;
        tx.commit().await?;
        Ok((story, job))
    }

    async fn get_story(&self, story_id: &StoryId) -> Result<Option<Story>, StoreError> {
        let row: Option<StoryRow> = sqlx::query_as(
            "SELECT id, author_id, content, sequence, created_at FROM stories WHERE id = $1",
        )
        .bind(story_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Story::from))
    }
}
