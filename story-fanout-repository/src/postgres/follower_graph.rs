use async_trait::async_trait;
use story_fanout_shared::{FollowerCursor, FollowerPage, UserId};

use super::PostgresStore;
use crate::errors::StoreError;
use crate::interfaces::FollowerGraphStore;
use crate::utils::{decode_cursor, encode_cursor, validate_page_size};

#[async_trait]
impl FollowerGraphStore for PostgresStore {
    async fn add_followers(
        &self,
        author_id: &str,
        follower_ids: &[UserId],
    ) -> Result<u64, StoreError> {
        if author_id.is_empty() || follower_ids.iter().any(String::is_empty) {
            return Err(StoreError::invalid_input("User ids must not be empty"));
        }
        if follower_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            INSERT INTO followers (author_id, follower_id)
            SELECT $1, f FROM UNNEST($2::text[]) AS f
            ON CONFLICT (author_id, follower_id) DO NOTHING
            "#,
        )
        .bind(author_id)
        .bind(follower_ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn iterate_followers(
        &self,
        author_id: &str,
        cursor: Option<&FollowerCursor>,
        page_size: usize,
    ) -> Result<FollowerPage, StoreError> {
        validate_page_size(page_size, &self.config)?;
        let after = cursor.map(decode_cursor).transpose()?;

        // One extra row tells us whether another page exists.
        let mut followers: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT follower_id FROM followers
            WHERE author_id = $1 AND ($2::text IS NULL OR follower_id > $2)
            ORDER BY follower_id
            LIMIT $3
            "#,
        )
        .bind(author_id)
        .bind(after)
        .bind((page_size + 1) as i64)
        .fetch_all(&self.pool)
        .await?;

        let done = followers.len() <= page_size;
        followers.truncate(page_size);

        let next_cursor = match followers.last() {
            Some(last) => Some(encode_cursor(last)),
            None => cursor.cloned(),
        };
        Ok(FollowerPage {
            followers,
            next_cursor,
            done,
        })
    }

    async fn follower_count(&self, author_id: &str) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM followers WHERE author_id = $1")
            .bind(author_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}
