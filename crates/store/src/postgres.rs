//! PostgreSQL subscription store.
//!
//! Schema: `tags(name)` plus a single `subscriptions(tag, device_id)` table.
//! Tag names are only ever bound as query parameters, never interpolated
//! into identifiers.

use async_trait::async_trait;
use sqlx::PgPool;

use relay_common::error::AppError;
use relay_common::types::Tag;

use crate::SubscriptionStore;

#[derive(Clone)]
pub struct PgSubscriptionStore {
    pool: PgPool,
}

impl PgSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    async fn add_tag(&self, tag: &Tag) -> Result<bool, AppError> {
        let result = sqlx::query("INSERT INTO tags (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
            .bind(tag.as_str())
            .execute(&self.pool)
            .await?;

        let added = result.rows_affected() > 0;
        if added {
            tracing::info!(tag = %tag, "Tag added to store");
        }

        Ok(added)
    }

    async fn tags_now(&self) -> Result<Vec<Tag>, AppError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM tags ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        // Persisted names were validated on the way in; skip any row that no
        // longer normalizes rather than failing the whole load.
        let tags = rows
            .into_iter()
            .filter_map(|(name,)| match Tag::normalize(&name) {
                Ok(tag) => Some(tag),
                Err(e) => {
                    tracing::warn!(name, error = %e, "Skipping malformed persisted tag");
                    None
                }
            })
            .collect();

        Ok(tags)
    }

    async fn subscribed_identifiers(&self, tag: &Tag) -> Result<Vec<String>, AppError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT device_id FROM subscriptions WHERE tag = $1 ORDER BY subscribed_at, device_id",
        )
        .bind(tag.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn add_subscriptions(&self, device_id: &str, tags: &[Tag]) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;
        let mut changed = false;

        for tag in tags {
            let result = sqlx::query(
                r#"
                INSERT INTO subscriptions (tag, device_id)
                VALUES ($1, $2)
                ON CONFLICT (tag, device_id) DO NOTHING
                "#,
            )
            .bind(tag.as_str())
            .bind(device_id)
            .execute(&mut *tx)
            .await?;

            changed |= result.rows_affected() > 0;
        }

        tx.commit().await?;

        tracing::info!(device_id, tags = tags.len(), "Subscriptions added");
        Ok(changed)
    }

    async fn remove_subscriptions(&self, device_id: &str, tags: &[Tag]) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;
        let mut changed = false;

        for tag in tags {
            let result =
                sqlx::query("DELETE FROM subscriptions WHERE tag = $1 AND device_id = $2")
                    .bind(tag.as_str())
                    .bind(device_id)
                    .execute(&mut *tx)
                    .await?;

            changed |= result.rows_affected() > 0;
        }

        tx.commit().await?;

        tracing::info!(device_id, tags = tags.len(), "Subscriptions removed");
        Ok(changed)
    }

    async fn update_identifier_on_all_tags(
        &self,
        old_id: &str,
        new_id: &str,
    ) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        // Insert the new identifier for every tag the old one holds, then
        // drop the old rows. ON CONFLICT covers tags the new identifier is
        // already subscribed to.
        sqlx::query(
            r#"
            INSERT INTO subscriptions (tag, device_id)
            SELECT tag, $2 FROM subscriptions WHERE device_id = $1
            ON CONFLICT (tag, device_id) DO NOTHING
            "#,
        )
        .bind(old_id)
        .bind(new_id)
        .execute(&mut *tx)
        .await?;

        let deleted = sqlx::query("DELETE FROM subscriptions WHERE device_id = $1")
            .bind(old_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let rotated = deleted.rows_affected() > 0;
        tracing::info!(old_id, new_id, rotated, "Identifier rotation applied");
        Ok(rotated)
    }

    async fn remove_identifier_from_all_tags(&self, id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE device_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected() > 0;
        tracing::info!(id, removed, "Identifier removed from all tags");
        Ok(removed)
    }
}
