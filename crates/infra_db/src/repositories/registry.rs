//! Channel and item type repository

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::instrument;

use crate::error::DatabaseError;

/// Row of the `channels` table
#[derive(Debug, Clone, FromRow)]
pub struct ChannelRow {
    pub channel_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row of the `item_types` table
#[derive(Debug, Clone, FromRow)]
pub struct ItemTypeRow {
    pub item_type_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

const CHANNEL_COLUMNS: &str = "channel_id, name, description, is_active, created_at, updated_at";
const ITEM_TYPE_COLUMNS: &str = "item_type_id, name, description, is_active, created_at";

/// Repository for the registry tables
///
/// Names are unique; a second insert with the same name surfaces as
/// `DatabaseError::DuplicateEntry`.
#[derive(Debug, Clone)]
pub struct RegistryRepository {
    pool: PgPool,
}

impl RegistryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self, description))]
    pub async fn insert_channel(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<ChannelRow, DatabaseError> {
        let sql = format!(
            "INSERT INTO channels (name, description) VALUES ($1, $2) RETURNING {CHANNEL_COLUMNS}"
        );
        sqlx::query_as::<_, ChannelRow>(&sql)
            .bind(name)
            .bind(description)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match DatabaseError::from(e) {
                DatabaseError::DuplicateEntry(_) => DatabaseError::duplicate("Channel", "name", name),
                other => other,
            })
    }

    pub async fn get_channel(&self, channel_id: i64) -> Result<Option<ChannelRow>, DatabaseError> {
        let sql = format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE channel_id = $1");
        Ok(sqlx::query_as::<_, ChannelRow>(&sql)
            .bind(channel_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn find_channel_by_name(&self, name: &str) -> Result<Option<ChannelRow>, DatabaseError> {
        let sql = format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE name = $1");
        Ok(sqlx::query_as::<_, ChannelRow>(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn list_channels(&self, active_only: bool) -> Result<Vec<ChannelRow>, DatabaseError> {
        let sql = format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels WHERE ($1 = FALSE OR is_active) ORDER BY channel_id"
        );
        Ok(sqlx::query_as::<_, ChannelRow>(&sql)
            .bind(active_only)
            .fetch_all(&self.pool)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn set_channel_active(&self, channel_id: i64, active: bool) -> Result<ChannelRow, DatabaseError> {
        let sql = format!(
            "UPDATE channels SET is_active = $2, updated_at = NOW() WHERE channel_id = $1 RETURNING {CHANNEL_COLUMNS}"
        );
        sqlx::query_as::<_, ChannelRow>(&sql)
            .bind(channel_id)
            .bind(active)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DatabaseError::not_found("Channel", channel_id))
    }

    #[instrument(skip(self, description))]
    pub async fn insert_item_type(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<ItemTypeRow, DatabaseError> {
        let sql = format!(
            "INSERT INTO item_types (name, description) VALUES ($1, $2) RETURNING {ITEM_TYPE_COLUMNS}"
        );
        sqlx::query_as::<_, ItemTypeRow>(&sql)
            .bind(name)
            .bind(description)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match DatabaseError::from(e) {
                DatabaseError::DuplicateEntry(_) => DatabaseError::duplicate("ItemType", "name", name),
                other => other,
            })
    }

    pub async fn get_item_type(&self, item_type_id: i64) -> Result<Option<ItemTypeRow>, DatabaseError> {
        let sql = format!("SELECT {ITEM_TYPE_COLUMNS} FROM item_types WHERE item_type_id = $1");
        Ok(sqlx::query_as::<_, ItemTypeRow>(&sql)
            .bind(item_type_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn find_item_type_by_name(&self, name: &str) -> Result<Option<ItemTypeRow>, DatabaseError> {
        let sql = format!("SELECT {ITEM_TYPE_COLUMNS} FROM item_types WHERE name = $1");
        Ok(sqlx::query_as::<_, ItemTypeRow>(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn list_item_types(&self, active_only: bool) -> Result<Vec<ItemTypeRow>, DatabaseError> {
        let sql = format!(
            "SELECT {ITEM_TYPE_COLUMNS} FROM item_types WHERE ($1 = FALSE OR is_active) ORDER BY item_type_id"
        );
        Ok(sqlx::query_as::<_, ItemTypeRow>(&sql)
            .bind(active_only)
            .fetch_all(&self.pool)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn set_item_type_active(&self, item_type_id: i64, active: bool) -> Result<ItemTypeRow, DatabaseError> {
        let sql = format!(
            "UPDATE item_types SET is_active = $2 WHERE item_type_id = $1 RETURNING {ITEM_TYPE_COLUMNS}"
        );
        sqlx::query_as::<_, ItemTypeRow>(&sql)
            .bind(item_type_id)
            .bind(active)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DatabaseError::not_found("ItemType", item_type_id))
    }
}
