//! PostgreSQL registry adapter

use async_trait::async_trait;
use sqlx::PgPool;

use core_kernel::{ChannelId, DomainPort, HealthCheckResult, HealthCheckable, ItemTypeId, PortError};
use domain_registry::{Channel, ChannelPort, ItemType, ItemTypePort, NewChannel, NewItemType};

use crate::repositories::registry::{ChannelRow, ItemTypeRow, RegistryRepository};

/// Implements `ChannelPort` and `ItemTypePort` over the registry tables
#[derive(Debug, Clone)]
pub struct PostgresRegistryAdapter {
    repository: RegistryRepository,
    pool: PgPool,
}

impl PostgresRegistryAdapter {
    pub fn new(pool: PgPool) -> Self {
        Self {
            repository: RegistryRepository::new(pool.clone()),
            pool,
        }
    }

    pub fn repository(&self) -> &RegistryRepository {
        &self.repository
    }
}

impl From<ChannelRow> for Channel {
    fn from(row: ChannelRow) -> Self {
        Channel {
            id: ChannelId::new(row.channel_id),
            name: row.name,
            description: row.description,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<ItemTypeRow> for ItemType {
    fn from(row: ItemTypeRow) -> Self {
        ItemType {
            id: ItemTypeId::new(row.item_type_id),
            name: row.name,
            description: row.description,
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

impl DomainPort for PostgresRegistryAdapter {}

#[async_trait]
impl HealthCheckable for PostgresRegistryAdapter {
    async fn health_check(&self) -> HealthCheckResult {
        super::probe(&self.pool, "postgres-registry-adapter").await
    }
}

#[async_trait]
impl ChannelPort for PostgresRegistryAdapter {
    async fn create_channel(&self, channel: NewChannel) -> Result<Channel, PortError> {
        let row = self
            .repository
            .insert_channel(&channel.name, channel.description.as_deref())
            .await?;
        Ok(row.into())
    }

    async fn get_channel(&self, id: ChannelId) -> Result<Option<Channel>, PortError> {
        Ok(self.repository.get_channel(id.value()).await?.map(Channel::from))
    }

    async fn find_channel_by_name(&self, name: &str) -> Result<Option<Channel>, PortError> {
        Ok(self.repository.find_channel_by_name(name).await?.map(Channel::from))
    }

    async fn list_channels(&self, active_only: bool) -> Result<Vec<Channel>, PortError> {
        Ok(self
            .repository
            .list_channels(active_only)
            .await?
            .into_iter()
            .map(Channel::from)
            .collect())
    }

    async fn set_channel_active(&self, id: ChannelId, active: bool) -> Result<Channel, PortError> {
        Ok(self.repository.set_channel_active(id.value(), active).await?.into())
    }
}

#[async_trait]
impl ItemTypePort for PostgresRegistryAdapter {
    async fn create_item_type(&self, item_type: NewItemType) -> Result<ItemType, PortError> {
        let row = self
            .repository
            .insert_item_type(&item_type.name, item_type.description.as_deref())
            .await?;
        Ok(row.into())
    }

    async fn get_item_type(&self, id: ItemTypeId) -> Result<Option<ItemType>, PortError> {
        Ok(self.repository.get_item_type(id.value()).await?.map(ItemType::from))
    }

    async fn find_item_type_by_name(&self, name: &str) -> Result<Option<ItemType>, PortError> {
        Ok(self.repository.find_item_type_by_name(name).await?.map(ItemType::from))
    }

    async fn list_item_types(&self, active_only: bool) -> Result<Vec<ItemType>, PortError> {
        Ok(self
            .repository
            .list_item_types(active_only)
            .await?
            .into_iter()
            .map(ItemType::from)
            .collect())
    }

    async fn set_item_type_active(&self, id: ItemTypeId, active: bool) -> Result<ItemType, PortError> {
        Ok(self.repository.set_item_type_active(id.value(), active).await?.into())
    }
}
