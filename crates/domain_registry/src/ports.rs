//! Registry Domain Ports
//!
//! Storage interfaces for channels and item types. The PostgreSQL adapter
//! lives in `infra_db`; an in-memory implementation is provided behind the
//! `mock` feature for tests of downstream crates.
//!
//! Name uniqueness is enforced by the store: creating a second entry with an
//! existing name fails with `PortError::Conflict`.

use async_trait::async_trait;

use core_kernel::{ChannelId, DomainPort, HealthCheckable, ItemTypeId, PortError};

use crate::channel::{Channel, NewChannel};
use crate::item_type::{ItemType, NewItemType};

/// Storage operations for originating channels
#[async_trait]
pub trait ChannelPort: DomainPort + HealthCheckable {
    /// Inserts a new channel, active by default
    async fn create_channel(&self, channel: NewChannel) -> Result<Channel, PortError>;

    /// Looks a channel up by id; `None` when it does not exist
    async fn get_channel(&self, id: ChannelId) -> Result<Option<Channel>, PortError>;

    /// Looks a channel up by its unique name
    async fn find_channel_by_name(&self, name: &str) -> Result<Option<Channel>, PortError>;

    /// Lists channels ordered by id
    async fn list_channels(&self, active_only: bool) -> Result<Vec<Channel>, PortError>;

    /// Toggles the active flag, the only mutable channel attribute
    ///
    /// # Errors
    ///
    /// `PortError::NotFound` if the channel does not exist
    async fn set_channel_active(&self, id: ChannelId, active: bool) -> Result<Channel, PortError>;
}

/// Storage operations for item types
#[async_trait]
pub trait ItemTypePort: DomainPort + HealthCheckable {
    async fn create_item_type(&self, item_type: NewItemType) -> Result<ItemType, PortError>;

    async fn get_item_type(&self, id: ItemTypeId) -> Result<Option<ItemType>, PortError>;

    async fn find_item_type_by_name(&self, name: &str) -> Result<Option<ItemType>, PortError>;

    async fn list_item_types(&self, active_only: bool) -> Result<Vec<ItemType>, PortError>;

    async fn set_item_type_active(&self, id: ItemTypeId, active: bool) -> Result<ItemType, PortError>;
}

/// Mock implementation of the registry ports for testing
///
/// Keeps channels and item types in memory and allocates keys from an
/// atomic counter, mirroring the database sequences.
#[cfg(any(test, feature = "mock"))]
pub mod mock {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use chrono::Utc;
    use tokio::sync::RwLock;

    use core_kernel::{AtomicIdAllocator, HealthCheckResult, IdAllocator};

    /// In-memory channel and item type registry
    #[derive(Debug, Default, Clone)]
    pub struct MockRegistryPort {
        channels: Arc<RwLock<BTreeMap<ChannelId, Channel>>>,
        item_types: Arc<RwLock<BTreeMap<ItemTypeId, ItemType>>>,
        channel_ids: Arc<AtomicIdAllocator>,
        item_type_ids: Arc<AtomicIdAllocator>,
    }

    impl MockRegistryPort {
        /// Creates an empty registry
        pub fn new() -> Self {
            Self::default()
        }

        fn next_key(allocator: &AtomicIdAllocator) -> Result<i64, PortError> {
            allocator
                .reserve(1)
                .map(|block| block.first())
                .map_err(|e| PortError::internal(e.to_string()))
        }
    }

    impl DomainPort for MockRegistryPort {}

    #[async_trait]
    impl HealthCheckable for MockRegistryPort {
        async fn health_check(&self) -> HealthCheckResult {
            HealthCheckResult::healthy("mock-registry-port")
        }
    }

    #[async_trait]
    impl ChannelPort for MockRegistryPort {
        async fn create_channel(&self, channel: NewChannel) -> Result<Channel, PortError> {
            let mut channels = self.channels.write().await;
            if channels.values().any(|c| c.name == channel.name) {
                return Err(PortError::conflict(format!(
                    "channel name '{}' already exists",
                    channel.name
                )));
            }
            let now = Utc::now();
            let created = Channel {
                id: ChannelId::new(Self::next_key(&self.channel_ids)?),
                name: channel.name,
                description: channel.description,
                is_active: true,
                created_at: now,
                updated_at: now,
            };
            channels.insert(created.id, created.clone());
            Ok(created)
        }

        async fn get_channel(&self, id: ChannelId) -> Result<Option<Channel>, PortError> {
            Ok(self.channels.read().await.get(&id).cloned())
        }

        async fn find_channel_by_name(&self, name: &str) -> Result<Option<Channel>, PortError> {
            Ok(self
                .channels
                .read()
                .await
                .values()
                .find(|c| c.name == name)
                .cloned())
        }

        async fn list_channels(&self, active_only: bool) -> Result<Vec<Channel>, PortError> {
            Ok(self
                .channels
                .read()
                .await
                .values()
                .filter(|c| !active_only || c.is_active)
                .cloned()
                .collect())
        }

        async fn set_channel_active(&self, id: ChannelId, active: bool) -> Result<Channel, PortError> {
            let mut channels = self.channels.write().await;
            let channel = channels
                .get_mut(&id)
                .ok_or_else(|| PortError::not_found("Channel", id))?;
            channel.is_active = active;
            channel.updated_at = Utc::now();
            Ok(channel.clone())
        }
    }

    #[async_trait]
    impl ItemTypePort for MockRegistryPort {
        async fn create_item_type(&self, item_type: NewItemType) -> Result<ItemType, PortError> {
            let mut item_types = self.item_types.write().await;
            if item_types.values().any(|t| t.name == item_type.name) {
                return Err(PortError::conflict(format!(
                    "item type '{}' already exists",
                    item_type.name
                )));
            }
            let created = ItemType {
                id: ItemTypeId::new(Self::next_key(&self.item_type_ids)?),
                name: item_type.name,
                description: item_type.description,
                is_active: true,
                created_at: Utc::now(),
            };
            item_types.insert(created.id, created.clone());
            Ok(created)
        }

        async fn get_item_type(&self, id: ItemTypeId) -> Result<Option<ItemType>, PortError> {
            Ok(self.item_types.read().await.get(&id).cloned())
        }

        async fn find_item_type_by_name(&self, name: &str) -> Result<Option<ItemType>, PortError> {
            Ok(self
                .item_types
                .read()
                .await
                .values()
                .find(|t| t.name == name)
                .cloned())
        }

        async fn list_item_types(&self, active_only: bool) -> Result<Vec<ItemType>, PortError> {
            Ok(self
                .item_types
                .read()
                .await
                .values()
                .filter(|t| !active_only || t.is_active)
                .cloned()
                .collect())
        }

        async fn set_item_type_active(&self, id: ItemTypeId, active: bool) -> Result<ItemType, PortError> {
            let mut item_types = self.item_types.write().await;
            let item_type = item_types
                .get_mut(&id)
                .ok_or_else(|| PortError::not_found("ItemType", id))?;
            item_type.is_active = active;
            Ok(item_type.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::mock::MockRegistryPort;

    #[tokio::test]
    async fn test_mock_channel_create_and_get() {
        let port = MockRegistryPort::new();
        let channel = port.create_channel(NewChannel::new("SMART APPLICATIONS")).await.unwrap();

        assert_eq!(channel.id, ChannelId::new(1));
        assert!(channel.is_active);
        let fetched = port.get_channel(channel.id).await.unwrap().unwrap();
        assert_eq!(fetched, channel);
    }

    #[tokio::test]
    async fn test_mock_channel_name_conflict() {
        let port = MockRegistryPort::new();
        port.create_channel(NewChannel::new("SMART APPLICATIONS")).await.unwrap();
        let err = port
            .create_channel(NewChannel::new("SMART APPLICATIONS"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_mock_set_active_unknown_channel() {
        let port = MockRegistryPort::new();
        let err = port.set_channel_active(ChannelId::new(99), false).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_mock_list_active_only() {
        let port = MockRegistryPort::new();
        let a = port.create_channel(NewChannel::new("A")).await.unwrap();
        port.create_channel(NewChannel::new("B")).await.unwrap();
        port.set_channel_active(a.id, false).await.unwrap();

        assert_eq!(port.list_channels(false).await.unwrap().len(), 2);
        let active = port.list_channels(true).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "B");
    }

    #[tokio::test]
    async fn test_mock_item_types() {
        let port = MockRegistryPort::new();
        let members = port.create_item_type(NewItemType::new("members")).await.unwrap();
        assert_eq!(members.name, "MEMBERS");
        assert_eq!(
            port.find_item_type_by_name("MEMBERS").await.unwrap().map(|t| t.id),
            Some(members.id)
        );
        assert!(port.create_item_type(NewItemType::new("MEMBERS")).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_mock_port_health_check() {
        let port = MockRegistryPort::new();
        let result = port.health_check().await;
        assert_eq!(result.status, core_kernel::AdapterHealth::Healthy);
    }
}
