//! Registry services
//!
//! Thin services over the registry ports: they validate new entries, map
//! store conflicts to domain errors, and log activation changes, which are
//! operationally significant (deactivating a channel quarantines its pending
//! claims).

use std::sync::Arc;

use tracing::{info, warn};
use validator::Validate;

use core_kernel::{ChannelId, ItemTypeId, PortError};

use crate::channel::{Channel, ChannelResolution, NewChannel};
use crate::error::RegistryError;
use crate::item_type::{ItemType, NewItemType, StandardItemType};
use crate::ports::{ChannelPort, ItemTypePort};

/// Registry of originating channels
#[derive(Clone)]
pub struct ChannelRegistry {
    port: Arc<dyn ChannelPort>,
}

impl ChannelRegistry {
    pub fn new(port: Arc<dyn ChannelPort>) -> Self {
        Self { port }
    }

    /// Registers a new, active channel
    ///
    /// # Errors
    ///
    /// - `RegistryError::InvalidEntry` if the name is empty or too long
    /// - `RegistryError::ChannelNameTaken` if the name is already registered
    pub async fn register(&self, channel: NewChannel) -> Result<Channel, RegistryError> {
        channel.validate()?;
        let name = channel.name.clone();
        match self.port.create_channel(channel).await {
            Ok(created) => {
                info!(channel_id = %created.id, name = %created.name, "Registered channel");
                Ok(created)
            }
            Err(e) if e.is_conflict() => Err(RegistryError::ChannelNameTaken(name)),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolves a channel id for intake or validation
    pub async fn resolve(&self, id: ChannelId) -> Result<ChannelResolution, RegistryError> {
        let channel = self.port.get_channel(id).await?;
        Ok(ChannelResolution::from_lookup(id, channel))
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<Channel>, RegistryError> {
        Ok(self.port.find_channel_by_name(name).await?)
    }

    pub async fn list_active(&self) -> Result<Vec<Channel>, RegistryError> {
        Ok(self.port.list_channels(true).await?)
    }

    pub async fn activate(&self, id: ChannelId) -> Result<Channel, RegistryError> {
        let channel = self.set_active(id, true).await?;
        info!(channel_id = %id, "Channel activated");
        Ok(channel)
    }

    /// Deactivates a channel; its unvalidated claims will be quarantined
    pub async fn deactivate(&self, id: ChannelId) -> Result<Channel, RegistryError> {
        let channel = self.set_active(id, false).await?;
        warn!(channel_id = %id, name = %channel.name, "Channel deactivated");
        Ok(channel)
    }

    async fn set_active(&self, id: ChannelId, active: bool) -> Result<Channel, RegistryError> {
        self.port
            .set_channel_active(id, active)
            .await
            .map_err(|e| not_found_as(e, RegistryError::ChannelNotFound(id)))
    }
}

/// Registry of synchronizable item types
#[derive(Clone)]
pub struct ItemTypeRegistry {
    port: Arc<dyn ItemTypePort>,
}

impl ItemTypeRegistry {
    pub fn new(port: Arc<dyn ItemTypePort>) -> Self {
        Self { port }
    }

    pub async fn register(&self, item_type: NewItemType) -> Result<ItemType, RegistryError> {
        item_type.validate()?;
        let name = item_type.name.clone();
        match self.port.create_item_type(item_type).await {
            Ok(created) => {
                info!(item_type_id = %created.id, name = %created.name, "Registered item type");
                Ok(created)
            }
            Err(e) if e.is_conflict() => Err(RegistryError::ItemTypeNameTaken(name)),
            Err(e) => Err(e.into()),
        }
    }

    /// Registers every standard item type that is not yet present
    ///
    /// Safe to call on every start-up.
    pub async fn seed_standard(&self) -> Result<Vec<ItemType>, RegistryError> {
        let mut seeded = Vec::new();
        for standard in StandardItemType::ALL {
            match self.port.find_item_type_by_name(standard.name()).await? {
                Some(existing) => seeded.push(existing),
                None => seeded.push(self.register(standard.as_new()).await?),
            }
        }
        Ok(seeded)
    }

    /// Returns the item type if it exists and is active
    ///
    /// # Errors
    ///
    /// `RegistryError::ItemTypeNotFound` when missing or inactive
    pub async fn resolve_active(&self, id: ItemTypeId) -> Result<ItemType, RegistryError> {
        match self.port.get_item_type(id).await? {
            Some(item_type) if item_type.is_active => Ok(item_type),
            Some(item_type) => Err(RegistryError::ItemTypeNotFound(format!(
                "{} is inactive",
                item_type.name
            ))),
            None => Err(RegistryError::ItemTypeNotFound(id.to_string())),
        }
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<ItemType>, RegistryError> {
        Ok(self.port.find_item_type_by_name(&name.trim().to_uppercase()).await?)
    }

    pub async fn list_active(&self) -> Result<Vec<ItemType>, RegistryError> {
        Ok(self.port.list_item_types(true).await?)
    }

    pub async fn set_active(&self, id: ItemTypeId, active: bool) -> Result<ItemType, RegistryError> {
        let item_type = self
            .port
            .set_item_type_active(id, active)
            .await
            .map_err(|e| not_found_as(e, RegistryError::ItemTypeNotFound(id.to_string())))?;
        info!(item_type_id = %id, active, "Item type activation changed");
        Ok(item_type)
    }
}

fn not_found_as(error: PortError, replacement: RegistryError) -> RegistryError {
    if error.is_not_found() {
        replacement
    } else {
        RegistryError::Port(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::mock::MockRegistryPort;

    fn registries() -> (ChannelRegistry, ItemTypeRegistry) {
        let port = Arc::new(MockRegistryPort::new());
        (ChannelRegistry::new(port.clone()), ItemTypeRegistry::new(port))
    }

    #[tokio::test]
    async fn test_register_and_resolve_channel() {
        let (channels, _) = registries();
        let channel = channels.register(NewChannel::new("SMART APPLICATIONS")).await.unwrap();

        let resolution = channels.resolve(channel.id).await.unwrap();
        assert!(resolution.is_active());
    }

    #[tokio::test]
    async fn test_duplicate_channel_name() {
        let (channels, _) = registries();
        channels.register(NewChannel::new("SMART APPLICATIONS")).await.unwrap();
        let err = channels.register(NewChannel::new("SMART APPLICATIONS")).await.unwrap_err();
        assert!(matches!(err, RegistryError::ChannelNameTaken(name) if name == "SMART APPLICATIONS"));
    }

    #[tokio::test]
    async fn test_invalid_channel_name() {
        let (channels, _) = registries();
        let err = channels.register(NewChannel::new("")).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidEntry(_)));
    }

    #[tokio::test]
    async fn test_deactivate_then_resolve() {
        let (channels, _) = registries();
        let channel = channels.register(NewChannel::new("PARTNER")).await.unwrap();
        channels.deactivate(channel.id).await.unwrap();

        assert!(matches!(
            channels.resolve(channel.id).await.unwrap(),
            ChannelResolution::Inactive(_)
        ));

        channels.activate(channel.id).await.unwrap();
        assert!(channels.resolve(channel.id).await.unwrap().is_active());
    }

    #[tokio::test]
    async fn test_deactivate_unknown_channel() {
        let (channels, _) = registries();
        let err = channels.deactivate(ChannelId::new(42)).await.unwrap_err();
        assert!(matches!(err, RegistryError::ChannelNotFound(id) if id == ChannelId::new(42)));
    }

    #[tokio::test]
    async fn test_seed_standard_is_idempotent() {
        let (_, item_types) = registries();
        let first = item_types.seed_standard().await.unwrap();
        let second = item_types.seed_standard().await.unwrap();

        assert_eq!(first.len(), StandardItemType::ALL.len());
        assert_eq!(
            first.iter().map(|t| t.id).collect::<Vec<_>>(),
            second.iter().map(|t| t.id).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_resolve_inactive_item_type() {
        let (_, item_types) = registries();
        let members = item_types.register(NewItemType::new("MEMBERS")).await.unwrap();
        assert!(item_types.resolve_active(members.id).await.is_ok());

        item_types.set_active(members.id, false).await.unwrap();
        assert!(matches!(
            item_types.resolve_active(members.id).await,
            Err(RegistryError::ItemTypeNotFound(_))
        ));
    }
}
