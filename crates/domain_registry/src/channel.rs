//! Originating channels

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use core_kernel::ChannelId;

/// A source that submits claims into staging
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    /// Unique display name, e.g. `SMART APPLICATIONS`
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Channel {
    /// Classifies this channel for intake or validation
    pub fn resolution(self) -> ChannelResolution {
        if self.is_active {
            ChannelResolution::Active(self)
        } else {
            ChannelResolution::Inactive(self)
        }
    }
}

/// Request to register a channel
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewChannel {
    #[validate(length(min = 1, max = 100, message = "channel name must be 1-100 characters"))]
    pub name: String,
    #[validate(length(max = 500))]
    pub description: Option<String>,
}

impl NewChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Outcome of looking a channel up by id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelResolution {
    Active(Channel),
    Inactive(Channel),
    Unknown(ChannelId),
}

impl ChannelResolution {
    pub fn from_lookup(id: ChannelId, channel: Option<Channel>) -> Self {
        match channel {
            Some(channel) => channel.resolution(),
            None => ChannelResolution::Unknown(id),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ChannelResolution::Active(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(active: bool) -> Channel {
        let now = Utc::now();
        Channel {
            id: ChannelId::new(1),
            name: "SMART APPLICATIONS".to_string(),
            description: None,
            is_active: active,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_resolution_follows_active_flag() {
        assert!(channel(true).resolution().is_active());
        assert!(matches!(channel(false).resolution(), ChannelResolution::Inactive(_)));
    }

    #[test]
    fn test_unknown_lookup() {
        let resolution = ChannelResolution::from_lookup(ChannelId::new(5), None);
        assert_eq!(resolution, ChannelResolution::Unknown(ChannelId::new(5)));
    }

    #[test]
    fn test_new_channel_validation() {
        assert!(NewChannel::new("SMART APPLICATIONS").validate().is_ok());
        assert!(NewChannel::new("   ").validate().is_err());
        assert!(NewChannel::new("x".repeat(101)).validate().is_err());
    }
}
