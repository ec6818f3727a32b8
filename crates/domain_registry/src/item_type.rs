//! Synchronizable item types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use core_kernel::ItemTypeId;

/// A category of production entity that is propagated downstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemType {
    pub id: ItemTypeId,
    /// Unique upper-case name, e.g. `MEMBERS`
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Request to register an item type
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewItemType {
    #[validate(length(min = 1, max = 50, message = "item type name must be 1-50 characters"))]
    pub name: String,
    #[validate(length(max = 500))]
    pub description: Option<String>,
}

impl NewItemType {
    /// Item type names are stored upper-cased
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_uppercase(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Entity categories the third-party system accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StandardItemType {
    Members,
    Schemes,
    Benefits,
    Providers,
    SchemeCategories,
    MoneyAdditions,
}

impl StandardItemType {
    pub const ALL: [StandardItemType; 6] = [
        StandardItemType::Members,
        StandardItemType::Schemes,
        StandardItemType::Benefits,
        StandardItemType::Providers,
        StandardItemType::SchemeCategories,
        StandardItemType::MoneyAdditions,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StandardItemType::Members => "MEMBERS",
            StandardItemType::Schemes => "SCHEMES",
            StandardItemType::Benefits => "BENEFITS",
            StandardItemType::Providers => "PROVIDERS",
            StandardItemType::SchemeCategories => "SCHEME_CATEGORIES",
            StandardItemType::MoneyAdditions => "MONEY_ADDITIONS",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            StandardItemType::Members => "Scheme members and dependants",
            StandardItemType::Schemes => "Corporate and retail schemes",
            StandardItemType::Benefits => "Benefit definitions and limits",
            StandardItemType::Providers => "Hospitals and service providers",
            StandardItemType::SchemeCategories => "Scheme member categories",
            StandardItemType::MoneyAdditions => "Top-ups to member benefit pools",
        }
    }

    pub fn as_new(&self) -> NewItemType {
        NewItemType::new(self.name()).with_description(self.description())
    }
}
