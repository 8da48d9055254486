//! Records held by the membership store.

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use groupgate_core::GroupId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role given to members added without an explicit one.
pub const DEFAULT_ROLE: &str = "member";

/// How a group came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupType {
    /// Created by an administrator.
    #[default]
    Custom,
    /// Imported from Salesforce.
    Salesforce,
}

impl GroupType {
    /// Returns the stored representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Custom => "custom",
            Self::Salesforce => "salesforce",
        }
    }
}

impl fmt::Display for GroupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GroupType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "custom" => Ok(Self::Custom),
            "salesforce" => Ok(Self::Salesforce),
            other => Err(StoreError::InvalidData {
                details: format!("unknown group type '{other}'"),
            }),
        }
    }
}

/// A group of users within a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Group ID.
    pub id: GroupId,
    /// Name, unique within the tenant.
    pub name: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Optional description.
    pub description: Option<String>,
    /// Origin of the group.
    pub group_type: GroupType,
    /// When created.
    pub created_at: DateTime<Utc>,
    /// When last updated.
    pub updated_at: DateTime<Utc>,
}

/// Fields for creating a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGroup {
    /// Owning tenant.
    pub tenant_id: String,
    /// Name, unique within the tenant.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Origin of the group.
    pub group_type: GroupType,
}

impl NewGroup {
    /// A custom group with no description.
    #[must_use]
    pub fn new(tenant_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            name: name.into(),
            description: None,
            group_type: GroupType::default(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the group type.
    #[must_use]
    pub fn with_type(mut self, group_type: GroupType) -> Self {
        self.group_type = group_type;
        self
    }

    /// Builds the record stored for this group.
    #[must_use]
    pub fn into_group(self) -> Group {
        let now = Utc::now();
        Group {
            id: GroupId::new(),
            name: self.name,
            tenant_id: self.tenant_id,
            description: self.description,
            group_type: self.group_type,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Changes to apply to a group; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupUpdate {
    /// New name.
    pub name: Option<String>,
    /// New description.
    pub description: Option<String>,
}

/// A user's membership in a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    /// Group ID.
    pub group_id: GroupId,
    /// User ID from the identity provider.
    pub user_id: String,
    /// Tenant of the group.
    pub tenant_id: String,
    /// Role within the group.
    pub role: String,
    /// When the membership was created.
    pub created_at: DateTime<Utc>,
    /// When the membership was last confirmed.
    pub updated_at: DateTime<Utc>,
}

/// Permission for a group's members to use an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedApp {
    /// Group ID.
    pub group_id: GroupId,
    /// Client application ID.
    pub application_id: String,
    /// Tenant of the group.
    pub tenant_id: String,
    /// When created.
    pub created_at: DateTime<Utc>,
    /// When last updated.
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_type_round_trips_through_storage_form() {
        for group_type in [GroupType::Custom, GroupType::Salesforce] {
            assert_eq!(group_type.as_str().parse::<GroupType>(), Ok(group_type));
        }
    }

    #[test]
    fn unknown_group_type_is_corruption() {
        let err = "team".parse::<GroupType>().unwrap_err();
        assert!(matches!(err, StoreError::InvalidData { .. }));
    }

    #[test]
    fn new_group_defaults() {
        let group = NewGroup::new("acme", "Engineering")
            .with_description("builds things")
            .into_group();
        assert_eq!(group.group_type, GroupType::Custom);
        assert_eq!(group.description.as_deref(), Some("builds things"));
        assert_eq!(group.created_at, group.updated_at);
    }
}
