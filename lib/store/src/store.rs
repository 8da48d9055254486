//! The membership store trait.

use crate::error::StoreError;
use crate::types::{Group, GroupMember, GroupUpdate, NewGroup};
use async_trait::async_trait;
use groupgate_core::GroupId;
use rootcause::prelude::Report;

/// Relational record of groups, their members and the applications each
/// group may use.
///
/// Every list is sorted on its natural key. Writes referencing a group that
/// does not exist fail with [`StoreError::ForeignKeyViolation`], and deleting
/// a group removes its memberships and allow-list entries with it.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Creates a group. The name must be unique within the tenant.
    async fn create_group(&self, group: NewGroup) -> Result<Group, Report<StoreError>>;

    /// Fetches a group by ID.
    async fn get_group(&self, id: GroupId) -> Result<Group, Report<StoreError>>;

    /// Fetches a group by tenant and name.
    async fn get_group_by_name(
        &self,
        tenant_id: &str,
        name: &str,
    ) -> Result<Group, Report<StoreError>>;

    /// Lists a tenant's groups ordered by name.
    async fn list_groups(&self, tenant_id: &str) -> Result<Vec<Group>, Report<StoreError>>;

    /// Applies an update and returns the stored group.
    async fn update_group(
        &self,
        id: GroupId,
        update: GroupUpdate,
    ) -> Result<Group, Report<StoreError>>;

    /// Deletes a group along with its memberships and allowed applications.
    async fn delete_group(&self, id: GroupId) -> Result<(), Report<StoreError>>;

    /// Makes `desired` the user's exact set of groups.
    ///
    /// Existing memberships keep their `created_at` and have `updated_at`
    /// touched. Memberships outside `desired` are removed after the upsert.
    /// An empty set removes the user from every group.
    async fn update_groups_for_user(
        &self,
        user_id: &str,
        desired: &[GroupId],
    ) -> Result<(), Report<StoreError>>;

    /// Adds users to a group with the given role.
    async fn add_users_to_group(
        &self,
        group_id: GroupId,
        user_ids: &[String],
        role: &str,
    ) -> Result<(), Report<StoreError>>;

    /// Removes users from a group and returns the ones that were members.
    async fn remove_users_from_group(
        &self,
        group_id: GroupId,
        user_ids: &[String],
    ) -> Result<Vec<String>, Report<StoreError>>;

    /// Lists the group's member user IDs.
    async fn list_users_in_group(&self, group_id: GroupId)
    -> Result<Vec<String>, Report<StoreError>>;

    /// Lists the user's membership rows ordered by group ID.
    async fn list_memberships_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<GroupMember>, Report<StoreError>>;

    /// Lists the groups the user belongs to ordered by name.
    async fn get_groups_for_user(&self, user_id: &str) -> Result<Vec<Group>, Report<StoreError>>;

    /// Allows a group's members to use an application.
    async fn add_allowed_app(
        &self,
        group_id: GroupId,
        application_id: &str,
    ) -> Result<(), Report<StoreError>> {
        self.add_allowed_apps(group_id, &[application_id.to_string()])
            .await
    }

    /// Allows a group's members to use several applications.
    async fn add_allowed_apps(
        &self,
        group_id: GroupId,
        application_ids: &[String],
    ) -> Result<(), Report<StoreError>>;

    /// Revokes one application from a group.
    async fn remove_allowed_app(
        &self,
        group_id: GroupId,
        application_id: &str,
    ) -> Result<(), Report<StoreError>>;

    /// Revokes several applications and returns the ones that were allowed.
    async fn remove_allowed_apps(
        &self,
        group_id: GroupId,
        application_ids: &[String],
    ) -> Result<Vec<String>, Report<StoreError>>;

    /// Revokes every application from a group.
    async fn remove_all_allowed_apps_for_group(
        &self,
        group_id: GroupId,
    ) -> Result<Vec<String>, Report<StoreError>>;

    /// Revokes an application from every group.
    async fn remove_all_allowed_groups_for_app(
        &self,
        application_id: &str,
    ) -> Result<Vec<GroupId>, Report<StoreError>>;

    /// Lists the applications a group may use.
    async fn list_allowed_apps(&self, group_id: GroupId)
    -> Result<Vec<String>, Report<StoreError>>;

    /// Lists the groups allowed to use an application.
    async fn list_allowed_groups_for_app(
        &self,
        application_id: &str,
    ) -> Result<Vec<GroupId>, Report<StoreError>>;

    /// Lists every application allowed to at least one group.
    async fn list_applications(&self) -> Result<Vec<String>, Report<StoreError>>;
}
