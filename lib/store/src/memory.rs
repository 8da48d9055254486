//! In-memory membership store.

use crate::error::StoreError;
use crate::store::MembershipStore;
use crate::types::{AllowedApp, DEFAULT_ROLE, Group, GroupMember, GroupUpdate, NewGroup};
use async_trait::async_trait;
use chrono::Utc;
use groupgate_core::GroupId;
use rootcause::prelude::Report;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    groups: BTreeMap<GroupId, Group>,
    members: BTreeMap<(GroupId, String), GroupMember>,
    apps: BTreeMap<(GroupId, String), AllowedApp>,
}

impl State {
    fn tenant_of(&self, group_id: GroupId, entity: &'static str, key: &str) -> Result<String, StoreError> {
        self.groups
            .get(&group_id)
            .map(|g| g.tenant_id.clone())
            .ok_or_else(|| StoreError::ForeignKeyViolation {
                entity,
                key: format!("{group_id}/{key}"),
            })
    }

    fn name_taken(&self, tenant_id: &str, name: &str, except: Option<GroupId>) -> bool {
        self.groups
            .values()
            .any(|g| g.tenant_id == tenant_id && g.name == name && Some(g.id) != except)
    }
}

/// Membership store held in memory.
///
/// Enforces the same unique and foreign-key rules as the relational schema,
/// and multi-row writes are all-or-nothing. Intended for tests and local runs.
#[derive(Default)]
pub struct MemoryMembershipStore {
    state: RwLock<State>,
}

impl MemoryMembershipStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_groups(mut groups: Vec<Group>) -> Vec<Group> {
    groups.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
    groups
}

#[async_trait]
impl MembershipStore for MemoryMembershipStore {
    async fn create_group(&self, group: NewGroup) -> Result<Group, Report<StoreError>> {
        let mut state = self.state.write().await;
        if state.name_taken(&group.tenant_id, &group.name, None) {
            return Err(StoreError::DuplicateKey {
                entity: "group",
                key: format!("{}/{}", group.tenant_id, group.name),
            }
            .into());
        }
        let group = group.into_group();
        state.groups.insert(group.id, group.clone());
        Ok(group)
    }

    async fn get_group(&self, id: GroupId) -> Result<Group, Report<StoreError>> {
        self.state
            .read()
            .await
            .groups
            .get(&id)
            .cloned()
            .ok_or_else(|| {
                StoreError::NotFound {
                    entity: "group",
                    key: id.to_string(),
                }
                .into()
            })
    }

    async fn get_group_by_name(
        &self,
        tenant_id: &str,
        name: &str,
    ) -> Result<Group, Report<StoreError>> {
        self.state
            .read()
            .await
            .groups
            .values()
            .find(|g| g.tenant_id == tenant_id && g.name == name)
            .cloned()
            .ok_or_else(|| {
                StoreError::NotFound {
                    entity: "group",
                    key: format!("{tenant_id}/{name}"),
                }
                .into()
            })
    }

    async fn list_groups(&self, tenant_id: &str) -> Result<Vec<Group>, Report<StoreError>> {
        let state = self.state.read().await;
        Ok(sorted_groups(
            state
                .groups
                .values()
                .filter(|g| g.tenant_id == tenant_id)
                .cloned()
                .collect(),
        ))
    }

    async fn update_group(
        &self,
        id: GroupId,
        update: GroupUpdate,
    ) -> Result<Group, Report<StoreError>> {
        let mut state = self.state.write().await;
        let Some(current) = state.groups.get(&id).cloned() else {
            return Err(StoreError::NotFound {
                entity: "group",
                key: id.to_string(),
            }
            .into());
        };
        if let Some(name) = &update.name
            && state.name_taken(&current.tenant_id, name, Some(id))
        {
            return Err(StoreError::DuplicateKey {
                entity: "group",
                key: format!("{}/{name}", current.tenant_id),
            }
            .into());
        }

        let updated = Group {
            name: update.name.unwrap_or(current.name),
            description: update.description.or(current.description),
            updated_at: Utc::now(),
            ..current
        };
        state.groups.insert(id, updated.clone());
        Ok(updated)
    }

    async fn delete_group(&self, id: GroupId) -> Result<(), Report<StoreError>> {
        let mut state = self.state.write().await;
        if state.groups.remove(&id).is_none() {
            return Err(StoreError::NotFound {
                entity: "group",
                key: id.to_string(),
            }
            .into());
        }
        state.members.retain(|(group_id, _), _| *group_id != id);
        state.apps.retain(|(group_id, _), _| *group_id != id);
        Ok(())
    }

    async fn update_groups_for_user(
        &self,
        user_id: &str,
        desired: &[GroupId],
    ) -> Result<(), Report<StoreError>> {
        let desired: BTreeSet<GroupId> = desired.iter().copied().collect();
        let mut state = self.state.write().await;

        let tenants = desired
            .iter()
            .map(|id| Ok((*id, state.tenant_of(*id, "group member", user_id)?)))
            .collect::<Result<Vec<_>, StoreError>>()?;

        let now = Utc::now();
        for (group_id, tenant_id) in tenants {
            state
                .members
                .entry((group_id, user_id.to_string()))
                .and_modify(|m| m.updated_at = now)
                .or_insert_with(|| GroupMember {
                    group_id,
                    user_id: user_id.to_string(),
                    tenant_id,
                    role: DEFAULT_ROLE.to_string(),
                    created_at: now,
                    updated_at: now,
                });
        }
        state
            .members
            .retain(|(group_id, user), _| user != user_id || desired.contains(group_id));
        Ok(())
    }

    async fn add_users_to_group(
        &self,
        group_id: GroupId,
        user_ids: &[String],
        role: &str,
    ) -> Result<(), Report<StoreError>> {
        if user_ids.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write().await;
        let tenant_id = state.tenant_of(group_id, "group member", &user_ids.join(","))?;

        let mut seen = BTreeSet::new();
        for user_id in user_ids {
            if !seen.insert(user_id) || state.members.contains_key(&(group_id, user_id.clone())) {
                return Err(StoreError::DuplicateKey {
                    entity: "group member",
                    key: format!("{group_id}/{user_id}"),
                }
                .into());
            }
        }

        let now = Utc::now();
        for user_id in user_ids {
            state.members.insert(
                (group_id, user_id.clone()),
                GroupMember {
                    group_id,
                    user_id: user_id.clone(),
                    tenant_id: tenant_id.clone(),
                    role: role.to_string(),
                    created_at: now,
                    updated_at: now,
                },
            );
        }
        Ok(())
    }

    async fn remove_users_from_group(
        &self,
        group_id: GroupId,
        user_ids: &[String],
    ) -> Result<Vec<String>, Report<StoreError>> {
        let mut state = self.state.write().await;
        let mut removed: Vec<String> = user_ids
            .iter()
            .filter(|user_id| state.members.remove(&(group_id, (*user_id).clone())).is_some())
            .cloned()
            .collect();
        removed.sort();
        Ok(removed)
    }

    async fn list_users_in_group(
        &self,
        group_id: GroupId,
    ) -> Result<Vec<String>, Report<StoreError>> {
        let state = self.state.read().await;
        Ok(state
            .members
            .keys()
            .filter(|(g, _)| *g == group_id)
            .map(|(_, user_id)| user_id.clone())
            .collect())
    }

    async fn list_memberships_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<GroupMember>, Report<StoreError>> {
        let state = self.state.read().await;
        Ok(state
            .members
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_groups_for_user(&self, user_id: &str) -> Result<Vec<Group>, Report<StoreError>> {
        let state = self.state.read().await;
        Ok(sorted_groups(
            state
                .members
                .values()
                .filter(|m| m.user_id == user_id)
                .filter_map(|m| state.groups.get(&m.group_id).cloned())
                .collect(),
        ))
    }

    async fn add_allowed_apps(
        &self,
        group_id: GroupId,
        application_ids: &[String],
    ) -> Result<(), Report<StoreError>> {
        if application_ids.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write().await;
        let tenant_id =
            state.tenant_of(group_id, "allowed application", &application_ids.join(","))?;

        let mut seen = BTreeSet::new();
        for application_id in application_ids {
            if !seen.insert(application_id)
                || state.apps.contains_key(&(group_id, application_id.clone()))
            {
                return Err(StoreError::DuplicateKey {
                    entity: "allowed application",
                    key: format!("{group_id}/{application_id}"),
                }
                .into());
            }
        }

        let now = Utc::now();
        for application_id in application_ids {
            state.apps.insert(
                (group_id, application_id.clone()),
                AllowedApp {
                    group_id,
                    application_id: application_id.clone(),
                    tenant_id: tenant_id.clone(),
                    created_at: now,
                    updated_at: now,
                },
            );
        }
        Ok(())
    }

    async fn remove_allowed_app(
        &self,
        group_id: GroupId,
        application_id: &str,
    ) -> Result<(), Report<StoreError>> {
        let mut state = self.state.write().await;
        match state.apps.remove(&(group_id, application_id.to_string())) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound {
                entity: "allowed application",
                key: format!("{group_id}/{application_id}"),
            }
            .into()),
        }
    }

    async fn remove_allowed_apps(
        &self,
        group_id: GroupId,
        application_ids: &[String],
    ) -> Result<Vec<String>, Report<StoreError>> {
        let mut state = self.state.write().await;
        let mut removed: Vec<String> = application_ids
            .iter()
            .filter(|app| state.apps.remove(&(group_id, (*app).clone())).is_some())
            .cloned()
            .collect();
        removed.sort();
        Ok(removed)
    }

    async fn remove_all_allowed_apps_for_group(
        &self,
        group_id: GroupId,
    ) -> Result<Vec<String>, Report<StoreError>> {
        let mut state = self.state.write().await;
        let mut removed = Vec::new();
        state.apps.retain(|(g, app), _| {
            let matched = *g == group_id;
            if matched {
                removed.push(app.clone());
            }
            !matched
        });
        Ok(removed)
    }

    async fn remove_all_allowed_groups_for_app(
        &self,
        application_id: &str,
    ) -> Result<Vec<GroupId>, Report<StoreError>> {
        let mut state = self.state.write().await;
        let mut removed = Vec::new();
        state.apps.retain(|(group_id, app), _| {
            let matched = app == application_id;
            if matched {
                removed.push(*group_id);
            }
            !matched
        });
        Ok(removed)
    }

    async fn list_allowed_apps(
        &self,
        group_id: GroupId,
    ) -> Result<Vec<String>, Report<StoreError>> {
        let state = self.state.read().await;
        Ok(state
            .apps
            .keys()
            .filter(|(g, _)| *g == group_id)
            .map(|(_, app)| app.clone())
            .collect())
    }

    async fn list_allowed_groups_for_app(
        &self,
        application_id: &str,
    ) -> Result<Vec<GroupId>, Report<StoreError>> {
        let state = self.state.read().await;
        Ok(state
            .apps
            .keys()
            .filter(|(_, app)| app == application_id)
            .map(|(group_id, _)| *group_id)
            .collect())
    }

    async fn list_applications(&self) -> Result<Vec<String>, Report<StoreError>> {
        let state = self.state.read().await;
        let apps: BTreeSet<&String> = state.apps.keys().map(|(_, app)| app).collect();
        Ok(apps.into_iter().cloned().collect())
    }
}
