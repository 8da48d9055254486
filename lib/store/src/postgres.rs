//! PostgreSQL implementation of the membership store.

use crate::error::StoreError;
use crate::store::MembershipStore;
use crate::types::{DEFAULT_ROLE, Group, GroupMember, GroupType, GroupUpdate, NewGroup};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use groupgate_core::GroupId;
use rootcause::prelude::Report;
use sqlx::error::ErrorKind;
use sqlx::{FromRow, PgPool};
use std::collections::BTreeSet;
use std::str::FromStr;
use tracing::{debug, instrument};

/// Migrations for the membership schema.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Maps a driver error onto the store's error kinds.
fn classify(err: sqlx::Error, entity: &'static str, key: impl Into<String>) -> Report<StoreError> {
    let key = key.into();
    let context = match &err {
        sqlx::Error::RowNotFound => StoreError::NotFound { entity, key },
        sqlx::Error::Database(db) => match db.kind() {
            ErrorKind::UniqueViolation => StoreError::DuplicateKey { entity, key },
            ErrorKind::ForeignKeyViolation => StoreError::ForeignKeyViolation { entity, key },
            _ => StoreError::Database {
                details: err.to_string(),
            },
        },
        _ => StoreError::Database {
            details: err.to_string(),
        },
    };
    context.into()
}

fn database(err: sqlx::Error) -> Report<StoreError> {
    StoreError::Database {
        details: err.to_string(),
    }
    .into()
}

fn parse_group_id(raw: &str) -> Result<GroupId, Report<StoreError>> {
    GroupId::from_str(raw).map_err(|e| {
        StoreError::InvalidData {
            details: format!("invalid group id '{raw}': {e}"),
        }
        .into()
    })
}

fn dedup(ids: &[String]) -> Vec<String> {
    ids.iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Row type for group queries.
#[derive(FromRow)]
struct GroupRow {
    id: String,
    name: String,
    tenant_id: String,
    description: Option<String>,
    group_type: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl GroupRow {
    fn try_into_group(self) -> Result<Group, Report<StoreError>> {
        Ok(Group {
            id: parse_group_id(&self.id)?,
            name: self.name,
            tenant_id: self.tenant_id,
            description: self.description,
            group_type: GroupType::from_str(&self.group_type)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Row type for membership queries.
#[derive(FromRow)]
struct MemberRow {
    group_id: String,
    user_id: String,
    tenant_id: String,
    role: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl MemberRow {
    fn try_into_member(self) -> Result<GroupMember, Report<StoreError>> {
        Ok(GroupMember {
            group_id: parse_group_id(&self.group_id)?,
            user_id: self.user_id,
            tenant_id: self.tenant_id,
            role: self.role,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Membership store backed by PostgreSQL.
///
/// Uniqueness and referential integrity come from the schema's constraints;
/// the store never takes a lock of its own.
#[derive(Clone)]
pub struct PgMembershipStore {
    pool: PgPool,
}

impl PgMembershipStore {
    /// Creates a new store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies any pending migrations.
    pub async fn migrate(&self) -> Result<(), Report<StoreError>> {
        MIGRATOR.run(&self.pool).await.map_err(|e| {
            StoreError::Database {
                details: format!("migration failed: {e}"),
            }
            .into()
        })
    }
}

#[async_trait]
impl MembershipStore for PgMembershipStore {
    #[instrument(skip(self, group), fields(tenant_id = %group.tenant_id, name = %group.name))]
    async fn create_group(&self, group: NewGroup) -> Result<Group, Report<StoreError>> {
        let group = group.into_group();
        sqlx::query(
            r#"
            INSERT INTO groups (id, name, tenant_id, description, type, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(group.id.to_string())
        .bind(&group.name)
        .bind(&group.tenant_id)
        .bind(&group.description)
        .bind(group.group_type.as_str())
        .bind(group.created_at)
        .bind(group.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| classify(e, "group", format!("{}/{}", group.tenant_id, group.name)))?;

        debug!(group_id = %group.id, "created group");
        Ok(group)
    }

    #[instrument(skip(self), fields(group_id = %id))]
    async fn get_group(&self, id: GroupId) -> Result<Group, Report<StoreError>> {
        let row: GroupRow = sqlx::query_as(
            r#"
            SELECT id, name, tenant_id, description, type AS group_type, created_at, updated_at
            FROM groups
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify(e, "group", id.to_string()))?;

        row.try_into_group()
    }

    #[instrument(skip(self))]
    async fn get_group_by_name(
        &self,
        tenant_id: &str,
        name: &str,
    ) -> Result<Group, Report<StoreError>> {
        let row: GroupRow = sqlx::query_as(
            r#"
            SELECT id, name, tenant_id, description, type AS group_type, created_at, updated_at
            FROM groups
            WHERE tenant_id = $1 AND name = $2
            "#,
        )
        .bind(tenant_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify(e, "group", format!("{tenant_id}/{name}")))?;

        row.try_into_group()
    }

    #[instrument(skip(self))]
    async fn list_groups(&self, tenant_id: &str) -> Result<Vec<Group>, Report<StoreError>> {
        let rows: Vec<GroupRow> = sqlx::query_as(
            r#"
            SELECT id, name, tenant_id, description, type AS group_type, created_at, updated_at
            FROM groups
            WHERE tenant_id = $1
            ORDER BY name COLLATE "C" ASC, id COLLATE "C" ASC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(database)?;

        rows.into_iter().map(GroupRow::try_into_group).collect()
    }

    #[instrument(skip(self, update), fields(group_id = %id))]
    async fn update_group(
        &self,
        id: GroupId,
        update: GroupUpdate,
    ) -> Result<Group, Report<StoreError>> {
        let row: GroupRow = sqlx::query_as(
            r#"
            UPDATE groups
            SET name = COALESCE($2, name),
                description = COALESCE($3, description),
                updated_at = $4
            WHERE id = $1
            RETURNING id, name, tenant_id, description, type AS group_type, created_at, updated_at
            "#,
        )
        .bind(id.to_string())
        .bind(&update.name)
        .bind(&update.description)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify(e, "group", id.to_string()))?;

        row.try_into_group()
    }

    #[instrument(skip(self), fields(group_id = %id))]
    async fn delete_group(&self, id: GroupId) -> Result<(), Report<StoreError>> {
        let result = sqlx::query(
            r#"
            DELETE FROM groups
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(database)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "group",
                key: id.to_string(),
            }
            .into());
        }
        debug!("deleted group");
        Ok(())
    }

    #[instrument(skip(self, desired), fields(desired = desired.len()))]
    async fn update_groups_for_user(
        &self,
        user_id: &str,
        desired: &[GroupId],
    ) -> Result<(), Report<StoreError>> {
        let group_ids: Vec<String> = desired
            .iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(GroupId::to_string)
            .collect();

        let mut tx = self.pool.begin().await.map_err(database)?;

        if group_ids.is_empty() {
            sqlx::query(
                r#"
                DELETE FROM group_members
                WHERE user_id = $1
                "#,
            )
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(database)?;
        } else {
            sqlx::query(
                r#"
                INSERT INTO group_members (group_id, user_id, tenant_id, role, created_at, updated_at)
                SELECT d.group_id, $2,
                       COALESCE((SELECT g.tenant_id FROM groups g WHERE g.id = d.group_id), ''),
                       $3, $4, $4
                FROM UNNEST($1::text[]) AS d(group_id)
                ON CONFLICT (group_id, user_id) DO UPDATE SET updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(&group_ids)
            .bind(user_id)
            .bind(DEFAULT_ROLE)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .map_err(|e| classify(e, "group member", user_id))?;

            sqlx::query(
                r#"
                DELETE FROM group_members
                WHERE user_id = $1 AND NOT (group_id = ANY($2))
                "#,
            )
            .bind(user_id)
            .bind(&group_ids)
            .execute(&mut *tx)
            .await
            .map_err(database)?;
        }

        tx.commit().await.map_err(database)?;
        debug!("updated groups for user");
        Ok(())
    }

    #[instrument(skip(self, user_ids), fields(group_id = %group_id, users = user_ids.len()))]
    async fn add_users_to_group(
        &self,
        group_id: GroupId,
        user_ids: &[String],
        role: &str,
    ) -> Result<(), Report<StoreError>> {
        if user_ids.is_empty() {
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO group_members (group_id, user_id, tenant_id, role, created_at, updated_at)
            SELECT $1, u.user_id,
                   COALESCE((SELECT g.tenant_id FROM groups g WHERE g.id = $1), ''),
                   $3, $4, $4
            FROM UNNEST($2::text[]) AS u(user_id)
            "#,
        )
        .bind(group_id.to_string())
        .bind(user_ids)
        .bind(role)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| classify(e, "group member", format!("{group_id}/{}", user_ids.join(","))))?;

        Ok(())
    }

    #[instrument(skip(self, user_ids), fields(group_id = %group_id, users = user_ids.len()))]
    async fn remove_users_from_group(
        &self,
        group_id: GroupId,
        user_ids: &[String],
    ) -> Result<Vec<String>, Report<StoreError>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut removed: Vec<String> = sqlx::query_scalar(
            r#"
            DELETE FROM group_members
            WHERE group_id = $1 AND user_id = ANY($2)
            RETURNING user_id
            "#,
        )
        .bind(group_id.to_string())
        .bind(dedup(user_ids))
        .fetch_all(&self.pool)
        .await
        .map_err(database)?;

        removed.sort();
        Ok(removed)
    }

    #[instrument(skip(self), fields(group_id = %group_id))]
    async fn list_users_in_group(
        &self,
        group_id: GroupId,
    ) -> Result<Vec<String>, Report<StoreError>> {
        sqlx::query_scalar(
            r#"
            SELECT user_id
            FROM group_members
            WHERE group_id = $1
            ORDER BY user_id COLLATE "C" ASC
            "#,
        )
        .bind(group_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(database)
    }

    #[instrument(skip(self))]
    async fn list_memberships_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<GroupMember>, Report<StoreError>> {
        let rows: Vec<MemberRow> = sqlx::query_as(
            r#"
            SELECT group_id, user_id, tenant_id, role, created_at, updated_at
            FROM group_members
            WHERE user_id = $1
            ORDER BY group_id COLLATE "C" ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(database)?;

        rows.into_iter().map(MemberRow::try_into_member).collect()
    }

    #[instrument(skip(self))]
    async fn get_groups_for_user(&self, user_id: &str) -> Result<Vec<Group>, Report<StoreError>> {
        let rows: Vec<GroupRow> = sqlx::query_as(
            r#"
            SELECT g.id, g.name, g.tenant_id, g.description, g.type AS group_type,
                   g.created_at, g.updated_at
            FROM groups g
            JOIN group_members m ON m.group_id = g.id
            WHERE m.user_id = $1
            ORDER BY g.name COLLATE "C" ASC, g.id COLLATE "C" ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(database)?;

        rows.into_iter().map(GroupRow::try_into_group).collect()
    }

    #[instrument(skip(self, application_ids), fields(group_id = %group_id, apps = application_ids.len()))]
    async fn add_allowed_apps(
        &self,
        group_id: GroupId,
        application_ids: &[String],
    ) -> Result<(), Report<StoreError>> {
        if application_ids.is_empty() {
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO application_groups (group_id, application_id, tenant_id, created_at, updated_at)
            SELECT $1, a.application_id,
                   COALESCE((SELECT g.tenant_id FROM groups g WHERE g.id = $1), ''),
                   $3, $3
            FROM UNNEST($2::text[]) AS a(application_id)
            "#,
        )
        .bind(group_id.to_string())
        .bind(application_ids)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            classify(
                e,
                "allowed application",
                format!("{group_id}/{}", application_ids.join(",")),
            )
        })?;

        Ok(())
    }

    #[instrument(skip(self), fields(group_id = %group_id))]
    async fn remove_allowed_app(
        &self,
        group_id: GroupId,
        application_id: &str,
    ) -> Result<(), Report<StoreError>> {
        let result = sqlx::query(
            r#"
            DELETE FROM application_groups
            WHERE group_id = $1 AND application_id = $2
            "#,
        )
        .bind(group_id.to_string())
        .bind(application_id)
        .execute(&self.pool)
        .await
        .map_err(database)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "allowed application",
                key: format!("{group_id}/{application_id}"),
            }
            .into());
        }
        Ok(())
    }

    #[instrument(skip(self, application_ids), fields(group_id = %group_id, apps = application_ids.len()))]
    async fn remove_allowed_apps(
        &self,
        group_id: GroupId,
        application_ids: &[String],
    ) -> Result<Vec<String>, Report<StoreError>> {
        if application_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut removed: Vec<String> = sqlx::query_scalar(
            r#"
            DELETE FROM application_groups
            WHERE group_id = $1 AND application_id = ANY($2)
            RETURNING application_id
            "#,
        )
        .bind(group_id.to_string())
        .bind(dedup(application_ids))
        .fetch_all(&self.pool)
        .await
        .map_err(database)?;

        removed.sort();
        Ok(removed)
    }

    #[instrument(skip(self), fields(group_id = %group_id))]
    async fn remove_all_allowed_apps_for_group(
        &self,
        group_id: GroupId,
    ) -> Result<Vec<String>, Report<StoreError>> {
        let mut removed: Vec<String> = sqlx::query_scalar(
            r#"
            DELETE FROM application_groups
            WHERE group_id = $1
            RETURNING application_id
            "#,
        )
        .bind(group_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(database)?;

        removed.sort();
        Ok(removed)
    }

    #[instrument(skip(self))]
    async fn remove_all_allowed_groups_for_app(
        &self,
        application_id: &str,
    ) -> Result<Vec<GroupId>, Report<StoreError>> {
        let rows: Vec<String> = sqlx::query_scalar(
            r#"
            DELETE FROM application_groups
            WHERE application_id = $1
            RETURNING group_id
            "#,
        )
        .bind(application_id)
        .fetch_all(&self.pool)
        .await
        .map_err(database)?;

        let mut removed = rows
            .iter()
            .map(|raw| parse_group_id(raw))
            .collect::<Result<Vec<_>, _>>()?;
        removed.sort();
        Ok(removed)
    }

    #[instrument(skip(self), fields(group_id = %group_id))]
    async fn list_allowed_apps(
        &self,
        group_id: GroupId,
    ) -> Result<Vec<String>, Report<StoreError>> {
        sqlx::query_scalar(
            r#"
            SELECT application_id
            FROM application_groups
            WHERE group_id = $1
            ORDER BY application_id COLLATE "C" ASC
            "#,
        )
        .bind(group_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(database)
    }

    #[instrument(skip(self))]
    async fn list_allowed_groups_for_app(
        &self,
        application_id: &str,
    ) -> Result<Vec<GroupId>, Report<StoreError>> {
        let rows: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT group_id
            FROM application_groups
            WHERE application_id = $1
            ORDER BY group_id COLLATE "C" ASC
            "#,
        )
        .bind(application_id)
        .fetch_all(&self.pool)
        .await
        .map_err(database)?;

        rows.iter().map(|raw| parse_group_id(raw)).collect()
    }

    #[instrument(skip(self))]
    async fn list_applications(&self) -> Result<Vec<String>, Report<StoreError>> {
        sqlx::query_scalar(
            r#"
            SELECT application_id
            FROM application_groups
            GROUP BY application_id
            ORDER BY application_id COLLATE "C" ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(database)
    }
}
