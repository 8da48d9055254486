//! Allow-list mutations mirrored into the authorization graph.
//!
//! The membership store is the source of truth. Every mutation is applied to
//! the store first and to the graph second, so a failure between the two
//! leaves the graph behind the store, never ahead of it. Reconciliation
//! closes that gap.

use crate::error::AccessError;
use groupgate_authz::{Authorizer, AuthzError};
use groupgate_core::{GroupId, Result};
use groupgate_store::{MembershipStore, StoreError};
use rootcause::prelude::Report;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

fn store(report: Report<StoreError>) -> Report<AccessError> {
    report.context(AccessError::Store)
}

fn authz(report: Report<AuthzError>) -> Report<AccessError> {
    report.context(AccessError::Authz)
}

/// Changes made while reconciling one application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Group grants written to the graph.
    pub written: usize,
    /// Graph grants deleted for lack of a store row.
    pub deleted: usize,
}

impl ReconcileReport {
    /// Returns whether any changes were made.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.written > 0 || self.deleted > 0
    }
}

/// Outcome of reconciling every application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Applications reconciled successfully.
    pub reconciled: usize,
    /// Applications whose reconciliation failed.
    pub failed: Vec<String>,
    /// Group grants written across all applications.
    pub written: usize,
    /// Graph grants deleted across all applications.
    pub deleted: usize,
}

/// Keeps the allow-list in the store and the graph in step.
#[derive(Clone)]
pub struct AccessService {
    store: Arc<dyn MembershipStore>,
    authorizer: Authorizer,
}

impl AccessService {
    /// Creates a service over a store and an authorizer.
    #[must_use]
    pub fn new(store: Arc<dyn MembershipStore>, authorizer: Authorizer) -> Self {
        Self { store, authorizer }
    }

    /// Returns the membership store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn MembershipStore> {
        &self.store
    }

    /// Returns the authorizer.
    #[must_use]
    pub fn authorizer(&self) -> &Authorizer {
        &self.authorizer
    }

    /// Lets a group's members use an application. Allowing twice is a no-op.
    #[instrument(skip(self), fields(group_id = %group_id))]
    pub async fn allow_app(
        &self,
        group_id: GroupId,
        application_id: &str,
    ) -> Result<(), AccessError> {
        match self.store.add_allowed_app(group_id, application_id).await {
            Ok(()) => {}
            Err(e) if e.current_context().is_duplicate() => debug!("already allowed in store"),
            Err(e) => return Err(store(e)),
        }
        self.authorizer
            .add_allowed_app_to_group(&group_id.to_string(), application_id)
            .await
            .map_err(authz)
    }

    /// Stops a group's members from using an application. Revoking a grant
    /// that does not exist is a no-op.
    #[instrument(skip(self), fields(group_id = %group_id))]
    pub async fn revoke_app(
        &self,
        group_id: GroupId,
        application_id: &str,
    ) -> Result<(), AccessError> {
        match self.store.remove_allowed_app(group_id, application_id).await {
            Ok(()) => {}
            Err(e) if e.current_context().is_not_found() => debug!("not allowed in store"),
            Err(e) => return Err(store(e)),
        }
        self.authorizer
            .remove_allowed_app_from_group(&group_id.to_string(), application_id)
            .await
            .map_err(authz)
    }

    /// Revokes several applications and returns the ones that were allowed.
    #[instrument(skip(self, application_ids), fields(group_id = %group_id, apps = application_ids.len()))]
    pub async fn revoke_apps(
        &self,
        group_id: GroupId,
        application_ids: &[String],
    ) -> Result<Vec<String>, AccessError> {
        let removed = self
            .store
            .remove_allowed_apps(group_id, application_ids)
            .await
            .map_err(store)?;

        let group = group_id.to_string();
        for application_id in &removed {
            self.authorizer
                .remove_allowed_app_from_group(&group, application_id)
                .await
                .map_err(authz)?;
        }
        debug!(removed = removed.len(), "revoked applications");
        Ok(removed)
    }

    /// Deletes a group and every grant its members held.
    #[instrument(skip(self), fields(group_id = %group_id))]
    pub async fn delete_group(&self, group_id: GroupId) -> Result<(), AccessError> {
        self.store.delete_group(group_id).await.map_err(store)?;
        let summary = self
            .authorizer
            .remove_all_allowed_apps_from_group(&group_id.to_string())
            .await
            .map_err(authz)?;
        info!(grants_deleted = summary.deleted, "deleted group");
        Ok(())
    }

    /// Removes an application from every group and returns those groups.
    #[instrument(skip(self))]
    pub async fn delete_application(
        &self,
        application_id: &str,
    ) -> Result<Vec<GroupId>, AccessError> {
        let removed = self
            .store
            .remove_all_allowed_groups_for_app(application_id)
            .await
            .map_err(store)?;
        let summary = self
            .authorizer
            .remove_all_allowed_groups_for_app(application_id)
            .await
            .map_err(authz)?;
        info!(
            groups = removed.len(),
            grants_deleted = summary.deleted,
            "deleted application"
        );
        Ok(removed)
    }

    /// Makes the graph's grants for an application match the store.
    ///
    /// Writes a grant for every allowed group the graph is missing and deletes
    /// every group grant with no backing row.
    #[instrument(skip(self))]
    pub async fn reconcile_application(
        &self,
        application_id: &str,
    ) -> Result<ReconcileReport, AccessError> {
        self.reconcile(application_id).await.map_err(|e| {
            e.context(AccessError::Reconcile {
                application_id: application_id.to_string(),
            })
        })
    }

    async fn reconcile(&self, application_id: &str) -> Result<ReconcileReport, AccessError> {
        let desired: BTreeSet<String> = self
            .store
            .list_allowed_groups_for_app(application_id)
            .await
            .map_err(store)?
            .into_iter()
            .map(|id| id.to_string())
            .collect();
        let actual: BTreeSet<String> = self
            .authorizer
            .list_allowed_groups_for_app(application_id)
            .await
            .map_err(authz)?
            .into_iter()
            .collect();

        let mut report = ReconcileReport::default();
        for group_id in desired.difference(&actual) {
            self.authorizer
                .add_allowed_app_to_group(group_id, application_id)
                .await
                .map_err(authz)?;
            report.written += 1;
        }
        for group_id in actual.difference(&desired) {
            self.authorizer
                .remove_allowed_app_from_group(group_id, application_id)
                .await
                .map_err(authz)?;
            report.deleted += 1;
        }

        if report.has_changes() {
            info!(
                written = report.written,
                deleted = report.deleted,
                "reconciled application"
            );
        }
        Ok(report)
    }

    /// Reconciles every application known to the store.
    ///
    /// A failure on one application is logged and recorded; the others still
    /// run. Only listing the applications can fail the whole pass.
    #[instrument(skip(self))]
    pub async fn reconcile_all(&self) -> Result<ReconcileSummary, AccessError> {
        let applications = self.store.list_applications().await.map_err(store)?;
        let mut summary = ReconcileSummary::default();

        for application_id in applications {
            match self.reconcile_application(&application_id).await {
                Ok(report) => {
                    summary.reconciled += 1;
                    summary.written += report.written;
                    summary.deleted += report.deleted;
                }
                Err(e) => {
                    warn!(application_id = %application_id, error = %e, "reconciliation failed");
                    summary.failed.push(application_id);
                }
            }
        }

        info!(
            reconciled = summary.reconciled,
            failed = summary.failed.len(),
            written = summary.written,
            deleted = summary.deleted,
            "reconciliation pass finished"
        );
        Ok(summary)
    }

    /// Checks whether a user may use an application through the groups the
    /// store records for them.
    #[instrument(skip(self))]
    pub async fn can_access(
        &self,
        user_id: &str,
        application_id: &str,
    ) -> Result<bool, AccessError> {
        let groups: Vec<String> = self
            .store
            .get_groups_for_user(user_id)
            .await
            .map_err(store)?
            .into_iter()
            .map(|group| group.id.to_string())
            .collect();
        self.authorizer
            .can_access(user_id, application_id, &groups)
            .await
            .map_err(authz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use groupgate_authz::{
        AuthorizationModel, AuthzClient, MemoryAuthzClient, ReadTuplesFilter, ReadTuplesPage,
        Tuple, TupleWithContext,
    };
    use groupgate_store::{DEFAULT_ROLE, MemoryMembershipStore, NewGroup};

    struct Fixture {
        graph: Arc<MemoryAuthzClient>,
        store: Arc<MemoryMembershipStore>,
        service: AccessService,
    }

    fn fixture() -> Fixture {
        let graph = Arc::new(MemoryAuthzClient::new().with_page_size(2));
        let store = Arc::new(MemoryMembershipStore::new());
        let service = AccessService::new(store.clone(), Authorizer::new(graph.clone()));
        Fixture {
            graph,
            store,
            service,
        }
    }

    async fn group_with_members(store: &MemoryMembershipStore, name: &str, users: &[&str]) -> GroupId {
        let group = store.create_group(NewGroup::new("acme", name)).await.unwrap();
        let users: Vec<String> = users.iter().map(|u| (*u).to_string()).collect();
        store
            .add_users_to_group(group.id, &users, DEFAULT_ROLE)
            .await
            .unwrap();
        group.id
    }

    #[tokio::test]
    async fn allow_then_revoke_converges() {
        let f = fixture();
        let eng = group_with_members(&f.store, "Engineering", &["alice"]).await;

        f.service.allow_app(eng, "wiki").await.unwrap();
        assert!(f.service.can_access("alice", "wiki").await.unwrap());
        assert!(!f.service.can_access("bob", "wiki").await.unwrap());

        f.service.revoke_app(eng, "wiki").await.unwrap();
        assert!(!f.service.can_access("alice", "wiki").await.unwrap());
        assert!(f.graph.tuples().await.is_empty());
        assert!(f.store.list_applications().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn allow_and_revoke_are_idempotent() {
        let f = fixture();
        let eng = group_with_members(&f.store, "Engineering", &["alice"]).await;

        f.service.allow_app(eng, "wiki").await.unwrap();
        f.service.allow_app(eng, "wiki").await.unwrap();
        assert_eq!(f.graph.tuples().await.len(), 1);

        f.service.revoke_app(eng, "wiki").await.unwrap();
        f.service.revoke_app(eng, "wiki").await.unwrap();
        assert!(f.graph.tuples().await.is_empty());
    }

    #[tokio::test]
    async fn allow_for_unknown_group_writes_nothing() {
        let f = fixture();

        let err = f.service.allow_app(GroupId::new(), "wiki").await.unwrap_err();

        assert_eq!(err.current_context(), &AccessError::Store);
        assert!(f.graph.tuples().await.is_empty());
    }

    #[tokio::test]
    async fn revoke_apps_mirrors_only_removed_ids() {
        let f = fixture();
        let eng = group_with_members(&f.store, "Engineering", &[]).await;
        for app in ["a", "b", "c"] {
            f.service.allow_app(eng, app).await.unwrap();
        }

        let removed = f
            .service
            .revoke_apps(eng, &["a".to_string(), "c".to_string(), "zzz".to_string()])
            .await
            .unwrap();

        assert_eq!(removed, vec!["a".to_string(), "c".to_string()]);
        assert_eq!(
            f.graph.tuples().await,
            vec![Tuple::group_can_access(&eng.to_string(), "b")]
        );
    }

    #[tokio::test]
    async fn delete_group_sweeps_its_grants() {
        let f = fixture();
        let eng = group_with_members(&f.store, "Engineering", &["alice"]).await;
        let ops = group_with_members(&f.store, "Ops", &["alice"]).await;
        for app in ["a", "b", "c"] {
            f.service.allow_app(eng, app).await.unwrap();
        }
        f.service.allow_app(ops, "a").await.unwrap();

        f.service.delete_group(eng).await.unwrap();

        assert_eq!(
            f.graph.tuples().await,
            vec![Tuple::group_can_access(&ops.to_string(), "a")]
        );
        assert!(f.service.can_access("alice", "a").await.unwrap());
        assert!(!f.service.can_access("alice", "b").await.unwrap());
    }

    #[tokio::test]
    async fn delete_application_removes_every_group() {
        let f = fixture();
        let mut groups = Vec::new();
        for name in ["a", "b", "c"] {
            let id = group_with_members(&f.store, name, &[]).await;
            f.service.allow_app(id, "wiki").await.unwrap();
            groups.push(id);
        }
        f.service.allow_app(groups[0], "ci").await.unwrap();
        groups.sort();

        let removed = f.service.delete_application("wiki").await.unwrap();

        assert_eq!(removed, groups);
        assert_eq!(f.store.list_applications().await.unwrap(), vec!["ci".to_string()]);
        assert_eq!(f.graph.tuples().await.len(), 1);
    }

    #[tokio::test]
    async fn reconcile_writes_missing_and_deletes_orphans() {
        let f = fixture();
        let eng = group_with_members(&f.store, "Engineering", &["alice"]).await;
        let ops = group_with_members(&f.store, "Ops", &["bob"]).await;
        f.store.add_allowed_app(eng, "wiki").await.unwrap();
        f.store.add_allowed_app(ops, "wiki").await.unwrap();
        f.graph
            .write_tuple(&Tuple::group_can_access(&ops.to_string(), "wiki"))
            .await
            .unwrap();
        f.graph
            .write_tuple(&Tuple::group_can_access("grp_stale", "wiki"))
            .await
            .unwrap();

        let report = f.service.reconcile_application("wiki").await.unwrap();

        assert_eq!(report, ReconcileReport { written: 1, deleted: 1 });
        assert!(f.service.can_access("alice", "wiki").await.unwrap());
        assert!(f.service.can_access("bob", "wiki").await.unwrap());

        let again = f.service.reconcile_application("wiki").await.unwrap();
        assert!(!again.has_changes());
    }

    /// Delegates to an in-memory graph but fails reads for one client.
    struct FailingReads {
        inner: MemoryAuthzClient,
        poisoned: String,
    }

    #[async_trait]
    impl AuthzClient for FailingReads {
        async fn check(&self, tuple: &Tuple, ctx: &[Tuple]) -> Result<bool, AuthzError> {
            self.inner.check(tuple, ctx).await
        }

        async fn batch_check(
            &self,
            checks: &[TupleWithContext],
        ) -> Result<Vec<bool>, AuthzError> {
            self.inner.batch_check(checks).await
        }

        async fn list_objects(
            &self,
            user: &str,
            relation: &str,
            object_type: &str,
            ctx: &[Tuple],
        ) -> Result<Vec<String>, AuthzError> {
            self.inner.list_objects(user, relation, object_type, ctx).await
        }

        async fn read_model(&self) -> Result<AuthorizationModel, AuthzError> {
            self.inner.read_model().await
        }

        async fn read_tuples(
            &self,
            filter: &ReadTuplesFilter,
            token: Option<&str>,
        ) -> Result<ReadTuplesPage, AuthzError> {
            if filter.object == self.poisoned {
                return Err(AuthzError::RequestFailed {
                    details: "503 service unavailable".to_string(),
                }
                .into());
            }
            self.inner.read_tuples(filter, token).await
        }

        async fn write_tuple(&self, tuple: &Tuple) -> Result<(), AuthzError> {
            self.inner.write_tuple(tuple).await
        }

        async fn delete_tuples(&self, tuples: &[Tuple]) -> Result<(), AuthzError> {
            self.inner.delete_tuples(tuples).await
        }
    }

    #[tokio::test]
    async fn reconcile_all_isolates_failures() {
        let store = Arc::new(MemoryMembershipStore::new());
        let graph = Arc::new(FailingReads {
            inner: MemoryAuthzClient::new(),
            poisoned: "client:broken".to_string(),
        });
        let service = AccessService::new(store.clone(), Authorizer::new(graph.clone()));
        let eng = group_with_members(&store, "Engineering", &["alice"]).await;
        for app in ["alpha", "broken", "omega"] {
            store.add_allowed_app(eng, app).await.unwrap();
        }

        let summary = service.reconcile_all().await.unwrap();

        assert_eq!(summary.reconciled, 2);
        assert_eq!(summary.written, 2);
        assert_eq!(summary.failed, vec!["broken".to_string()]);
        assert!(service.can_access("alice", "omega").await.unwrap());

        let err = service.reconcile_application("broken").await.unwrap_err();
        assert_eq!(
            err.current_context(),
            &AccessError::Reconcile {
                application_id: "broken".to_string()
            }
        );
    }

    #[tokio::test]
    async fn can_access_uses_stored_memberships_only() {
        let f = fixture();
        let eng = group_with_members(&f.store, "Engineering", &["alice"]).await;
        f.service.allow_app(eng, "wiki").await.unwrap();

        f.store.update_groups_for_user("alice", &[]).await.unwrap();

        assert!(!f.service.can_access("alice", "wiki").await.unwrap());
    }
}
