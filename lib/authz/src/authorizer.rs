//! Authorization facade used by the rest of the system.
//!
//! Access to a client application is granted through group membership:
//! `(group:G#member, can_access, client:C)` tuples are persisted, while the
//! caller's own memberships are sent as contextual tuples on every check.
//! Errors are never turned into a grant.

use crate::client::{AuthzClient, ReadTuplesFilter};
use crate::error::AuthzError;
use crate::model::{AuthorizationModel, ModelVersion};
use crate::sweep::{Sweep, SweepSummary};
use crate::tuple::{
    CAN_ACCESS, CLIENT_TYPE, Tuple, TupleWithContext, client_tuple, group_member_tuple,
    parse_group_member, user_tuple,
};
use rootcause::prelude::Report;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Checks and mutates client access through an [`AuthzClient`].
#[derive(Clone)]
pub struct Authorizer {
    client: Arc<dyn AuthzClient>,
    model_version: ModelVersion,
}

impl Authorizer {
    /// Creates an authorizer enforcing the current model version.
    #[must_use]
    pub fn new(client: Arc<dyn AuthzClient>) -> Self {
        Self {
            client,
            model_version: ModelVersion::default(),
        }
    }

    /// Returns the underlying client.
    #[must_use]
    pub fn client(&self) -> &Arc<dyn AuthzClient> {
        &self.client
    }

    /// Evaluates a single check. Never cached.
    pub async fn check(
        &self,
        user: &str,
        relation: &str,
        object: &str,
        contextual_tuples: &[Tuple],
    ) -> Result<bool, Report<AuthzError>> {
        self.client
            .check(&Tuple::new(user, relation, object), contextual_tuples)
            .await
    }

    /// Lists every object of `object_type` on which `user` has `relation`.
    pub async fn list_objects(
        &self,
        user: &str,
        relation: &str,
        object_type: &str,
    ) -> Result<Vec<String>, Report<AuthzError>> {
        self.client
            .list_objects(user, relation, object_type, &[])
            .await
    }

    /// Returns the candidates `user` has `relation` on, sorted and deduplicated.
    pub async fn filter_objects(
        &self,
        user: &str,
        relation: &str,
        object_type: &str,
        candidates: &[String],
    ) -> Result<Vec<String>, Report<AuthzError>> {
        let allowed: BTreeSet<String> = self
            .list_objects(user, relation, object_type)
            .await?
            .into_iter()
            .collect();

        let filtered: BTreeSet<&String> =
            candidates.iter().filter(|c| allowed.contains(*c)).collect();
        Ok(filtered.into_iter().cloned().collect())
    }

    /// Verifies the remote model matches the embedded one.
    ///
    /// Run once at startup; callers must refuse to serve on error.
    #[instrument(skip(self), fields(version = %self.model_version))]
    pub async fn validate_model(&self) -> Result<(), Report<AuthzError>> {
        let expected = AuthorizationModel::embedded(self.model_version)?;
        let remote = self.client.read_model().await?;

        if let Some(details) = expected.difference(&remote) {
            return Err(AuthzError::InvalidAuthModel {
                expected_version: self.model_version.to_string(),
                details,
            }
            .into());
        }

        info!(model_id = remote.id.as_deref().unwrap_or("-"), "authorization model validated");
        Ok(())
    }

    /// Checks whether a user may access a client given the groups they claim.
    #[instrument(skip(self, groups), fields(groups = groups.len()))]
    pub async fn can_access(
        &self,
        user_id: &str,
        client_id: &str,
        groups: &[String],
    ) -> Result<bool, Report<AuthzError>> {
        let contextual = membership_tuples(user_id, groups);
        self.check(
            &user_tuple(user_id),
            CAN_ACCESS,
            &client_tuple(client_id),
            &contextual,
        )
        .await
    }

    /// Checks each client; results are paired with the client ids in order.
    #[instrument(skip(self, client_ids, groups), fields(clients = client_ids.len(), groups = groups.len()))]
    pub async fn batch_access(
        &self,
        user_id: &str,
        client_ids: &[String],
        groups: &[String],
    ) -> Result<Vec<(String, bool)>, Report<AuthzError>> {
        let contextual = membership_tuples(user_id, groups);
        let user = user_tuple(user_id);
        let checks: Vec<TupleWithContext> = client_ids
            .iter()
            .map(|client_id| {
                TupleWithContext::new(
                    Tuple::new(user.clone(), CAN_ACCESS, client_tuple(client_id)),
                    contextual.clone(),
                )
            })
            .collect();

        let results = self.client.batch_check(&checks).await?;
        if results.len() != client_ids.len() {
            return Err(AuthzError::InvalidResponse {
                details: format!(
                    "batch check returned {} results for {} checks",
                    results.len(),
                    client_ids.len()
                ),
            }
            .into());
        }

        Ok(client_ids.iter().cloned().zip(results).collect())
    }

    /// True only when the user may access every listed client.
    ///
    /// An empty list is denied.
    pub async fn batch_can_access(
        &self,
        user_id: &str,
        client_ids: &[String],
        groups: &[String],
    ) -> Result<bool, Report<AuthzError>> {
        if client_ids.is_empty() {
            return Ok(false);
        }
        let results = self.batch_access(user_id, client_ids, groups).await?;
        let allowed = results.iter().all(|(_, allowed)| *allowed);
        debug!(allowed, "batch access result");
        Ok(allowed)
    }

    /// Lets members of a group access a client.
    #[instrument(skip(self))]
    pub async fn add_allowed_app_to_group(
        &self,
        group_id: &str,
        client_id: &str,
    ) -> Result<(), Report<AuthzError>> {
        self.client
            .write_tuple(&Tuple::group_can_access(group_id, client_id))
            .await
    }

    /// Stops members of a group from accessing a client.
    #[instrument(skip(self))]
    pub async fn remove_allowed_app_from_group(
        &self,
        group_id: &str,
        client_id: &str,
    ) -> Result<(), Report<AuthzError>> {
        self.client
            .delete_tuple(&Tuple::group_can_access(group_id, client_id))
            .await
    }

    /// Reads the ids of every group allowed to access a client, sorted.
    ///
    /// Follows continuation tokens until the read is exhausted. Grants to
    /// anything other than a group's members are skipped.
    #[instrument(skip(self))]
    pub async fn list_allowed_groups_for_app(
        &self,
        client_id: &str,
    ) -> Result<Vec<String>, Report<AuthzError>> {
        let filter = ReadTuplesFilter::new(
            None,
            Some(CAN_ACCESS.to_string()),
            client_tuple(client_id),
        );
        let mut groups = BTreeSet::new();
        let mut token: Option<String> = None;
        loop {
            let page = self.client.read_tuples(&filter, token.as_deref()).await?;
            if page.tuples.is_empty() {
                break;
            }
            for stored in page.tuples {
                match parse_group_member(&stored.key.user) {
                    Some(group_id) => {
                        groups.insert(group_id);
                    }
                    None => debug!(user = %stored.key.user, "skipping non-group grant"),
                }
            }
            token = page.continuation_token.filter(|t| !t.is_empty());
            if token.is_none() {
                break;
            }
        }
        Ok(groups.into_iter().collect())
    }

    /// Removes every group's access to a client.
    #[instrument(skip(self))]
    pub async fn remove_all_allowed_groups_for_app(
        &self,
        client_id: &str,
    ) -> Result<SweepSummary, Report<AuthzError>> {
        let filter = ReadTuplesFilter::new(
            None,
            Some(CAN_ACCESS.to_string()),
            client_tuple(client_id),
        );
        Sweep::new(self.client.as_ref(), filter).run().await
    }

    /// Removes a group's access to every client.
    #[instrument(skip(self))]
    pub async fn remove_all_allowed_apps_from_group(
        &self,
        group_id: &str,
    ) -> Result<SweepSummary, Report<AuthzError>> {
        let filter = ReadTuplesFilter::new(
            Some(group_member_tuple(group_id)),
            Some(CAN_ACCESS.to_string()),
            format!("{CLIENT_TYPE}:"),
        );
        Sweep::new(self.client.as_ref(), filter).run().await
    }
}

fn membership_tuples(user_id: &str, groups: &[String]) -> Vec<Tuple> {
    groups
        .iter()
        .map(|group_id| Tuple::user_member_of(user_id, group_id))
        .collect()
}
