//! In-process authorization graph.
//!
//! Evaluates checks by following direct tuples, `type:*` wildcards and
//! userset tuples (`group:eng#member`) up to a fixed depth. Reads page
//! through tuples in key order with a key-based continuation token, so
//! deleting tuples between pages never skips any.

use crate::client::{AuthzClient, ReadTuplesFilter, ReadTuplesPage};
use crate::error::AuthzError;
use crate::model::AuthorizationModel;
use crate::tuple::{StoredTuple, Tuple, TupleWithContext};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rootcause::prelude::Report;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Maximum userset hops followed by a check.
const MAX_RESOLUTION_DEPTH: usize = 25;

const DEFAULT_PAGE_SIZE: usize = 50;

/// Authorization graph held in memory.
pub struct MemoryAuthzClient {
    tuples: RwLock<BTreeMap<Tuple, DateTime<Utc>>>,
    model: RwLock<Option<AuthorizationModel>>,
    page_size: usize,
}

impl Default for MemoryAuthzClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAuthzClient {
    /// Creates an empty graph with no model.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tuples: RwLock::new(BTreeMap::new()),
            model: RwLock::new(None),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Sets the model returned by `read_model`.
    #[must_use]
    pub fn with_model(mut self, model: AuthorizationModel) -> Self {
        self.model = RwLock::new(Some(model));
        self
    }

    /// Sets the number of tuples returned per read page.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Replaces the model returned by `read_model`.
    pub async fn set_model(&self, model: Option<AuthorizationModel>) {
        *self.model.write().await = model;
    }

    /// Returns every stored tuple in key order.
    pub async fn tuples(&self) -> Vec<Tuple> {
        self.tuples.read().await.keys().cloned().collect()
    }

    fn validate(tuple: &Tuple) -> Result<(), Report<AuthzError>> {
        let well_formed = |s: &str| {
            s.split_once(':')
                .is_some_and(|(t, id)| !t.is_empty() && !id.is_empty())
        };
        if tuple.relation.is_empty() || !well_formed(&tuple.user) || !well_formed(&tuple.object) {
            return Err(AuthzError::InvalidInput {
                details: format!("malformed tuple '{tuple}'"),
            }
            .into());
        }
        Ok(())
    }
}

fn resolves(
    stored: &BTreeMap<Tuple, DateTime<Utc>>,
    contextual: &[Tuple],
    user: &str,
    relation: &str,
    object: &str,
) -> bool {
    let mut expanded = BTreeMap::new();
    expand(stored, contextual, user, relation, object, 0, &mut expanded)
}

/// `expanded` holds the shallowest depth each `(object, relation)` was
/// searched from; a userset is searched again only from a shallower depth.
fn expand(
    stored: &BTreeMap<Tuple, DateTime<Utc>>,
    contextual: &[Tuple],
    user: &str,
    relation: &str,
    object: &str,
    depth: usize,
    expanded: &mut BTreeMap<(String, String), usize>,
) -> bool {
    if depth > MAX_RESOLUTION_DEPTH {
        return false;
    }
    let key = (object.to_string(), relation.to_string());
    if expanded.get(&key).is_some_and(|&seen| seen <= depth) {
        return false;
    }
    expanded.insert(key, depth);

    stored
        .keys()
        .chain(contextual.iter())
        .filter(|t| t.object == object && t.relation == relation)
        .any(|t| {
            if t.user == user {
                return true;
            }
            if let Some(user_type) = t.user.strip_suffix(":*") {
                return user
                    .split_once(':')
                    .is_some_and(|(t, _)| t == user_type);
            }
            match t.user.split_once('#') {
                Some((set_object, set_relation)) => expand(
                    stored,
                    contextual,
                    user,
                    set_relation,
                    set_object,
                    depth + 1,
                    expanded,
                ),
                None => false,
            }
        })
}

#[async_trait]
impl AuthzClient for MemoryAuthzClient {
    #[instrument(skip(self, contextual_tuples), fields(tuple = %tuple))]
    async fn check(
        &self,
        tuple: &Tuple,
        contextual_tuples: &[Tuple],
    ) -> Result<bool, Report<AuthzError>> {
        let stored = self.tuples.read().await;
        let allowed = resolves(
            &stored,
            contextual_tuples,
            &tuple.user,
            &tuple.relation,
            &tuple.object,
        );
        debug!(allowed, "check result");
        Ok(allowed)
    }

    async fn batch_check(
        &self,
        checks: &[TupleWithContext],
    ) -> Result<Vec<bool>, Report<AuthzError>> {
        let mut results = Vec::with_capacity(checks.len());
        for check in checks {
            results.push(self.check(&check.tuple, &check.contextual_tuples).await?);
        }
        Ok(results)
    }

    #[instrument(skip(self, contextual_tuples))]
    async fn list_objects(
        &self,
        user: &str,
        relation: &str,
        object_type: &str,
        contextual_tuples: &[Tuple],
    ) -> Result<Vec<String>, Report<AuthzError>> {
        let stored = self.tuples.read().await;
        let prefix = format!("{object_type}:");
        let candidates: BTreeSet<&str> = stored
            .keys()
            .chain(contextual_tuples.iter())
            .filter(|t| t.object.starts_with(&prefix))
            .map(|t| t.object.as_str())
            .collect();

        let objects: Vec<String> = candidates
            .into_iter()
            .filter(|object| resolves(&stored, contextual_tuples, user, relation, object))
            .map(str::to_string)
            .collect();
        debug!(count = objects.len(), "list objects result");
        Ok(objects)
    }

    async fn read_model(&self) -> Result<AuthorizationModel, Report<AuthzError>> {
        self.model.read().await.clone().ok_or_else(|| {
            AuthzError::RequestFailed {
                details: "store has no authorization model".to_string(),
            }
            .into()
        })
    }

    #[instrument(skip(self), fields(object = %filter.object))]
    async fn read_tuples(
        &self,
        filter: &ReadTuplesFilter,
        continuation_token: Option<&str>,
    ) -> Result<ReadTuplesPage, Report<AuthzError>> {
        let after: Option<Tuple> = match continuation_token.filter(|t| !t.is_empty()) {
            Some(token) => Some(serde_json::from_str(token).map_err(|e| {
                AuthzError::InvalidInput {
                    details: format!("invalid continuation token: {e}"),
                }
            })?),
            None => None,
        };

        let stored = self.tuples.read().await;
        let mut matching = stored
            .iter()
            .filter(|(key, _)| after.as_ref().is_none_or(|after| *key > after))
            .filter(|(key, _)| filter.matches(key));

        let tuples: Vec<StoredTuple> = matching
            .by_ref()
            .take(self.page_size)
            .map(|(key, written)| StoredTuple {
                key: key.clone(),
                timestamp: Some(*written),
            })
            .collect();

        let continuation_token = match (matching.next(), tuples.last()) {
            (Some(_), Some(last)) => Some(serde_json::to_string(&last.key).map_err(|e| {
                AuthzError::InvalidInput {
                    details: format!("cannot encode continuation token: {e}"),
                }
            })?),
            _ => None,
        };

        Ok(ReadTuplesPage {
            tuples,
            continuation_token,
        })
    }

    #[instrument(skip(self), fields(tuple = %tuple))]
    async fn write_tuple(&self, tuple: &Tuple) -> Result<(), Report<AuthzError>> {
        Self::validate(tuple)?;
        self.tuples
            .write()
            .await
            .entry(tuple.clone())
            .or_insert_with(Utc::now);
        debug!("tuple written");
        Ok(())
    }

    #[instrument(skip(self, tuples), fields(count = tuples.len()))]
    async fn delete_tuples(&self, tuples: &[Tuple]) -> Result<(), Report<AuthzError>> {
        let mut stored = self.tuples.write().await;
        for tuple in tuples {
            stored.remove(tuple);
        }
        debug!("tuples deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelVersion;
    use crate::tuple::{CAN_ACCESS, client_tuple, user_tuple};

    #[tokio::test]
    async fn check_follows_group_userset_with_contextual_membership() {
        let client = MemoryAuthzClient::new();
        client
            .write_tuple(&Tuple::group_can_access("eng", "42"))
            .await
            .unwrap();

        let request = Tuple::new(user_tuple("alice"), CAN_ACCESS, client_tuple("42"));
        assert!(!client.check(&request, &[]).await.unwrap());

        let membership = [Tuple::user_member_of("alice", "eng")];
        assert!(client.check(&request, &membership).await.unwrap());

        let other = [Tuple::user_member_of("alice", "ops")];
        assert!(!client.check(&request, &other).await.unwrap());
    }

    #[tokio::test]
    async fn check_honours_wildcards_and_direct_tuples() {
        let client = MemoryAuthzClient::new();
        client
            .write_tuple(&Tuple::new("user:*", CAN_ACCESS, "client:public"))
            .await
            .unwrap();
        client
            .write_tuple(&Tuple::new("user:bob", CAN_ACCESS, "client:7"))
            .await
            .unwrap();

        let anyone = Tuple::new("user:zoe", CAN_ACCESS, "client:public");
        assert!(client.check(&anyone, &[]).await.unwrap());
        let bob = Tuple::new("user:bob", CAN_ACCESS, "client:7");
        assert!(client.check(&bob, &[]).await.unwrap());
        let zoe = Tuple::new("user:zoe", CAN_ACCESS, "client:7");
        assert!(!client.check(&zoe, &[]).await.unwrap());
    }

    #[tokio::test]
    async fn cyclic_usersets_terminate() {
        let client = MemoryAuthzClient::new();
        client
            .write_tuple(&Tuple::new("group:a#member", "member", "group:b"))
            .await
            .unwrap();
        client
            .write_tuple(&Tuple::new("group:b#member", "member", "group:a"))
            .await
            .unwrap();

        let request = Tuple::new("user:alice", "member", "group:a");
        assert!(!client.check(&request, &[]).await.unwrap());
    }

    #[tokio::test]
    async fn layered_usersets_resolve_without_blowup() {
        let client = MemoryAuthzClient::new();
        for level in 0..24 {
            for parent in [format!("group:a{level}"), format!("group:b{level}")] {
                for child in ["a", "b"] {
                    client
                        .write_tuple(&Tuple::new(
                            format!("group:{child}{}#member", level + 1),
                            "member",
                            parent.clone(),
                        ))
                        .await
                        .unwrap();
                }
            }
        }

        let outsider = Tuple::new("user:bob", "member", "group:a0");
        assert!(!client.check(&outsider, &[]).await.unwrap());

        let deepest = [Tuple::new("user:alice", "member", "group:b24")];
        let alice = Tuple::new("user:alice", "member", "group:a0");
        assert!(client.check(&alice, &deepest).await.unwrap());
    }

    #[tokio::test]
    async fn list_objects_returns_sorted_reachable_objects() {
        let client = MemoryAuthzClient::new();
        for app in ["b", "a", "c"] {
            client
                .write_tuple(&Tuple::group_can_access("eng", app))
                .await
                .unwrap();
        }
        client
            .write_tuple(&Tuple::group_can_access("ops", "d"))
            .await
            .unwrap();

        let objects = client
            .list_objects(
                "user:alice",
                CAN_ACCESS,
                "client",
                &[Tuple::user_member_of("alice", "eng")],
            )
            .await
            .unwrap();
        assert_eq!(objects, vec!["client:a", "client:b", "client:c"]);
    }

    #[tokio::test]
    async fn read_pages_survive_deletion_between_pages() {
        let client = MemoryAuthzClient::new().with_page_size(2);
        for group in ["g1", "g2", "g3", "g4", "g5"] {
            client
                .write_tuple(&Tuple::group_can_access(group, "42"))
                .await
                .unwrap();
        }
        let filter = ReadTuplesFilter::new(None, Some(CAN_ACCESS.to_string()), "client:42");

        let mut token: Option<String> = None;
        let mut seen = 0;
        loop {
            let page = client.read_tuples(&filter, token.as_deref()).await.unwrap();
            if page.tuples.is_empty() {
                break;
            }
            seen += page.tuples.len();
            let keys: Vec<Tuple> = page.tuples.into_iter().map(|t| t.key).collect();
            client.delete_tuples(&keys).await.unwrap();
            match page.continuation_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        assert_eq!(seen, 5);
        assert!(client.tuples().await.is_empty());
    }

    #[tokio::test]
    async fn read_rejects_garbage_token() {
        let client = MemoryAuthzClient::new();
        let filter = ReadTuplesFilter::new(None, None, "client:");
        let err = client
            .read_tuples(&filter, Some("not-a-token"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            AuthzError::InvalidInput { .. }
        ));
    }

    #[tokio::test]
    async fn writes_and_deletes_are_idempotent() {
        let client = MemoryAuthzClient::new();
        let tuple = Tuple::group_can_access("eng", "42");
        client.write_tuple(&tuple).await.unwrap();
        client.write_tuple(&tuple).await.unwrap();
        assert_eq!(client.tuples().await, vec![tuple.clone()]);

        client.delete_tuple(&tuple).await.unwrap();
        client.delete_tuple(&tuple).await.unwrap();
        assert!(client.tuples().await.is_empty());
    }

    #[tokio::test]
    async fn write_rejects_malformed_tuple() {
        let client = MemoryAuthzClient::new();
        let err = client
            .write_tuple(&Tuple::new("alice", CAN_ACCESS, "client:42"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            AuthzError::InvalidInput { .. }
        ));
    }

    #[tokio::test]
    async fn read_model_requires_a_model() {
        let client = MemoryAuthzClient::new();
        assert!(client.read_model().await.is_err());

        let model = AuthorizationModel::embedded(ModelVersion::V0).unwrap();
        client.set_model(Some(model.clone())).await;
        assert!(client.compare_model(&model).await.unwrap());
    }
}
