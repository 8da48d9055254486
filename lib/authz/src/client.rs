//! The capability this crate needs from an authorization graph.
//!
//! [`HttpAuthzClient`](crate::HttpAuthzClient) talks to a remote service and
//! [`MemoryAuthzClient`](crate::MemoryAuthzClient) evaluates an in-process
//! graph. Callers pick one at construction and hold it as `Arc<dyn AuthzClient>`.

use crate::error::AuthzError;
use crate::model::AuthorizationModel;
use crate::tuple::{StoredTuple, Tuple, TupleWithContext};
use async_trait::async_trait;
use rootcause::prelude::Report;

/// Filter for a tuple read.
///
/// `object` is either a full object (`client:42`) or a bare type followed by
/// a colon (`client:`), which matches every object of that type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadTuplesFilter {
    /// Restrict to this user, if set.
    pub user: Option<String>,
    /// Restrict to this relation, if set.
    pub relation: Option<String>,
    /// Object or object-type pattern.
    pub object: String,
}

impl ReadTuplesFilter {
    /// Creates a filter.
    #[must_use]
    pub fn new(user: Option<String>, relation: Option<String>, object: impl Into<String>) -> Self {
        Self {
            user,
            relation,
            object: object.into(),
        }
    }

    /// Returns true if `tuple` is selected by this filter.
    #[must_use]
    pub fn matches(&self, tuple: &Tuple) -> bool {
        let object_matches = if self.object.ends_with(':') {
            tuple.object.starts_with(&self.object)
        } else {
            tuple.object == self.object
        };
        object_matches
            && self.user.as_ref().is_none_or(|u| *u == tuple.user)
            && self.relation.as_ref().is_none_or(|r| *r == tuple.relation)
    }
}

/// One page of a tuple read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadTuplesPage {
    /// Tuples on this page.
    pub tuples: Vec<StoredTuple>,
    /// Token for the next page; `None` when the read is exhausted.
    pub continuation_token: Option<String>,
}

/// Operations against a relationship-based authorization graph.
#[async_trait]
pub trait AuthzClient: Send + Sync {
    /// Evaluates a single check.
    async fn check(
        &self,
        tuple: &Tuple,
        contextual_tuples: &[Tuple],
    ) -> Result<bool, Report<AuthzError>>;

    /// Evaluates independent checks; results are in request order.
    async fn batch_check(
        &self,
        checks: &[TupleWithContext],
    ) -> Result<Vec<bool>, Report<AuthzError>>;

    /// Lists every object of `object_type` on which `user` has `relation`.
    async fn list_objects(
        &self,
        user: &str,
        relation: &str,
        object_type: &str,
        contextual_tuples: &[Tuple],
    ) -> Result<Vec<String>, Report<AuthzError>>;

    /// Reads the model the store currently enforces.
    async fn read_model(&self) -> Result<AuthorizationModel, Report<AuthzError>>;

    /// Returns true if the store's model matches `expected`.
    async fn compare_model(
        &self,
        expected: &AuthorizationModel,
    ) -> Result<bool, Report<AuthzError>> {
        let remote = self.read_model().await?;
        Ok(expected.matches(&remote))
    }

    /// Reads one page of tuples matching `filter`.
    async fn read_tuples(
        &self,
        filter: &ReadTuplesFilter,
        continuation_token: Option<&str>,
    ) -> Result<ReadTuplesPage, Report<AuthzError>>;

    /// Writes a tuple; writing an existing tuple succeeds.
    async fn write_tuple(&self, tuple: &Tuple) -> Result<(), Report<AuthzError>>;

    /// Deletes a tuple; deleting a missing tuple succeeds.
    async fn delete_tuple(&self, tuple: &Tuple) -> Result<(), Report<AuthzError>> {
        self.delete_tuples(std::slice::from_ref(tuple)).await
    }

    /// Deletes tuples in one request.
    async fn delete_tuples(&self, tuples: &[Tuple]) -> Result<(), Report<AuthzError>>;
}
