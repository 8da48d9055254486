//! Paginated bulk deletion of tuples.
//!
//! A sweep reads one page of matching tuples, deletes that page, and follows
//! the continuation token until the read is exhausted. Pages are processed
//! strictly one after another since the remote cursor is sequential.
//!
//! ```text
//! Fetching(token) --empty page--> Done
//! Fetching(token) --tuples------> Deleting(tuples, next)
//! Deleting(_, Some(next)) ------> Fetching(next)
//! Deleting(_, None) ------------> Done
//! any error --------------------> Failed
//! ```
//!
//! There is no partial-success bookkeeping: a failure mid-sweep leaves
//! earlier pages deleted. Deletes are idempotent, so rerunning is safe.

use crate::client::{AuthzClient, ReadTuplesFilter};
use crate::error::AuthzError;
use crate::tuple::Tuple;
use rootcause::prelude::Report;
use tracing::{debug, instrument};

/// State of a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepState {
    /// About to read the page at `token`.
    Fetching {
        /// Continuation token; `None` for the first page.
        token: Option<String>,
    },
    /// About to delete a page that was just read.
    Deleting {
        /// Tuples on the page.
        tuples: Vec<Tuple>,
        /// Token for the page after this one.
        next_token: Option<String>,
    },
    /// Every matching tuple has been deleted.
    Done,
    /// A read or delete failed.
    Failed,
}

impl SweepState {
    /// Returns true for `Done` and `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Totals for a finished sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Tuples deleted.
    pub deleted: usize,
    /// Delete requests issued, one per non-empty page.
    pub batches: usize,
}

/// A bulk deletion in progress.
pub struct Sweep<'a> {
    client: &'a dyn AuthzClient,
    filter: ReadTuplesFilter,
    state: SweepState,
    summary: SweepSummary,
}

impl<'a> Sweep<'a> {
    /// Creates a sweep positioned before the first page.
    #[must_use]
    pub fn new(client: &'a dyn AuthzClient, filter: ReadTuplesFilter) -> Self {
        Self {
            client,
            filter,
            state: SweepState::Fetching { token: None },
            summary: SweepSummary::default(),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &SweepState {
        &self.state
    }

    /// Totals so far.
    #[must_use]
    pub fn summary(&self) -> SweepSummary {
        self.summary
    }

    /// Performs one transition. Terminal states are left unchanged.
    pub async fn step(&mut self) -> Result<(), Report<AuthzError>> {
        let state = std::mem::replace(&mut self.state, SweepState::Failed);
        self.state = match state {
            SweepState::Fetching { token } => {
                let page = self
                    .client
                    .read_tuples(&self.filter, token.as_deref())
                    .await?;
                if page.tuples.is_empty() {
                    SweepState::Done
                } else {
                    SweepState::Deleting {
                        tuples: page.tuples.into_iter().map(|t| t.key).collect(),
                        next_token: page.continuation_token.filter(|t| !t.is_empty()),
                    }
                }
            }
            SweepState::Deleting { tuples, next_token } => {
                self.client.delete_tuples(&tuples).await?;
                self.summary.deleted += tuples.len();
                self.summary.batches += 1;
                debug!(deleted = tuples.len(), "deleted page");
                match next_token {
                    Some(token) => SweepState::Fetching { token: Some(token) },
                    None => SweepState::Done,
                }
            }
            terminal => terminal,
        };
        Ok(())
    }

    /// Steps until a terminal state is reached.
    #[instrument(skip(self), fields(object = %self.filter.object))]
    pub async fn run(mut self) -> Result<SweepSummary, Report<AuthzError>> {
        while !self.state.is_terminal() {
            self.step().await?;
        }
        debug!(
            deleted = self.summary.deleted,
            batches = self.summary.batches,
            "sweep finished"
        );
        Ok(self.summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ReadTuplesPage;
    use crate::model::AuthorizationModel;
    use crate::tuple::{StoredTuple, TupleWithContext};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Returns scripted pages and records every call.
    struct ScriptedClient {
        pages: Mutex<VecDeque<Result<ReadTuplesPage, AuthzError>>>,
        fail_delete_on_batch: Option<usize>,
        tokens_seen: Mutex<Vec<Option<String>>>,
        deletes: Mutex<Vec<Vec<Tuple>>>,
    }

    impl ScriptedClient {
        fn new(pages: Vec<Result<ReadTuplesPage, AuthzError>>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                fail_delete_on_batch: None,
                tokens_seen: Mutex::new(Vec::new()),
                deletes: Mutex::new(Vec::new()),
            }
        }
    }

    fn page(start: usize, size: usize, token: Option<&str>) -> Result<ReadTuplesPage, AuthzError> {
        Ok(ReadTuplesPage {
            tuples: (start..start + size)
                .map(|i| StoredTuple {
                    key: Tuple::group_can_access(&format!("g{i}"), "42"),
                    timestamp: None,
                })
                .collect(),
            continuation_token: token.map(str::to_string),
        })
    }

    #[async_trait]
    impl AuthzClient for ScriptedClient {
        async fn check(&self, _: &Tuple, _: &[Tuple]) -> Result<bool, Report<AuthzError>> {
            unreachable!("sweeps never check")
        }

        async fn batch_check(
            &self,
            _: &[TupleWithContext],
        ) -> Result<Vec<bool>, Report<AuthzError>> {
            unreachable!("sweeps never check")
        }

        async fn list_objects(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &[Tuple],
        ) -> Result<Vec<String>, Report<AuthzError>> {
            unreachable!("sweeps never list")
        }

        async fn read_model(&self) -> Result<AuthorizationModel, Report<AuthzError>> {
            unreachable!("sweeps never read the model")
        }

        async fn read_tuples(
            &self,
            _: &ReadTuplesFilter,
            token: Option<&str>,
        ) -> Result<ReadTuplesPage, Report<AuthzError>> {
            self.tokens_seen
                .lock()
                .unwrap()
                .push(token.map(str::to_string));
            let next = self.pages.lock().unwrap().pop_front();
            match next {
                Some(result) => result.map_err(Report::from),
                None => Ok(ReadTuplesPage::default()),
            }
        }

        async fn write_tuple(&self, _: &Tuple) -> Result<(), Report<AuthzError>> {
            unreachable!("sweeps never write")
        }

        async fn delete_tuples(&self, tuples: &[Tuple]) -> Result<(), Report<AuthzError>> {
            let mut deletes = self.deletes.lock().unwrap();
            if self.fail_delete_on_batch == Some(deletes.len()) {
                return Err(AuthzError::RequestFailed {
                    details: "connection reset".to_string(),
                }
                .into());
            }
            deletes.push(tuples.to_vec());
            Ok(())
        }
    }

    fn filter() -> ReadTuplesFilter {
        ReadTuplesFilter::new(None, Some("can_access".to_string()), "client:42")
    }

    #[tokio::test]
    async fn n_pages_then_empty_page_issue_n_delete_batches() {
        let client = ScriptedClient::new(vec![
            page(0, 3, Some("t1")),
            page(3, 3, Some("t2")),
            page(6, 3, Some("t3")),
            page(9, 0, None),
        ]);

        let summary = Sweep::new(&client, filter()).run().await.unwrap();

        assert_eq!(summary, SweepSummary { deleted: 9, batches: 3 });
        assert_eq!(client.deletes.lock().unwrap().len(), 3);
        assert_eq!(
            *client.tokens_seen.lock().unwrap(),
            vec![
                None,
                Some("t1".to_string()),
                Some("t2".to_string()),
                Some("t3".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn stops_when_token_is_exhausted() {
        let client = ScriptedClient::new(vec![page(0, 2, Some("t1")), page(2, 2, None)]);

        let summary = Sweep::new(&client, filter()).run().await.unwrap();

        assert_eq!(summary.batches, 2);
        assert_eq!(client.tokens_seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn empty_first_page_deletes_nothing() {
        let client = ScriptedClient::new(vec![page(0, 0, Some("ignored"))]);

        let summary = Sweep::new(&client, filter()).run().await.unwrap();

        assert_eq!(summary, SweepSummary::default());
        assert!(client.deletes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn step_walks_the_state_machine() {
        let client = ScriptedClient::new(vec![page(0, 1, None)]);
        let mut sweep = Sweep::new(&client, filter());

        assert_eq!(sweep.state(), &SweepState::Fetching { token: None });
        sweep.step().await.unwrap();
        assert!(matches!(
            sweep.state(),
            SweepState::Deleting { tuples, next_token: None } if tuples.len() == 1
        ));
        sweep.step().await.unwrap();
        assert_eq!(sweep.state(), &SweepState::Done);
        sweep.step().await.unwrap();
        assert_eq!(sweep.state(), &SweepState::Done);
    }

    #[tokio::test]
    async fn read_failure_aborts_immediately() {
        let client = ScriptedClient::new(vec![
            page(0, 2, Some("t1")),
            Err(AuthzError::RequestFailed {
                details: "503".to_string(),
            }),
            page(2, 2, None),
        ]);
        let mut sweep = Sweep::new(&client, filter());

        let err = loop {
            if let Err(e) = sweep.step().await {
                break e;
            }
        };

        assert_eq!(sweep.state(), &SweepState::Failed);
        assert_eq!(sweep.summary().batches, 1);
        assert!(matches!(
            err.current_context(),
            AuthzError::RequestFailed { .. }
        ));
        assert_eq!(client.pages.lock().unwrap().len(), 1, "third page never read");
    }

    #[tokio::test]
    async fn delete_failure_aborts_with_earlier_pages_deleted() {
        let mut client = ScriptedClient::new(vec![
            page(0, 2, Some("t1")),
            page(2, 2, Some("t2")),
            page(4, 2, None),
        ]);
        client.fail_delete_on_batch = Some(1);

        let err = Sweep::new(&client, filter()).run().await.unwrap_err();

        assert!(err.to_string().contains("connection reset"));
        assert_eq!(client.deletes.lock().unwrap().len(), 1);
        assert_eq!(client.tokens_seen.lock().unwrap().len(), 2);
    }
}
