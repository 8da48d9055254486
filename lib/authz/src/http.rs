//! Client for an OpenFGA-compatible HTTP API.
//!
//! Writes ask the service to ignore duplicates and deletes ask it to ignore
//! missing tuples, which keeps both idempotent. Batch checks are issued as
//! individual checks fanned out through a [`WorkerPool`].

use crate::client::{AuthzClient, ReadTuplesFilter, ReadTuplesPage};
use crate::config::AuthzConfig;
use crate::error::AuthzError;
use crate::model::AuthorizationModel;
use crate::pool::WorkerPool;
use crate::tuple::{StoredTuple, Tuple, TupleWithContext};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use rootcause::prelude::Report;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Largest number of tuples the service accepts in one write request.
const MAX_TUPLES_PER_WRITE: usize = 100;

#[derive(Debug, Serialize)]
struct TupleKeyBody<'a> {
    user: &'a str,
    relation: &'a str,
    object: &'a str,
}

impl<'a> From<&'a Tuple> for TupleKeyBody<'a> {
    fn from(tuple: &'a Tuple) -> Self {
        Self {
            user: &tuple.user,
            relation: &tuple.relation,
            object: &tuple.object,
        }
    }
}

#[derive(Debug, Serialize)]
struct ContextualTuplesBody<'a> {
    tuple_keys: Vec<TupleKeyBody<'a>>,
}

fn contextual_body(tuples: &[Tuple]) -> Option<ContextualTuplesBody<'_>> {
    (!tuples.is_empty()).then(|| ContextualTuplesBody {
        tuple_keys: tuples.iter().map(TupleKeyBody::from).collect(),
    })
}

#[derive(Debug, Serialize)]
struct CheckBody<'a> {
    tuple_key: TupleKeyBody<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    contextual_tuples: Option<ContextualTuplesBody<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    authorization_model_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    #[serde(default)]
    allowed: bool,
}

#[derive(Debug, Serialize)]
struct ListObjectsBody<'a> {
    #[serde(rename = "type")]
    object_type: &'a str,
    relation: &'a str,
    user: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    contextual_tuples: Option<ContextualTuplesBody<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    authorization_model_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ListObjectsResponse {
    #[serde(default)]
    objects: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ReadFilterBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    relation: Option<&'a str>,
    object: &'a str,
}

#[derive(Debug, Serialize)]
struct ReadBody<'a> {
    tuple_key: ReadFilterBody<'a>,
    page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    continuation_token: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ReadResponseTuple {
    key: Tuple,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ReadResponse {
    #[serde(default)]
    tuples: Vec<ReadResponseTuple>,
    #[serde(default)]
    continuation_token: Option<String>,
}

impl From<ReadResponse> for ReadTuplesPage {
    fn from(response: ReadResponse) -> Self {
        Self {
            tuples: response
                .tuples
                .into_iter()
                .map(|t| StoredTuple {
                    key: t.key,
                    timestamp: t.timestamp,
                })
                .collect(),
            continuation_token: response.continuation_token.filter(|t| !t.is_empty()),
        }
    }
}

#[derive(Debug, Serialize)]
struct WriteTuplesBody<'a> {
    tuple_keys: Vec<TupleKeyBody<'a>>,
    on_duplicate: &'static str,
}

#[derive(Debug, Serialize)]
struct DeleteTuplesBody<'a> {
    tuple_keys: Vec<TupleKeyBody<'a>>,
    on_missing: &'static str,
}

#[derive(Debug, Serialize)]
struct WriteBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    writes: Option<WriteTuplesBody<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deletes: Option<DeleteTuplesBody<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    authorization_model_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ReadModelResponse {
    authorization_model: AuthorizationModel,
}

#[derive(Debug, Deserialize)]
struct ReadModelsResponse {
    #[serde(default)]
    authorization_models: Vec<AuthorizationModel>,
}

/// Request plumbing shared with pool tasks.
struct Endpoint {
    http: reqwest::Client,
    store_url: String,
    model_id: Option<String>,
}

impl Endpoint {
    async fn send<R: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<R, Report<AuthzError>> {
        let response = request.send().await.map_err(|e| AuthzError::RequestFailed {
            details: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthzError::RequestFailed {
                details: format!("{status}: {body}"),
            }
            .into());
        }

        response.json::<R>().await.map_err(|e| {
            AuthzError::InvalidResponse {
                details: e.to_string(),
            }
            .into()
        })
    }

    async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, Report<AuthzError>> {
        let url = format!("{}/{path}", self.store_url);
        self.send(self.http.post(url).json(body)).await
    }

    async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R, Report<AuthzError>> {
        let url = format!("{}/{path}", self.store_url);
        self.send(self.http.get(url)).await
    }

    async fn check(
        &self,
        tuple: &Tuple,
        contextual_tuples: &[Tuple],
    ) -> Result<bool, Report<AuthzError>> {
        let body = CheckBody {
            tuple_key: TupleKeyBody::from(tuple),
            contextual_tuples: contextual_body(contextual_tuples),
            authorization_model_id: self.model_id.as_deref(),
        };
        let response: CheckResponse = self.post("check", &body).await?;
        Ok(response.allowed)
    }
}

/// Authorization client backed by an OpenFGA-compatible HTTP API.
pub struct HttpAuthzClient {
    endpoint: Arc<Endpoint>,
    pool: Arc<WorkerPool>,
    page_size: u32,
}

impl HttpAuthzClient {
    /// Builds the HTTP client and starts the check worker pool.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(config: &AuthzConfig) -> Result<Self, Report<AuthzError>> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.api_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
                AuthzError::ConnectionFailed {
                    details: format!("invalid api token: {e}"),
                }
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| AuthzError::ConnectionFailed {
                details: e.to_string(),
            })?;

        let pool = WorkerPool::new(config.pool.clone()).map_err(|e| {
            AuthzError::ConnectionFailed {
                details: e.to_string(),
            }
        })?;

        Ok(Self {
            endpoint: Arc::new(Endpoint {
                http,
                store_url: format!(
                    "{}/stores/{}",
                    config.api_url.trim_end_matches('/'),
                    config.store_id
                ),
                model_id: config.model_id.clone(),
            }),
            pool: Arc::new(pool),
            page_size: config.read_page_size,
        })
    }

    /// Drains in-flight checks and stops the worker pool.
    pub async fn shutdown(&self) -> Result<(), Report<AuthzError>> {
        self.pool.stop().await.map_err(|e| {
            AuthzError::RequestFailed {
                details: e.to_string(),
            }
            .into()
        })
    }

    async fn write(&self, body: &WriteBody<'_>) -> Result<(), Report<AuthzError>> {
        let _: serde_json::Value = self.endpoint.post("write", body).await?;
        Ok(())
    }
}

#[async_trait]
impl AuthzClient for HttpAuthzClient {
    #[instrument(skip(self, contextual_tuples), fields(tuple = %tuple, contextual = contextual_tuples.len()))]
    async fn check(
        &self,
        tuple: &Tuple,
        contextual_tuples: &[Tuple],
    ) -> Result<bool, Report<AuthzError>> {
        let allowed = self.endpoint.check(tuple, contextual_tuples).await?;
        debug!(allowed, "check result");
        Ok(allowed)
    }

    #[instrument(skip(self, checks), fields(count = checks.len()))]
    async fn batch_check(
        &self,
        checks: &[TupleWithContext],
    ) -> Result<Vec<bool>, Report<AuthzError>> {
        let tasks = checks.iter().cloned().map(|check| {
            let endpoint = Arc::clone(&self.endpoint);
            async move {
                endpoint
                    .check(&check.tuple, &check.contextual_tuples)
                    .await
            }
        });

        let results = self.pool.run_all(tasks).await.map_err(|e| {
            AuthzError::RequestFailed {
                details: e.to_string(),
            }
        })?;

        results.into_iter().collect()
    }

    #[instrument(skip(self, contextual_tuples))]
    async fn list_objects(
        &self,
        user: &str,
        relation: &str,
        object_type: &str,
        contextual_tuples: &[Tuple],
    ) -> Result<Vec<String>, Report<AuthzError>> {
        let body = ListObjectsBody {
            object_type,
            relation,
            user,
            contextual_tuples: contextual_body(contextual_tuples),
            authorization_model_id: self.endpoint.model_id.as_deref(),
        };
        let response: ListObjectsResponse = self.endpoint.post("list-objects", &body).await?;
        debug!(count = response.objects.len(), "list objects result");
        Ok(response.objects)
    }

    #[instrument(skip(self))]
    async fn read_model(&self) -> Result<AuthorizationModel, Report<AuthzError>> {
        match &self.endpoint.model_id {
            Some(id) => {
                let response: ReadModelResponse = self
                    .endpoint
                    .get(&format!("authorization-models/{id}"))
                    .await?;
                Ok(response.authorization_model)
            }
            None => {
                let response: ReadModelsResponse = self
                    .endpoint
                    .get("authorization-models?page_size=1")
                    .await?;
                response.authorization_models.into_iter().next().ok_or_else(|| {
                    AuthzError::RequestFailed {
                        details: "store has no authorization model".to_string(),
                    }
                    .into()
                })
            }
        }
    }

    #[instrument(skip(self), fields(object = %filter.object))]
    async fn read_tuples(
        &self,
        filter: &ReadTuplesFilter,
        continuation_token: Option<&str>,
    ) -> Result<ReadTuplesPage, Report<AuthzError>> {
        let body = ReadBody {
            tuple_key: ReadFilterBody {
                user: filter.user.as_deref(),
                relation: filter.relation.as_deref(),
                object: &filter.object,
            },
            page_size: self.page_size,
            continuation_token: continuation_token.filter(|t| !t.is_empty()),
        };
        let response: ReadResponse = self.endpoint.post("read", &body).await?;
        let page = ReadTuplesPage::from(response);
        debug!(count = page.tuples.len(), more = page.continuation_token.is_some(), "read page");
        Ok(page)
    }

    #[instrument(skip(self), fields(tuple = %tuple))]
    async fn write_tuple(&self, tuple: &Tuple) -> Result<(), Report<AuthzError>> {
        self.write(&WriteBody {
            writes: Some(WriteTuplesBody {
                tuple_keys: vec![TupleKeyBody::from(tuple)],
                on_duplicate: "ignore",
            }),
            deletes: None,
            authorization_model_id: self.endpoint.model_id.as_deref(),
        })
        .await?;
        debug!("tuple written");
        Ok(())
    }

    #[instrument(skip(self, tuples), fields(count = tuples.len()))]
    async fn delete_tuples(&self, tuples: &[Tuple]) -> Result<(), Report<AuthzError>> {
        for chunk in tuples.chunks(MAX_TUPLES_PER_WRITE) {
            self.write(&WriteBody {
                writes: None,
                deletes: Some(DeleteTuplesBody {
                    tuple_keys: chunk.iter().map(TupleKeyBody::from).collect(),
                    on_missing: "ignore",
                }),
                authorization_model_id: self.endpoint.model_id.as_deref(),
            })
            .await?;
        }
        debug!("tuples deleted");
        Ok(())
    }
}
