//! HTTP gateway to the IaaS block-storage API.
//!
//! Every resource lives under `/v1/projects/{project}`. Requests carry a
//! bearer token; a 404 maps to [`BackendError::NotFound`] so callers can
//! treat absence as a state rather than a failure. List endpoints ignore
//! query filters, so filtering happens locally through [`Filters`].
//!
//! [`Filters`]: crate::filter::Filters

mod storage;
mod wire;

use std::fmt;
use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::backend::{BackendError, ResourceKind};
use crate::config::{CloudConfig, ConfigError};
use wire::{ApiFailure, ItemList};

/// Target of a request, used to name the resource in errors.
#[derive(Clone, Copy, Debug)]
struct Target<'a> {
    kind: ResourceKind,
    id: &'a str,
    collection: bool,
}

impl<'a> Target<'a> {
    const fn new(kind: ResourceKind, id: &'a str) -> Self {
        Self {
            kind,
            id,
            collection: false,
        }
    }

    /// A list or create endpoint; `path` names the collection.
    const fn collection(kind: ResourceKind, path: &'a str) -> Self {
        Self {
            kind,
            id: path,
            collection: true,
        }
    }

    /// A missing collection means the project or API base is wrong, not that
    /// a resource is absent.
    fn missing(self) -> BackendError {
        if self.collection {
            BackendError::Api {
                status: StatusCode::NOT_FOUND.as_u16(),
                message: format!(
                    "{} collection `{}` not found, check api_url and project_id",
                    self.kind, self.id
                ),
            }
        } else {
            BackendError::not_found(self.kind, self.id)
        }
    }
}

/// [`BlockStorage`](crate::backend::BlockStorage) implementation over the
/// IaaS REST API.
#[derive(Clone)]
pub struct IaasClient {
    http: Client,
    base_url: String,
    token: String,
}

impl fmt::Debug for IaasClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IaasClient")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl IaasClient {
    /// Builds a client for `project_id` at `api_url`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Validation`] for an empty URL, project or
    /// token and [`BackendError::Transport`] when the HTTP client cannot be
    /// built.
    pub fn new(
        api_url: &str,
        project_id: &str,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let token_value = token.into();
        for (field, value) in [
            ("api_url", api_url),
            ("project_id", project_id),
            ("access_token", token_value.as_str()),
        ] {
            if value.trim().is_empty() {
                return Err(BackendError::Validation(field.to_owned()));
            }
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| BackendError::Transport(err.to_string()))?;
        Ok(Self {
            http,
            base_url: format!(
                "{}/v1/projects/{project_id}",
                api_url.trim_end_matches('/')
            ),
            token: token_value,
        })
    }

    /// Builds a client from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation or token resolution fails, or
    /// the HTTP client cannot be built.
    pub fn from_config(config: &CloudConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let token = config.access_token()?;
        Self::new(
            &config.api_url,
            &config.project_id,
            token,
            config.http_timeout(),
        )
        .map_err(|err| ConfigError::Invalid(err.to_string()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, self.url(path))
            .bearer_auth(&self.token)
    }

    async fn send(
        &self,
        builder: RequestBuilder,
        target: Target<'_>,
    ) -> Result<Response, BackendError> {
        let response = builder
            .send()
            .await
            .map_err(|err| BackendError::Transport(err.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(target.missing());
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiFailure>(&body)
            .ok()
            .map(|failure| failure.message)
            .filter(|text| !text.is_empty())
            .unwrap_or(body);
        debug!(
            status = status.as_u16(),
            %message,
            kind = %target.kind,
            id = target.id,
            "API request failed"
        );
        Err(BackendError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn decode<T: DeserializeOwned>(
        response: Response,
        kind: ResourceKind,
    ) -> Result<T, BackendError> {
        response.json::<T>().await.map_err(|err| BackendError::Decode {
            resource: kind.to_string(),
            message: err.to_string(),
        })
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        path: &str,
        target: Target<'_>,
    ) -> Result<T, BackendError> {
        let response = self.send(self.request(Method::GET, path), target).await?;
        Self::decode(response, target.kind).await
    }

    async fn fetch_all<T: DeserializeOwned>(
        &self,
        path: &str,
        kind: ResourceKind,
    ) -> Result<Vec<T>, BackendError> {
        let list: ItemList<T> = self.fetch(path, Target::collection(kind, path)).await?;
        Ok(list.items)
    }

    async fn create<B, T>(
        &self,
        path: &str,
        body: &B,
        kind: ResourceKind,
    ) -> Result<T, BackendError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let response = self
            .send(
                self.request(Method::POST, path).json(body),
                Target::collection(kind, path),
            )
            .await?;
        Self::decode(response, kind).await
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        target: Target<'_>,
    ) -> Result<(), BackendError> {
        self.send(self.request(method, path), target).await.map(drop)
    }
}
