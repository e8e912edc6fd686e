//! # Remote API Client
//!
//! The engine talks to one logical RPC-style endpoint: a POST of
//! `{resource, action, data}` answered by `{ok, data?, message?}`. Transport
//! failures (connection, timeout, non-2xx) are [`ApiError`]s and transient;
//! a well-formed answer with `ok == false` is a server rejection and is
//! handled by the drain's retry policy instead.
//!
//! [`RemoteApi`] is the seam between the coordinator and the wire: the
//! production implementation is [`HttpApi`] (reqwest), tests script their
//! own implementations.

use std::future::Future;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SyncConfig;
use crate::error::ApiError;
use crate::model::OperationKind;

/// Path of the single sync endpoint on the server
const SYNC_ENDPOINT: &str = "/api/sync";

/// Action field of a request envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    List,
    Create,
    Update,
    Delete,
    Login,
}

impl From<OperationKind> for Action {
    fn from(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Create => Self::Create,
            OperationKind::Update => Self::Update,
            OperationKind::Delete => Self::Delete,
        }
    }
}

/// Request envelope sent to the sync endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequest {
    pub resource: String,
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ApiRequest {
    /// Build a listing request for one resource collection
    pub fn list(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: Action::List,
            data: None,
        }
    }
}

/// Response envelope returned by the sync endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Transport seam between the coordinator and the server
pub trait RemoteApi: Send + Sync + 'static {
    /// Send one request envelope and wait for the server's answer
    fn call(
        &self,
        request: ApiRequest,
    ) -> impl Future<Output = Result<ApiResponse, ApiError>> + Send;

    /// Install or clear the bearer credential supplied by the session layer
    fn set_bearer(&self, bearer: Option<String>);
}

/// Production transport over HTTP
#[derive(Debug)]
pub struct HttpApi {
    client: reqwest::Client,
    endpoint: String,
    bearer: Mutex<Option<String>>,
}

impl HttpApi {
    /// Build the HTTP transport from the engine configuration
    ///
    /// The per-send timeout is enforced here at the client level; the
    /// coordinator additionally bounds each drain step, so a stalled send
    /// can never leave the user in an indefinite spinner state.
    pub fn new(config: &SyncConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.send_timeout)
            .build()
            .map_err(ApiError::from)?;
        Ok(Self {
            client,
            endpoint: config.api_url(SYNC_ENDPOINT),
            bearer: Mutex::new(None),
        })
    }
}

impl RemoteApi for HttpApi {
    async fn call(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(token) = self.bearer.lock().expect("bearer lock").as_ref() {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }

        tracing::debug!(resource = %request.resource, action = ?request.action, "sending");
        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| status.to_string());
            return Err(ApiError::network(format!("{}: {}", status, body)));
        }

        response
            .json::<ApiResponse>()
            .await
            .map_err(|err| ApiError::invalid_response(err.to_string()))
    }

    fn set_bearer(&self, bearer: Option<String>) {
        *self.bearer.lock().expect("bearer lock") = bearer;
    }
}
