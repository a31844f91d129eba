//! REST client for the NSX manager upgrade API.
//!
//! One `NsxManagerClient` implements every capability trait in
//! [`client`](super::client). Failures are classified into [`RemoteError`]
//! so the coordinator can tell a restarting manager from a rejected request.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use super::client::{
    GroupClient, GroupStatusClient, PlanClient, PostCheckClient, SettingsClient,
    StatusSummaryClient,
};
use super::error::RemoteError;
use super::types::{
    Component, GroupStatus, PlanSettings, ReorderRequest, UnitGroup, UpgradeStatusSummary,
};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const UPGRADE_API: &str = "api/v1/upgrade";

/// Connection settings of one NSX manager.
#[derive(Clone)]
pub struct NsxManagerConfig {
    /// Manager base URL, e.g. `https://nsx.example.com`.
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Accept self-signed manager certificates.
    pub insecure_skip_verify: bool,
    pub request_timeout: Duration,
}

impl NsxManagerConfig {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
            insecure_skip_verify: false,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for NsxManagerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NsxManagerConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Paged list envelope used by the manager.
#[derive(Deserialize)]
struct ListResult<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
    #[serde(default)]
    cursor: Option<String>,
}

/// HTTP client bound to one NSX manager.
#[derive(Clone)]
pub struct NsxManagerClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl NsxManagerClient {
    pub fn new(config: NsxManagerConfig) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username,
            password: config.password,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}/{}", self.base_url, UPGRADE_API, path);
        self.http
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, RemoteError> {
        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, body))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RemoteError> {
        let response = self.send(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    async fn send_empty(&self, request: RequestBuilder) -> Result<(), RemoteError> {
        self.send(request).await.map(|_| ())
    }

    /// Fetch every page of a list endpoint.
    async fn list_all<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, RemoteError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut request = self.request(Method::GET, path).query(query);
            if let Some(ref c) = cursor {
                request = request.query(&[("cursor", c.as_str())]);
            }
            let page: ListResult<T> = self.send_json(request).await?;
            items.extend(page.results);
            match page.cursor.filter(|c| !c.is_empty()) {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => return Ok(items),
            }
        }
    }
}

/// Map a transport failure onto the coordinator's vocabulary.
fn classify_transport(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout(err.to_string())
    } else if err.is_connect() {
        RemoteError::ServiceUnavailable(err.to_string())
    } else if err.is_decode() {
        RemoteError::Decode(err.to_string())
    } else {
        RemoteError::Transport(err.to_string())
    }
}

/// Map a non-2xx answer onto the coordinator's vocabulary.
pub fn classify_status(status: StatusCode, body: String) -> RemoteError {
    match status {
        StatusCode::SERVICE_UNAVAILABLE => RemoteError::ServiceUnavailable(body),
        StatusCode::GATEWAY_TIMEOUT => RemoteError::Timeout(body),
        StatusCode::NOT_FOUND => RemoteError::NotFound(body),
        _ => RemoteError::Api {
            status: status.as_u16(),
            message: error_message(&body),
        },
    }
}

/// The manager reports errors as `{"error_code": .., "error_message": ".."}`.
fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ApiErrorBody {
        error_message: String,
    }
    serde_json::from_str::<ApiErrorBody>(body)
        .map(|e| e.error_message)
        .unwrap_or_else(|_| body.to_string())
}

#[async_trait]
impl GroupClient for NsxManagerClient {
    #[instrument(skip(self))]
    async fn get(&self, id: &str) -> Result<UnitGroup, RemoteError> {
        let path = format!("upgrade-unit-groups/{}", id);
        self.send_json(self.request(Method::GET, &path)).await
    }

    #[instrument(skip(self, group))]
    async fn update(&self, id: &str, group: &UnitGroup) -> Result<UnitGroup, RemoteError> {
        let path = format!("upgrade-unit-groups/{}", id);
        self.send_json(self.request(Method::PUT, &path).json(group))
            .await
    }

    #[instrument(skip(self))]
    async fn reorder(&self, id: &str, request: &ReorderRequest) -> Result<(), RemoteError> {
        let path = format!("upgrade-unit-groups/{}", id);
        self.send_empty(
            self.request(Method::POST, &path)
                .query(&[("action", "reorder")])
                .json(request),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn list(&self, component: Option<Component>) -> Result<Vec<UnitGroup>, RemoteError> {
        match component {
            Some(c) => {
                self.list_all("upgrade-unit-groups", &[("component_type", c.as_wire())])
                    .await
            }
            None => self.list_all("upgrade-unit-groups", &[]).await,
        }
    }
}

#[async_trait]
impl SettingsClient for NsxManagerClient {
    #[instrument(skip(self))]
    async fn get(&self, component: Component) -> Result<PlanSettings, RemoteError> {
        let path = format!("plan/{}/settings", component.as_wire());
        self.send_json(self.request(Method::GET, &path)).await
    }

    #[instrument(skip(self, settings))]
    async fn update(
        &self,
        component: Component,
        settings: &PlanSettings,
    ) -> Result<PlanSettings, RemoteError> {
        let path = format!("plan/{}/settings", component.as_wire());
        self.send_json(self.request(Method::PUT, &path).json(settings))
            .await
    }
}

#[async_trait]
impl PlanClient for NsxManagerClient {
    #[instrument(skip(self))]
    async fn pause(&self) -> Result<(), RemoteError> {
        self.send_empty(self.request(Method::POST, "plan").query(&[("action", "pause")]))
            .await
    }

    #[instrument(skip(self))]
    async fn reset(&self, component: Component) -> Result<(), RemoteError> {
        self.send_empty(
            self.request(Method::POST, "plan")
                .query(&[("action", "reset"), ("component_type", component.as_wire())]),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn upgrade(&self, component: Component) -> Result<(), RemoteError> {
        self.send_empty(
            self.request(Method::POST, "plan")
                .query(&[("action", "upgrade"), ("component_type", component.as_wire())]),
        )
        .await
    }
}

#[async_trait]
impl StatusSummaryClient for NsxManagerClient {
    #[instrument(skip(self))]
    async fn get(
        &self,
        component: Option<Component>,
    ) -> Result<UpgradeStatusSummary, RemoteError> {
        let mut request = self.request(Method::GET, "status-summary");
        if let Some(c) = component {
            request = request.query(&[("component_type", c.as_wire())]);
        }
        let summary: UpgradeStatusSummary = self.send_json(request).await?;
        debug!(
            overall = summary.overall_upgrade_status.as_wire(),
            components = summary.component_status.len(),
            "Fetched upgrade status summary"
        );
        Ok(summary)
    }
}

#[async_trait]
impl GroupStatusClient for NsxManagerClient {
    #[instrument(skip(self))]
    async fn get_all(&self, component: Component) -> Result<Vec<GroupStatus>, RemoteError> {
        self.list_all(
            "upgrade-unit-groups-status",
            &[("component_type", component.as_wire())],
        )
        .await
    }
}

#[async_trait]
impl PostCheckClient for NsxManagerClient {
    #[instrument(skip(self))]
    async fn execute_post_upgrade_checks(&self, component: Component) -> Result<(), RemoteError> {
        let url = format!("{}/{}", self.base_url, UPGRADE_API);
        let request = self
            .http
            .post(url)
            .basic_auth(&self.username, Some(&self.password))
            .query(&[
                ("action", "execute_post_upgrade_checks"),
                ("component_type", component.as_wire()),
            ]);
        self.send_empty(request).await
    }
}
