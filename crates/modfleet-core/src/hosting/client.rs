//! Hosting-provider REST client.
//!
//! Only `github.com` identities are supported. Every call is authenticated
//! with the stored token; a 401 clears the stored credentials and the call
//! is retried once with fresh ones.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::credentials::CredentialStore;
use super::secrets::{RepoPublicKey, SecretSealer, UnsupportedSealer};
use crate::domain::error::{FleetError, Result};

/// The only hosting provider with an API client.
pub const SUPPORTED_HOST: &str = "github.com";

/// Default REST API base URL.
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Environment variable overriding the API base URL.
pub const API_URL_ENV: &str = "MODFLEET_API_URL";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Attempts per request: the first try plus one retry after a 401.
const MAX_ATTEMPTS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
}

/// A fully described authenticated request.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub token: String,
    pub body: Option<Value>,
}

/// Status plus parsed JSON body (`Null` when empty or not JSON).
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First structured error message, preferring the `errors` list.
    pub fn first_message(&self) -> Option<String> {
        self.body
            .get("errors")
            .and_then(Value::as_array)
            .and_then(|errors| {
                errors
                    .iter()
                    .find_map(|e| e.get("message").and_then(Value::as_str))
            })
            .or_else(|| self.body.get("message").and_then(Value::as_str))
            .map(str::to_string)
    }

    fn into_error(self) -> FleetError {
        let message = self
            .first_message()
            .unwrap_or_else(|| "no error details".to_string());
        FleetError::Http {
            status: self.status,
            message,
        }
    }
}

/// Sends requests over the wire. Injected so tests can script responses.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse>;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("modfleet/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
            Method::Put => self.client.put(&request.url),
        };
        let mut builder = builder
            .bearer_auth(&request.token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        debug!(url = %request.url, status, "Hosting API response");
        Ok(ApiResponse { status, body })
    }
}

/// `owner/name` of a hosted repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoEndpoint {
    pub host: String,
    pub owner: String,
    pub name: String,
}

impl RepoEndpoint {
    /// Parse `host/owner/name[/subpath...]`, rejecting unsupported hosts.
    pub fn parse(identity: &str) -> Result<Self> {
        let mut segments = identity.split('/').filter(|s| !s.is_empty());
        let host = segments.next().unwrap_or_default();
        if host != SUPPORTED_HOST {
            return Err(FleetError::UnsupportedHost {
                host: host.to_string(),
            });
        }
        match (segments.next(), segments.next()) {
            (Some(owner), Some(name)) => Ok(Self {
                host: host.to_string(),
                owner: owner.to_string(),
                name: name.to_string(),
            }),
            _ => Err(FleetError::invalid("repository identity", identity)),
        }
    }

    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Pull request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequest {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

/// Non-error results of opening a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullRequestOutcome {
    Opened { url: String },
    /// The head branch has no commits the base lacks.
    NoChanges,
    AlreadyExists,
}

const NO_COMMITS_PREFIX: &str = "No commits between";
const ALREADY_EXISTS_PREFIX: &str = "A pull request already exists for";

/// Hosting operations the pipeline needs.
#[async_trait]
pub trait HostingApi: Send + Sync {
    async fn open_pull_request(
        &self,
        identity: &str,
        request: &PullRequest,
    ) -> Result<PullRequestOutcome>;

    /// Seal `value` for the repository and store it as secret `name`.
    async fn upload_secret(&self, identity: &str, name: &str, value: &[u8]) -> Result<()>;
}

/// GitHub REST client.
pub struct HostingClient {
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<CredentialStore>,
    sealer: Arc<dyn SecretSealer>,
    api_base: String,
}

impl HostingClient {
    pub fn new(transport: Arc<dyn HttpTransport>, credentials: Arc<CredentialStore>) -> Self {
        Self {
            transport,
            credentials,
            sealer: Arc::new(UnsupportedSealer),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    /// Point at a different API root (e.g. GitHub Enterprise).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_sealer(mut self, sealer: Arc<dyn SecretSealer>) -> Self {
        self.sealer = sealer;
        self
    }

    fn repo_url(&self, endpoint: &RepoEndpoint, suffix: &str) -> String {
        format!("{}/repos/{}{}", self.api_base, endpoint.slug(), suffix)
    }

    /// Send an authenticated request, retrying once after a 401.
    ///
    /// When no replacement credentials can be had for the retry, the 401
    /// that triggered it is the error returned.
    async fn send_authorized(
        &self,
        method: Method,
        url: String,
        body: Option<Value>,
    ) -> Result<ApiResponse> {
        let mut rejected: Option<ApiResponse> = None;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let creds = match self.credentials.obtain().await {
                Ok(creds) => creds,
                Err(e) => match rejected {
                    Some(previous) => {
                        warn!(url = %url, error = %e, "No fresh credentials to retry with");
                        return Err(previous.into_error());
                    }
                    None => return Err(e),
                },
            };
            let request = ApiRequest {
                method,
                url: url.clone(),
                token: creds.token,
                body: body.clone(),
            };
            let response = self.transport.send(&request).await?;
            if response.status != 401 {
                return Ok(response);
            }

            warn!(url = %url, attempt, "Hosting API rejected the stored token; clearing credentials");
            self.credentials.clear()?;
            if attempt >= MAX_ATTEMPTS {
                return Err(response.into_error());
            }
            rejected = Some(response);
        }
    }

    /// Fetch the key secrets must be sealed against.
    pub async fn public_key(&self, identity: &str) -> Result<RepoPublicKey> {
        let endpoint = RepoEndpoint::parse(identity)?;
        let url = self.repo_url(&endpoint, "/actions/secrets/public-key");
        let response = self.send_authorized(Method::Get, url, None).await?;
        if !response.is_success() {
            return Err(response.into_error());
        }
        Ok(serde_json::from_value(response.body)?)
    }
}

#[async_trait]
impl HostingApi for HostingClient {
    async fn open_pull_request(
        &self,
        identity: &str,
        request: &PullRequest,
    ) -> Result<PullRequestOutcome> {
        let endpoint = RepoEndpoint::parse(identity)?;
        let url = self.repo_url(&endpoint, "/pulls");
        let body = serde_json::to_value(request)?;
        let response = self.send_authorized(Method::Post, url, Some(body)).await?;

        if !response.is_success() {
            let message = response.first_message().unwrap_or_default();
            if message.starts_with(NO_COMMITS_PREFIX) {
                return Ok(PullRequestOutcome::NoChanges);
            }
            if message.starts_with(ALREADY_EXISTS_PREFIX) {
                return Ok(PullRequestOutcome::AlreadyExists);
            }
            return Err(response.into_error());
        }

        let url = response
            .body
            .get("html_url")
            .and_then(Value::as_str)
            .ok_or_else(|| FleetError::Transport("pull request response has no html_url".to_string()))?;
        info!(repo = %identity, url, "Opened pull request");
        Ok(PullRequestOutcome::Opened {
            url: url.to_string(),
        })
    }

    async fn upload_secret(&self, identity: &str, name: &str, value: &[u8]) -> Result<()> {
        let endpoint = RepoEndpoint::parse(identity)?;
        let key = self.public_key(identity).await?;
        let sealed = self.sealer.seal(&key, value)?;
        let url = self.repo_url(&endpoint, &format!("/actions/secrets/{name}"));
        let body = serde_json::to_value(&sealed)?;
        let response = self.send_authorized(Method::Put, url, Some(body)).await?;
        if !response.is_success() {
            return Err(response.into_error());
        }
        info!(repo = %identity, secret = name, "Uploaded secret");
        Ok(())
    }
}
