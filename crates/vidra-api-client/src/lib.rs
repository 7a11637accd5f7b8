//! HTTP client for the vidra upload-coordination service.
//!
//! Provides a minimal client with explicit auth (Bearer token or X-API-Key), generic
//! GET/POST helpers, and the video upload endpoints (init, complete, status). The
//! upload crate wraps this client as its coordination collaborator; the CLI uses it
//! directly for `status`.

pub mod api;

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Authentication strategy for the API.
#[derive(Clone)]
pub enum Auth {
    /// `Authorization: Bearer {token}`
    Bearer(String),
    /// `X-API-Key: {key}`
    XApiKey(String),
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Auth::Bearer(_) => write!(f, "Bearer(***)"),
            Auth::XApiKey(_) => write!(f, "XApiKey(***)"),
        }
    }
}

/// Route prefix of the coordination service (e.g. "/api/v1"). Empty by default;
/// set VIDRA_API_PREFIX to match the server.
pub fn api_prefix() -> String {
    std::env::var("VIDRA_API_PREFIX")
        .map(|p| p.trim_end_matches('/').to_string())
        .unwrap_or_default()
}

/// Non-2xx response from the service.
#[derive(Debug)]
pub struct ApiStatusError {
    pub status: StatusCode,
    pub body: String,
}

impl std::fmt::Display for ApiStatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "API request failed with status {}: {}", self.status, self.body)
    }
}

impl std::error::Error for ApiStatusError {}

/// HTTP client for the coordination service with explicit auth.
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    prefix: String,
    auth: Auth,
}

impl ApiClient {
    pub fn new(base_url: String, auth: Auth) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            prefix: String::new(),
            auth,
        })
    }

    /// Create client from environment: VIDRA_API_URL (or API_URL), then VIDRA_API_TOKEN
    /// for Bearer auth or VIDRA_API_KEY for X-API-Key auth. VIDRA_API_PREFIX sets the
    /// route prefix.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("VIDRA_API_URL")
            .or_else(|_| std::env::var("API_URL"))
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        let auth = match (
            std::env::var("VIDRA_API_TOKEN"),
            std::env::var("VIDRA_API_KEY"),
        ) {
            (Ok(token), _) => Auth::Bearer(token),
            (Err(_), Ok(key)) => Auth::XApiKey(key),
            _ => anyhow::bail!("Missing credentials. Set VIDRA_API_TOKEN or VIDRA_API_KEY"),
        };

        Ok(Self::new(base_url, auth)?.with_prefix(api_prefix()))
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Auth::Bearer(token) => request.header("Authorization", format!("Bearer {}", token)),
            Auth::XApiKey(key) => request.header("X-API-Key", key.as_str()),
        }
    }

    /// GET request with optional query parameters. Deserializes JSON response.
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = self.build_url(path);
        let mut request = self.apply_auth(self.client.get(&url));

        if !query.is_empty() {
            request = request.query(query);
        }

        let response = request.send().await.context("Failed to send request")?;
        Self::parse_json(response).await
    }

    /// POST JSON body and deserialize response.
    pub async fn post_json<T: DeserializeOwned, B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = self.build_url(path);
        let request = self.apply_auth(self.client.post(&url).json(body));

        let response = request.send().await.context("Failed to send request")?;
        Self::parse_json(response).await
    }

    async fn parse_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ApiStatusError { status, body }.into());
        }

        let body: T = response
            .json()
            .await
            .context("Failed to parse response as JSON")?;

        Ok(body)
    }
}

// Re-export the wire types for convenience.
pub use vidra_core::models::{
    CompleteUploadRequest, CompleteUploadResponse, InitUploadRequest, InitUploadResponse,
    ProcessingStatus, VideoStatusResponse,
};
