//! Compute provider HTTP client.

use reqwest::{Client, StatusCode};
use std::time::Duration;

use log::debug;
use serde::Deserialize;

use super::error::{ProviderError, ProviderResult};
use super::types::{ComputeGroup, GroupSpec};

/// Error body returned by the provider on failures.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: String,
    code: String,
}

/// Client for the compute provider's group API.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    /// HTTP client.
    client: Client,
    /// Base URL for the provider API.
    base_url: String,
    /// API token for authentication.
    api_token: String,
}

impl ProviderClient {
    /// Create a new provider client.
    pub fn new(base_url: impl Into<String>, api_token: impl Into<String>) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_token: api_token.into(),
        })
    }

    fn group_url(&self, group_name: &str) -> String {
        format!("{}/groups/{}", self.base_url.trim_end_matches('/'), group_name)
    }

    /// Fetch a compute group. Returns `None` when the group does not exist.
    pub async fn get(&self, group_name: &str) -> ProviderResult<Option<ComputeGroup>> {
        let response = self
            .client
            .get(self.group_url(group_name))
            .bearer_auth(&self.api_token)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let group = self.handle_response(group_name, response).await?;
        Ok(Some(group))
    }

    /// Submit a group spec. The provider accepts the request asynchronously;
    /// success only means the request was admitted, not that the group is
    /// ready.
    pub async fn create_or_update(
        &self,
        group_name: &str,
        spec: &GroupSpec,
    ) -> ProviderResult<()> {
        let response = self
            .client
            .put(self.group_url(group_name))
            .bearer_auth(&self.api_token)
            .json(spec)
            .send()
            .await?;

        if response.status().is_success() {
            debug!("create accepted for group {group_name}");
            return Ok(());
        }

        Err(self.error_from_response(group_name, response).await)
    }

    /// Delete a compute group (asynchronous on the provider side).
    pub async fn delete(&self, group_name: &str) -> ProviderResult<()> {
        let response = self
            .client
            .delete(self.group_url(group_name))
            .bearer_auth(&self.api_token)
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(());
        }

        Err(self.error_from_response(group_name, response).await)
    }

    /// Start a stopped compute group.
    pub async fn start(&self, group_name: &str) -> ProviderResult<()> {
        self.post_action(group_name, "start").await
    }

    /// Stop a running compute group without deleting it.
    pub async fn stop(&self, group_name: &str) -> ProviderResult<()> {
        self.post_action(group_name, "stop").await
    }

    async fn post_action(&self, group_name: &str, action: &str) -> ProviderResult<()> {
        let url = format!("{}/{}", self.group_url(group_name), action);
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_token)
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(());
        }

        Err(self.error_from_response(group_name, response).await)
    }

    /// Parse a successful response body.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        group_name: &str,
        response: reqwest::Response,
    ) -> ProviderResult<T> {
        if response.status().is_success() {
            response
                .json()
                .await
                .map_err(|e| ProviderError::Parse(format!("failed to parse response: {e}")))
        } else {
            Err(self.error_from_response(group_name, response).await)
        }
    }

    /// Classify a non-success response into a typed error.
    ///
    /// A 409 means the group name is locked by an unfinished operation: the
    /// provider serializes operations per name, so a conflict is the
    /// transient "still transitioning" race, not a permanent failure.
    async fn error_from_response(
        &self,
        group_name: &str,
        response: reqwest::Response,
    ) -> ProviderError {
        match response.status() {
            StatusCode::NOT_FOUND => ProviderError::NotFound(group_name.to_string()),
            StatusCode::CONFLICT => ProviderError::StillTransitioning(group_name.to_string()),
            StatusCode::UNAUTHORIZED => ProviderError::Unauthorized,
            _ => match response.json::<ApiErrorResponse>().await {
                Ok(body) => ProviderError::Api {
                    message: body.error,
                    code: body.code,
                },
                Err(e) => ProviderError::Parse(format!("failed to parse error response: {e}")),
            },
        }
    }
}
