//! Share store HTTP client.

use reqwest::{Client, StatusCode};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{ShareError, ShareResult};
use super::ShareInfo;

/// Error body returned by the share store on failures.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: String,
    code: String,
}

#[derive(Debug, Serialize)]
struct CreateShareRequest<'a> {
    name: &'a str,
    quota_gb: u32,
    access_tier: &'a str,
}

/// Client for the storage account's file share API.
#[derive(Debug, Clone)]
pub struct ShareClient {
    /// HTTP client.
    client: Client,
    /// Base URL for the storage account, e.g.
    /// "https://sessionstore.files.example.com".
    base_url: String,
    /// Account access key.
    access_key: String,
}

impl ShareClient {
    /// Create a new share store client.
    pub fn new(base_url: impl Into<String>, access_key: impl Into<String>) -> ShareResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            access_key: access_key.into(),
        })
    }

    fn shares_url(&self) -> String {
        format!("{}/shares", self.base_url.trim_end_matches('/'))
    }

    /// List all shares in the account.
    pub async fn list_shares(&self) -> ShareResult<Vec<ShareInfo>> {
        let response = self
            .client
            .get(self.shares_url())
            .bearer_auth(&self.access_key)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Create a share with the given quota and access tier.
    pub async fn create_share(
        &self,
        name: &str,
        quota_gb: u32,
        access_tier: &str,
    ) -> ShareResult<()> {
        let request = CreateShareRequest {
            name,
            quota_gb,
            access_tier,
        };
        let response = self
            .client
            .post(self.shares_url())
            .bearer_auth(&self.access_key)
            .json(&request)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => Err(ShareError::AlreadyExists(name.to_string())),
            StatusCode::UNAUTHORIZED => Err(ShareError::Unauthorized),
            _ => Err(self.error_from_response(response).await),
        }
    }

    /// Parse a successful response body.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> ShareResult<T> {
        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| ShareError::Parse(format!("failed to parse response: {e}")))
        } else if status == StatusCode::UNAUTHORIZED {
            Err(ShareError::Unauthorized)
        } else {
            Err(self.error_from_response(response).await)
        }
    }

    async fn error_from_response(&self, response: reqwest::Response) -> ShareError {
        match response.json::<ApiErrorResponse>().await {
            Ok(body) => ShareError::Api {
                message: body.error,
                code: body.code,
            },
            Err(e) => ShareError::Parse(format!("failed to parse error response: {e}")),
        }
    }
}
