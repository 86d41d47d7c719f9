use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(10);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(thiserror::Error, Debug)]
pub enum AssetUploadError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Asset store rejected upload: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid asset store response: {0}")]
    InvalidResponse(String),
}

/// A stored blob: the store's identifier plus a public URL for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    pub id: String,
    pub url: String,
}

/// Binary blob storage for rendered credential images.
pub trait AssetStore: Send + Sync {
    fn upload(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        content_type: &str,
    ) -> impl Future<Output = Result<AssetRef, AssetUploadError>> + Send;
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    document: UploadedDocument,
}

#[derive(Debug, Deserialize)]
struct UploadedDocument {
    #[serde(rename = "_id")]
    id: String,
    url: String,
}

/// Asset store reached over HTTP with a bearer token
#[derive(Clone)]
pub struct HttpAssetStore {
    client: Client,
    api_base_url: String,
    access_token: Secret<String>,
}

impl HttpAssetStore {
    pub fn new(api_base_url: &str, access_token: Secret<String>) -> Self {
        Self {
            client: Client::new(),
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            access_token,
        }
    }

    /// Checks that the asset API is reachable.
    /// Only server errors count as unhealthy; auth failures still prove reachability.
    #[tracing::instrument(skip(self))]
    pub async fn check_health(&self) -> Result<(), AssetUploadError> {
        let response = self
            .client
            .head(&self.api_base_url)
            .bearer_auth(self.access_token.expose_secret())
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await?;

        if response.status().is_server_error() {
            return Err(AssetUploadError::Rejected {
                status: response.status().as_u16(),
                body: "Asset API unavailable".to_string(),
            });
        }

        Ok(())
    }
}

impl AssetStore for HttpAssetStore {
    #[tracing::instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn upload(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        content_type: &str,
    ) -> Result<AssetRef, AssetUploadError> {
        let url = format!("{}/assets/images", self.api_base_url);

        let response = self
            .client
            .post(&url)
            .query(&[("filename", filename)])
            .bearer_auth(self.access_token.expose_secret())
            .header("Content-Type", content_type)
            .timeout(UPLOAD_TIMEOUT)
            .body(bytes)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!(
                status = %status,
                error = %body,
                "Asset upload rejected"
            );
            return Err(AssetUploadError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let uploaded: UploadResponse = response
            .json()
            .await
            .map_err(|e| AssetUploadError::InvalidResponse(e.to_string()))?;

        tracing::info!(asset_id = %uploaded.document.id, "Asset uploaded");

        Ok(AssetRef {
            id: uploaded.document.id,
            url: uploaded.document.url,
        })
    }
}
