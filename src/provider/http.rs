/// HTTP implementation of the provider against a REST topology API
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::graph::{AttributeMap, ResourceId};

use super::{Provider, ProviderError};

/// Provider talking to a cloud topology API over HTTPS
pub struct HttpProvider {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ResourceEnvelope {
    resource: RemoteResource,
}

#[derive(Debug, Deserialize)]
struct RemoteResource {
    id: String,
    #[serde(default)]
    attributes: AttributeMap,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    message: String,
}

impl HttpProvider {
    /// Create a provider client for `endpoint` authenticated with `api_token`
    pub fn new(endpoint: &str, api_token: &str) -> Result<Self> {
        let base_url = Url::parse(endpoint).context("Invalid provider endpoint URL")?;

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", api_token))
                .context("Invalid API token format")?,
        );
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn send<T: serde::Serialize>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&T>,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = self.url(path);
        debug!("{} {}", method, url);

        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(body);
        }

        request.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                ProviderError::Transient(e.to_string())
            } else {
                ProviderError::Permanent(e.to_string())
            }
        })
    }

    /// Map a non-success response onto the provider error taxonomy
    async fn error_for(response: reqwest::Response) -> ProviderError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        let detail = match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(parsed) => format!("{} - {}", parsed.error.code, parsed.error.message),
            Err(_) => format!("status {}: {}", status, body),
        };

        match status {
            StatusCode::NOT_FOUND => ProviderError::NotFound,
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS | StatusCode::CONFLICT => {
                ProviderError::Transient(detail)
            }
            s if s.is_server_error() => ProviderError::Transient(detail),
            _ => ProviderError::Permanent(detail),
        }
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Permanent(format!("failed to parse API response: {}", e)))
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn create(&self, id: &ResourceId, attrs: &AttributeMap) -> Result<String, ProviderError> {
        let body = serde_json::json!({
            "kind": id.kind,
            "logical_name": id.name,
            "attributes": attrs,
        });

        let response = self
            .send(reqwest::Method::POST, "resources", Some(&body))
            .await?;
        let envelope: ResourceEnvelope = Self::parse(response).await?;
        Ok(envelope.resource.id)
    }

    async fn update(&self, provider_id: &str, attrs: &AttributeMap) -> Result<(), ProviderError> {
        let body = serde_json::json!({ "attributes": attrs });
        let response = self
            .send(
                reqwest::Method::PUT,
                &format!("resources/{}", provider_id),
                Some(&body),
            )
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_for(response).await)
        }
    }

    async fn delete(&self, provider_id: &str) -> Result<(), ProviderError> {
        let response = self
            .send::<()>(
                reqwest::Method::DELETE,
                &format!("resources/{}", provider_id),
                None,
            )
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_for(response).await)
        }
    }

    async fn read(&self, provider_id: &str) -> Result<AttributeMap, ProviderError> {
        let response = self
            .send::<()>(
                reqwest::Method::GET,
                &format!("resources/{}", provider_id),
                None,
            )
            .await?;
        let envelope: ResourceEnvelope = Self::parse(response).await?;
        Ok(envelope.resource.attributes)
    }
}
