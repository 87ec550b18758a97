//! HTTP transport for the remote file API
//!
//! The client talks to the backend only through [`Transport`], so tests can
//! substitute an in-memory implementation for the reqwest one.

use async_trait::async_trait;
use lmio_common::{Error, Result};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;

const USER_AGENT: &str = concat!("lmio-dx/", env!("CARGO_PKG_VERSION"));

/// Raw request surface the backend client needs
#[async_trait]
pub trait Transport: Send + Sync {
    /// Authenticated GET returning a JSON document
    async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Value>;

    /// Authenticated GET returning the raw body
    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>>;

    /// Unauthenticated GET of a pre-signed media URL
    async fn fetch_url(&self, url: &str) -> Result<Vec<u8>>;

    /// Authenticated PUT of a JSON body
    async fn put_json(&self, url: &str, body: &Value) -> Result<()>;
}

/// reqwest-backed transport using a bearer token
pub struct HttpTransport {
    http_client: reqwest::Client,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(token: Option<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;

        Ok(Self { http_client, token })
    }

    /// Attach the bearer token; a missing token fails before any request is sent
    fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        match self.token.as_deref() {
            Some(token) if !token.trim().is_empty() => Ok(request.bearer_auth(token)),
            _ => Err(Error::Auth("Can't proceed without an access token".to_string())),
        }
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> Result<Response> {
        tracing::debug!(url = %url, "Backend request");

        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        check_status(response, url).await
    }
}

/// Map non-success statuses onto the error taxonomy
async fn check_status(response: Response, url: &str) -> Result<Response> {
    let status = response.status();

    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(Error::Auth(format!("{} rejected the access token", url)))
        }
        StatusCode::NOT_FOUND => Err(Error::NotFound(url.to_string())),
        _ => {
            let error_text = response.text().await.unwrap_or_default();
            Err(Error::Api(status.as_u16(), error_text))
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Value> {
        let request = self.authorize(self.http_client.get(url).query(query))?;
        let response = self.send(request, url).await?;

        response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let request = self.authorize(self.http_client.get(url))?;
        let response = self.send(request, url).await?;

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(body.to_vec())
    }

    async fn fetch_url(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.send(self.http_client.get(url), url).await?;

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(body.to_vec())
    }

    async fn put_json(&self, url: &str, body: &Value) -> Result<()> {
        let request = self.authorize(self.http_client.put(url).json(body))?;
        self.send(request, url).await?;
        Ok(())
    }
}
