//! Async HTTP client wrapping reqwest.
//!
//! One attempt per call. Retry decisions belong to the fetcher.

use std::time::Duration;

use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};

use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::retry::classify_reqwest_error;

/// Response from an HTTP GET request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Content-Type header.
    pub content_type: Option<String>,
    /// Response body.
    pub body: Vec<u8>,
}

/// Response from an HTTP HEAD request.
#[derive(Debug, Clone)]
pub struct HeadResponse {
    /// HTTP status code.
    pub status: u16,
    /// Content-Length header, if present and numeric.
    pub content_length: Option<u64>,
}

/// HTTP client shared by every fetch task of a run.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    head_timeout: Duration,
}

impl HttpClient {
    pub fn new(config: &FetchConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(config.user_agent.as_str())
            .build()
            .unwrap_or_default();

        Self {
            client,
            head_timeout: Duration::from_millis(config.head_timeout_ms),
        }
    }

    /// Perform a single GET and read the whole body.
    ///
    /// Transport and body-read failures come back as
    /// [`FetchError::Transient`]; any status is returned as a response.
    pub async fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        let resp = self.client.get(url).send().await.map_err(transient)?;

        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = resp.bytes().await.map_err(transient)?.to_vec();

        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }

    /// Perform a HEAD request.
    pub async fn head(&self, url: &str) -> Result<HeadResponse, FetchError> {
        let resp = self
            .client
            .head(url)
            .timeout(self.head_timeout)
            .send()
            .await
            .map_err(transient)?;

        // Read the header directly: reqwest reports the (empty) body size for HEAD.
        let content_length = resp
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok());

        Ok(HeadResponse {
            status: resp.status().as_u16(),
            content_length,
        })
    }
}

fn transient(e: reqwest::Error) -> FetchError {
    FetchError::Transient {
        kind: classify_reqwest_error(&e),
        message: e.to_string(),
    }
}
