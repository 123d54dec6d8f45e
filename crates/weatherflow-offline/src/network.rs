//! Network access for the offline worker.

use std::future::Future;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use url::Url;

use crate::response_cache::HttpResponse;

/// Transport-level failure (DNS, refused connection, timeout)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct NetworkFailure(pub String);

/// Source of live responses. Any HTTP status counts as a response; only
/// transport failures are errors.
pub trait Network: Send + Sync + 'static {
    fn fetch(&self, url: &Url) -> impl Future<Output = Result<HttpResponse, NetworkFailure>> + Send;
}

#[derive(Debug, Clone)]
pub struct HttpNetwork {
    client: Client,
}

impl HttpNetwork {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, NetworkFailure> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| NetworkFailure(e.to_string()))?;
        Ok(Self { client })
    }
}

impl Network for HttpNetwork {
    async fn fetch(&self, url: &Url) -> Result<HttpResponse, NetworkFailure> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| NetworkFailure(e.to_string()))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| NetworkFailure(e.to_string()))?
            .to_vec();

        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}
