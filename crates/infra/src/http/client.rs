//! Thin reqwest wrapper that maps transport failures and non-success
//! statuses onto [`CalsyncError`]. Retries live in the callers' retry
//! policy, so every request is sent once.

use std::time::Duration;

use calsync_domain::CalsyncError;
use reqwest::{Client as ReqwestClient, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::errors::{status_error, InfraError};

#[derive(Clone)]
pub struct HttpClient {
    client: ReqwestClient,
}

impl HttpClient {
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    pub fn new() -> Result<Self, CalsyncError> {
        Self::builder().build()
    }

    pub fn request<U>(&self, method: Method, url: U) -> RequestBuilder
    where
        U: reqwest::IntoUrl,
    {
        self.client.request(method, url)
    }

    /// Send the request; non-2xx responses become errors carrying the
    /// response body.
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response, CalsyncError> {
        let request = builder.build().map_err(InfraError::from)?;
        let method = request.method().clone();
        let url = request.url().clone();
        debug!(%method, path = url.path(), "sending HTTP request");

        let response = self.client.execute(request).await.map_err(InfraError::from)?;
        let status = response.status();
        debug!(%method, path = url.path(), %status, "received HTTP response");

        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }

    pub async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<T, CalsyncError> {
        let response = self.send(builder).await?;
        Ok(response.json::<T>().await.map_err(InfraError::from)?)
    }
}

#[derive(Debug)]
pub struct HttpClientBuilder {
    timeout: Duration,
    user_agent: Option<String>,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(30), user_agent: None }
    }
}

impl HttpClientBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn build(self) -> Result<HttpClient, CalsyncError> {
        let mut builder = ReqwestClient::builder().timeout(self.timeout).no_proxy();
        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }
        let client = builder.build().map_err(InfraError::from)?;
        Ok(HttpClient { client })
    }
}
