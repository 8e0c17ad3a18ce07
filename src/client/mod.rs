//! The sequencer's view of the survey API.
//!
//! [`ApiClient`] is the persistence seam the run driver talks through. Two
//! implementations: [`HttpClient`] reaches a remote server over HTTP, and
//! [`LocalClient`] calls the service in-process, which is how the CLI runs
//! against a local database and how tests drive full runs without a network.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::api::{Ack, RecordTrialRequest, RunStarted, StartRunRequest, SurveyApi};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::storage::TestDetail;

/// Client interface to the survey API, as the run driver sees it.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Fetch a test with its brands and words.
    async fn fetch_test(&self, test_id: i64) -> ClientResult<TestDetail>;
    /// Start a run; returns the run id.
    async fn start_run(&self, test_id: i64, request: &StartRunRequest) -> ClientResult<i64>;
    /// Record one trial.
    async fn record_trial(&self, run_id: i64, request: &RecordTrialRequest)
        -> ClientResult<()>;
    /// Mark a run complete.
    async fn complete_run(&self, run_id: i64) -> ClientResult<()>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// HTTP implementation of [`ApiClient`] against a running server.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
}

impl HttpClient {
    /// Create a client for the server at `base_url`.
    pub fn new(base_url: &str, config: &ClientConfig) -> ClientResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(ClientError::Http)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Decode a response, turning non-success statuses into
    /// [`ClientError::Upstream`] with the server's error message.
    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> ClientResult<T> {
        let status = response.status();

        if !status.is_success() {
            let message = match response.json::<ErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string(),
            };
            return Err(ClientError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        response.json().await.map_err(|e| ClientError::Decode {
            message: format!("Failed to parse response: {}", e),
        })
    }
}

#[async_trait]
impl ApiClient for HttpClient {
    async fn fetch_test(&self, test_id: i64) -> ClientResult<TestDetail> {
        let url = format!("{}/api/tests/{}", self.base_url, test_id);
        debug!(%url, "Fetching test");

        let response = self.client.get(&url).send().await?;
        Self::decode(response).await
    }

    async fn start_run(&self, test_id: i64, request: &StartRunRequest) -> ClientResult<i64> {
        let url = format!("{}/api/tests/{}/runs", self.base_url, test_id);

        let response = self.client.post(&url).json(request).send().await?;
        let started: RunStarted = Self::decode(response).await?;
        Ok(started.run_id)
    }

    async fn record_trial(
        &self,
        run_id: i64,
        request: &RecordTrialRequest,
    ) -> ClientResult<()> {
        let url = format!("{}/api/runs/{}/trials", self.base_url, run_id);

        let response = self.client.post(&url).json(request).send().await?;
        let _: Ack = Self::decode(response).await?;
        Ok(())
    }

    async fn complete_run(&self, run_id: i64) -> ClientResult<()> {
        let url = format!("{}/api/runs/{}/complete", self.base_url, run_id);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        let _: Ack = Self::decode(response).await?;
        Ok(())
    }
}

/// In-process implementation of [`ApiClient`] over the service itself.
#[derive(Clone)]
pub struct LocalClient {
    api: SurveyApi,
}

impl LocalClient {
    /// Wrap a service handle.
    pub fn new(api: SurveyApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ApiClient for LocalClient {
    async fn fetch_test(&self, test_id: i64) -> ClientResult<TestDetail> {
        Ok(self.api.fetch_test(test_id).await?)
    }

    async fn start_run(&self, test_id: i64, request: &StartRunRequest) -> ClientResult<i64> {
        Ok(self.api.start_run(test_id, request.clone()).await?)
    }

    async fn record_trial(
        &self,
        run_id: i64,
        request: &RecordTrialRequest,
    ) -> ClientResult<()> {
        self.api.record_trial(run_id, request.clone()).await?;
        Ok(())
    }

    async fn complete_run(&self, run_id: i64) -> ClientResult<()> {
        Ok(self.api.complete_run(run_id).await?)
    }
}
