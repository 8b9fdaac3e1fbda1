//! Runner task queue gateway.
//!
//! Reads per resource class:
//! - How many tasks are waiting for a runner
//! - How many tasks are claimed by a runner right now

use async_trait::async_trait;
use fleet_id::ResourceClass;
use reqwest::header::HeaderValue;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, error};

use crate::config::Config;
use crate::credential::Credential;
use crate::error::{ScaleError, ScaleResult};

/// Service name used in errors and logs.
pub const QUEUE_SERVICE: &str = "runner-api";

/// Header carrying the queue credential.
pub const CIRCLE_TOKEN_HEADER: &str = "Circle-Token";

/// Queue status gateway.
#[async_trait]
pub trait QueueStatus: Send + Sync {
    /// Count tasks that no runner has claimed yet.
    async fn waiting_jobs(
        &self,
        credential: &Credential,
        resource_class: &ResourceClass,
    ) -> ScaleResult<u32>;

    /// Count tasks currently claimed by a runner.
    async fn running_jobs(
        &self,
        credential: &Credential,
        resource_class: &ResourceClass,
    ) -> ScaleResult<u32>;
}

/// Runner task API client.
pub struct RunnerQueueClient {
    client: reqwest::Client,
    base_url: String,
}

impl RunnerQueueClient {
    /// Create a new runner API client.
    pub fn new(config: &Config) -> ScaleResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| ScaleError::ClientSetup {
                service: QUEUE_SERVICE,
                message: e.to_string(),
            })?;

        Ok(Self::with_client(client, &config.queue_api_url))
    }

    /// Create a client from an existing HTTP client.
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        path: &str,
        credential: &Credential,
        resource_class: &ResourceClass,
    ) -> ScaleResult<T> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(url = %url, resource_class = %resource_class, "Querying runner tasks");

        let mut token =
            HeaderValue::from_str(credential.expose()).map_err(|_| ScaleError::InvalidCredential {
                record: format!("queue credential for {resource_class}"),
            })?;
        token.set_sensitive(true);

        let response = self
            .client
            .get(&url)
            .query(&[("resource-class", resource_class.as_str())])
            .header(CIRCLE_TOKEN_HEADER, token)
            .send()
            .await
            .map_err(|e| ScaleError::transport(QUEUE_SERVICE, e))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Runner task query failed");
            return Err(ScaleError::remote_status(QUEUE_SERVICE, status.as_u16(), &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ScaleError::decode(QUEUE_SERVICE, e))
    }
}

#[async_trait]
impl QueueStatus for RunnerQueueClient {
    async fn waiting_jobs(
        &self,
        credential: &Credential,
        resource_class: &ResourceClass,
    ) -> ScaleResult<u32> {
        let body: UnclaimedTasksResponse = self.fetch("tasks", credential, resource_class).await?;
        Ok(body.unclaimed_task_count)
    }

    async fn running_jobs(
        &self,
        credential: &Credential,
        resource_class: &ResourceClass,
    ) -> ScaleResult<u32> {
        let body: RunningTasksResponse = self
            .fetch("tasks/running", credential, resource_class)
            .await?;
        Ok(body.running_runner_tasks)
    }
}

/// Response of `GET /tasks`.
#[derive(Debug, Clone, Deserialize)]
pub struct UnclaimedTasksResponse {
    pub unclaimed_task_count: u32,
}

/// Response of `GET /tasks/running`.
#[derive(Debug, Clone, Deserialize)]
pub struct RunningTasksResponse {
    pub running_runner_tasks: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unclaimed_deserialization() {
        let body: UnclaimedTasksResponse =
            serde_json::from_str(r#"{"unclaimed_task_count": 7}"#).unwrap();
        assert_eq!(body.unclaimed_task_count, 7);
    }

    #[test]
    fn test_running_deserialization_ignores_extra_fields() {
        let body: RunningTasksResponse =
            serde_json::from_str(r#"{"running_runner_tasks": 3, "resource_class": "acme/x"}"#)
                .unwrap();
        assert_eq!(body.running_runner_tasks, 3);
    }

    #[test]
    fn test_missing_count_is_an_error() {
        let result: Result<UnclaimedTasksResponse, _> = serde_json::from_str("{}");
        assert!(result.is_err());
    }

    #[test]
    fn test_negative_count_is_an_error() {
        let result: Result<RunningTasksResponse, _> =
            serde_json::from_str(r#"{"running_runner_tasks": -1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = RunnerQueueClient::with_client(reqwest::Client::new(), "http://queue/api/v2/");
        assert_eq!(client.base_url, "http://queue/api/v2");
    }
}
