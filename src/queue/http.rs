use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{ArtifactRequest, ArtifactTarget, Credentials, Lease, Queue, TaskRef};
use crate::error::{QueueError, QueueResult};

/// JSON-over-HTTP adapter for the queue.
///
/// Every call is a bearer-authenticated POST under `root_url`. Non-2xx
/// responses are mapped through [`QueueError::from_status`]; the two report
/// calls ignore the response body.
#[derive(Debug, Clone)]
pub struct HttpQueue {
    client: reqwest::Client,
    root_url: String,
}

impl HttpQueue {
    pub fn new(client: reqwest::Client, root_url: impl Into<String>) -> Self {
        Self {
            client,
            root_url: root_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// URL of `segments` under the run. Each segment is percent-encoded, so
    /// artifact names may contain `/`, `?` or `#`.
    fn run_url(&self, task: &TaskRef, segments: &[&str]) -> QueueResult<Url> {
        let mut url = Url::parse(&self.root_url)
            .map_err(|e| QueueError::Transport(format!("invalid queue URL: {}", e)))?;
        let run_id = task.run_id.to_string();
        url.path_segments_mut()
            .map_err(|_| {
                QueueError::Transport(format!("queue URL cannot be a base: {}", self.root_url))
            })?
            .pop_if_empty()
            .extend(["task", task.task_id.as_str(), "runs", run_id.as_str()])
            .extend(segments);
        Ok(url)
    }

    /// POST `body` and check the status. The response body is left unread.
    async fn send<B>(
        &self,
        url: Url,
        credentials: &Credentials,
        body: &B,
    ) -> QueueResult<reqwest::Response>
    where
        B: Serialize + ?Sized,
    {
        tracing::debug!(url = %url, client_id = %credentials.client_id, "Queue request");
        let response = self
            .client
            .post(url)
            .bearer_auth(&credentials.access_token)
            .json(body)
            .send()
            .await
            .map_err(|e| QueueError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(QueueError::from_status(status.as_u16(), message));
        }
        Ok(response)
    }

    async fn post<B, T>(&self, url: Url, credentials: &Credentials, body: &B) -> QueueResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(url, credentials, body)
            .await?
            .json::<T>()
            .await
            .map_err(|e| QueueError::Transport(e.to_string()))
    }
}

#[async_trait]
impl Queue for HttpQueue {
    async fn reclaim_task(&self, task: &TaskRef, credentials: &Credentials) -> QueueResult<Lease> {
        let url = self.run_url(task, &["reclaim"])?;
        self.post(url, credentials, &serde_json::json!({})).await
    }

    async fn create_artifact(
        &self,
        task: &TaskRef,
        credentials: &Credentials,
        name: &str,
        request: &ArtifactRequest,
    ) -> QueueResult<ArtifactTarget> {
        let url = self.run_url(task, &["artifacts", name])?;
        self.post(url, credentials, request).await
    }

    async fn report_completed(&self, task: &TaskRef, credentials: &Credentials) -> QueueResult<()> {
        let url = self.run_url(task, &["completed"])?;
        self.send(url, credentials, &serde_json::json!({})).await?;
        Ok(())
    }

    async fn report_failed(&self, task: &TaskRef, credentials: &Credentials) -> QueueResult<()> {
        let url = self.run_url(task, &["failed"])?;
        self.send(url, credentials, &serde_json::json!({})).await?;
        Ok(())
    }
}
