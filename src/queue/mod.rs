//! Client seam for the remote task queue.
//!
//! The worker only needs four calls from the queue: reclaim the lease,
//! create an artifact upload target, and resolve the run as completed or
//! failed. Every call is scoped to a [`TaskRef`] and authenticated with the
//! latest [`Credentials`] snapshot, which the lease keeper replaces after each
//! successful reclaim.

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueResult;

pub use http::HttpQueue;

/// Identifies one run of a queued task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRef {
    pub task_id: String,
    pub run_id: u32,
}

impl TaskRef {
    pub fn new(task_id: impl Into<String>, run_id: u32) -> Self {
        Self {
            task_id: task_id.into(),
            run_id,
        }
    }
}

impl std::fmt::Display for TaskRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.task_id, self.run_id)
    }
}

/// Temporary credentials scoped to the claimed run.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub client_id: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            access_token: access_token.into(),
            certificate: None,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Result of a successful reclaim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    pub credentials: Credentials,
    #[serde(default)]
    pub taken_until: Option<DateTime<Utc>>,
}

impl Lease {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            taken_until: None,
        }
    }
}

/// Payload sent when asking the queue for an upload target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRequest {
    pub storage_type: String,
    pub expires: DateTime<Utc>,
    pub content_type: String,
}

/// Where and how to PUT an artifact's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactTarget {
    pub put_url: String,
    pub content_type: String,
}

#[async_trait]
pub trait Queue: Send + Sync {
    async fn reclaim_task(&self, task: &TaskRef, credentials: &Credentials) -> QueueResult<Lease>;

    async fn create_artifact(
        &self,
        task: &TaskRef,
        credentials: &Credentials,
        name: &str,
        request: &ArtifactRequest,
    ) -> QueueResult<ArtifactTarget>;

    async fn report_completed(&self, task: &TaskRef, credentials: &Credentials) -> QueueResult<()>;

    async fn report_failed(&self, task: &TaskRef, credentials: &Credentials) -> QueueResult<()>;
}
