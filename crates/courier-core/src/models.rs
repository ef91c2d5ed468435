//! Data models for notifications and delivery jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// A persisted notification record.
///
/// The store assigns `id`, `created_at`, and `updated_at` on create;
/// `updated_at` is re-stamped on every read-status mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Record identifier (UUIDv7, assigned on persistence).
    pub id: Uuid,
    /// Category tag, e.g. "notification", "mention".
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable body.
    pub message: String,
    /// Opaque identity of the target user. Foreign reference, not owned.
    pub recipient: Uuid,
    /// Optional client-side navigation hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linkback: Option<String>,
    /// Delivery/consumption state.
    pub read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A notification before persistence: the shape carried by delivery jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNotification {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub recipient: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkback: Option<String>,
}

impl NewNotification {
    /// Check the required fields carried by a job payload.
    pub fn validate(&self) -> crate::Result<()> {
        if self.kind.is_empty() {
            return Err(crate::Error::InvalidInput(
                "notification type must not be empty".to_string(),
            ));
        }
        if self.message.is_empty() {
            return Err(crate::Error::InvalidInput(
                "notification message must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Decode a job payload into a `NewNotification` and validate it.
    pub fn from_payload(payload: &JsonValue) -> crate::Result<Self> {
        let notification: Self = serde_json::from_value(payload.clone())?;
        notification.validate()?;
        Ok(notification)
    }
}

/// Status of a delivery job in the durable queue.
///
/// There is no `completed` variant: completed jobs are deleted from the
/// queue so it never grows without bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Failed,
}

impl JobStatus {
    /// Database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "failed" => Ok(JobStatus::Failed),
            other => Err(crate::Error::Job(format!("unknown job status: {other}"))),
        }
    }
}

/// One unit of work consumed from the durable queue.
///
/// The payload is a `NewNotification`-shaped JSON document. Delivery to the
/// worker is at-least-once: a job re-delivered after a crash-before-ack will
/// be processed again.
#[derive(Debug, Clone)]
pub struct DeliveryJob {
    pub id: Uuid,
    pub status: JobStatus,
    pub payload: JsonValue,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    /// Earliest time the job may be claimed (retry backoff).
    pub run_after: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}
