//! Core traits for courier abstractions.
//!
//! These traits define the interfaces that concrete implementations must
//! satisfy, enabling pluggable backends and testability. `courier-db`
//! provides the PostgreSQL implementations; `courier-delivery::testing`
//! provides in-memory ones for tests.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{DeliveryJob, NewNotification, Notification};

/// Persistence for notification records.
///
/// The store assigns `id`, `created_at`, and `updated_at`; callers never
/// supply them.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Persist a new notification and return the stored record.
    async fn create(&self, notification: NewNotification) -> Result<Notification>;

    /// All unread notifications for a recipient, oldest first.
    async fn find_unread(&self, recipient: Uuid) -> Result<Vec<Notification>>;

    /// Conditionally flip the read flag of a record matching both id and
    /// recipient. Returns `None` when no such record exists.
    ///
    /// The update is a single atomic statement; concurrent callers racing on
    /// the same record are last-write-wins.
    async fn update_read_status(
        &self,
        id: Uuid,
        recipient: Uuid,
        read: bool,
    ) -> Result<Option<Notification>>;
}

/// Durable, at-least-once work queue for delivery jobs.
///
/// The queue guarantees durability across process restart and redelivery on
/// handler failure; consumers must tolerate duplicate processing. Completed
/// jobs are removed from storage.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a notification-shaped payload for delivery.
    async fn enqueue(&self, payload: JsonValue) -> Result<Uuid>;

    /// Claim the next runnable job, marking it running. Returns `None` when
    /// the queue is empty. Safe to call from concurrent consumers.
    async fn claim_next(&self) -> Result<Option<DeliveryJob>>;

    /// Acknowledge successful processing. The job row is deleted.
    async fn complete(&self, job_id: Uuid) -> Result<()>;

    /// Report failed processing. The job is re-queued with backoff until its
    /// retry budget is exhausted, then marked failed terminally.
    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()>;

    /// Report processing that can never succeed (e.g. a payload that does
    /// not deserialize). The job is parked as failed immediately; no retry.
    async fn fail_permanent(&self, job_id: Uuid, error: &str) -> Result<()>;

    /// Number of jobs currently waiting to run.
    async fn pending_count(&self) -> Result<i64>;
}
