//! Producer-side dispatcher: enqueue notifications for delivery.
//!
//! API callers never touch the store or the registry; they hand a
//! notification-shaped payload to the durable queue and the worker takes it
//! from there.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use courier_core::{JobQueue, NewNotification, Result};

/// Enqueues notification delivery jobs.
pub struct NotificationDispatcher {
    queue: Arc<dyn JobQueue>,
}

impl NotificationDispatcher {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    /// Enqueue a single notification. Returns the job id.
    pub async fn send(&self, notification: NewNotification) -> Result<Uuid> {
        notification.validate()?;
        let job_id = self.queue.enqueue(serde_json::to_value(&notification)?).await?;
        debug!(
            subsystem = "dispatch",
            %job_id,
            recipient = %notification.recipient,
            "Notification enqueued"
        );
        Ok(job_id)
    }

    /// Enqueue one delivery job per recipient, overriding the template's
    /// recipient field. Returns the job ids in recipient order.
    pub async fn send_multicast(
        &self,
        template: NewNotification,
        recipients: &[Uuid],
    ) -> Result<Vec<Uuid>> {
        let mut job_ids = Vec::with_capacity(recipients.len());
        for &recipient in recipients {
            let notification = NewNotification {
                recipient,
                ..template.clone()
            };
            job_ids.push(self.send(notification).await?);
        }
        Ok(job_ids)
    }
}
