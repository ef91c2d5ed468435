//! In-memory store and queue implementations for tests.
//!
//! These back the engine and worker tests without a live PostgreSQL
//! instance, while honoring the same contracts as `courier-db`: the store
//! assigns ids and timestamps, unread queries return creation order, and
//! the queue re-delivers failed jobs until the retry budget runs out.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use courier_core::{
    defaults, DeliveryJob, Error, JobQueue, JobStatus, NewNotification, Notification,
    NotificationRepository, Result,
};

/// In-memory NotificationRepository.
pub struct MemoryNotificationStore {
    records: Mutex<Vec<Notification>>,
    fail_next_create: AtomicBool,
    /// Monotonic tick so created_at is strictly increasing even within one
    /// scheduler step.
    seq: AtomicI64,
    base: DateTime<Utc>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            fail_next_create: AtomicBool::new(false),
            seq: AtomicI64::new(0),
            base: Utc::now(),
        }
    }

    /// Make the next `create` call fail, simulating a transient store outage.
    pub fn fail_next_create(&self) {
        self.fail_next_create.store(true, Ordering::SeqCst);
    }

    /// Persist a record directly, bypassing the failure toggle. Test setup
    /// convenience.
    pub async fn seed(&self, notification: NewNotification) -> Notification {
        self.fail_next_create.store(false, Ordering::SeqCst);
        self.create(notification)
            .await
            .expect("seed create should not fail")
    }

    /// Snapshot of all persisted records in creation order.
    pub fn all(&self) -> Vec<Notification> {
        self.records.lock().expect("store lock").clone()
    }

    fn next_timestamp(&self) -> DateTime<Utc> {
        let tick = self.seq.fetch_add(1, Ordering::SeqCst);
        self.base + ChronoDuration::milliseconds(tick)
    }
}

impl Default for MemoryNotificationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationRepository for MemoryNotificationStore {
    async fn create(&self, notification: NewNotification) -> Result<Notification> {
        if self.fail_next_create.swap(false, Ordering::SeqCst) {
            return Err(Error::Internal("simulated store outage".to_string()));
        }
        notification.validate()?;

        let now = self.next_timestamp();
        let stored = Notification {
            id: Uuid::now_v7(),
            kind: notification.kind,
            message: notification.message,
            recipient: notification.recipient,
            linkback: notification.linkback,
            read: false,
            created_at: now,
            updated_at: now,
        };
        self.records.lock().expect("store lock").push(stored.clone());
        Ok(stored)
    }

    async fn find_unread(&self, recipient: Uuid) -> Result<Vec<Notification>> {
        let mut unread: Vec<Notification> = self
            .records
            .lock()
            .expect("store lock")
            .iter()
            .filter(|n| n.recipient == recipient && !n.read)
            .cloned()
            .collect();
        unread.sort_by_key(|n| n.created_at);
        Ok(unread)
    }

    async fn update_read_status(
        &self,
        id: Uuid,
        recipient: Uuid,
        read: bool,
    ) -> Result<Option<Notification>> {
        let now = self.next_timestamp();
        let mut records = self.records.lock().expect("store lock");
        for record in records.iter_mut() {
            if record.id == id && record.recipient == recipient {
                record.read = read;
                record.updated_at = now;
                return Ok(Some(record.clone()));
            }
        }
        Ok(None)
    }
}

/// In-memory JobQueue with the same at-least-once semantics as the real
/// queue: failed jobs go back to pending (without backoff, to keep tests
/// fast) until `max_retries` is exhausted.
pub struct MemoryJobQueue {
    jobs: Mutex<Vec<DeliveryJob>>,
    completed: Mutex<Vec<Uuid>>,
    failures: Mutex<Vec<(Uuid, String)>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            completed: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Ids acknowledged as complete, in order.
    pub fn completed(&self) -> Vec<Uuid> {
        self.completed.lock().expect("queue lock").clone()
    }

    /// Failure reports `(job id, error)`, in order.
    pub fn failures(&self) -> Vec<(Uuid, String)> {
        self.failures.lock().expect("queue lock").clone()
    }

    /// Jobs parked as terminally failed.
    pub fn terminally_failed(&self) -> Vec<Uuid> {
        self.jobs
            .lock()
            .expect("queue lock")
            .iter()
            .filter(|j| j.status == JobStatus::Failed)
            .map(|j| j.id)
            .collect()
    }
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, payload: JsonValue) -> Result<Uuid> {
        let now = Utc::now();
        let job = DeliveryJob {
            id: Uuid::now_v7(),
            status: JobStatus::Pending,
            payload,
            error_message: None,
            retry_count: 0,
            max_retries: defaults::JOB_MAX_RETRIES,
            run_after: now,
            created_at: now,
            started_at: None,
        };
        let id = job.id;
        self.jobs.lock().expect("queue lock").push(job);
        Ok(id)
    }

    async fn claim_next(&self) -> Result<Option<DeliveryJob>> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().expect("queue lock");
        for job in jobs.iter_mut() {
            if job.status == JobStatus::Pending && job.run_after <= now {
                job.status = JobStatus::Running;
                job.started_at = Some(now);
                return Ok(Some(job.clone()));
            }
        }
        Ok(None)
    }

    async fn complete(&self, job_id: Uuid) -> Result<()> {
        let mut jobs = self.jobs.lock().expect("queue lock");
        jobs.retain(|j| j.id != job_id);
        self.completed.lock().expect("queue lock").push(job_id);
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().expect("queue lock");
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| Error::Job(format!("unknown job: {job_id}")))?;

        if job.retry_count < job.max_retries {
            job.status = JobStatus::Pending;
            job.retry_count += 1;
            job.error_message = Some(error.to_string());
            job.started_at = None;
        } else {
            job.status = JobStatus::Failed;
            job.error_message = Some(error.to_string());
        }
        self.failures
            .lock()
            .expect("queue lock")
            .push((job_id, error.to_string()));
        Ok(())
    }

    async fn fail_permanent(&self, job_id: Uuid, error: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().expect("queue lock");
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| Error::Job(format!("unknown job: {job_id}")))?;

        job.status = JobStatus::Failed;
        job.error_message = Some(error.to_string());
        drop(jobs);

        self.failures
            .lock()
            .expect("queue lock")
            .push((job_id, error.to_string()));
        Ok(())
    }

    async fn pending_count(&self) -> Result<i64> {
        Ok(self
            .jobs
            .lock()
            .expect("queue lock")
            .iter()
            .filter(|j| j.status == JobStatus::Pending)
            .count() as i64)
    }
}
