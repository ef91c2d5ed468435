//! Delivery worker: glues the durable job queue to the delivery engine.
//!
//! Claims up to `max_concurrent_jobs` at a time and processes them
//! concurrently. Only sleeps when the queue is empty, with event-driven
//! early wake when the queue signals a new job.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, Notify};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use courier_core::{defaults, DeliveryJob, JobQueue, Result};

use crate::engine::{DeliveryEngine, JobResult};

/// Configuration for the delivery worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum number of concurrent jobs.
    pub max_concurrent_jobs: usize,
    /// Whether to enable job processing.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::JOB_POLL_INTERVAL_MS,
            max_concurrent_jobs: defaults::JOB_MAX_CONCURRENT,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_MAX_CONCURRENT` | `4` | Max concurrent jobs |
    /// | `JOB_POLL_INTERVAL_MS` | `500` | Polling interval when queue is empty |
    pub fn from_env() -> Self {
        let enabled = std::env::var("JOB_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent_jobs = std::env::var("JOB_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::JOB_MAX_CONCURRENT)
            .max(1);

        let poll_interval_ms = std::env::var("JOB_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::JOB_POLL_INTERVAL_MS);

        Self {
            poll_interval_ms,
            max_concurrent_jobs,
            enabled,
        }
    }

    /// Create a new config with custom poll interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set maximum concurrent jobs.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    /// Enable or disable job processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Event emitted by the delivery worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A job was claimed and is being processed.
    JobStarted { job_id: Uuid },
    /// A job completed successfully and was removed from the queue.
    JobCompleted { job_id: Uuid },
    /// A job failed and was reported back to the queue.
    JobFailed { job_id: Uuid, error: String },
    /// Worker started.
    WorkerStarted,
    /// Worker stopped.
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| courier_core::Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Worker that consumes delivery jobs from the queue.
pub struct DeliveryWorker {
    queue: Arc<dyn JobQueue>,
    engine: Arc<DeliveryEngine>,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
    /// Optional queue wake handle so an enqueue interrupts the empty-queue
    /// sleep immediately.
    wake: Option<Arc<Notify>>,
}

impl DeliveryWorker {
    /// Create a new delivery worker.
    pub fn new(queue: Arc<dyn JobQueue>, engine: Arc<DeliveryEngine>, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            queue,
            engine,
            config,
            event_tx,
            wake: None,
        }
    }

    /// Attach the queue's notify handle for event-driven waking.
    pub fn with_wake(mut self, wake: Arc<Notify>) -> Self {
        self.wake = Some(wake);
        self
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    #[instrument(skip(self, shutdown_rx))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Delivery worker is disabled, not starting");
            return;
        }

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent = self.config.max_concurrent_jobs,
            "Delivery worker started"
        );

        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let max_concurrent = self.config.max_concurrent_jobs;

        loop {
            // Check for shutdown before claiming jobs
            if shutdown_rx.try_recv().is_ok() {
                info!("Delivery worker received shutdown signal");
                break;
            }

            // Claim up to max_concurrent jobs
            let mut claimed = 0;
            let mut tasks = tokio::task::JoinSet::new();

            for _ in 0..max_concurrent {
                match self.claim_job().await {
                    Some(job) => {
                        claimed += 1;
                        let queue = self.queue.clone();
                        let engine = self.engine.clone();
                        let event_tx = self.event_tx.clone();
                        tasks.spawn(async move {
                            execute_job(queue, engine, event_tx, job).await;
                        });
                    }
                    None => break,
                }
            }

            if claimed == 0 {
                // Queue empty: sleep until the poll interval elapses, the
                // queue wakes us, or shutdown arrives.
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Delivery worker received shutdown signal");
                        break;
                    }
                    _ = sleep(poll_interval) => {}
                    _ = wake_notified(&self.wake) => {}
                }
            } else {
                debug!(claimed, "Processing concurrent job batch");
                // Wait for all claimed jobs to complete
                while let Some(result) = tasks.join_next().await {
                    if let Err(e) = result {
                        error!(error = ?e, "Job task panicked");
                    }
                }
                // No sleep: immediately try to claim more jobs
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Delivery worker stopped");
    }

    /// Claim the next available job without processing it.
    async fn claim_job(&self) -> Option<DeliveryJob> {
        match self.queue.claim_next().await {
            Ok(Some(job)) => Some(job),
            Ok(None) => None,
            Err(e) => {
                error!(error = ?e, "Failed to claim job");
                None
            }
        }
    }
}

/// Await the wake handle if present; pend forever otherwise so the sleep
/// branch drives the select.
async fn wake_notified(wake: &Option<Arc<Notify>>) {
    match wake {
        Some(notify) => notify.notified().await,
        None => std::future::pending().await,
    }
}

/// Execute a single claimed job and acknowledge the outcome to the queue.
async fn execute_job(
    queue: Arc<dyn JobQueue>,
    engine: Arc<DeliveryEngine>,
    event_tx: broadcast::Sender<WorkerEvent>,
    job: DeliveryJob,
) {
    let start = Instant::now();
    let job_id = job.id;

    info!(%job_id, retry_count = job.retry_count, "Processing job");
    let _ = event_tx.send(WorkerEvent::JobStarted { job_id });

    match engine.process(&job).await {
        JobResult::Success => {
            if let Err(e) = queue.complete(job_id).await {
                // The job will be re-delivered; duplicate processing is the
                // documented at-least-once trade-off.
                error!(error = ?e, %job_id, "Failed to acknowledge completed job");
            } else {
                info!(
                    %job_id,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job completed successfully"
                );
                let _ = event_tx.send(WorkerEvent::JobCompleted { job_id });
            }
        }
        JobResult::Failed(error) => {
            // Retrying cannot help; park the job without touching its
            // retry budget.
            if let Err(e) = queue.fail_permanent(job_id, &error).await {
                error!(error = ?e, %job_id, "Failed to park permanently failed job");
            } else {
                warn!(
                    %job_id,
                    %error,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job failed permanently"
                );
                let _ = event_tx.send(WorkerEvent::JobFailed { job_id, error });
            }
        }
        JobResult::Retry(error) => {
            if let Err(e) = queue.fail(job_id, &error).await {
                error!(error = ?e, %job_id, "Failed to report job failure");
            } else {
                warn!(
                    %job_id,
                    %error,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job failed"
                );
                let _ = event_tx.send(WorkerEvent::JobFailed { job_id, error });
            }
        }
    }
}
