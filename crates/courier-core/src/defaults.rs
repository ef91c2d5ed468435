//! Centralized default constants for the courier system.
//!
//! **This module is the single source of truth** for all shared default
//! values. All crates should reference these constants instead of defining
//! their own magic numbers.

// =============================================================================
// SERVER
// =============================================================================

/// Default listening port for the connection-accepting transport.
pub const SOCKETS_PORT: u16 = 5000;

// =============================================================================
// JOB QUEUE
// =============================================================================

/// Default maximum retries before a job is marked failed terminally.
pub const JOB_MAX_RETRIES: i32 = 3;

/// Default polling interval when the queue is empty (milliseconds).
pub const JOB_POLL_INTERVAL_MS: u64 = 500;

/// Default maximum number of concurrently processed jobs.
pub const JOB_MAX_CONCURRENT: usize = 4;

/// Base backoff applied on job failure, doubled per retry (seconds).
pub const JOB_RETRY_BACKOFF_SECS: i64 = 2;

// =============================================================================
// EVENTS
// =============================================================================

/// Capacity of the worker event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;
