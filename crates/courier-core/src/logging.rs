//! Structured logging field name constants for courier.
//!
//! All crates use these constants for consistent structured logging fields
//! so log aggregation tools can query by standardized names across every
//! subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), operation completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-frame traffic, high-volume data |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "delivery", "registry", "db", "worker", "transport"
pub const SUBSYSTEM: &str = "subsystem";

/// Logical operation name.
/// Examples: "process", "replay", "set_read_status", "claim_next"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Notification UUID being delivered or mutated.
pub const NOTIFICATION_ID: &str = "notification_id";

/// Recipient identity a broadcast or replay targets.
pub const RECIPIENT: &str = "recipient";

/// Connection UUID within the registry.
pub const CONNECTION_ID: &str = "connection_id";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of live connections a broadcast reached.
pub const DELIVERED: &str = "delivered";

/// Number of notifications replayed on connect.
pub const REPLAYED: &str = "replayed";
