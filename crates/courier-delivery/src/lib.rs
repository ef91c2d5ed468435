//! # courier-delivery
//!
//! The notification distribution engine for courier.
//!
//! This crate provides:
//! - The wire protocol (tagged message unions, negotiated framing)
//! - The connection registry (identity-addressed groups of live connections)
//! - The delivery engine (persist-then-publish job processing, handshake,
//!   unread replay, read-status RPC)
//! - The delivery worker (concurrent queue consumption with retry reporting)
//! - The producer-side dispatcher
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use courier_delivery::{ConnectionRegistry, DeliveryEngine, DeliveryWorker, WorkerConfig};
//! use courier_db::Database;
//!
//! let db = Database::connect("postgres://...").await?;
//! let registry = Arc::new(ConnectionRegistry::new());
//! let store = Arc::new(courier_db::PgNotificationRepository::new(db.pool.clone()));
//! let queue = Arc::new(courier_db::PgJobQueue::new(db.pool.clone()));
//!
//! let engine = Arc::new(DeliveryEngine::new(store, registry.clone()));
//! let worker = DeliveryWorker::new(queue.clone(), engine.clone(), WorkerConfig::from_env())
//!     .with_wake(queue.job_notify());
//! let handle = worker.start();
//!
//! // ... serve the transport, then:
//! handle.shutdown().await?;
//! ```

pub mod dispatch;
pub mod engine;
pub mod protocol;
pub mod registry;
pub mod testing;
pub mod worker;

// Re-export core types
pub use courier_core::*;

pub use dispatch::NotificationDispatcher;
pub use engine::{ConnectionHandle, ConnectionSession, DeliveryEngine, JobResult};
pub use protocol::{
    AuthRequest, ClientMessage, Frame, Framing, ReadStatusRequest, ReadStatusResult,
    ServerMessage, StatusChanged,
};
pub use registry::{group_key, ConnectionId, ConnectionRegistry, SubscriptionGuard};
pub use worker::{DeliveryWorker, WorkerConfig, WorkerEvent, WorkerHandle};
