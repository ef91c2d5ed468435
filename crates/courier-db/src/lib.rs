//! # courier-db
//!
//! PostgreSQL persistence layer for courier.
//!
//! This crate provides:
//! - Connection pool management
//! - The notification store (create, find-unread, read-status update)
//! - The durable delivery job queue (at-least-once, SKIP LOCKED claims)
//!
//! ## Example
//!
//! ```rust,ignore
//! use courier_db::Database;
//! use courier_core::{NewNotification, NotificationRepository};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/courier").await?;
//!
//!     let stored = db.notifications.create(NewNotification {
//!         kind: "notification".to_string(),
//!         message: "Hello there".to_string(),
//!         recipient: uuid::Uuid::new_v4(),
//!         linkback: None,
//!     }).await?;
//!
//!     println!("Created notification: {}", stored.id);
//!     Ok(())
//! }
//! ```

pub mod jobs;
pub mod notifications;
pub mod pool;

// Re-export core types
pub use courier_core::*;

pub use jobs::PgJobQueue;
pub use notifications::PgNotificationRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};

/// Combined database context with all repositories.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Notification store.
    pub notifications: PgNotificationRepository,
    /// Durable delivery job queue.
    pub jobs: PgJobQueue,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            notifications: PgNotificationRepository::new(pool.clone()),
            jobs: PgJobQueue::new(pool.clone()),
            pool,
        }
    }

    /// Connect to the database and build the context.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = create_pool(database_url).await?;
        Ok(Self::new(pool))
    }

    /// Connect with a custom pool configuration.
    pub async fn connect_with_config(database_url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(database_url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations (requires the `migrations` feature).
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Internal(format!("migration failed: {e}")))?;
        Ok(())
    }
}
