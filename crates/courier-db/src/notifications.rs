//! Notification repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use courier_core::{Error, NewNotification, Notification, NotificationRepository, Result};

/// PostgreSQL implementation of NotificationRepository.
pub struct PgNotificationRepository {
    pool: Pool<Postgres>,
}

impl PgNotificationRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: &sqlx::postgres::PgRow) -> Notification {
        Notification {
            id: row.get("id"),
            kind: row.get("type"),
            message: row.get("message"),
            recipient: row.get("recipient"),
            linkback: row.get("linkback"),
            read: row.get("read"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl NotificationRepository for PgNotificationRepository {
    async fn create(&self, notification: NewNotification) -> Result<Notification> {
        notification.validate()?;

        let id = Uuid::now_v7();
        let now = Utc::now();

        let row = sqlx::query(
            r#"INSERT INTO notifications (id, type, message, recipient, linkback, read, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, false, $6, $6)
               RETURNING id, type, message, recipient, linkback, read, created_at, updated_at"#,
        )
        .bind(id)
        .bind(&notification.kind)
        .bind(&notification.message)
        .bind(notification.recipient)
        .bind(&notification.linkback)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(Self::parse_row(&row))
    }

    async fn find_unread(&self, recipient: Uuid) -> Result<Vec<Notification>> {
        let rows = sqlx::query(
            r#"SELECT id, type, message, recipient, linkback, read, created_at, updated_at
               FROM notifications
               WHERE recipient = $1 AND read = false
               ORDER BY created_at ASC"#,
        )
        .bind(recipient)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_row).collect())
    }

    async fn update_read_status(
        &self,
        id: Uuid,
        recipient: Uuid,
        read: bool,
    ) -> Result<Option<Notification>> {
        let now = Utc::now();

        // Single atomic statement: per-record mutation atomicity, last-write-wins
        // across concurrent callers.
        let row = sqlx::query(
            r#"UPDATE notifications
               SET read = $3, updated_at = $4
               WHERE id = $1 AND recipient = $2
               RETURNING id, type, message, recipient, linkback, read, created_at, updated_at"#,
        )
        .bind(id)
        .bind(recipient)
        .bind(read)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.as_ref().map(Self::parse_row))
    }
}
