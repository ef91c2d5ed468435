//! Delivery engine: job processing, connection lifecycle, and the
//! read-status RPC.
//!
//! The engine owns the persist-then-publish ordering: a notification is
//! never broadcast before the store has durably recorded it, and a broadcast
//! failure after a successful create never rolls persistence back. It
//! performs no retry logic of its own; a failed job is reported back to the
//! queue and the queue's retry/backoff policy applies.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use courier_core::{DeliveryJob, NewNotification, Notification, NotificationRepository};

use crate::protocol::{
    AuthRequest, ClientMessage, ReadStatusRequest, ReadStatusResult, ServerMessage, StatusChanged,
};
use crate::registry::{ConnectionId, ConnectionRegistry};

/// Result of processing one delivery job.
#[derive(Debug)]
pub enum JobResult {
    /// Persisted and broadcast; the job may be acknowledged.
    Success,
    /// Permanent failure (malformed payload). Parked as failed in the queue
    /// immediately; retrying cannot help.
    Failed(String),
    /// Transient failure (store unavailable). Reported to the queue for
    /// retry with backoff.
    Retry(String),
}

/// Server end of one client connection: an id plus the mailbox feeding the
/// transport's writer task.
pub struct ConnectionHandle {
    pub id: ConnectionId,
    sender: mpsc::UnboundedSender<ServerMessage>,
}

impl ConnectionHandle {
    /// Create a handle and the receiving half of its mailbox.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                sender,
            },
            receiver,
        )
    }

    /// Queue a message for this connection only. A send to a connection
    /// that is going away is silently dropped.
    pub fn send(&self, message: ServerMessage) {
        let _ = self.sender.send(message);
    }

    /// Clone of the mailbox sender, for registry subscription.
    pub fn sender(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.sender.clone()
    }
}

/// The notification distribution engine.
pub struct DeliveryEngine {
    store: Arc<dyn NotificationRepository>,
    registry: Arc<ConnectionRegistry>,
}

impl DeliveryEngine {
    pub fn new(store: Arc<dyn NotificationRepository>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Process one delivery job: decode, persist, then broadcast to the
    /// recipient's group.
    pub async fn process(&self, job: &DeliveryJob) -> JobResult {
        let notification = match NewNotification::from_payload(&job.payload) {
            Ok(n) => n,
            Err(e) => {
                warn!(
                    subsystem = "delivery",
                    op = "process",
                    job_id = %job.id,
                    error = %e,
                    "Malformed job payload"
                );
                return JobResult::Failed(format!("malformed payload: {e}"));
            }
        };

        let recipient = notification.recipient;
        match self.store.create(notification).await {
            Ok(stored) => {
                let delivered = self
                    .registry
                    .broadcast(recipient, ServerMessage::Notification(stored.clone()));
                debug!(
                    subsystem = "delivery",
                    op = "process",
                    job_id = %job.id,
                    notification_id = %stored.id,
                    %recipient,
                    delivered,
                    "Notification persisted and broadcast"
                );
                JobResult::Success
            }
            Err(e) => {
                // Nothing was published; the queue re-delivers.
                warn!(
                    subsystem = "delivery",
                    op = "process",
                    job_id = %job.id,
                    %recipient,
                    error = %e,
                    "Failed to persist notification"
                );
                JobResult::Retry(e.to_string())
            }
        }
    }

    /// Complete the authentication handshake for a connection: subscribe it,
    /// confirm, then replay unread notifications to the whole group.
    ///
    /// Replay uses the same `notification` frame as live delivery and goes
    /// through the registry, so every currently-connected device of the
    /// identity observes it, not only the connection that just arrived.
    pub async fn authenticate(&self, connection: &ConnectionHandle, request: AuthRequest) {
        self.registry
            .subscribe(request.user, connection.id, connection.sender());
        connection.send(ServerMessage::Confirm(request.clone()));

        let user = request.user;
        match self.store.find_unread(user).await {
            Ok(unread) => {
                let replayed = unread.len();
                // Sequential emission preserves the store's creation order.
                for notification in unread {
                    self.registry
                        .broadcast(user, ServerMessage::Notification(notification));
                }
                info!(
                    subsystem = "delivery",
                    op = "replay",
                    recipient = %user,
                    connection_id = %connection.id,
                    origin = %request.origin,
                    replayed,
                    "Connection authenticated"
                );
            }
            Err(e) => {
                // The connection stays authenticated; only the replay is lost.
                error!(
                    subsystem = "delivery",
                    op = "replay",
                    recipient = %user,
                    error = %e,
                    "Failed to fetch unread backlog"
                );
            }
        }
    }

    /// Apply a read-status mutation and announce it to the identity's group.
    ///
    /// Returns the updated record, or `None` when no record matches both id
    /// and owner (in which case nothing is broadcast).
    pub async fn set_read_status(&self, request: &ReadStatusRequest) -> Option<Notification> {
        match self
            .store
            .update_read_status(request.notification_id, request.user_id, request.read)
            .await
        {
            Ok(Some(updated)) => {
                self.registry.broadcast(
                    updated.recipient,
                    ServerMessage::NotificationStatusChanged(StatusChanged {
                        notification_id: updated.id,
                        read: updated.read,
                    }),
                );
                debug!(
                    subsystem = "delivery",
                    op = "set_read_status",
                    notification_id = %updated.id,
                    recipient = %updated.recipient,
                    read = updated.read,
                    "Read status updated"
                );
                Some(updated)
            }
            Ok(None) => {
                warn!(
                    subsystem = "delivery",
                    op = "set_read_status",
                    notification_id = %request.notification_id,
                    recipient = %request.user_id,
                    "No matching notification"
                );
                None
            }
            Err(e) => {
                error!(
                    subsystem = "delivery",
                    op = "set_read_status",
                    notification_id = %request.notification_id,
                    error = %e,
                    "Read status update failed"
                );
                None
            }
        }
    }
}

/// Per-connection authentication state.
enum SessionState {
    Unauthenticated,
    Authenticated { user: Uuid },
}

/// State machine driving one client connection.
///
/// `Unauthenticated -> Authenticated -> Closed`: only the handshake is
/// accepted before authentication, a connection binds to exactly one
/// identity for its lifetime, and close is terminal from either state.
pub struct ConnectionSession {
    engine: Arc<DeliveryEngine>,
    connection: ConnectionHandle,
    state: SessionState,
}

impl ConnectionSession {
    pub fn new(engine: Arc<DeliveryEngine>, connection: ConnectionHandle) -> Self {
        Self {
            engine,
            connection,
            state: SessionState::Unauthenticated,
        }
    }

    /// The identity this session is bound to, once authenticated.
    pub fn user(&self) -> Option<Uuid> {
        match self.state {
            SessionState::Authenticated { user } => Some(user),
            SessionState::Unauthenticated => None,
        }
    }

    /// Handle one decoded inbound frame.
    pub async fn handle(&mut self, message: ClientMessage) {
        match (&self.state, message) {
            (SessionState::Unauthenticated, ClientMessage::Auth(request)) => {
                let user = request.user;
                self.engine.authenticate(&self.connection, request).await;
                self.state = SessionState::Authenticated { user };
            }
            (SessionState::Authenticated { .. }, ClientMessage::Auth(_)) => {
                // No re-auth: the binding is for the connection's lifetime.
                warn!(
                    subsystem = "delivery",
                    connection_id = %self.connection.id,
                    "Ignoring repeated auth on bound connection"
                );
            }
            (SessionState::Unauthenticated, ClientMessage::SetNotificationReadStatus(request)) => {
                warn!(
                    subsystem = "delivery",
                    connection_id = %self.connection.id,
                    request_id = %request.request_id,
                    "Ignoring RPC on unauthenticated connection"
                );
            }
            (
                SessionState::Authenticated { .. },
                ClientMessage::SetNotificationReadStatus(request),
            ) => {
                let notification = self.engine.set_read_status(&request).await;
                // Completion goes to the calling connection only; the group
                // already saw notificationStatusChanged on success.
                self.connection
                    .send(ServerMessage::SetNotificationReadStatusResult(
                        ReadStatusResult {
                            request_id: request.request_id,
                            notification,
                        },
                    ));
            }
        }
    }

    /// Terminal transition: remove this connection from its group.
    ///
    /// In-flight store operations triggered by this connection still
    /// complete, and their broadcasts reach the identity's surviving
    /// connections.
    pub fn close(&mut self) {
        if let SessionState::Authenticated { user } = self.state {
            self.engine
                .registry()
                .unsubscribe(user, self.connection.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryNotificationStore;
    use chrono::Utc;
    use courier_core::JobStatus;
    use serde_json::json;

    fn job_with_payload(payload: serde_json::Value) -> DeliveryJob {
        DeliveryJob {
            id: Uuid::new_v4(),
            status: JobStatus::Running,
            payload,
            error_message: None,
            retry_count: 0,
            max_retries: 3,
            run_after: Utc::now(),
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
        }
    }

    fn notification_payload(recipient: Uuid) -> serde_json::Value {
        json!({
            "type": "notification",
            "message": "Hello there",
            "recipient": recipient,
            "linkback": "nope"
        })
    }

    fn engine_with_store() -> (Arc<DeliveryEngine>, Arc<MemoryNotificationStore>) {
        let store = Arc::new(MemoryNotificationStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let engine = Arc::new(DeliveryEngine::new(store.clone(), registry));
        (engine, store)
    }

    async fn authenticated_session(
        engine: &Arc<DeliveryEngine>,
        user: Uuid,
    ) -> (ConnectionSession, mpsc::UnboundedReceiver<ServerMessage>) {
        let (handle, rx) = ConnectionHandle::new();
        let mut session = ConnectionSession::new(engine.clone(), handle);
        session
            .handle(ClientMessage::Auth(AuthRequest {
                user,
                origin: "test".to_string(),
            }))
            .await;
        (session, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            messages.push(msg);
        }
        messages
    }

    #[tokio::test]
    async fn test_process_persists_then_broadcasts() {
        let (engine, store) = engine_with_store();
        let user = Uuid::new_v4();
        let (_session, mut rx) = authenticated_session(&engine, user).await;
        drain(&mut rx); // discard confirm

        let result = engine.process(&job_with_payload(notification_payload(user))).await;
        assert!(matches!(result, JobResult::Success));

        // Persisted record exists and the live connection saw exactly one
        // notification frame with store-assigned fields.
        assert_eq!(store.all().len(), 1);
        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            ServerMessage::Notification(n) => {
                assert_eq!(n.message, "Hello there");
                assert_eq!(n.recipient, user);
                assert!(!n.read);
                assert_eq!(n.id, store.all()[0].id);
            }
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_process_store_failure_is_retryable_and_publishes_nothing() {
        let (engine, store) = engine_with_store();
        let user = Uuid::new_v4();
        let (_session, mut rx) = authenticated_session(&engine, user).await;
        drain(&mut rx);

        store.fail_next_create();
        let result = engine.process(&job_with_payload(notification_payload(user))).await;

        assert!(matches!(result, JobResult::Retry(_)));
        assert!(store.all().is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_process_malformed_payload_is_permanent_failure() {
        let (engine, store) = engine_with_store();
        let result = engine
            .process(&job_with_payload(json!({ "message": "no type or recipient" })))
            .await;

        assert!(matches!(result, JobResult::Failed(_)));
        assert!(store.all().is_empty());
    }

    #[tokio::test]
    async fn test_process_with_no_connections_still_persists() {
        let (engine, store) = engine_with_store();
        let result = engine
            .process(&job_with_payload(notification_payload(Uuid::new_v4())))
            .await;

        assert!(matches!(result, JobResult::Success));
        assert_eq!(store.all().len(), 1);
    }

    #[tokio::test]
    async fn test_auth_confirms_and_replays_in_creation_order() {
        let (engine, store) = engine_with_store();
        let user = Uuid::new_v4();

        let mut expected = Vec::new();
        for i in 0..10 {
            let stored = store
                .seed(NewNotification {
                    kind: "notification".to_string(),
                    message: format!("backlog {i}"),
                    recipient: user,
                    linkback: None,
                })
                .await;
            expected.push(stored.id);
        }
        // Unrelated user's backlog must not replay.
        store
            .seed(NewNotification {
                kind: "notification".to_string(),
                message: "not yours".to_string(),
                recipient: Uuid::new_v4(),
                linkback: None,
            })
            .await;

        let (_session, mut rx) = authenticated_session(&engine, user).await;
        let messages = drain(&mut rx);

        match &messages[0] {
            ServerMessage::Confirm(auth) => assert_eq!(auth.user, user),
            other => panic!("expected confirm first, got {other:?}"),
        }

        let replayed: Vec<Uuid> = messages[1..]
            .iter()
            .map(|m| match m {
                ServerMessage::Notification(n) => n.id,
                other => panic!("expected notification, got {other:?}"),
            })
            .collect();
        assert_eq!(replayed, expected);
    }

    #[tokio::test]
    async fn test_replay_reaches_already_connected_devices() {
        let (engine, store) = engine_with_store();
        let user = Uuid::new_v4();

        let (_first, mut rx_first) = authenticated_session(&engine, user).await;
        drain(&mut rx_first);

        store
            .seed(NewNotification {
                kind: "notification".to_string(),
                message: "missed this one".to_string(),
                recipient: user,
                linkback: None,
            })
            .await;

        // Second device connects; replay goes to the group, so the first
        // device sees it too.
        let (_second, mut rx_second) = authenticated_session(&engine, user).await;

        let first_messages = drain(&mut rx_first);
        assert_eq!(first_messages.len(), 1);
        assert!(matches!(first_messages[0], ServerMessage::Notification(_)));

        let second_messages = drain(&mut rx_second);
        assert!(matches!(second_messages[0], ServerMessage::Confirm(_)));
        assert!(matches!(second_messages[1], ServerMessage::Notification(_)));
    }

    #[tokio::test]
    async fn test_read_status_rpc_round_trip() {
        let (engine, store) = engine_with_store();
        let user = Uuid::new_v4();
        let stored = store
            .seed(NewNotification {
                kind: "notification".to_string(),
                message: "mark me".to_string(),
                recipient: user,
                linkback: None,
            })
            .await;

        let (mut caller, mut rx_caller) = authenticated_session(&engine, user).await;
        let (_other, mut rx_other) = authenticated_session(&engine, user).await;
        drain(&mut rx_caller);
        drain(&mut rx_other);

        let request_id = Uuid::new_v4();
        caller
            .handle(ClientMessage::SetNotificationReadStatus(ReadStatusRequest {
                request_id,
                notification_id: stored.id,
                user_id: user,
                read: true,
            }))
            .await;

        assert!(store.all()[0].read);

        // Caller sees the group broadcast plus its own completion.
        let caller_messages = drain(&mut rx_caller);
        let status: Vec<_> = caller_messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::NotificationStatusChanged(s) => Some(s.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].notification_id, stored.id);
        assert!(status[0].read);

        let completions: Vec<_> = caller_messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::SetNotificationReadStatusResult(r) => Some(r.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].request_id, request_id);
        assert!(completions[0].notification.as_ref().unwrap().read);

        // The other device sees the broadcast but not the completion.
        let other_messages = drain(&mut rx_other);
        assert_eq!(other_messages.len(), 1);
        assert!(matches!(
            other_messages[0],
            ServerMessage::NotificationStatusChanged(_)
        ));
    }

    #[tokio::test]
    async fn test_read_status_unknown_id_no_broadcast_failure_completion() {
        let (engine, _store) = engine_with_store();
        let user = Uuid::new_v4();
        let (mut session, mut rx) = authenticated_session(&engine, user).await;
        drain(&mut rx);

        let request_id = Uuid::new_v4();
        session
            .handle(ClientMessage::SetNotificationReadStatus(ReadStatusRequest {
                request_id,
                notification_id: Uuid::new_v4(),
                user_id: user,
                read: true,
            }))
            .await;

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            ServerMessage::SetNotificationReadStatusResult(result) => {
                assert_eq!(result.request_id, request_id);
                assert!(result.notification.is_none());
            }
            other => panic!("expected failure completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_status_wrong_owner_is_failure() {
        let (engine, store) = engine_with_store();
        let owner = Uuid::new_v4();
        let intruder = Uuid::new_v4();
        let stored = store
            .seed(NewNotification {
                kind: "notification".to_string(),
                message: "private".to_string(),
                recipient: owner,
                linkback: None,
            })
            .await;

        let result = engine
            .set_read_status(&ReadStatusRequest {
                request_id: Uuid::new_v4(),
                notification_id: stored.id,
                user_id: intruder,
                read: true,
            })
            .await;

        assert!(result.is_none());
        assert!(!store.all()[0].read);
    }

    #[tokio::test]
    async fn test_rpc_before_auth_is_ignored() {
        let (engine, store) = engine_with_store();
        let user = Uuid::new_v4();
        let stored = store
            .seed(NewNotification {
                kind: "notification".to_string(),
                message: "untouchable".to_string(),
                recipient: user,
                linkback: None,
            })
            .await;

        let (handle, mut rx) = ConnectionHandle::new();
        let mut session = ConnectionSession::new(engine.clone(), handle);
        session
            .handle(ClientMessage::SetNotificationReadStatus(ReadStatusRequest {
                request_id: Uuid::new_v4(),
                notification_id: stored.id,
                user_id: user,
                read: true,
            }))
            .await;

        assert!(session.user().is_none());
        assert!(drain(&mut rx).is_empty());
        assert!(!store.all()[0].read);
    }

    #[tokio::test]
    async fn test_repeated_auth_is_ignored() {
        let (engine, _store) = engine_with_store();
        let user = Uuid::new_v4();
        let (mut session, mut rx) = authenticated_session(&engine, user).await;
        drain(&mut rx);

        let other = Uuid::new_v4();
        session
            .handle(ClientMessage::Auth(AuthRequest {
                user: other,
                origin: "second".to_string(),
            }))
            .await;

        assert_eq!(session.user(), Some(user));
        assert!(drain(&mut rx).is_empty());
        assert_eq!(engine.registry().connection_count(), 1);
    }

    #[tokio::test]
    async fn test_close_unsubscribes_but_survivors_still_receive() {
        let (engine, _store) = engine_with_store();
        let user = Uuid::new_v4();
        let (mut leaving, mut rx_leaving) = authenticated_session(&engine, user).await;
        let (_staying, mut rx_staying) = authenticated_session(&engine, user).await;
        drain(&mut rx_leaving);
        drain(&mut rx_staying);

        leaving.close();
        assert_eq!(engine.registry().connection_count(), 1);

        let result = engine
            .process(&job_with_payload(notification_payload(user)))
            .await;
        assert!(matches!(result, JobResult::Success));
        assert!(drain(&mut rx_leaving).is_empty());
        assert_eq!(drain(&mut rx_staying).len(), 1);
    }
}
