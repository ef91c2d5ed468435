//! Connection registry: group-addressed delivery by logical identity.
//!
//! Maps each recipient identity to the set of currently-open connections so
//! the rest of the system never tracks individual sockets. Membership is an
//! explicit map mutated on subscribe and on disconnect; closed connections
//! are additionally pruned the moment a send to them fails, so a group is
//! never considered live for a dead connection.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::protocol::ServerMessage;

/// Identifier of one live connection.
pub type ConnectionId = Uuid;

type Group = HashMap<ConnectionId, mpsc::UnboundedSender<ServerMessage>>;

/// Stable, collision-free group key for an identity.
///
/// Distinct identities always map to distinct keys because the UUID is
/// embedded verbatim.
pub fn group_key(recipient: Uuid) -> String {
    format!("user/{recipient}")
}

/// Registry of live connections, addressed by recipient identity.
///
/// Mutations never span await points: the lock is a plain `std::sync`
/// RwLock held only for the map operation itself.
#[derive(Default)]
pub struct ConnectionRegistry {
    groups: RwLock<HashMap<String, Group>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Group>> {
        self.groups.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Group>> {
        self.groups.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Associate a connection with an identity's group. Idempotent per
    /// connection: re-subscribing replaces the stored sender.
    pub fn subscribe(
        &self,
        recipient: Uuid,
        connection_id: ConnectionId,
        sender: mpsc::UnboundedSender<ServerMessage>,
    ) {
        let key = group_key(recipient);
        let mut groups = self.write();
        groups.entry(key).or_default().insert(connection_id, sender);
        debug!(
            subsystem = "registry",
            %recipient,
            %connection_id,
            "Subscribed connection"
        );
    }

    /// Remove a connection from an identity's group. Empty groups are
    /// dropped so closed state never accumulates.
    pub fn unsubscribe(&self, recipient: Uuid, connection_id: ConnectionId) {
        let key = group_key(recipient);
        let mut groups = self.write();
        if let Some(group) = groups.get_mut(&key) {
            group.remove(&connection_id);
            if group.is_empty() {
                groups.remove(&key);
            }
        }
        debug!(
            subsystem = "registry",
            %recipient,
            %connection_id,
            "Unsubscribed connection"
        );
    }

    /// Deliver a message to every live connection of an identity.
    ///
    /// Fire-and-forget: returns the number of connections reached. An empty
    /// group is a silent no-op. Members whose channel has closed are pruned
    /// before being counted.
    pub fn broadcast(&self, recipient: Uuid, message: ServerMessage) -> usize {
        let key = group_key(recipient);
        let mut delivered = 0;
        let mut dead: Vec<ConnectionId> = Vec::new();

        {
            let groups = self.read();
            let Some(group) = groups.get(&key) else {
                trace!(subsystem = "registry", %recipient, "Broadcast to empty group");
                return 0;
            };
            for (connection_id, sender) in group {
                if sender.send(message.clone()).is_ok() {
                    delivered += 1;
                } else {
                    dead.push(*connection_id);
                }
            }
        }

        if !dead.is_empty() {
            let mut groups = self.write();
            if let Some(group) = groups.get_mut(&key) {
                for connection_id in dead {
                    group.remove(&connection_id);
                }
                if group.is_empty() {
                    groups.remove(&key);
                }
            }
        }

        trace!(
            subsystem = "registry",
            %recipient,
            delivered,
            event = message.event_name(),
            "Broadcast"
        );
        delivered
    }

    /// Total live connections across all groups.
    pub fn connection_count(&self) -> usize {
        self.read().values().map(|g| g.len()).sum()
    }

    /// Number of identities with at least one live connection.
    pub fn group_count(&self) -> usize {
        self.read().len()
    }
}

/// RAII subscription: unsubscribes when dropped.
///
/// Used by stream-shaped transports (SSE fallback) whose lifecycle ends by
/// drop rather than by an explicit close callback.
pub struct SubscriptionGuard {
    registry: Arc<ConnectionRegistry>,
    recipient: Uuid,
    connection_id: ConnectionId,
}

impl SubscriptionGuard {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        recipient: Uuid,
        connection_id: ConnectionId,
    ) -> Self {
        Self {
            registry,
            recipient,
            connection_id,
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.registry.unsubscribe(self.recipient, self.connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{AuthRequest, ServerMessage};

    fn confirm(user: Uuid) -> ServerMessage {
        ServerMessage::Confirm(AuthRequest {
            user,
            origin: "test".to_string(),
        })
    }

    #[test]
    fn test_group_key_collision_free() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_ne!(group_key(a), group_key(b));
        assert_eq!(group_key(a), group_key(a));
        assert!(group_key(a).starts_with("user/"));
    }

    #[test]
    fn test_broadcast_empty_group_is_noop() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.broadcast(Uuid::new_v4(), confirm(Uuid::new_v4())), 0);
    }

    #[test]
    fn test_multi_device_fanout() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        registry.subscribe(user, Uuid::new_v4(), tx1);
        registry.subscribe(user, Uuid::new_v4(), tx2);

        assert_eq!(registry.broadcast(user, confirm(user)), 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn test_broadcast_targets_only_that_group() {
        let registry = ConnectionRegistry::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        registry.subscribe(alice, Uuid::new_v4(), tx_a);
        registry.subscribe(bob, Uuid::new_v4(), tx_b);

        assert_eq!(registry.broadcast(alice, confirm(alice)), 1);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_subscribe_idempotent() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let connection_id = Uuid::new_v4();

        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.subscribe(user, connection_id, tx.clone());
        registry.subscribe(user, connection_id, tx);

        assert_eq!(registry.connection_count(), 1);
        assert_eq!(registry.broadcast(user, confirm(user)), 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unsubscribe_drops_empty_group() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let connection_id = Uuid::new_v4();

        let (tx, _rx) = mpsc::unbounded_channel();
        registry.subscribe(user, connection_id, tx);
        assert_eq!(registry.group_count(), 1);

        registry.unsubscribe(user, connection_id);
        assert_eq!(registry.group_count(), 0);
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn test_closed_connections_pruned_on_broadcast() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();

        let (tx_live, mut rx_live) = mpsc::unbounded_channel();
        let (tx_dead, rx_dead) = mpsc::unbounded_channel();
        registry.subscribe(user, Uuid::new_v4(), tx_live);
        registry.subscribe(user, Uuid::new_v4(), tx_dead);
        drop(rx_dead);

        // Dead member is not counted and is removed from the group.
        assert_eq!(registry.broadcast(user, confirm(user)), 1);
        assert!(rx_live.try_recv().is_ok());
        assert_eq!(registry.connection_count(), 1);
    }

    #[test]
    fn test_subscription_guard_unsubscribes_on_drop() {
        let registry = Arc::new(ConnectionRegistry::new());
        let user = Uuid::new_v4();
        let connection_id = Uuid::new_v4();

        let (tx, _rx) = mpsc::unbounded_channel();
        registry.subscribe(user, connection_id, tx);
        let guard = SubscriptionGuard::new(registry.clone(), user, connection_id);

        assert_eq!(registry.connection_count(), 1);
        drop(guard);
        assert_eq!(registry.connection_count(), 0);
    }
}
