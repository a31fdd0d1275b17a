//! Connection registry and group fan-out.
//!
//! Every connection belongs to exactly one named group for its lifetime.
//! Each group is backed by its own broadcast channel, so a fan-out only
//! reaches receivers subscribed to that group. Registry mutations happen
//! under a single short-lived lock and never await.

pub mod heartbeat;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use shared::RelayEvent;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

/// The group every WebSocket client joins on connect.
pub const ORDER_UPDATES: &str = "order_updates";

/// Per-group buffer. Receivers further behind than this skip events.
const GROUP_CAPACITY: usize = 256;

pub type EventReceiver = broadcast::Receiver<Arc<RelayEvent>>;

#[derive(Default)]
struct Registry {
    /// Live connections and the group each one joined.
    connections: HashMap<Uuid, String>,
    groups: HashMap<String, broadcast::Sender<Arc<RelayEvent>>>,
}

/// A live connection's membership: its id, its group's event stream and
/// the shutdown signal.
pub struct ConnectionHandle {
    pub id: Uuid,
    pub events: EventReceiver,
    pub shutdown: ShutdownSignal,
}

/// Receiving side of the relay-wide shutdown flag.
pub struct ShutdownSignal(watch::Receiver<bool>);

impl ShutdownSignal {
    #[cfg(test)]
    fn is_set(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once shutdown has been requested, immediately if it already was.
    pub async fn wait(&mut self) {
        // Err means the relay itself is gone, which is shutdown too.
        let _ = self.0.wait_for(|closed| *closed).await;
    }
}

/// Relay state: the connection registry plus one broadcast channel per group.
pub struct RelayState {
    registry: Mutex<Registry>,
    shutdown: watch::Sender<bool>,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            registry: Mutex::new(Registry::default()),
            shutdown,
        }
    }

    // Every critical section leaves the maps consistent, so a poisoned lock is still usable.
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit a connection and join it to `group`.
    pub fn connect(&self, group: &str) -> ConnectionHandle {
        let id = Uuid::new_v4();
        let mut registry = self.registry();
        let events = registry
            .groups
            .entry(group.to_string())
            .or_insert_with(|| broadcast::channel(GROUP_CAPACITY).0)
            .subscribe();
        registry.connections.insert(id, group.to_string());
        let count = registry.connections.len();
        drop(registry);

        tracing::info!(client_id = %id, group, connected_clients = count, "client connected");
        ConnectionHandle {
            id,
            events,
            shutdown: ShutdownSignal(self.shutdown.subscribe()),
        }
    }

    /// Remove a connection. Returns false if it was already gone. A group
    /// left without members is dropped along with its channel.
    pub fn disconnect(&self, id: Uuid, reason: &str) -> bool {
        let mut registry = self.registry();
        let Some(group) = registry.connections.remove(&id) else {
            return false;
        };
        if !registry.connections.values().any(|g| *g == group) {
            registry.groups.remove(&group);
        }
        let count = registry.connections.len();
        drop(registry);

        tracing::info!(
            client_id = %id,
            group = %group,
            reason,
            connected_clients = count,
            "client disconnected"
        );
        true
    }

    /// Deliver `event` to every current member of `group`. Returns the number
    /// of receivers it was queued for; an unknown or empty group yields 0.
    pub fn broadcast(&self, group: &str, event: RelayEvent) -> usize {
        let tx = self.registry().groups.get(group).cloned();
        let kind = event.kind.as_str();
        let recipients = match tx {
            // Err only means no receivers are left.
            Some(tx) => tx.send(Arc::new(event)).unwrap_or(0),
            None => 0,
        };
        tracing::debug!(group, event = kind, recipients, "event broadcast");
        recipients
    }

    pub fn connected_clients(&self) -> usize {
        self.registry().connections.len()
    }

    #[cfg(test)]
    fn is_member(&self, id: Uuid, group: &str) -> bool {
        self.registry()
            .connections
            .get(&id)
            .is_some_and(|g| g == group)
    }

    /// Signal every connection task to close its socket.
    pub fn close_all(&self) {
        tracing::info!(
            connected_clients = self.connected_clients(),
            "closing all connections"
        );
        self.shutdown.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared::EventKind;
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    fn order_deleted(id: i64) -> RelayEvent {
        let body = json!({ "order_id": id });
        RelayEvent::from_body(EventKind::OrderDeleted, body.as_object().unwrap()).unwrap()
    }

    #[test]
    fn count_tracks_connects_and_disconnects() {
        let relay = RelayState::new();
        let a = relay.connect(ORDER_UPDATES);
        let b = relay.connect(ORDER_UPDATES);
        let c = relay.connect(ORDER_UPDATES);
        assert_eq!(relay.connected_clients(), 3);

        assert!(relay.disconnect(b.id, "client left"));
        assert_eq!(relay.connected_clients(), 2);

        assert!(relay.disconnect(a.id, "client left"));
        assert!(relay.disconnect(c.id, "client left"));
        assert_eq!(relay.connected_clients(), 0);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let relay = RelayState::new();
        let a = relay.connect(ORDER_UPDATES);
        let _b = relay.connect(ORDER_UPDATES);

        assert!(relay.disconnect(a.id, "first"));
        assert!(!relay.disconnect(a.id, "again"));
        assert!(!relay.disconnect(Uuid::new_v4(), "never connected"));
        assert_eq!(relay.connected_clients(), 1);
    }

    #[test]
    fn connect_joins_exactly_the_requested_group() {
        let relay = RelayState::new();
        let a = relay.connect(ORDER_UPDATES);
        assert_ne!(a.id, relay.connect(ORDER_UPDATES).id);
        assert!(relay.is_member(a.id, ORDER_UPDATES));
        assert!(!relay.is_member(a.id, "other"));

        relay.disconnect(a.id, "done");
        assert!(!relay.is_member(a.id, ORDER_UPDATES));
    }

    #[test]
    fn broadcast_reaches_every_member_of_the_group() {
        let relay = RelayState::new();
        let mut a = relay.connect(ORDER_UPDATES);
        let mut b = relay.connect(ORDER_UPDATES);

        assert_eq!(relay.broadcast(ORDER_UPDATES, order_deleted(1)), 2);

        for handle in [&mut a, &mut b] {
            let ev = handle.events.try_recv().unwrap();
            assert_eq!(*ev, order_deleted(1));
            assert!(matches!(handle.events.try_recv(), Err(TryRecvError::Empty)));
        }
    }

    #[test]
    fn broadcast_does_not_leak_across_groups() {
        let relay = RelayState::new();
        let mut member = relay.connect(ORDER_UPDATES);
        let mut outsider = relay.connect("audit");

        assert_eq!(relay.broadcast(ORDER_UPDATES, order_deleted(2)), 1);
        assert!(member.events.try_recv().is_ok());
        assert!(matches!(outsider.events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn lagging_receiver_skips_to_oldest_retained_event() {
        let relay = RelayState::new();
        let mut slow = relay.connect(ORDER_UPDATES);
        let total = GROUP_CAPACITY as i64 + 1;
        for id in 1..=total {
            relay.broadcast(ORDER_UPDATES, order_deleted(id));
        }

        assert!(matches!(slow.events.recv().await, Err(RecvError::Lagged(1))));
        assert_eq!(*slow.events.recv().await.unwrap(), order_deleted(2));

        let mut last = None;
        while let Ok(ev) = slow.events.try_recv() {
            last = Some(ev);
        }
        assert_eq!(*last.unwrap(), order_deleted(total));

        // Still a member and still receiving after the lag.
        assert!(relay.is_member(slow.id, ORDER_UPDATES));
        relay.broadcast(ORDER_UPDATES, order_deleted(total + 1));
        assert_eq!(*slow.events.recv().await.unwrap(), order_deleted(total + 1));
    }

    #[test]
    fn empty_group_is_released_on_last_disconnect() {
        let relay = RelayState::new();
        let a = relay.connect("audit");
        let b = relay.connect("audit");
        let keep = relay.connect(ORDER_UPDATES);

        relay.disconnect(a.id, "left");
        assert!(relay.registry().groups.contains_key("audit"));

        relay.disconnect(b.id, "left");
        assert!(!relay.registry().groups.contains_key("audit"));
        assert!(relay.registry().groups.contains_key(ORDER_UPDATES));
        assert_eq!(relay.broadcast("audit", order_deleted(1)), 0);

        // Rejoining recreates the group.
        let mut c = relay.connect("audit");
        assert_eq!(relay.broadcast("audit", order_deleted(2)), 1);
        assert!(c.events.try_recv().is_ok());
        relay.disconnect(keep.id, "left");
    }

    #[test]
    fn late_joiner_misses_earlier_events() {
        let relay = RelayState::new();
        let _early = relay.connect(ORDER_UPDATES);
        relay.broadcast(ORDER_UPDATES, order_deleted(3));

        let mut late = relay.connect(ORDER_UPDATES);
        assert!(matches!(late.events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn broadcast_without_members_is_not_an_error() {
        let relay = RelayState::new();
        assert_eq!(relay.broadcast(ORDER_UPDATES, order_deleted(4)), 0);

        let gone = relay.connect(ORDER_UPDATES);
        relay.disconnect(gone.id, "left");
        drop(gone);
        assert_eq!(relay.broadcast(ORDER_UPDATES, order_deleted(5)), 0);
    }

    #[test]
    fn close_all_reaches_existing_and_new_connections() {
        let relay = RelayState::new();
        let before = relay.connect(ORDER_UPDATES);
        relay.close_all();
        let after = relay.connect(ORDER_UPDATES);

        assert!(before.shutdown.is_set());
        assert!(after.shutdown.is_set());
    }

    #[tokio::test]
    async fn shutdown_wait_resolves_after_close_all() {
        let relay = Arc::new(RelayState::new());
        let mut handle = relay.connect(ORDER_UPDATES);
        assert!(!handle.shutdown.is_set());

        let closer = Arc::clone(&relay);
        tokio::spawn(async move { closer.close_all() });
        handle.shutdown.wait().await;
        assert!(handle.shutdown.is_set());
    }
}
