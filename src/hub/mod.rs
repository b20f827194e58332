//! Realtime broadcast hub: the who-is-connected registry and the topic
//! fan-out. Owns only ephemeral state; on restart it starts empty and
//! clients reconnect and resubscribe.

use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::{authorize, Action, Identity, Role};
use crate::error::AppError;
use crate::models::event::HubEvent;
use crate::models::order::Coordinates;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Order(Uuid),
    Role(Role),
}

struct Connection {
    identity: Identity,
    topics: HashSet<Topic>,
    tx: mpsc::UnboundedSender<HubEvent>,
}

/// Connection registry with explicit lifecycle; constructed once by
/// `AppState` and reached only through these methods.
#[derive(Default)]
pub struct BroadcastHub {
    connections: DashMap<Uuid, Connection>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a live connection. One identity may hold several at once
    /// (multi-device). Admin connections are subscribed to the admin channel
    /// up front so they see every order's events.
    pub fn connect(&self, identity: Identity) -> (Uuid, mpsc::UnboundedReceiver<HubEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection_id = Uuid::new_v4();

        let mut topics = HashSet::new();
        if identity.role == Role::Admin {
            topics.insert(Topic::Role(Role::Admin));
        }

        self.connections
            .insert(connection_id, Connection { identity, topics, tx });

        debug!(%connection_id, user_id = %identity.id, "connection registered");
        (connection_id, rx)
    }

    /// Idempotent: disconnecting an unknown connection is a no-op.
    pub fn disconnect(&self, connection_id: Uuid) {
        if self.connections.remove(&connection_id).is_some() {
            debug!(%connection_id, "connection removed");
        }
    }

    pub fn subscribe(&self, connection_id: Uuid, topic: Topic) {
        if let Some(mut connection) = self.connections.get_mut(&connection_id) {
            connection.topics.insert(topic);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Fan-out to subscribers of the order's topic plus the admin channel.
    /// A connection subscribed to both receives the event once.
    pub fn publish_order_event(&self, order_id: Uuid, event: HubEvent) {
        self.fan_out(&event, |_, connection| {
            connection.topics.contains(&Topic::Order(order_id))
                || connection.topics.contains(&Topic::Role(Role::Admin))
        });
    }

    /// Chat goes to every other connection, room-style. There is no
    /// per-conversation targeting; this mirrors the platform's single
    /// global chat channel.
    pub fn publish_chat(&self, sender: Uuid, body: serde_json::Value) {
        let from = match self.connections.get(&sender) {
            Some(connection) => connection.identity.id,
            None => return,
        };

        let event = HubEvent::ReceiveMessage { from, body };
        self.fan_out(&event, |connection_id, _| connection_id != sender);
    }

    fn fan_out<F>(&self, event: &HubEvent, mut include: F)
    where
        F: FnMut(Uuid, &Connection) -> bool,
    {
        let mut dead = Vec::new();

        for entry in self.connections.iter() {
            if !include(*entry.key(), entry.value()) {
                continue;
            }
            if entry.value().tx.send(event.clone()).is_err() {
                dead.push(*entry.key());
            }
        }

        // Receivers gone without a clean disconnect; reap them now.
        for connection_id in dead {
            warn!(%connection_id, "dropping dead connection");
            self.connections.remove(&connection_id);
        }
    }

    /// Drops every live connection. Clients are expected to reconnect.
    pub fn shutdown(&self) {
        self.connections.clear();
    }
}

/// Validates that the caller is the order's current assignee, persists the
/// position as the order's last known location, then fans the ping out to
/// the order topic and the admin channel. A failed fan-out never fails the
/// update itself.
pub fn publish_location_update(
    state: &AppState,
    identity: &Identity,
    order_id: Uuid,
    location: Coordinates,
) -> Result<Coordinates, AppError> {
    let worker_id = {
        let mut order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {} not found", order_id)))?;

        authorize(identity, Action::PublishLocation { order: &order })?;
        order.last_location = Some(location);
        order.assigned_to.unwrap_or(identity.id)
    };

    state.hub.publish_order_event(
        order_id,
        HubEvent::LocationUpdate { order_id, worker_id, location },
    );

    Ok(location)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{BroadcastHub, Topic};
    use crate::auth::{Identity, Role};
    use crate::models::event::HubEvent;
    use crate::models::order::OrderStatus;

    fn identity(role: Role) -> Identity {
        Identity { id: Uuid::new_v4(), role }
    }

    fn status_event(order_id: Uuid) -> HubEvent {
        HubEvent::OrderStatus { order_id, status: OrderStatus::Assigned }
    }

    #[tokio::test]
    async fn order_events_reach_only_subscribers_and_admins() {
        let hub = BroadcastHub::new();
        let order_id = Uuid::new_v4();

        let (subscriber, mut subscriber_rx) = hub.connect(identity(Role::Customer));
        let (_bystander, mut bystander_rx) = hub.connect(identity(Role::Customer));
        let (_admin, mut admin_rx) = hub.connect(identity(Role::Admin));

        hub.subscribe(subscriber, Topic::Order(order_id));
        hub.publish_order_event(order_id, status_event(order_id));

        assert_eq!(subscriber_rx.recv().await, Some(status_event(order_id)));
        assert_eq!(admin_rx.recv().await, Some(status_event(order_id)));
        assert!(bystander_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn chat_skips_the_sender() {
        let hub = BroadcastHub::new();
        let sender_identity = identity(Role::Customer);

        let (sender, mut sender_rx) = hub.connect(sender_identity);
        let (_peer, mut peer_rx) = hub.connect(identity(Role::Delivery));

        let body = serde_json::json!({"text": "on my way"});
        hub.publish_chat(sender, body.clone());

        assert_eq!(
            peer_rx.recv().await,
            Some(HubEvent::ReceiveMessage { from: sender_identity.id, body })
        );
        assert!(sender_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn events_for_one_order_arrive_in_publish_order() {
        let hub = BroadcastHub::new();
        let order_id = Uuid::new_v4();

        let (subscriber, mut rx) = hub.connect(identity(Role::Customer));
        hub.subscribe(subscriber, Topic::Order(order_id));

        for status in [OrderStatus::Assigned, OrderStatus::Delivering, OrderStatus::Delivered] {
            hub.publish_order_event(order_id, HubEvent::OrderStatus { order_id, status });
        }

        for status in [OrderStatus::Assigned, OrderStatus::Delivering, OrderStatus::Delivered] {
            assert_eq!(
                rx.recv().await,
                Some(HubEvent::OrderStatus { order_id, status })
            );
        }
    }

    #[tokio::test]
    async fn dead_connections_are_reaped_on_publish() {
        let hub = BroadcastHub::new();
        let order_id = Uuid::new_v4();

        let (subscriber, rx) = hub.connect(identity(Role::Customer));
        hub.subscribe(subscriber, Topic::Order(order_id));
        drop(rx);

        hub.publish_order_event(order_id, status_event(order_id));
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let hub = BroadcastHub::new();
        let (connection_id, _rx) = hub.connect(identity(Role::Customer));

        hub.disconnect(connection_id);
        hub.disconnect(connection_id);
        hub.disconnect(Uuid::new_v4());

        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn one_identity_may_hold_multiple_connections() {
        let hub = BroadcastHub::new();
        let same = identity(Role::Customer);
        let order_id = Uuid::new_v4();

        let (first, mut first_rx) = hub.connect(same);
        let (second, mut second_rx) = hub.connect(same);
        hub.subscribe(first, Topic::Order(order_id));
        hub.subscribe(second, Topic::Order(order_id));

        hub.publish_order_event(order_id, status_event(order_id));

        assert_eq!(first_rx.recv().await, Some(status_event(order_id)));
        assert_eq!(second_rx.recv().await, Some(status_event(order_id)));
    }
}
