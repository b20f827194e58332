use serde::Serialize;
use uuid::Uuid;

use crate::models::order::{Coordinates, OrderStatus};

/// Events fanned out to live subscribers. Best effort only: a subscriber
/// that is offline when an event fires never sees it.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    OrderStatus {
        order_id: Uuid,
        status: OrderStatus,
    },
    LocationUpdate {
        order_id: Uuid,
        worker_id: Uuid,
        location: Coordinates,
    },
    ReceiveMessage {
        from: Uuid,
        body: serde_json::Value,
    },
}
