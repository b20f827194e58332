use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Placed,
    Assigned,
    Delivering,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// An active status keeps the assigned worker busy.
    pub fn is_active(&self) -> bool {
        matches!(self, OrderStatus::Assigned | OrderStatus::Delivering)
    }
}

/// Assignment-relevant view of an order. The wider platform owns the rest
/// (items, totals, payment); this store is the single writer of `status`
/// and `assigned_to`.
///
/// Invariant: `assigned_to` is `Some` exactly when status is assigned,
/// delivering or delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub delivery_charge: f64,
    pub status: OrderStatus,
    pub assigned_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    /// Last reported worker position, kept for late subscribers to poll.
    pub last_location: Option<Coordinates>,
}
