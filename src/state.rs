use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::hub::BroadcastHub;
use crate::models::order::Order;
use crate::models::worker::DeliveryWorker;
use crate::observability::metrics::Metrics;

pub struct AppState {
    pub workers: DashMap<Uuid, DeliveryWorker>,
    /// Lowercased email -> worker id; the entry API makes duplicate
    /// registration checks atomic.
    pub worker_emails: DashMap<String, Uuid>,
    pub orders: DashMap<Uuid, Order>,
    pub order_tx: mpsc::Sender<Uuid>,
    pub hub: BroadcastHub,
    pub metrics: Metrics,
    pub bcrypt_cost: u32,
}

impl AppState {
    pub fn new(order_queue_size: usize, bcrypt_cost: u32) -> (Self, mpsc::Receiver<Uuid>) {
        let (order_tx, order_rx) = mpsc::channel(order_queue_size);

        (
            Self {
                workers: DashMap::new(),
                worker_emails: DashMap::new(),
                orders: DashMap::new(),
                order_tx,
                hub: BroadcastHub::new(),
                metrics: Metrics::new(),
                bcrypt_cost,
            },
            order_rx,
        )
    }
}
