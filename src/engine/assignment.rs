//! Assignment resolver: binds placed orders to available workers and drives
//! the order status state machine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::{authorize, Action, Identity, Role};
use crate::engine::queue::enqueue_order;
use crate::engine::selection::{pick, Candidate};
use crate::error::AppError;
use crate::models::event::HubEvent;
use crate::models::order::{Order, OrderStatus};
use crate::models::worker::{Availability, DeliveryRecord};
use crate::registry;
use crate::state::AppState;

/// Completion payload reported by the assigned worker.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryReport {
    pub rating: Option<u8>,
    #[serde(default)]
    pub tip: f64,
    pub earnings: f64,
    pub comment: Option<String>,
}

/// Drains the placed-order queue. `NoWorkersAvailable` is transient: the
/// order is requeued after a short pause rather than dropped.
pub async fn run_assignment_engine(
    state: Arc<AppState>,
    mut order_rx: mpsc::Receiver<Uuid>,
    retry_delay: Duration,
) {
    info!("assignment engine started");

    while let Some(order_id) = order_rx.recv().await {
        state.metrics.orders_in_queue.dec();

        let start = Instant::now();
        let outcome = match assign_order(&state, order_id) {
            Ok(_) => "success",
            Err(AppError::NoWorkersAvailable) => {
                warn!(%order_id, "no workers available; re-queueing order");
                sleep(retry_delay).await;
                if let Err(err) = enqueue_order(&state, order_id).await {
                    error!(%order_id, error = %err, "failed to re-queue order");
                }
                "retry"
            }
            // The order was assigned or cancelled through the API while it
            // sat in the queue.
            Err(AppError::InvalidTransition(_)) => {
                debug!(%order_id, "order no longer placed; skipping");
                "skipped"
            }
            Err(err) => {
                error!(%order_id, error = %err, "failed to assign order");
                "error"
            }
        };

        state
            .metrics
            .assignment_latency_seconds
            .with_label_values(&[outcome])
            .observe(start.elapsed().as_secs_f64());
        state
            .metrics
            .assignments_total
            .with_label_values(&[outcome])
            .inc();
    }

    warn!("assignment engine stopped: queue channel closed");
}

/// Binds a placed order to exactly one available worker. Fails with
/// `NoWorkersAvailable` (order untouched) when the pool is empty; the
/// status check and transition run under one order-entry borrow, so a
/// concurrent attempt sees `InvalidTransition` instead of double-binding.
pub fn assign_order(state: &AppState, order_id: Uuid) -> Result<Order, AppError> {
    {
        let order = state
            .orders
            .get(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {} not found", order_id)))?;
        if order.status != OrderStatus::Placed {
            return Err(AppError::InvalidTransition(
                "only a placed order can be assigned".to_string(),
            ));
        }
    }

    let mut active_loads: HashMap<Uuid, usize> = HashMap::new();
    for entry in state.orders.iter() {
        if entry.status.is_active() {
            if let Some(worker_id) = entry.assigned_to {
                *active_loads.entry(worker_id).or_default() += 1;
            }
        }
    }

    let candidates: Vec<Candidate> = state
        .workers
        .iter()
        .filter_map(|entry| {
            let worker = entry.value();
            let active_deliveries = active_loads.get(&worker.id).copied().unwrap_or(0);
            let eligible =
                worker.availability == Availability::Available && active_deliveries == 0;

            eligible.then(|| Candidate {
                worker_id: worker.id,
                active_deliveries,
                registered_at: worker.registered_at,
            })
        })
        .collect();

    if candidates.is_empty() {
        return Err(AppError::NoWorkersAvailable);
    }

    let worker_id =
        pick(&candidates).ok_or_else(|| AppError::Internal("selection failed".to_string()))?;

    let updated = {
        let mut order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {} not found", order_id)))?;

        if order.status != OrderStatus::Placed {
            return Err(AppError::InvalidTransition(
                "only a placed order can be assigned".to_string(),
            ));
        }

        order.status = OrderStatus::Assigned;
        order.assigned_to = Some(worker_id);
        order.clone()
    };

    if let Some(mut worker) = state.workers.get_mut(&worker_id) {
        worker.availability = Availability::Busy;
    }

    publish_status(state, &updated);
    info!(%order_id, %worker_id, "order assigned");

    Ok(updated)
}

/// `assigned -> delivering`, by the assigned worker only.
pub fn mark_pickup(
    state: &AppState,
    identity: &Identity,
    order_id: Uuid,
) -> Result<Order, AppError> {
    let updated = {
        let mut order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {} not found", order_id)))?;

        authorize(identity, Action::MarkPickup { order: &order })?;
        if order.status != OrderStatus::Assigned {
            return Err(AppError::InvalidTransition(
                "pickup requires an assigned order".to_string(),
            ));
        }

        order.status = OrderStatus::Delivering;
        order.clone()
    };

    publish_status(state, &updated);
    Ok(updated)
}

/// `delivering -> delivered`, by the assigned worker only. Records the
/// delivery against the worker's history, which also recomputes aggregates
/// and re-derives availability.
pub fn mark_delivered(
    state: &AppState,
    identity: &Identity,
    order_id: Uuid,
    report: DeliveryReport,
) -> Result<Order, AppError> {
    if let Some(rating) = report.rating {
        if !(1..=5).contains(&rating) {
            return Err(AppError::Validation("rating must be between 1 and 5".to_string()));
        }
    }
    if report.tip < 0.0 || report.earnings < 0.0 {
        return Err(AppError::Validation(
            "tip and earnings must not be negative".to_string(),
        ));
    }

    let delivered_at = Utc::now();
    let (updated, record) = {
        let mut order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {} not found", order_id)))?;

        authorize(identity, Action::MarkDelivered { order: &order })?;
        if order.status != OrderStatus::Delivering {
            return Err(AppError::InvalidTransition(
                "completion requires an order in delivering".to_string(),
            ));
        }

        order.status = OrderStatus::Delivered;
        order.delivered_at = Some(delivered_at);

        let record = DeliveryRecord {
            order_id,
            order_placed_at: order.created_at,
            rating: report.rating,
            tip: report.tip,
            earnings: report.earnings,
            comment: report.comment,
            delivered_at,
        };
        (order.clone(), record)
    };

    registry::record_delivery(state, identity.id, record)?;

    publish_status(state, &updated);
    info!(%order_id, worker_id = %identity.id, "order delivered");
    Ok(updated)
}

/// Cancellation: admins may cancel placed or assigned orders, the placing
/// customer only while still placed. Anything past assigned is final.
pub fn cancel_order(
    state: &AppState,
    identity: &Identity,
    order_id: Uuid,
) -> Result<Order, AppError> {
    let (updated, previous_assignee) = {
        let mut order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {} not found", order_id)))?;

        authorize(identity, Action::CancelOrder { order: &order })?;

        match order.status {
            OrderStatus::Placed => {}
            OrderStatus::Assigned if identity.role == Role::Admin => {}
            OrderStatus::Assigned => {
                return Err(AppError::Forbidden(
                    "order is already assigned to a worker".to_string(),
                ));
            }
            _ => {
                return Err(AppError::InvalidTransition(
                    "order can no longer be cancelled".to_string(),
                ));
            }
        }

        let previous_assignee = order.assigned_to.take();
        order.status = OrderStatus::Cancelled;
        (order.clone(), previous_assignee)
    };

    // A freed worker goes back into the pool unless another active order
    // still binds it.
    if let Some(worker_id) = previous_assignee {
        if let Some(mut worker) = state.workers.get_mut(&worker_id) {
            worker.availability = if registry::has_active_assignment(state, worker_id) {
                Availability::Busy
            } else {
                Availability::Available
            };
        }
    }

    publish_status(state, &updated);
    info!(%order_id, "order cancelled");
    Ok(updated)
}

/// Status fan-out is best effort; the hub never fails the transition.
fn publish_status(state: &AppState, order: &Order) {
    state.hub.publish_order_event(
        order.id,
        HubEvent::OrderStatus {
            order_id: order.id,
            status: order.status,
        },
    );
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::models::worker::DeliveryWorker;

    fn state() -> AppState {
        AppState::new(8, 4).0
    }

    fn insert_worker(state: &AppState, name: &str) -> Uuid {
        let worker = DeliveryWorker::new(
            name.to_string(),
            format!("{}@example.com", name.to_lowercase()),
            "555-0101".to_string(),
            "not-a-real-hash".to_string(),
        );
        let id = worker.id;
        state.workers.insert(id, worker);
        id
    }

    fn place_order(state: &AppState, customer_id: Uuid) -> Uuid {
        let order = Order {
            id: Uuid::new_v4(),
            customer_id,
            delivery_charge: 5.0,
            status: OrderStatus::Placed,
            assigned_to: None,
            created_at: Utc::now(),
            delivered_at: None,
            last_location: None,
        };
        let id = order.id;
        state.orders.insert(id, order);
        id
    }

    fn delivery(id: Uuid) -> Identity {
        Identity { id, role: Role::Delivery }
    }

    fn report() -> DeliveryReport {
        DeliveryReport { rating: Some(5), tip: 2.0, earnings: 8.0, comment: None }
    }

    #[test]
    fn assignment_binds_the_order_and_marks_the_worker_busy() {
        let state = state();
        let worker_id = insert_worker(&state, "Ravi");
        let order_id = place_order(&state, Uuid::new_v4());

        let order = assign_order(&state, order_id).unwrap();

        assert_eq!(order.status, OrderStatus::Assigned);
        assert_eq!(order.assigned_to, Some(worker_id));
        assert_eq!(
            state.workers.get(&worker_id).unwrap().availability,
            Availability::Busy
        );
    }

    #[test]
    fn no_workers_leaves_the_order_placed() {
        let state = state();
        let order_id = place_order(&state, Uuid::new_v4());

        let result = assign_order(&state, order_id);

        assert!(matches!(result, Err(AppError::NoWorkersAvailable)));
        assert_eq!(state.orders.get(&order_id).unwrap().status, OrderStatus::Placed);
    }

    #[test]
    fn second_assignment_attempt_conflicts() {
        let state = state();
        insert_worker(&state, "Ravi");
        insert_worker(&state, "Meena");
        let order_id = place_order(&state, Uuid::new_v4());

        let first = assign_order(&state, order_id).unwrap();
        let second = assign_order(&state, order_id);

        assert!(matches!(second, Err(AppError::InvalidTransition(_))));
        assert_eq!(state.orders.get(&order_id).unwrap().assigned_to, first.assigned_to);
    }

    #[test]
    fn busy_worker_is_skipped_for_the_next_order() {
        let state = state();
        let first_worker = insert_worker(&state, "Ravi");
        let second_worker = insert_worker(&state, "Meena");

        // Seniority is decided by registration time, so order the two
        // explicitly for a deterministic expectation.
        state.workers.get_mut(&first_worker).unwrap().registered_at =
            Utc::now() - chrono::Duration::hours(1);

        let first_order = place_order(&state, Uuid::new_v4());
        let second_order = place_order(&state, Uuid::new_v4());

        assert_eq!(assign_order(&state, first_order).unwrap().assigned_to, Some(first_worker));
        assert_eq!(assign_order(&state, second_order).unwrap().assigned_to, Some(second_worker));
    }

    #[test]
    fn pickup_requires_the_assigned_worker() {
        let state = state();
        let worker_id = insert_worker(&state, "Ravi");
        let order_id = place_order(&state, Uuid::new_v4());
        assign_order(&state, order_id).unwrap();

        let intruder = delivery(Uuid::new_v4());
        assert!(matches!(
            mark_pickup(&state, &intruder, order_id),
            Err(AppError::Forbidden(_))
        ));

        let order = mark_pickup(&state, &delivery(worker_id), order_id).unwrap();
        assert_eq!(order.status, OrderStatus::Delivering);
    }

    #[test]
    fn completed_delivery_feeds_worker_history_and_frees_the_worker() {
        let state = state();
        let worker_id = insert_worker(&state, "Ravi");
        let order_id = place_order(&state, Uuid::new_v4());
        assign_order(&state, order_id).unwrap();
        mark_pickup(&state, &delivery(worker_id), order_id).unwrap();

        let order = mark_delivered(&state, &delivery(worker_id), order_id, report()).unwrap();

        assert_eq!(order.status, OrderStatus::Delivered);
        assert!(order.delivered_at.is_some());

        let worker = state.workers.get(&worker_id).unwrap();
        assert_eq!(worker.performance.total_deliveries, 1);
        assert_eq!(worker.earnings.total, 10.0);
        assert_eq!(worker.availability, Availability::Available);
    }

    #[test]
    fn delivered_is_terminal() {
        let state = state();
        let worker_id = insert_worker(&state, "Ravi");
        let order_id = place_order(&state, Uuid::new_v4());
        assign_order(&state, order_id).unwrap();
        mark_pickup(&state, &delivery(worker_id), order_id).unwrap();
        mark_delivered(&state, &delivery(worker_id), order_id, report()).unwrap();

        let again = mark_delivered(&state, &delivery(worker_id), order_id, report());
        assert!(matches!(again, Err(AppError::InvalidTransition(_))));
    }

    #[test]
    fn invalid_report_values_are_rejected() {
        let state = state();
        let worker_id = insert_worker(&state, "Ravi");
        let order_id = place_order(&state, Uuid::new_v4());
        assign_order(&state, order_id).unwrap();
        mark_pickup(&state, &delivery(worker_id), order_id).unwrap();

        let bad_rating = DeliveryReport { rating: Some(6), ..report() };
        assert!(matches!(
            mark_delivered(&state, &delivery(worker_id), order_id, bad_rating),
            Err(AppError::Validation(_))
        ));

        let negative_tip = DeliveryReport { tip: -1.0, ..report() };
        assert!(matches!(
            mark_delivered(&state, &delivery(worker_id), order_id, negative_tip),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn admin_cancellation_frees_the_worker_for_reassignment() {
        let state = state();
        let worker_id = insert_worker(&state, "Ravi");
        let order_id = place_order(&state, Uuid::new_v4());
        assign_order(&state, order_id).unwrap();

        let admin = Identity { id: Uuid::new_v4(), role: Role::Admin };
        let cancelled = cancel_order(&state, &admin, order_id).unwrap();

        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(cancelled.assigned_to, None);
        assert_eq!(
            state.workers.get(&worker_id).unwrap().availability,
            Availability::Available
        );

        // A fresh cycle picks the freed worker again.
        let next_order = place_order(&state, Uuid::new_v4());
        assert_eq!(assign_order(&state, next_order).unwrap().assigned_to, Some(worker_id));
    }

    #[test]
    fn customer_cannot_cancel_once_assigned() {
        let state = state();
        insert_worker(&state, "Ravi");
        let customer_id = Uuid::new_v4();
        let order_id = place_order(&state, customer_id);
        assign_order(&state, order_id).unwrap();

        let customer = Identity { id: customer_id, role: Role::Customer };
        assert!(matches!(
            cancel_order(&state, &customer, order_id),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn delivering_orders_cannot_be_cancelled() {
        let state = state();
        let worker_id = insert_worker(&state, "Ravi");
        let order_id = place_order(&state, Uuid::new_v4());
        assign_order(&state, order_id).unwrap();
        mark_pickup(&state, &delivery(worker_id), order_id).unwrap();

        let admin = Identity { id: Uuid::new_v4(), role: Role::Admin };
        assert!(matches!(
            cancel_order(&state, &admin, order_id),
            Err(AppError::InvalidTransition(_))
        ));
    }
}
