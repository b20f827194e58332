//! Delivery registry: source of truth for worker identity, availability and
//! the aggregate stats derived from delivery history.

use dashmap::mapref::entry::Entry;
use tracing::info;
use uuid::Uuid;

use crate::auth::{authorize, Action, Identity};
use crate::error::AppError;
use crate::models::worker::{recompute, Availability, DeliveryRecord, DeliveryWorker};
use crate::state::AppState;

const MIN_PASSWORD_LENGTH: usize = 6;

/// Registers a new delivery worker. The email is the unique identity key
/// and is matched case-insensitively.
pub fn register_worker(
    state: &AppState,
    name: &str,
    email: &str,
    password: &str,
    phone: &str,
) -> Result<DeliveryWorker, AppError> {
    if [name, email, password, phone].iter().any(|field| field.trim().is_empty()) {
        return Err(AppError::Validation("all fields are required".to_string()));
    }

    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AppError::WeakCredential);
    }

    let email = email.trim().to_lowercase();
    let password_hash = bcrypt::hash(password, state.bcrypt_cost)
        .map_err(|err| AppError::Internal(format!("failed to hash credential: {err}")))?;

    let worker = DeliveryWorker::new(
        name.trim().to_string(),
        email.clone(),
        phone.trim().to_string(),
        password_hash,
    );

    // The email index entry is the atomicity point for duplicate checks.
    match state.worker_emails.entry(email) {
        Entry::Occupied(_) => return Err(AppError::DuplicateIdentity),
        Entry::Vacant(slot) => {
            slot.insert(worker.id);
        }
    }
    state.workers.insert(worker.id, worker.clone());

    info!(worker_id = %worker.id, "delivery worker registered");
    Ok(worker)
}

/// Credential check. Unknown email and wrong password are deliberately
/// indistinguishable to the caller.
pub fn authenticate(
    state: &AppState,
    email: &str,
    password: &str,
) -> Result<DeliveryWorker, AppError> {
    let email = email.trim().to_lowercase();
    let worker_id = state
        .worker_emails
        .get(&email)
        .map(|entry| *entry.value())
        .ok_or(AppError::InvalidCredentials)?;

    let worker = state
        .workers
        .get(&worker_id)
        .ok_or(AppError::InvalidCredentials)?;

    let matches = bcrypt::verify(password, &worker.password_hash)
        .map_err(|_| AppError::InvalidCredentials)?;
    if !matches {
        return Err(AppError::InvalidCredentials);
    }

    Ok(worker.clone())
}

/// True while any order bound to this worker is still being worked.
pub fn has_active_assignment(state: &AppState, worker_id: Uuid) -> bool {
    state
        .orders
        .iter()
        .any(|entry| entry.assigned_to == Some(worker_id) && entry.status.is_active())
}

/// A worker is eligible for assignment only when its own flag says so and
/// no active order is bound to it. The flag alone is never trusted.
pub fn is_available(state: &AppState, worker: &DeliveryWorker) -> bool {
    worker.availability == Availability::Available && !has_active_assignment(state, worker.id)
}

/// Direct availability toggle, restricted to the worker itself or an admin.
/// A toggle may not contradict an active assignment.
pub fn set_availability(
    state: &AppState,
    identity: &Identity,
    worker_id: Uuid,
    availability: Availability,
) -> Result<DeliveryWorker, AppError> {
    authorize(identity, Action::ToggleAvailability { worker_id })?;

    let mut worker = state
        .workers
        .get_mut(&worker_id)
        .ok_or_else(|| AppError::NotFound(format!("worker {} not found", worker_id)))?;

    if availability == Availability::Available && has_active_assignment(state, worker_id) {
        return Err(AppError::InvalidTransition(
            "worker has an active delivery".to_string(),
        ));
    }

    worker.availability = availability;
    Ok(worker.clone())
}

/// Appends a delivery record and recomputes every aggregate group from the
/// full history. Append and recompute happen under one map-entry borrow, so
/// two concurrent calls for the same worker cannot race the recomputation.
/// At most one record may exist per order.
pub fn record_delivery(
    state: &AppState,
    worker_id: Uuid,
    record: DeliveryRecord,
) -> Result<DeliveryWorker, AppError> {
    let worker = {
        let mut worker = state
            .workers
            .get_mut(&worker_id)
            .ok_or_else(|| AppError::NotFound(format!("worker {} not found", worker_id)))?;

        if worker.has_delivered(record.order_id) {
            return Err(AppError::DuplicateDelivery);
        }

        let order_id = record.order_id;
        worker.deliveries.push(record);
        let snapshot = recompute(&worker.deliveries);
        worker.apply_snapshot(snapshot);

        // Availability is re-derived from the active-assignment query after
        // every delivery event, never taken from the stored flag.
        worker.availability = if has_active_assignment(state, worker_id) {
            Availability::Busy
        } else {
            Availability::Available
        };

        info!(
            %worker_id,
            %order_id,
            total_deliveries = worker.performance.total_deliveries,
            "delivery recorded"
        );
        worker.clone()
    };

    state.metrics.deliveries_recorded_total.inc();
    Ok(worker)
}
