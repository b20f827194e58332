use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{authorize, issue_token, Action, Identity};
use crate::error::AppError;
use crate::models::worker::{
    Availability, DeliveryRecord, DeliveryWorker, Earnings, Performance, Ratings,
};
use crate::registry;
use crate::state::AppState;

const RECENT_DELIVERIES_SHOWN: usize = 10;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/workers/register", post(register))
        .route("/workers/login", post(login))
        .route("/workers", get(list_workers))
        .route("/workers/:id/status", put(update_status))
        .route("/workers/:id", get(worker_details))
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub phone: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: Availability,
}

#[derive(Serialize)]
pub struct WorkerSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub availability: Availability,
}

impl From<&DeliveryWorker> for WorkerSummary {
    fn from(worker: &DeliveryWorker) -> Self {
        Self {
            id: worker.id,
            name: worker.name.clone(),
            email: worker.email.clone(),
            phone: worker.phone.clone(),
            availability: worker.availability,
        }
    }
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub worker: WorkerSummary,
}

#[derive(Serialize)]
pub struct Statistics {
    pub earnings: Earnings,
    pub ratings: Ratings,
    pub performance: Performance,
}

#[derive(Serialize)]
pub struct WorkerDetails {
    #[serde(flatten)]
    pub worker: WorkerSummary,
    pub statistics: Statistics,
    pub recent_deliveries: Vec<DeliveryRecord>,
}

async fn register(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    authorize(&identity, Action::RegisterWorker)?;

    let worker = registry::register_worker(
        &state,
        &payload.name,
        &payload.email,
        &payload.password,
        &payload.phone,
    )?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token: issue_token(),
            worker: WorkerSummary::from(&worker),
        }),
    ))
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let worker = registry::authenticate(&state, &payload.email, &payload.password)?;

    Ok(Json(AuthResponse {
        token: issue_token(),
        worker: WorkerSummary::from(&worker),
    }))
}

async fn list_workers(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<Vec<WorkerSummary>>, AppError> {
    authorize(&identity, Action::ListWorkers)?;

    let workers = state
        .workers
        .iter()
        .map(|entry| WorkerSummary::from(entry.value()))
        .collect();
    Ok(Json(workers))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<WorkerSummary>, AppError> {
    let worker = registry::set_availability(&state, &identity, id, payload.status)?;
    Ok(Json(WorkerSummary::from(&worker)))
}

async fn worker_details(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkerDetails>, AppError> {
    authorize(&identity, Action::ViewWorker { worker_id: id })?;

    let worker = state
        .workers
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("worker {} not found", id)))?;

    let mut recent_deliveries = worker.deliveries.clone();
    recent_deliveries.sort_by(|a, b| b.delivered_at.cmp(&a.delivered_at));
    recent_deliveries.truncate(RECENT_DELIVERIES_SHOWN);

    Ok(Json(WorkerDetails {
        worker: WorkerSummary::from(worker.value()),
        statistics: Statistics {
            earnings: worker.earnings,
            ratings: worker.ratings,
            performance: worker.performance,
        },
        recent_deliveries,
    }))
}
