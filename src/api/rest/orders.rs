use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{authorize, Action, Identity};
use crate::engine::assignment::{
    assign_order, cancel_order, mark_delivered, mark_pickup, DeliveryReport,
};
use crate::engine::queue::enqueue_order;
use crate::error::AppError;
use crate::hub::publish_location_update;
use crate::models::order::{Coordinates, Order, OrderStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(place_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/assign", post(assign))
        .route("/orders/:id/pickup", post(pickup))
        .route("/orders/:id/deliver", post(deliver))
        .route("/orders/:id/cancel", post(cancel))
        .route("/orders/:id/location", put(update_location))
}

#[derive(Deserialize)]
pub struct PlaceOrderRequest {
    #[serde(default)]
    pub delivery_charge: f64,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Serialize)]
pub struct LocationResponse {
    pub message: &'static str,
    pub location: Coordinates,
}

async fn place_order(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(payload): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    authorize(&identity, Action::PlaceOrder)?;

    if payload.delivery_charge < 0.0 {
        return Err(AppError::Validation(
            "delivery charge must not be negative".to_string(),
        ));
    }

    let order = Order {
        id: Uuid::new_v4(),
        customer_id: identity.id,
        delivery_charge: payload.delivery_charge,
        status: OrderStatus::Placed,
        assigned_to: None,
        created_at: Utc::now(),
        delivered_at: None,
        last_location: None,
    };

    state.orders.insert(order.id, order.clone());
    enqueue_order(&state, order.id).await?;

    Ok((StatusCode::CREATED, Json(order)))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .orders
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("order {} not found", id)))?;

    authorize(&identity, Action::ViewOrder { order: &order })?;
    Ok(Json(order.value().clone()))
}

async fn assign(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    authorize(&identity, Action::AssignOrder)?;
    Ok(Json(assign_order(&state, id)?))
}

async fn pickup(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(mark_pickup(&state, &identity, id)?))
}

async fn deliver(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(report): Json<DeliveryReport>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(mark_delivered(&state, &identity, id, report)?))
}

async fn cancel(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(cancel_order(&state, &identity, id)?))
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<LocationResponse>, AppError> {
    let (Some(latitude), Some(longitude)) = (payload.latitude, payload.longitude) else {
        return Err(AppError::Validation(
            "location coordinates are required".to_string(),
        ));
    };

    let location = publish_location_update(
        &state,
        &identity,
        id,
        Coordinates { latitude, longitude },
    )?;

    Ok(Json(LocationResponse {
        message: "location updated",
        location,
    }))
}
