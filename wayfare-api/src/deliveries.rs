use axum::{
    extract::{Path, State},
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use wayfare_core::users::UserRole;
use wayfare_core::EngineError;
use wayfare_delivery::models::{DeliveryDraft, DeliveryRequest, DeliveryStatus};
use wayfare_shared::models::events::{DeliveryStatusChangedEvent, EngineEvent};
use wayfare_shared::pii::Masked;
use wayfare_shared::{DeliveryRequestId, TripId};

use crate::error::ApiError;
use crate::middleware::auth::AuthUser;
use crate::state::AppState;
use crate::trips::TripResponse;

#[derive(Debug, Serialize)]
pub struct DeliveryResponse {
    pub id: DeliveryRequestId,
    pub sender_id: Uuid,
    pub receiver_phone: Masked<String>,
    pub origin: String,
    pub dropoff: String,
    pub weight_kg: f64,
    pub description: String,
    pub price: Decimal,
    pub status: DeliveryStatus,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub trip_id: Option<TripId>,
    pub notes: Option<String>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<DeliveryRequest> for DeliveryResponse {
    fn from(r: DeliveryRequest) -> Self {
        Self {
            id: r.id,
            sender_id: r.sender_id,
            receiver_phone: r.receiver_phone,
            origin: r.origin,
            dropoff: r.dropoff,
            weight_kg: r.weight_kg,
            description: r.description,
            price: r.price,
            status: r.status,
            window_start: r.window_start,
            window_end: r.window_end,
            trip_id: r.trip_id,
            notes: r.notes,
            accepted_at: r.accepted_at,
            picked_up_at: r.picked_up_at,
            delivered_at: r.delivered_at,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SelectTripRequest {
    pub trip_id: TripId,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AcceptRequest {
    pub trip_id: TripId,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SweepResponse {
    pub swept: usize,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/deliveries", post(create_request).get(list_requests))
        .route("/v1/deliveries/sweep", post(sweep))
        .route("/v1/deliveries/{id}", get(get_request))
        .route("/v1/deliveries/{id}/matching-trips", get(matching_trips))
        .route("/v1/deliveries/{id}/select-trip", post(select_trip))
        .route("/v1/deliveries/{id}/accept", post(accept))
        .route("/v1/deliveries/{id}/reject", post(reject))
        .route("/v1/deliveries/{id}/status", post(update_status))
        .route("/v1/deliveries/{id}/cancel", post(cancel))
}

/// Opportunistic sweep ahead of reads that expose pending requests.
async fn sweep_before_read(state: &AppState) -> Result<(), ApiError> {
    if state.deliveries.rules().sweep_on_read {
        let swept = state.sweeper.sweep().await?;
        state.metrics.requests_expired.inc_by(swept as u64);
    }
    Ok(())
}

fn status_changed(
    state: &AppState,
    request: &DeliveryRequest,
    from: DeliveryStatus,
) -> EngineEvent {
    EngineEvent::DeliveryStatusChanged(DeliveryStatusChangedEvent {
        request_id: request.id,
        trip_id: request.trip_id,
        from: from.as_str().to_string(),
        to: request.status.as_str().to_string(),
        timestamp: state.clock.now().timestamp(),
    })
}

async fn create_request(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(draft): Json<DeliveryDraft>,
) -> Result<Json<DeliveryResponse>, ApiError> {
    let request = state.deliveries.create_request(user.id, draft).await?;
    Ok(Json(request.into()))
}

async fn list_requests(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<DeliveryResponse>>, ApiError> {
    sweep_before_read(&state).await?;
    let requests = match user.role {
        UserRole::Passenger => state.deliveries.list_for_sender(user.id).await?,
        UserRole::Driver => state.deliveries.list_for_driver(user.id).await?,
    };
    Ok(Json(requests.into_iter().map(Into::into).collect()))
}

async fn get_request(
    State(state): State<AppState>,
    Path(request_id): Path<DeliveryRequestId>,
) -> Result<Json<DeliveryResponse>, ApiError> {
    let request = state.deliveries.get_request(request_id).await?;
    Ok(Json(request.into()))
}

async fn matching_trips(
    State(state): State<AppState>,
    Path(request_id): Path<DeliveryRequestId>,
) -> Result<Json<Vec<TripResponse>>, ApiError> {
    sweep_before_read(&state).await?;
    let trips = state.deliveries.matching_trips(request_id).await?;
    Ok(Json(trips.iter().map(TripResponse::summary).collect()))
}

async fn select_trip(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(request_id): Path<DeliveryRequestId>,
    Json(req): Json<SelectTripRequest>,
) -> Result<Json<DeliveryResponse>, ApiError> {
    let before = state.deliveries.get_request(request_id).await?.status;
    let request = state
        .deliveries
        .select_trip(user.id, request_id, req.trip_id, req.notes)
        .await?;
    state.events.publish(status_changed(&state, &request, before));
    Ok(Json(request.into()))
}

async fn accept(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(request_id): Path<DeliveryRequestId>,
    Json(req): Json<AcceptRequest>,
) -> Result<Json<DeliveryResponse>, ApiError> {
    let before = state.deliveries.get_request(request_id).await?.status;
    let request = state
        .deliveries
        .accept(user.id, request_id, req.trip_id)
        .await?;
    state.metrics.deliveries_accepted.inc();
    state.events.publish(status_changed(&state, &request, before));
    Ok(Json(request.into()))
}

async fn reject(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(request_id): Path<DeliveryRequestId>,
) -> Result<Json<DeliveryResponse>, ApiError> {
    let before = state.deliveries.get_request(request_id).await?.status;
    let request = state.deliveries.reject(user.id, request_id).await?;
    state.events.publish(status_changed(&state, &request, before));
    Ok(Json(request.into()))
}

async fn update_status(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(request_id): Path<DeliveryRequestId>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<DeliveryResponse>, ApiError> {
    let new_status = DeliveryStatus::parse(&req.status).ok_or_else(|| {
        EngineError::validation(format!("unknown delivery status: {}", req.status))
    })?;

    let before = state.deliveries.get_request(request_id).await?.status;
    let request = state
        .deliveries
        .update_status(user.id, request_id, new_status, req.notes)
        .await?;
    if request.status == DeliveryStatus::Delivered {
        state.metrics.deliveries_delivered.inc();
    }
    state.events.publish(status_changed(&state, &request, before));
    Ok(Json(request.into()))
}

async fn cancel(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(request_id): Path<DeliveryRequestId>,
) -> Result<Json<DeliveryResponse>, ApiError> {
    let before = state.deliveries.get_request(request_id).await?.status;
    let request = state.deliveries.cancel(user.id, request_id).await?;
    state.events.publish(status_changed(&state, &request, before));
    Ok(Json(request.into()))
}

/// Operator-triggered sweep.
async fn sweep(State(state): State<AppState>) -> Result<Json<SweepResponse>, ApiError> {
    let swept = state.sweeper.sweep().await?;
    state.metrics.requests_expired.inc_by(swept as u64);
    Ok(Json(SweepResponse { swept }))
}
