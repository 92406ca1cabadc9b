use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use wayfare_core::repository::{StoreError, StoreResult, VersionConflict};
use wayfare_delivery::models::{DeliveryRequest, DeliveryStatus};
use wayfare_delivery::repository::{DeliveryFilter, DeliveryRequestRepository};
use wayfare_shared::pii::Masked;
use wayfare_shared::DeliveryRequestId;

pub struct PostgresDeliveryRepository {
    pub pool: PgPool,
}

impl PostgresDeliveryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct RequestRow {
    id: i64,
    sender_id: Uuid,
    receiver_phone: String,
    origin: String,
    dropoff: String,
    weight_kg: f64,
    description: String,
    price: Decimal,
    status: String,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    trip_id: Option<i64>,
    notes: Option<String>,
    accepted_at: Option<DateTime<Utc>>,
    picked_up_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    version: i64,
    created_at: DateTime<Utc>,
}

const REQUEST_COLUMNS: &str = "id, sender_id, receiver_phone, origin, dropoff, weight_kg, \
     description, price, status, window_start, window_end, trip_id, notes, accepted_at, \
     picked_up_at, delivered_at, version, created_at";

impl RequestRow {
    fn into_request(self) -> StoreResult<DeliveryRequest> {
        let status = DeliveryStatus::parse(&self.status)
            .ok_or_else(|| -> StoreError {
                format!("unknown delivery status in store: {}", self.status).into()
            })?;
        Ok(DeliveryRequest {
            id: self.id,
            sender_id: self.sender_id,
            receiver_phone: Masked(self.receiver_phone),
            origin: self.origin,
            dropoff: self.dropoff,
            weight_kg: self.weight_kg,
            description: self.description,
            price: self.price,
            status,
            window_start: self.window_start,
            window_end: self.window_end,
            trip_id: self.trip_id,
            notes: self.notes,
            accepted_at: self.accepted_at,
            picked_up_at: self.picked_up_at,
            delivered_at: self.delivered_at,
            version: self.version,
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl DeliveryRequestRepository for PostgresDeliveryRepository {
    async fn get_request(&self, id: DeliveryRequestId) -> StoreResult<Option<DeliveryRequest>> {
        let row = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM delivery_requests WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(RequestRow::into_request).transpose()
    }

    async fn create_request(&self, mut request: DeliveryRequest) -> StoreResult<DeliveryRequest> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO delivery_requests (sender_id, receiver_phone, origin, dropoff, \
             weight_kg, description, price, status, window_start, window_end, version, \
             created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 1, $11) RETURNING id",
        )
        .bind(request.sender_id)
        .bind(&request.receiver_phone.0)
        .bind(&request.origin)
        .bind(&request.dropoff)
        .bind(request.weight_kg)
        .bind(&request.description)
        .bind(request.price)
        .bind(request.status.as_str())
        .bind(request.window_start)
        .bind(request.window_end)
        .bind(request.created_at)
        .fetch_one(&self.pool)
        .await?;

        request.id = id;
        request.version = 1;
        Ok(request)
    }

    async fn save_request(&self, request: &DeliveryRequest) -> StoreResult<i64> {
        let updated = sqlx::query(
            "UPDATE delivery_requests SET status = $1, trip_id = $2, notes = $3, \
             accepted_at = $4, picked_up_at = $5, delivered_at = $6, version = version + 1 \
             WHERE id = $7 AND version = $8",
        )
        .bind(request.status.as_str())
        .bind(request.trip_id)
        .bind(&request.notes)
        .bind(request.accepted_at)
        .bind(request.picked_up_at)
        .bind(request.delivered_at)
        .bind(request.id)
        .bind(request.version)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(Box::new(VersionConflict));
        }
        Ok(request.version + 1)
    }

    async fn list_requests(&self, filter: DeliveryFilter) -> StoreResult<Vec<DeliveryRequest>> {
        let statuses: Option<Vec<String>> = filter
            .statuses
            .map(|s| s.iter().map(|st| st.as_str().to_string()).collect());

        let rows = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM delivery_requests \
             WHERE ($1::text[] IS NULL OR status = ANY($1)) \
               AND ($2::uuid IS NULL OR sender_id = $2) \
               AND ($3::bigint[] IS NULL OR trip_id = ANY($3)) \
             ORDER BY id"
        ))
        .bind(statuses)
        .bind(filter.sender_id)
        .bind(filter.trip_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RequestRow::into_request).collect()
    }
}
