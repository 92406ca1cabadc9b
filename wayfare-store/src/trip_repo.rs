use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use wayfare_core::repository::{StoreError, StoreResult, VersionConflict};
use wayfare_core::users::Gender;
use wayfare_shared::TripId;
use wayfare_trip::models::{Participant, ParticipantStatus, Trip, TripStatus};
use wayfare_trip::repository::{TripFilter, TripRepository};

pub struct PostgresTripRepository {
    pub pool: PgPool,
}

impl PostgresTripRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct TripRow {
    id: i64,
    driver_id: Uuid,
    origin: String,
    destination: String,
    origin_city: Option<String>,
    origin_lat: Option<f64>,
    origin_lon: Option<f64>,
    destination_city: Option<String>,
    destination_lat: Option<f64>,
    destination_lon: Option<f64>,
    price_per_seat: Decimal,
    estimated_minutes: Option<i32>,
    total_seats: i32,
    available_seats: i32,
    status: String,
    starts_at: DateTime<Utc>,
    gender_preference: Option<String>,
    accepts_deliveries: bool,
    max_delivery_weight: Option<f64>,
    version: i64,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct ParticipantRow {
    trip_id: i64,
    user_id: Uuid,
    seats: i32,
    status: String,
    joined_at: DateTime<Utc>,
}

const TRIP_COLUMNS: &str = "id, driver_id, origin, destination, origin_city, origin_lat, \
     origin_lon, destination_city, destination_lat, destination_lon, price_per_seat, \
     estimated_minutes, total_seats, available_seats, status, starts_at, gender_preference, \
     accepts_deliveries, max_delivery_weight, version, created_at";

pub(crate) fn parse_gender(s: &str) -> StoreResult<Gender> {
    match s {
        "MALE" => Ok(Gender::Male),
        "FEMALE" => Ok(Gender::Female),
        other => Err(format!("unknown gender value in store: {other}").into()),
    }
}

pub(crate) fn gender_str(g: Gender) -> &'static str {
    match g {
        Gender::Male => "MALE",
        Gender::Female => "FEMALE",
    }
}

impl TripRow {
    fn into_trip(self, participants: Vec<Participant>) -> StoreResult<Trip> {
        let status = TripStatus::parse(&self.status)
            .ok_or_else(|| -> StoreError {
                format!("unknown trip status in store: {}", self.status).into()
            })?;
        let gender_preference = self
            .gender_preference
            .as_deref()
            .map(parse_gender)
            .transpose()?;
        Ok(Trip {
            id: self.id,
            driver_id: self.driver_id,
            origin: self.origin,
            destination: self.destination,
            origin_city: self.origin_city,
            origin_lat: self.origin_lat,
            origin_lon: self.origin_lon,
            destination_city: self.destination_city,
            destination_lat: self.destination_lat,
            destination_lon: self.destination_lon,
            price_per_seat: self.price_per_seat,
            estimated_minutes: self.estimated_minutes,
            total_seats: self.total_seats as u32,
            available_seats: self.available_seats as u32,
            status,
            starts_at: self.starts_at,
            gender_preference,
            accepts_deliveries: self.accepts_deliveries,
            max_delivery_weight: self.max_delivery_weight,
            participants,
            version: self.version,
            created_at: self.created_at,
        })
    }
}

impl ParticipantRow {
    fn into_participant(self) -> StoreResult<Participant> {
        let status = ParticipantStatus::parse(&self.status)
            .ok_or_else(|| -> StoreError {
                format!("unknown participant status in store: {}", self.status).into()
            })?;
        Ok(Participant {
            trip_id: self.trip_id,
            user_id: self.user_id,
            seats: self.seats as u32,
            status,
            joined_at: self.joined_at,
        })
    }
}

impl PostgresTripRepository {
    async fn fetch_trip_row(&self, id: TripId) -> StoreResult<Option<TripRow>> {
        let row = sqlx::query_as::<_, TripRow>(&format!(
            "SELECT {TRIP_COLUMNS} FROM trips WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl TripRepository for PostgresTripRepository {
    async fn get_trip(&self, id: TripId) -> StoreResult<Option<Trip>> {
        match self.fetch_trip_row(id).await? {
            Some(row) => Ok(Some(row.into_trip(Vec::new())?)),
            None => Ok(None),
        }
    }

    async fn get_trip_with_participants(&self, id: TripId) -> StoreResult<Option<Trip>> {
        let Some(row) = self.fetch_trip_row(id).await? else {
            return Ok(None);
        };

        let participant_rows = sqlx::query_as::<_, ParticipantRow>(
            "SELECT trip_id, user_id, seats, status, joined_at \
             FROM trip_participants WHERE trip_id = $1 ORDER BY joined_at",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let participants = participant_rows
            .into_iter()
            .map(ParticipantRow::into_participant)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(Some(row.into_trip(participants)?))
    }

    async fn create_trip(&self, mut trip: Trip) -> StoreResult<Trip> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO trips (driver_id, origin, destination, origin_city, origin_lat, \
             origin_lon, destination_city, destination_lat, destination_lon, price_per_seat, \
             estimated_minutes, total_seats, available_seats, status, starts_at, \
             gender_preference, accepts_deliveries, max_delivery_weight, version, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
             $17, $18, 1, $19) RETURNING id",
        )
        .bind(trip.driver_id)
        .bind(&trip.origin)
        .bind(&trip.destination)
        .bind(&trip.origin_city)
        .bind(trip.origin_lat)
        .bind(trip.origin_lon)
        .bind(&trip.destination_city)
        .bind(trip.destination_lat)
        .bind(trip.destination_lon)
        .bind(trip.price_per_seat)
        .bind(trip.estimated_minutes)
        .bind(trip.total_seats as i32)
        .bind(trip.available_seats as i32)
        .bind(trip.status.as_str())
        .bind(trip.starts_at)
        .bind(trip.gender_preference.map(gender_str))
        .bind(trip.accepts_deliveries)
        .bind(trip.max_delivery_weight)
        .bind(trip.created_at)
        .fetch_one(&self.pool)
        .await?;

        trip.id = id;
        trip.version = 1;
        Ok(trip)
    }

    async fn save_trip(&self, trip: &Trip) -> StoreResult<i64> {
        // Trip row and ledger move together; the compare-and-swap on version
        // makes the whole write first-writer-wins.
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE trips SET available_seats = $1, status = $2, gender_preference = $3, \
             accepts_deliveries = $4, max_delivery_weight = $5, starts_at = $6, \
             version = version + 1 WHERE id = $7 AND version = $8",
        )
        .bind(trip.available_seats as i32)
        .bind(trip.status.as_str())
        .bind(trip.gender_preference.map(gender_str))
        .bind(trip.accepts_deliveries)
        .bind(trip.max_delivery_weight)
        .bind(trip.starts_at)
        .bind(trip.id)
        .bind(trip.version)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Err(Box::new(VersionConflict));
        }

        for participant in &trip.participants {
            sqlx::query(
                "INSERT INTO trip_participants (trip_id, user_id, seats, status, joined_at) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (trip_id, user_id) \
                 DO UPDATE SET seats = $3, status = $4, joined_at = $5",
            )
            .bind(trip.id)
            .bind(participant.user_id)
            .bind(participant.seats as i32)
            .bind(participant.status.as_str())
            .bind(participant.joined_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(trip.version + 1)
    }

    async fn list_trips(&self, filter: TripFilter) -> StoreResult<Vec<Trip>> {
        let statuses: Option<Vec<String>> = filter
            .statuses
            .map(|s| s.iter().map(|st| st.as_str().to_string()).collect());

        let rows = sqlx::query_as::<_, TripRow>(&format!(
            "SELECT {TRIP_COLUMNS} FROM trips \
             WHERE ($1::text[] IS NULL OR status = ANY($1)) \
               AND ($2::uuid IS NULL OR driver_id = $2) \
               AND ($3::timestamptz IS NULL OR starts_at > $3) \
               AND ($4::timestamptz IS NULL OR starts_at < $4) \
             ORDER BY id"
        ))
        .bind(statuses)
        .bind(filter.driver_id)
        .bind(filter.starts_after)
        .bind(filter.starts_before)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| row.into_trip(Vec::new()))
            .collect()
    }
}
