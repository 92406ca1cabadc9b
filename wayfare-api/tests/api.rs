use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use wayfare_api::metrics::Metrics;
use wayfare_api::middleware::rate_limit::RateLimitState;
use wayfare_api::{app, AppState, AuthConfig};
use wayfare_core::clock::SystemClock;
use wayfare_core::users::{InMemoryUserDirectory, UserAccount, UserRole};
use wayfare_delivery::repository::InMemoryDeliveryStore;
use wayfare_delivery::{DeliveryEngine, DeliveryRules, ExpirySweeper};
use wayfare_store::EventBus;
use wayfare_trip::repository::InMemoryTripStore;
use wayfare_trip::{BookingEngine, BookingRules, TripLifecycleEngine};

struct Harness {
    app: Router,
    driver: Uuid,
    passenger: Uuid,
}

async fn harness() -> Harness {
    let trips = Arc::new(InMemoryTripStore::new());
    let requests = Arc::new(InMemoryDeliveryStore::new());
    let users = Arc::new(InMemoryUserDirectory::new());
    let clock = Arc::new(SystemClock);

    let driver = Uuid::new_v4();
    let passenger = Uuid::new_v4();
    users.upsert(UserAccount::new(driver, UserRole::Driver)).await;
    users
        .upsert(UserAccount::new(passenger, UserRole::Passenger))
        .await;

    let state = AppState {
        lifecycle: Arc::new(TripLifecycleEngine::new(
            trips.clone(),
            users.clone(),
            clock.clone(),
            BookingRules::default(),
        )),
        booking: Arc::new(BookingEngine::new(
            trips.clone(),
            users.clone(),
            clock.clone(),
            BookingRules::default(),
        )),
        deliveries: Arc::new(DeliveryEngine::new(
            requests.clone(),
            trips.clone(),
            users.clone(),
            clock.clone(),
            DeliveryRules::default(),
        )),
        sweeper: Arc::new(ExpirySweeper::new(requests, clock.clone())),
        users,
        clock,
        events: EventBus::new(16),
        auth: AuthConfig {
            secret: "test-secret".to_string(),
            expiration: 3600,
        },
        metrics: Arc::new(Metrics::new()),
        rate_limit: RateLimitState::new(10_000, Duration::from_secs(60)),
    };

    Harness {
        app: app(state),
        driver,
        passenger,
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> axum::response::Response {
    app.clone().oneshot(request).await.unwrap()
}

fn post_json(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get_authed(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

async fn token_for(app: &Router, user_id: Uuid) -> String {
    let response = send(
        app,
        post_json("/v1/auth/token", None, json!({ "user_id": user_id })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await["token"].as_str().unwrap().to_string()
}

fn trip_draft(accepts_deliveries: bool) -> Value {
    json!({
        "origin": "Bratislava",
        "destination": "Kosice",
        "price_per_seat": "12.50",
        "seats": 3,
        "starts_at": Utc::now() + chrono::Duration::hours(4),
        "accepts_deliveries": accepts_deliveries,
        "max_delivery_weight": 10.0,
    })
}

fn delivery_draft() -> Value {
    json!({
        "receiver_phone": "+421900111222",
        "origin": "Bratislava",
        "dropoff": "Kosice",
        "weight_kg": 3.0,
        "description": "small parcel",
        "price": "6.00",
        "window_start": Utc::now(),
        "window_end": Utc::now() + chrono::Duration::hours(12),
    })
}

#[tokio::test]
async fn test_health_is_open() {
    let h = harness().await;
    let response = send(
        &h.app,
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let h = harness().await;
    let response = send(
        &h.app,
        Request::builder().uri("/v1/trips").body(Body::empty()).unwrap(),
    )
    .await;
    assert!(response.status().is_client_error());

    let response = send(&h.app, get_authed("/v1/trips", "not-a-jwt")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_token_issuance_rejects_unknown_user() {
    let h = harness().await;
    let response = send(
        &h.app,
        post_json("/v1/auth/token", None, json!({ "user_id": Uuid::new_v4() })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_publish_book_and_cancel_flow() {
    let h = harness().await;
    let driver_token = token_for(&h.app, h.driver).await;
    let passenger_token = token_for(&h.app, h.passenger).await;

    let response = send(
        &h.app,
        post_json("/v1/trips", Some(&driver_token), trip_draft(false)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let trip = body_json(response).await;
    let trip_id = trip["id"].as_i64().unwrap();
    assert_eq!(trip["status"], "PENDING");
    assert_eq!(trip["available_seats"], 3);

    // Drivers cannot book their own trip.
    let response = send(
        &h.app,
        post_json(
            &format!("/v1/trips/{trip_id}/bookings"),
            Some(&driver_token),
            json!({ "seats": 1 }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = send(
        &h.app,
        post_json(
            &format!("/v1/trips/{trip_id}/bookings"),
            Some(&passenger_token),
            json!({ "seats": 2 }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let booking = body_json(response).await;
    assert_eq!(booking["seats"], 2);
    assert_eq!(booking["status"], "CONFIRMED");

    let response = send(
        &h.app,
        get_authed(&format!("/v1/trips/{trip_id}"), &passenger_token),
    )
    .await;
    let trip = body_json(response).await;
    assert_eq!(trip["available_seats"], 1);
    // Not yet full, so the trip stays Pending.
    assert_eq!(trip["status"], "PENDING");
    // Roster carries the driver plus the one passenger.
    assert_eq!(trip["participants"].as_array().unwrap().len(), 2);

    // Passenger releases the seats; the trip reverts to Pending.
    let response = send(
        &h.app,
        Request::builder()
            .method("DELETE")
            .uri(format!("/v1/trips/{trip_id}/bookings"))
            .header(header::AUTHORIZATION, format!("Bearer {passenger_token}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let trip = body_json(response).await;
    assert_eq!(trip["available_seats"], 3);
    assert_eq!(trip["status"], "PENDING");

    // Booking more seats than remain is a conflict.
    let response = send(
        &h.app,
        post_json(
            &format!("/v1/trips/{trip_id}/bookings"),
            Some(&passenger_token),
            json!({ "seats": 4 }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_delivery_select_accept_and_progress_flow() {
    let h = harness().await;
    let driver_token = token_for(&h.app, h.driver).await;
    let sender_token = token_for(&h.app, h.passenger).await;

    let response = send(
        &h.app,
        post_json("/v1/trips", Some(&driver_token), trip_draft(true)),
    )
    .await;
    let trip_id = body_json(response).await["id"].as_i64().unwrap();

    let response = send(
        &h.app,
        post_json("/v1/deliveries", Some(&sender_token), delivery_draft()),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let request = body_json(response).await;
    let request_id = request["id"].as_i64().unwrap();
    assert_eq!(request["status"], "PENDING");
    // Serialized responses expose the raw phone; only Debug output masks it.
    assert_eq!(request["receiver_phone"], "+421900111222");

    let response = send(
        &h.app,
        get_authed(
            &format!("/v1/deliveries/{request_id}/matching-trips"),
            &sender_token,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let matches = body_json(response).await;
    assert_eq!(matches.as_array().unwrap().len(), 1);
    assert_eq!(matches[0]["id"].as_i64().unwrap(), trip_id);

    let response = send(
        &h.app,
        post_json(
            &format!("/v1/deliveries/{request_id}/select-trip"),
            Some(&sender_token),
            json!({ "trip_id": trip_id, "notes": "fragile" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let request = body_json(response).await;
    assert_eq!(request["status"], "TRIP_SELECTED");
    assert_eq!(request["trip_id"].as_i64().unwrap(), trip_id);

    // Only the driver of the selected trip may accept.
    let response = send(
        &h.app,
        post_json(
            &format!("/v1/deliveries/{request_id}/accept"),
            Some(&sender_token),
            json!({ "trip_id": trip_id }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = send(
        &h.app,
        post_json(
            &format!("/v1/deliveries/{request_id}/accept"),
            Some(&driver_token),
            json!({ "trip_id": trip_id }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let request = body_json(response).await;
    assert_eq!(request["status"], "ACCEPTED");
    assert!(request["accepted_at"].is_string());

    for (status, expect) in [("IN_TRANSIT", "IN_TRANSIT"), ("DELIVERED", "DELIVERED")] {
        let response = send(
            &h.app,
            post_json(
                &format!("/v1/deliveries/{request_id}/status"),
                Some(&driver_token),
                json!({ "status": status }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], expect);
    }

    // Delivered is terminal.
    let response = send(
        &h.app,
        post_json(
            &format!("/v1/deliveries/{request_id}/status"),
            Some(&driver_token),
            json!({ "status": "IN_TRANSIT" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_status_update_rejects_unknown_value() {
    let h = harness().await;
    let sender_token = token_for(&h.app, h.passenger).await;

    let response = send(
        &h.app,
        post_json("/v1/deliveries", Some(&sender_token), delivery_draft()),
    )
    .await;
    let request_id = body_json(response).await["id"].as_i64().unwrap();

    let response = send(
        &h.app,
        post_json(
            &format!("/v1/deliveries/{request_id}/status"),
            Some(&sender_token),
            json!({ "status": "TELEPORTED" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_resources_map_to_not_found() {
    let h = harness().await;
    let token = token_for(&h.app, h.passenger).await;

    let response = send(&h.app, get_authed("/v1/trips/999", &token)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&h.app, get_authed("/v1/deliveries/999", &token)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_sweep_cancels_lapsed_requests() {
    let h = harness().await;
    let sender_token = token_for(&h.app, h.passenger).await;

    let mut draft = delivery_draft();
    draft["window_start"] = json!(Utc::now() - chrono::Duration::hours(6));
    draft["window_end"] = json!(Utc::now() - chrono::Duration::hours(1));
    let response = send(
        &h.app,
        post_json("/v1/deliveries", Some(&sender_token), draft),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let request_id = body_json(response).await["id"].as_i64().unwrap();

    let response = send(
        &h.app,
        post_json("/v1/deliveries/sweep", Some(&sender_token), json!({})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["swept"], 1);

    let response = send(
        &h.app,
        get_authed(&format!("/v1/deliveries/{request_id}"), &sender_token),
    )
    .await;
    assert_eq!(body_json(response).await["status"], "CANCELLED");
}
