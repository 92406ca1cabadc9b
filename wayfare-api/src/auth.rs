use axum::{extract::State, routing::post, Json, Router};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use wayfare_core::EngineError;

use crate::error::ApiError;
use crate::middleware::auth::{role_str, Claims};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct TokenRequest {
    user_id: Uuid,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    token: String,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/auth/token", post(issue_token))
}

/// Development token issuance: exchanges a known user id for a signed
/// bearer token. Real credential flows live in the identity service.
async fn issue_token(
    State(state): State<AppState>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let user = state
        .users
        .get_user(req.user_id)
        .await
        .map_err(EngineError::from_store)?
        .ok_or(EngineError::NotFound("user"))?;

    let claims = Claims {
        sub: user.id.to_string(),
        role: role_str(user.role).to_string(),
        exp: (Utc::now() + Duration::seconds(state.auth.expiration as i64)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(state.auth.secret.as_bytes()),
    )
    .map_err(|e| EngineError::Store(format!("token encoding failed: {e}")))?;

    Ok(Json(TokenResponse { token }))
}
