use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use wayfare_core::users::UserRole;

use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

/// Authenticated caller, injected into request extensions by the middleware.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: UserRole,
}

pub fn role_str(role: UserRole) -> &'static str {
    match role {
        UserRole::Driver => "DRIVER",
        UserRole::Passenger => "PASSENGER",
    }
}

pub fn parse_role(s: &str) -> Option<UserRole> {
    match s {
        "DRIVER" => Some(UserRole::Driver),
        "PASSENGER" => Some(UserRole::Passenger),
        _ => None,
    }
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    TypedHeader(bearer): TypedHeader<Authorization<Bearer>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token_data = decode::<Claims>(
        bearer.token(),
        &DecodingKey::from_secret(state.auth.secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let id = token_data
        .claims
        .sub
        .parse::<Uuid>()
        .map_err(|_| StatusCode::UNAUTHORIZED)?;
    let role = parse_role(&token_data.claims.role).ok_or(StatusCode::FORBIDDEN)?;

    req.extensions_mut().insert(AuthUser { id, role });
    Ok(next.run(req).await)
}
