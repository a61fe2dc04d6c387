use crate::common::hash_id::HashId;
use crate::common::response::ApiError;
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Claims of a bearer token issued by the account service.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TokenClaims {
    pub sub: HashId,
    pub exp: usize,
}

/// The authenticated caller, available to handlers behind `auth_middleware`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: i64,
}

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&req)
        .ok_or_else(|| ApiError::unauthorized("Unauthorized: Missing or invalid token"))?;

    let claims = decode::<TokenClaims>(
        token,
        &DecodingKey::from_secret(state.config.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        debug!(error = %e, "Rejected bearer token");
        ApiError::unauthorized("Unauthorized: Invalid token signature")
    })?
    .claims;

    req.extensions_mut().insert(CurrentUser { id: claims.sub.0 });

    Ok(next.run(req).await)
}

#[cfg(test)]
pub fn issue_token(user_id: i64, secret: &str) -> String {
    use jsonwebtoken::{EncodingKey, Header, encode};

    let exp = (time::OffsetDateTime::now_utc().unix_timestamp() + 3600) as usize;
    let claims = TokenClaims {
        sub: HashId(user_id),
        exp,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}
