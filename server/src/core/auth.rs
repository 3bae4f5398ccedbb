use crate::core::{AppError, AppState};
use axum::{
    body::Body,
    extract::{Request, State},
    http::{self, Response},
    middleware::Next,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, TokenData, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

// struct che codifica il contenuto del token jwt
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub exp: usize, // Expiry time of the token
    pub iat: usize, // Issued at time of the token
    pub sub: String, // user id
}

/// Utente autenticato, inserito come Extension dal middleware.
///
/// L'autenticazione vera e propria (credenziali, account) è un collaboratore
/// esterno: qui risolviamo solo il token del trasporto in un user id.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

#[instrument(skip(secret), fields(user_id = %user_id))]
pub fn encode_jwt(user_id: &str, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
    debug!("Encoding JWT token for user");
    let now = Utc::now();
    let expire: chrono::TimeDelta = Duration::hours(24);
    let exp: usize = (now + expire).timestamp() as usize;
    let iat: usize = now.timestamp() as usize;
    let claim = Claims {
        iat,
        exp,
        sub: user_id.to_string(),
    };

    encode(
        &Header::default(),
        &claim,
        &EncodingKey::from_secret(secret.as_ref()),
    )
}

#[instrument(skip(jwt_token, secret))]
pub fn decode_jwt(
    jwt_token: &str,
    secret: &str,
) -> Result<TokenData<Claims>, jsonwebtoken::errors::Error> {
    debug!("Decoding JWT token");
    decode(
        jwt_token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )
}

/// Middleware di autenticazione: estrae il Bearer token, lo decodifica e
/// inserisce l'utente autenticato come Extension per gli handler a valle.
#[instrument(skip(state, req, next))]
pub async fn authentication_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response<Body>, AppError> {
    let auth_header = req
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            warn!("Missing Authorization header");
            AppError::unauthorized("Missing Authorization header")
        })?;

    let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        warn!("Malformed Authorization header");
        AppError::unauthorized("Expected Bearer token")
    })?;

    let token_data = decode_jwt(token, &state.jwt_secret).map_err(|e| {
        warn!("JWT validation failed: {:?}", e);
        AppError::unauthorized("Invalid or expired token")
    })?;

    info!(user_id = %token_data.claims.sub, "Request authenticated");

    req.extensions_mut().insert(AuthUser {
        user_id: token_data.claims.sub,
    });

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jwt_round_trips_the_user_id() {
        let token = encode_jwt("alice", "test-secret").unwrap();
        let data = decode_jwt(&token, "test-secret").unwrap();
        assert_eq!(data.claims.sub, "alice");
    }

    #[test]
    fn jwt_rejects_wrong_secret() {
        let token = encode_jwt("alice", "test-secret").unwrap();
        assert!(decode_jwt(&token, "another-secret").is_err());
    }
}
