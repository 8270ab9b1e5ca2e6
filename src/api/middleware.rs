//! Bearer-token authentication.
//!
//! Tokens are issued by the hosted identity provider and signed with a shared
//! HS256 secret. This service only verifies them.

use actix_web::dev::Payload;
use actix_web::http::header;
use actix_web::{web, FromRequest, HttpRequest};
use futures::future::{ready, Ready};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::AppState;
use crate::config::AuthConfig;
use crate::error::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    Missing,
    #[error("malformed authorization header")]
    Malformed,
    #[error("invalid token")]
    Invalid(#[from] jsonwebtoken::errors::Error),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        if let AuthError::Invalid(inner) = &err {
            debug!(error = %inner, "token rejected");
        }
        ApiError::Unauthorized(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaffRole {
    Admin,
    Clinician,
    Billing,
    Researcher,
    Staff,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
    #[serde(default)]
    pub user_role: Option<StaffRole>,
}

pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(cfg: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(audience) = &cfg.audience {
            validation.set_audience(&[audience]);
        }
        Self {
            key: DecodingKey::from_secret(cfg.jwt_secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        Ok(decode::<Claims>(token, &self.key, &self.validation)?.claims)
    }
}

/// The authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub role: StaffRole,
}

impl Identity {
    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.role == StaffRole::Admin {
            Ok(())
        } else {
            Err(ApiError::Forbidden("administrator role required".into()))
        }
    }
}

fn bearer_token(req: &HttpRequest) -> Result<&str, AuthError> {
    let value = req
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::Missing)?
        .to_str()
        .map_err(|_| AuthError::Malformed)?;
    match value.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => {
            Ok(token.trim())
        }
        _ => Err(AuthError::Malformed),
    }
}

fn authenticate(req: &HttpRequest) -> Result<Identity, ApiError> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("application state is not registered")))?;
    let claims = state.verifier.verify(bearer_token(req)?)?;
    Ok(Identity {
        user_id: claims.sub,
        role: claims.user_role.unwrap_or(StaffRole::Staff),
    })
}

impl FromRequest for Identity {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(authenticate(req))
    }
}
