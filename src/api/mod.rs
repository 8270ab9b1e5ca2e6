//! HTTP API.
//!
//! Route table, request handlers and the bearer-token extractor.

pub mod handlers;
pub mod middleware;
pub mod routes;

pub use routes::configure;

use crate::config::{Config, ReportingConfig};
use crate::db::Database;
use middleware::JwtVerifier;

/// Shared state handed to every handler through `web::Data`.
pub struct AppState {
    pub db: Database,
    pub reporting: ReportingConfig,
    pub verifier: JwtVerifier,
}

impl AppState {
    pub fn new(db: Database, config: &Config) -> Self {
        Self {
            db,
            reporting: config.reporting.clone(),
            verifier: JwtVerifier::new(&config.auth),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use uuid::Uuid;

    use super::middleware::{Claims, StaffRole};
    use super::AppState;
    use crate::config::{AuthConfig, ReportingConfig};
    use crate::db::{testing::lazy_config, Database};

    pub const SECRET: &str = "test-secret-that-is-at-least-32-bytes-long";

    pub fn state() -> AppState {
        let auth = AuthConfig {
            jwt_secret: SECRET.into(),
            audience: None,
        };
        AppState {
            db: Database::connect_lazy(&lazy_config()).unwrap(),
            reporting: ReportingConfig::default(),
            verifier: super::middleware::JwtVerifier::new(&auth),
        }
    }

    pub fn token(role: StaffRole) -> String {
        let claims = Claims {
            sub: Uuid::new_v4(),
            exp: (Utc::now().timestamp() + 3600) as usize,
            user_role: Some(role),
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    pub fn bearer(role: StaffRole) -> (&'static str, String) {
        ("Authorization", format!("Bearer {}", token(role)))
    }
}
