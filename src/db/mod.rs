//! Database module for Meridian
//!
//! This module handles database connections and the credential split between
//! session clients (subject to row-level security) and the service client
//! (bypasses it, used for cross-tenant aggregate reads).

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use tracing::info;
use uuid::Uuid;

use crate::config::DatabaseConfig;

pub mod queries;
pub mod reporting;

/// Credential a [`DbClient`] runs under.
#[derive(Debug, Clone, PartialEq)]
pub enum Scope {
    /// End-user session. Every transaction assumes `role` and carries the
    /// caller's claims so RLS policies can resolve the tenant.
    Session { user_id: Uuid, role: Arc<str> },
    /// Service role. Row-level security does not apply.
    Service,
}

/// Both connection pools, constructed once at startup.
#[derive(Clone)]
pub struct Database {
    session_pool: PgPool,
    service_pool: PgPool,
    session_role: Arc<str>,
}

impl Database {
    /// Create a new database connection
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let session_pool = pool_options(config).connect(&config.url).await?;
        let service_pool = pool_options(config).connect(&config.service_url).await?;
        info!(max_connections = config.max_connections, "database pools ready");
        Ok(Self {
            session_pool,
            service_pool,
            session_role: Arc::from(config.session_role.as_str()),
        })
    }

    /// Build pools without opening connections until first use.
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        Ok(Self {
            session_pool: pool_options(config).connect_lazy(&config.url)?,
            service_pool: pool_options(config).connect_lazy(&config.service_url)?,
            session_role: Arc::from(config.session_role.as_str()),
        })
    }

    /// Client bound to the caller's session.
    pub fn session(&self, user_id: Uuid) -> DbClient {
        DbClient {
            pool: self.session_pool.clone(),
            scope: Scope::Session {
                user_id,
                role: self.session_role.clone(),
            },
        }
    }

    /// Client bound to the service role.
    pub fn service(&self) -> DbClient {
        DbClient {
            pool: self.service_pool.clone(),
            scope: Scope::Service,
        }
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.service_pool).await
    }
}

fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
}

/// A pool plus the credential scope every transaction on it runs under.
#[derive(Clone)]
pub struct DbClient {
    pool: PgPool,
    scope: Scope,
}

impl DbClient {
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Open a transaction with the scope's settings applied.
    ///
    /// Session settings are transaction-local, so a pooled connection never
    /// carries one caller's identity into another caller's request.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        if let Scope::Session { user_id, role } = &self.scope {
            let claims = json!({ "sub": user_id, "role": role.as_ref() }).to_string();
            sqlx::query(
                "SELECT set_config('role', $1, true), set_config('request.jwt.claims', $2, true)",
            )
            .bind(role.as_ref())
            .bind(claims)
            .execute(&mut *tx)
            .await?;
        }
        Ok(tx)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub fn lazy_config() -> DatabaseConfig {
        DatabaseConfig {
            url: "postgres://meridian_app@localhost:5432/meridian".into(),
            service_url: "postgres://meridian_service@localhost:5432/meridian".into(),
            session_role: "authenticated".into(),
            max_connections: 2,
            acquire_timeout_secs: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn session_and_service_clients_keep_their_scope() {
        let db = Database::connect_lazy(&testing::lazy_config()).unwrap();
        let user = Uuid::new_v4();

        match db.session(user).scope() {
            Scope::Session { user_id, role } => {
                assert_eq!(*user_id, user);
                assert_eq!(role.as_ref(), "authenticated");
            }
            Scope::Service => panic!("session client must not run as service"),
        }
        assert_eq!(db.service().scope(), &Scope::Service);
    }
}
