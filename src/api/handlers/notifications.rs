use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::Serialize;
use tracing::info;

use super::Params;
use crate::api::middleware::Identity;
use crate::api::AppState;
use crate::core::notifications::{self, Notification, NotificationBatch, NotificationSources};
use crate::core::period::ReportingPeriod;
use crate::db::queries;
use crate::db::reporting::PgReporting;
use crate::error::ApiError;

async fn build_batch(identity: &Identity, state: &AppState, params: &Params) -> Result<NotificationBatch, ApiError> {
    let now = Utc::now();
    let period = match params.get("period").map(|v| v.trim()).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse::<ReportingPeriod>()
            .map_err(|e| ApiError::validation(e.to_string()))?,
        None => ReportingPeriod::quarter_of(now.date_naive()),
    };

    let source = PgReporting::new(state.db.service());
    let sources = NotificationSources {
        quality: &source,
        evidence: &source,
        research: &source,
    };
    Ok(notifications::generate(&sources, identity.user_id, period, now, &state.reporting.notifications).await)
}

/// Preview the caller's notifications without storing them.
pub async fn list(
    identity: Identity,
    state: web::Data<AppState>,
    query: web::Query<Params>,
) -> Result<HttpResponse, ApiError> {
    let batch = build_batch(&identity, &state, &query).await?;
    Ok(HttpResponse::Ok().json(batch))
}

#[derive(Debug, Serialize)]
struct Stored {
    stored: u64,
    notifications: Vec<Notification>,
    unavailable: Vec<&'static str>,
}

/// Generate and persist the caller's notifications. Rows already stored from
/// an earlier run are left untouched.
pub async fn store(
    identity: Identity,
    state: web::Data<AppState>,
    query: web::Query<Params>,
) -> Result<HttpResponse, ApiError> {
    let batch = build_batch(&identity, &state, &query).await?;
    let client = state.db.session(identity.user_id);
    let stored = queries::store_notifications(&client, identity.user_id, &batch.notifications).await?;
    info!(
        user_id = %identity.user_id,
        generated = batch.notifications.len(),
        stored,
        "notifications stored"
    );
    Ok(HttpResponse::Created().json(Stored {
        stored,
        notifications: batch.notifications,
        unavailable: batch.unavailable,
    }))
}
