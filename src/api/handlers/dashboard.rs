use actix_web::{web, HttpResponse};
use chrono::Utc;

use crate::api::middleware::Identity;
use crate::api::AppState;
use crate::core::dashboard;
use crate::db::reporting::PgReporting;
use crate::error::ApiError;

pub async fn admin(identity: Identity, state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    identity.require_admin()?;
    let source = PgReporting::new(state.db.service());
    let dash = dashboard::admin_dashboard(&source, Utc::now()).await;
    Ok(HttpResponse::Ok().json(dash))
}
