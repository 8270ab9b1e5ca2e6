//! CRUD handlers shared by every resource.

use actix_web::{web, HttpResponse};
use tracing::warn;
use validator::Validate;

use super::{envelope, parse_id, Params};
use crate::api::middleware::Identity;
use crate::api::AppState;
use crate::db::queries;
use crate::error::ApiError;
use crate::models::{Alert, NewResource, Resource, WorkflowStatusUpdate, WorkflowTask};

pub async fn list<R: Resource>(
    identity: Identity,
    state: web::Data<AppState>,
    query: web::Query<Params>,
) -> Result<HttpResponse, ApiError> {
    let filters = queries::parse_filters(R::FILTERS, &query)?;
    let limit = queries::parse_limit(R::DEFAULT_LIMIT, &query)?;

    let client = state.db.session(identity.user_id);
    let rows: Vec<R> = match queries::list::<R>(&client, &filters, limit).await {
        Ok(rows) => rows,
        Err(e) if e.is_not_provisioned() => {
            warn!(table = R::TABLE, "table not provisioned; returning empty list");
            Vec::new()
        }
        Err(e) => return Err(e.into()),
    };
    Ok(HttpResponse::Ok().json(envelope(R::COLLECTION, rows)?))
}

pub async fn get<R: Resource>(
    identity: Identity,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_id(&path, R::SINGULAR)?;
    let client = state.db.session(identity.user_id);
    let row = match queries::find::<R>(&client, id).await {
        Ok(row) => row,
        Err(e) if e.is_not_provisioned() => None,
        Err(e) => return Err(e.into()),
    }
    .ok_or_else(|| ApiError::not_found(R::SINGULAR))?;
    Ok(HttpResponse::Ok().json(envelope(R::SINGULAR, row)?))
}

pub async fn create<N: NewResource>(
    identity: Identity,
    state: web::Data<AppState>,
    body: web::Json<N>,
) -> Result<HttpResponse, ApiError> {
    let new = body.into_inner();
    new.validate()?;
    let client = state.db.session(identity.user_id);
    let row = queries::insert(&client, &new).await?;
    Ok(HttpResponse::Created().json(envelope(N::Output::SINGULAR, row)?))
}

pub async fn acknowledge_alert(
    identity: Identity,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_id(&path, Alert::SINGULAR)?;
    let client = state.db.session(identity.user_id);
    let alert = queries::acknowledge_alert(&client, id, identity.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found(Alert::SINGULAR))?;
    Ok(HttpResponse::Ok().json(envelope(Alert::SINGULAR, alert)?))
}

pub async fn update_workflow_status(
    identity: Identity,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<WorkflowStatusUpdate>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_id(&path, WorkflowTask::SINGULAR)?;
    body.validate()?;
    let client = state.db.session(identity.user_id);
    let task = queries::update_workflow_status(&client, id, &body.status)
        .await?
        .ok_or_else(|| ApiError::not_found(WorkflowTask::SINGULAR))?;
    Ok(HttpResponse::Ok().json(envelope(WorkflowTask::SINGULAR, task)?))
}
