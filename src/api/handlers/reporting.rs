//! Health-equity, SDOH and quality reporting handlers.
//!
//! Aggregates run on the service client. Patient-level SDOH data runs under
//! the caller's session so tenant policies apply. Any read failure other than
//! a missing table is a retryable 503; partial figures are never returned as
//! if complete.

use std::collections::BTreeMap;

use actix_web::{web, HttpResponse};
use chrono::{Duration, NaiveDate, Utc};
use futures::future::join_all;
use serde::Serialize;

use super::{envelope, parse_id, required, Params};
use crate::api::middleware::Identity;
use crate::api::AppState;
use crate::core::dashboard::Section;
use crate::core::equity::{self, Dimension, StratificationQuery, StratifiedReport};
use crate::core::period::{ComparisonWindow, Period, ReportingPeriod};
use crate::core::{quality, sdoh};
use crate::db::reporting::PgReporting;
use crate::db::DbClient;
use crate::error::ApiError;

/// Trailing window used when a request names neither `period` nor `from`/`to`.
const DEFAULT_WINDOW_DAYS: i64 = 90;

fn parse_date(params: &Params, name: &str) -> Result<Option<NaiveDate>, ApiError> {
    match params.get(name).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| ApiError::validation(format!("{} must be a YYYY-MM-DD date", name))),
    }
}

fn parse_reporting_period(params: &Params) -> Result<Option<ReportingPeriod>, ApiError> {
    match params.get("period").map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<ReportingPeriod>()
            .map(Some)
            .map_err(|e| ApiError::validation(e.to_string())),
    }
}

/// Window from `period`, or inclusive `from`/`to` dates, or the trailing
/// default ending today. Calendar periods are compared with the previous
/// calendar period, other ranges with the equally long range before them.
pub(crate) fn resolve_window(params: &Params, today: NaiveDate) -> Result<ComparisonWindow, ApiError> {
    if let Some(period) = parse_reporting_period(params)? {
        return Ok(ComparisonWindow::calendar(period));
    }
    let current = match (parse_date(params, "from")?, parse_date(params, "to")?) {
        (Some(from), Some(to)) => {
            Period::new(from, to + Duration::days(1)).map_err(|e| ApiError::validation(e.to_string()))?
        }
        (None, None) => {
            let end = today + Duration::days(1);
            Period {
                start: end - Duration::days(DEFAULT_WINDOW_DAYS),
                end,
            }
        }
        _ => return Err(ApiError::validation("from and to must be given together")),
    };
    Ok(ComparisonWindow::trailing(current))
}

/// Client for patient-level reads. Always the caller's session, whatever
/// their staff role.
fn patient_data(state: &AppState, identity: &Identity) -> DbClient {
    state.db.session(identity.user_id)
}

fn parse_dimension(raw: &str) -> Result<Dimension, ApiError> {
    raw.parse().map_err(|e: equity::UnknownDimension| ApiError::validation(e.to_string()))
}

pub async fn stratified_outcomes(
    _identity: Identity,
    state: web::Data<AppState>,
    query: web::Query<Params>,
) -> Result<HttpResponse, ApiError> {
    let dimension = parse_dimension(required(&query, "dimension")?)?;
    let outcome_type = required(&query, "outcome_type")?.to_string();
    let window = resolve_window(&query, Utc::now().date_naive())?;

    let source = PgReporting::new(state.db.service());
    let request = StratificationQuery {
        outcome_type,
        dimension,
        window,
    };
    let report = equity::aggregate(&source, &state.reporting.equity, &request)
        .await
        .map_err(ApiError::Unavailable)?;
    Ok(HttpResponse::Ok().json(report))
}

#[derive(Debug, Serialize)]
pub struct EquityOverview {
    pub outcome_type: String,
    pub period: Period,
    pub dimensions: BTreeMap<Dimension, Section<StratifiedReport>>,
}

pub async fn equity_overview(
    _identity: Identity,
    state: web::Data<AppState>,
    query: web::Query<Params>,
) -> Result<HttpResponse, ApiError> {
    let outcome_type = required(&query, "outcome_type")?.to_string();
    let mut dimensions = match query.get("dimensions").map(|v| v.trim()).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .split(',')
            .map(parse_dimension)
            .collect::<Result<Vec<_>, _>>()?,
        None => Dimension::ALL.to_vec(),
    };
    dimensions.sort();
    dimensions.dedup();
    let window = resolve_window(&query, Utc::now().date_naive())?;

    let source = PgReporting::new(state.db.service());
    let requests: Vec<StratificationQuery> = dimensions
        .iter()
        .map(|dimension| StratificationQuery {
            outcome_type: outcome_type.clone(),
            dimension: *dimension,
            window,
        })
        .collect();
    let results = join_all(
        requests
            .iter()
            .map(|request| equity::aggregate(&source, &state.reporting.equity, request)),
    )
    .await;

    let sections = requests
        .iter()
        .zip(results)
        .map(|(request, result)| {
            (
                request.dimension,
                Section::ok_or_unavailable(request.dimension.as_str(), result),
            )
        })
        .collect();

    Ok(HttpResponse::Ok().json(EquityOverview {
        outcome_type,
        period: window.current,
        dimensions: sections,
    }))
}

pub async fn patient_sdoh(
    identity: Identity,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let patient_id = parse_id(&path, "patient")?;
    let source = PgReporting::new(patient_data(&state, &identity));
    let summary = sdoh::patient_summary(&source, patient_id)
        .await
        .map_err(ApiError::Unavailable)?
        .ok_or_else(|| ApiError::not_found("patient"))?;
    Ok(HttpResponse::Ok().json(envelope("sdoh_summary", summary)?))
}

pub async fn cohort_sdoh(
    identity: Identity,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let cohort_id = path.trim();
    if cohort_id.is_empty() {
        return Err(ApiError::validation("cohort id is required"));
    }
    let source = PgReporting::new(patient_data(&state, &identity));
    let summary = sdoh::cohort_summary(&source, cohort_id)
        .await
        .map_err(ApiError::Unavailable)?
        .ok_or_else(|| ApiError::not_found("cohort"))?;
    Ok(HttpResponse::Ok().json(envelope("cohort_summary", summary)?))
}

pub async fn quality_measures(
    _identity: Identity,
    state: web::Data<AppState>,
    query: web::Query<Params>,
) -> Result<HttpResponse, ApiError> {
    let period = parse_reporting_period(&query)?
        .unwrap_or_else(|| ReportingPeriod::quarter_of(Utc::now().date_naive()));
    let category = query
        .get("category")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let source = PgReporting::new(state.db.service());
    let report = quality::evaluate_period(&source, period, category)
        .await
        .map_err(ApiError::Unavailable)?;
    Ok(HttpResponse::Ok().json(report))
}

pub async fn quality_measure(
    _identity: Identity,
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<Params>,
) -> Result<HttpResponse, ApiError> {
    let measure_id = path.trim();
    let period = parse_reporting_period(&query)?
        .unwrap_or_else(|| ReportingPeriod::quarter_of(Utc::now().date_naive()));

    let source = PgReporting::new(state.db.service());
    let report = quality::evaluate_period(&source, period, None)
        .await
        .map_err(ApiError::Unavailable)?;
    let evaluation = report
        .measures
        .into_iter()
        .find(|m| m.measure_id == measure_id)
        .ok_or_else(|| ApiError::not_found("quality measure"))?;
    Ok(HttpResponse::Ok().json(envelope("quality_measure", evaluation)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::middleware::StaffRole;
    use crate::api::testing::state;
    use crate::db::Scope;
    use uuid::Uuid;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn period_param_wins() {
        let window = resolve_window(&params(&[("period", "2026-Q3"), ("from", "2020-01-01")]), date(2026, 10, 16)).unwrap();
        assert_eq!(window.current, Period { start: date(2026, 7, 1), end: date(2026, 10, 1) });
        assert_eq!(window.prior, Period { start: date(2026, 4, 1), end: date(2026, 7, 1) });
    }

    #[test]
    fn monthly_period_compares_with_previous_month() {
        let window = resolve_window(&params(&[("period", "2026-03")]), date(2026, 10, 16)).unwrap();
        assert_eq!(window.prior, Period { start: date(2026, 2, 1), end: date(2026, 3, 1) });
    }

    #[test]
    fn to_date_is_inclusive() {
        let window = resolve_window(&params(&[("from", "2026-09-01"), ("to", "2026-09-30")]), date(2026, 10, 16)).unwrap();
        assert_eq!(window.current.end, date(2026, 10, 1));
        assert_eq!(window.current.days(), 30);
        assert_eq!(window.prior.end, date(2026, 9, 1));
        assert_eq!(window.prior.days(), 30);
    }

    #[test]
    fn default_window_ends_today() {
        let window = resolve_window(&params(&[]), date(2026, 10, 16)).unwrap();
        assert!(window.current.contains(date(2026, 10, 16)));
        assert_eq!(window.current.days(), DEFAULT_WINDOW_DAYS);
        assert_eq!(window.prior.days(), DEFAULT_WINDOW_DAYS);
    }

    #[test]
    fn half_open_ranges_are_rejected() {
        assert!(resolve_window(&params(&[("from", "2026-09-01")]), date(2026, 10, 16)).is_err());
        assert!(resolve_window(&params(&[("from", "2026-09-30"), ("to", "2026-09-01")]), date(2026, 10, 16)).is_err());
        assert!(resolve_window(&params(&[("period", "Q3")]), date(2026, 10, 16)).is_err());
    }

    #[actix_web::test]
    async fn patient_level_reads_never_use_the_service_role() {
        let state = state();
        for role in [StaffRole::Staff, StaffRole::Researcher, StaffRole::Admin] {
            let identity = Identity {
                user_id: Uuid::new_v4(),
                role,
            };
            match patient_data(&state, &identity).scope() {
                Scope::Session { user_id, .. } => assert_eq!(*user_id, identity.user_id),
                Scope::Service => panic!("{:?} read patient data as the service role", role),
            }
        }
    }
}
