//! Administrative dashboard assembled from independent sub-queries.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{instrument, warn};

use super::period::ReportingPeriod;
use super::sources::{CountMetric, DashboardSource};
use crate::error::FetchError;

/// Outcome of one sub-query, kept apart from its siblings.
///
/// `NotProvisioned` carries the empty default so clients can still render it.
/// `Unavailable` carries nothing: a figure that could not be read is never
/// shown as zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Section<T> {
    Ok(T),
    NotProvisioned(T),
    Unavailable,
}

impl<T> Section<T> {
    pub fn capture(name: &str, result: Result<T, FetchError>) -> Self
    where
        T: Default,
    {
        match result {
            Ok(value) => Section::Ok(value),
            Err(e) if e.is_not_provisioned() => {
                warn!(section = name, error = %e, "dashboard section not provisioned");
                Section::NotProvisioned(T::default())
            }
            Err(e) => {
                warn!(section = name, error = %e, "dashboard section unavailable");
                Section::Unavailable
            }
        }
    }

    /// For values with no meaningful empty form. Any failure is unavailable.
    pub fn ok_or_unavailable(name: &str, result: Result<T, FetchError>) -> Self {
        match result {
            Ok(value) => Section::Ok(value),
            Err(e) => {
                warn!(section = name, error = %e, "section unavailable");
                Section::Unavailable
            }
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Section::Ok(v) | Section::NotProvisioned(v) => Some(v),
            Section::Unavailable => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminDashboard {
    pub generated_at: DateTime<Utc>,
    pub date: NaiveDate,
    pub revenue_month: ReportingPeriod,
    pub active_patients: Section<i64>,
    pub appointments_today: Section<i64>,
    pub open_workflow_tasks: Section<i64>,
    pub active_dosing_holds: Section<i64>,
    pub unacknowledged_pmp_alerts: Section<i64>,
    pub monthly_revenue_cents: Section<i64>,
}

/// Run every dashboard query concurrently. Financial and clinical safety
/// figures never fall back to zero.
#[instrument(skip(source))]
pub async fn admin_dashboard(source: &dyn DashboardSource, now: DateTime<Utc>) -> AdminDashboard {
    let today = now.date_naive();
    let month = ReportingPeriod::month_of(today);

    let (patients, appointments, tasks, holds, pmp, revenue) = futures::join!(
        source.count(CountMetric::ActivePatients),
        source.count(CountMetric::AppointmentsOn(today)),
        source.count(CountMetric::OpenWorkflowTasks),
        source.count(CountMetric::ActiveDosingHolds),
        source.count(CountMetric::UnacknowledgedPmpAlerts),
        source.revenue_cents(month.to_period()),
    );

    AdminDashboard {
        generated_at: now,
        date: today,
        revenue_month: month,
        active_patients: Section::capture("active_patients", patients),
        appointments_today: Section::capture("appointments_today", appointments),
        open_workflow_tasks: Section::capture("open_workflow_tasks", tasks),
        active_dosing_holds: Section::capture("active_dosing_holds", holds),
        unacknowledged_pmp_alerts: Section::ok_or_unavailable("unacknowledged_pmp_alerts", pmp),
        monthly_revenue_cents: Section::ok_or_unavailable("monthly_revenue_cents", revenue),
    }
}
