//! Read-side seams between the reporting layer and the database.
//!
//! Each trait returns rows already validated into domain types. Failures are
//! reported per call as [`FetchError`] so callers can tell "no rows" apart
//! from "could not read".

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use super::equity::{Dimension, OutcomeRecord};
use super::notifications::{Guideline, Study};
use super::period::{Period, ReportingPeriod};
use super::quality::{MeasureResult, QualityMeasure};
use super::sdoh::FactorAssessment;
use crate::error::FetchError;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutcomeSource: Send + Sync {
    /// Records for one outcome type and dimension measured inside `window`.
    async fn outcome_records(
        &self,
        outcome_type: &str,
        dimension: Dimension,
        window: Period,
    ) -> Result<Vec<OutcomeRecord>, FetchError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SdohSource: Send + Sync {
    /// Whether the patient is visible to the caller.
    async fn patient_exists(&self, patient_id: Uuid) -> Result<bool, FetchError>;

    async fn patient_assessments(&self, patient_id: Uuid) -> Result<Vec<FactorAssessment>, FetchError>;

    async fn cohort_members(&self, cohort_id: &str) -> Result<Vec<Uuid>, FetchError>;

    /// Assessments for every member of the cohort.
    async fn cohort_assessments(&self, cohort_id: &str) -> Result<Vec<FactorAssessment>, FetchError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QualitySource: Send + Sync {
    async fn measures(&self, category: Option<String>) -> Result<Vec<QualityMeasure>, FetchError>;

    async fn results(&self, period: ReportingPeriod) -> Result<Vec<MeasureResult>, FetchError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EvidenceSource: Send + Sync {
    async fn guidelines_published_since(&self, since: DateTime<Utc>) -> Result<Vec<Guideline>, FetchError>;

    /// When the user last opened the guideline library, if ever.
    async fn last_viewed(&self, user_id: Uuid) -> Result<Option<DateTime<Utc>>, FetchError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResearchSource: Send + Sync {
    async fn open_studies(&self) -> Result<Vec<Study>, FetchError>;
}

/// Row counts shown on the administrative dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountMetric {
    ActivePatients,
    AppointmentsOn(NaiveDate),
    OpenWorkflowTasks,
    ActiveDosingHolds,
    UnacknowledgedPmpAlerts,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DashboardSource: Send + Sync {
    async fn count(&self, metric: CountMetric) -> Result<i64, FetchError>;

    /// Paid claim revenue for claims paid inside `window`.
    async fn revenue_cents(&self, window: Period) -> Result<i64, FetchError>;
}
