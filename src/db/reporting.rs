//! Postgres-backed sources for the reporting layer.
//!
//! Rows are decoded into plain `FromRow` structs and converted into domain
//! types with validation. Rows that fail validation are skipped and logged.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;
use tracing::{instrument, warn};
use uuid::Uuid;

use super::DbClient;
use crate::core::equity::{Dimension, OutcomeRecord};
use crate::core::notifications::{Guideline, Study};
use crate::core::period::{Period, ReportingPeriod};
use crate::core::quality::{MeasureCounts, MeasureResult, QualityMeasure};
use crate::core::sdoh::FactorAssessment;
use crate::core::sources::{
    CountMetric, DashboardSource, EvidenceSource, OutcomeSource, QualitySource, ResearchSource, SdohSource,
};
use crate::error::FetchError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("row {id}: {reason}")]
pub struct InvalidRow {
    pub id: String,
    pub reason: String,
}

impl InvalidRow {
    fn new(id: impl ToString, reason: impl ToString) -> Self {
        Self {
            id: id.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Convert rows, dropping any that fail validation.
fn keep_valid<R, T>(table: &'static str, rows: Vec<R>) -> Vec<T>
where
    T: TryFrom<R, Error = InvalidRow>,
{
    rows.into_iter()
        .filter_map(|row| match T::try_from(row) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(table, row_id = %e.id, reason = %e.reason, "skipping invalid row");
                None
            }
        })
        .collect()
}

#[derive(Debug, FromRow)]
struct OutcomeRow {
    id: Uuid,
    subject_id: String,
    outcome_type: String,
    dimension: String,
    stratum: String,
    rate: f64,
    sample_size: i64,
    measured_on: NaiveDate,
}

impl TryFrom<OutcomeRow> for OutcomeRecord {
    type Error = InvalidRow;

    fn try_from(row: OutcomeRow) -> Result<Self, Self::Error> {
        let dimension = Dimension::from_canonical(&row.dimension)
            .ok_or_else(|| InvalidRow::new(row.id, format!("non-canonical dimension {:?}", row.dimension)))?;
        if !row.rate.is_finite() || !(0.0..=1.0).contains(&row.rate) {
            return Err(InvalidRow::new(row.id, format!("rate {} outside 0..=1", row.rate)));
        }
        let sample_size = u64::try_from(row.sample_size)
            .map_err(|_| InvalidRow::new(row.id, format!("negative sample size {}", row.sample_size)))?;
        if row.stratum.trim().is_empty() {
            return Err(InvalidRow::new(row.id, "empty stratum"));
        }
        Ok(OutcomeRecord {
            subject_id: row.subject_id,
            outcome_type: row.outcome_type,
            dimension,
            stratum: row.stratum,
            rate: row.rate,
            sample_size,
            measured_on: row.measured_on,
        })
    }
}

#[derive(Debug, FromRow)]
struct AssessmentRow {
    id: Uuid,
    patient_id: Uuid,
    factor: String,
    at_risk: Option<bool>,
    assessed_at: DateTime<Utc>,
}

impl TryFrom<AssessmentRow> for FactorAssessment {
    type Error = InvalidRow;

    fn try_from(row: AssessmentRow) -> Result<Self, Self::Error> {
        Ok(FactorAssessment {
            patient_id: row.patient_id,
            factor: row.factor.parse().map_err(|e| InvalidRow::new(row.id, e))?,
            at_risk: row.at_risk,
            assessed_at: row.assessed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MeasureRow {
    id: String,
    name: String,
    category: String,
    target_pct: f64,
    description: Option<String>,
}

impl TryFrom<MeasureRow> for QualityMeasure {
    type Error = InvalidRow;

    fn try_from(row: MeasureRow) -> Result<Self, Self::Error> {
        if !row.target_pct.is_finite() || !(0.0..=100.0).contains(&row.target_pct) {
            return Err(InvalidRow::new(&row.id, format!("target {} outside 0..=100", row.target_pct)));
        }
        Ok(QualityMeasure {
            id: row.id,
            name: row.name,
            category: row.category,
            target_pct: row.target_pct,
            description: row.description,
        })
    }
}

#[derive(Debug, FromRow)]
struct MeasureResultRow {
    measure_id: String,
    period: String,
    numerator: i64,
    denominator: i64,
    excluded: i64,
}

impl TryFrom<MeasureResultRow> for MeasureResult {
    type Error = InvalidRow;

    fn try_from(row: MeasureResultRow) -> Result<Self, Self::Error> {
        let id = format!("{}@{}", row.measure_id, row.period);
        let period: ReportingPeriod = row.period.parse().map_err(|e| InvalidRow::new(&id, e))?;
        let count = |v: i64| u64::try_from(v).map_err(|_| InvalidRow::new(&id, format!("negative count {}", v)));
        let counts = MeasureCounts::new(count(row.numerator)?, count(row.denominator)?, count(row.excluded)?)
            .map_err(|e| InvalidRow::new(&id, e))?;
        Ok(MeasureResult {
            measure_id: row.measure_id,
            period,
            counts,
        })
    }
}

#[derive(Debug, FromRow)]
struct GuidelineRow {
    id: Uuid,
    title: String,
    evidence_grade: String,
    published_at: DateTime<Utc>,
}

impl TryFrom<GuidelineRow> for Guideline {
    type Error = InvalidRow;

    fn try_from(row: GuidelineRow) -> Result<Self, Self::Error> {
        Ok(Guideline {
            id: row.id,
            evidence_grade: row.evidence_grade.parse().map_err(|e| InvalidRow::new(row.id, e))?,
            title: row.title,
            published_at: row.published_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct StudyRow {
    id: Uuid,
    title: String,
    enrolled: i32,
    enrollment_target: i32,
    enrollment_deadline: NaiveDate,
}

impl TryFrom<StudyRow> for Study {
    type Error = InvalidRow;

    fn try_from(row: StudyRow) -> Result<Self, Self::Error> {
        let enrolled = u32::try_from(row.enrolled).map_err(|_| InvalidRow::new(row.id, "negative enrollment"))?;
        let enrollment_target =
            u32::try_from(row.enrollment_target).map_err(|_| InvalidRow::new(row.id, "negative enrollment target"))?;
        Ok(Study {
            id: row.id,
            title: row.title,
            enrolled,
            enrollment_target,
            enrollment_deadline: row.enrollment_deadline,
        })
    }
}

/// Reporting reads over one [`DbClient`]. Use a session client for
/// patient-level data and the service client for aggregates.
#[derive(Clone)]
pub struct PgReporting {
    client: DbClient,
}

impl PgReporting {
    pub fn new(client: DbClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OutcomeSource for PgReporting {
    #[instrument(skip(self))]
    async fn outcome_records(
        &self,
        outcome_type: &str,
        dimension: Dimension,
        window: Period,
    ) -> Result<Vec<OutcomeRecord>, FetchError> {
        const TABLE: &str = "outcome_measurements";
        let to_fetch = |e| FetchError::from_sqlx(TABLE, e);
        let mut tx = self.client.begin().await.map_err(to_fetch)?;
        let rows = sqlx::query_as::<_, OutcomeRow>(
            "SELECT id, subject_id, outcome_type, dimension, stratum, rate, sample_size, measured_on
             FROM outcome_measurements
             WHERE outcome_type = $1 AND dimension = $2 AND measured_on >= $3 AND measured_on < $4",
        )
        .bind(outcome_type)
        .bind(dimension.as_str())
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&mut *tx)
        .await
        .map_err(to_fetch)?;
        Ok(keep_valid(TABLE, rows))
    }
}

#[async_trait]
impl SdohSource for PgReporting {
    #[instrument(skip(self))]
    async fn patient_exists(&self, patient_id: Uuid) -> Result<bool, FetchError> {
        let to_fetch = |e| FetchError::from_sqlx("patients", e);
        let mut tx = self.client.begin().await.map_err(to_fetch)?;
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM patients WHERE id = $1)")
            .bind(patient_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(to_fetch)
    }

    #[instrument(skip(self))]
    async fn patient_assessments(&self, patient_id: Uuid) -> Result<Vec<FactorAssessment>, FetchError> {
        const TABLE: &str = "sdoh_assessments";
        let to_fetch = |e| FetchError::from_sqlx(TABLE, e);
        let mut tx = self.client.begin().await.map_err(to_fetch)?;
        let rows = sqlx::query_as::<_, AssessmentRow>(
            "SELECT id, patient_id, factor, at_risk, assessed_at
             FROM sdoh_assessments WHERE patient_id = $1",
        )
        .bind(patient_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(to_fetch)?;
        Ok(keep_valid(TABLE, rows))
    }

    #[instrument(skip(self))]
    async fn cohort_members(&self, cohort_id: &str) -> Result<Vec<Uuid>, FetchError> {
        let to_fetch = |e| FetchError::from_sqlx("cohort_members", e);
        let mut tx = self.client.begin().await.map_err(to_fetch)?;
        sqlx::query_scalar::<_, Uuid>("SELECT patient_id FROM cohort_members WHERE cohort_id = $1")
            .bind(cohort_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(to_fetch)
    }

    #[instrument(skip(self))]
    async fn cohort_assessments(&self, cohort_id: &str) -> Result<Vec<FactorAssessment>, FetchError> {
        const TABLE: &str = "sdoh_assessments";
        let to_fetch = |e| FetchError::from_sqlx(TABLE, e);
        let mut tx = self.client.begin().await.map_err(to_fetch)?;
        let rows = sqlx::query_as::<_, AssessmentRow>(
            "SELECT a.id, a.patient_id, a.factor, a.at_risk, a.assessed_at
             FROM sdoh_assessments a
             JOIN cohort_members m ON m.patient_id = a.patient_id
             WHERE m.cohort_id = $1",
        )
        .bind(cohort_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(to_fetch)?;
        Ok(keep_valid(TABLE, rows))
    }
}

#[async_trait]
impl QualitySource for PgReporting {
    #[instrument(skip(self))]
    async fn measures(&self, category: Option<String>) -> Result<Vec<QualityMeasure>, FetchError> {
        const TABLE: &str = "quality_measures";
        let to_fetch = |e| FetchError::from_sqlx(TABLE, e);
        let mut tx = self.client.begin().await.map_err(to_fetch)?;
        let rows = sqlx::query_as::<_, MeasureRow>(
            "SELECT id, name, category, target_pct, description
             FROM quality_measures
             WHERE active AND ($1::text IS NULL OR category = $1)
             ORDER BY category, id",
        )
        .bind(category)
        .fetch_all(&mut *tx)
        .await
        .map_err(to_fetch)?;
        Ok(keep_valid(TABLE, rows))
    }

    #[instrument(skip(self, period), fields(period = %period))]
    async fn results(&self, period: ReportingPeriod) -> Result<Vec<MeasureResult>, FetchError> {
        const TABLE: &str = "quality_measure_results";
        let to_fetch = |e| FetchError::from_sqlx(TABLE, e);
        let mut tx = self.client.begin().await.map_err(to_fetch)?;
        let rows = sqlx::query_as::<_, MeasureResultRow>(
            "SELECT measure_id, period, numerator, denominator, excluded
             FROM quality_measure_results WHERE period = $1",
        )
        .bind(period.to_string())
        .fetch_all(&mut *tx)
        .await
        .map_err(to_fetch)?;
        Ok(keep_valid(TABLE, rows))
    }
}

#[async_trait]
impl EvidenceSource for PgReporting {
    #[instrument(skip(self))]
    async fn guidelines_published_since(&self, since: DateTime<Utc>) -> Result<Vec<Guideline>, FetchError> {
        const TABLE: &str = "guidelines";
        let to_fetch = |e| FetchError::from_sqlx(TABLE, e);
        let mut tx = self.client.begin().await.map_err(to_fetch)?;
        let rows = sqlx::query_as::<_, GuidelineRow>(
            "SELECT id, title, evidence_grade, published_at
             FROM guidelines WHERE published_at > $1 ORDER BY published_at",
        )
        .bind(since)
        .fetch_all(&mut *tx)
        .await
        .map_err(to_fetch)?;
        Ok(keep_valid(TABLE, rows))
    }

    #[instrument(skip(self))]
    async fn last_viewed(&self, user_id: Uuid) -> Result<Option<DateTime<Utc>>, FetchError> {
        let to_fetch = |e| FetchError::from_sqlx("guideline_views", e);
        let mut tx = self.client.begin().await.map_err(to_fetch)?;
        sqlx::query_scalar::<_, DateTime<Utc>>("SELECT last_viewed_at FROM guideline_views WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(to_fetch)
    }
}

#[async_trait]
impl ResearchSource for PgReporting {
    #[instrument(skip(self))]
    async fn open_studies(&self) -> Result<Vec<Study>, FetchError> {
        const TABLE: &str = "research_studies";
        let to_fetch = |e| FetchError::from_sqlx(TABLE, e);
        let mut tx = self.client.begin().await.map_err(to_fetch)?;
        let rows = sqlx::query_as::<_, StudyRow>(
            "SELECT id, title, enrolled, enrollment_target, enrollment_deadline
             FROM research_studies WHERE status = 'recruiting'",
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(to_fetch)?;
        Ok(keep_valid(TABLE, rows))
    }
}

fn count_sql(metric: CountMetric) -> (&'static str, &'static str) {
    match metric {
        CountMetric::ActivePatients => ("patients", "SELECT count(*) FROM patients WHERE status = 'active'"),
        CountMetric::AppointmentsOn(_) => (
            "appointments",
            "SELECT count(*) FROM appointments
             WHERE (starts_at AT TIME ZONE 'UTC')::date = $1 AND status <> 'cancelled'",
        ),
        CountMetric::OpenWorkflowTasks => (
            "workflow_tasks",
            "SELECT count(*) FROM workflow_tasks WHERE status IN ('open', 'in_progress')",
        ),
        CountMetric::ActiveDosingHolds => (
            "dosing_holds",
            "SELECT count(*) FROM dosing_holds WHERE status = 'active'",
        ),
        CountMetric::UnacknowledgedPmpAlerts => (
            "pmp_alerts",
            "SELECT count(*) FROM pmp_alerts WHERE NOT acknowledged",
        ),
    }
}

#[async_trait]
impl DashboardSource for PgReporting {
    #[instrument(skip(self))]
    async fn count(&self, metric: CountMetric) -> Result<i64, FetchError> {
        let (table, sql) = count_sql(metric);
        let to_fetch = |e| FetchError::from_sqlx(table, e);
        let mut tx = self.client.begin().await.map_err(to_fetch)?;
        let mut query = sqlx::query_scalar::<_, i64>(sql);
        if let CountMetric::AppointmentsOn(day) = metric {
            query = query.bind(day);
        }
        query.fetch_one(&mut *tx).await.map_err(to_fetch)
    }

    #[instrument(skip(self))]
    async fn revenue_cents(&self, window: Period) -> Result<i64, FetchError> {
        let to_fetch = |e| FetchError::from_sqlx("claims", e);
        let mut tx = self.client.begin().await.map_err(to_fetch)?;
        sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(paid_cents), 0)::bigint FROM claims
             WHERE status = 'paid' AND paid_at >= $1::date AND paid_at < $2::date",
        )
        .bind(window.start)
        .bind(window.end)
        .fetch_one(&mut *tx)
        .await
        .map_err(to_fetch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sdoh::RiskFactor;
    use chrono::TimeZone;

    fn outcome_row(dimension: &str, rate: f64, sample_size: i64) -> OutcomeRow {
        OutcomeRow {
            id: Uuid::new_v4(),
            subject_id: "clinic-north".into(),
            outcome_type: "retention_90d".into(),
            dimension: dimension.into(),
            stratum: "Black".into(),
            rate,
            sample_size,
            measured_on: NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
        }
    }

    #[test]
    fn invalid_outcome_rows_are_dropped() {
        let rows = vec![
            outcome_row("race", 0.7, 120),
            outcome_row("race", 0.7, -1),
            outcome_row("race", f64::NAN, 10),
            outcome_row("race", 1.4, 10),
            outcome_row("shoe_size", 0.5, 10),
            outcome_row("payer", 0.5, 10),
            outcome_row("insurance", 0.5, 10),
        ];
        let records: Vec<OutcomeRecord> = keep_valid("outcome_measurements", rows);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].dimension, Dimension::Race);
        assert_eq!(records[1].dimension, Dimension::Insurance);
    }

    #[test]
    fn result_rows_enforce_count_bounds() {
        let row = |n, d, x| MeasureResultRow {
            measure_id: "BH-FUH-7".into(),
            period: "2026-Q3".into(),
            numerator: n,
            denominator: d,
            excluded: x,
        };
        assert!(MeasureResult::try_from(row(10, 20, 0)).is_ok());
        assert!(MeasureResult::try_from(row(30, 20, 0)).is_err());
        assert!(MeasureResult::try_from(row(-1, 20, 0)).is_err());

        let mut bad_period = row(1, 2, 0);
        bad_period.period = "Q3".into();
        let err = MeasureResult::try_from(bad_period).unwrap_err();
        assert_eq!(err.id, "BH-FUH-7@Q3");
    }

    #[test]
    fn assessment_factor_aliases_are_accepted() {
        let row = AssessmentRow {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            factor: "food_insecurity".into(),
            at_risk: None,
            assessed_at: Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap(),
        };
        let a = FactorAssessment::try_from(row).unwrap();
        assert_eq!(a.factor, RiskFactor::Food);
        assert_eq!(a.at_risk, None);
    }

    #[test]
    fn only_appointment_counts_take_a_parameter() {
        let day = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        assert!(count_sql(CountMetric::AppointmentsOn(day)).1.contains("$1"));
        for metric in [
            CountMetric::ActivePatients,
            CountMetric::OpenWorkflowTasks,
            CountMetric::ActiveDosingHolds,
            CountMetric::UnacknowledgedPmpAlerts,
        ] {
            assert!(!count_sql(metric).1.contains('$'));
        }
    }
}
