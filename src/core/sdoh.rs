//! Social determinants of health risk summaries.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

use super::sources::SdohSource;
use crate::error::FetchError;

/// Points contributed by each active risk factor.
pub const POINTS_PER_FACTOR: u8 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFactor {
    Housing,
    Transportation,
    Food,
    Employment,
    SocialSupport,
}

impl RiskFactor {
    pub const ALL: [RiskFactor; 5] = [
        RiskFactor::Housing,
        RiskFactor::Transportation,
        RiskFactor::Food,
        RiskFactor::Employment,
        RiskFactor::SocialSupport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskFactor::Housing => "housing",
            RiskFactor::Transportation => "transportation",
            RiskFactor::Food => "food",
            RiskFactor::Employment => "employment",
            RiskFactor::SocialSupport => "social_support",
        }
    }
}

impl fmt::Display for RiskFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown SDOH risk factor {0:?}")]
pub struct UnknownFactor(pub String);

impl FromStr for RiskFactor {
    type Err = UnknownFactor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "housing" | "housing_instability" => Ok(RiskFactor::Housing),
            "transportation" => Ok(RiskFactor::Transportation),
            "food" | "food_insecurity" => Ok(RiskFactor::Food),
            "employment" | "unemployment" => Ok(RiskFactor::Employment),
            "social_support" | "social_isolation" => Ok(RiskFactor::SocialSupport),
            other => Err(UnknownFactor(other.to_string())),
        }
    }
}

/// One screening answer. `at_risk` is `None` when the item was skipped or
/// answered "unknown".
#[derive(Debug, Clone, PartialEq)]
pub struct FactorAssessment {
    pub patient_id: Uuid,
    pub factor: RiskFactor,
    pub at_risk: Option<bool>,
    pub assessed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorStatus {
    AtRisk,
    NotAtRisk,
    NotAssessed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    Severe,
}

/// Step function from active flag count to level.
pub fn risk_level(active_flags: usize) -> RiskLevel {
    match active_flags {
        0 => RiskLevel::Low,
        1..=2 => RiskLevel::Moderate,
        3 => RiskLevel::High,
        _ => RiskLevel::Severe,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SdohSummary {
    pub patient_id: Uuid,
    pub factors: BTreeMap<RiskFactor, FactorStatus>,
    pub active_flags: usize,
    pub assessed_factors: usize,
    /// `None` until at least one factor has a definite answer.
    pub risk_score: Option<u8>,
    pub risk_level: Option<RiskLevel>,
    pub last_assessed_at: Option<DateTime<Utc>>,
}

/// Summarize one patient. Per factor the most recent definite answer wins;
/// a later unknown answer does not erase an earlier yes or no.
pub fn summarize(patient_id: Uuid, assessments: &[FactorAssessment]) -> SdohSummary {
    let mut latest: BTreeMap<RiskFactor, (DateTime<Utc>, bool)> = BTreeMap::new();
    let mut last_assessed_at: Option<DateTime<Utc>> = None;

    for a in assessments.iter().filter(|a| a.patient_id == patient_id) {
        last_assessed_at = last_assessed_at.max(Some(a.assessed_at));
        let Some(at_risk) = a.at_risk else {
            continue;
        };
        let newer = latest
            .get(&a.factor)
            .map_or(true, |(seen, _)| a.assessed_at > *seen);
        if newer {
            latest.insert(a.factor, (a.assessed_at, at_risk));
        }
    }

    let factors: BTreeMap<RiskFactor, FactorStatus> = RiskFactor::ALL
        .iter()
        .map(|factor| {
            let status = match latest.get(factor) {
                Some((_, true)) => FactorStatus::AtRisk,
                Some((_, false)) => FactorStatus::NotAtRisk,
                None => FactorStatus::NotAssessed,
            };
            (*factor, status)
        })
        .collect();

    let active_flags = latest.values().filter(|(_, at_risk)| *at_risk).count();
    let assessed_factors = latest.len();
    let assessed = assessed_factors > 0;

    SdohSummary {
        patient_id,
        factors,
        active_flags,
        assessed_factors,
        risk_score: assessed.then(|| active_flags as u8 * POINTS_PER_FACTOR),
        risk_level: assessed.then(|| risk_level(active_flags)),
        last_assessed_at,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CohortSummary {
    pub cohort_id: String,
    pub patient_count: usize,
    pub by_risk_level: BTreeMap<RiskLevel, usize>,
    pub not_assessed: usize,
    pub patients: Vec<SdohSummary>,
}

pub fn summarize_cohort(cohort_id: &str, members: &[Uuid], assessments: &[FactorAssessment]) -> CohortSummary {
    let mut by_patient: BTreeMap<Uuid, Vec<FactorAssessment>> =
        members.iter().map(|id| (*id, Vec::new())).collect();
    for a in assessments {
        if let Some(rows) = by_patient.get_mut(&a.patient_id) {
            rows.push(a.clone());
        }
    }

    let patients: Vec<SdohSummary> = by_patient
        .iter()
        .map(|(id, rows)| summarize(*id, rows))
        .collect();

    let mut by_risk_level: BTreeMap<RiskLevel, usize> = [
        RiskLevel::Low,
        RiskLevel::Moderate,
        RiskLevel::High,
        RiskLevel::Severe,
    ]
    .into_iter()
    .map(|level| (level, 0))
    .collect();
    let mut not_assessed = 0;
    for summary in &patients {
        match summary.risk_level {
            Some(level) => *by_risk_level.entry(level).or_default() += 1,
            None => not_assessed += 1,
        }
    }

    CohortSummary {
        cohort_id: cohort_id.to_string(),
        patient_count: patients.len(),
        by_risk_level,
        not_assessed,
        patients,
    }
}

/// `Ok(None)` when the patient does not exist or is not visible to the caller.
#[instrument(skip(source))]
pub async fn patient_summary(source: &dyn SdohSource, patient_id: Uuid) -> Result<Option<SdohSummary>, FetchError> {
    let (exists, assessments) = futures::join!(
        source.patient_exists(patient_id),
        source.patient_assessments(patient_id)
    );
    match exists {
        Ok(true) => {}
        Ok(false) => return Ok(None),
        Err(e) if e.is_not_provisioned() => return Ok(None),
        Err(e) => return Err(e),
    }
    let assessments = match assessments {
        Ok(rows) => rows,
        Err(e) if e.is_not_provisioned() => Vec::new(),
        Err(e) => return Err(e),
    };
    Ok(Some(summarize(patient_id, &assessments)))
}

/// `Ok(None)` when the cohort has no members.
#[instrument(skip(source))]
pub async fn cohort_summary(source: &dyn SdohSource, cohort_id: &str) -> Result<Option<CohortSummary>, FetchError> {
    let (members, assessments) = futures::join!(
        source.cohort_members(cohort_id),
        source.cohort_assessments(cohort_id)
    );
    let members = members?;
    if members.is_empty() {
        return Ok(None);
    }
    let assessments = match assessments {
        Ok(rows) => rows,
        Err(e) if e.is_not_provisioned() => Vec::new(),
        Err(e) => return Err(e),
    };
    Ok(Some(summarize_cohort(cohort_id, &members, &assessments)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sources::MockSdohSource;
    use chrono::TimeZone;
    use test_case::test_case;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, day, 12, 0, 0).unwrap()
    }

    fn answer(patient_id: Uuid, factor: RiskFactor, at_risk: Option<bool>, day: u32) -> FactorAssessment {
        FactorAssessment {
            patient_id,
            factor,
            at_risk,
            assessed_at: at(day),
        }
    }

    #[test_case(0, RiskLevel::Low)]
    #[test_case(1, RiskLevel::Moderate)]
    #[test_case(2, RiskLevel::Moderate)]
    #[test_case(3, RiskLevel::High)]
    #[test_case(4, RiskLevel::Severe)]
    #[test_case(5, RiskLevel::Severe)]
    fn step_function(flags: usize, expected: RiskLevel) {
        assert_eq!(risk_level(flags), expected);
    }

    #[test]
    fn level_never_decreases_with_more_flags() {
        for n in 0..5 {
            assert!(risk_level(n) <= risk_level(n + 1));
        }
    }

    #[test]
    fn unknown_is_not_negative() {
        let p = Uuid::new_v4();
        let rows = vec![
            answer(p, RiskFactor::Housing, Some(false), 1),
            answer(p, RiskFactor::Food, None, 1),
        ];
        let summary = summarize(p, &rows);
        assert_eq!(summary.factors[&RiskFactor::Housing], FactorStatus::NotAtRisk);
        assert_eq!(summary.factors[&RiskFactor::Food], FactorStatus::NotAssessed);
        assert_eq!(summary.factors[&RiskFactor::Employment], FactorStatus::NotAssessed);
        assert_eq!(summary.assessed_factors, 1);
        assert_eq!(summary.risk_level, Some(RiskLevel::Low));
        assert_eq!(summary.risk_score, Some(0));
    }

    #[test]
    fn nothing_assessed_has_no_level() {
        let p = Uuid::new_v4();
        let summary = summarize(p, &[answer(p, RiskFactor::Transportation, None, 3)]);
        assert_eq!(summary.risk_level, None);
        assert_eq!(summary.risk_score, None);
        assert_eq!(summary.last_assessed_at, Some(at(3)));
    }

    #[test]
    fn latest_definite_answer_wins() {
        let p = Uuid::new_v4();
        let rows = vec![
            answer(p, RiskFactor::Housing, Some(true), 10),
            answer(p, RiskFactor::Housing, Some(false), 2),
            answer(p, RiskFactor::Housing, None, 20),
            answer(p, RiskFactor::Food, Some(true), 1),
            answer(p, RiskFactor::Food, Some(false), 5),
            answer(p, RiskFactor::Employment, Some(true), 5),
            answer(p, RiskFactor::SocialSupport, Some(true), 5),
        ];
        let summary = summarize(p, &rows);
        assert_eq!(summary.factors[&RiskFactor::Housing], FactorStatus::AtRisk);
        assert_eq!(summary.factors[&RiskFactor::Food], FactorStatus::NotAtRisk);
        assert_eq!(summary.active_flags, 3);
        assert_eq!(summary.risk_level, Some(RiskLevel::High));
        assert_eq!(summary.risk_score, Some(60));
    }

    #[test]
    fn score_stays_in_range() {
        let p = Uuid::new_v4();
        let rows: Vec<_> = RiskFactor::ALL
            .iter()
            .map(|f| answer(p, *f, Some(true), 4))
            .collect();
        let summary = summarize(p, &rows);
        assert_eq!(summary.risk_score, Some(100));
        assert_eq!(summary.risk_level, Some(RiskLevel::Severe));
    }

    #[test]
    fn cohort_counts_members_without_answers() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let outsider = Uuid::new_v4();
        let rows = vec![
            answer(a, RiskFactor::Housing, Some(true), 1),
            answer(outsider, RiskFactor::Housing, Some(true), 1),
        ];
        let cohort = summarize_cohort("opioid-treatment", &[a, b], &rows);
        assert_eq!(cohort.patient_count, 2);
        assert_eq!(cohort.not_assessed, 1);
        assert_eq!(cohort.by_risk_level[&RiskLevel::Moderate], 1);
        assert_eq!(cohort.by_risk_level[&RiskLevel::Severe], 0);
    }

    #[tokio::test]
    async fn empty_cohort_is_none() {
        let mut source = MockSdohSource::new();
        source.expect_cohort_members().returning(|_| Ok(vec![]));
        source.expect_cohort_assessments().returning(|_| Ok(vec![]));
        assert!(cohort_summary(&source, "nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_assessment_table_reads_as_unassessed() {
        let p = Uuid::new_v4();
        let mut source = MockSdohSource::new();
        source.expect_patient_exists().returning(|_| Ok(true));
        source
            .expect_patient_assessments()
            .returning(|_| Err(FetchError::NotProvisioned("sdoh_assessments".into())));
        let summary = patient_summary(&source, p).await.unwrap().unwrap();
        assert_eq!(summary.risk_level, None);
    }

    #[tokio::test]
    async fn unknown_patient_is_none_not_unassessed() {
        let mut source = MockSdohSource::new();
        source.expect_patient_exists().returning(|_| Ok(false));
        source.expect_patient_assessments().returning(|_| Ok(vec![]));
        assert!(patient_summary(&source, Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn patient_lookup_outage_is_an_error() {
        let mut source = MockSdohSource::new();
        source
            .expect_patient_exists()
            .returning(|_| Err(FetchError::Unavailable(sqlx::Error::PoolTimedOut)));
        source.expect_patient_assessments().returning(|_| Ok(vec![]));
        assert!(patient_summary(&source, Uuid::new_v4()).await.is_err());
    }

    #[test]
    fn factor_keys_serialize_as_names() {
        let p = Uuid::new_v4();
        let json = serde_json::to_value(summarize(p, &[])).unwrap();
        assert_eq!(json["factors"]["social_support"], "not_assessed");
        assert!(json["risk_level"].is_null());
    }
}
