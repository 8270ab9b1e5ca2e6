//! Quality measure evaluation.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::{instrument, warn};

use super::period::ReportingPeriod;
use super::sources::QualitySource;
use crate::error::FetchError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityMeasure {
    /// Measure code, e.g. `BH-IET-14`.
    pub id: String,
    pub name: String,
    pub category: String,
    pub target_pct: f64,
    /// Numerator and denominator criteria, for display.
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidCounts {
    #[error("numerator {numerator} exceeds denominator {denominator}")]
    NumeratorTooLarge { numerator: u64, denominator: u64 },
    #[error("excluded {excluded} exceeds denominator {denominator}")]
    ExcludedTooLarge { excluded: u64, denominator: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasureCounts {
    numerator: u64,
    denominator: u64,
    excluded: u64,
}

impl MeasureCounts {
    pub fn new(numerator: u64, denominator: u64, excluded: u64) -> Result<Self, InvalidCounts> {
        if numerator > denominator {
            return Err(InvalidCounts::NumeratorTooLarge { numerator, denominator });
        }
        if excluded > denominator {
            return Err(InvalidCounts::ExcludedTooLarge { excluded, denominator });
        }
        Ok(Self { numerator, denominator, excluded })
    }

    pub fn numerator(&self) -> u64 {
        self.numerator
    }

    pub fn denominator(&self) -> u64 {
        self.denominator
    }

    pub fn excluded(&self) -> u64 {
        self.excluded
    }
}

/// Counts recorded for one measure in one reporting period.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasureResult {
    pub measure_id: String,
    pub period: ReportingPeriod,
    pub counts: MeasureCounts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasureStatus {
    Met,
    NotMet,
    Excluded,
    Pending,
    NotApplicable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasureEvaluation {
    pub measure_id: String,
    pub name: String,
    pub category: String,
    pub period: ReportingPeriod,
    pub target_pct: f64,
    pub numerator: Option<u64>,
    pub denominator: Option<u64>,
    pub excluded: Option<u64>,
    /// Present only for `met` and `not_met`.
    pub percentage: Option<f64>,
    pub status: MeasureStatus,
}

impl MeasureEvaluation {
    /// Percentage points short of target; negative when above it.
    pub fn gap_pp(&self) -> Option<f64> {
        self.percentage.map(|pct| self.target_pct - pct)
    }
}

pub fn evaluate(measure: &QualityMeasure, period: ReportingPeriod, counts: Option<&MeasureCounts>) -> MeasureEvaluation {
    let (status, percentage) = match counts {
        None => (MeasureStatus::Pending, None),
        Some(c) if c.denominator == 0 => (MeasureStatus::NotApplicable, None),
        Some(c) if c.excluded == c.denominator => (MeasureStatus::Excluded, None),
        Some(c) => {
            let pct = c.numerator as f64 * 100.0 / c.denominator as f64;
            let status = if pct >= measure.target_pct {
                MeasureStatus::Met
            } else {
                MeasureStatus::NotMet
            };
            (status, Some(pct))
        }
    };

    MeasureEvaluation {
        measure_id: measure.id.clone(),
        name: measure.name.clone(),
        category: measure.category.clone(),
        period,
        target_pct: measure.target_pct,
        numerator: counts.map(|c| c.numerator),
        denominator: counts.map(|c| c.denominator),
        excluded: counts.map(|c| c.excluded),
        percentage,
        status,
    }
}

/// Denominator-weighted mean percentage over measures that have one.
pub fn category_score<'a>(evaluations: impl IntoIterator<Item = &'a MeasureEvaluation>) -> Option<f64> {
    let (weighted, total) = evaluations
        .into_iter()
        .filter_map(|e| Some((e.percentage?, e.denominator?)))
        .fold((0.0, 0u64), |(weighted, total), (pct, denominator)| {
            (weighted + pct * denominator as f64, total + denominator)
        });
    (total > 0).then(|| weighted / total as f64)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryScore {
    pub category: String,
    pub score: Option<f64>,
    pub measure_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub period: ReportingPeriod,
    pub overall_score: Option<f64>,
    pub categories: Vec<CategoryScore>,
    pub measures: Vec<MeasureEvaluation>,
}

pub fn build_report(period: ReportingPeriod, measures: &[QualityMeasure], results: &[MeasureResult]) -> QualityReport {
    let counts: HashMap<&str, &MeasureCounts> = results
        .iter()
        .filter(|r| r.period == period)
        .map(|r| (r.measure_id.as_str(), &r.counts))
        .collect();

    let evaluations: Vec<MeasureEvaluation> = measures
        .iter()
        .map(|m| evaluate(m, period, counts.get(m.id.as_str()).copied()))
        .collect();

    let mut by_category: BTreeMap<&str, Vec<&MeasureEvaluation>> = BTreeMap::new();
    for e in &evaluations {
        by_category.entry(e.category.as_str()).or_default().push(e);
    }
    let categories = by_category
        .into_iter()
        .map(|(category, evals)| CategoryScore {
            category: category.to_string(),
            score: category_score(evals.iter().copied()),
            measure_count: evals.len(),
        })
        .collect();

    QualityReport {
        period,
        overall_score: category_score(&evaluations),
        categories,
        measures: evaluations,
    }
}

/// Measures plus results for `period`, evaluated. Unprovisioned tables read
/// as empty.
#[instrument(skip(source))]
pub async fn evaluate_period(
    source: &dyn QualitySource,
    period: ReportingPeriod,
    category: Option<String>,
) -> Result<QualityReport, FetchError> {
    let (measures, results) = futures::join!(source.measures(category), source.results(period));
    let measures = empty_if_missing(measures)?;
    let results = empty_if_missing(results)?;
    Ok(build_report(period, &measures, &results))
}

fn empty_if_missing<T>(rows: Result<Vec<T>, FetchError>) -> Result<Vec<T>, FetchError> {
    match rows {
        Err(e) if e.is_not_provisioned() => {
            warn!(error = %e, "quality table missing");
            Ok(Vec::new())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sources::MockQualitySource;
    use test_case::test_case;

    const Q3: ReportingPeriod = ReportingPeriod::Quarter(2026, 3);

    fn measure(id: &str, category: &str, target: f64) -> QualityMeasure {
        QualityMeasure {
            id: id.into(),
            name: format!("Measure {}", id),
            category: category.into(),
            target_pct: target,
            description: None,
        }
    }

    fn counts(n: u64, d: u64, x: u64) -> MeasureCounts {
        MeasureCounts::new(n, d, x).unwrap()
    }

    #[test_case(None, MeasureStatus::Pending ; "no result row")]
    #[test_case(Some((0, 0, 0)), MeasureStatus::NotApplicable ; "empty denominator")]
    #[test_case(Some((0, 12, 12)), MeasureStatus::Excluded ; "all excluded")]
    #[test_case(Some((80, 100, 0)), MeasureStatus::Met ; "exactly at target")]
    #[test_case(Some((79, 100, 3)), MeasureStatus::NotMet ; "below target")]
    fn status_precedence(row: Option<(u64, u64, u64)>, expected: MeasureStatus) {
        let c = row.map(|(n, d, x)| counts(n, d, x));
        let eval = evaluate(&measure("M1", "access", 80.0), Q3, c.as_ref());
        assert_eq!(eval.status, expected);
    }

    #[test]
    fn zero_denominator_has_no_percentage() {
        let eval = evaluate(&measure("M1", "access", 80.0), Q3, Some(&counts(0, 0, 0)));
        assert_eq!(eval.percentage, None);
        assert_eq!(category_score([&eval]), None);
    }

    #[test]
    fn impossible_counts_are_rejected() {
        assert!(MeasureCounts::new(5, 4, 0).is_err());
        assert!(MeasureCounts::new(1, 4, 5).is_err());
    }

    #[test]
    fn category_score_leans_towards_larger_denominator() {
        let big = evaluate(&measure("A", "engagement", 50.0), Q3, Some(&counts(450, 500, 0)));
        let small = evaluate(&measure("B", "engagement", 50.0), Q3, Some(&counts(1, 5, 0)));
        let score = category_score([&big, &small]).unwrap();
        let pct_big = big.percentage.unwrap();
        let pct_small = small.percentage.unwrap();
        assert!((score - pct_big).abs() < (score - pct_small).abs());
        assert!((score - 451.0 / 505.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn report_groups_categories_and_ignores_other_periods() {
        let measures = vec![
            measure("A", "engagement", 50.0),
            measure("B", "engagement", 50.0),
            measure("C", "safety", 90.0),
        ];
        let results = vec![
            MeasureResult { measure_id: "A".into(), period: Q3, counts: counts(30, 60, 0) },
            MeasureResult { measure_id: "C".into(), period: Q3.previous(), counts: counts(9, 10, 0) },
        ];
        let report = build_report(Q3, &measures, &results);
        assert_eq!(report.measures[1].status, MeasureStatus::Pending);
        assert_eq!(report.measures[2].status, MeasureStatus::Pending);
        assert_eq!(report.categories.len(), 2);
        assert_eq!(report.categories[0].score, Some(50.0));
        assert_eq!(report.categories[1].score, None);
        assert_eq!(report.overall_score, Some(50.0));
    }

    #[tokio::test]
    async fn missing_results_table_leaves_measures_pending() {
        let mut source = MockQualitySource::new();
        source
            .expect_measures()
            .returning(|_| Ok(vec![measure("A", "engagement", 50.0)]));
        source
            .expect_results()
            .returning(|_| Err(FetchError::NotProvisioned("quality_measure_results".into())));
        let report = evaluate_period(&source, Q3, None).await.unwrap();
        assert_eq!(report.measures[0].status, MeasureStatus::Pending);
    }

    #[tokio::test]
    async fn query_failures_propagate() {
        let mut source = MockQualitySource::new();
        source.expect_measures().returning(|_| Ok(vec![]));
        source
            .expect_results()
            .returning(|_| Err(FetchError::Unavailable(sqlx::Error::PoolTimedOut)));
        assert!(evaluate_period(&source, Q3, None).await.is_err());
    }
}
