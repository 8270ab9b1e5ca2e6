//! Health-equity stratified outcome aggregation.
//!
//! Outcome records are grouped by stratum for a window and its baseline: the
//! previous calendar period, or the equally long range before an ad hoc
//! window. Each group gets a sample-size weighted rate, a trend
//! against the prior window and an alert level from its shortfall against the
//! outcome type's benchmark. Groups with too few samples are reported as
//! `insufficient_data` and carry no figures at all.

use std::cmp::{Ordering, Reverse};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{instrument, warn};

use super::period::{ComparisonWindow, Period};
use super::sources::OutcomeSource;
use crate::config::{Benchmark, EquityConfig};
use crate::error::FetchError;

/// Absorbs float noise so that a value sitting exactly on a threshold
/// resolves towards the more severe side.
const EPSILON: f64 = 1e-9;

/// Attribute used to group outcomes for disparity analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Race,
    Ethnicity,
    Insurance,
    Geography,
    Gender,
    AgeGroup,
    Language,
}

impl Dimension {
    pub const ALL: [Dimension; 7] = [
        Dimension::Race,
        Dimension::Ethnicity,
        Dimension::Insurance,
        Dimension::Geography,
        Dimension::Gender,
        Dimension::AgeGroup,
        Dimension::Language,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Race => "race",
            Dimension::Ethnicity => "ethnicity",
            Dimension::Insurance => "insurance",
            Dimension::Geography => "geography",
            Dimension::Gender => "gender",
            Dimension::AgeGroup => "age_group",
            Dimension::Language => "language",
        }
    }

    /// Exact stored name only; request aliases go through `FromStr`.
    pub fn from_canonical(name: &str) -> Option<Dimension> {
        Dimension::ALL.into_iter().find(|d| d.as_str() == name)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown stratification dimension {0:?}")]
pub struct UnknownDimension(pub String);

impl FromStr for Dimension {
    type Err = UnknownDimension;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "race" => Ok(Dimension::Race),
            "ethnicity" => Ok(Dimension::Ethnicity),
            "insurance" | "payer" | "payer_type" => Ok(Dimension::Insurance),
            "geography" | "region" | "zip" => Ok(Dimension::Geography),
            "gender" | "sex" => Ok(Dimension::Gender),
            "age_group" | "age" => Ok(Dimension::AgeGroup),
            "language" | "primary_language" => Ok(Dimension::Language),
            other => Err(UnknownDimension(other.to_string())),
        }
    }
}

/// One measured outcome for a cohort slice, as validated at the data-access
/// boundary. `rate` is a fraction in `0..=1`.
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeRecord {
    pub subject_id: String,
    pub outcome_type: String,
    pub dimension: Dimension,
    pub stratum: String,
    pub rate: f64,
    pub sample_size: u64,
    pub measured_on: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Worsening,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    None,
    Watch,
    Concern,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StratumStatus {
    Reported {
        rate: f64,
        /// Positive when the rate is worse than benchmark.
        benchmark_gap: f64,
        prior_rate: Option<f64>,
        /// `None` when the prior window lacks enough samples to compare.
        trend: Option<Trend>,
        alert_level: AlertLevel,
    },
    InsufficientData,
}

impl StratumStatus {
    fn severity_rank(&self) -> i8 {
        match self {
            StratumStatus::Reported { alert_level, .. } => *alert_level as i8,
            StratumStatus::InsufficientData => -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StratifiedOutcome {
    pub outcome_type: String,
    pub dimension: Dimension,
    pub stratum: String,
    pub period: Period,
    pub sample_size: u64,
    #[serde(flatten)]
    pub status: StratumStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StratifiedReport {
    pub outcome_type: String,
    pub dimension: Dimension,
    pub period: Period,
    pub prior_period: Period,
    pub benchmark: f64,
    pub min_sample_size: u64,
    pub stratified_outcomes: Vec<StratifiedOutcome>,
}

#[derive(Debug, Clone)]
pub struct StratificationQuery {
    pub outcome_type: String,
    pub dimension: Dimension,
    pub window: ComparisonWindow,
}

#[derive(Debug, Clone, Copy, Default)]
struct Totals {
    weighted: f64,
    n: u64,
}

impl Totals {
    fn add(&mut self, record: &OutcomeRecord) {
        self.weighted += record.rate * record.sample_size as f64;
        self.n += record.sample_size;
    }

    fn rate(&self) -> Option<f64> {
        (self.n > 0).then(|| self.weighted / self.n as f64)
    }
}

/// `Σ(rate_i × n_i) / Σ(n_i)`; `None` when no samples.
pub fn weighted_rate<'a>(records: impl IntoIterator<Item = &'a OutcomeRecord>) -> Option<f64> {
    let mut totals = Totals::default();
    for record in records {
        totals.add(record);
    }
    totals.rate()
}

/// How far `rate` falls short of benchmark; negative when it beats it.
pub fn benchmark_gap(rate: f64, benchmark: &Benchmark) -> f64 {
    if benchmark.higher_is_better {
        benchmark.target - rate
    } else {
        rate - benchmark.target
    }
}

pub fn trend(current: f64, prior: f64, benchmark: &Benchmark, min_delta: f64) -> Trend {
    let delta = current - prior;
    if delta.abs() + EPSILON < min_delta {
        return Trend::Stable;
    }
    if (delta > 0.0) == benchmark.higher_is_better {
        Trend::Improving
    } else {
        Trend::Worsening
    }
}

pub fn alert_level(gap: f64, cfg: &EquityConfig) -> AlertLevel {
    let reaches = |threshold: f64| gap + EPSILON >= threshold;
    if reaches(cfg.critical_gap) {
        AlertLevel::Critical
    } else if reaches(cfg.concern_gap) {
        AlertLevel::Concern
    } else if reaches(cfg.watch_gap) {
        AlertLevel::Watch
    } else {
        AlertLevel::None
    }
}

/// Group and score records already fetched for both halves of `window`.
///
/// Records for other dimensions or outside both windows are ignored. Every
/// stratum seen in either window appears in the output.
pub fn stratify(
    outcome_type: &str,
    dimension: Dimension,
    window: ComparisonWindow,
    records: &[OutcomeRecord],
    cfg: &EquityConfig,
) -> Vec<StratifiedOutcome> {
    let benchmark = cfg.benchmark_for(outcome_type);

    let mut groups: BTreeMap<&str, (Totals, Totals)> = BTreeMap::new();
    for record in records {
        if record.dimension != dimension || record.outcome_type != outcome_type {
            continue;
        }
        let slot = groups.entry(record.stratum.as_str()).or_default();
        if window.current.contains(record.measured_on) {
            slot.0.add(record);
        } else if window.prior.contains(record.measured_on) {
            slot.1.add(record);
        }
    }

    let mut out: Vec<StratifiedOutcome> = groups
        .into_iter()
        .map(|(stratum, (current, prior))| {
            let status = match current.rate() {
                Some(rate) if current.n >= cfg.min_sample_size => {
                    let prior_rate = prior.rate().filter(|_| prior.n >= cfg.min_sample_size);
                    let gap = benchmark_gap(rate, benchmark);
                    StratumStatus::Reported {
                        rate,
                        benchmark_gap: gap,
                        prior_rate,
                        trend: prior_rate.map(|p| trend(rate, p, benchmark, cfg.trend_min_delta)),
                        alert_level: alert_level(gap, cfg),
                    }
                }
                _ => StratumStatus::InsufficientData,
            };
            StratifiedOutcome {
                outcome_type: outcome_type.to_string(),
                dimension,
                stratum: stratum.to_string(),
                period: window.current,
                sample_size: current.n,
                status,
            }
        })
        .collect();

    out.sort_by(compare_for_display);
    out
}

/// Most severe first, then stratum name ignoring case.
fn compare_for_display(a: &StratifiedOutcome, b: &StratifiedOutcome) -> Ordering {
    Reverse(a.status.severity_rank())
        .cmp(&Reverse(b.status.severity_rank()))
        .then_with(|| a.stratum.to_lowercase().cmp(&b.stratum.to_lowercase()))
        .then_with(|| a.stratum.cmp(&b.stratum))
}

/// Fetch and aggregate one outcome type along one dimension.
///
/// A table that is not provisioned yet yields an empty report. Any other
/// fetch failure is returned to the caller unchanged.
#[instrument(skip(source, cfg), fields(outcome_type = %query.outcome_type, dimension = %query.dimension))]
pub async fn aggregate(
    source: &dyn OutcomeSource,
    cfg: &EquityConfig,
    query: &StratificationQuery,
) -> Result<StratifiedReport, FetchError> {
    let records = match source
        .outcome_records(&query.outcome_type, query.dimension, query.window.span())
        .await
    {
        Ok(records) => records,
        Err(e) if e.is_not_provisioned() => {
            warn!(error = %e, "outcome table missing; reporting no strata");
            Vec::new()
        }
        Err(e) => return Err(e),
    };

    Ok(StratifiedReport {
        outcome_type: query.outcome_type.clone(),
        dimension: query.dimension,
        period: query.window.current,
        prior_period: query.window.prior,
        benchmark: cfg.benchmark_for(&query.outcome_type).target,
        min_sample_size: cfg.min_sample_size,
        stratified_outcomes: stratify(
            &query.outcome_type,
            query.dimension,
            query.window,
            &records,
            cfg,
        ),
    })
}
