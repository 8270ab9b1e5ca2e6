//! Evidence-based practice, research and quality notifications.
//!
//! Each rule is a pure function of its inputs. Ids are UUID v5 values derived
//! from the rule, the triggering entity and a discriminator, so regenerating a
//! batch from the same inputs yields the same ids and a persisting caller can
//! skip rows it already holds.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use tracing::{instrument, warn};
use uuid::Uuid;

use super::period::ReportingPeriod;
use super::quality::{self, MeasureEvaluation, MeasureStatus};
use super::sources::{EvidenceSource, QualitySource, ResearchSource};
use crate::config::NotificationConfig;
use crate::error::FetchError;

const NOTIFICATION_NAMESPACE: Uuid = Uuid::from_u128(0x6d65_7269_6469_616e_8e0d_4c1f_9a3b_2f70);

/// Enrollment fractions, in percent, that raise a milestone notice.
const MILESTONES: [u32; 4] = [25, 50, 75, 100];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    QualityBelowTarget,
    QualityPerformanceDrop,
    NewGuideline,
    EnrollmentBehindTarget,
    EnrollmentMilestone,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::QualityBelowTarget => "quality_below_target",
            NotificationKind::QualityPerformanceDrop => "quality_performance_drop",
            NotificationKind::NewGuideline => "new_guideline",
            NotificationKind::EnrollmentBehindTarget => "enrollment_behind_target",
            NotificationKind::EnrollmentMilestone => "enrollment_milestone",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub priority: Priority,
    pub title: String,
    pub message: String,
    pub entity_type: String,
    pub entity_id: String,
}

impl Notification {
    fn new(kind: NotificationKind, priority: Priority, entity_type: &str, entity_id: String, discriminator: &str) -> Self {
        let key = format!("{}:{}:{}:{}", kind.as_str(), entity_type, entity_id, discriminator);
        Self {
            id: Uuid::new_v5(&NOTIFICATION_NAMESPACE, key.as_bytes()),
            kind,
            priority,
            title: String::new(),
            message: String::new(),
            entity_type: entity_type.to_string(),
            entity_id,
        }
    }

    fn with_text(mut self, title: impl Into<String>, message: impl Into<String>) -> Self {
        self.title = title.into();
        self.message = message.into();
        self
    }
}

/// Strength of evidence behind a practice guideline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum EvidenceGrade {
    A,
    B,
    C,
    D,
}

impl fmt::Display for EvidenceGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EvidenceGrade::A => "A",
            EvidenceGrade::B => "B",
            EvidenceGrade::C => "C",
            EvidenceGrade::D => "D",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown evidence grade {0:?}")]
pub struct UnknownGrade(pub String);

impl FromStr for EvidenceGrade {
    type Err = UnknownGrade;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "A" | "a" => Ok(EvidenceGrade::A),
            "B" | "b" => Ok(EvidenceGrade::B),
            "C" | "c" => Ok(EvidenceGrade::C),
            "D" | "d" => Ok(EvidenceGrade::D),
            other => Err(UnknownGrade(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Guideline {
    pub id: Uuid,
    pub title: String,
    pub evidence_grade: EvidenceGrade,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Study {
    pub id: Uuid,
    pub title: String,
    pub enrolled: u32,
    pub enrollment_target: u32,
    pub enrollment_deadline: NaiveDate,
}

pub fn quality_below_target(evaluations: &[MeasureEvaluation], cfg: &NotificationConfig) -> Vec<Notification> {
    evaluations
        .iter()
        .filter(|e| e.status == MeasureStatus::NotMet)
        .filter_map(|e| {
            let gap = e.gap_pp()?;
            let priority = if gap >= 2.0 * cfg.below_target_high_gap_pp {
                Priority::Urgent
            } else if gap >= cfg.below_target_high_gap_pp {
                Priority::High
            } else {
                Priority::Medium
            };
            let n = Notification::new(
                NotificationKind::QualityBelowTarget,
                priority,
                "quality_measure",
                e.measure_id.clone(),
                &e.period.to_string(),
            );
            Some(n.with_text(
                format!("{} below target", e.name),
                format!(
                    "{} is at {:.1}% for {}, {:.1} points under the {:.1}% target.",
                    e.name,
                    e.target_pct - gap,
                    e.period,
                    gap,
                    e.target_pct
                ),
            ))
        })
        .collect()
}

pub fn quality_performance_drops(
    current: &[MeasureEvaluation],
    prior: &[MeasureEvaluation],
    cfg: &NotificationConfig,
) -> Vec<Notification> {
    let prior: HashMap<&str, f64> = prior
        .iter()
        .filter_map(|e| Some((e.measure_id.as_str(), e.percentage?)))
        .collect();

    current
        .iter()
        .filter_map(|e| {
            let now_pct = e.percentage?;
            let before = *prior.get(e.measure_id.as_str())?;
            let drop = before - now_pct;
            if drop < cfg.drop_threshold_pp {
                return None;
            }
            let priority = if drop >= 2.0 * cfg.drop_threshold_pp {
                Priority::High
            } else {
                Priority::Medium
            };
            let n = Notification::new(
                NotificationKind::QualityPerformanceDrop,
                priority,
                "quality_measure",
                e.measure_id.clone(),
                &e.period.to_string(),
            );
            Some(n.with_text(
                format!("{} dropped {:.1} points", e.name, drop),
                format!(
                    "{} fell from {:.1}% to {:.1}% in {}.",
                    e.name, before, now_pct, e.period
                ),
            ))
        })
        .collect()
}

/// Guidelines published after `last_viewed`, or inside the lookback window
/// when the user has never viewed the library. Future-dated entries are held
/// back until they are published.
pub fn new_guidelines(
    guidelines: &[Guideline],
    last_viewed: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    cfg: &NotificationConfig,
) -> Vec<Notification> {
    let since = guideline_cutoff(last_viewed, now, cfg);
    guidelines
        .iter()
        .filter(|g| g.published_at > since && g.published_at <= now)
        .map(|g| {
            let priority = match g.evidence_grade {
                EvidenceGrade::A => Priority::High,
                EvidenceGrade::B => Priority::Medium,
                EvidenceGrade::C | EvidenceGrade::D => Priority::Low,
            };
            Notification::new(
                NotificationKind::NewGuideline,
                priority,
                "guideline",
                g.id.to_string(),
                "published",
            )
            .with_text(
                format!("New guideline: {}", g.title),
                format!(
                    "Grade {} evidence, published {}.",
                    g.evidence_grade,
                    g.published_at.date_naive()
                ),
            )
        })
        .collect()
}

pub fn guideline_cutoff(last_viewed: Option<DateTime<Utc>>, now: DateTime<Utc>, cfg: &NotificationConfig) -> DateTime<Utc> {
    last_viewed.unwrap_or_else(|| now - Duration::days(cfg.guideline_lookback_days))
}

pub fn enrollment_behind_target(studies: &[Study], today: NaiveDate, cfg: &NotificationConfig) -> Vec<Notification> {
    studies
        .iter()
        .filter(|s| s.enrolled < s.enrollment_target)
        .filter_map(|s| {
            let days_left = (s.enrollment_deadline - today).num_days();
            if !(0..=cfg.enrollment_horizon_days).contains(&days_left) {
                return None;
            }
            let priority = match days_left {
                0..=7 => Priority::Urgent,
                8..=14 => Priority::High,
                _ => Priority::Medium,
            };
            let n = Notification::new(
                NotificationKind::EnrollmentBehindTarget,
                priority,
                "study",
                s.id.to_string(),
                &s.enrollment_deadline.to_string(),
            );
            Some(n.with_text(
                format!("{} enrollment behind target", s.title),
                format!(
                    "{} of {} participants enrolled with {} days until the {} deadline.",
                    s.enrolled, s.enrollment_target, days_left, s.enrollment_deadline
                ),
            ))
        })
        .collect()
}

/// One notice per study for the highest milestone reached.
pub fn enrollment_milestones(studies: &[Study]) -> Vec<Notification> {
    studies
        .iter()
        .filter(|s| s.enrollment_target > 0)
        .filter_map(|s| {
            let reached = u64::from(s.enrolled) * 100 / u64::from(s.enrollment_target);
            let milestone = MILESTONES
                .iter()
                .rev()
                .find(|m| reached >= u64::from(**m))?;
            let n = Notification::new(
                NotificationKind::EnrollmentMilestone,
                Priority::Low,
                "study",
                s.id.to_string(),
                &milestone.to_string(),
            );
            Some(n.with_text(
                format!("{} reached {}% enrollment", s.title, milestone),
                format!("{} of {} participants enrolled.", s.enrolled, s.enrollment_target),
            ))
        })
        .collect()
}

/// Highest priority first; ties broken so output order is stable.
pub fn sort_notifications(notifications: &mut [Notification]) {
    notifications.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.kind.cmp(&b.kind))
            .then_with(|| a.entity_id.cmp(&b.entity_id))
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationBatch {
    pub generated_at: DateTime<Utc>,
    pub period: ReportingPeriod,
    pub notifications: Vec<Notification>,
    /// Inputs that could not be read; their rules did not run.
    pub unavailable: Vec<&'static str>,
}

pub struct NotificationSources<'a> {
    pub quality: &'a dyn QualitySource,
    pub evidence: &'a dyn EvidenceSource,
    pub research: &'a dyn ResearchSource,
}

/// Run every rule for one user. A failing input disables only the rules that
/// depend on it.
#[instrument(skip(sources, cfg))]
pub async fn generate(
    sources: &NotificationSources<'_>,
    user_id: Uuid,
    period: ReportingPeriod,
    now: DateTime<Utc>,
    cfg: &NotificationConfig,
) -> NotificationBatch {
    let (current, prior, last_viewed, studies) = futures::join!(
        quality::evaluate_period(sources.quality, period, None),
        quality::evaluate_period(sources.quality, period.previous(), None),
        sources.evidence.last_viewed(user_id),
        sources.research.open_studies(),
    );

    let mut notifications = Vec::new();
    let mut unavailable = Vec::new();

    match (current, prior) {
        (Ok(current), Ok(prior)) => {
            notifications.extend(quality_below_target(&current.measures, cfg));
            notifications.extend(quality_performance_drops(&current.measures, &prior.measures, cfg));
        }
        (Ok(current), Err(e)) => {
            warn!(error = %e, "prior quality period unavailable");
            notifications.extend(quality_below_target(&current.measures, cfg));
            unavailable.push("quality_trend");
        }
        (Err(e), _) => {
            warn!(error = %e, "quality results unavailable");
            unavailable.push("quality");
        }
    }

    match last_viewed {
        Ok(last_viewed) => {
            let since = guideline_cutoff(last_viewed, now, cfg);
            match not_provisioned_as_empty(sources.evidence.guidelines_published_since(since).await) {
                Ok(guidelines) => notifications.extend(new_guidelines(&guidelines, last_viewed, now, cfg)),
                Err(e) => {
                    warn!(error = %e, "guidelines unavailable");
                    unavailable.push("guidelines");
                }
            }
        }
        Err(e) if e.is_not_provisioned() => {}
        Err(e) => {
            warn!(error = %e, "guideline view history unavailable");
            unavailable.push("guidelines");
        }
    }

    match not_provisioned_as_empty(studies) {
        Ok(studies) => {
            notifications.extend(enrollment_behind_target(&studies, now.date_naive(), cfg));
            notifications.extend(enrollment_milestones(&studies));
        }
        Err(e) => {
            warn!(error = %e, "studies unavailable");
            unavailable.push("research");
        }
    }

    sort_notifications(&mut notifications);
    NotificationBatch {
        generated_at: now,
        period,
        notifications,
        unavailable,
    }
}

fn not_provisioned_as_empty<T>(rows: Result<Vec<T>, FetchError>) -> Result<Vec<T>, FetchError> {
    match rows {
        Err(e) if e.is_not_provisioned() => Ok(Vec::new()),
        other => other,
    }
}
