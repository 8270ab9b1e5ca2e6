//! Resource queries shared by the CRUD handlers.

use std::collections::HashMap;

use chrono::NaiveDate;
use sqlx::{Postgres, QueryBuilder};
use tracing::{info, instrument};
use uuid::Uuid;

use super::DbClient;
use crate::core::notifications::Notification;
use crate::error::{ApiError, FetchError};
use crate::models::{
    Alert, Filter, FilterKind, FilterValue, NewResource, Resource, WorkflowTask,
};

/// Upper bound on `limit`, whatever the resource default.
pub const MAX_LIMIT: i64 = 100;

/// Parse the query string against a resource's filter allow-list.
pub fn parse_filters(
    filters: &'static [Filter],
    params: &HashMap<String, String>,
) -> Result<Vec<(Filter, FilterValue)>, ApiError> {
    let mut parsed = Vec::new();
    for filter in filters {
        let Some(raw) = params.get(filter.param) else {
            continue;
        };
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let value = match filter.kind {
            FilterKind::Text => FilterValue::Text(raw.to_string()),
            FilterKind::Id => Uuid::parse_str(raw)
                .map(FilterValue::Id)
                .map_err(|_| ApiError::validation(format!("{} must be a valid id", filter.param)))?,
            FilterKind::Flag => raw
                .parse::<bool>()
                .map(FilterValue::Flag)
                .map_err(|_| ApiError::validation(format!("{} must be true or false", filter.param)))?,
            FilterKind::From | FilterKind::To => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(FilterValue::Date)
                .map_err(|_| ApiError::validation(format!("{} must be a YYYY-MM-DD date", filter.param)))?,
        };
        parsed.push((*filter, value));
    }
    Ok(parsed)
}

/// Resolve the row cap from `limit`, falling back to the resource default.
pub fn parse_limit(default: i64, params: &HashMap<String, String>) -> Result<i64, ApiError> {
    match params.get("limit") {
        None => Ok(default.min(MAX_LIMIT)),
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .map(|n| n.clamp(1, MAX_LIMIT))
            .map_err(|_| ApiError::validation("limit must be a number")),
    }
}

fn select_query<R: Resource>(filters: &[(Filter, FilterValue)], limit: i64) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("SELECT * FROM {} WHERE TRUE", R::TABLE));
    for (filter, value) in filters {
        let op = match filter.kind {
            FilterKind::From => ">=",
            FilterKind::To => "<=",
            _ => "=",
        };
        qb.push(format!(" AND {} {} ", filter.column, op));
        match value.clone() {
            FilterValue::Text(v) => qb.push_bind(v),
            FilterValue::Id(v) => qb.push_bind(v),
            FilterValue::Flag(v) => qb.push_bind(v),
            FilterValue::Date(v) => qb.push_bind(v),
        };
    }
    qb.push(format!(" ORDER BY {} LIMIT ", R::ORDER_BY));
    qb.push_bind(limit);
    qb
}

#[instrument(skip(client, filters), fields(table = R::TABLE))]
pub async fn list<R: Resource>(
    client: &DbClient,
    filters: &[(Filter, FilterValue)],
    limit: i64,
) -> Result<Vec<R>, FetchError> {
    let to_fetch = |e| FetchError::from_sqlx(R::TABLE, e);
    let mut tx = client.begin().await.map_err(to_fetch)?;
    let mut qb = select_query::<R>(filters, limit);
    let rows = qb
        .build_query_as::<R>()
        .fetch_all(&mut *tx)
        .await
        .map_err(to_fetch)?;
    Ok(rows)
}

#[instrument(skip(client), fields(table = R::TABLE))]
pub async fn find<R: Resource>(client: &DbClient, id: Uuid) -> Result<Option<R>, FetchError> {
    let to_fetch = |e| FetchError::from_sqlx(R::TABLE, e);
    let mut tx = client.begin().await.map_err(to_fetch)?;
    let row = sqlx::query_as::<_, R>(&format!("SELECT * FROM {} WHERE id = $1", R::TABLE))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(to_fetch)?;
    Ok(row)
}

fn insert_query<N: NewResource>(new: &N) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!(
        "INSERT INTO {} ({}) VALUES (",
        N::Output::TABLE,
        N::COLUMNS.join(", ")
    ));
    {
        let mut values = qb.separated(", ");
        new.bind_values(&mut values);
    }
    qb.push(") RETURNING *");
    qb
}

#[instrument(skip(client, new), fields(table = N::Output::TABLE))]
pub async fn insert<N: NewResource>(client: &DbClient, new: &N) -> Result<N::Output, sqlx::Error> {
    let mut tx = client.begin().await?;
    let mut qb = insert_query(new);
    let row = qb
        .build_query_as::<N::Output>()
        .fetch_one(&mut *tx)
        .await?;
    tx.commit().await?;
    info!(table = N::Output::TABLE, "row inserted");
    Ok(row)
}

#[instrument(skip(client), fields(alert_id = %alert_id))]
pub async fn acknowledge_alert(
    client: &DbClient,
    alert_id: Uuid,
    acknowledged_by: Uuid,
) -> Result<Option<Alert>, sqlx::Error> {
    let mut tx = client.begin().await?;
    let alert = sqlx::query_as::<_, Alert>(
        "UPDATE alerts
         SET acknowledged = TRUE, acknowledged_by = $1, acknowledged_at = now()
         WHERE id = $2
         RETURNING *",
    )
    .bind(acknowledged_by)
    .bind(alert_id)
    .fetch_optional(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(alert)
}

#[instrument(skip(client), fields(task_id = %task_id))]
pub async fn update_workflow_status(
    client: &DbClient,
    task_id: Uuid,
    status: &str,
) -> Result<Option<WorkflowTask>, sqlx::Error> {
    let mut tx = client.begin().await?;
    let task = sqlx::query_as::<_, WorkflowTask>(
        "UPDATE workflow_tasks
         SET status = $1, updated_at = now()
         WHERE id = $2
         RETURNING *",
    )
    .bind(status)
    .bind(task_id)
    .fetch_optional(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(task)
}

/// Persist generated notifications for one user. Already-stored ids are
/// skipped, so replaying a batch is harmless. Returns the number inserted.
#[instrument(skip(client, notifications), fields(count = notifications.len()))]
pub async fn store_notifications(
    client: &DbClient,
    user_id: Uuid,
    notifications: &[Notification],
) -> Result<u64, sqlx::Error> {
    if notifications.is_empty() {
        return Ok(0);
    }
    let mut qb = QueryBuilder::<Postgres>::new(
        "INSERT INTO notifications (id, user_id, kind, priority, title, message, entity_type, entity_id) ",
    );
    qb.push_values(notifications, |mut b, n| {
        b.push_bind(n.id)
            .push_bind(user_id)
            .push_bind(n.kind.as_str())
            .push_bind(n.priority.as_str())
            .push_bind(n.title.clone())
            .push_bind(n.message.clone())
            .push_bind(n.entity_type.clone())
            .push_bind(n.entity_id.clone());
    });
    qb.push(" ON CONFLICT (user_id, id) DO NOTHING");

    let mut tx = client.begin().await?;
    let result = qb.build().execute(&mut *tx).await?;
    tx.commit().await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn placeholders<N: NewResource>(new: &N) -> usize {
        let qb = insert_query(new);
        qb.sql().matches('$').count()
    }

    #[test]
    fn unknown_params_are_ignored() {
        let parsed = parse_filters(Patient::FILTERS, &params(&[("status", "active"), ("drop", "1")])).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].1, FilterValue::Text("active".into()));
    }

    #[test]
    fn malformed_id_is_a_validation_error() {
        let err = parse_filters(Medication::FILTERS, &params(&[("patient_id", "abc")])).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn date_range_filters_bind_inclusive_bounds() {
        let parsed = parse_filters(
            Claim::FILTERS,
            &params(&[("from", "2026-09-01"), ("to", "2026-09-30")]),
        )
        .unwrap();
        let qb = select_query::<Claim>(&parsed, 50);
        let sql = qb.sql();
        assert!(sql.contains("service_date >= $1"));
        assert!(sql.contains("service_date <= $2"));
        assert!(sql.ends_with("LIMIT $3"));
    }

    #[test]
    fn limit_is_clamped() {
        assert_eq!(parse_limit(50, &params(&[])).unwrap(), 50);
        assert_eq!(parse_limit(50, &params(&[("limit", "5000")])).unwrap(), MAX_LIMIT);
        assert_eq!(parse_limit(50, &params(&[("limit", "0")])).unwrap(), 1);
        assert!(parse_limit(50, &params(&[("limit", "ten")])).is_err());
    }

    #[test]
    fn inserts_bind_one_value_per_column() {
        let patient = NewPatient {
            mrn: "BH-1".into(),
            first_name: "Sam".into(),
            last_name: "Reyes".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 1, 2).unwrap(),
            sex: None,
            race: None,
            ethnicity: None,
            insurance_type: Some("medicaid".into()),
            primary_language: None,
            status: "active".into(),
        };
        assert_eq!(placeholders(&patient), NewPatient::COLUMNS.len());

        let hold = NewDosingHold {
            patient_id: Uuid::new_v4(),
            medication_name: "methadone".into(),
            hold_type: "clinical".into(),
            reason: "sedation at last visit".into(),
            starts_on: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
            ends_on: None,
        };
        assert_eq!(placeholders(&hold), NewDosingHold::COLUMNS.len());

        let task = NewWorkflowTask {
            patient_id: None,
            title: "Prior auth renewal".into(),
            category: "billing".into(),
            assigned_to: None,
            priority: "normal".into(),
            due_on: None,
        };
        assert_eq!(placeholders(&task), NewWorkflowTask::COLUMNS.len());

        let claim = NewClaim {
            patient_id: Uuid::new_v4(),
            payer_name: "State Medicaid".into(),
            billing_code: "H0020".into(),
            service_date: NaiveDate::from_ymd_opt(2026, 9, 15).unwrap(),
            billed_cents: 4200,
        };
        assert_eq!(placeholders(&claim), NewClaim::COLUMNS.len());

        let alert = NewAlert {
            patient_id: None,
            alert_type: "pmp".into(),
            severity: "high".into(),
            message: "overlapping controlled prescriptions".into(),
        };
        assert_eq!(placeholders(&alert), NewAlert::COLUMNS.len());
    }
}
