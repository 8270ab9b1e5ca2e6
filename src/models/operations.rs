//! Scheduling, workflow and billing records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::query_builder::Separated;
use sqlx::{FromRow, Postgres};
use uuid::Uuid;
use validator::Validate;

use super::resource::{Filter, NewResource, Resource};
use super::{validate_code_system, validate_task_priority, validate_task_status};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub appointment_type: String, // intake, therapy, med_management, group
    pub status: String,           // scheduled, arrived, completed, cancelled, no_show
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Resource for Appointment {
    const TABLE: &'static str = "appointments";
    const COLLECTION: &'static str = "appointments";
    const SINGULAR: &'static str = "appointment";
    const FILTERS: &'static [Filter] = &[
        Filter::id("patient_id", "patient_id"),
        Filter::id("provider_id", "provider_id"),
        Filter::text("status", "status"),
        Filter::text("appointment_type", "appointment_type"),
        Filter::from("from", "starts_at"),
        Filter::to("to", "starts_at"),
    ];
    const ORDER_BY: &'static str = "starts_at ASC";
    const DEFAULT_LIMIT: i64 = 100;
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewAppointment {
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub starts_at: DateTime<Utc>,
    #[validate(range(min = 5, max = 480))]
    pub duration_minutes: i32,
    #[validate(length(min = 1))]
    pub appointment_type: String,
    pub notes: Option<String>,
}

impl NewResource for NewAppointment {
    type Output = Appointment;

    const COLUMNS: &'static [&'static str] = &[
        "patient_id",
        "provider_id",
        "starts_at",
        "duration_minutes",
        "appointment_type",
        "status",
        "notes",
    ];

    fn bind_values(&self, values: &mut Separated<'_, '_, Postgres, &'static str>) {
        values
            .push_bind(self.patient_id)
            .push_bind(self.provider_id)
            .push_bind(self.starts_at)
            .push_bind(self.duration_minutes)
            .push_bind(self.appointment_type.clone())
            .push_bind("scheduled")
            .push_bind(self.notes.clone());
    }
}

/// A task on a staff work queue.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowTask {
    pub id: Uuid,
    pub patient_id: Option<Uuid>,
    pub title: String,
    pub category: String,
    pub assigned_to: Option<Uuid>,
    pub priority: String,
    pub status: String,
    pub due_on: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Resource for WorkflowTask {
    const TABLE: &'static str = "workflow_tasks";
    const COLLECTION: &'static str = "workflows";
    const SINGULAR: &'static str = "workflow";
    const FILTERS: &'static [Filter] = &[
        Filter::id("patient_id", "patient_id"),
        Filter::id("assigned_to", "assigned_to"),
        Filter::text("status", "status"),
        Filter::text("category", "category"),
        Filter::text("priority", "priority"),
    ];
    const ORDER_BY: &'static str = "due_on ASC NULLS LAST, created_at ASC";
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewWorkflowTask {
    pub patient_id: Option<Uuid>,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(min = 1))]
    pub category: String,
    pub assigned_to: Option<Uuid>,
    #[serde(default = "normal")]
    #[validate(custom = "validate_task_priority")]
    pub priority: String,
    pub due_on: Option<NaiveDate>,
}

impl NewResource for NewWorkflowTask {
    type Output = WorkflowTask;

    const COLUMNS: &'static [&'static str] = &[
        "patient_id",
        "title",
        "category",
        "assigned_to",
        "priority",
        "status",
        "due_on",
    ];

    fn bind_values(&self, values: &mut Separated<'_, '_, Postgres, &'static str>) {
        values
            .push_bind(self.patient_id)
            .push_bind(self.title.clone())
            .push_bind(self.category.clone())
            .push_bind(self.assigned_to)
            .push_bind(self.priority.clone())
            .push_bind("open")
            .push_bind(self.due_on);
    }
}

/// Body of `PATCH /api/workflows/{id}/status`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct WorkflowStatusUpdate {
    #[validate(custom = "validate_task_status")]
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillingCode {
    pub id: Uuid,
    pub code: String,
    pub code_system: String, // CPT, HCPCS, ICD-10
    pub description: String,
    pub category: Option<String>,
    pub specialty: Option<String>,
    pub rate_cents: Option<i64>,
    pub active: bool,
}

impl Resource for BillingCode {
    const TABLE: &'static str = "billing_codes";
    const COLLECTION: &'static str = "billing_codes";
    const SINGULAR: &'static str = "billing_code";
    const FILTERS: &'static [Filter] = &[
        Filter::text("code", "code"),
        Filter::text("code_system", "code_system"),
        Filter::text("category", "category"),
        Filter::text("specialty", "specialty"),
        Filter::flag("active", "active"),
    ];
    const ORDER_BY: &'static str = "code_system ASC, code ASC";
    const DEFAULT_LIMIT: i64 = 100;
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewBillingCode {
    #[validate(length(min = 1, max = 16))]
    pub code: String,
    #[validate(custom = "validate_code_system")]
    pub code_system: String,
    #[validate(length(min = 1))]
    pub description: String,
    pub category: Option<String>,
    pub specialty: Option<String>,
    #[validate(range(min = 0))]
    pub rate_cents: Option<i64>,
}

impl NewResource for NewBillingCode {
    type Output = BillingCode;

    const COLUMNS: &'static [&'static str] = &[
        "code",
        "code_system",
        "description",
        "category",
        "specialty",
        "rate_cents",
        "active",
    ];

    fn bind_values(&self, values: &mut Separated<'_, '_, Postgres, &'static str>) {
        values
            .push_bind(self.code.clone())
            .push_bind(self.code_system.clone())
            .push_bind(self.description.clone())
            .push_bind(self.category.clone())
            .push_bind(self.specialty.clone())
            .push_bind(self.rate_cents)
            .push_bind(true);
    }
}

/// Amounts are stored in cents.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Claim {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub payer_name: String,
    pub billing_code: String,
    pub service_date: NaiveDate,
    pub billed_cents: i64,
    pub paid_cents: Option<i64>,
    pub status: String, // submitted, accepted, denied, paid
    pub submitted_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl Resource for Claim {
    const TABLE: &'static str = "claims";
    const COLLECTION: &'static str = "claims";
    const SINGULAR: &'static str = "claim";
    const FILTERS: &'static [Filter] = &[
        Filter::id("patient_id", "patient_id"),
        Filter::text("status", "status"),
        Filter::text("payer", "payer_name"),
        Filter::from("from", "service_date"),
        Filter::to("to", "service_date"),
    ];
    const ORDER_BY: &'static str = "service_date DESC";
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewClaim {
    pub patient_id: Uuid,
    #[validate(length(min = 1))]
    pub payer_name: String,
    #[validate(length(min = 1, max = 16))]
    pub billing_code: String,
    pub service_date: NaiveDate,
    #[validate(range(min = 0))]
    pub billed_cents: i64,
}

impl NewResource for NewClaim {
    type Output = Claim;

    const COLUMNS: &'static [&'static str] = &[
        "patient_id",
        "payer_name",
        "billing_code",
        "service_date",
        "billed_cents",
        "status",
    ];

    fn bind_values(&self, values: &mut Separated<'_, '_, Postgres, &'static str>) {
        values
            .push_bind(self.patient_id)
            .push_bind(self.payer_name.clone())
            .push_bind(self.billing_code.clone())
            .push_bind(self.service_date)
            .push_bind(self.billed_cents)
            .push_bind("submitted");
    }
}

fn normal() -> String {
    "normal".into()
}
