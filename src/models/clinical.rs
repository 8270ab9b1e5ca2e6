//! Medication, prescribing, dispensing and alert records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::query_builder::Separated;
use sqlx::{FromRow, Postgres};
use uuid::Uuid;
use validator::Validate;

use super::resource::{Filter, NewResource, Resource};
use super::{
    validate_alert_severity, validate_dosing_hold_type, validate_medication_status,
    validate_prescription_status,
};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Medication {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub name: String,
    pub dose: String,
    pub route: String,
    pub frequency: String,
    pub status: String, // active, discontinued, completed
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub is_controlled: bool,
    pub created_at: DateTime<Utc>,
}

impl Resource for Medication {
    const TABLE: &'static str = "medications";
    const COLLECTION: &'static str = "medications";
    const SINGULAR: &'static str = "medication";
    const FILTERS: &'static [Filter] = &[
        Filter::id("patient_id", "patient_id"),
        Filter::text("status", "status"),
        Filter::text("name", "name"),
        Filter::flag("controlled", "is_controlled"),
    ];
    const ORDER_BY: &'static str = "start_date DESC";
    const DEFAULT_LIMIT: i64 = 100;
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewMedication {
    pub patient_id: Uuid,
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(length(min = 1))]
    pub dose: String,
    #[validate(length(min = 1))]
    pub route: String,
    #[validate(length(min = 1))]
    pub frequency: String,
    #[serde(default = "active")]
    #[validate(custom = "validate_medication_status")]
    pub status: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub is_controlled: bool,
}

impl NewResource for NewMedication {
    type Output = Medication;

    const COLUMNS: &'static [&'static str] = &[
        "patient_id",
        "name",
        "dose",
        "route",
        "frequency",
        "status",
        "start_date",
        "end_date",
        "is_controlled",
    ];

    fn bind_values(&self, values: &mut Separated<'_, '_, Postgres, &'static str>) {
        values
            .push_bind(self.patient_id)
            .push_bind(self.name.clone())
            .push_bind(self.dose.clone())
            .push_bind(self.route.clone())
            .push_bind(self.frequency.clone())
            .push_bind(self.status.clone())
            .push_bind(self.start_date)
            .push_bind(self.end_date)
            .push_bind(self.is_controlled);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Prescription {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub prescriber_id: Uuid,
    pub medication_name: String,
    pub dose: String,
    pub quantity: i32,
    pub refills: i32,
    pub pharmacy_ncpdp: Option<String>,
    pub status: String, // draft, signed, transmitted, cancelled
    pub is_controlled: bool,
    pub dea_schedule: Option<String>,
    pub written_at: DateTime<Utc>,
}

impl Resource for Prescription {
    const TABLE: &'static str = "prescriptions";
    const COLLECTION: &'static str = "prescriptions";
    const SINGULAR: &'static str = "prescription";
    const FILTERS: &'static [Filter] = &[
        Filter::id("patient_id", "patient_id"),
        Filter::id("prescriber_id", "prescriber_id"),
        Filter::text("status", "status"),
        Filter::from("from", "written_at"),
        Filter::to("to", "written_at"),
    ];
    const ORDER_BY: &'static str = "written_at DESC";
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewPrescription {
    pub patient_id: Uuid,
    pub prescriber_id: Uuid,
    #[validate(length(min = 1))]
    pub medication_name: String,
    #[validate(length(min = 1))]
    pub dose: String,
    #[validate(range(min = 1, max = 1000))]
    pub quantity: i32,
    #[validate(range(min = 0, max = 11))]
    pub refills: i32,
    pub pharmacy_ncpdp: Option<String>,
    #[serde(default = "draft")]
    #[validate(custom = "validate_prescription_status")]
    pub status: String,
    #[serde(default)]
    pub is_controlled: bool,
    pub dea_schedule: Option<String>,
}

impl NewResource for NewPrescription {
    type Output = Prescription;

    const COLUMNS: &'static [&'static str] = &[
        "patient_id",
        "prescriber_id",
        "medication_name",
        "dose",
        "quantity",
        "refills",
        "pharmacy_ncpdp",
        "status",
        "is_controlled",
        "dea_schedule",
    ];

    fn bind_values(&self, values: &mut Separated<'_, '_, Postgres, &'static str>) {
        values
            .push_bind(self.patient_id)
            .push_bind(self.prescriber_id)
            .push_bind(self.medication_name.clone())
            .push_bind(self.dose.clone())
            .push_bind(self.quantity)
            .push_bind(self.refills)
            .push_bind(self.pharmacy_ncpdp.clone())
            .push_bind(self.status.clone())
            .push_bind(self.is_controlled)
            .push_bind(self.dea_schedule.clone());
    }
}

/// A hold placed on take-home or in-clinic dosing. `created_by` is taken
/// from the session claims on insert.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DosingHold {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub medication_name: String,
    pub hold_type: String, // clinical, administrative, missed_doses
    pub reason: String,
    pub status: String, // active, released
    pub starts_on: NaiveDate,
    pub ends_on: Option<NaiveDate>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Resource for DosingHold {
    const TABLE: &'static str = "dosing_holds";
    const COLLECTION: &'static str = "dosing_holds";
    const SINGULAR: &'static str = "dosing_hold";
    const FILTERS: &'static [Filter] = &[
        Filter::id("patient_id", "patient_id"),
        Filter::text("status", "status"),
        Filter::text("hold_type", "hold_type"),
    ];
    const ORDER_BY: &'static str = "starts_on DESC";
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewDosingHold {
    pub patient_id: Uuid,
    #[validate(length(min = 1))]
    pub medication_name: String,
    #[validate(custom = "validate_dosing_hold_type")]
    pub hold_type: String,
    #[validate(length(min = 1, max = 2000))]
    pub reason: String,
    pub starts_on: NaiveDate,
    pub ends_on: Option<NaiveDate>,
}

impl NewResource for NewDosingHold {
    type Output = DosingHold;

    const COLUMNS: &'static [&'static str] = &[
        "patient_id",
        "medication_name",
        "hold_type",
        "reason",
        "status",
        "starts_on",
        "ends_on",
    ];

    fn bind_values(&self, values: &mut Separated<'_, '_, Postgres, &'static str>) {
        values
            .push_bind(self.patient_id)
            .push_bind(self.medication_name.clone())
            .push_bind(self.hold_type.clone())
            .push_bind(self.reason.clone())
            .push_bind("active")
            .push_bind(self.starts_on)
            .push_bind(self.ends_on);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Alert {
    pub id: Uuid,
    pub patient_id: Option<Uuid>,
    pub alert_type: String, // e.g., "clinical", "medication", "pmp"
    pub severity: String,   // critical, high, medium, low
    pub message: String,
    pub acknowledged: bool,
    pub acknowledged_by: Option<Uuid>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Resource for Alert {
    const TABLE: &'static str = "alerts";
    const COLLECTION: &'static str = "alerts";
    const SINGULAR: &'static str = "alert";
    const FILTERS: &'static [Filter] = &[
        Filter::id("patient_id", "patient_id"),
        Filter::text("severity", "severity"),
        Filter::text("alert_type", "alert_type"),
        Filter::flag("acknowledged", "acknowledged"),
    ];
    const ORDER_BY: &'static str = "created_at DESC";
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewAlert {
    pub patient_id: Option<Uuid>,
    #[validate(length(min = 1))]
    pub alert_type: String,
    #[validate(custom = "validate_alert_severity")]
    pub severity: String,
    #[validate(length(min = 1, max = 2000))]
    pub message: String,
}

impl NewResource for NewAlert {
    type Output = Alert;

    const COLUMNS: &'static [&'static str] = &["patient_id", "alert_type", "severity", "message"];

    fn bind_values(&self, values: &mut Separated<'_, '_, Postgres, &'static str>) {
        values
            .push_bind(self.patient_id)
            .push_bind(self.alert_type.clone())
            .push_bind(self.severity.clone())
            .push_bind(self.message.clone());
    }
}

fn active() -> String {
    "active".into()
}

fn draft() -> String {
    "draft".into()
}
