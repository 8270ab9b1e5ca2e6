use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::query_builder::Separated;
use sqlx::{FromRow, Postgres};
use uuid::Uuid;
use validator::Validate;

use super::resource::{Filter, NewResource, Resource};
use super::validate_patient_status;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Patient {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub mrn: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub sex: Option<String>,
    pub race: Option<String>,
    pub ethnicity: Option<String>,
    pub insurance_type: Option<String>,
    pub primary_language: Option<String>,
    pub status: String, // active, discharged, deceased
    pub created_at: DateTime<Utc>,
}

impl Resource for Patient {
    const TABLE: &'static str = "patients";
    const COLLECTION: &'static str = "patients";
    const SINGULAR: &'static str = "patient";
    const FILTERS: &'static [Filter] = &[
        Filter::text("status", "status"),
        Filter::text("mrn", "mrn"),
        Filter::text("last_name", "last_name"),
        Filter::text("insurance_type", "insurance_type"),
    ];
    const ORDER_BY: &'static str = "last_name ASC, first_name ASC";
}

/// Body of `POST /api/patients`. The tenant is filled in by the database from
/// the session claims.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewPatient {
    #[validate(length(min = 1, max = 32))]
    pub mrn: String,
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub sex: Option<String>,
    pub race: Option<String>,
    pub ethnicity: Option<String>,
    pub insurance_type: Option<String>,
    pub primary_language: Option<String>,
    #[serde(default = "default_status")]
    #[validate(custom = "validate_patient_status")]
    pub status: String,
}

fn default_status() -> String {
    "active".into()
}

impl NewResource for NewPatient {
    type Output = Patient;

    const COLUMNS: &'static [&'static str] = &[
        "mrn",
        "first_name",
        "last_name",
        "date_of_birth",
        "sex",
        "race",
        "ethnicity",
        "insurance_type",
        "primary_language",
        "status",
    ];

    fn bind_values(&self, values: &mut Separated<'_, '_, Postgres, &'static str>) {
        values
            .push_bind(self.mrn.clone())
            .push_bind(self.first_name.clone())
            .push_bind(self.last_name.clone())
            .push_bind(self.date_of_birth)
            .push_bind(self.sex.clone())
            .push_bind(self.race.clone())
            .push_bind(self.ethnicity.clone())
            .push_bind(self.insurance_type.clone())
            .push_bind(self.primary_language.clone())
            .push_bind(self.status.clone());
    }
}
