//! Row and request types for the resources served by the API.

use validator::ValidationError;

pub mod clinical;
pub mod operations;
pub mod patient;
pub mod resource;

pub use clinical::{Alert, DosingHold, Medication, NewAlert, NewDosingHold, NewMedication, NewPrescription, Prescription};
pub use operations::{
    Appointment, BillingCode, Claim, NewAppointment, NewBillingCode, NewClaim, NewWorkflowTask,
    WorkflowStatusUpdate, WorkflowTask,
};
pub use patient::{NewPatient, Patient};
pub use resource::{Filter, FilterKind, FilterValue, NewResource, Resource};

fn one_of(value: &str, allowed: &[&str], code: &'static str) -> Result<(), ValidationError> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::new(code))
    }
}

pub(crate) fn validate_patient_status(value: &str) -> Result<(), ValidationError> {
    one_of(value, &["active", "discharged", "deceased"], "patient_status")
}

pub(crate) fn validate_medication_status(value: &str) -> Result<(), ValidationError> {
    one_of(value, &["active", "discontinued", "completed"], "medication_status")
}

pub(crate) fn validate_prescription_status(value: &str) -> Result<(), ValidationError> {
    one_of(value, &["draft", "signed", "transmitted", "cancelled"], "prescription_status")
}

pub(crate) fn validate_dosing_hold_type(value: &str) -> Result<(), ValidationError> {
    one_of(value, &["clinical", "administrative", "missed_doses"], "hold_type")
}

pub(crate) fn validate_alert_severity(value: &str) -> Result<(), ValidationError> {
    one_of(value, &["critical", "high", "medium", "low"], "severity")
}

pub(crate) fn validate_task_status(value: &str) -> Result<(), ValidationError> {
    one_of(value, &["open", "in_progress", "completed", "cancelled"], "task_status")
}

pub(crate) fn validate_task_priority(value: &str) -> Result<(), ValidationError> {
    one_of(value, &["low", "normal", "high", "urgent"], "task_priority")
}

pub(crate) fn validate_code_system(value: &str) -> Result<(), ValidationError> {
    one_of(value, &["CPT", "HCPCS", "ICD-10"], "code_system")
}
