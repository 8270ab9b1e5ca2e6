//! Request handlers.

use std::collections::HashMap;

use actix_web::HttpResponse;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::ApiError;

pub mod dashboard;
pub mod notifications;
pub mod reporting;
pub mod resources;

/// Query string as a flat map.
pub type Params = HashMap<String, String>;

/// `{ <key>: value }` response body.
fn envelope(key: &str, value: impl Serialize) -> Result<Value, ApiError> {
    let value = serde_json::to_value(value).map_err(|e| ApiError::Internal(e.into()))?;
    let mut body = Map::new();
    body.insert(key.to_string(), value);
    Ok(Value::Object(body))
}

fn parse_id(raw: &str, what: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ApiError::validation(format!("{} id must be a valid UUID", what)))
}

fn required<'a>(params: &'a Params, name: &str) -> Result<&'a str, ApiError> {
    params
        .get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::validation(format!("{} is required", name)))
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_wraps_under_key() {
        let body = envelope("patients", vec![1, 2]).unwrap();
        assert_eq!(body, serde_json::json!({ "patients": [1, 2] }));
    }

    #[test]
    fn blank_required_params_are_missing() {
        let mut params = Params::new();
        params.insert("dimension".into(), "  ".into());
        let err = required(&params, "dimension").unwrap_err();
        assert_eq!(err.to_string(), "dimension is required");
    }
}
