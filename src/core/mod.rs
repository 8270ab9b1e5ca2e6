//! Reporting layer: aggregation, summarization and notification rules.
//!
//! Everything in here is computed per request from rows supplied through the
//! traits in [`sources`]. Nothing is cached between calls.

pub mod dashboard;
pub mod equity;
pub mod notifications;
pub mod period;
pub mod quality;
pub mod sdoh;
pub mod sources;
