//! Meridian EMR service core library
//!
//! This module exports the core functionality of the Meridian behavioral-health
//! EMR service: resource handlers, the reporting layer and data access.

pub mod api;
pub mod core;
pub mod db;
pub mod error;
pub mod models;

/// Application configuration
pub mod config {
    use std::collections::HashMap;

    use serde::Deserialize;
    use validator::{Validate, ValidationError};

    #[derive(Debug, Clone, Deserialize, Validate)]
    pub struct Config {
        #[validate]
        pub server: ServerConfig,
        #[validate]
        pub database: DatabaseConfig,
        #[validate]
        pub auth: AuthConfig,
        #[validate]
        #[serde(default)]
        pub reporting: ReportingConfig,
        #[serde(default)]
        pub logging: LoggingConfig,
    }

    #[derive(Debug, Clone, Deserialize, Validate)]
    pub struct ServerConfig {
        #[validate(length(min = 1))]
        pub host: String,
        pub port: u16,
        pub workers: Option<usize>,
    }

    #[derive(Debug, Clone, Deserialize, Validate)]
    pub struct DatabaseConfig {
        /// Connection string for the RLS-subject login used by session clients.
        #[validate(length(min = 1))]
        pub url: String,
        /// Connection string for the service role. Bypasses row-level security.
        #[validate(length(min = 1))]
        pub service_url: String,
        /// Role assumed for the duration of every session transaction.
        #[validate(custom = "validate_role_name")]
        pub session_role: String,
        #[validate(range(min = 1))]
        pub max_connections: u32,
        #[validate(range(min = 1))]
        pub acquire_timeout_secs: u64,
    }

    #[derive(Debug, Clone, Deserialize, Validate)]
    pub struct AuthConfig {
        #[validate(length(min = 32))]
        pub jwt_secret: String,
        pub audience: Option<String>,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct LoggingConfig {
        pub filter: String,
        pub json: bool,
    }

    impl Default for LoggingConfig {
        fn default() -> Self {
            Self {
                filter: "info".into(),
                json: false,
            }
        }
    }

    #[derive(Debug, Clone, Default, Deserialize, Validate)]
    pub struct ReportingConfig {
        #[validate]
        #[serde(default)]
        pub equity: EquityConfig,
        #[validate]
        #[serde(default)]
        pub notifications: NotificationConfig,
    }

    /// Thresholds for stratified outcome aggregation.
    ///
    /// Gaps are expressed in rate units (a rate is a fraction in `0..=1`), so a
    /// `watch_gap` of `0.05` means five percentage points short of benchmark.
    #[derive(Debug, Clone, Deserialize, Validate)]
    #[validate(schema(function = "validate_gap_order"))]
    pub struct EquityConfig {
        #[validate(range(min = 1))]
        pub min_sample_size: u64,
        #[validate(range(min = 0.0, max = 1.0))]
        pub trend_min_delta: f64,
        pub watch_gap: f64,
        pub concern_gap: f64,
        pub critical_gap: f64,
        pub default_benchmark: Benchmark,
        #[serde(default)]
        pub benchmarks: HashMap<String, Benchmark>,
    }

    impl EquityConfig {
        pub fn benchmark_for(&self, outcome_type: &str) -> &Benchmark {
            self.benchmarks
                .get(outcome_type)
                .unwrap_or(&self.default_benchmark)
        }
    }

    impl Default for EquityConfig {
        fn default() -> Self {
            Self {
                min_sample_size: 30,
                trend_min_delta: 0.02,
                watch_gap: 0.05,
                concern_gap: 0.10,
                critical_gap: 0.20,
                default_benchmark: Benchmark {
                    target: 0.80,
                    higher_is_better: true,
                },
                benchmarks: HashMap::new(),
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
    pub struct Benchmark {
        pub target: f64,
        pub higher_is_better: bool,
    }

    #[derive(Debug, Clone, Deserialize, Validate)]
    pub struct NotificationConfig {
        /// Percentage-point drop since the prior period that raises a notification.
        #[validate(range(min = 0.1))]
        pub drop_threshold_pp: f64,
        /// Shortfall against target at which a below-target notice becomes high priority.
        #[validate(range(min = 0.0))]
        pub below_target_high_gap_pp: f64,
        #[validate(range(min = 1))]
        pub guideline_lookback_days: i64,
        #[validate(range(min = 1))]
        pub enrollment_horizon_days: i64,
    }

    impl Default for NotificationConfig {
        fn default() -> Self {
            Self {
                drop_threshold_pp: 5.0,
                below_target_high_gap_pp: 10.0,
                guideline_lookback_days: 30,
                enrollment_horizon_days: 30,
            }
        }
    }

    fn validate_role_name(role: &str) -> Result<(), ValidationError> {
        let valid = !role.is_empty()
            && role
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if valid {
            Ok(())
        } else {
            Err(ValidationError::new("invalid_role_name"))
        }
    }

    fn validate_gap_order(cfg: &EquityConfig) -> Result<(), ValidationError> {
        if 0.0 < cfg.watch_gap && cfg.watch_gap <= cfg.concern_gap && cfg.concern_gap <= cfg.critical_gap {
            Ok(())
        } else {
            Err(ValidationError::new("alert_gaps_not_ascending"))
        }
    }

    #[derive(Debug, thiserror::Error)]
    pub enum LoadError {
        #[error("failed to read configuration: {0}")]
        Source(#[from] config::ConfigError),
        #[error("invalid configuration: {0}")]
        Invalid(#[from] validator::ValidationErrors),
    }

    /// Load configuration from file
    pub fn load_config() -> Result<Config, LoadError> {
        // Override with environment-specific settings
        let env = std::env::var("MERIDIAN_ENV").unwrap_or_else(|_| "development".into());

        let settings: Config = config::Config::builder()
            // Start with default settings
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            // Override with environment variables, e.g. MERIDIAN__DATABASE__URL
            .add_source(
                config::Environment::with_prefix("MERIDIAN")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn default_equity_thresholds_are_valid() {
            assert!(EquityConfig::default().validate().is_ok());
        }

        #[test]
        fn descending_gaps_are_rejected() {
            let cfg = EquityConfig {
                watch_gap: 0.2,
                critical_gap: 0.1,
                ..EquityConfig::default()
            };
            assert!(cfg.validate().is_err());
        }

        #[test]
        fn unknown_outcome_type_falls_back_to_default_benchmark() {
            let mut cfg = EquityConfig::default();
            cfg.benchmarks.insert(
                "readmission_30d".into(),
                Benchmark {
                    target: 0.10,
                    higher_is_better: false,
                },
            );
            assert!(!cfg.benchmark_for("readmission_30d").higher_is_better);
            assert_eq!(cfg.benchmark_for("retention_90d"), &cfg.default_benchmark);
        }

        #[test]
        fn session_role_must_be_an_identifier() {
            assert!(validate_role_name("authenticated").is_ok());
            assert!(validate_role_name("auth; DROP TABLE patients").is_err());
            assert!(validate_role_name("").is_err());
        }
    }
}
