use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::common::{Error, Result};

/// How job failures are reported by the executor and counted on windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorMode {
    /// One [`crate::ErrorCategory`] per failed job.
    Categorized,
    /// Zero or more free-text messages per job.
    FreeText,
}

/// What a window does with free-text error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FreeTextPolicy {
    /// One child span per message under a single `errors` span per window.
    FanOut,
    /// Only the message count and the failed job ids; messages go to the log.
    CountOnly,
}

/// When the startup evaluation span ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StartupSpanPolicy {
    CloseImmediately,
    KeepOpen,
}

impl FromStr for ErrorMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "categorized" => Ok(ErrorMode::Categorized),
            "free-text" => Ok(ErrorMode::FreeText),
            other => Err(Error::InvalidConfig(format!("unknown error mode `{}`", other))),
        }
    }
}

impl FromStr for FreeTextPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fan-out" => Ok(FreeTextPolicy::FanOut),
            "count-only" => Ok(FreeTextPolicy::CountOnly),
            other => Err(Error::InvalidConfig(format!(
                "unknown free text policy `{}`",
                other
            ))),
        }
    }
}

impl FromStr for StartupSpanPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "close-immediately" => Ok(StartupSpanPolicy::CloseImmediately),
            "keep-open" => Ok(StartupSpanPolicy::KeepOpen),
            other => Err(Error::InvalidConfig(format!(
                "unknown startup span policy `{}`",
                other
            ))),
        }
    }
}

/// Options recognized by the aggregation engine.
///
/// Every field has a default, so a config file only needs the keys it changes:
///
/// ```
/// use opentelemetry_batch_windows::AggregatorConfig;
///
/// let config = AggregatorConfig::from_toml_str(
///     r#"
///     max_jobs_per_window = 250
///     error_mode = "free-text"
///     "#,
/// )
/// .unwrap();
/// assert_eq!(config.max_jobs_per_window, 250);
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AggregatorConfig {
    pub service_name: String,
    pub max_jobs_per_window: u64,
    #[serde(rename = "max_window_duration_ms", with = "duration_ms")]
    pub max_window_duration: Duration,
    pub error_mode: ErrorMode,
    pub free_text_policy: FreeTextPolicy,
    pub summary_mode: bool,
    pub workers: usize,
    #[serde(rename = "shutdown_grace_period_ms", with = "duration_ms")]
    pub shutdown_grace_period: Duration,
    pub startup_span: StartupSpanPolicy,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        AggregatorConfig {
            service_name: "batch-scheduler".to_owned(),
            max_jobs_per_window: 100,
            max_window_duration: Duration::from_secs(60),
            error_mode: ErrorMode::Categorized,
            free_text_policy: FreeTextPolicy::FanOut,
            summary_mode: false,
            workers: 1,
            shutdown_grace_period: Duration::from_secs(5),
            startup_span: StartupSpanPolicy::CloseImmediately,
        }
    }
}

impl AggregatorConfig {
    /// Parse a TOML document. Missing keys keep their defaults.
    /// The result is validated before it is returned.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: AggregatorConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    pub fn with_max_jobs_per_window(mut self, max_jobs: u64) -> Self {
        self.max_jobs_per_window = max_jobs;
        self
    }

    pub fn with_max_window_duration(mut self, duration: Duration) -> Self {
        self.max_window_duration = duration;
        self
    }

    pub fn with_error_mode(mut self, mode: ErrorMode) -> Self {
        self.error_mode = mode;
        self
    }

    pub fn with_free_text_policy(mut self, policy: FreeTextPolicy) -> Self {
        self.free_text_policy = policy;
        self
    }

    /// Emit a single end-of-run summary span instead of per-window spans.
    pub fn with_summary_mode(mut self, summary_mode: bool) -> Self {
        self.summary_mode = summary_mode;
        self
    }

    /// Number of jobs allowed in flight at once. `1` processes jobs sequentially.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_shutdown_grace_period(mut self, grace: Duration) -> Self {
        self.shutdown_grace_period = grace;
        self
    }

    pub fn with_startup_span(mut self, policy: StartupSpanPolicy) -> Self {
        self.startup_span = policy;
        self
    }

    pub fn rotation_policy(&self) -> RotationPolicy {
        RotationPolicy {
            max_jobs_per_window: self.max_jobs_per_window,
            max_window_duration: self.max_window_duration,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.service_name.trim().is_empty() {
            return Err(Error::InvalidConfig("service_name must not be empty".into()));
        }
        if self.max_jobs_per_window == 0 {
            return Err(Error::InvalidConfig(
                "max_jobs_per_window must be greater than zero".into(),
            ));
        }
        if self.max_window_duration.is_zero() {
            return Err(Error::InvalidConfig(
                "max_window_duration_ms must be greater than zero".into(),
            ));
        }
        if self.workers == 0 {
            return Err(Error::InvalidConfig("workers must be greater than zero".into()));
        }
        Ok(())
    }
}

/// The dual rotation trigger: whichever threshold is reached first closes the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub max_jobs_per_window: u64,
    pub max_window_duration: Duration,
}

mod duration_ms {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
