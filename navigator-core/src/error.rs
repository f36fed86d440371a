//! Error types for the navigator monitoring core.
//!
//! Tracker and registry errors are caller bugs and are surfaced immediately.
//! Environmental failures (OS sampling, the diagnosis collaborator, export
//! targets) are converted into degraded results at the component boundary and
//! only ever reach callers through logs.
//!
//! # Error Codes Reference
//!
//! | Code Range | Category | Description |
//! |------------|----------|-------------|
//! | E1001-E1099 | Execution | Unknown keys, double completion, bad terminal status |
//! | E2001-E2099 | Config | Config file, environment and validation errors |
//! | E3001-E3099 | Metrics | Counter, metric name, label and kind errors |
//! | E4001-E4099 | Collector | Host metric source errors |
//! | E5001-E5099 | Diagnosis | AI diagnosis collaborator errors |
//! | E9001-E9099 | General | Internal, IO and serialization errors |

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Coarse classification of every [`NavigatorError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    InvalidArgument,
    CollectorUnavailable,
    Unavailable,
    Config,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::CollectorUnavailable => "collector_unavailable",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{}", name)
    }
}

/// Configuration for retry behavior with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Whether to add jitter to the delay
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Retry profile for the diagnosis collaborator.
    pub fn for_api() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Single attempt, no waiting.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        let final_delay = if self.jitter {
            capped_delay * (1.0 + rand_jitter() * 0.25)
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }
}

/// Returns a value between 0.0 and 1.0 derived from the clock.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// The main error type for the navigator monitoring core.
#[derive(Debug, Error)]
pub enum NavigatorError {
    // ========================================================================
    // Execution Errors (E1001-E1099)
    // ========================================================================
    /// No execution was ever started under this key
    #[error("[E1001] Execution not found: {0}")]
    ExecutionNotFound(String),

    /// The execution already reached a terminal status
    #[error("[E1002] Execution '{key}' already finished with status {status}")]
    ExecutionAlreadyFinished { key: String, status: String },

    /// end_execution was called with a non-terminal status
    #[error("[E1003] Invalid terminal status '{0}', expected COMPLETED or FAILED")]
    InvalidTerminalStatus(String),

    /// A status string could not be parsed
    #[error("[E1004] Unknown execution status: {0}")]
    UnknownStatus(String),

    // ========================================================================
    // Configuration Errors (E2001-E2099)
    // ========================================================================
    /// Configuration file parse error
    #[error("[E2001] Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// Invalid configuration value
    #[error("[E2002] Invalid configuration value for '{key}': {message}")]
    InvalidConfigValue { key: String, message: String },

    // ========================================================================
    // Metrics Errors (E3001-E3099)
    // ========================================================================
    /// Counters only move forward
    #[error("[E3001] Counter '{name}' cannot be decreased (delta {delta})")]
    NegativeCounterIncrement { name: String, delta: f64 },

    /// Metric name does not match the exposition grammar
    #[error("[E3002] Invalid metric name: '{0}'")]
    InvalidMetricName(String),

    /// Label name does not match the exposition grammar or is reserved
    #[error("[E3003] Invalid label name '{label}' on metric '{metric}'")]
    InvalidLabelName { metric: String, label: String },

    /// A name is already registered with a different kind
    #[error("[E3004] Metric '{name}' is registered as {existing}, not {requested}")]
    MetricKindMismatch {
        name: String,
        existing: String,
        requested: String,
    },

    /// NaN or infinite sample value
    #[error("[E3005] Non-finite value for metric '{0}'")]
    NonFiniteValue(String),

    // ========================================================================
    // Collector Errors (E4001-E4099)
    // ========================================================================
    /// Host metric source could not be read
    #[error("[E4001] Metric collector unavailable: {0}")]
    CollectorUnavailable(String),

    // ========================================================================
    // Diagnosis Errors (E5001-E5099)
    // ========================================================================
    /// No diagnosis collaborator is configured
    #[error("[E5001] AI diagnosis unavailable: {0}")]
    DiagnosisUnavailable(String),

    /// The collaborator request failed
    #[error("[E5002] AI diagnosis request failed: {0}")]
    DiagnosisRequestFailed(String),

    /// The collaborator answered with something we cannot use
    #[error("[E5003] Failed to parse AI diagnosis: {0}")]
    DiagnosisParseError(String),

    /// The collaborator did not answer in time
    #[error("[E5004] AI diagnosis timed out after {0} seconds")]
    DiagnosisTimeout(u64),

    /// The collaborator rejected our credentials
    #[error("[E5005] AI diagnosis authentication failed: {0}")]
    DiagnosisAuthFailed(String),

    // ========================================================================
    // General Errors (E9001-E9099)
    // ========================================================================
    /// Internal error
    #[error("[E9001] Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("[E9002] IO error: {0}")]
    IoError(String),

    /// Serialization or deserialization error
    #[error("[E9003] Serialization error: {0}")]
    SerializationError(String),
}

pub type NavigatorResult<T> = Result<T, NavigatorError>;

impl From<std::io::Error> for NavigatorError {
    fn from(err: std::io::Error) -> Self {
        NavigatorError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for NavigatorError {
    fn from(err: serde_json::Error) -> Self {
        NavigatorError::SerializationError(err.to_string())
    }
}

impl From<tempfile::PersistError> for NavigatorError {
    fn from(err: tempfile::PersistError) -> Self {
        NavigatorError::IoError(err.error.to_string())
    }
}

impl From<reqwest::Error> for NavigatorError {
    fn from(err: reqwest::Error) -> Self {
        // request URLs may carry credentials
        let err = err.without_url();
        if err.is_timeout() {
            NavigatorError::DiagnosisTimeout(30)
        } else if err.is_status() {
            match err.status().map(|s| s.as_u16()) {
                Some(401) | Some(403) => NavigatorError::DiagnosisAuthFailed(err.to_string()),
                _ => NavigatorError::DiagnosisRequestFailed(err.to_string()),
            }
        } else if err.is_decode() {
            NavigatorError::DiagnosisParseError(err.to_string())
        } else {
            NavigatorError::DiagnosisRequestFailed(err.to_string())
        }
    }
}

impl From<config::ConfigError> for NavigatorError {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::NotFound(key) => NavigatorError::InvalidConfigValue {
                key,
                message: "Key not found".to_string(),
            },
            config::ConfigError::Type {
                origin,
                unexpected,
                expected,
                key,
            } => NavigatorError::InvalidConfigValue {
                key: key.unwrap_or_else(|| origin.map(|o| o.to_string()).unwrap_or_default()),
                message: format!("Expected {}, got {}", expected, unexpected),
            },
            _ => NavigatorError::ConfigParseError(err.to_string()),
        }
    }
}

impl NavigatorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NavigatorError::ExecutionNotFound(_) => ErrorKind::NotFound,
            NavigatorError::ExecutionAlreadyFinished { .. } => ErrorKind::InvalidState,
            NavigatorError::InvalidTerminalStatus(_)
            | NavigatorError::UnknownStatus(_)
            | NavigatorError::NegativeCounterIncrement { .. }
            | NavigatorError::InvalidMetricName(_)
            | NavigatorError::InvalidLabelName { .. }
            | NavigatorError::MetricKindMismatch { .. }
            | NavigatorError::NonFiniteValue(_) => ErrorKind::InvalidArgument,
            NavigatorError::CollectorUnavailable(_) => ErrorKind::CollectorUnavailable,
            NavigatorError::DiagnosisUnavailable(_)
            | NavigatorError::DiagnosisRequestFailed(_)
            | NavigatorError::DiagnosisParseError(_)
            | NavigatorError::DiagnosisTimeout(_)
            | NavigatorError::DiagnosisAuthFailed(_) => ErrorKind::Unavailable,
            NavigatorError::ConfigParseError(_) | NavigatorError::InvalidConfigValue { .. } => {
                ErrorKind::Config
            }
            NavigatorError::Internal(_)
            | NavigatorError::IoError(_)
            | NavigatorError::SerializationError(_) => ErrorKind::Internal,
        }
    }

    /// Errors that point at a bug in the calling code rather than the environment.
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NotFound | ErrorKind::InvalidState | ErrorKind::InvalidArgument
        )
    }

    /// Returns true if the operation might succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NavigatorError::CollectorUnavailable(_)
                | NavigatorError::DiagnosisRequestFailed(_)
                | NavigatorError::DiagnosisTimeout(_)
                | NavigatorError::IoError(_)
        )
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            NavigatorError::ExecutionNotFound(_) => "E1001",
            NavigatorError::ExecutionAlreadyFinished { .. } => "E1002",
            NavigatorError::InvalidTerminalStatus(_) => "E1003",
            NavigatorError::UnknownStatus(_) => "E1004",
            NavigatorError::ConfigParseError(_) => "E2001",
            NavigatorError::InvalidConfigValue { .. } => "E2002",
            NavigatorError::NegativeCounterIncrement { .. } => "E3001",
            NavigatorError::InvalidMetricName(_) => "E3002",
            NavigatorError::InvalidLabelName { .. } => "E3003",
            NavigatorError::MetricKindMismatch { .. } => "E3004",
            NavigatorError::NonFiniteValue(_) => "E3005",
            NavigatorError::CollectorUnavailable(_) => "E4001",
            NavigatorError::DiagnosisUnavailable(_) => "E5001",
            NavigatorError::DiagnosisRequestFailed(_) => "E5002",
            NavigatorError::DiagnosisParseError(_) => "E5003",
            NavigatorError::DiagnosisTimeout(_) => "E5004",
            NavigatorError::DiagnosisAuthFailed(_) => "E5005",
            NavigatorError::Internal(_) => "E9001",
            NavigatorError::IoError(_) => "E9002",
            NavigatorError::SerializationError(_) => "E9003",
        }
    }

    pub fn user_suggestion(&self) -> Option<&'static str> {
        match self {
            NavigatorError::ExecutionAlreadyFinished { .. } => {
                Some("Each execution key must be ended exactly once")
            }
            NavigatorError::InvalidTerminalStatus(_) => {
                Some("Pass COMPLETED or FAILED when ending an execution")
            }
            NavigatorError::NegativeCounterIncrement { .. } => {
                Some("Use a gauge for values that can decrease")
            }
            NavigatorError::DiagnosisUnavailable(_) | NavigatorError::DiagnosisAuthFailed(_) => {
                Some("Set GEMINI_API_KEY or diagnosis.api_key to enable AI diagnosis")
            }
            NavigatorError::InvalidConfigValue { .. } | NavigatorError::ConfigParseError(_) => {
                Some("Check navigator.toml and NAVIGATOR_* environment variables")
            }
            _ => None,
        }
    }

    /// Log this error with appropriate severity level.
    pub fn log(&self) {
        let code = self.error_code();
        let suggestion = self.user_suggestion();

        if self.is_transient() {
            warn!(
                error_code = %code,
                suggestion = suggestion,
                "Transient error occurred: {}",
                self
            );
        } else {
            error!(
                error_code = %code,
                suggestion = suggestion,
                "Error occurred: {}",
                self
            );
        }
    }
}

/// Execute an async operation, retrying transient failures per `config`.
pub async fn retry_async_with_config<F, Fut, T>(
    operation: F,
    config: RetryConfig,
) -> NavigatorResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = NavigatorResult<T>>,
{
    let mut last_error = None;

    for attempt in 0..config.max_attempts {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    info!(
                        "Operation succeeded on attempt {} after {} retries",
                        attempt + 1,
                        attempt
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if !e.is_transient() || attempt + 1 >= config.max_attempts {
                    return Err(e);
                }

                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "Attempt {} failed ({}), retrying in {:?}",
                    attempt + 1,
                    e,
                    delay
                );

                tokio::time::sleep(delay).await;
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        NavigatorError::Internal("Retry loop exhausted without error".to_string())
    }))
}
