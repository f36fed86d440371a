use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::models::{CPU_PERCENT, DISK_USAGE_PERCENT, MEMORY_PERCENT};

pub const DEFAULT_CPU_WARNING_PERCENT: f64 = 75.0;
pub const DEFAULT_CPU_CRITICAL_PERCENT: f64 = 90.0;
pub const DEFAULT_MEMORY_WARNING_PERCENT: f64 = 85.0;
pub const DEFAULT_MEMORY_CRITICAL_PERCENT: f64 = 95.0;
pub const DEFAULT_DISK_WARNING_PERCENT: f64 = 85.0;
pub const DEFAULT_DISK_CRITICAL_PERCENT: f64 = 95.0;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

impl From<ConfigLoadError> for crate::error::NavigatorError {
    fn from(err: ConfigLoadError) -> Self {
        match err {
            ConfigLoadError::Config(e) => e.into(),
            ConfigLoadError::InvalidValue { key, message } => {
                crate::error::NavigatorError::InvalidConfigValue { key, message }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NavigatorConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub trends: TrendConfig,
    #[serde(default)]
    pub exporter: ExporterConfig,
    #[serde(default)]
    pub diagnosis: DiagnosisConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json_format: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_monitor_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,

    #[serde(default)]
    pub thresholds: ResourceThresholds,
}

/// Bottleneck thresholds for host resources, in percent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceThresholds {
    #[serde(default = "default_cpu_warning")]
    pub cpu_warning: f64,
    #[serde(default = "default_cpu_critical")]
    pub cpu_critical: f64,
    #[serde(default = "default_memory_warning")]
    pub memory_warning: f64,
    #[serde(default = "default_memory_critical")]
    pub memory_critical: f64,
    #[serde(default = "default_disk_warning")]
    pub disk_warning: f64,
    #[serde(default = "default_disk_critical")]
    pub disk_critical: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_long_running_threshold")]
    pub long_running_threshold_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricThreshold {
    pub warning: f64,
    pub critical: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendConfig {
    /// Ring buffer size; one point per sample interval.
    #[serde(default = "default_trend_capacity")]
    pub capacity: usize,

    #[serde(default = "default_min_points")]
    pub min_points: usize,

    /// Relative change over the window below which a trend is stable.
    #[serde(default = "default_dead_band")]
    pub dead_band: f64,

    /// How many average sample intervals ahead `predicted_value` looks.
    #[serde(default = "default_prediction_steps")]
    pub prediction_steps: u32,

    #[serde(default = "default_horizon_minutes")]
    pub horizon_minutes: f64,

    #[serde(default = "default_trend_thresholds")]
    pub thresholds: BTreeMap<String, MetricThreshold>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExporterConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Periodic JSON snapshot target.
    #[serde(default)]
    pub export_path: Option<PathBuf>,

    /// Periodic exposition text target.
    #[serde(default)]
    pub metrics_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_diagnosis_timeout")]
    pub timeout_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_monitor_interval() -> u64 {
    5
}

fn default_history_capacity() -> usize {
    720
}

fn default_stale_after() -> u64 {
    30
}

fn default_cpu_warning() -> f64 {
    DEFAULT_CPU_WARNING_PERCENT
}

fn default_cpu_critical() -> f64 {
    DEFAULT_CPU_CRITICAL_PERCENT
}

fn default_memory_warning() -> f64 {
    DEFAULT_MEMORY_WARNING_PERCENT
}

fn default_memory_critical() -> f64 {
    DEFAULT_MEMORY_CRITICAL_PERCENT
}

fn default_disk_warning() -> f64 {
    DEFAULT_DISK_WARNING_PERCENT
}

fn default_disk_critical() -> f64 {
    DEFAULT_DISK_CRITICAL_PERCENT
}

fn default_long_running_threshold() -> u64 {
    300
}

fn default_trend_capacity() -> usize {
    1440
}

fn default_min_points() -> usize {
    3
}

fn default_dead_band() -> f64 {
    0.05
}

fn default_prediction_steps() -> u32 {
    5
}

fn default_horizon_minutes() -> f64 {
    60.0
}

fn default_trend_thresholds() -> BTreeMap<String, MetricThreshold> {
    BTreeMap::from([
        (
            CPU_PERCENT.to_string(),
            MetricThreshold {
                warning: DEFAULT_CPU_WARNING_PERCENT,
                critical: DEFAULT_CPU_CRITICAL_PERCENT,
            },
        ),
        (
            MEMORY_PERCENT.to_string(),
            MetricThreshold {
                warning: DEFAULT_MEMORY_WARNING_PERCENT,
                critical: DEFAULT_MEMORY_CRITICAL_PERCENT,
            },
        ),
        (
            DISK_USAGE_PERCENT.to_string(),
            MetricThreshold {
                warning: DEFAULT_DISK_WARNING_PERCENT,
                critical: DEFAULT_DISK_CRITICAL_PERCENT,
            },
        ),
    ])
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_diagnosis_timeout() -> u64 {
    30
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_monitor_interval(),
            history_capacity: default_history_capacity(),
            stale_after_secs: default_stale_after(),
            thresholds: ResourceThresholds::default(),
        }
    }
}

impl Default for ResourceThresholds {
    fn default() -> Self {
        Self {
            cpu_warning: DEFAULT_CPU_WARNING_PERCENT,
            cpu_critical: DEFAULT_CPU_CRITICAL_PERCENT,
            memory_warning: DEFAULT_MEMORY_WARNING_PERCENT,
            memory_critical: DEFAULT_MEMORY_CRITICAL_PERCENT,
            disk_warning: DEFAULT_DISK_WARNING_PERCENT,
            disk_critical: DEFAULT_DISK_CRITICAL_PERCENT,
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            long_running_threshold_secs: default_long_running_threshold(),
        }
    }
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            capacity: default_trend_capacity(),
            min_points: default_min_points(),
            dead_band: default_dead_band(),
            prediction_steps: default_prediction_steps(),
            horizon_minutes: default_horizon_minutes(),
            thresholds: default_trend_thresholds(),
        }
    }
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
            export_path: None,
            metrics_path: None,
        }
    }
}

impl Default for DiagnosisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            model: default_model(),
            base_url: default_base_url(),
            timeout_secs: default_diagnosis_timeout(),
        }
    }
}

impl DiagnosisConfig {
    /// Configured key, else `GEMINI_API_KEY`, else `GOOGLE_API_KEY`.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
    }
}

impl NavigatorConfig {
    pub fn load() -> Result<Self, ConfigLoadError> {
        Self::load_from_paths(get_config_paths())
    }

    pub fn load_from_paths(paths: Vec<PathBuf>) -> Result<Self, ConfigLoadError> {
        load_dotenv_files();

        let mut builder = ConfigBuilder::builder();

        for path in paths {
            if path.exists() {
                builder = builder.add_source(File::from(path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("NAVIGATOR")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut navigator_config: NavigatorConfig = builder.build()?.try_deserialize()?;

        if let Ok(level) = std::env::var("NAVIGATOR_LOG_LEVEL") {
            navigator_config.logging.level = level;
        } else if let Ok(level) = std::env::var("RUST_LOG") {
            navigator_config.logging.level = level;
        }

        if let Ok(port) = std::env::var("NAVIGATOR_PORT") {
            if let Ok(port) = port.parse() {
                navigator_config.exporter.port = port;
            }
        }

        navigator_config.validate()?;

        Ok(navigator_config)
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.monitor.interval_secs == 0 {
            return Err(invalid("monitor.interval_secs", "Must be greater than 0"));
        }

        if self.monitor.history_capacity == 0 {
            return Err(invalid("monitor.history_capacity", "Must be greater than 0"));
        }

        let t = &self.monitor.thresholds;
        for (key, warning, critical) in [
            ("monitor.thresholds.cpu", t.cpu_warning, t.cpu_critical),
            ("monitor.thresholds.memory", t.memory_warning, t.memory_critical),
            ("monitor.thresholds.disk", t.disk_warning, t.disk_critical),
        ] {
            if warning > critical {
                return Err(invalid(key, "Warning threshold cannot exceed critical"));
            }
        }

        if self.trends.capacity == 0 {
            return Err(invalid("trends.capacity", "Must be greater than 0"));
        }

        if self.trends.min_points < 2 {
            return Err(invalid(
                "trends.min_points",
                "At least two points are needed to fit a trend",
            ));
        }

        if !(self.trends.dead_band >= 0.0) {
            return Err(invalid("trends.dead_band", "Must be a non-negative number"));
        }

        if !(self.trends.horizon_minutes > 0.0) {
            return Err(invalid("trends.horizon_minutes", "Must be greater than 0"));
        }

        for (metric, threshold) in &self.trends.thresholds {
            if threshold.warning > threshold.critical {
                return Err(invalid(
                    &format!("trends.thresholds.{}", metric),
                    "Warning threshold cannot exceed critical",
                ));
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        let level_lower = self.logging.level.to_lowercase();
        if !valid_levels.contains(&level_lower.as_str()) && !level_lower.contains('=') {
            return Err(invalid(
                "logging.level",
                &format!(
                    "Invalid log level '{}'. Must be one of: {:?}",
                    self.logging.level, valid_levels
                ),
            ));
        }

        Ok(())
    }

    pub fn log_level(&self) -> &str {
        &self.logging.level
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.exporter.host, self.exporter.port)
    }
}

fn invalid(key: &str, message: &str) -> ConfigLoadError {
    ConfigLoadError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn get_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join("config").join("default.toml"));
        paths.push(cwd.join("config").join("local.toml"));
        paths.push(cwd.join("navigator.toml"));
    }

    if let Some(config_dir) = get_config_dir() {
        paths.push(config_dir.join("config.toml"));
    }

    paths
}

fn load_dotenv_files() {
    let mut paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join(".env"));
        paths.push(cwd.join(".env.local"));
    }

    if let Some(config_dir) = get_config_dir() {
        paths.push(config_dir.join(".env"));
    }

    for path in paths {
        if path.exists() {
            let _ = dotenvy::from_path(&path);
        }
    }
}

pub fn get_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("navigator"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = NavigatorConfig::default();

        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json_format);
        assert_eq!(config.monitor.interval_secs, 5);
        assert_eq!(config.monitor.history_capacity, 720);
        assert_eq!(config.monitor.thresholds.cpu_critical, 90.0);
        assert_eq!(config.monitor.thresholds.memory_warning, 85.0);
        assert_eq!(config.tracker.long_running_threshold_secs, 300);
        assert_eq!(config.trends.capacity, 1440);
        assert_eq!(config.trends.min_points, 3);
        assert_eq!(config.trends.thresholds.len(), 3);
        assert_eq!(config.exporter.port, 8000);
        assert!(config.exporter.export_path.is_none());
        assert_eq!(config.diagnosis.model, "gemini-1.5-flash");
    }

    #[test]
    fn test_validation_valid_config() {
        assert!(NavigatorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_zero_interval() {
        let mut config = NavigatorConfig::default();
        config.monitor.interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_inverted_thresholds() {
        let mut config = NavigatorConfig::default();
        config.monitor.thresholds.cpu_warning = 95.0;
        config.monitor.thresholds.cpu_critical = 90.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_min_points() {
        let mut config = NavigatorConfig::default();
        config.trends.min_points = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_negative_dead_band() {
        let mut config = NavigatorConfig::default();
        config.trends.dead_band = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let mut config = NavigatorConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "navigator_core=debug,tower_http=warn".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[monitor]
interval_secs = 10

[monitor.thresholds]
cpu_critical = 80.0
cpu_warning = 60.0

[trends]
min_points = 4

[exporter]
port = 9100
"#
        )
        .unwrap();

        let config = NavigatorConfig::load_from_paths(vec![file.path().to_path_buf()]).unwrap();

        assert_eq!(config.monitor.interval_secs, 10);
        assert_eq!(config.monitor.thresholds.cpu_critical, 80.0);
        assert_eq!(config.monitor.thresholds.memory_critical, 95.0);
        assert_eq!(config.trends.min_points, 4);
        assert_eq!(config.trends.dead_band, 0.05);
    }

    #[test]
    fn test_bind_address() {
        let config = NavigatorConfig::default();
        assert_eq!(config.bind_address(), "0.0.0.0:8000");
    }

    #[test]
    fn test_resolved_api_key_prefers_config() {
        let config = DiagnosisConfig {
            api_key: Some("from-config".to_string()),
            ..Default::default()
        };
        assert_eq!(config.resolved_api_key().as_deref(), Some("from-config"));
    }
}
