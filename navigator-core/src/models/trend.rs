use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Rising,
    Falling,
    Stable,
}

impl std::fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrendDirection::Rising => write!(f, "rising"),
            TrendDirection::Falling => write!(f, "falling"),
            TrendDirection::Stable => write!(f, "stable"),
        }
    }
}

/// Linear trend of one metric over the retained window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub metric: String,
    pub current_value: f64,
    pub trend_direction: TrendDirection,
    pub predicted_value: f64,
    /// Least-squares slope in units per minute.
    pub slope_per_minute: f64,
    pub r_squared: f64,
    pub data_points: usize,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Warning => write!(f, "warning"),
            AlertSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// A projected threshold crossing within the maintenance horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceAlert {
    pub metric: String,
    pub severity: AlertSeverity,
    pub current_value: f64,
    pub projected_value: f64,
    pub threshold: f64,
    /// 0.0 when the threshold is already exceeded.
    pub minutes_until_threshold: f64,
    pub horizon_minutes: f64,
    pub message: String,
    pub recommendation: String,
    pub created_at: DateTime<Utc>,
}
