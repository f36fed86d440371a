//! Rolling metric history, linear trend fitting and maintenance projection.
//!
//! Each metric keeps at most `capacity` points; the oldest point is evicted
//! first. Trends are recomputed from a snapshot of the history on every call.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{debug, trace};

use crate::config::{MetricThreshold, TrendConfig};
use crate::models::{
    AlertSeverity, MaintenanceAlert, Trend, TrendDirection, CPU_PERCENT, DISK_USAGE_PERCENT,
    MEMORY_PERCENT, PROCESS_COUNT,
};

#[derive(Debug, Clone, Copy)]
struct TrendPoint {
    timestamp: DateTime<Utc>,
    value: f64,
}

/// Ordinary least-squares fit of `y = slope * x + intercept`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

impl LinearFit {
    pub fn at(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

/// Returns `None` for fewer than two points or when every `x` is equal.
pub fn linear_regression(points: &[(f64, f64)]) -> Option<LinearFit> {
    if points.len() < 2 {
        return None;
    }

    let n = points.len() as f64;
    let sum_x: f64 = points.iter().map(|(x, _)| x).sum();
    let sum_y: f64 = points.iter().map(|(_, y)| y).sum();
    let sum_xy: f64 = points.iter().map(|(x, y)| x * y).sum();
    let sum_xx: f64 = points.iter().map(|(x, _)| x * x).sum();

    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator.abs() < f64::EPSILON {
        return None;
    }

    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_x) / n;

    let mean_y = sum_y / n;
    let ss_tot: f64 = points.iter().map(|(_, y)| (y - mean_y).powi(2)).sum();
    let ss_res: f64 = points
        .iter()
        .map(|(x, y)| (y - (slope * x + intercept)).powi(2))
        .sum();

    // A flat series is fitted exactly by a flat line.
    let r_squared = if ss_tot > f64::EPSILON {
        (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
    } else {
        1.0
    };

    Some(LinearFit {
        slope,
        intercept,
        r_squared,
    })
}

pub struct TrendEngine {
    config: TrendConfig,
    series: RwLock<BTreeMap<String, VecDeque<TrendPoint>>>,
}

impl TrendEngine {
    pub fn new(config: TrendConfig) -> Self {
        Self {
            config,
            series: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &TrendConfig {
        &self.config
    }

    pub fn add_metrics_data(&self, point: &HashMap<String, f64>) {
        self.add_metrics_data_at(Utc::now(), point);
    }

    /// Appends one observation per metric at `timestamp`. Non-finite values are dropped.
    pub fn add_metrics_data_at(&self, timestamp: DateTime<Utc>, point: &HashMap<String, f64>) {
        let capacity = self.config.capacity.max(1);
        let mut series = self.series.write();

        for (metric, value) in point {
            if !value.is_finite() {
                trace!(metric = %metric, "Dropping non-finite trend value");
                continue;
            }

            let history = series
                .entry(metric.clone())
                .or_insert_with(|| VecDeque::with_capacity(capacity.min(64)));
            while history.len() >= capacity {
                history.pop_front();
            }
            history.push_back(TrendPoint {
                timestamp,
                value: *value,
            });
        }
    }

    pub fn tracked_metrics(&self) -> Vec<String> {
        self.series.read().keys().cloned().collect()
    }

    pub fn data_points(&self, metric: &str) -> usize {
        self.series.read().get(metric).map_or(0, VecDeque::len)
    }

    pub fn clear(&self) {
        self.series.write().clear();
    }

    /// Fits a trend for every metric with at least `min_points` points in the last `days_back` days.
    pub fn analyze_system_trends(&self, days_back: u32) -> Vec<Trend> {
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(days_back));
        self.analyze_since(Some(cutoff))
    }

    /// Projects each rising trend forward and raises an alert for every
    /// metric expected to cross a configured threshold within `horizon_minutes`.
    pub fn predict_maintenance_needs(&self, horizon_minutes: f64) -> Vec<MaintenanceAlert> {
        let horizon = if horizon_minutes.is_finite() && horizon_minutes > 0.0 {
            horizon_minutes
        } else {
            self.config.horizon_minutes
        };
        let now = Utc::now();

        let mut alerts: Vec<MaintenanceAlert> = self
            .analyze_since(None)
            .iter()
            .filter_map(|trend| {
                let threshold = self.config.thresholds.get(&trend.metric)?;
                project_alert(trend, threshold, horizon, now)
            })
            .collect();

        alerts.sort_by(|a, b| {
            b.severity.cmp(&a.severity).then(
                a.minutes_until_threshold
                    .total_cmp(&b.minutes_until_threshold),
            )
        });

        if !alerts.is_empty() {
            debug!(alerts = alerts.len(), horizon_minutes = horizon, "Maintenance alerts projected");
        }
        alerts
    }

    fn snapshot(&self, since: Option<DateTime<Utc>>) -> BTreeMap<String, Vec<TrendPoint>> {
        self.series
            .read()
            .iter()
            .map(|(metric, points)| {
                let points: Vec<TrendPoint> = points
                    .iter()
                    .filter(|p| since.map_or(true, |cutoff| p.timestamp >= cutoff))
                    .copied()
                    .collect();
                (metric.clone(), points)
            })
            .collect()
    }

    fn analyze_since(&self, since: Option<DateTime<Utc>>) -> Vec<Trend> {
        let min_points = self.config.min_points.max(2);

        self.snapshot(since)
            .into_iter()
            .filter(|(_, points)| points.len() >= min_points)
            .filter_map(|(metric, points)| self.fit_trend(metric, &points))
            .collect()
    }

    fn fit_trend(&self, metric: String, points: &[TrendPoint]) -> Option<Trend> {
        let first = points.first()?;
        let last = points.last()?;

        let span_minutes = minutes_between(first.timestamp, last.timestamp);
        // Identical timestamps: fall back to one-minute steps by position.
        let xy: Vec<(f64, f64)> = if span_minutes > 0.0 {
            points
                .iter()
                .map(|p| (minutes_between(first.timestamp, p.timestamp), p.value))
                .collect()
        } else {
            points
                .iter()
                .enumerate()
                .map(|(i, p)| (i as f64, p.value))
                .collect()
        };

        let fit = linear_regression(&xy)?;
        let last_x = xy.last().map_or(0.0, |(x, _)| *x);
        let step = last_x / (xy.len() - 1) as f64;

        let mean = xy.iter().map(|(_, y)| y).sum::<f64>() / xy.len() as f64;
        let relative_change = (fit.slope * last_x).abs() / mean.abs().max(1.0);
        let trend_direction = if relative_change < self.config.dead_band {
            TrendDirection::Stable
        } else if fit.slope > 0.0 {
            TrendDirection::Rising
        } else {
            TrendDirection::Falling
        };

        let predicted_value = fit.at(last_x + f64::from(self.config.prediction_steps) * step);

        Some(Trend {
            metric,
            current_value: last.value,
            trend_direction,
            predicted_value,
            slope_per_minute: fit.slope,
            r_squared: fit.r_squared,
            data_points: points.len(),
            window_start: first.timestamp,
            window_end: last.timestamp,
        })
    }
}

fn minutes_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 60_000.0
}

fn project_alert(
    trend: &Trend,
    threshold: &MetricThreshold,
    horizon: f64,
    now: DateTime<Utc>,
) -> Option<MaintenanceAlert> {
    let current = trend.current_value;
    let rising = trend.trend_direction == TrendDirection::Rising && trend.slope_per_minute > 0.0;

    for (severity, limit) in [
        (AlertSeverity::Critical, threshold.critical),
        (AlertSeverity::Warning, threshold.warning),
    ] {
        let minutes = if current >= limit {
            0.0
        } else if rising {
            (limit - current) / trend.slope_per_minute
        } else {
            continue;
        };

        if minutes > horizon {
            continue;
        }

        let projected_value = if rising {
            current + trend.slope_per_minute * horizon
        } else {
            current
        };

        let message = if minutes == 0.0 {
            format!(
                "{} is at {:.1}, above the {} threshold of {:.1}",
                trend.metric, current, severity, limit
            )
        } else {
            format!(
                "{} is projected to cross the {} threshold of {:.1} in {:.0} minutes",
                trend.metric, severity, limit, minutes
            )
        };

        return Some(MaintenanceAlert {
            metric: trend.metric.clone(),
            severity,
            current_value: current,
            projected_value,
            threshold: limit,
            minutes_until_threshold: minutes,
            horizon_minutes: horizon,
            message,
            recommendation: recommendation_for(&trend.metric).to_string(),
            created_at: now,
        });
    }

    None
}

fn recommendation_for(metric: &str) -> &'static str {
    match metric {
        CPU_PERCENT => "Reduce concurrent agent executions or add compute capacity",
        MEMORY_PERCENT => "Look for memory growth in long-running agents and restart leaking workers",
        DISK_USAGE_PERCENT => "Rotate exported snapshots and clear cached collector data",
        PROCESS_COUNT => "Check for orphaned agent worker processes",
        _ => "Review recent workload changes for this metric",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> TrendEngine {
        TrendEngine::new(TrendConfig::default())
    }

    fn feed(engine: &TrendEngine, metric: &str, values: &[f64], step_minutes: i64) {
        let start = Utc::now() - ChronoDuration::minutes(step_minutes * values.len() as i64);
        for (i, value) in values.iter().enumerate() {
            let at = start + ChronoDuration::minutes(step_minutes * i as i64);
            engine.add_metrics_data_at(at, &HashMap::from([(metric.to_string(), *value)]));
        }
    }

    #[test]
    fn test_linear_regression_exact_line() {
        let fit = linear_regression(&[(0.0, 1.0), (1.0, 3.0), (2.0, 5.0)]).unwrap();
        assert!((fit.slope - 2.0).abs() < 1e-9);
        assert!((fit.intercept - 1.0).abs() < 1e-9);
        assert!((fit.r_squared - 1.0).abs() < 1e-9);
        assert!((fit.at(3.0) - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_linear_regression_degenerate() {
        assert!(linear_regression(&[(1.0, 1.0)]).is_none());
        assert!(linear_regression(&[(1.0, 1.0), (1.0, 2.0)]).is_none());
    }

    #[test]
    fn test_rising_sequence() {
        let engine = engine();
        feed(&engine, "cpu_percent", &[10.0, 20.0, 30.0, 40.0, 50.0], 1);

        let trends = engine.analyze_system_trends(1);
        assert_eq!(trends.len(), 1);
        let trend = &trends[0];
        assert_eq!(trend.trend_direction, TrendDirection::Rising);
        assert_eq!(trend.current_value, 50.0);
        assert!((trend.slope_per_minute - 10.0).abs() < 1e-6);
        // five one-minute steps past the last point
        assert!((trend.predicted_value - 100.0).abs() < 1e-6);
        assert_eq!(trend.data_points, 5);
    }

    #[test]
    fn test_single_point_has_no_trend() {
        let engine = engine();
        feed(&engine, "memory_percent", &[42.0], 1);
        feed(&engine, "cpu_percent", &[10.0, 20.0, 30.0], 1);

        let trends = engine.analyze_system_trends(1);
        assert_eq!(trends.len(), 1);
        assert_eq!(trends[0].metric, "cpu_percent");
    }

    #[test]
    fn test_noise_within_dead_band_is_stable() {
        let engine = engine();
        feed(&engine, "memory_percent", &[60.0, 60.2, 59.9, 60.1, 60.0], 1);

        let trends = engine.analyze_system_trends(1);
        assert_eq!(trends[0].trend_direction, TrendDirection::Stable);
    }

    #[test]
    fn test_falling_sequence() {
        let engine = engine();
        feed(&engine, "disk_usage_percent", &[80.0, 70.0, 60.0, 50.0], 1);
        assert_eq!(
            engine.analyze_system_trends(1)[0].trend_direction,
            TrendDirection::Falling
        );
    }

    #[test]
    fn test_identical_timestamps_use_position() {
        let engine = engine();
        let at = Utc::now();
        for v in [1.0, 2.0, 3.0] {
            engine.add_metrics_data_at(at, &HashMap::from([("x".to_string(), v)]));
        }
        let trends = engine.analyze_system_trends(1);
        assert_eq!(trends[0].trend_direction, TrendDirection::Rising);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let engine = TrendEngine::new(TrendConfig {
            capacity: 4,
            ..TrendConfig::default()
        });
        feed(&engine, "cpu_percent", &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 1);
        assert_eq!(engine.data_points("cpu_percent"), 4);
    }

    #[test]
    fn test_window_excludes_old_points() {
        let engine = engine();
        let old = Utc::now() - ChronoDuration::days(3);
        for i in 0..5 {
            engine.add_metrics_data_at(
                old + ChronoDuration::minutes(i),
                &HashMap::from([("cpu_percent".to_string(), 10.0 * i as f64)]),
            );
        }
        assert!(engine.analyze_system_trends(1).is_empty());
        assert_eq!(engine.analyze_system_trends(7).len(), 1);
    }

    #[test]
    fn test_maintenance_alert_for_rising_cpu() {
        let engine = engine();
        feed(&engine, "cpu_percent", &[50.0, 55.0, 60.0, 65.0, 70.0], 1);

        let alerts = engine.predict_maintenance_needs(60.0);
        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(alert.severity, AlertSeverity::Critical);
        assert_eq!(alert.threshold, 90.0);
        assert!((alert.minutes_until_threshold - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_no_alert_beyond_horizon() {
        let engine = engine();
        feed(&engine, "cpu_percent", &[10.0, 11.0, 12.0, 13.0, 14.0], 10);

        // 0.1 per minute needs over 600 minutes to reach 75
        assert!(engine.predict_maintenance_needs(60.0).is_empty());
    }

    #[test]
    fn test_already_exceeded_threshold() {
        let engine = engine();
        feed(&engine, "disk_usage_percent", &[97.0, 97.0, 97.0], 1);

        let alerts = engine.predict_maintenance_needs(30.0);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
        assert_eq!(alerts[0].minutes_until_threshold, 0.0);
    }

    #[test]
    fn test_insufficient_history_is_skipped() {
        let engine = engine();
        feed(&engine, "memory_percent", &[99.0, 99.0], 1);
        assert!(engine.predict_maintenance_needs(60.0).is_empty());
    }
}
