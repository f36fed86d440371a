//! Process-local metrics registry with text exposition export.
//!
//! Series are keyed by metric name plus a validated label set. Export output
//! is ordered by name and then by label set so identical state always
//! serializes to identical bytes.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::Path;

use chrono::{DateTime, Utc};
use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{NavigatorError, NavigatorResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Gauge => write!(f, "gauge"),
            MetricKind::Counter => write!(f, "counter"),
        }
    }
}

/// Ordered label set attached to a series.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn validate(&self, metric: &str) -> NavigatorResult<()> {
        for key in self.0.keys() {
            if !is_valid_label_name(key) {
                return Err(NavigatorError::InvalidLabelName {
                    metric: metric.to_string(),
                    label: key.clone(),
                });
            }
        }
        Ok(())
    }

    /// `{k1="v1",k2="v2"}`, or an empty string for no labels.
    fn render(&self) -> String {
        if self.0.is_empty() {
            return String::new();
        }

        let pairs: Vec<String> = self
            .0
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
            .collect();
        format!("{{{}}}", pairs.join(","))
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for Labels {
    fn from(pairs: [(K, V); N]) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl FromIterator<(String, String)> for Labels {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone)]
struct MetricFamily {
    kind: MetricKind,
    help: Option<String>,
    series: BTreeMap<Labels, f64>,
}

impl MetricFamily {
    fn new(kind: MetricKind) -> Self {
        Self {
            kind,
            help: None,
            series: BTreeMap::new(),
        }
    }
}

/// Registry introspection used by health reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    /// Distinct (name, label set) series.
    pub total_metrics: usize,
    pub metric_names: usize,
    pub gauges: usize,
    pub counters: usize,
    pub series_per_metric: BTreeMap<String, usize>,
    pub generated_at: DateTime<Utc>,
}

/// Metric families keyed by name. Each name sits in its own map entry, so
/// writers to different metrics never wait on each other.
pub struct MetricsRegistry {
    families: DashMap<String, MetricFamily>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            families: DashMap::new(),
        }
    }

    /// Overwrites the series value; last write wins.
    pub fn set_gauge(&self, name: &str, value: f64, labels: Labels) -> NavigatorResult<()> {
        validate_sample(name, value, &labels)?;

        let mut family = self.family_for(name, MetricKind::Gauge)?;
        family.series.insert(labels, value);

        trace!(metric = name, value = value, "Gauge set");
        Ok(())
    }

    /// Adds `delta` to the series, creating it at `delta` if absent.
    ///
    /// A sum that would overflow to infinity is rejected and leaves the series unchanged.
    pub fn increment_counter(&self, name: &str, delta: f64, labels: Labels) -> NavigatorResult<()> {
        validate_sample(name, delta, &labels)?;
        if delta < 0.0 {
            return Err(NavigatorError::NegativeCounterIncrement {
                name: name.to_string(),
                delta,
            });
        }

        let mut family = self.family_for(name, MetricKind::Counter)?;
        let updated = family.series.get(&labels).copied().unwrap_or(0.0) + delta;
        if !updated.is_finite() {
            return Err(NavigatorError::NonFiniteValue(name.to_string()));
        }
        family.series.insert(labels, updated);

        trace!(metric = name, delta = delta, "Counter incremented");
        Ok(())
    }

    /// Attaches `# HELP` text to a metric name, registering it if needed.
    pub fn describe(&self, name: &str, kind: MetricKind, help: &str) -> NavigatorResult<()> {
        if !is_valid_metric_name(name) {
            return Err(NavigatorError::InvalidMetricName(name.to_string()));
        }

        let mut family = self.family_for(name, kind)?;
        family.help = Some(help.to_string());
        Ok(())
    }

    pub fn get_gauge(&self, name: &str, labels: &Labels) -> Option<f64> {
        self.get(name, MetricKind::Gauge, labels)
    }

    pub fn get_counter(&self, name: &str, labels: &Labels) -> Option<f64> {
        self.get(name, MetricKind::Counter, labels)
    }

    fn get(&self, name: &str, kind: MetricKind, labels: &Labels) -> Option<f64> {
        let family = self.families.get(name)?;
        if family.kind != kind {
            return None;
        }
        family.series.get(labels).copied()
    }

    pub fn export_prometheus_format(&self) -> String {
        let snapshot = self.snapshot();
        let mut output = String::new();

        for (name, family) in &snapshot {
            if let Some(help) = &family.help {
                let _ = writeln!(output, "# HELP {} {}", name, escape_help(help));
            }
            let _ = writeln!(output, "# TYPE {} {}", name, family.kind);
            for (labels, value) in &family.series {
                let _ = writeln!(output, "{}{} {}", name, labels.render(), value);
            }
        }

        output
    }

    /// Writes the exposition text through a temp file renamed into place.
    pub fn export_to_file(&self, path: impl AsRef<Path>) -> NavigatorResult<()> {
        let path = path.as_ref();
        let text = self.export_prometheus_format();
        write_atomically(path, text.as_bytes())?;
        debug!(path = %path.display(), bytes = text.len(), "Metrics exported to file");
        Ok(())
    }

    pub fn get_metrics_summary(&self) -> MetricsSummary {
        let snapshot = self.snapshot();

        let mut summary = MetricsSummary {
            total_metrics: 0,
            metric_names: snapshot.len(),
            gauges: 0,
            counters: 0,
            series_per_metric: BTreeMap::new(),
            generated_at: Utc::now(),
        };

        for (name, family) in &snapshot {
            summary.total_metrics += family.series.len();
            match family.kind {
                MetricKind::Gauge => summary.gauges += 1,
                MetricKind::Counter => summary.counters += 1,
            }
            summary
                .series_per_metric
                .insert(name.clone(), family.series.len());
        }

        summary
    }

    /// Drops every registered metric.
    pub fn reset(&self) {
        self.families.clear();
        debug!("Metrics registry reset");
    }

    /// Name-ordered copy; each family is cloned under its own entry lock.
    fn snapshot(&self) -> BTreeMap<String, MetricFamily> {
        self.families
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    fn family_for(
        &self,
        name: &str,
        kind: MetricKind,
    ) -> NavigatorResult<RefMut<'_, String, MetricFamily>> {
        let family = self
            .families
            .entry(name.to_string())
            .or_insert_with(|| MetricFamily::new(kind));

        if family.kind != kind {
            return Err(NavigatorError::MetricKindMismatch {
                name: name.to_string(),
                existing: family.kind.to_string(),
                requested: kind.to_string(),
            });
        }

        Ok(family)
    }
}

fn validate_sample(name: &str, value: f64, labels: &Labels) -> NavigatorResult<()> {
    if !is_valid_metric_name(name) {
        return Err(NavigatorError::InvalidMetricName(name.to_string()));
    }
    labels.validate(name)?;
    if !value.is_finite() {
        return Err(NavigatorError::NonFiniteValue(name.to_string()));
    }
    Ok(())
}

/// `[a-zA-Z_:][a-zA-Z0-9_:]*`
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// `[a-zA-Z_][a-zA-Z0-9_]*`, excluding the reserved `__` prefix.
pub fn is_valid_label_name(name: &str) -> bool {
    if name.starts_with("__") {
        return false;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Write-temp-then-rename in the target's directory.
pub(crate) fn write_atomically(path: &Path, contents: &[u8]) -> NavigatorResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;
    temp.persist(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_name_validation() {
        assert!(is_valid_metric_name("navigator_agent_executions_total"));
        assert!(is_valid_metric_name("ns:metric"));
        assert!(is_valid_metric_name("_private"));
        assert!(!is_valid_metric_name(""));
        assert!(!is_valid_metric_name("1metric"));
        assert!(!is_valid_metric_name("metric-name"));
        assert!(!is_valid_metric_name("metric name"));
    }

    #[test]
    fn test_label_name_validation() {
        assert!(is_valid_label_name("agent"));
        assert!(is_valid_label_name("_status"));
        assert!(!is_valid_label_name("__reserved"));
        assert!(!is_valid_label_name("with:colon"));
        assert!(!is_valid_label_name("9lives"));
    }

    #[test]
    fn test_label_rendering_is_sorted_and_escaped() {
        let labels = Labels::from([("status", "ok"), ("agent", "a\"b\\c\nd")]);
        assert_eq!(
            labels.render(),
            "{agent=\"a\\\"b\\\\c\\nd\",status=\"ok\"}"
        );
        assert_eq!(Labels::new().render(), "");
    }

    #[test]
    fn test_gauge_overwrite() {
        let registry = MetricsRegistry::new();
        registry.set_gauge("temp", 1.0, Labels::new()).unwrap();
        registry.set_gauge("temp", 3.5, Labels::new()).unwrap();

        assert_eq!(registry.get_gauge("temp", &Labels::new()), Some(3.5));
        assert_eq!(registry.get_counter("temp", &Labels::new()), None);
    }

    #[test]
    fn test_counter_accumulates() {
        let registry = MetricsRegistry::new();
        let labels = Labels::from([("agent", "finance")]);
        registry.increment_counter("runs_total", 1.0, labels.clone()).unwrap();
        registry.increment_counter("runs_total", 2.5, labels.clone()).unwrap();
        registry.increment_counter("runs_total", 0.0, labels.clone()).unwrap();

        assert_eq!(registry.get_counter("runs_total", &labels), Some(3.5));
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let registry = MetricsRegistry::new();
        registry.set_gauge("value", 1.0, Labels::new()).unwrap();
        let err = registry
            .increment_counter("value", 1.0, Labels::new())
            .unwrap_err();
        assert!(matches!(err, NavigatorError::MetricKindMismatch { .. }));
    }

    #[test]
    fn test_non_finite_rejected() {
        let registry = MetricsRegistry::new();
        assert!(registry.set_gauge("g", f64::NAN, Labels::new()).is_err());
        assert!(registry
            .increment_counter("c", f64::INFINITY, Labels::new())
            .is_err());
        assert_eq!(registry.get_metrics_summary().total_metrics, 0);
    }

    #[test]
    fn test_export_with_help() {
        let registry = MetricsRegistry::new();
        registry
            .describe("up", MetricKind::Gauge, "Whether the\nservice is up")
            .unwrap();
        registry.set_gauge("up", 1.0, Labels::new()).unwrap();

        assert_eq!(
            registry.export_prometheus_format(),
            "# HELP up Whether the\\nservice is up\n# TYPE up gauge\nup 1\n"
        );
    }

    #[test]
    fn test_reset_clears_everything() {
        let registry = MetricsRegistry::new();
        registry.set_gauge("a", 1.0, Labels::new()).unwrap();
        registry.increment_counter("b", 1.0, Labels::new()).unwrap();
        registry.reset();

        assert_eq!(registry.get_metrics_summary().total_metrics, 0);
        assert_eq!(registry.export_prometheus_format(), "");
    }
}
