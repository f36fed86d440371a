//! Optional AI-assisted diagnosis.
//!
//! The capability is decided once, at construction: either a client is
//! available or there is a recorded reason why not. Every path through
//! [`DiagnosisCapability::diagnose`] ends in a [`Diagnosis`]; failures of the
//! remote model turn into the rule-based fallback.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::DiagnosisConfig;
use crate::error::{retry_async_with_config, NavigatorError, NavigatorResult, RetryConfig};
use crate::models::{
    AgentMetrics, AlertSeverity, Bottleneck, BottleneckSeverity, MaintenanceAlert, MetricSample,
};

/// Below this success rate an agent is called out as an issue.
const AGENT_SUCCESS_WARNING: f64 = 0.8;
const AGENT_SUCCESS_CRITICAL: f64 = 0.5;

/// Keeps the key out of request URLs, and so out of error messages and logs.
const API_KEY_HEADER: &str = "x-goog-api-key";

/// What the collaborator is asked to explain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisPayload {
    pub timestamp: DateTime<Utc>,
    pub system_metrics: MetricSample,
    pub bottlenecks: Vec<Bottleneck>,
    pub alerts: Vec<MaintenanceAlert>,
    pub agent_performance: BTreeMap<String, AgentMetrics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl DiagnosisSeverity {
    fn parse_lenient(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "low" | "info" | "healthy" => DiagnosisSeverity::Low,
            "high" | "severe" => DiagnosisSeverity::High,
            "critical" => DiagnosisSeverity::Critical,
            _ => DiagnosisSeverity::Medium,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub ai_powered: bool,
    pub overall_health_assessment: String,
    pub severity: DiagnosisSeverity,
    pub key_issues: Vec<String>,
    pub business_impact: String,
    pub recommendations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Set only on the rule-based fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    pub generated_at: DateTime<Utc>,
}

#[async_trait]
pub trait DiagnosisClient: Send + Sync {
    fn name(&self) -> &str;

    async fn diagnose(&self, payload: &DiagnosisPayload) -> NavigatorResult<Diagnosis>;
}

#[derive(Clone)]
pub enum DiagnosisCapability {
    Available(Arc<dyn DiagnosisClient>),
    Unavailable { reason: String },
}

impl std::fmt::Debug for DiagnosisCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiagnosisCapability::Available(client) => {
                f.debug_tuple("Available").field(&client.name()).finish()
            }
            DiagnosisCapability::Unavailable { reason } => f
                .debug_struct("Unavailable")
                .field("reason", reason)
                .finish(),
        }
    }
}

impl DiagnosisCapability {
    pub fn from_config(config: &DiagnosisConfig) -> Self {
        if !config.enabled {
            return Self::unavailable("AI diagnosis is disabled in configuration");
        }

        let Some(api_key) = config.resolved_api_key() else {
            info!("No Gemini API key configured, AI diagnosis unavailable");
            return Self::unavailable("no API key configured (set GEMINI_API_KEY)");
        };

        match GeminiDiagnosisClient::new(config, api_key) {
            Ok(client) => {
                info!(model = %config.model, "AI diagnosis enabled");
                Self::Available(Arc::new(client))
            }
            Err(e) => {
                warn!(error = %e, "Failed to build diagnosis client");
                Self::unavailable(e.to_string())
            }
        }
    }

    pub fn available(client: Arc<dyn DiagnosisClient>) -> Self {
        Self::Available(client)
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    pub fn unavailable_reason(&self) -> Option<&str> {
        match self {
            Self::Available(_) => None,
            Self::Unavailable { reason } => Some(reason),
        }
    }

    /// Never fails; falls back to [`fallback_diagnosis`] on any error.
    pub async fn diagnose(&self, payload: &DiagnosisPayload) -> Diagnosis {
        match self {
            Self::Unavailable { reason } => fallback_diagnosis(payload, reason),
            Self::Available(client) => match client.diagnose(payload).await {
                Ok(diagnosis) => diagnosis,
                Err(e) => {
                    warn!(
                        client = client.name(),
                        error_code = e.error_code(),
                        error = %e,
                        "AI diagnosis failed, using rule-based fallback"
                    );
                    fallback_diagnosis(payload, &e.to_string())
                }
            },
        }
    }
}

/// Deterministic, rule-based diagnosis derived only from `payload`.
pub fn fallback_diagnosis(payload: &DiagnosisPayload, reason: &str) -> Diagnosis {
    let mut severity = DiagnosisSeverity::Low;
    let mut key_issues = Vec::new();
    let mut recommendations: Vec<String> = Vec::new();

    let mut raise = |level: DiagnosisSeverity| {
        if level > severity {
            severity = level;
        }
    };

    for bottleneck in &payload.bottlenecks {
        raise(match bottleneck.severity {
            BottleneckSeverity::Critical => DiagnosisSeverity::Critical,
            BottleneckSeverity::Warning => DiagnosisSeverity::High,
        });
        key_issues.push(bottleneck.message.clone());
    }

    for alert in &payload.alerts {
        raise(match alert.severity {
            AlertSeverity::Critical => DiagnosisSeverity::Critical,
            AlertSeverity::Warning => DiagnosisSeverity::Medium,
        });
        key_issues.push(alert.message.clone());
        if !recommendations.contains(&alert.recommendation) {
            recommendations.push(alert.recommendation.clone());
        }
    }

    for (agent_id, metrics) in &payload.agent_performance {
        let Some(rate) = metrics.success_rate else {
            continue;
        };
        if rate < AGENT_SUCCESS_WARNING {
            raise(if rate < AGENT_SUCCESS_CRITICAL {
                DiagnosisSeverity::High
            } else {
                DiagnosisSeverity::Medium
            });
            key_issues.push(format!(
                "agent {} success rate {:.1}% ({} of {} executions failed)",
                agent_id,
                rate * 100.0,
                metrics.failed_executions,
                metrics.closed_executions()
            ));
            recommendations.push(format!(
                "Review error messages of failed {} executions",
                agent_id
            ));
        }
    }

    if recommendations.is_empty() {
        recommendations.push("Continue routine monitoring".to_string());
    }

    let overall_health_assessment = if key_issues.is_empty() {
        "Rule-based assessment: no issues detected".to_string()
    } else {
        format!(
            "Rule-based assessment: {} issue(s) detected",
            key_issues.len()
        )
    };

    let business_impact = match severity {
        DiagnosisSeverity::Low => "No impact on analysis throughput expected",
        DiagnosisSeverity::Medium => "Some analyses may be delayed or need re-running",
        DiagnosisSeverity::High => "Analysis results may be incomplete for affected agents",
        DiagnosisSeverity::Critical => "Deal analysis is at risk until resources recover",
    }
    .to_string();

    Diagnosis {
        ai_powered: false,
        overall_health_assessment,
        severity,
        key_issues,
        business_impact,
        recommendations,
        model: None,
        fallback_reason: Some(reason.to_string()),
        generated_at: payload.timestamp,
    }
}

/// Gemini `generateContent` client.
pub struct GeminiDiagnosisClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout_secs: u64,
    retry: RetryConfig,
}

impl GeminiDiagnosisClient {
    pub fn new(config: &DiagnosisConfig, api_key: String) -> NavigatorResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout_secs: config.timeout_secs,
            retry: RetryConfig::for_api(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }

    async fn request_once(&self, body: &serde_json::Value) -> NavigatorResult<String> {
        let response = self
            .client
            .post(self.endpoint())
            .header(API_KEY_HEADER, self.api_key.as_str())
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NavigatorError::DiagnosisTimeout(self.timeout_secs)
                } else {
                    NavigatorError::from(e.without_url())
                }
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(NavigatorError::DiagnosisAuthFailed(format!(
                "status {}",
                status
            )));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(NavigatorError::DiagnosisRequestFailed(format!(
                "status {}: {}",
                status,
                text.chars().take(200).collect::<String>()
            )));
        }

        let reply: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| NavigatorError::DiagnosisParseError(e.to_string()))?;

        reply
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().find_map(|p| p.text))
            .ok_or_else(|| {
                NavigatorError::DiagnosisParseError("response contained no text".to_string())
            })
    }
}

#[async_trait]
impl DiagnosisClient for GeminiDiagnosisClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn diagnose(&self, payload: &DiagnosisPayload) -> NavigatorResult<Diagnosis> {
        let body = json!({
            "contents": [{ "parts": [{ "text": build_prompt(payload)? }] }],
            "generationConfig": {
                "temperature": 0.2,
                "responseMimeType": "application/json"
            }
        });

        debug!(model = %self.model, "Requesting AI diagnosis");
        let text = retry_async_with_config(|| self.request_once(&body), self.retry.clone()).await?;

        let mut diagnosis = parse_diagnosis_text(&text)?;
        diagnosis.model = Some(self.model.clone());
        Ok(diagnosis)
    }
}

fn build_prompt(payload: &DiagnosisPayload) -> NavigatorResult<String> {
    let data = serde_json::to_string_pretty(payload)?;
    Ok(format!(
        "You are the operations analyst for a multi-agent M&A research system.\n\
         Diagnose the monitoring snapshot below and answer with a single JSON object \
         with the keys: overall_health_assessment (string), severity (one of low, medium, \
         high, critical), key_issues (array of strings), business_impact (string), \
         recommendations (array of strings).\n\nSnapshot:\n{}",
        data
    ))
}

#[derive(Debug, Deserialize)]
struct AiReply {
    overall_health_assessment: String,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    key_issues: Vec<String>,
    #[serde(default)]
    business_impact: String,
    #[serde(default, alias = "business_reasons")]
    recommendations: Vec<String>,
}

/// Parses the model's text reply, tolerating a surrounding markdown code fence.
pub fn parse_diagnosis_text(text: &str) -> NavigatorResult<Diagnosis> {
    let reply: AiReply = serde_json::from_str(strip_code_fences(text))
        .map_err(|e| NavigatorError::DiagnosisParseError(e.to_string()))?;

    Ok(Diagnosis {
        ai_powered: true,
        overall_health_assessment: reply.overall_health_assessment,
        severity: reply
            .severity
            .as_deref()
            .map_or(DiagnosisSeverity::Medium, DiagnosisSeverity::parse_lenient),
        key_issues: reply.key_issues,
        business_impact: reply.business_impact,
        recommendations: reply.recommendations,
        model: None,
        fallback_reason: None,
        generated_at: Utc::now(),
    })
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // drop the info string ("json") on the opening fence line
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(default)]
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExecutionRecord;

    fn payload() -> DiagnosisPayload {
        DiagnosisPayload {
            timestamp: Utc::now(),
            system_metrics: MetricSample::new(10.0, 20.0, 0, 30.0, 0, 5),
            bottlenecks: Vec::new(),
            alerts: Vec::new(),
            agent_performance: BTreeMap::new(),
        }
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{}\n```\n"), "{}");
        assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn test_parse_diagnosis_text() {
        let text = "```json\n{\"overall_health_assessment\":\"fine\",\"severity\":\"HIGH\",\"key_issues\":[\"x\"],\"business_impact\":\"none\",\"recommendations\":[\"y\"]}\n```";
        let diagnosis = parse_diagnosis_text(text).unwrap();

        assert!(diagnosis.ai_powered);
        assert_eq!(diagnosis.severity, DiagnosisSeverity::High);
        assert_eq!(diagnosis.key_issues, vec!["x".to_string()]);
        assert!(diagnosis.fallback_reason.is_none());
    }

    #[test]
    fn test_parse_rejects_prose() {
        let err = parse_diagnosis_text("All good!").unwrap_err();
        assert_eq!(err.error_code(), "E5003");
    }

    #[test]
    fn test_fallback_without_issues() {
        let p = payload();
        let diagnosis = fallback_diagnosis(&p, "offline");

        assert!(!diagnosis.ai_powered);
        assert_eq!(diagnosis.severity, DiagnosisSeverity::Low);
        assert_eq!(diagnosis.fallback_reason.as_deref(), Some("offline"));
        assert_eq!(diagnosis.generated_at, p.timestamp);
        assert_eq!(diagnosis.recommendations, vec!["Continue routine monitoring"]);
    }

    #[test]
    fn test_fallback_is_deterministic() {
        let mut p = payload();
        let mut record = ExecutionRecord::new("k".into(), "legal".into(), "t".into());
        record.finish(
            crate::models::ExecutionStatus::Failed,
            crate::models::ExecutionOutcome::new(),
            Utc::now(),
        );
        p.agent_performance.insert(
            "legal".to_string(),
            AgentMetrics::from_records("legal", [&record]),
        );

        let first = fallback_diagnosis(&p, "offline");
        let second = fallback_diagnosis(&p, "offline");
        assert_eq!(first, second);
        assert_eq!(first.severity, DiagnosisSeverity::High);
        assert!(first.key_issues[0].contains("legal"));
    }

    #[tokio::test]
    async fn test_unavailable_capability_returns_fallback() {
        let capability = DiagnosisCapability::unavailable("no key");
        assert!(!capability.is_available());
        assert_eq!(capability.unavailable_reason(), Some("no key"));

        let diagnosis = capability.diagnose(&payload()).await;
        assert!(!diagnosis.ai_powered);
        assert_eq!(diagnosis.fallback_reason.as_deref(), Some("no key"));
    }

    #[test]
    fn test_disabled_config_is_unavailable() {
        let config = DiagnosisConfig {
            enabled: false,
            ..DiagnosisConfig::default()
        };
        let capability = DiagnosisCapability::from_config(&config);
        assert!(capability
            .unavailable_reason()
            .unwrap()
            .contains("disabled"));
    }
}
