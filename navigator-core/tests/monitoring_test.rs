use navigator_core::agent::{MonitoringAgent, MonitoringContext, EXECUTIONS_TOTAL, RUNNING_EXECUTIONS};
use navigator_core::config::NavigatorConfig;
use navigator_core::diagnosis::DiagnosisCapability;
use navigator_core::error::{NavigatorError, NavigatorResult};
use navigator_core::http::{serve_with_listener, EXPOSITION_CONTENT_TYPE};
use navigator_core::models::{ExecutionOutcome, ExecutionStatus, HealthLevel, MetricSample};
use navigator_core::monitor::MetricSource;
use navigator_core::registry::Labels;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct SteadySource {
    cpu: f64,
    memory: f64,
    disk: f64,
}

impl MetricSource for SteadySource {
    fn sample(&self) -> NavigatorResult<MetricSample> {
        Ok(MetricSample::new(self.cpu, self.memory, 4096, self.disk, 8192, 12))
    }

    fn name(&self) -> &str {
        "steady"
    }
}

struct CountingSource {
    samples: AtomicUsize,
}

impl MetricSource for CountingSource {
    fn sample(&self) -> NavigatorResult<MetricSample> {
        self.samples.fetch_add(1, Ordering::SeqCst);
        Ok(MetricSample::new(10.0, 40.0, 4096, 50.0, 8192, 12))
    }
}

struct BrokenSource;

impl MetricSource for BrokenSource {
    fn sample(&self) -> NavigatorResult<MetricSample> {
        Err(NavigatorError::CollectorUnavailable(
            "no host metrics".to_string(),
        ))
    }
}

fn agent_with(cpu: f64, memory: f64, disk: f64) -> MonitoringAgent {
    let ctx = MonitoringContext::with_source(
        NavigatorConfig::default(),
        Arc::new(SteadySource { cpu, memory, disk }),
    )
    .with_diagnosis(DiagnosisCapability::unavailable("no api key"));
    MonitoringAgent::new(ctx)
}

mod execution_tests {
    use super::*;

    #[tokio::test]
    async fn test_single_execution_lifecycle() {
        let agent = agent_with(20.0, 40.0, 50.0);
        let key = agent.start_execution("agentA", "K1");

        let metrics = agent.get_agent_metrics();
        assert_eq!(metrics["agentA"].success_rate, None);
        assert_eq!(metrics["agentA"].running_executions, 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        agent
            .end_execution(&key, ExecutionStatus::Completed, ExecutionOutcome::new())
            .unwrap();

        let metrics = agent.get_agent_metrics();
        let a = &metrics["agentA"];
        assert_eq!(a.success_rate, Some(1.0));
        let avg = a.avg_duration_seconds.unwrap();
        assert!(avg >= 0.05 && avg < 5.0, "unexpected duration {}", avg);
        assert_eq!(
            agent
                .registry()
                .get_gauge(RUNNING_EXECUTIONS, &Labels::from([("agent", "agentA")])),
            Some(0.0)
        );
    }

    #[tokio::test]
    async fn test_parallel_agents_with_failures() {
        let agent = agent_with(20.0, 40.0, 50.0);
        let series_before = agent.registry().get_metrics_summary().total_metrics;

        let mut handles = Vec::new();
        for i in 0..5 {
            let a = agent.clone();
            handles.push(tokio::spawn(async move {
                a.track("A", &format!("a{}", i), async {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok::<_, String>(())
                })
                .await
            }));

            let b = agent.clone();
            handles.push(tokio::spawn(async move {
                b.track("B", &format!("b{}", i), async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    if i < 3 {
                        Err(format!("task b{} failed", i))
                    } else {
                        Ok(())
                    }
                })
                .await
            }));
        }
        for handle in handles {
            let _ = handle.await.unwrap();
        }

        let metrics = agent.get_agent_metrics();
        assert_eq!(metrics["A"].completed_executions, 5);
        assert_eq!(metrics["A"].success_rate, Some(1.0));
        assert_eq!(metrics["B"].completed_executions, 2);
        assert_eq!(metrics["B"].failed_executions, 3);
        assert_eq!(metrics["B"].success_rate, Some(0.4));

        let registry = agent.registry();
        assert_eq!(
            registry.get_counter(
                EXECUTIONS_TOTAL,
                &Labels::from([("agent", "B"), ("status", "failed")])
            ),
            Some(3.0)
        );

        // executions by status (3), seconds by agent (2), running by agent (2)
        let series_after = registry.get_metrics_summary().total_metrics;
        assert_eq!(series_after - series_before, 7);

        let failed = agent
            .tracker()
            .recent_executions(10)
            .into_iter()
            .filter(|r| r.status == ExecutionStatus::Failed)
            .count();
        assert_eq!(failed, 3);
    }
}

mod reporting_tests {
    use super::*;

    #[tokio::test]
    async fn test_export_monitoring_data_without_diagnosis() {
        let agent = agent_with(20.0, 40.0, 50.0);
        agent.collect_once();
        let key = agent.start_execution("legal", "review");
        agent
            .end_execution(&key, ExecutionStatus::Completed, ExecutionOutcome::new())
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        agent.export_monitoring_data(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        for field in ["timestamp", "system_metrics", "agent_metrics", "health", "alerts"] {
            assert!(json.get(field).is_some(), "missing {}", field);
        }
        assert_eq!(json["agent_metrics"]["legal"]["completed_executions"], 1);
        assert_eq!(json["ai_diagnosis"]["available"], false);
        assert_eq!(json["ai_diagnosis"]["reason"], "no api key");
    }

    #[tokio::test]
    async fn test_summary_reads_do_not_change_state() {
        let agent = agent_with(20.0, 40.0, 50.0);
        agent.collect_once();

        let first = agent.get_monitoring_summary();
        let second = agent.get_monitoring_summary();
        assert_eq!(first.system.sample, second.system.sample);
        assert_eq!(agent.monitor().history().len(), 1);
        assert_eq!(first.health.status, HealthLevel::Healthy);
        assert!(!first.ai_diagnosis_available);
    }

    #[tokio::test]
    async fn test_fallback_diagnosis_when_unavailable() {
        let agent = agent_with(97.0, 40.0, 50.0);
        agent.collect_once();

        let diagnosis = agent.diagnose().await;
        assert!(!diagnosis.ai_powered);
        assert_eq!(diagnosis.fallback_reason.as_deref(), Some("no api key"));
        assert!(!diagnosis.key_issues.is_empty());
    }

    #[tokio::test]
    async fn test_collector_failure_reports_unknown_system() {
        let ctx = MonitoringContext::with_source(NavigatorConfig::default(), Arc::new(BrokenSource))
            .with_diagnosis(DiagnosisCapability::unavailable("no api key"));
        let agent = MonitoringAgent::new(ctx);

        let sample = agent.collect_once();
        assert_eq!(sample.cpu_percent, 0.0);
        assert!(agent.trends().tracked_metrics().is_empty());

        let summary = agent.get_monitoring_summary();
        assert_eq!(summary.system.health_status, HealthLevel::Unknown);
        assert!(summary.system.stale);
        assert!(summary.system.collector_error.is_some());
        assert_ne!(summary.health.status, HealthLevel::Healthy);
    }

    #[tokio::test]
    async fn test_background_loop_start_stop() {
        let mut config = NavigatorConfig::default();
        config.monitor.interval_secs = 1;
        let ctx = MonitoringContext::with_source(config, Arc::new(SteadySource {
            cpu: 10.0,
            memory: 40.0,
            disk: 50.0,
        }))
            .with_diagnosis(DiagnosisCapability::unavailable("no api key"));
        let agent = MonitoringAgent::new(ctx);

        agent.start().await;
        assert!(agent.is_running());
        assert!(agent.reset().is_err());

        // the first tick fires immediately
        tokio::time::sleep(Duration::from_millis(200)).await;
        agent.stop().await;
        assert!(!agent.is_running());
        assert!(agent.monitor().latest().is_some());
        assert!(agent.reset().is_ok());
    }
}

mod restart_tests {
    use super::*;

    #[tokio::test]
    async fn test_loop_samples_again_after_quick_restart() {
        let source = Arc::new(CountingSource {
            samples: AtomicUsize::new(0),
        });
        let mut config = NavigatorConfig::default();
        config.monitor.interval_secs = 60;
        let ctx = MonitoringContext::with_source(config, source.clone())
            .with_diagnosis(DiagnosisCapability::unavailable("no api key"));
        let agent = MonitoringAgent::new(ctx);

        for round in 0..10 {
            agent.start().await;
            agent.stop().await;
            assert!(!agent.is_running());

            let before = source.samples.load(Ordering::SeqCst);
            agent.start().await;
            // the first tick fires immediately
            tokio::time::sleep(Duration::from_millis(30)).await;
            assert!(
                source.samples.load(Ordering::SeqCst) > before,
                "restarted loop took no sample in round {}",
                round
            );
            agent.stop().await;
        }
    }

    #[tokio::test]
    async fn test_stop_before_first_poll() {
        let source = Arc::new(CountingSource {
            samples: AtomicUsize::new(0),
        });
        let ctx = MonitoringContext::with_source(NavigatorConfig::default(), source.clone())
            .with_diagnosis(DiagnosisCapability::unavailable("no api key"));
        let agent = MonitoringAgent::new(ctx);

        agent.start().await;
        agent.stop().await;
        let after_stop = source.samples.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(source.samples.load(Ordering::SeqCst), after_stop);
        assert!(!agent.is_running());
    }
}

mod http_tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    async fn spawn_server(
        agent: MonitoringAgent,
    ) -> (String, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            serve_with_listener(agent, listener, async move {
                let _ = rx.await;
            })
            .await
            .unwrap();
        });
        (base, tx, handle)
    }

    #[tokio::test]
    async fn test_metrics_and_health_endpoints() {
        let agent = agent_with(20.0, 40.0, 50.0);
        agent.collect_once();
        let key = agent.start_execution("synergy", "score");
        agent
            .end_execution(&key, ExecutionStatus::Completed, ExecutionOutcome::new())
            .unwrap();

        let (base, shutdown, server) = spawn_server(agent).await;
        let client = reqwest::Client::new();

        let response = client
            .get(format!("{}/metrics", base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(
            response.headers()["content-type"].to_str().unwrap(),
            EXPOSITION_CONTENT_TYPE
        );
        let body = response.text().await.unwrap();
        assert!(body.contains(
            "navigator_agent_executions_total{agent=\"synergy\",status=\"completed\"} 1"
        ));
        assert!(body.contains("# TYPE navigator_system_cpu_percent gauge"));

        let response = client
            .get(format!("{}/health", base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let health: serde_json::Value = response.json().await.unwrap();
        assert_eq!(health["status"], "healthy");

        let response = client
            .get(format!("{}/agents", base))
            .send()
            .await
            .unwrap();
        let agents: serde_json::Value = response.json().await.unwrap();
        assert_eq!(agents["agents"]["synergy"]["total_executions"], 1);

        shutdown.send(()).unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_health_is_unavailable_when_critical() {
        // every resource critical drags the score under the degraded floor
        let agent = agent_with(99.0, 99.0, 99.0);
        agent.collect_once();

        let (base, shutdown, server) = spawn_server(agent).await;
        let response = reqwest::get(format!("{}/health", base)).await.unwrap();
        assert_eq!(response.status(), 503);

        shutdown.send(()).unwrap();
        server.await.unwrap();
    }
}
