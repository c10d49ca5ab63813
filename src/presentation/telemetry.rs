// Telemetry report - the session's only side channel to the host
use crate::application::lifecycle::ControllerStats;
use crate::application::scheduler::QueueStatus;
use crate::application::session::ChartSession;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryReport {
    pub generated_at: String,
    pub samples_received: u64,
    pub history_len: usize,
    pub history_dropped: u64,
    pub points_appended: u64,
    pub render_failures: u64,
    pub queue: QueueStatus,
    pub scheduler_drains: u64,
    pub scheduler_invocations: u64,
    pub superseded_updates: u64,
    pub charts: BTreeMap<String, ControllerStats>,
}

impl TelemetryReport {
    pub fn from_session(session: &ChartSession) -> Self {
        let charts = session.chart_stats();
        let scheduler = session.scheduler();
        Self {
            generated_at: chrono::Utc::now().to_rfc3339(),
            samples_received: session.samples_received(),
            history_len: session.history_len(),
            history_dropped: session.history_dropped(),
            points_appended: charts.values().map(|c| c.points_appended).sum(),
            render_failures: charts.values().map(|c| c.render_failures).sum(),
            queue: session.queue_status(),
            scheduler_drains: scheduler.drains(),
            scheduler_invocations: scheduler.invocations(),
            superseded_updates: scheduler.superseded(),
            charts,
        }
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::chart_mode::{ChartMode, RendererFactory};
    use crate::application::clock::ManualClock;
    use crate::application::renderer::ChartRenderer;
    use crate::domain::telemetry::Sample;
    use crate::infrastructure::config::{ChartSpec, PipelineConfig};
    use crate::infrastructure::memory_renderer::InMemoryRenderer;
    use std::rc::Rc;
    use tokio::time::{Duration, Instant};

    #[tokio::test(start_paused = true)]
    async fn test_report_sums_chart_stats() {
        let factory: RendererFactory =
            Box::new(|id: &str| -> Box<dyn ChartRenderer> { Box::new(InMemoryRenderer::new(id)) });
        let config = PipelineConfig {
            charts: vec![
                ChartSpec::new("a", ChartMode::Multi),
                ChartSpec::new("b", ChartMode::Multi),
            ],
            ..PipelineConfig::default()
        };
        let mut session =
            ChartSession::new(config, factory, Rc::new(ManualClock::new(1_000_000))).unwrap();
        let start = Instant::now();
        session.start(start).await.unwrap();

        session.ingest(Sample::new(999_000).with("heartRate", 70.0), start);
        session.on_frame(start + Duration::from_millis(100));
        tokio::time::advance(Duration::from_millis(300)).await;
        session.on_timer(Instant::now());

        let report = TelemetryReport::from_session(&session);
        assert_eq!(report.samples_received, 1);
        assert_eq!(report.points_appended, 2);
        assert_eq!(report.scheduler_invocations, 2);
        assert_eq!(report.charts.len(), 2);
        assert_eq!(report.queue.registered_instances, 2);

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["charts"]["a"]["phase"], "ready");
        assert_eq!(json["queue"]["queue_length"], 0);
    }
}
