// Main entry point - wires the chart session to a simulated vitals stream
use std::rc::Rc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

use vitals_chart::application::chart_mode::RendererFactory;
use vitals_chart::application::clock::SystemClock;
use vitals_chart::application::renderer::ChartRenderer;
use vitals_chart::application::session::{ChartSession, SessionInput, UiCommand};
use vitals_chart::domain::telemetry::Sample;
use vitals_chart::infrastructure::config::load_pipeline_config;
use vitals_chart::infrastructure::legend_store::JsonFileLegendStore;
use vitals_chart::infrastructure::memory_renderer::InMemoryRenderer;
use vitals_chart::presentation::telemetry::TelemetryReport;
use vitals_chart::presentation::ui_events::parse_ui_event;

const SAMPLE_PERIOD: Duration = Duration::from_millis(50);
const SAMPLE_COUNT: u32 = 80;
const HISTORY_SECONDS: i64 = 600;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_pipeline_config()?;
    let legend_path = config.legend_path.clone();
    let interactive_chart = config
        .chart_specs()
        .into_iter()
        .find(|spec| spec.mode.is_interactive())
        .map(|spec| spec.id);

    let factory: RendererFactory =
        Box::new(|id: &str| -> Box<dyn ChartRenderer> { Box::new(InMemoryRenderer::new(id)) });
    let mut session = ChartSession::new(config, factory, Rc::new(SystemClock))?;
    if let Some(path) = legend_path {
        session = session.with_legend_store(Arc::new(JsonFileLegendStore::new(path)));
    }
    session.start(Instant::now()).await?;

    let (tx, rx) = mpsc::channel(256);
    let (_, produced) = tokio::join!(session.run(rx), simulate(tx, interactive_chart));
    produced?;

    let report = TelemetryReport::from_session(&session);
    println!("{}", report.to_json()?);
    Ok(())
}

/// Ten minutes of backfill, then a live stream with a legend toggle and a
/// window change midway.
async fn simulate(
    tx: mpsc::Sender<SessionInput>,
    interactive_chart: Option<String>,
) -> anyhow::Result<()> {
    let now_ms = chrono::Utc::now().timestamp_millis();
    let backfill = (0..HISTORY_SECONDS)
        .map(|s| simulated_sample(now_ms - (HISTORY_SECONDS - s) * 1_000, s as u32))
        .collect();
    tx.send(SessionInput::LoadHistory(backfill)).await?;

    let ticks = tokio_stream::iter(0..SAMPLE_COUNT).throttle(SAMPLE_PERIOD);
    tokio::pin!(ticks);
    while let Some(tick) = ticks.next().await {
        let sample = simulated_sample(chrono::Utc::now().timestamp_millis(), tick);
        tx.send(SessionInput::Sample(sample)).await?;

        if tick == SAMPLE_COUNT / 3 {
            let command = parse_ui_event(r#"{"type":"toggle_group","group":"oximeter"}"#)?;
            tx.send(SessionInput::Ui(command)).await?;
        }
        if tick == SAMPLE_COUNT / 2 {
            if let Some(chart_id) = &interactive_chart {
                let command = UiCommand::SelectWindow {
                    chart_id: chart_id.clone(),
                    minutes: 30,
                };
                tx.send(SessionInput::Ui(command)).await?;
            }
        }
    }

    tokio::time::sleep(Duration::from_millis(500)).await;
    tx.send(SessionInput::Shutdown).await?;
    Ok(())
}

/// Radar, bracelet and oximeter readings. HRV channels report every tenth tick.
fn simulated_sample(timestamp_ms: i64, tick: u32) -> Sample {
    let phase = f64::from(tick) / 10.0;
    let sample = Sample::new(timestamp_ms)
        .with("heartRate", 72.0 + 8.0 * phase.sin())
        .with("breathRate", 14.0 + 2.0 * (phase / 2.0).sin())
        .with("distance", 45.0 + 3.0 * (phase / 5.0).cos())
        .with("braceletHeartRate", 73.0 + 6.0 * phase.sin())
        .with("bloodOxygen", 97.0)
        .with("spo2", 96.0 + (phase / 3.0).sin())
        .with("oximeterHeartRate", 71.0 + 7.0 * phase.sin());
    if tick % 10 == 0 {
        sample
            .with("sdnn", 48.0 + 5.0 * (phase / 7.0).sin())
            .with("rmssd", 35.0 + 4.0 * (phase / 7.0).cos())
    } else {
        sample
    }
}
