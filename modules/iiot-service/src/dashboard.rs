//! Dashboard HTML page handler.
//!
//! Serves a self-contained HTML page charting the most recent readings and
//! listing the raw rows behind them.

use crate::config::Config;
use crate::db::TelemetryLog;
use crate::error::{PipelineError, PipelineResult};
use crate::events::{EventLog, Severity};
use crate::routes::{self, AppState};
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use iiot_types::{WindowQuery, WindowSeries};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WindowQuery>,
) -> impl IntoResponse {
    let rows = routes::window_rows(query.rows);
    let reader = state.window.clone();
    let window = tokio::task::spawn_blocking(move || reader.read_window(rows))
        .await
        .ok()
        .and_then(Result::ok);
    let uptime = state.start_time.elapsed().as_secs();
    let html = render(window.as_ref(), rows, uptime);
    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], html)
}

fn render(window: Option<&WindowSeries>, rows: usize, uptime: u64) -> String {
    let Some(window) = window else {
        return page(
            rows,
            uptime,
            "<p>Telemetry store unavailable.</p>".to_string(),
        );
    };

    let latest_html = match window.rows.first() {
        Some(r) => format!(
            r#"<div class="stats">
                <div class="stat"><span class="val">{:.2}</span><span class="lbl">Temperature (&deg;C)</span></div>
                <div class="stat"><span class="val">{:.2}</span><span class="lbl">Humidity (%)</span></div>
                <div class="stat"><span class="val">{}</span><span class="lbl">Sensor</span></div>
                <div class="stat"><span class="val">{}</span><span class="lbl">Rows shown</span></div>
            </div>"#,
            r.temperature,
            r.humidity,
            escape(&r.sensor_id),
            window.len()
        ),
        None => "<p>No telemetry yet. Keep publisher &amp; subscriber running for live data.</p>".to_string(),
    };

    let mut raw_rows = String::new();
    for r in &window.rows {
        raw_rows.push_str(&format!(
            "<tr><td>{}</td><td class=\"mono\">{}</td><td>{}</td><td>{:.2}</td><td>{:.2}</td></tr>\n",
            r.sequence_id,
            escape(&r.timestamp),
            escape(&r.sensor_id),
            r.temperature,
            r.humidity
        ));
    }
    if raw_rows.is_empty() {
        raw_rows = "<tr><td colspan=\"5\">No rows.</td></tr>".to_string();
    }

    let body = format!(
        r#"{latest_html}

  <div class="section">
    <h2>Temperature (&deg;C)</h2>
    {temperature_chart}
  </div>

  <div class="section">
    <h2>Humidity (%)</h2>
    {humidity_chart}
  </div>

  <div class="section">
    <h2>Raw rows</h2>
    <table>
      <thead><tr><th>Seq</th><th>Timestamp</th><th>Sensor</th><th>Temperature</th><th>Humidity</th></tr></thead>
      <tbody>{raw_rows}</tbody>
    </table>
  </div>"#,
        latest_html = latest_html,
        temperature_chart = sparkline(&window.temperatures, "#f78166"),
        humidity_chart = sparkline(&window.humidities, "#58a6ff"),
        raw_rows = raw_rows,
    );
    page(rows, uptime, body)
}

fn page(rows: usize, uptime: u64, body: String) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>IIoT Dashboard</title>
<style>
  * {{ margin: 0; padding: 0; box-sizing: border-box; }}
  body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; background: #0f1117; color: #e0e0e0; padding: 20px; }}
  h1 {{ color: #58a6ff; margin-bottom: 8px; }}
  .meta {{ color: #8b949e; font-size: 0.85em; margin-bottom: 20px; }}
  .stats {{ display: flex; gap: 16px; margin-bottom: 24px; flex-wrap: wrap; }}
  .stat {{ background: #161b22; border: 1px solid #30363d; border-radius: 8px; padding: 16px 24px; text-align: center; min-width: 120px; }}
  .stat .val {{ display: block; font-size: 2em; font-weight: bold; color: #58a6ff; }}
  .stat .lbl {{ display: block; font-size: 0.85em; color: #8b949e; margin-top: 4px; }}
  table {{ width: 100%; border-collapse: collapse; margin-bottom: 24px; }}
  th {{ background: #161b22; color: #8b949e; text-align: left; padding: 8px 12px; font-size: 0.85em; text-transform: uppercase; border-bottom: 1px solid #30363d; }}
  td {{ padding: 8px 12px; border-bottom: 1px solid #21262d; font-size: 0.9em; }}
  tr:hover {{ background: #161b22; }}
  svg {{ background: #161b22; border: 1px solid #30363d; border-radius: 8px; width: 100%; height: 160px; }}
  .mono {{ font-family: 'SF Mono', 'Consolas', monospace; font-size: 0.85em; }}
  h2 {{ color: #c9d1d9; margin-bottom: 12px; font-size: 1.1em; }}
  .section {{ margin-bottom: 28px; }}
</style>
</head>
<body>
  <h1>IIoT Machine Monitoring System</h1>
  <p class="meta">Live telemetry from MQTT via SQLite &middot; Rows: {rows} &middot; Uptime: {uptime_str}</p>

  {body}

  <script>
    // Auto-refresh every 5 seconds
    setTimeout(() => location.reload(), 5000);
  </script>
</body>
</html>"#,
        rows = rows,
        uptime_str = format_uptime(uptime),
        body = body,
    )
}

/// Inline SVG polyline of `values`, scaled to fit a 1000x160 viewBox.
fn sparkline(values: &[f64], color: &str) -> String {
    const WIDTH: f64 = 1000.0;
    const HEIGHT: f64 = 160.0;
    if values.is_empty() {
        return format!(r#"<svg viewBox="0 0 {} {}"></svg>"#, WIDTH, HEIGHT);
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = if max > min { max - min } else { 1.0 };
    let step = if values.len() > 1 {
        WIDTH / (values.len() - 1) as f64
    } else {
        0.0
    };
    let points: Vec<String> = values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let x = i as f64 * step;
            let y = HEIGHT - 10.0 - (v - min) / span * (HEIGHT - 20.0);
            format!("{:.1},{:.1}", x, y)
        })
        .collect();
    format!(
        r#"<svg viewBox="0 0 {} {}" preserveAspectRatio="none"><polyline fill="none" stroke="{}" stroke-width="2" points="{}"/></svg>"#,
        WIDTH,
        HEIGHT,
        color,
        points.join(" ")
    )
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn format_uptime(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Entry point for `--mode dashboard`.
pub async fn run_dashboard(config: &Config, events: EventLog, cancel: CancellationToken) -> PipelineResult<()> {
    let events = events.for_component("dashboard");
    let log = TelemetryLog::new(&config.db_path);
    let init_log = log.clone();
    tokio::task::spawn_blocking(move || init_log.initialize())
        .await
        .map_err(|e| PipelineError::StoreUnavailable(e.to_string()))??;

    let state = Arc::new(AppState::new(log));
    let cors = tower_http::cors::CorsLayer::permissive();
    let app = axum::Router::new()
        .route("/", axum::routing::get(dashboard))
        .route("/rpc/window", axum::routing::get(routes::window))
        .route("/rpc/status", axum::routing::get(routes::status))
        .with_state(state)
        .layer(cors);

    let addr = format!("127.0.0.1:{}", config.dashboard_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| PipelineError::DashboardUnavailable(format!("bind {}: {}", addr, e)))?;
    events.info("Dashboard listening", &[("url", format!("http://{}", addr))]);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
    {
        let err = PipelineError::DashboardUnavailable(e.to_string());
        events.failure(Severity::Error, "Dashboard server stopped", &err, &[]);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use iiot_types::TelemetryRecord;

    #[test]
    fn test_render_escapes_and_lists_rows() {
        let window = WindowSeries {
            timestamps: vec!["2024-01-01T00:00:00".to_string()],
            temperatures: vec![24.5],
            humidities: vec![55.0],
            rows: vec![TelemetryRecord {
                sequence_id: 1,
                timestamp: "2024-01-01T00:00:00".to_string(),
                sensor_id: "<script>".to_string(),
                temperature: 24.5,
                humidity: 55.0,
            }],
        };
        let html = render(Some(&window), 200, 5);
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<td><script></td>"));
        assert!(html.contains("24.50"));
        assert!(html.contains("<polyline"));
    }

    #[test]
    fn test_render_without_store() {
        let html = render(None, 200, 0);
        assert!(html.contains("Telemetry store unavailable"));
    }

    #[test]
    fn test_sparkline_handles_flat_series() {
        let svg = sparkline(&[1.0, 1.0, 1.0], "#fff");
        assert!(svg.contains("0.0,150.0"));
        assert!(!svg.contains("NaN"));
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(5), "5s");
        assert_eq!(format_uptime(65), "1m 5s");
        assert_eq!(format_uptime(3725), "1h 2m 5s");
    }

    #[tokio::test]
    async fn test_run_dashboard_fails_when_store_cannot_initialize() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.db_path = dir.path().join("missing").join("telemetry.db").to_string_lossy().into_owned();
        let events = EventLog::new("main", Arc::new(crate::events::MemorySink::new()));

        let err = run_dashboard(&config, events, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "StoreUnavailable");
    }

    #[tokio::test]
    async fn test_run_dashboard_bind_failure_is_its_own_kind() {
        let dir = tempfile::tempdir().unwrap();
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = Config::default();
        config.db_path = dir.path().join("telemetry.db").to_string_lossy().into_owned();
        config.dashboard_port = taken.local_addr().unwrap().port();
        let events = EventLog::new("main", Arc::new(crate::events::MemorySink::new()));

        let err = run_dashboard(&config, events, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "DashboardUnavailable");
    }
}
