use crate::db::TelemetryLog;
use crate::error::PipelineResult;
use iiot_types::WindowSeries;

/// Reads the most recent records for time-series presentation.
#[derive(Debug, Clone)]
pub struct WindowReader {
    log: TelemetryLog,
}

impl WindowReader {
    pub fn new(log: TelemetryLog) -> Self {
        Self { log }
    }

    /// Last `n` records as oldest-first parallel series.
    pub fn read_window(&self, n: usize) -> PipelineResult<WindowSeries> {
        let rows = self.log.latest(n)?;
        let mut series = WindowSeries {
            timestamps: Vec::with_capacity(rows.len()),
            temperatures: Vec::with_capacity(rows.len()),
            humidities: Vec::with_capacity(rows.len()),
            rows: Vec::new(),
        };
        for record in rows.iter().rev() {
            series.timestamps.push(record.timestamp.clone());
            series.temperatures.push(record.temperature);
            series.humidities.push(record.humidity);
        }
        series.rows = rows;
        Ok(series)
    }
}
