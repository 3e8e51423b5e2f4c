//! Synthetic sensor values for the publisher.

use iiot_types::Reading;
use rand::Rng;
use std::ops::RangeInclusive;

/// Produces one `(temperature, humidity)` pair per call.
pub trait ReadingSource: Send + Sync {
    fn sample(&self) -> (f64, f64);
}

/// Uniformly distributed values rounded to two decimals
#[derive(Debug, Clone)]
pub struct UniformReadings {
    pub temperature: RangeInclusive<f64>,
    pub humidity: RangeInclusive<f64>,
}

impl Default for UniformReadings {
    fn default() -> Self {
        Self {
            temperature: 20.0..=30.0,
            humidity: 30.0..=70.0,
        }
    }
}

impl ReadingSource for UniformReadings {
    fn sample(&self) -> (f64, f64) {
        let mut rng = rand::thread_rng();
        let temperature = round2(rng.gen_range(self.temperature.clone()));
        let humidity = round2(rng.gen_range(self.humidity.clone()));
        (temperature, humidity)
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Current UTC time as ISO-8601 without an offset, e.g. `2024-01-01T00:00:00.123456`
pub fn utc_timestamp() -> String {
    chrono::Utc::now()
        .naive_utc()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

/// Stamps a fresh sample from `source` for `sensor_id`.
pub fn next_reading(source: &dyn ReadingSource, sensor_id: &str) -> Reading {
    let (temperature, humidity) = source.sample();
    Reading {
        timestamp: utc_timestamp(),
        sensor_id: sensor_id.to_string(),
        temperature,
        humidity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_samples_stay_in_bounds() {
        let source = UniformReadings::default();
        for _ in 0..500 {
            let (t, h) = source.sample();
            assert!((20.0..=30.0).contains(&t), "temperature {}", t);
            assert!((30.0..=70.0).contains(&h), "humidity {}", h);
            assert_eq!(round2(t), t);
        }
    }

    #[test]
    fn test_next_reading_stamps_sensor_and_time() {
        let reading = next_reading(&UniformReadings::default(), "sensor-042");
        assert_eq!(reading.sensor_id, "sensor-042");
        assert!(chrono::NaiveDateTime::parse_from_str(&reading.timestamp, "%Y-%m-%dT%H:%M:%S%.f").is_ok());
    }
}
