use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: Option<String>,
    pub mqtt_pass: Option<String>,
    pub mqtt_topic: String,
    pub mqtt_keepalive_secs: u64,
    pub publish_interval_secs: f64,
    /// `host:port` the live address space binds to
    pub live_endpoint: String,
    pub live_poll_interval_secs: f64,
    pub dashboard_port: u16,
    pub reconnect_delay_secs: f64,
    pub shutdown_grace_secs: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "telemetry.db".to_string(),
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_user: None,
            mqtt_pass: None,
            mqtt_topic: "factory/line1/sensor/telemetry".to_string(),
            mqtt_keepalive_secs: 60,
            publish_interval_secs: 2.0,
            live_endpoint: "0.0.0.0:4840".to_string(),
            live_poll_interval_secs: 1.0,
            dashboard_port: 8501,
            reconnect_delay_secs: 1.0,
            shutdown_grace_secs: 5.0,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. Missing or unparsable
    /// values fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|s| !s.is_empty());

        Self {
            db_path: non_empty("IIOT_DB").unwrap_or(defaults.db_path),
            mqtt_host: non_empty("IIOT_MQTT_HOST").unwrap_or(defaults.mqtt_host),
            mqtt_port: parsed(&lookup, "IIOT_MQTT_PORT").unwrap_or(defaults.mqtt_port),
            mqtt_user: non_empty("IIOT_MQTT_USER"),
            mqtt_pass: lookup("IIOT_MQTT_PASS"),
            mqtt_topic: non_empty("IIOT_MQTT_TOPIC").unwrap_or(defaults.mqtt_topic),
            mqtt_keepalive_secs: parsed(&lookup, "IIOT_MQTT_KEEPALIVE").unwrap_or(defaults.mqtt_keepalive_secs),
            publish_interval_secs: positive(parsed(&lookup, "IIOT_PUBLISH_INTERVAL"))
                .unwrap_or(defaults.publish_interval_secs),
            live_endpoint: non_empty("IIOT_LIVE_ENDPOINT")
                .map(|s| strip_scheme(&s).to_string())
                .unwrap_or(defaults.live_endpoint),
            live_poll_interval_secs: positive(parsed(&lookup, "IIOT_LIVE_POLL_INTERVAL"))
                .unwrap_or(defaults.live_poll_interval_secs),
            dashboard_port: parsed(&lookup, "IIOT_DASHBOARD_PORT").unwrap_or(defaults.dashboard_port),
            reconnect_delay_secs: positive(parsed(&lookup, "IIOT_RECONNECT_DELAY"))
                .unwrap_or(defaults.reconnect_delay_secs),
            shutdown_grace_secs: positive(parsed(&lookup, "IIOT_SHUTDOWN_GRACE"))
                .unwrap_or(defaults.shutdown_grace_secs),
        }
    }

    pub fn mqtt_keepalive(&self) -> Duration {
        Duration::from_secs(self.mqtt_keepalive_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs_f64(self.reconnect_delay_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs_f64(self.shutdown_grace_secs)
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

/// `opc.tcp://0.0.0.0:4840` -> `0.0.0.0:4840`
fn strip_scheme(endpoint: &str) -> &str {
    let rest = match endpoint.split_once("://") {
        Some((_, rest)) => rest,
        None => endpoint,
    };
    rest.trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = Config::from_lookup(lookup(&[]));
        assert_eq!(config.db_path, "telemetry.db");
        assert_eq!(config.mqtt_port, 1883);
        assert_eq!(config.mqtt_topic, "factory/line1/sensor/telemetry");
        assert_eq!(config.publish_interval_secs, 2.0);
        assert_eq!(config.live_endpoint, "0.0.0.0:4840");
        assert!(config.mqtt_user.is_none());
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let config = Config::from_lookup(lookup(&[
            ("IIOT_DB", "/tmp/t.db"),
            ("IIOT_MQTT_PORT", "not-a-port"),
            ("IIOT_MQTT_USER", "plant"),
            ("IIOT_MQTT_PASS", "secret"),
            ("IIOT_PUBLISH_INTERVAL", "0.5"),
            ("IIOT_LIVE_POLL_INTERVAL", "-1"),
            ("IIOT_LIVE_ENDPOINT", "opc.tcp://127.0.0.1:4841"),
        ]));
        assert_eq!(config.db_path, "/tmp/t.db");
        assert_eq!(config.mqtt_port, 1883);
        assert_eq!(config.mqtt_user.as_deref(), Some("plant"));
        assert_eq!(config.mqtt_pass.as_deref(), Some("secret"));
        assert_eq!(config.publish_interval_secs, 0.5);
        assert_eq!(config.live_poll_interval_secs, 1.0);
        assert_eq!(config.live_endpoint, "127.0.0.1:4841");
    }
}
