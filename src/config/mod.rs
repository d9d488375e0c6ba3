// src/config/mod.rs
//! Service and dashboard configuration.
//!
//! Resolution order:
//! 1) `$UPLINK_CONFIG_PATH` (must exist when set)
//! 2) `config/uplink.toml`
//! 3) built-in defaults
//!
//! followed by `UPLINK_*` environment overrides.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::coalescer::CoalescerConfig;
use crate::event::Location;
use crate::store::{StoreLimits, COOLDOWN_MS, H_MAX};
use crate::transport::{PersistPolicy, TransportConfig};

pub const ENV_CONFIG_PATH: &str = "UPLINK_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/uplink.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub broker: BrokerConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub history_capacity: usize,
    pub cooldown_ms: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            history_capacity: H_MAX,
            cooldown_ms: COOLDOWN_MS,
        }
    }
}

impl StoreConfig {
    pub fn limits(&self) -> StoreLimits {
        StoreLimits {
            history_capacity: self.history_capacity.max(1),
            cooldown_ms: self.cooldown_ms.max(0),
        }
    }
}

fn default_client_id() -> String {
    format!("uplink-dashboard-{}", std::process::id())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
    pub use_tls: bool,
    pub keep_alive_secs: u64,
    /// Fixed delay before re-subscribing after a drop.
    pub reconnect_ms: u64,
    /// Frames are base64 images; the MQTT default packet limit is far too small.
    pub max_packet_bytes: usize,
    pub channel_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "broker.emqx.io".to_string(),
            port: 8883,
            topic: "humanrecog/video/jonathan_feed".to_string(),
            client_id: default_client_id(),
            use_tls: true,
            keep_alive_secs: 30,
            reconnect_ms: 1_000,
            max_packet_bytes: 10 * 1024 * 1024,
            channel_capacity: 64,
        }
    }
}

impl BrokerConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_ms)
    }
}

/// Which live transport the dashboard subscribes with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Mqtt,
    Polling,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistConfig {
    pub enabled: bool,
    pub strip_payload: bool,
    pub detections_only: bool,
    pub admitted_only: bool,
    pub timeout_ms: u64,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strip_payload: true,
            detections_only: true,
            admitted_only: true,
            timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub transport: TransportKind,
    /// Sensor-side history server, tried first on bootstrap.
    pub local_read_url: Option<String>,
    /// Networked read endpoint, bootstrap fallback and polling target.
    pub remote_read_url: String,
    /// Write path used for best-effort persistence.
    pub ingest_url: String,
    pub poll_interval_ms: u64,
    pub drain_interval_ms: u64,
    pub position_interval_ms: i64,
    pub throughput_window_ms: i64,
    pub fallback_location: Location,
    pub persist: PersistConfig,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Mqtt,
            local_read_url: Some("http://localhost:5000/detections".to_string()),
            remote_read_url: "http://127.0.0.1:8000/api/upload-frame".to_string(),
            ingest_url: "http://127.0.0.1:8000/api/detections".to_string(),
            poll_interval_ms: 1_000,
            drain_interval_ms: 16,
            position_interval_ms: 500,
            throughput_window_ms: 1_000,
            fallback_location: Location::new(12.9716, 77.5946),
            persist: PersistConfig::default(),
        }
    }
}

impl DashboardConfig {
    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn coalescer_config(&self, store: &StoreConfig) -> CoalescerConfig {
        CoalescerConfig {
            position_interval_ms: self.position_interval_ms.max(0),
            throughput_window_ms: self.throughput_window_ms.max(1),
            history: store.limits(),
        }
    }

    pub fn transport_config(&self, broker: &BrokerConfig) -> TransportConfig {
        TransportConfig {
            reconnect_delay: broker.reconnect_delay(),
            fallback_location: self.fallback_location,
        }
    }

    pub fn persist_policy(&self) -> PersistPolicy {
        PersistPolicy {
            strip_payload: self.persist.strip_payload,
            detections_only: self.persist.detections_only,
            admitted_only: self.persist.admitted_only,
        }
    }

    /// Bootstrap read URLs in priority order.
    pub fn read_urls(&self) -> Vec<String> {
        self.local_read_url
            .iter()
            .filter(|u| !u.is_empty())
            .cloned()
            .chain(std::iter::once(self.remote_read_url.clone()))
            .collect()
    }
}

impl AppConfig {
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).context("parsing uplink config TOML")
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::parse(&content)
    }

    /// Apply `UPLINK_*` environment overrides on top of file values.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("UPLINK_MQTT_HOST") {
            self.broker.host = v;
        }
        if let Ok(v) = std::env::var("UPLINK_MQTT_PORT") {
            self.broker.port = v
                .parse()
                .with_context(|| format!("UPLINK_MQTT_PORT must be a valid u16, got '{v}'"))?;
        }
        if let Ok(v) = std::env::var("UPLINK_MQTT_TOPIC") {
            self.broker.topic = v;
        }
        if let Ok(v) = std::env::var("UPLINK_READ_URL") {
            self.dashboard.remote_read_url = v;
        }
        if let Ok(v) = std::env::var("UPLINK_INGEST_URL") {
            self.dashboard.ingest_url = v;
        }
        Ok(())
    }
}

/// Load config using env var + fallbacks, then env overrides.
pub fn load_default() -> Result<AppConfig> {
    let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if !pb.exists() {
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        AppConfig::load_from(&pb)?
    } else {
        let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_p.exists() {
            AppConfig::load_from(&default_p)?
        } else {
            AppConfig::default()
        }
    };
    cfg.apply_env_overrides()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = AppConfig::parse(
            r#"
            [store]
            cooldown_ms = 5000

            [dashboard]
            transport = "polling"
            fallback_location = { lat = 1.5, lng = -2.5 }
            "#,
        )
        .unwrap();
        assert_eq!(cfg.store.cooldown_ms, 5_000);
        assert_eq!(cfg.store.history_capacity, H_MAX);
        assert_eq!(cfg.dashboard.transport, TransportKind::Polling);
        assert_eq!(cfg.dashboard.fallback_location, Location::new(1.5, -2.5));
        assert_eq!(cfg.dashboard.position_interval_ms, 500);
        assert_eq!(cfg.broker.reconnect_ms, 1_000);
        assert!(cfg.dashboard.persist.strip_payload);
        assert_eq!(cfg.dashboard.coalescer_config(&cfg.store).history.cooldown_ms, 5_000);
    }

    #[test]
    fn local_read_url_is_tried_first() {
        let d = DashboardConfig::default();
        let urls = d.read_urls();
        assert_eq!(urls.len(), 2);
        assert!(urls[0].ends_with("/detections"));

        let d = DashboardConfig {
            local_read_url: None,
            ..Default::default()
        };
        assert_eq!(d.read_urls(), vec![d.remote_read_url.clone()]);
    }

    #[test]
    fn limits_are_sanitized() {
        let sc = StoreConfig {
            history_capacity: 0,
            cooldown_ms: -5,
        };
        assert_eq!(
            sc.limits(),
            StoreLimits {
                history_capacity: 1,
                cooldown_ms: 0
            }
        );
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        // Isolate CWD so a real config/ in the repo does not interfere
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();

        env::remove_var(ENV_CONFIG_PATH);
        env::remove_var("UPLINK_MQTT_PORT");

        // No files → built-in defaults
        let cfg = load_default().unwrap();
        assert_eq!(cfg.broker.port, 8883);

        // Env path wins
        let p = tmp.path().join("custom.toml");
        fs::write(&p, "[broker]\nport = 1883\nuse_tls = false\n").unwrap();
        env::set_var(ENV_CONFIG_PATH, p.display().to_string());
        let cfg = load_default().unwrap();
        assert_eq!(cfg.broker.port, 1883);
        assert!(!cfg.broker.use_tls);

        // Env override beats file
        env::set_var("UPLINK_MQTT_PORT", "8884");
        assert_eq!(load_default().unwrap().broker.port, 8884);
        env::set_var("UPLINK_MQTT_PORT", "not-a-port");
        assert!(load_default().is_err());
        env::remove_var("UPLINK_MQTT_PORT");

        // Missing env path is an error
        env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml"));
        assert!(load_default().is_err());
        env::remove_var(ENV_CONFIG_PATH);

        env::set_current_dir(&old).unwrap();
    }
}
