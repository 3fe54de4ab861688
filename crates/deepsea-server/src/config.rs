use deepsea_core::PressureModel;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Reconcile loops and periodic synchronization
    #[serde(default)]
    pub controller: ControllerConfig,
    /// Outbound event stream
    #[serde(default)]
    pub events: EventsConfig,
    /// Physical simulator
    #[serde(default)]
    pub simulation: SimulationConfig,
}

// Default derived via field defaults

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Controller validations
        let c = &self.controller;
        if c.device_sync_interval_ms == 0 || c.module_sync_interval_ms == 0 {
            return Err("controller sync intervals must be > 0".into());
        }
        if c.workers == 0 {
            return Err("controller.workers must be > 0".into());
        }
        if c.retry_base_delay_ms == 0 {
            return Err("controller.retry_base_delay_ms must be > 0".into());
        }
        if c.retry_base_delay_ms > c.retry_max_delay_ms {
            return Err(
                "controller.retry_base_delay_ms must be <= controller.retry_max_delay_ms".into(),
            );
        }
        if c.notification_buffer == 0 {
            return Err("controller.notification_buffer must be > 0".into());
        }
        // Events validation
        if self.events.subscriber_queue_capacity == 0 {
            return Err("events.subscriber_queue_capacity must be > 0".into());
        }
        if self.events.ping_interval_secs == 0 {
            return Err("events.ping_interval_secs must be > 0".into());
        }
        // Simulation validations
        let s = &self.simulation;
        if s.tick_interval_ms == 0 {
            return Err("simulation.tick_interval_ms must be > 0".into());
        }
        if s.wave_period_secs <= 0.0 || !s.wave_period_secs.is_finite() {
            return Err("simulation.wave_period_secs must be a positive number".into());
        }
        for (name, value) in [
            ("wave_amplitude", s.wave_amplitude),
            ("pump_effect", s.pump_effect),
            ("equilibrium_pumps", s.equilibrium_pumps),
        ] {
            if !value.is_finite() {
                return Err(format!("simulation.{name} must be finite"));
            }
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, String> {
        toml::to_string(self).map_err(|e| format!("config serialize error: {e}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_body_limit() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Full device sync pass interval
    #[serde(default = "default_device_sync_interval_ms")]
    pub device_sync_interval_ms: u64,
    /// Full module sync pass interval
    #[serde(default = "default_module_sync_interval_ms")]
    pub module_sync_interval_ms: u64,
    /// Concurrent reconcile workers per controller
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Change-notification channel capacity
    #[serde(default = "default_notification_buffer")]
    pub notification_buffer: usize,
}

fn default_device_sync_interval_ms() -> u64 {
    100
}
fn default_module_sync_interval_ms() -> u64 {
    5_000
}
fn default_workers() -> usize {
    2
}
fn default_retry_base_delay_ms() -> u64 {
    10
}
fn default_retry_max_delay_ms() -> u64 {
    30_000
}
fn default_notification_buffer() -> usize {
    1024
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            device_sync_interval_ms: default_device_sync_interval_ms(),
            module_sync_interval_ms: default_module_sync_interval_ms(),
            workers: default_workers(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            notification_buffer: default_notification_buffer(),
        }
    }
}

impl ControllerConfig {
    pub fn device_sync_interval(&self) -> Duration {
        Duration::from_millis(self.device_sync_interval_ms)
    }
    pub fn module_sync_interval(&self) -> Duration {
        Duration::from_millis(self.module_sync_interval_ms)
    }
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Bounded queue per subscriber; overflow evicts the subscriber
    #[serde(default = "default_subscriber_queue_capacity")]
    pub subscriber_queue_capacity: usize,
    /// Websocket keep-alive ping interval
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
}

fn default_subscriber_queue_capacity() -> usize {
    deepsea_core::events::DEFAULT_QUEUE_CAPACITY
}
fn default_ping_interval_secs() -> u64 {
    54
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            subscriber_queue_capacity: default_subscriber_queue_capacity(),
            ping_interval_secs: default_ping_interval_secs(),
        }
    }
}

impl EventsConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_wave_period_secs")]
    pub wave_period_secs: f64,
    #[serde(default = "default_wave_amplitude")]
    pub wave_amplitude: f64,
    /// Pressure change per tick per pump away from equilibrium
    #[serde(default = "default_pump_effect")]
    pub pump_effect: f64,
    #[serde(default = "default_equilibrium_pumps")]
    pub equilibrium_pumps: f64,
}

fn default_true() -> bool {
    true
}
fn default_tick_interval_ms() -> u64 {
    500
}
fn default_wave_period_secs() -> f64 {
    60.0
}
fn default_wave_amplitude() -> f64 {
    0.2
}
fn default_pump_effect() -> f64 {
    0.1
}
fn default_equilibrium_pumps() -> f64 {
    deepsea_core::pressure::EQUILIBRIUM_PUMPS
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            tick_interval_ms: default_tick_interval_ms(),
            wave_period_secs: default_wave_period_secs(),
            wave_amplitude: default_wave_amplitude(),
            pump_effect: default_pump_effect(),
            equilibrium_pumps: default_equilibrium_pumps(),
        }
    }
}

impl SimulationConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn pressure_model(&self) -> PressureModel {
        PressureModel {
            wave_period: Duration::from_secs_f64(self.wave_period_secs),
            wave_amplitude: self.wave_amplitude,
            pump_effect: self.pump_effect,
            equilibrium_pumps: self.equilibrium_pumps,
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Default configuration file looked up in the working directory.
    pub const DEFAULT_CONFIG_PATH: &str = "deepsea.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., DEEPSEA__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("DEEPSEA")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        // Validate
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.controller.device_sync_interval(), Duration::from_millis(100));
        assert_eq!(cfg.controller.module_sync_interval(), Duration::from_secs(5));
        assert_eq!(cfg.simulation.tick_interval(), Duration::from_millis(500));
        assert_eq!(cfg.events.ping_interval(), Duration::from_secs(54));
        assert_eq!(cfg.simulation.pressure_model(), PressureModel::default());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut cfg = AppConfig::default();
        cfg.controller.device_sync_interval_ms = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.controller.retry_base_delay_ms = 60_000;
        assert!(cfg.validate().unwrap_err().contains("retry_base_delay_ms"));

        let mut cfg = AppConfig::default();
        cfg.logging.level = "verbose".into();
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.simulation.wave_period_secs = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [server]
            port = 9000

            [simulation]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert!(!cfg.simulation.enabled);
        assert_eq!(cfg.simulation.tick_interval_ms, 500);
    }

    #[test]
    fn test_toml_round_trip() {
        let rendered = AppConfig::default().to_toml().unwrap();
        let parsed: AppConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.events.subscriber_queue_capacity, 256);
    }
}
