//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use uuid::Uuid;

use crate::domain::types::{CarIdentification, CarStepId};

#[derive(Debug, Clone, Deserialize)]
pub struct CarConfig {
    pub id: String,
    #[serde(default = "default_car_name")]
    pub name: String,
    /// Beacon namespace UUID the step beacons broadcast under.
    #[serde(default)]
    pub beacon_uuid: Option<String>,
    pub steps: Vec<CarStepId>,
}

fn default_car_name() -> String {
    "Car".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopicsConfig {
    /// Extend/shrink commands to the step engine controller.
    #[serde(default = "default_engine_command_topic")]
    pub engine_command: String,
    /// Step motion telemetry from the engine controller.
    #[serde(default = "default_engine_status_topic")]
    pub engine_status: String,
    /// Per-region ranging frames from the BLE scanner sidecar.
    #[serde(default = "default_ranging_topic")]
    pub ranging: String,
    /// Scanner authorization and fault reports.
    #[serde(default = "default_scanner_state_topic")]
    pub scanner_state: String,
    /// Tap reports from the short-range reader terminal.
    #[serde(default = "default_reader_topic")]
    pub reader: String,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            engine_command: default_engine_command_topic(),
            engine_status: default_engine_status_topic(),
            ranging: default_ranging_topic(),
            scanner_state: default_scanner_state_topic(),
            reader: default_reader_topic(),
        }
    }
}

fn default_engine_command_topic() -> String {
    "engine_control".to_string()
}

fn default_engine_status_topic() -> String {
    "engine_status".to_string()
}

fn default_ranging_topic() -> String {
    "scanner/ranging".to_string()
}

fn default_scanner_state_topic() -> String {
    "scanner/state".to_string()
}

fn default_reader_topic() -> String {
    "reader/taps".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RangingConfig {
    /// Closest-beacon distance required before a step may be selected.
    #[serde(default = "default_promotion_max_meters")]
    pub promotion_max_meters: f64,
    /// Consecutive close-bucket samples required before selection (exclusive).
    #[serde(default = "default_promotion_stable_cycles")]
    pub promotion_stable_cycles: u32,
    /// Consecutive far samples required before deselection (exclusive).
    #[serde(default = "default_demotion_stable_cycles")]
    pub demotion_stable_cycles: u32,
    /// Consecutive empty cycles before localization is declared lost.
    #[serde(default = "default_empty_cycle_limit")]
    pub empty_cycle_limit: u32,
}

impl Default for RangingConfig {
    fn default() -> Self {
        Self {
            promotion_max_meters: default_promotion_max_meters(),
            promotion_stable_cycles: default_promotion_stable_cycles(),
            demotion_stable_cycles: default_demotion_stable_cycles(),
            empty_cycle_limit: default_empty_cycle_limit(),
        }
    }
}

fn default_promotion_max_meters() -> f64 {
    1.0
}

fn default_promotion_stable_cycles() -> u32 {
    3
}

fn default_demotion_stable_cycles() -> u32 {
    6
}

fn default_empty_cycle_limit() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReaderConfig {
    #[serde(default = "default_reader_enabled")]
    pub enabled: bool,
    /// How long a started read waits for a tap before failing.
    #[serde(default = "default_reader_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self { enabled: default_reader_enabled(), timeout_ms: default_reader_timeout_ms() }
    }
}

fn default_reader_enabled() -> bool {
    true
}

fn default_reader_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    pub car: CarConfig,
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub topics: TopicsConfig,
    #[serde(default)]
    pub ranging: RangingConfig,
    #[serde(default)]
    pub reader: ReaderConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    car_id: String,
    car_name: String,
    car_beacon_uuid: Option<Uuid>,
    car_steps: Vec<CarStepId>,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    engine_command_topic: String,
    engine_status_topic: String,
    ranging_topic: String,
    scanner_state_topic: String,
    reader_topic: String,
    promotion_max_meters: f64,
    promotion_stable_cycles: u32,
    demotion_stable_cycles: u32,
    empty_cycle_limit: u32,
    reader_enabled: bool,
    reader_timeout_ms: u64,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            car_id: "demo-car".to_string(),
            car_name: "Demo Car".to_string(),
            car_beacon_uuid: None,
            car_steps: vec![CarStepId::FrontLeft, CarStepId::RearLeft],
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_username: None,
            mqtt_password: None,
            engine_command_topic: default_engine_command_topic(),
            engine_status_topic: default_engine_status_topic(),
            ranging_topic: default_ranging_topic(),
            scanner_state_topic: default_scanner_state_topic(),
            reader_topic: default_reader_topic(),
            promotion_max_meters: default_promotion_max_meters(),
            promotion_stable_cycles: default_promotion_stable_cycles(),
            demotion_stable_cycles: default_demotion_stable_cycles(),
            empty_cycle_limit: default_empty_cycle_limit(),
            reader_enabled: default_reader_enabled(),
            reader_timeout_ms: default_reader_timeout_ms(),
            metrics_interval_secs: default_metrics_interval(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        // Check for --config argument
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        // Check CONFIG_FILE environment variable
        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        // Default to dev.toml
        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let car_beacon_uuid = toml_config
            .car
            .beacon_uuid
            .as_deref()
            .map(Uuid::parse_str)
            .transpose()
            .with_context(|| format!("Invalid beacon_uuid in {}", path.display()))?;

        Ok(Self {
            car_id: toml_config.car.id,
            car_name: toml_config.car.name,
            car_beacon_uuid,
            car_steps: toml_config.car.steps,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            engine_command_topic: toml_config.topics.engine_command,
            engine_status_topic: toml_config.topics.engine_status,
            ranging_topic: toml_config.topics.ranging,
            scanner_state_topic: toml_config.topics.scanner_state,
            reader_topic: toml_config.topics.reader,
            promotion_max_meters: toml_config.ranging.promotion_max_meters,
            promotion_stable_cycles: toml_config.ranging.promotion_stable_cycles,
            demotion_stable_cycles: toml_config.ranging.demotion_stable_cycles,
            empty_cycle_limit: toml_config.ranging.empty_cycle_limit,
            reader_enabled: toml_config.reader.enabled,
            reader_timeout_ms: toml_config.reader.timeout_ms,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        let config_path = Self::resolve_config_path(args);
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Build the immutable car identity from the loaded values.
    pub fn car_identification(&self) -> CarIdentification {
        CarIdentification {
            id: self.car_id.clone(),
            name: self.car_name.clone(),
            beacon_uuid: self.car_beacon_uuid,
            steps: self.car_steps.clone(),
        }
    }

    // Getters for all config fields
    pub fn car_id(&self) -> &str {
        &self.car_id
    }

    pub fn car_name(&self) -> &str {
        &self.car_name
    }

    pub fn car_beacon_uuid(&self) -> Option<Uuid> {
        self.car_beacon_uuid
    }

    pub fn car_steps(&self) -> &[CarStepId] {
        &self.car_steps
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn engine_command_topic(&self) -> &str {
        &self.engine_command_topic
    }

    pub fn engine_status_topic(&self) -> &str {
        &self.engine_status_topic
    }

    pub fn ranging_topic(&self) -> &str {
        &self.ranging_topic
    }

    pub fn scanner_state_topic(&self) -> &str {
        &self.scanner_state_topic
    }

    pub fn reader_topic(&self) -> &str {
        &self.reader_topic
    }

    pub fn promotion_max_meters(&self) -> f64 {
        self.promotion_max_meters
    }

    pub fn promotion_stable_cycles(&self) -> u32 {
        self.promotion_stable_cycles
    }

    pub fn demotion_stable_cycles(&self) -> u32 {
        self.demotion_stable_cycles
    }

    pub fn empty_cycle_limit(&self) -> u32 {
        self.empty_cycle_limit
    }

    pub fn reader_enabled(&self) -> bool {
        self.reader_enabled
    }

    pub fn reader_timeout_ms(&self) -> u64 {
        self.reader_timeout_ms
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set the beacon namespace
    #[cfg(test)]
    pub fn with_beacon_uuid(mut self, uuid: Uuid) -> Self {
        self.car_beacon_uuid = Some(uuid);
        self
    }

    /// Builder method for tests to toggle the short-range reader
    #[cfg(test)]
    pub fn with_reader_enabled(mut self, enabled: bool) -> Self {
        self.reader_enabled = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.mqtt_host(), "localhost");
        assert_eq!(config.mqtt_port(), 1883);
        assert_eq!(config.engine_command_topic(), "engine_control");
        assert_eq!(config.promotion_max_meters(), 1.0);
        assert_eq!(config.promotion_stable_cycles(), 3);
        assert_eq!(config.demotion_stable_cycles(), 6);
        assert_eq!(config.empty_cycle_limit(), 10);
        assert_eq!(config.car_steps(), &[CarStepId::FrontLeft, CarStepId::RearLeft]);
    }

    #[test]
    fn test_resolve_config_path_default() {
        let args: Vec<String> = vec!["step-companion".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/dev.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> = vec![
            "step-companion".to_string(),
            "--config".to_string(),
            "config/garage.toml".to_string(),
        ];
        assert_eq!(Config::resolve_config_path(&args), "config/garage.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["step-companion".to_string(), "--config=config/fleet.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/fleet.toml");
    }

    #[test]
    fn test_car_identification_from_config() {
        let uuid = Uuid::now_v7();
        let config = Config::default().with_beacon_uuid(uuid);
        let car = config.car_identification();
        assert_eq!(car.id, "demo-car");
        assert_eq!(car.beacon_uuid, Some(uuid));
        assert_eq!(car.steps.len(), 2);
    }
}
