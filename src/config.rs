/*
 *  config.rs
 *
 *  PanelBus - live values, no chatter
 *	(c) 2025-26 Stuart Hunter
 *
 *	Layered configuration: defaults, YAML, command line
 *
 *	This program is free software: you can redistribute it and/or modify
 *	it under the terms of the GNU General Public License as published by
 *	the Free Software Foundation, either version 3 of the License, or
 *	(at your option) any later version.
 *
 *	This program is distributed in the hope that it will be useful,
 *	but WITHOUT ANY WARRANTY; without even the implied warranty of
 *	MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *	GNU General Public License for more details.
 *
 *	See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *	Public License.
 *
 */
use clap::{ArgAction, Parser, ValueHint};
use dirs_next::home_dir;
use serde::{Deserialize, Serialize};
use std::{fs, path::{Path, PathBuf}};
use thiserror::Error;

use crate::topics::{DEFAULT_ENERGY_TOPIC, DEFAULT_NAMESPACE};

/// Error type for config loading/validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Effective configuration. Every section falls back to its defaults, so a
/// YAML file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub bus: BusConfig,
    pub broker: BrokerConfig,
    pub home_assistant: HomeAssistantConfig,
    pub weather: WeatherConfig,
    pub artwork: ArtworkConfig,
    pub poller: PollerConfig,
    pub link: LinkConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            bus: BusConfig::default(),
            broker: BrokerConfig::default(),
            home_assistant: HomeAssistantConfig::default(),
            weather: WeatherConfig::default(),
            artwork: ArtworkConfig::default(),
            poller: PollerConfig::default(),
            link: LinkConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub capacity: usize,
    pub system_timeout_ms: u64,
    pub drain_interval_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { capacity: 10, system_timeout_ms: 10, drain_interval_ms: 20 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Media player namespace in the topic names.
    pub namespace: String,
    pub energy_topic: String,
    pub keep_alive_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.218".to_string(),
            port: 1883,
            client_id: "panelbus".to_string(),
            username: None,
            password: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            energy_topic: DEFAULT_ENERGY_TOPIC.to_string(),
            keep_alive_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HomeAssistantConfig {
    pub base_url: String,
    pub token: String,
    pub timeout_ms: u64,
    pub retries: u8,
    pub retry_delay_ms: u64,
    /// Price per kWh.
    pub tariff: f64,
    pub daily_energy: String,
    pub monthly_energy: String,
    pub indoor_temp: String,
    pub indoor_humidity: String,
    pub switches: Vec<String>,
}

impl Default for HomeAssistantConfig {
    fn default() -> Self {
        Self {
            base_url: "http://192.168.1.218:8123".to_string(),
            token: String::new(),
            timeout_ms: 3000,
            retries: 2,
            retry_delay_ms: 200,
            tariff: 1.2,
            daily_energy: "sensor.daily_energy_consumption".to_string(),
            monthly_energy: "sensor.monthly_energy_consumption".to_string(),
            indoor_temp: "sensor.zhimi_cn_94444656_ma2_temperature_p_3_3".to_string(),
            indoor_humidity: "sensor.zhimi_cn_94444656_ma2_relative_humidity_p_3_1".to_string(),
            switches: vec![
                "switch.tasmota".to_string(),
                "switch.new_dc1_3".to_string(),
                "switch.new_dc1_4".to_string(),
                "switch.tasmota_2".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub base_url: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
    pub timeout_ms: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: "http://api.open-meteo.com".to_string(),
            latitude: 22.495,
            longitude: 113.2678,
            timezone: "Asia/Shanghai".to_string(),
            timeout_ms: 8000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtworkConfig {
    /// Base of the image conversion proxy.
    pub proxy_base: String,
    pub width: u16,
    pub height: u16,
    pub queue_capacity: usize,
    pub timeout_ms: u64,
    pub max_bytes: usize,
}

impl Default for ArtworkConfig {
    fn default() -> Self {
        Self {
            proxy_base: "http://192.168.1.218".to_string(),
            width: 100,
            height: 100,
            queue_capacity: 5,
            timeout_ms: 10_000,
            max_bytes: 2 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub energy_secs: u64,
    pub switch_secs: u64,
    pub weather_secs: u64,
    pub tick_ms: u64,
    pub offline_tick_ms: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self { energy_secs: 30, switch_secs: 30, weather_secs: 1800, tick_ms: 1000, offline_tick_ms: 5000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Host probed for reachability, the broker when unset.
    pub probe_host: Option<String>,
    pub probe_port: Option<u16>,
    pub probe_timeout_ms: u64,
    pub check_secs: u64,
    pub base_ms: u64,
    pub cap_ms: u64,
    pub max_retries: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            probe_host: None,
            probe_port: None,
            probe_timeout_ms: 3000,
            check_secs: 10,
            base_ms: 1000,
            cap_ms: 30_000,
            max_retries: 15,
        }
    }
}

/// CLI overrides. All fields are Options so we can layer them over YAML.
#[derive(Debug, Parser, Clone, Default)]
#[command(name = "panelbus", about = "PanelBus control panel bridge", version)]
pub struct Cli {
    /// Path to a YAML config file (overrides search)
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,
    /// debug logging, same as --log-level debug
    #[arg(short, long, action = ArgAction::SetTrue)]
    pub debug: bool,
    #[arg(long)]
    pub log_level: Option<String>,
    #[arg(long)]
    pub broker_host: Option<String>,
    #[arg(long)]
    pub broker_port: Option<u16>,
    #[arg(long)]
    pub namespace: Option<String>,
    #[arg(long, value_hint = ValueHint::Url)]
    pub ha_url: Option<String>,
    #[arg(long, env = "PANELBUS_HA_TOKEN", hide_env_values = true)]
    pub ha_token: Option<String>,
    #[arg(long, value_hint = ValueHint::Url)]
    pub proxy_base: Option<String>,
    /// dump fully merged config (after overrides) and exit
    #[arg(long, action = ArgAction::SetTrue)]
    pub dump_config: bool,
}

/// Public entry point: parse CLI, read YAML, merge, validate.
pub fn load() -> Result<(Config, Cli), ConfigError> {
    let cli = Cli::parse();
    let cfg = load_from(&cli)?;

    if cli.dump_config {
        // Pretty YAML of effective config
        println!("{}", serde_yaml::to_string(&cfg)?);
        std::process::exit(0);
    }
    Ok((cfg, cli))
}

/// Everything `load` does short of touching argv or exiting.
pub fn load_from(cli: &Cli) -> Result<Config, ConfigError> {
    // 1) YAML file (explicit path or search), defaults fill the gaps
    let mut cfg = match cli.config.as_ref() {
        Some(p) if p.exists() => read_yaml(p)?,
        Some(p) => {
            return Err(ConfigError::Validation(format!("Config file not found: {}", p.display())));
        }
        None => match find_config_file() {
            Some(p) => read_yaml(&p)?,
            None => Config::default(),
        },
    };

    // 2) CLI overrides (highest precedence)
    apply_cli_overrides(&mut cfg, cli);

    // 3) Validate
    validate(&cfg)?;
    Ok(cfg)
}

/// Try common locations in order (first hit wins).
fn find_config_file() -> Option<PathBuf> {
    if let Some(home) = home_dir() {
        let p = home.join(".config/panelbus/config.yaml");
        if p.exists() { return Some(p) }
        let p = home.join(".config/panelbus.yaml");
        if p.exists() { return Some(p) }
    }
    // project local
    for candidate in &["panelbus.yaml", "config.yaml", "config/panelbus.yaml"] {
        let p = PathBuf::from(candidate);
        if p.exists() { return Some(p) }
    }
    None
}

pub fn read_yaml(path: &Path) -> Result<Config, ConfigError> {
    let s = fs::read_to_string(path)?;
    if s.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = serde_yaml::from_str(&s)?;
    Ok(cfg)
}

fn apply_cli_overrides(cfg: &mut Config, cli: &Cli) {
    if let Some(level) = &cli.log_level   { cfg.log_level = level.clone(); }
    if cli.debug                          { cfg.log_level = "debug".to_string(); }
    if let Some(h) = &cli.broker_host     { cfg.broker.host = h.clone(); }
    if let Some(p) = cli.broker_port      { cfg.broker.port = p; }
    if let Some(n) = &cli.namespace       { cfg.broker.namespace = n.clone(); }
    if let Some(u) = &cli.ha_url          { cfg.home_assistant.base_url = u.clone(); }
    if let Some(t) = &cli.ha_token        { cfg.home_assistant.token = t.clone(); }
    if let Some(b) = &cli.proxy_base      { cfg.artwork.proxy_base = b.clone(); }
}

fn invalid(msg: &str) -> Result<(), ConfigError> {
    Err(ConfigError::Validation(msg.to_string()))
}

/// Ranges and required fields.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.bus.capacity == 0 {
        return invalid("bus capacity must be > 0");
    }
    if cfg.bus.system_timeout_ms == 0 || cfg.bus.drain_interval_ms == 0 {
        return invalid("bus timeouts must be > 0");
    }
    if cfg.broker.host.trim().is_empty() {
        return invalid("broker host is required");
    }
    if cfg.broker.namespace.trim().is_empty() || cfg.broker.client_id.trim().is_empty() {
        return invalid("broker namespace and client_id are required");
    }
    if cfg.home_assistant.base_url.trim().is_empty() {
        return invalid("home_assistant base_url is required");
    }
    if cfg.home_assistant.switches.len() > 4 {
        return invalid("at most 4 switches are supported");
    }
    if cfg.home_assistant.timeout_ms == 0 || cfg.weather.timeout_ms == 0 || cfg.artwork.timeout_ms == 0 {
        return invalid("HTTP timeouts must be > 0");
    }
    if cfg.artwork.queue_capacity == 0 || cfg.artwork.max_bytes == 0 {
        return invalid("artwork queue_capacity and max_bytes must be > 0");
    }
    if cfg.artwork.width == 0 || cfg.artwork.height == 0 {
        return invalid("artwork width/height must be > 0");
    }
    let p = &cfg.poller;
    if p.energy_secs == 0 || p.switch_secs == 0 || p.weather_secs == 0 || p.tick_ms == 0 || p.offline_tick_ms == 0 {
        return invalid("poller intervals must be > 0");
    }
    let l = &cfg.link;
    if l.base_ms == 0 || l.check_secs == 0 || l.probe_timeout_ms == 0 || l.max_retries == 0 {
        return invalid("link intervals and max_retries must be > 0");
    }
    if l.cap_ms < l.base_ms {
        return invalid("link cap_ms must be >= base_ms");
    }
    if matches!(&l.probe_host, Some(h) if h.trim().is_empty()) {
        return invalid("link probe_host may not be empty");
    }
    Ok(())
}
