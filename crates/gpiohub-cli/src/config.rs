//! Gateway configuration: a TOML file with environment overrides.
//!
//! Every section has defaults, so a file with only `[[input]]` and
//! `[[output]]` tables is enough. `GPIOHUB_*` variables override the
//! file, and the result is validated before anything touches hardware.

use gpiohub_core::ClickType;
use gpiohub_core::InputKind;
use gpiohub_core::constants::{
    DEFAULT_TOPIC_PREFIX, EVENT_BUS_SHUTDOWN_GRACE_MS, PIN_SHUTDOWN_GRACE_MS,
    TRANSPORT_POLL_INTERVAL_MS,
};
use gpiohub_events::EventBusConfig;
use gpiohub_hardware::{Bias, PinManagerConfig};
use gpiohub_input::{Detection, GestureTimings, InputConfig};
use gpiohub_network::QueuePublisherConfig;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::num::NonZeroUsize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub logging: LoggingConfig,
    pub pins: PinsConfig,
    pub events: EventsConfig,
    pub delivery: DeliveryConfig,
    #[serde(rename = "input")]
    pub inputs: Vec<InputEntry>,
    #[serde(rename = "output")]
    pub outputs: Vec<OutputEntry>,
}

/// Identity of this gateway on the message bus.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Prefix of inbound command topics (`{device_id}/cmd/...`).
    pub device_id: String,
    /// Prefix of outbound state topics (`{topic_prefix}/{kind}/{id}`).
    pub topic_prefix: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PinsConfig {
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Connectivity check period.
    pub poll_interval_ms: u64,
    /// Bound on queued messages; unbounded when absent.
    pub queue_capacity: Option<usize>,
}

/// How an input samples its line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    #[default]
    Poll,
    Edge,
}

/// One `[[input]]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct InputEntry {
    pub pin: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_input_kind")]
    pub kind: InputKind,
    #[serde(default)]
    pub detection: DetectionMode,
    /// Polling interval, or debounce window for edge inputs.
    #[serde(default)]
    pub bounce_ms: Option<u64>,
    #[serde(default)]
    pub double_click_ms: Option<u64>,
    #[serde(default)]
    pub long_press_ms: Option<u64>,
    #[serde(default)]
    pub inverted: bool,
    #[serde(default)]
    pub initial_send: bool,
    #[serde(default)]
    pub bias: Bias,
    #[serde(default)]
    pub clear_message: bool,
    /// Actions run for each classification, in order.
    #[serde(default)]
    pub actions: HashMap<ClickType, Vec<ActionConfig>>,
}

fn default_input_kind() -> InputKind {
    InputKind::Event
}

impl InputEntry {
    pub fn detection(&self) -> Detection {
        match (self.detection, self.bounce_ms) {
            (DetectionMode::Poll, Some(ms)) => Detection::Poll {
                interval: Duration::from_millis(ms),
            },
            (DetectionMode::Edge, Some(ms)) => Detection::Edge {
                debounce: Duration::from_millis(ms),
            },
            (DetectionMode::Poll, None) => Detection::poll(),
            (DetectionMode::Edge, None) => Detection::edge(),
        }
    }

    pub fn timings(&self) -> GestureTimings {
        let defaults = self.detection().default_timings();
        GestureTimings {
            double_click: self
                .double_click_ms
                .map_or(defaults.double_click, Duration::from_millis),
            long_press: self
                .long_press_ms
                .map_or(defaults.long_press, Duration::from_millis),
        }
    }

    /// Settings handed to the input task.
    pub fn input_config(&self) -> InputConfig {
        let mut config = InputConfig::new(&self.pin, self.kind)
            .with_detection(self.detection())
            .with_timings(self.timings())
            .with_bias(self.bias)
            .inverted(self.inverted)
            .initial_send(self.initial_send)
            .clear_message(self.clear_message);
        if let Some(name) = &self.name {
            config = config.with_name(name);
        }
        config
    }

    pub fn actions_for(&self, click: ClickType) -> &[ActionConfig] {
        self.actions.get(&click).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Action triggered by a classification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionConfig {
    /// Publish a fixed message.
    Mqtt {
        topic: String,
        #[serde(rename = "action_mqtt_msg")]
        message: String,
    },
    /// Drive a local output, addressed by pin.
    Output {
        pin: String,
        #[serde(rename = "action_output")]
        command: OutputAction,
    },
    /// Command a relay of another gateway.
    OutputOverMqtt {
        device_id: String,
        pin: String,
        #[serde(rename = "action_output")]
        command: OutputAction,
    },
    /// Command a cover of another gateway.
    CoverOverMqtt {
        device_id: String,
        pin: String,
        #[serde(rename = "action_cover")]
        command: CoverAction,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputAction {
    Toggle,
    On,
    Off,
}

impl OutputAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Toggle => "toggle",
            Self::On => "on",
            Self::Off => "off",
        }
    }
}

impl fmt::Display for OutputAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputAction {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "toggle" => Ok(Self::Toggle),
            "on" => Ok(Self::On),
            "off" => Ok(Self::Off),
            other => Err(ConfigError::Validation(format!("unknown output command {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverAction {
    Toggle,
    Open,
    Close,
    Stop,
    ToggleOpen,
    ToggleClose,
    Tilt,
    TiltOpen,
    TiltClose,
}

impl CoverAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Toggle => "toggle",
            Self::Open => "open",
            Self::Close => "close",
            Self::Stop => "stop",
            Self::ToggleOpen => "toggle_open",
            Self::ToggleClose => "toggle_close",
            Self::Tilt => "tilt",
            Self::TiltOpen => "tilt_open",
            Self::TiltClose => "tilt_close",
        }
    }
}

/// One `[[output]]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputEntry {
    pub id: String,
    pub pin: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_output_kind")]
    pub kind: String,
}

fn default_output_kind() -> String {
    "switch".to_string()
}

impl OutputEntry {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

impl Config {
    /// Load `path` (defaults when missing), apply `GPIOHUB_*` overrides and
    /// validate.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the result fails validation.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    /// Parse a TOML document without validating it.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` for malformed TOML or unknown values.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("GPIOHUB_DEVICE_ID") {
            self.gateway.device_id = val;
        }
        if let Some(val) = var("GPIOHUB_TOPIC_PREFIX") {
            self.gateway.topic_prefix = val;
        }
        if let Some(val) = var("GPIOHUB_LOG") {
            self.logging.filter = val;
        }
        if let Some(ms) = var("GPIOHUB_POLL_INTERVAL_MS").and_then(|val| val.parse().ok()) {
            self.delivery.poll_interval_ms = ms;
        }
        if let Some(capacity) = var("GPIOHUB_QUEUE_CAPACITY").and_then(|val| val.parse().ok()) {
            self.delivery.queue_capacity = Some(capacity);
        }
    }

    /// Check cross-field rules.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` naming the first broken rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("gateway.device_id", &self.gateway.device_id),
            ("gateway.topic_prefix", &self.gateway.topic_prefix),
        ] {
            if value.is_empty() || value.contains(['+', '#']) {
                return Err(invalid(format!("{field} must be a non-empty topic without wildcards")));
            }
        }
        if self.delivery.poll_interval_ms == 0 {
            return Err(invalid("delivery.poll_interval_ms must be positive"));
        }
        if self.delivery.queue_capacity == Some(0) {
            return Err(invalid("delivery.queue_capacity must be positive"));
        }

        let mut pins = BTreeSet::new();
        for input in &self.inputs {
            if !pins.insert(input.pin.as_str()) {
                return Err(invalid(format!("pin {} is configured twice", input.pin)));
            }
            if input.detection == DetectionMode::Poll && input.bounce_ms == Some(0) {
                return Err(invalid(format!("input {}: bounce_ms must be positive when polling", input.pin)));
            }
            if input.double_click_ms == Some(0) || input.long_press_ms == Some(0) {
                return Err(invalid(format!("input {}: gesture timings must be positive", input.pin)));
            }
        }

        let mut ids = BTreeSet::new();
        for output in &self.outputs {
            if !pins.insert(output.pin.as_str()) {
                return Err(invalid(format!("pin {} is configured twice", output.pin)));
            }
            if !ids.insert(output.id.as_str()) {
                return Err(invalid(format!("output id {} is used twice", output.id)));
            }
        }

        for input in &self.inputs {
            for action in input.actions.values().flatten() {
                match action {
                    ActionConfig::Mqtt { topic, .. } if topic.is_empty() => {
                        return Err(invalid(format!("input {}: mqtt action without topic", input.pin)));
                    }
                    ActionConfig::Output { pin, .. }
                        if !self.outputs.iter().any(|output| &output.pin == pin) =>
                    {
                        return Err(invalid(format!("input {}: no output on pin {pin}", input.pin)));
                    }
                    ActionConfig::OutputOverMqtt { device_id, .. }
                    | ActionConfig::CoverOverMqtt { device_id, .. }
                        if device_id.is_empty() =>
                    {
                        return Err(invalid(format!("input {}: remote action without device_id", input.pin)));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Every pin named by an input or output.
    pub fn pins(&self) -> Vec<&str> {
        self.inputs
            .iter()
            .map(|input| input.pin.as_str())
            .chain(self.outputs.iter().map(|output| output.pin.as_str()))
            .collect()
    }

    pub fn pin_manager_config(&self) -> PinManagerConfig {
        PinManagerConfig {
            shutdown_grace: Duration::from_millis(self.pins.shutdown_grace_ms),
        }
    }

    pub fn event_bus_config(&self) -> EventBusConfig {
        EventBusConfig {
            shutdown_grace: Duration::from_millis(self.events.shutdown_grace_ms),
        }
    }

    pub fn publisher_config(&self) -> QueuePublisherConfig {
        QueuePublisherConfig {
            poll_interval: Duration::from_millis(self.delivery.poll_interval_ms),
        }
    }

    pub fn queue_capacity(&self) -> Option<NonZeroUsize> {
        self.delivery.queue_capacity.and_then(NonZeroUsize::new)
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation(message.into())
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            device_id: "gpiohub".to_string(),
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "gpiohubd=info,gpiohub=info,warn".to_string(),
        }
    }
}

impl Default for PinsConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: PIN_SHUTDOWN_GRACE_MS,
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: EVENT_BUS_SHUTDOWN_GRACE_MS,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: TRANSPORT_POLL_INTERVAL_MS,
            queue_capacity: None,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Validation(String),
}
