use crate::{Result, error::Error};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of an event travelling on the event bus.
///
/// The set is closed: listeners are registered per category and entity id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Input,
    Output,
    Cover,
    ModbusDevice,
    Sensor,
    Host,
}

impl EventCategory {
    /// Every category, in declaration order.
    pub const ALL: [EventCategory; 6] = [
        EventCategory::Input,
        EventCategory::Output,
        EventCategory::Cover,
        EventCategory::ModbusDevice,
        EventCategory::Sensor,
        EventCategory::Host,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Input => "input",
            EventCategory::Output => "output",
            EventCategory::Cover => "cover",
            EventCategory::ModbusDevice => "modbus_device",
            EventCategory::Sensor => "sensor",
            EventCategory::Host => "host",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        EventCategory::ALL
            .into_iter()
            .find(|category| category.as_str() == s)
            .ok_or_else(|| Error::UnknownCategory(s.to_string()))
    }
}

/// Classification produced by an input.
///
/// Gesture inputs emit `Single`, `Double` and `Long`; binary sensors emit
/// `Pressed` and `Released`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClickType {
    Single,
    Double,
    Long,
    Pressed,
    Released,
}

impl ClickType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ClickType::Single => "single",
            ClickType::Double => "double",
            ClickType::Long => "long",
            ClickType::Pressed => "pressed",
            ClickType::Released => "released",
        }
    }

    /// True for the classifications produced by the gesture state machine.
    #[must_use]
    pub fn is_gesture(&self) -> bool {
        matches!(self, ClickType::Single | ClickType::Double | ClickType::Long)
    }
}

impl fmt::Display for ClickType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ClickType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "single" => Ok(ClickType::Single),
            "double" => Ok(ClickType::Double),
            "long" => Ok(ClickType::Long),
            "pressed" => Ok(ClickType::Pressed),
            "released" => Ok(ClickType::Released),
            other => Err(Error::UnknownClickType(other.to_string())),
        }
    }
}

/// Kind of a physical input, used in outbound topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputKind {
    /// Momentary button classified into gestures.
    #[serde(rename = "input", alias = "event")]
    Event,
    /// Two-state contact reported as pressed/released.
    #[serde(rename = "inputsensor", alias = "binary_sensor")]
    BinarySensor,
}

impl InputKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            InputKind::Event => "input",
            InputKind::BinarySensor => "inputsensor",
        }
    }
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InputKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "input" => Ok(InputKind::Event),
            "inputsensor" => Ok(InputKind::BinarySensor),
            other => Err(Error::UnknownInputKind(other.to_string())),
        }
    }
}

/// State published by an input after every classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputState {
    pub name: String,
    pub pin: String,
    pub state: ClickType,
    #[serde(rename = "type")]
    pub kind: InputKind,
    pub timestamp: DateTime<Utc>,
    /// Seconds the button was held, only for long presses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

/// Binary output level as reported to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    #[must_use]
    pub fn from_active(active: bool) -> Self {
        if active { Switch::On } else { Switch::Off }
    }

    #[must_use]
    pub fn is_on(&self) -> bool {
        matches!(self, Switch::On)
    }
}

impl fmt::Display for Switch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Switch::On => "ON",
            Switch::Off => "OFF",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputState {
    pub id: String,
    pub name: String,
    pub state: Switch,
    #[serde(rename = "type")]
    pub kind: String,
    pub pin: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CoverPosition {
    Open,
    Opening,
    Closed,
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CoverOperation {
    Opening,
    Closing,
    Idle,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverState {
    pub id: String,
    pub name: String,
    pub state: CoverPosition,
    /// Position in percent, 0 is fully closed.
    pub position: u8,
    pub current_operation: CoverOperation,
    /// Tilt in percent, only meaningful for venetian covers.
    #[serde(default)]
    pub tilt: u8,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Sensor reading, numeric or textual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SensorValue {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorState {
    pub id: String,
    pub name: String,
    pub state: Option<SensorValue>,
    pub unit: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostState {
    pub id: String,
    pub name: String,
    pub state: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Category-specific event payload.
///
/// The variant determines the event category, so an event can never carry a
/// payload that disagrees with its category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "event_state", rename_all = "snake_case")]
pub enum EventPayload {
    Input(InputState),
    Output(OutputState),
    Cover(CoverState),
    ModbusDevice(SensorState),
    Sensor(SensorState),
    Host(HostState),
}

impl EventPayload {
    #[must_use]
    pub fn category(&self) -> EventCategory {
        match self {
            EventPayload::Input(_) => EventCategory::Input,
            EventPayload::Output(_) => EventCategory::Output,
            EventPayload::Cover(_) => EventCategory::Cover,
            EventPayload::ModbusDevice(_) => EventCategory::ModbusDevice,
            EventPayload::Sensor(_) => EventCategory::Sensor,
            EventPayload::Host(_) => EventCategory::Host,
        }
    }
}

/// Immutable event addressed to the listeners of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    entity_id: String,
    #[serde(flatten)]
    payload: EventPayload,
}

impl Event {
    pub fn new(entity_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            entity_id: entity_id.into(),
            payload,
        }
    }

    #[must_use]
    pub fn category(&self) -> EventCategory {
        self.payload.category()
    }

    #[must_use]
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    #[must_use]
    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }
}

impl From<InputState> for Event {
    /// Inputs are addressed by their pin.
    fn from(state: InputState) -> Self {
        Event::new(state.pin.clone(), EventPayload::Input(state))
    }
}

impl From<OutputState> for Event {
    fn from(state: OutputState) -> Self {
        Event::new(state.id.clone(), EventPayload::Output(state))
    }
}
