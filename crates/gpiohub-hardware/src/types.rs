//! Common types shared by the pin manager and its backends.
//!
//! This module defines line descriptions discovered on GPIO chips, the
//! settings used to request a line, and the edge events a requested line
//! produces.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Line description recorded during discovery.
///
/// Contains the stable name of a line and where it lives on the hardware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineInfo {
    /// Declared line name (e.g., "P8_30").
    pub name: String,

    /// Path of the owning chip device (e.g., "/dev/gpiochip1").
    pub chip: PathBuf,

    /// Bit offset of the line within its chip.
    pub offset: u32,

    /// Whether the line is wired active-low.
    pub active_low: bool,
}

impl LineInfo {
    /// Create a new LineInfo for an active-high line.
    pub fn new(name: impl Into<String>, chip: impl Into<PathBuf>, offset: u32) -> Self {
        Self {
            name: name.into(),
            chip: chip.into(),
            offset,
            active_low: false,
        }
    }

    /// Mark the line as active-low.
    pub fn with_active_low(mut self, active_low: bool) -> Self {
        self.active_low = active_low;
        self
    }
}

/// Configured direction of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
        }
    }
}

/// Pull-bias termination of an input line.
///
/// Configuration files use the pin-mux names: `gpio` and `gpio_input` leave
/// the line floating, `gpio_pu` pulls it up and `gpio_pd` pulls it down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bias {
    #[default]
    #[serde(rename = "gpio", alias = "gpio_input", alias = "disabled")]
    Disabled,

    #[serde(rename = "gpio_pu", alias = "pull_up")]
    PullUp,

    #[serde(rename = "gpio_pd", alias = "pull_down")]
    PullDown,
}

impl std::str::FromStr for Bias {
    type Err = crate::HardwareError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "gpio" | "gpio_input" | "disabled" => Ok(Self::Disabled),
            "gpio_pu" | "pull_up" => Ok(Self::PullUp),
            "gpio_pd" | "pull_down" => Ok(Self::PullDown),
            other => Err(crate::HardwareError::configuration(
                "-",
                format!("unknown bias mode {other}"),
            )),
        }
    }
}

/// Direction of a single transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    /// Line became active.
    Rising,

    /// Line became inactive.
    Falling,
}

impl Edge {
    /// Level of the line right after this edge.
    pub fn level(&self) -> bool {
        matches!(self, Self::Rising)
    }

    /// Edge that produces the given level.
    pub fn towards(level: bool) -> Self {
        if level { Self::Rising } else { Self::Falling }
    }

    /// The opposite edge.
    pub fn inverted(&self) -> Self {
        match self {
            Self::Rising => Self::Falling,
            Self::Falling => Self::Rising,
        }
    }
}

/// Which edges a subscriber wants to receive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Rising,
    Falling,
    #[default]
    Both,
}

impl EdgeKind {
    /// Check whether an edge passes this filter.
    pub fn accepts(&self, edge: Edge) -> bool {
        match self {
            Self::Rising => edge == Edge::Rising,
            Self::Falling => edge == Edge::Falling,
            Self::Both => true,
        }
    }
}

/// One transition read from a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeEvent {
    /// Transition direction.
    pub edge: Edge,

    /// Monotonic timestamp reported by the driver.
    pub timestamp: Duration,
}

impl EdgeEvent {
    /// Create a new edge event.
    pub fn new(edge: Edge, timestamp: Duration) -> Self {
        Self { edge, timestamp }
    }

    /// Line level right after the transition.
    pub fn level(&self) -> bool {
        self.edge.level()
    }
}

/// Settings used when requesting or reconfiguring a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSettings {
    /// Requested direction.
    pub direction: Direction,

    /// Pull bias, only meaningful for inputs.
    pub bias: Bias,

    /// Enable kernel edge detection on both edges.
    pub edge_detection: bool,

    /// Hardware debounce period, if the driver supports one.
    pub debounce: Option<Duration>,

    /// Physical level driven right after switching to output.
    pub output_value: bool,
}

impl LineSettings {
    /// Settings for a plain input.
    pub fn input(bias: Bias) -> Self {
        Self {
            direction: Direction::Input,
            bias,
            edge_detection: false,
            debounce: None,
            output_value: false,
        }
    }

    /// Settings for an output driven to the given physical level.
    pub fn output(value: bool) -> Self {
        Self {
            direction: Direction::Output,
            bias: Bias::Disabled,
            edge_detection: false,
            debounce: None,
            output_value: value,
        }
    }

    /// Enable edge detection with an optional debounce period.
    pub fn with_edges(mut self, debounce: Option<Duration>) -> Self {
        self.edge_detection = true;
        self.debounce = debounce;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_line_info_builder() {
        let info = LineInfo::new("P8_30", "/dev/gpiochip2", 25).with_active_low(true);

        assert_eq!(info.name, "P8_30");
        assert_eq!(info.chip, PathBuf::from("/dev/gpiochip2"));
        assert_eq!(info.offset, 25);
        assert!(info.active_low);
    }

    #[rstest]
    #[case("\"gpio\"", Bias::Disabled)]
    #[case("\"gpio_input\"", Bias::Disabled)]
    #[case("\"gpio_pu\"", Bias::PullUp)]
    #[case("\"gpio_pd\"", Bias::PullDown)]
    fn test_bias_config_names(#[case] json: &str, #[case] expected: Bias) {
        let bias: Bias = serde_json::from_str(json).unwrap();
        assert_eq!(bias, expected);
    }

    #[test]
    fn test_bias_from_str() {
        assert_eq!("gpio_pu".parse::<Bias>().unwrap(), Bias::PullUp);
        assert!("pullup".parse::<Bias>().is_err());
    }

    #[rstest]
    #[case(EdgeKind::Both, Edge::Rising, true)]
    #[case(EdgeKind::Both, Edge::Falling, true)]
    #[case(EdgeKind::Rising, Edge::Rising, true)]
    #[case(EdgeKind::Rising, Edge::Falling, false)]
    #[case(EdgeKind::Falling, Edge::Rising, false)]
    #[case(EdgeKind::Falling, Edge::Falling, true)]
    fn test_edge_kind_filter(#[case] kind: EdgeKind, #[case] edge: Edge, #[case] accepted: bool) {
        assert_eq!(kind.accepts(edge), accepted);
    }

    #[test]
    fn test_edge_level() {
        assert!(Edge::Rising.level());
        assert!(!Edge::Falling.level());
        assert_eq!(Edge::towards(true), Edge::Rising);
        assert_eq!(Edge::Rising.inverted(), Edge::Falling);
    }

    #[test]
    fn test_line_settings() {
        let input = LineSettings::input(Bias::PullUp).with_edges(Some(Duration::from_millis(5)));
        assert_eq!(input.direction, Direction::Input);
        assert!(input.edge_detection);

        let output = LineSettings::output(true);
        assert_eq!(output.direction, Direction::Output);
        assert_eq!(output.bias, Bias::Disabled);
        assert!(output.output_value);
    }
}
