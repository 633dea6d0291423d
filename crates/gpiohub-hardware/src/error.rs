//! Error types for pin operations.
//!
//! Configuration mistakes (unknown pin names, bias on an output) and
//! construction-order bugs (using a pin before configuring it) are reported
//! to the caller and never retried. Driver failures carry the backend's
//! message.

/// Result type alias for pin operations.
pub type Result<T> = std::result::Result<T, HardwareError>;

/// Errors that can occur while driving hardware lines.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    /// The pin name was not found during discovery.
    #[error("Configuration error: unknown pin {pin}")]
    UnknownPin { pin: String },

    /// Invalid combination of direction and bias, or another invalid setting.
    #[error("Configuration error on pin {pin}: {message}")]
    Configuration { pin: String, message: String },

    /// The pin was used before `configure` was called.
    #[error("Pin {pin} is not configured")]
    NotConfigured { pin: String },

    /// No GPIO chip could be found at startup.
    #[error("Hardware discovery failed: {message}")]
    DiscoveryFailed { message: String },

    /// The line driver reported a failure.
    #[error("Backend error on pin {pin}: {message}")]
    Backend { pin: String, message: String },

    /// The pin manager has been shut down.
    #[error("Pin manager is shut down")]
    Closed,

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HardwareError {
    /// Create a new unknown pin error.
    pub fn unknown_pin(pin: impl Into<String>) -> Self {
        Self::UnknownPin { pin: pin.into() }
    }

    /// Create a new configuration error.
    pub fn configuration(pin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            pin: pin.into(),
            message: message.into(),
        }
    }

    /// Create a new not configured error.
    pub fn not_configured(pin: impl Into<String>) -> Self {
        Self::NotConfigured { pin: pin.into() }
    }

    /// Create a new discovery failure.
    pub fn discovery_failed(message: impl Into<String>) -> Self {
        Self::DiscoveryFailed {
            message: message.into(),
        }
    }

    /// Create a new backend error.
    pub fn backend(pin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            pin: pin.into(),
            message: message.into(),
        }
    }

    /// True for errors caused by configuration rather than hardware state.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::UnknownPin { .. } | Self::Configuration { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_pin_error() {
        let error = HardwareError::unknown_pin("P9_99");
        assert!(error.is_configuration());
        assert_eq!(error.to_string(), "Configuration error: unknown pin P9_99");
    }

    #[test]
    fn test_configuration_error() {
        let error = HardwareError::configuration("P8_30", "bias is input-only");
        assert!(error.is_configuration());
        assert_eq!(
            error.to_string(),
            "Configuration error on pin P8_30: bias is input-only"
        );
    }

    #[test]
    fn test_not_configured_error() {
        let error = HardwareError::not_configured("P8_30");
        assert!(!error.is_configuration());
        assert_eq!(error.to_string(), "Pin P8_30 is not configured");
    }

    #[test]
    fn test_discovery_failed_error() {
        let error = HardwareError::discovery_failed("no gpiochip devices in /dev");
        assert!(matches!(error, HardwareError::DiscoveryFailed { .. }));
        assert_eq!(
            error.to_string(),
            "Hardware discovery failed: no gpiochip devices in /dev"
        );
    }

    #[test]
    fn test_backend_error() {
        let error = HardwareError::backend("P8_30", "EBUSY");
        assert_eq!(error.to_string(), "Backend error on pin P8_30: EBUSY");
    }

    #[test]
    fn test_error_display() {
        let errors = vec![
            HardwareError::unknown_pin("a"),
            HardwareError::not_configured("b"),
            HardwareError::Closed,
        ];

        for error in errors {
            let _ = format!("{}", error);
            let _ = format!("{:?}", error);
        }
    }
}
