//! Error types for input setup.

use gpiohub_hardware::HardwareError;

pub type Result<T> = std::result::Result<T, InputError>;

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    /// The pin could not be configured or sampled.
    #[error(transparent)]
    Hardware(#[from] HardwareError),

    /// Input settings that cannot work together.
    #[error("Invalid input {pin}: {message}")]
    InvalidConfig { pin: String, message: String },
}

impl InputError {
    pub fn invalid_config(pin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            pin: pin.into(),
            message: message.into(),
        }
    }
}
