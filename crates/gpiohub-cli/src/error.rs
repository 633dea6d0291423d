use crate::config::ConfigError;
use gpiohub_hardware::HardwareError;
use gpiohub_input::InputError;
use gpiohub_network::NetworkError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Hardware(#[from] HardwareError),

    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("no output on pin {0}")]
    UnknownOutput(String),

    #[error("backend {0} is not available in this build")]
    BackendUnavailable(&'static str),
}
