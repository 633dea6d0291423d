//! # gpiohub-cli
//!
//! The `gpiohubd` daemon: loads the configuration, claims the lines, starts
//! inputs and outputs and delivers their state messages.
//!
//! ```no_run
//! use gpiohub_cli::{BackendKind, Config, Gateway, gateway};
//! use std::path::Path;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::load(Path::new("gpiohub.toml"))?;
//! let backend = gateway::backend(BackendKind::Mock, &config)?;
//! let gateway = Gateway::start(config, backend).await?;
//!
//! let mut messages = gateway.transport().subscribe("gpiohub/#");
//! while let Some(message) = messages.recv().await {
//!     println!("{} {}", message.topic, message.payload);
//! }
//! gateway.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod outputs;

pub use cli::{BackendKind, Cli};
pub use config::{ActionConfig, Config, ConfigError, CoverAction, OutputAction};
pub use error::{GatewayError, Result};
pub use gateway::Gateway;
pub use outputs::GpioOutput;
