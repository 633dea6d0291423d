use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Parsing errors
    #[error("Unknown event category: {0}")]
    UnknownCategory(String),

    #[error("Unknown click type: {0}")]
    UnknownClickType(String),

    #[error("Unknown input kind: {0}")]
    UnknownInputKind(String),

    // Payload errors
    #[error("Payload encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing configuration key: {0}")]
    MissingConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
