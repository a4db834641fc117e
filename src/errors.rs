use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Unknown driver: {0}")]
    UnknownDriver(String),

    #[error(transparent)]
    Audio(#[from] audiodrv::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;
