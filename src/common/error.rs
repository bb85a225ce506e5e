use tch::TchError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Memn2nError {
    #[error("IO error: {0}")]
    IOError(String),

    #[error("Tch tensor error: {0}")]
    TchError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid configuration error: {0}")]
    InvalidConfigurationError(String),

    #[error("Shape error: {0}")]
    ShapeError(String),

    #[error("Value error: {0}")]
    ValueError(String),
}

impl From<std::io::Error> for Memn2nError {
    fn from(error: std::io::Error) -> Self {
        Memn2nError::IOError(error.to_string())
    }
}

impl From<TchError> for Memn2nError {
    fn from(error: TchError) -> Self {
        Memn2nError::TchError(error.to_string())
    }
}

impl From<serde_json::Error> for Memn2nError {
    fn from(error: serde_json::Error) -> Self {
        Memn2nError::SerializationError(error.to_string())
    }
}
