use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt entry for key {key}: {reason}")]
    Corruption { key: String, reason: String },

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl Error {
    /// Returns a stable error code for this error variant.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io(_) => "IO_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Corruption { .. } => "CORRUPTION",
            Error::InvalidKey(_) => "INVALID_KEY",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Unavailable(_) => "UNAVAILABLE",
        }
    }

    /// Returns true if repeating the same store call might succeed.
    ///
    /// IO hiccups and an unavailable backend are transient; malformed data and
    /// bad keys will fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Io(_) => true,
            Error::Unavailable(_) => true,

            Error::Serialization(_) => false,
            Error::Corruption { .. } => false,
            Error::InvalidKey(_) => false,
            Error::InvalidConfig(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
