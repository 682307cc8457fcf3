//! Error types for endpoints

use thiserror::Error;

/// Error type for archive and messaging endpoints
#[derive(Error, Debug)]
pub enum Error {
    /// Core library error
    #[error("Core error: {0}")]
    Core(#[from] datapipes_core::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Location string that names no usable endpoint
    #[error("Invalid location '{0}'")]
    InvalidLocation(String),

    /// Malformed archive member
    #[error("Archive error: {0}")]
    Archive(String),

    /// Frame that could not be encoded or decoded
    #[error("Frame error: {0}")]
    Frame(#[from] bincode::Error),

    /// Peer went away or misbehaved
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Result type for endpoints
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Attach the location the error occurred at
    #[must_use]
    pub fn at(self, location: &str) -> Self {
        match self {
            Self::Io(error) => Self::Io(std::io::Error::new(error.kind(), format!("{location}: {error}"))),
            Self::Archive(reason) => Self::Archive(format!("{location}: {reason}")),
            Self::Transport(reason) => Self::Transport(format!("{location}: {reason}")),
            other => other,
        }
    }
}

impl From<Error> for datapipes_core::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::Core(error) => error,
            Error::Io(error) => Self::Io(error),
            Error::InvalidLocation(location) => Self::Config(format!("invalid location '{location}'")),
            Error::Archive(reason) => Self::Codec(reason),
            Error::Frame(error) => Self::Serialization(error),
            Error::Transport(reason) => Self::Transport(reason),
        }
    }
}
