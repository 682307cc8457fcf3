//! Error types for datapipes streams and stages

use std::io;
use thiserror::Error;

/// Result type for datapipes operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for datapipes operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error while reading or writing a container
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration, reported before streaming starts
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A record lacks a field that a stage requires
    #[error("Record '{key}' is missing required field '{field}'")]
    MissingField {
        /// Key of the offending record
        key: String,
        /// Name of the missing field
        field: String,
    },

    /// Malformed container contents
    #[error("Codec error: {0}")]
    Codec(String),

    /// Broken or misbehaving message transport
    #[error("Transport error: {0}")]
    Transport(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// The producing side of a stream faulted
    #[error("Upstream fault: {0}")]
    Upstream(String),

    /// The consuming side of a stream went away
    #[error("Downstream closed")]
    DownstreamClosed,

    /// A record was emitted after the stream was closed
    #[error("Emit on a closed stream")]
    StreamClosed,

    /// A stream was read after its end marker
    #[error("Read after end of stream")]
    ReadAfterEnd,

    /// The run was cancelled
    #[error("Cancelled")]
    Cancelled,

    /// A stage failed
    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        /// Name of the failing stage
        stage: String,
        /// Underlying error
        source: Box<Error>,
    },

    /// A source or sink failed
    #[error("{component} failed: {source}")]
    Component {
        /// Description of the failing component
        component: String,
        /// Underlying error
        source: Box<Error>,
    },

    /// A component task panicked or was aborted
    #[error("Task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    /// Whether this error only reflects a fault or cancellation elsewhere
    /// in the run rather than a root cause.
    pub fn is_derivative(&self) -> bool {
        match self {
            Error::Upstream(_) | Error::DownstreamClosed | Error::Cancelled => true,
            Error::Stage { source, .. } | Error::Component { source, .. } => source.is_derivative(),
            _ => false,
        }
    }

    /// Attach the name of the stage that produced this error.
    ///
    /// Errors that already carry a stage are returned unchanged.
    pub fn in_stage(self, stage: &str) -> Self {
        match self {
            Error::Stage { .. } => self,
            other => Error::Stage {
                stage: stage.to_owned(),
                source: Box::new(other),
            },
        }
    }

    /// Attach a source or sink description to this error.
    pub fn in_component(self, component: &str) -> Self {
        match self {
            Error::Component { .. } => self,
            other => Error::Component {
                component: component.to_owned(),
                source: Box::new(other),
            },
        }
    }
}
