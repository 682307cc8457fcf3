//! Core traits, data structures, and the processing driver for datapipes
//!
//! This crate defines the record model, the bounded record streams that
//! connect components, the [`Stage`] abstraction and its composition into
//! a [`Pipeline`], the [`Source`] and [`Sink`] endpoints, and
//! [`Processing`], which runs a source, a pipeline and a sink together
//! with well-defined termination.

#![warn(missing_docs)]

pub mod error;
pub mod log;
pub mod pipeline;
pub mod record;
pub mod schedule;
pub mod sink;
pub mod source;
pub mod stage;
pub mod stream;

// Re-export key types for convenience
pub use error::{Error, Result};
pub use log::{LineLog, MemoryLog, TracingLog};
pub use pipeline::Pipeline;
pub use record::{Record, KEY_FIELD};
pub use schedule::{PipelineConfig, Processing, RunContext, RunStats};
pub use sink::{CollectingSink, Sink};
pub use source::{MemorySource, Source};
pub use stage::{BoxStage, Identity, MapStage, Stage};
pub use stream::{channel, Emitter, RecordStream};

/// Payload type of record fields
pub use bytes::Bytes;

/// Re-exported so implementors of the endpoint and stage traits name the
/// same future type.
pub use futures::future::BoxFuture;
