//! Sources and sinks for datapipes
//!
//! Records enter and leave a pipeline either through tar containers on
//! disk or standard I/O ([`archive`]), or through a framed TCP connection
//! to another process ([`messaging`]). [`make_source`] and [`make_sink`]
//! pick the endpoint from a location string.

#![warn(missing_docs)]

pub mod archive;
mod error;
pub mod location;
pub mod messaging;

pub use archive::{ArchiveSink, ArchiveSource, TarReader, TarWriter};
pub use error::{Error, Result};
pub use location::{is_messaging, make_sink, make_source, sink_factory, source_factory, Location};
pub use messaging::{Endpoint, Frame, MessageChannel, MessagingSink, MessagingSource};
