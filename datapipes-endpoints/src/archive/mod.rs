//! Tar container endpoints
//!
//! A container is a plain tar stream in which each record contributes one
//! member per field. The source concatenates any number of containers, the
//! sink produces exactly one.

pub mod codec;
mod sink;
mod source;

pub use codec::{split_member, TarReader, TarWriter};
pub use sink::ArchiveSink;
pub use source::ArchiveSource;

/// Location naming standard input or standard output
pub const STDIO: &str = "-";
