//! Endpoint selection from location strings
//!
//! A location matching `^z[a-z]*:` names a messaging endpoint, anything
//! else a tar container path (`-` for standard input or output). For
//! messaging, the scheme decides which side listens: sources listen and
//! sinks connect, unless the part of the scheme after the `z` starts with
//! `r`, which reverses this. So `zpush://host:9000` connects a sink and
//! `zrpull://host:9000` connects a source.

use std::sync::LazyLock;

use datapipes_core::{RunContext, Sink, Source};
use regex::Regex;
use tracing::info;

use crate::archive::{ArchiveSink, ArchiveSource};
use crate::error::{Error, Result};
use crate::messaging::{Endpoint, MessagingSink, MessagingSource};

static MESSAGING_SCHEME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^z(?P<scheme>[a-z]*):(?://)?(?P<address>.*)$").expect("valid messaging pattern")
});

fn reverses(scheme: &str) -> bool {
    scheme.starts_with('r')
}

/// Parsed location
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// Tar container path, or `-`
    Archive(String),

    /// Messaging endpoint
    Messaging {
        /// Scheme name after the leading `z`
        scheme: String,

        /// `host:port` address
        address: String,
    },
}

impl Location {
    /// Classify a location string
    pub fn parse(location: &str) -> Result<Self> {
        let Some(captures) = MESSAGING_SCHEME.captures(location) else {
            if location.is_empty() {
                return Err(Error::InvalidLocation(location.to_owned()));
            }
            return Ok(Self::Archive(location.to_owned()));
        };

        let address = &captures["address"];
        if address.is_empty() {
            return Err(Error::InvalidLocation(location.to_owned()));
        }
        Ok(Self::Messaging {
            scheme: captures["scheme"].to_owned(),
            address: address.to_owned(),
        })
    }

    /// Whether this names a messaging endpoint
    pub fn is_messaging(&self) -> bool {
        matches!(self, Self::Messaging { .. })
    }

    /// Whether the scheme swaps which side listens
    pub fn is_reversed(&self) -> bool {
        matches!(self, Self::Messaging { scheme, .. } if reverses(scheme))
    }

    fn source_endpoint(address: &str, reversed: bool) -> Endpoint {
        if reversed {
            Endpoint::connect(address)
        } else {
            Endpoint::bind(address)
        }
    }

    fn sink_endpoint(address: &str, reversed: bool) -> Endpoint {
        if reversed {
            Endpoint::bind(address)
        } else {
            Endpoint::connect(address)
        }
    }
}

/// Whether `location` names a messaging endpoint
pub fn is_messaging(location: &str) -> bool {
    MESSAGING_SCHEME.is_match(location)
}

/// Build the source for an ordered list of input locations.
///
/// Several archive inputs are concatenated; a messaging input must be the
/// only one.
pub fn make_source(inputs: &[String], eof: bool) -> Result<Box<dyn Source>> {
    let Some(first) = inputs.first() else {
        return Err(datapipes_core::Error::Config("at least one input is required".into()).into());
    };

    match Location::parse(first)? {
        Location::Messaging { scheme, address } => {
            if inputs.len() != 1 {
                return Err(datapipes_core::Error::Config(
                    "a messaging input must be the only input".into(),
                )
                .into());
            }
            info!(location = %first, eof, "messaging source");
            let endpoint = Location::source_endpoint(&address, reverses(&scheme));
            Ok(Box::new(MessagingSource::new(endpoint, eof)))
        }
        Location::Archive(_) => {
            info!(inputs = ?inputs, "archive source");
            Ok(Box::new(ArchiveSource::new(inputs.to_vec())))
        }
    }
}

/// Build the sink for an output location
pub fn make_sink(output: &str, eof: bool) -> Result<Box<dyn Sink>> {
    match Location::parse(output)? {
        Location::Messaging { scheme, address } => {
            info!(location = %output, eof, "messaging sink");
            let endpoint = Location::sink_endpoint(&address, reverses(&scheme));
            Ok(Box::new(MessagingSink::new(endpoint, eof)))
        }
        Location::Archive(path) => {
            info!(location = %path, "archive sink");
            Ok(Box::new(ArchiveSink::new(path)))
        }
    }
}

/// Source constructor for [`datapipes_core::Processing`]
pub fn source_factory(
    inputs: Vec<String>,
    eof: bool,
) -> impl FnOnce(&RunContext) -> datapipes_core::Result<Box<dyn Source>> + Send + 'static {
    move |_: &RunContext| make_source(&inputs, eof).map_err(Into::into)
}

/// Sink constructor for [`datapipes_core::Processing`]
pub fn sink_factory(
    output: String,
    eof: bool,
) -> impl FnOnce(&RunContext) -> datapipes_core::Result<Box<dyn Sink>> + Send + 'static {
    move |_: &RunContext| make_sink(&output, eof).map_err(Into::into)
}
