//! Source receiving records from a messaging peer

use datapipes_core::{BoxFuture, Emitter, Result, RunContext, Source};
use tracing::{debug, info};

use super::{Endpoint, Frame, MessageChannel};
use crate::error::Error;

/// Emits the records received from one peer at a time.
///
/// An EOF frame closes the stream. Without EOF signalling a listening
/// source outlives its peers: when one disconnects, the next is accepted,
/// so the stream ends only by cancellation.
#[derive(Debug)]
pub struct MessagingSource {
    endpoint: Endpoint,
    eof: bool,
    name: String,
}

impl MessagingSource {
    /// Source on `endpoint`
    pub fn new(endpoint: Endpoint, eof: bool) -> Self {
        let name = format!("messaging {}", endpoint.describe());
        Self { endpoint, eof, name }
    }

    /// Whether the peer is expected to signal the end of the stream
    pub fn expects_eof(&self) -> bool {
        self.eof
    }
}

/// How receiving from one peer ended
enum Ending {
    Eof,
    Disconnected,
}

async fn receive_all(channel: &mut MessageChannel, output: &mut Emitter) -> Result<Ending> {
    loop {
        match channel.receive().await? {
            Some(Frame::Record(record)) => output.emit(record).await?,
            Some(Frame::Eof) => return Ok(Ending::Eof),
            None => return Ok(Ending::Disconnected),
        }
    }
}

impl Source for MessagingSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a mut self, output: &'a mut Emitter, _ctx: &'a RunContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            loop {
                let mut channel = self.endpoint.open().await?;
                let peer = channel.peer();
                match receive_all(&mut channel, output).await? {
                    Ending::Eof => {
                        info!(%peer, records = output.emitted(), "end of stream received");
                        return Ok(());
                    }
                    Ending::Disconnected if self.eof || !self.endpoint.is_listening() => {
                        return Err(Error::Transport(format!("{peer} disconnected before end of stream")).into());
                    }
                    Ending::Disconnected => {
                        debug!(%peer, "peer disconnected, waiting for the next one");
                    }
                }
            }
        })
    }
}
