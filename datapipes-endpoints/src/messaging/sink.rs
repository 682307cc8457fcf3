//! Sink sending records to a messaging peer

use datapipes_core::{BoxFuture, RecordStream, Result, RunContext, Sink};
use tracing::debug;

use super::Endpoint;

/// Sends every record to a single peer, followed by an EOF frame when
/// EOF signalling is enabled.
#[derive(Debug)]
pub struct MessagingSink {
    endpoint: Endpoint,
    eof: bool,
    name: String,
}

impl MessagingSink {
    /// Sink on `endpoint`
    pub fn new(endpoint: Endpoint, eof: bool) -> Self {
        let name = format!("messaging {}", endpoint.describe());
        Self { endpoint, eof, name }
    }

    /// Whether an EOF frame is sent after the last record
    pub fn sends_eof(&self) -> bool {
        self.eof
    }
}

impl Sink for MessagingSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a mut self, input: &'a mut RecordStream, _ctx: &'a RunContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut channel = self.endpoint.open().await?;
            while let Some(record) = input.next().await? {
                channel.send(record).await?;
            }
            if self.eof {
                channel.send_eof().await?;
            }
            channel.shutdown().await?;
            debug!(peer = %channel.peer(), records = input.received(), "messaging sink finished");
            Ok(())
        })
    }
}
