//! Source trait and an in-memory source

use futures::future::BoxFuture;
use tracing::debug;

use crate::error::{Error, Result};
use crate::record::Record;
use crate::schedule::RunContext;
use crate::stream::Emitter;

/// A producer of records for the pipeline
pub trait Source: Send {
    /// Description used in logs and errors, e.g. the locations read
    fn name(&self) -> &str;

    /// Emit records into `output` until the underlying data is exhausted.
    ///
    /// Returning normally closes the stream; returning an error sends a
    /// fault marker downstream.
    fn run<'a>(&'a mut self, output: &'a mut Emitter, ctx: &'a RunContext)
        -> BoxFuture<'a, Result<()>>;
}

impl<S: Source + ?Sized> Source for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn run<'a>(&'a mut self, output: &'a mut Emitter, ctx: &'a RunContext) -> BoxFuture<'a, Result<()>> {
        (**self).run(output, ctx)
    }
}

/// Run `source` to completion, honouring cancellation, and settle its
/// output stream.
pub async fn drive(source: &mut dyn Source, output: &mut Emitter, ctx: &RunContext) -> Result<()> {
    let cancel = ctx.cancel_token();
    let result = tokio::select! {
        result = source.run(output, ctx) => result,
        () = cancel.cancelled() => Err(Error::Cancelled),
    };

    match output.settle(result).await {
        Ok(()) => {
            debug!(source = source.name(), emitted = output.emitted(), "source finished");
            Ok(())
        }
        Err(error) => Err(error.in_component(&format!("source {}", source.name()))),
    }
}

/// A source that emits a fixed list of records
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    /// Records to emit, in order
    records: Vec<Record>,
}

impl MemorySource {
    /// Create a source over the given records
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }
}

impl Source for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    fn run<'a>(&'a mut self, output: &'a mut Emitter, _ctx: &'a RunContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            for record in std::mem::take(&mut self.records) {
                output.emit(record).await?;
            }
            Ok(())
        })
    }
}
