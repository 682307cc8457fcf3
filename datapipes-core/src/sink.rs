//! Sink trait and an in-memory sink

use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tracing::debug;

use crate::error::{Error, Result};
use crate::record::Record;
use crate::schedule::RunContext;
use crate::stream::RecordStream;

/// A consumer of records at the end of the pipeline
pub trait Sink: Send {
    /// Description used in logs and errors, e.g. the output location
    fn name(&self) -> &str;

    /// Consume `input` until its end marker, then finalize the output.
    fn run<'a>(&'a mut self, input: &'a mut RecordStream, ctx: &'a RunContext)
        -> BoxFuture<'a, Result<()>>;
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn run<'a>(&'a mut self, input: &'a mut RecordStream, ctx: &'a RunContext) -> BoxFuture<'a, Result<()>> {
        (**self).run(input, ctx)
    }
}

/// Run `sink` to completion, honouring cancellation.
///
/// The input is released afterwards so upstream producers can exit.
pub async fn drive(sink: &mut dyn Sink, input: &mut RecordStream, ctx: &RunContext) -> Result<()> {
    let cancel = ctx.cancel_token();
    let result = tokio::select! {
        result = sink.run(input, ctx) => result,
        () = cancel.cancelled() => Err(Error::Cancelled),
    };
    input.release();

    match result {
        Ok(()) => {
            debug!(sink = sink.name(), received = input.received(), "sink finished");
            Ok(())
        }
        Err(error) => Err(error.in_component(&format!("sink {}", sink.name()))),
    }
}

/// Shared handle to the records gathered by a [`CollectingSink`]
pub type Collected = Arc<Mutex<Vec<Record>>>;

/// A sink that collects records in memory
#[derive(Debug, Default)]
pub struct CollectingSink {
    /// The collected records
    records: Collected,

    /// Maximum number of records to collect
    max_records: Option<usize>,
}

impl CollectingSink {
    /// Create a new collecting sink with no limit
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sink that stops reading after `max_records`
    pub fn with_max_records(max_records: usize) -> Self {
        Self {
            records: Collected::default(),
            max_records: Some(max_records),
        }
    }

    /// Handle through which the collected records can be read after a run
    pub fn handle(&self) -> Collected {
        Arc::clone(&self.records)
    }
}

impl Sink for CollectingSink {
    fn name(&self) -> &str {
        "memory"
    }

    fn run<'a>(&'a mut self, input: &'a mut RecordStream, _ctx: &'a RunContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            loop {
                if let Some(max) = self.max_records {
                    if input.received() >= max as u64 {
                        return Ok(());
                    }
                }
                let Some(record) = input.next().await? else {
                    return Ok(());
                };
                match self.records.lock() {
                    Ok(mut records) => records.push(record),
                    Err(poisoned) => poisoned.into_inner().push(record),
                }
            }
        })
    }
}
