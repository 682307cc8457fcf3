//! Stage trait and closure-backed stages
//!
//! A stage reads records from one stream and writes records to another.
//! Stages never close or fail their output themselves on the error path:
//! [`drive`] settles both streams once [`Stage::run`] returns, so a stage
//! only has to propagate errors with `?`.

use futures::future::BoxFuture;
use tracing::debug;

use crate::error::{Error, Result};
use crate::record::Record;
use crate::schedule::RunContext;
use crate::stream::{Emitter, RecordStream};

/// A transformation from one record stream to another
pub trait Stage: Send {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Consume `input` and produce `output` until the input ends or the
    /// stage decides to stop early.
    ///
    /// The stage may close `output` itself; [`drive`] closes it otherwise.
    fn run<'a>(
        &'a mut self,
        input: &'a mut RecordStream,
        output: &'a mut Emitter,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, Result<()>>;

    /// Whether this stage preserves record order
    fn preserves_order(&self) -> bool {
        true
    }
}

/// Boxed stage, as stored in a pipeline
pub type BoxStage = Box<dyn Stage>;

impl<S: Stage + ?Sized> Stage for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn run<'a>(
        &'a mut self,
        input: &'a mut RecordStream,
        output: &'a mut Emitter,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, Result<()>> {
        (**self).run(input, output, ctx)
    }

    fn preserves_order(&self) -> bool {
        (**self).preserves_order()
    }
}

/// Run `stage` to completion, honouring cancellation, and settle both of
/// its streams.
///
/// On success the output is closed. On failure the output receives a fault
/// marker. In both cases the input is released so the upstream producer
/// can exit.
pub async fn drive(
    stage: &mut dyn Stage,
    input: &mut RecordStream,
    output: &mut Emitter,
    ctx: &RunContext,
) -> Result<()> {
    let cancel = ctx.cancel_token();
    let result = tokio::select! {
        result = stage.run(input, output, ctx) => result,
        () = cancel.cancelled() => Err(Error::Cancelled),
    };
    input.release();

    let name = stage.name().to_owned();
    match output.settle(result).await {
        Ok(()) => {
            debug!(stage = %name, received = input.received(), emitted = output.emitted(), "stage finished");
            Ok(())
        }
        Err(error) => Err(error.in_stage(&name)),
    }
}

/// Per-record stage built from a closure.
///
/// The closure returns `Ok(Some(record))` to pass a record on, `Ok(None)`
/// to drop it, and an error to fail the stream.
pub struct MapStage<F> {
    name: String,
    f: F,
}

impl<F> MapStage<F>
where
    F: FnMut(Record) -> Result<Option<Record>> + Send,
{
    /// Create a stage named `name` applying `f` to every record
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Stage for MapStage<F>
where
    F: FnMut(Record) -> Result<Option<Record>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(
        &'a mut self,
        input: &'a mut RecordStream,
        output: &'a mut Emitter,
        _ctx: &'a RunContext,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            while let Some(record) = input.next().await? {
                if let Some(record) = (self.f)(record)? {
                    output.emit(record).await?;
                }
            }
            Ok(())
        })
    }
}

/// Stage that passes records through unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct Identity;

impl Stage for Identity {
    fn name(&self) -> &str {
        "identity"
    }

    fn run<'a>(
        &'a mut self,
        input: &'a mut RecordStream,
        output: &'a mut Emitter,
        _ctx: &'a RunContext,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            crate::stream::forward(input, output).await?;
            Ok(())
        })
    }
}
