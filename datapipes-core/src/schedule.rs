//! Pipeline execution: the run context and the processing driver
//!
//! [`Processing`] wires one source, one stage (usually a [`Pipeline`]) and
//! one sink together, runs each as its own task and waits until the sink
//! is done or something fails.
//!
//! [`Pipeline`]: crate::pipeline::Pipeline

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::log::{LineLog, TracingLog};
use crate::sink::{self, Sink};
use crate::source::{self, Source};
use crate::stage::{self, BoxStage, Stage};
use crate::stream::channel;

/// Configuration for a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Records buffered between adjacent components
    pub channel_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
        }
    }
}

/// State shared by every component of one run
#[derive(Clone)]
pub struct RunContext {
    /// Identifier of the run, attached to log spans
    id: Uuid,

    /// Cancelled when the run ends early
    cancel: CancellationToken,

    /// Progress log
    log: Arc<dyn LineLog>,

    /// Run configuration
    config: PipelineConfig,
}

impl RunContext {
    /// Create a context for a new run
    pub fn new(config: PipelineConfig, log: Arc<dyn LineLog>, cancel: CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            cancel,
            log,
            config,
        }
    }

    /// Run identifier
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Token cancelled when the run stops
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the run has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Progress log for this run
    pub fn log(&self) -> &dyn LineLog {
        self.log.as_ref()
    }

    /// Run configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new(PipelineConfig::default(), Arc::new(TracingLog), CancellationToken::new())
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("id", &self.id)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Statistics from a completed run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Records emitted by the source
    pub records_read: u64,

    /// Records consumed by the sink
    pub records_written: u64,

    /// Wall-clock duration of the run
    pub elapsed: Duration,
}

/// Builds the source once the run context exists
pub type SourceFactory = Box<dyn FnOnce(&RunContext) -> Result<Box<dyn Source>> + Send>;

/// Builds the sink once the run context exists
pub type SinkFactory = Box<dyn FnOnce(&RunContext) -> Result<Box<dyn Sink>> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Source,
    Pipeline,
    Sink,
}

/// Connects a source, a stage and a sink and runs them to completion
pub struct Processing {
    make_source: SourceFactory,
    pipeline: BoxStage,
    make_sink: SinkFactory,
    config: PipelineConfig,
    log: Arc<dyn LineLog>,
    cancel: CancellationToken,
}

impl Processing {
    /// Create a driver from a source constructor, a stage and a sink
    /// constructor.
    pub fn new<S, K>(make_source: S, pipeline: impl Stage + 'static, make_sink: K) -> Self
    where
        S: FnOnce(&RunContext) -> Result<Box<dyn Source>> + Send + 'static,
        K: FnOnce(&RunContext) -> Result<Box<dyn Sink>> + Send + 'static,
    {
        Self {
            make_source: Box::new(make_source),
            pipeline: Box::new(pipeline),
            make_sink: Box::new(make_sink),
            config: PipelineConfig::default(),
            log: Arc::new(TracingLog),
            cancel: CancellationToken::new(),
        }
    }

    /// Use the given configuration
    #[must_use]
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Send progress lines to `log`
    #[must_use]
    pub fn with_log(mut self, log: Arc<dyn LineLog>) -> Self {
        self.log = log;
        self
    }

    /// Token that cancels the run from outside
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until the sink finishes or a component fails.
    ///
    /// On failure every other component is cancelled and the first
    /// root-cause error is returned.
    pub async fn run(self) -> Result<RunStats> {
        let ctx = RunContext::new(self.config, self.log, self.cancel);
        let span = tracing::info_span!("processing", run_id = %ctx.id());
        run_components(ctx, self.make_source, self.pipeline, self.make_sink)
            .instrument(span)
            .await
    }
}

async fn run_components(
    ctx: RunContext,
    make_source: SourceFactory,
    mut pipeline: BoxStage,
    make_sink: SinkFactory,
) -> Result<RunStats> {
    let started = Instant::now();

    // Configuration faults surface here, before anything streams.
    let mut source = make_source(&ctx)?;
    let mut sink = make_sink(&ctx)?;
    info!(source = source.name(), sink = sink.name(), "starting run");

    let capacity = ctx.config().channel_capacity;
    let (mut source_out, mut pipeline_in) = channel(capacity);
    let (mut pipeline_out, mut sink_in) = channel(capacity);

    let mut tasks: JoinSet<(Role, u64, Result<()>)> = JoinSet::new();

    let source_ctx = ctx.clone();
    tasks.spawn(
        async move {
            let result = source::drive(source.as_mut(), &mut source_out, &source_ctx).await;
            (Role::Source, source_out.emitted(), result)
        }
        .in_current_span(),
    );

    let pipeline_ctx = ctx.clone();
    tasks.spawn(
        async move {
            let result = stage::drive(
                pipeline.as_mut(),
                &mut pipeline_in,
                &mut pipeline_out,
                &pipeline_ctx,
            )
            .await;
            (Role::Pipeline, pipeline_out.emitted(), result)
        }
        .in_current_span(),
    );

    let sink_ctx = ctx.clone();
    tasks.spawn(
        async move {
            let result = sink::drive(sink.as_mut(), &mut sink_in, &sink_ctx).await;
            (Role::Sink, sink_in.received(), result)
        }
        .in_current_span(),
    );

    let mut stats = RunStats::default();
    let mut sink_done = false;
    let mut failures: Vec<Error> = Vec::new();

    while let Some(joined) = tasks.join_next().await {
        let (role, count, result) = match joined {
            Ok(outcome) => outcome,
            Err(error) => {
                if !sink_done {
                    ctx.cancel_token().cancel();
                    failures.push(Error::Join(error));
                }
                continue;
            }
        };

        match role {
            Role::Source => stats.records_read = count,
            Role::Sink => stats.records_written = count,
            Role::Pipeline => {}
        }

        match result {
            Ok(()) if role == Role::Sink => {
                sink_done = true;
                // Whatever is still running upstream (an endless message
                // source, for instance) is no longer needed.
                ctx.cancel_token().cancel();
            }
            Ok(()) => {}
            Err(error) if sink_done => {
                debug!(?role, %error, "component stopped after the sink finished");
            }
            Err(error) => {
                if failures.is_empty() {
                    warn!(?role, %error, "component failed, cancelling run");
                    ctx.cancel_token().cancel();
                }
                failures.push(error);
            }
        }
    }

    stats.elapsed = started.elapsed();

    if sink_done {
        info!(
            records_read = stats.records_read,
            records_written = stats.records_written,
            elapsed_ms = u64::try_from(stats.elapsed.as_millis()).unwrap_or(u64::MAX),
            "run complete"
        );
        return Ok(stats);
    }

    Err(first_root_cause(failures))
}

/// Pick the first error that is not merely a consequence of another one.
fn first_root_cause(failures: Vec<Error>) -> Error {
    let mut fallback = None;
    for error in failures {
        if !error.is_derivative() {
            return error;
        }
        fallback.get_or_insert(error);
    }
    fallback.unwrap_or(Error::Cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MemoryLog;
    use crate::pipeline::Pipeline;
    use crate::record::Record;
    use crate::sink::CollectingSink;
    use crate::source::MemorySource;
    use crate::stage::MapStage;
    use crate::stream::Emitter;
    use futures::future::BoxFuture;

    fn records(n: usize) -> Vec<Record> {
        (0..n).map(|i| Record::new(format!("{i:03}")).with_field("n", i.to_string())).collect()
    }

    /// Emits forever until cancelled, like a message source without EOF
    struct EndlessSource;

    impl Source for EndlessSource {
        fn name(&self) -> &str {
            "endless"
        }

        fn run<'a>(&'a mut self, output: &'a mut Emitter, _ctx: &'a RunContext) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                let mut i = 0u64;
                loop {
                    output.emit(Record::new(i.to_string())).await?;
                    i += 1;
                }
            })
        }
    }

    struct BrokenSource;

    impl Source for BrokenSource {
        fn name(&self) -> &str {
            "broken.tar"
        }

        fn run<'a>(&'a mut self, output: &'a mut Emitter, _ctx: &'a RunContext) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                output.emit(Record::new("first")).await?;
                Err(Error::Codec("truncated header".into()))
            })
        }
    }

    #[tokio::test]
    async fn identity_run_delivers_everything() {
        let sink = CollectingSink::new();
        let collected = sink.handle();

        let stats = Processing::new(
            move |_: &RunContext| Ok(Box::new(MemorySource::new(records(50))) as Box<dyn Source>),
            Pipeline::identity(),
            move |_: &RunContext| Ok(Box::new(sink) as Box<dyn Sink>),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(stats.records_read, 50);
        assert_eq!(stats.records_written, 50);
        assert_eq!(*collected.lock().unwrap(), records(50));
    }

    #[tokio::test]
    async fn finished_sink_cancels_endless_source() {
        let sink = CollectingSink::with_max_records(10);
        let collected = sink.handle();

        let stats = Processing::new(
            |_: &RunContext| Ok(Box::new(EndlessSource) as Box<dyn Source>),
            Pipeline::identity(),
            move |_: &RunContext| Ok(Box::new(sink) as Box<dyn Sink>),
        )
        .with_log(Arc::new(MemoryLog::new()))
        .run()
        .await
        .unwrap();

        assert_eq!(stats.records_written, 10);
        assert_eq!(collected.lock().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn source_fault_is_reported_with_its_name() {
        let error = Processing::new(
            |_: &RunContext| Ok(Box::new(BrokenSource) as Box<dyn Source>),
            Pipeline::identity().with(MapStage::new("pass", |r: Record| Ok(Some(r)))),
            |_: &RunContext| Ok(Box::new(CollectingSink::new()) as Box<dyn Sink>),
        )
        .run()
        .await
        .unwrap_err();

        assert!(!error.is_derivative());
        let message = error.to_string();
        assert!(message.contains("broken.tar"), "{message}");
        assert!(message.contains("truncated header"), "{message}");
    }

    #[tokio::test]
    async fn configuration_fault_happens_before_streaming() {
        let error = Processing::new(
            |_: &RunContext| Err(Error::Config("only one messaging input is allowed".into())),
            Pipeline::identity(),
            |_: &RunContext| Ok(Box::new(CollectingSink::new()) as Box<dyn Sink>),
        )
        .run()
        .await
        .unwrap_err();

        assert!(matches!(error, Error::Config(_)));
    }

    #[tokio::test]
    async fn external_cancel_stops_the_run() {
        let processing = Processing::new(
            |_: &RunContext| Ok(Box::new(EndlessSource) as Box<dyn Source>),
            Pipeline::identity(),
            |_: &RunContext| Ok(Box::new(CollectingSink::new()) as Box<dyn Sink>),
        );
        let cancel = processing.cancel_token();
        let run = tokio::spawn(processing.run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let error = run.await.unwrap().unwrap_err();
        assert!(error.is_derivative());
    }
}
