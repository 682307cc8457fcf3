//! Composition of stages into a single stage

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::task::JoinSet;
use tracing::{debug, Instrument};

use crate::error::{Error, Result};
use crate::schedule::RunContext;
use crate::stage::{drive, BoxStage, Stage};
use crate::stream::{channel, forward, Emitter, RecordStream};

/// An ordered chain of stages that behaves as one stage.
///
/// Every stage runs on its own task with a bounded stream to its
/// successor, so a slow stage only holds up its neighbours through
/// backpressure. An empty pipeline passes records through unchanged.
///
/// A run that ends in a fault drops the stages that were still running.
#[derive(Default)]
pub struct Pipeline {
    /// The stages in this pipeline, upstream first
    stages: Vec<BoxStage>,
}

impl Pipeline {
    /// Create a pipeline from stages, upstream first
    pub fn new(stages: Vec<BoxStage>) -> Self {
        Self { stages }
    }

    /// The pass-through pipeline
    pub fn identity() -> Self {
        Self::default()
    }

    /// Append a stage at the downstream end
    pub fn push(&mut self, stage: impl Stage + 'static) {
        self.stages.push(Box::new(stage));
    }

    /// Builder-style variant of [`Pipeline::push`]
    #[must_use]
    pub fn with(mut self, stage: impl Stage + 'static) -> Self {
        self.push(stage);
        self
    }

    /// Number of stages
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the pipeline has no stages
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage names, upstream first
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl FromIterator<BoxStage> for Pipeline {
    fn from_iter<I: IntoIterator<Item = BoxStage>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl Stage for Pipeline {
    fn name(&self) -> &str {
        "pipeline"
    }

    fn run<'a>(
        &'a mut self,
        input: &'a mut RecordStream,
        output: &'a mut Emitter,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.stages.is_empty() {
                forward(input, output).await?;
                return Ok(());
            }

            let capacity = ctx.config().channel_capacity;
            let count = self.stages.len();
            let (mut head, mut upstream) = channel(capacity);
            let mut tasks = JoinSet::new();
            for (index, mut stage) in std::mem::take(&mut self.stages).into_iter().enumerate() {
                let (mut emitter, next) = channel(capacity);
                let mut input = std::mem::replace(&mut upstream, next);
                let ctx = ctx.clone();
                tasks.spawn(
                    async move {
                        let result = drive(stage.as_mut(), &mut input, &mut emitter, &ctx).await;
                        (index, stage, result)
                    }
                    .in_current_span(),
                );
            }
            let mut tail = upstream;

            let mut entry = Bridge("pipeline input");
            let mut exit = Bridge("pipeline output");
            let mut bridges: FuturesUnordered<BoxFuture<'_, Result<()>>> = FuturesUnordered::new();
            bridges.push(Box::pin(drive(&mut entry, input, &mut head, ctx)));
            bridges.push(Box::pin(drive(&mut exit, &mut tail, output, ctx)));

            // A root-cause failure ends the pipeline at once; dropping the
            // join set aborts the remaining stages.
            let mut finished: Vec<Option<BoxStage>> = (0..count).map(|_| None).collect();
            let mut first_error: Option<Error> = None;
            loop {
                let result = tokio::select! {
                    Some(result) = bridges.next() => result,
                    Some(joined) = tasks.join_next() => {
                        let (index, stage, result) = joined?;
                        finished[index] = Some(stage);
                        result
                    }
                    else => break,
                };
                match result {
                    Ok(()) => {}
                    Err(error) if !error.is_derivative() => return Err(error),
                    Err(error) => {
                        debug!(%error, "stage stopped after a fault elsewhere");
                        first_error.get_or_insert(error);
                    }
                }
            }

            self.stages = finished.into_iter().flatten().collect();
            first_error.map_or(Ok(()), Err)
        })
    }

    fn preserves_order(&self) -> bool {
        self.stages.iter().all(|stage| stage.preserves_order())
    }
}

/// Copies records across the boundary between the pipeline's own streams
/// and the stage tasks.
struct Bridge(&'static str);

impl Stage for Bridge {
    fn name(&self) -> &str {
        self.0
    }

    fn run<'a>(
        &'a mut self,
        input: &'a mut RecordStream,
        output: &'a mut Emitter,
        _ctx: &'a RunContext,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { forward(input, output).await.map(|_| ()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use crate::stage::MapStage;

    fn tag(name: &'static str) -> MapStage<impl FnMut(Record) -> Result<Option<Record>> + Send> {
        MapStage::new(name, move |record: Record| {
            let seen = record.get("path").map(|v| v.to_vec()).unwrap_or_default();
            let path = [seen, name.as_bytes().to_vec()].concat();
            Ok(Some(record.with_field("path", path)))
        })
    }

    async fn run(mut pipeline: Pipeline, n: usize) -> Result<Vec<Record>> {
        let ctx = RunContext::default();
        let (mut tx, mut input) = channel(4);
        let producer = tokio::spawn(async move {
            for i in 0..n {
                tx.emit(Record::new(format!("{i}"))).await?;
            }
            tx.close().await
        });
        let (mut output, rx) = channel(4);
        let collector = tokio::spawn(rx.collect());

        drive(&mut pipeline, &mut input, &mut output, &ctx).await?;
        let _ = producer.await?;
        collector.await?
    }

    #[tokio::test]
    async fn empty_pipeline_is_identity() {
        let out = run(Pipeline::identity(), 5).await.unwrap();
        let keys: Vec<_> = out.iter().map(Record::key).collect();
        assert_eq!(keys, vec!["0", "1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn stages_apply_in_order() {
        let pipeline = Pipeline::identity().with(tag("a")).with(tag("b")).with(tag("c"));
        assert_eq!(pipeline.stage_names(), vec!["a", "b", "c"]);

        let out = run(pipeline, 20).await.unwrap();
        assert_eq!(out.len(), 20);
        for (i, record) in out.iter().enumerate() {
            assert_eq!(record.key(), i.to_string());
            assert_eq!(&record.get("path").unwrap()[..], b"abc");
        }
    }

    #[tokio::test]
    async fn stages_keep_their_order_after_a_run() {
        let mut pipeline = Pipeline::identity().with(tag("a")).with(tag("b"));
        let ctx = RunContext::default();
        let (mut tx, mut input) = channel(4);
        tx.close().await.unwrap();
        let (mut output, rx) = channel(4);

        drive(&mut pipeline, &mut input, &mut output, &ctx).await.unwrap();
        assert!(rx.collect().await.unwrap().is_empty());
        assert_eq!(pipeline.stage_names(), vec!["a", "b"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocked_stage_does_not_stall_its_predecessor() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        use std::time::{Duration, Instant};

        let passed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&passed);
        let counting = MapStage::new("count", move |record: Record| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Some(record))
        });

        let seen = Arc::clone(&passed);
        let mut first = true;
        let overlap = Arc::new(std::sync::Mutex::new(false));
        let report = Arc::clone(&overlap);
        let blocking = MapStage::new("block", move |record: Record| {
            if std::mem::take(&mut first) {
                // Block this task until the predecessor moves on.
                tokio::task::block_in_place(|| {
                    let deadline = Instant::now() + Duration::from_secs(2);
                    while Instant::now() < deadline && seen.load(Ordering::SeqCst) < 4 {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                });
                *report.lock().unwrap() = seen.load(Ordering::SeqCst) >= 4;
            }
            Ok(Some(record))
        });

        let out = run(Pipeline::identity().with(counting).with(blocking), 20).await.unwrap();
        assert_eq!(out.len(), 20);
        assert!(*overlap.lock().unwrap());
    }

    #[tokio::test]
    async fn fault_reports_the_failing_stage() {
        let failing = MapStage::new("explode", |record: Record| {
            if record.key() == "7" {
                Err(Error::Codec("bad record".into()))
            } else {
                Ok(Some(record))
            }
        });
        let pipeline = Pipeline::identity().with(tag("a")).with(failing).with(tag("b"));

        let error = run(pipeline, 100).await.unwrap_err();
        match error {
            Error::Stage { stage, .. } => assert_eq!(stage, "explode"),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
