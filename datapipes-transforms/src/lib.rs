//! Record stages for datapipes
//!
//! Windowing stages ([`Slice`], [`Shuffle`]) hold at most a bounded number
//! of records regardless of stream length. [`Rename`] selects and renames
//! fields, and [`LogProgress`] reports throughput without touching records.

#![warn(missing_docs)]

pub mod progress;
pub mod rename;
pub mod shuffle;
pub mod slice;

pub use progress::LogProgress;
pub use rename::{FieldSpec, Rename};
pub use shuffle::Shuffle;
pub use slice::Slice;

#[cfg(test)]
pub(crate) mod testing {
    use datapipes_core::stage::drive;
    use datapipes_core::{channel, Record, Result, RunContext, Stage};

    pub fn numbered(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| Record::new(format!("{i:05}")).with_field("idx", i.to_string()))
            .collect()
    }

    pub fn index_of(record: &Record) -> usize {
        record.key().parse().unwrap()
    }

    pub async fn run_stage_with(
        stage: &mut dyn Stage,
        records: Vec<Record>,
        ctx: &RunContext,
    ) -> Result<Vec<Record>> {
        let (mut tx, mut input) = channel(4);
        let producer = tokio::spawn(async move {
            for record in records {
                tx.emit(record).await?;
            }
            tx.close().await
        });
        let (mut output, rx) = channel(4);
        let collector = tokio::spawn(rx.collect());

        drive(stage, &mut input, &mut output, ctx).await?;
        let _ = producer.await?;
        collector.await?
    }

    pub async fn run_stage(stage: &mut dyn Stage, records: Vec<Record>) -> Result<Vec<Record>> {
        run_stage_with(stage, records, &RunContext::default()).await
    }
}
