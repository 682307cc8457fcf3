//! Periodic progress reporting

use datapipes_core::stream::forward;
use datapipes_core::{BoxFuture, Emitter, RecordStream, Result, RunContext, Stage};

/// Passes records unchanged and writes `"{label} {count}"` to the run's
/// line log after every `every` records.
///
/// A non-positive `every` turns the stage into a plain pass-through.
#[derive(Debug, Clone)]
pub struct LogProgress {
    /// Prefix of each progress line
    label: String,

    /// Reporting interval, `None` when disabled
    every: Option<u64>,
}

impl LogProgress {
    /// Report every `every` records under `label`
    pub fn new(label: impl Into<String>, every: i64) -> Self {
        Self {
            label: label.into(),
            every: u64::try_from(every).ok().filter(|&n| n > 0),
        }
    }

    /// Prefix of each progress line
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether any lines will be written
    pub fn is_enabled(&self) -> bool {
        self.every.is_some()
    }
}

impl Stage for LogProgress {
    fn name(&self) -> &str {
        "progress"
    }

    fn run<'a>(
        &'a mut self,
        input: &'a mut RecordStream,
        output: &'a mut Emitter,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let Some(every) = self.every else {
                return forward(input, output).await.map(drop);
            };

            let mut count = 0u64;
            while let Some(record) = input.next().await? {
                output.emit(record).await?;
                count += 1;
                if count % every == 0 {
                    ctx.log().write_line(&format!("{} {count}", self.label));
                }
            }
            Ok(())
        })
    }
}
